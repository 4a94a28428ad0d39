//! Serializes the camera matrices into the buffers the engine expects.

use crate::{engine::TileLayerEngine, error::EngineError};
use bevy::math::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// The element order of a serialized matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixLayout {
    #[default]
    RowMajor,
    ColumnMajor,
}

pub fn serialize_matrix(matrix: &Mat4, layout: MatrixLayout) -> [f32; 16] {
    match layout {
        MatrixLayout::RowMajor => matrix.transpose().to_cols_array(),
        MatrixLayout::ColumnMajor => matrix.to_cols_array(),
    }
}

/// Negates the x axis.
#[inline]
pub fn mirror(vector: Vec3) -> Vec3 {
    Vec3::new(-vector.x, vector.y, vector.z)
}

/// The view matrix of a camera in the mirrored layer space.
///
/// The engine expects the opposite handedness along the x axis, so the position, target and up
/// vector are mirrored before the view matrix is built.
pub fn mirrored_view(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(mirror(eye), mirror(target), mirror(up))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMatrices {
    pub projection: Mat4,
    pub view: Mat4,
}

/// Pushes both matrices to the engine.
///
/// The buffers only live on the stack for the duration of each call.
pub fn push_matrices<E: TileLayerEngine>(
    engine: &mut E,
    matrices: &ViewMatrices,
    layout: MatrixLayout,
) -> Result<(), EngineError> {
    engine.push_projection_matrix(&serialize_matrix(&matrices.projection, layout))?;
    engine.push_view_matrix(&serialize_matrix(&matrices.view, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::ScriptedEngine;
    use bevy::math::Vec4;

    fn numbered() -> Mat4 {
        Mat4::from_cols_array(&std::array::from_fn(|i| i as f32))
    }

    #[test]
    fn row_major_lists_rows_first() {
        let matrix = numbered();
        let data = serialize_matrix(&matrix, MatrixLayout::RowMajor);

        assert_eq!(&data[0..4], &matrix.row(0).to_array());
        assert_eq!(&data[4..8], &matrix.row(1).to_array());
        assert_eq!(data[1], 4.0);
    }

    #[test]
    fn column_major_lists_columns_first() {
        let data = serialize_matrix(&numbered(), MatrixLayout::ColumnMajor);

        assert_eq!(data, std::array::from_fn(|i| i as f32));
    }

    #[test]
    fn view_is_built_in_mirrored_space() {
        let eye = Vec3::new(1.0, 5.0, 10.0);
        let view = mirrored_view(eye, Vec3::ZERO, Vec3::Y);

        // the mirrored eye lands in the origin of the view space
        let origin = view * Vec4::new(-1.0, 5.0, 10.0, 1.0);
        assert!(origin.truncate().length() < 1e-5);

        assert_eq!(mirror(mirror(eye)), eye);
    }

    #[test]
    fn pushes_both_matrices() {
        let mut engine = ScriptedEngine::default();
        let matrices = ViewMatrices {
            projection: numbered(),
            view: Mat4::IDENTITY,
        };

        push_matrices(&mut engine, &matrices, MatrixLayout::RowMajor).unwrap();

        assert_eq!(engine.projection, Some(numbered().transpose().to_cols_array()));
        assert_eq!(engine.view, Some(Mat4::IDENTITY.to_cols_array()));
    }
}
