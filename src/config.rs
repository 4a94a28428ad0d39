use crate::{
    engine::{ElevationPiece, LayerOrigin, MeshRequest},
    marshal::IndexPolicy,
    transform::MatrixLayout,
};
use anyhow::Context;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The configuration of a tile layer and of its connection to the engine.
#[derive(Clone, Debug, PartialEq, Resource, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLayerConfig {
    pub origin: LayerOrigin,
    /// Generates the tile images from this url, instead of the engine's default source.
    pub source_url: Option<String>,
    /// The elevation pieces registered with the elevation service on startup.
    pub elevation: Vec<ElevationPiece>,
    pub mesh: MeshRequest,
    pub matrix_layout: MatrixLayout,
    pub index_policy: IndexPolicy,
    /// Tints every tile with its own random color.
    pub debug_colors: bool,
    pub color_seed: Option<u64>,
    /// Used for the projection matrix, if there is no primary window.
    pub fallback_aspect_ratio: f32,
}

impl Default for TileLayerConfig {
    fn default() -> Self {
        Self {
            origin: default(),
            source_url: None,
            elevation: Vec::new(),
            mesh: default(),
            matrix_layout: default(),
            index_policy: default(),
            debug_colors: false,
            color_seed: None,
            fallback_aspect_ratio: 1920.0 / 1200.0,
        }
    }
}

impl TileLayerConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read the tile layer config {}", path.display()))?;

        ron::from_str(&text)
            .with_context(|| format!("failed to parse the tile layer config {}", path.display()))
    }

    pub fn with_elevation(mut self, piece: ElevationPiece) -> Self {
        self.elevation.push(piece);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{camera::LayerCamera, engine::ElevationSourceKind, transform::serialize_matrix};

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: TileLayerConfig = ron::from_str(
            r#"(
                elevation: [
                    (location: "assets/elevation/N46E142.hgt"),
                    (location: "https://example.com/N47E142.hgt", kind: Url),
                ],
                mesh: (segments_x: 8),
                matrix_layout: ColumnMajor,
                color_seed: Some(3),
            )"#,
        )
        .unwrap();

        assert_eq!(config.origin, LayerOrigin::default());
        assert_eq!(config.elevation.len(), 2);
        assert_eq!(config.elevation[0].kind, ElevationSourceKind::File);
        assert_eq!(config.elevation[1].kind, ElevationSourceKind::Url);
        assert_eq!(config.mesh.segments_x, 8);
        assert_eq!(config.mesh.segments_y, 16);
        assert_eq!(config.matrix_layout, MatrixLayout::ColumnMajor);
        assert_eq!(config.index_policy, IndexPolicy::Widen);
        assert_eq!(config.color_seed, Some(3));
        assert_eq!(config.fallback_aspect_ratio, 1.6);
    }

    #[test]
    fn bundled_config_parses() {
        let config = TileLayerConfig::load(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/assets/tile_layer.ron"
        ))
        .unwrap();

        assert_eq!(config.elevation.len(), 26);
        assert_eq!(config.source_url, None);
    }

    #[test]
    fn bundled_layout_matches_the_native_engine() {
        let config = TileLayerConfig::load(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/assets/tile_layer.ron"
        ))
        .unwrap();

        let projection = LayerCamera::default().projection_matrix(1.6);
        let data = serialize_matrix(&projection, config.matrix_layout);

        // GL perspective: w' = -z sits in the third column of the fourth row
        assert_eq!(config.matrix_layout, MatrixLayout::ColumnMajor);
        assert_eq!(data[11], -1.0);
        assert_eq!(data[15], 0.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(TileLayerConfig::load("does/not/exist.ron").is_err());
    }
}
