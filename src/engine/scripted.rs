//! An in-memory engine, which replays scripted events instead of computing them.
//!
//! Scripted events are held back until the next [`recompute`](TileLayerEngine::recompute),
//! just like the native engine only fills its queues while recomputing.

use crate::{
    engine::{
        ElevationPiece, ElevationService, LayerOrigin, MeshChannel, MeshRequest, RawImageEvent,
        RawImagePayload, RawMesh, RawTileEvent, RawTileSummary, TileLayerEngine,
    },
    error::{EngineError, LayerResult},
    events::EventKind,
    marshal::ImageFormat,
    Quadcode,
};
use bevy::utils::HashMap;
use std::mem;

#[derive(Default)]
pub struct ScriptedEngine {
    pub origin: LayerOrigin,
    pub source_url: Option<String>,
    /// The last projection matrix pushed to the engine.
    pub projection: Option<[f32; 16]>,
    /// The last view matrix pushed to the engine.
    pub view: Option<[f32; 16]>,
    pub recompute_count: u32,
    pending_tile_events: Vec<RawTileEvent>,
    pending_image_events: Vec<RawImageEvent>,
    tile_events: Vec<RawTileEvent>,
    image_events: Vec<RawImageEvent>,
    fail_next_recompute: bool,
}

impl ScriptedEngine {
    pub fn script_tile_event(&mut self, event: RawTileEvent) {
        self.pending_tile_events.push(event);
    }

    pub fn script_image_event(&mut self, event: RawImageEvent) {
        self.pending_image_events.push(event);
    }

    /// Scripts an in-frustum event with a geometry summary.
    pub fn tile_entered(&mut self, quadcode: &str, center: [f32; 2], scale: f32) -> LayerResult<()> {
        let quadcode = Quadcode::from(quadcode).to_raw()?;

        let summary = RawTileSummary {
            tilecode: [0; 3],
            center,
            scale,
            kind: 2,
            visibility: 1,
            quadcode,
        };

        self.script_tile_event(RawTileEvent {
            tag: EventKind::InFrustum.tag(),
            quadcode,
            payload: Some(bytemuck::bytes_of(&summary).to_vec()),
        });
        Ok(())
    }

    pub fn tile_left(&mut self, quadcode: &str) -> LayerResult<()> {
        self.script_tile_event(RawTileEvent {
            tag: EventKind::NotInFrustum.tag(),
            quadcode: Quadcode::from(quadcode).to_raw()?,
            payload: None,
        });
        Ok(())
    }

    /// Scripts an image-ready event carrying a 32 bit RGBA image of a single color.
    pub fn image_ready(
        &mut self,
        quadcode: &str,
        width: u32,
        height: u32,
        color: [u8; 4],
    ) -> LayerResult<()> {
        let pixels = color.repeat((width * height) as usize);

        self.script_image_event(RawImageEvent {
            tag: EventKind::ImageReady.tag(),
            quadcode: Quadcode::from(quadcode).to_raw()?,
            payload: Some(RawImagePayload {
                width,
                height,
                format: ImageFormat::Rgba8888.tag(),
                size: pixels.len() as u64,
                pixels,
            }),
        });
        Ok(())
    }

    /// Makes the next recomputation fail, like a crashed engine would.
    pub fn fail_next_recompute(&mut self) {
        self.fail_next_recompute = true;
    }
}

impl TileLayerEngine for ScriptedEngine {
    fn create(origin: LayerOrigin, source_url: Option<&str>) -> Result<Self, EngineError> {
        Ok(Self {
            origin,
            source_url: source_url.map(str::to_string),
            ..Default::default()
        })
    }

    fn push_projection_matrix(&mut self, matrix: &[f32; 16]) -> Result<(), EngineError> {
        self.projection = Some(*matrix);
        Ok(())
    }

    fn push_view_matrix(&mut self, matrix: &[f32; 16]) -> Result<(), EngineError> {
        self.view = Some(*matrix);
        Ok(())
    }

    fn recompute(&mut self) -> Result<(), EngineError> {
        if mem::take(&mut self.fail_next_recompute) {
            return Err(EngineError::Call("scripted recompute failure".into()));
        }

        self.recompute_count += 1;
        self.tile_events.append(&mut self.pending_tile_events);
        self.image_events.append(&mut self.pending_image_events);
        Ok(())
    }

    fn drain_tile_events(&mut self) -> Result<Vec<RawTileEvent>, EngineError> {
        Ok(mem::take(&mut self.tile_events))
    }

    fn drain_image_events(&mut self) -> Result<Vec<RawImageEvent>, EngineError> {
        Ok(mem::take(&mut self.image_events))
    }
}

/// A mesh held in memory. The buffers are laid out like the native engine lays them out.
#[derive(Clone, Debug, Default)]
pub struct ScriptedMesh {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

impl ScriptedMesh {
    /// A flat grid in the unit square, as the engine generates it for a tile without elevation.
    pub fn grid(segments_x: u32, segments_y: u32) -> Self {
        let mut mesh = Self::default();

        for y in 0..=segments_y {
            for x in 0..=segments_x {
                let u = x as f32 / segments_x as f32;
                let v = y as f32 / segments_y as f32;

                mesh.positions.extend([u - 0.5, 0.0, v - 0.5]);
                mesh.normals.extend([0.0, 1.0, 0.0]);
                mesh.uvs.extend([u, v]);
            }
        }

        let row = segments_x + 1;

        for y in 0..segments_y {
            for x in 0..segments_x {
                let i = y * row + x;
                mesh.indices.extend([i, i + row, i + 1, i + 1, i + row, i + row + 1]);
            }
        }

        mesh
    }
}

// SAFETY: the pointers point into the owned vectors, which live as long as the mesh.
unsafe impl RawMesh for ScriptedMesh {
    fn channel_len(&self, channel: MeshChannel) -> usize {
        match channel {
            MeshChannel::Positions => self.positions.len(),
            MeshChannel::Normals => self.normals.len(),
            MeshChannel::Uvs => self.uvs.len(),
            MeshChannel::Indices => self.indices.len(),
        }
    }

    fn channel_data(&self, channel: MeshChannel) -> *const u8 {
        match channel {
            MeshChannel::Positions => self.positions.as_ptr().cast(),
            MeshChannel::Normals => self.normals.as_ptr().cast(),
            MeshChannel::Uvs => self.uvs.as_ptr().cast(),
            MeshChannel::Indices => self.indices.as_ptr().cast(),
        }
    }
}

/// An elevation service that hands out grids, or scripted meshes for specific tiles.
#[derive(Default)]
pub struct ScriptedElevation {
    pub pieces: Vec<ElevationPiece>,
    pub requests: Vec<(Quadcode, MeshRequest)>,
    meshes: HashMap<Quadcode, ScriptedMesh>,
}

impl ScriptedElevation {
    pub fn insert_mesh(&mut self, quadcode: impl Into<Quadcode>, mesh: ScriptedMesh) {
        self.meshes.insert(quadcode.into(), mesh);
    }
}

impl ElevationService for ScriptedElevation {
    type Mesh = ScriptedMesh;

    fn create() -> Result<Self, EngineError> {
        Ok(Self::default())
    }

    fn add_piece(&mut self, piece: &ElevationPiece) -> Result<(), EngineError> {
        self.pieces.push(piece.clone());
        Ok(())
    }

    fn request_mesh(
        &mut self,
        quadcode: &Quadcode,
        request: &MeshRequest,
    ) -> Result<ScriptedMesh, EngineError> {
        self.requests.push((quadcode.clone(), *request));

        Ok(self
            .meshes
            .get(quadcode)
            .cloned()
            .unwrap_or_else(|| ScriptedMesh::grid(request.segments_x, request.segments_y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_surface_after_recompute() {
        let mut engine = ScriptedEngine::default();
        engine.tile_entered("0123", [1.0, 2.0], 0.5).unwrap();

        assert!(engine.drain_tile_events().unwrap().is_empty());

        engine.recompute().unwrap();
        assert_eq!(engine.drain_tile_events().unwrap().len(), 1);
        assert!(engine.drain_tile_events().unwrap().is_empty());
    }

    #[test]
    fn grid_layout() {
        let mesh = ScriptedMesh::grid(2, 3);

        assert_eq!(mesh.positions.len(), 3 * 4 * 3);
        assert_eq!(mesh.uvs.len(), 3 * 4 * 2);
        assert_eq!(mesh.indices.len(), 2 * 3 * 6);
        assert!(mesh.indices.iter().all(|&i| i < 12));
    }
}
