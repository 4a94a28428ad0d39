//! The boundary to the tile-layer engine.
//!
//! The engine decides which tiles are visible, subdivides the quadtree, samples the
//! elevation and generates the tile images. None of this is visible to the layer:
//! it pushes the camera matrices, asks the engine to recompute and then drains the
//! events the engine produced. Meshes are requested on demand from the elevation
//! service and exposed as raw buffers, which are copied out by the
//! [`marshal`](crate::marshal) module.
//!
//! Every call is synchronous. An engine may work asynchronously internally, but
//! it has to block until the requested data is available.

use crate::{error::EngineError, events::EventKind, quadcode::QUADCODE_SIZE, Quadcode};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::{ffi::c_void, fmt, mem, ptr};

#[cfg(feature = "kcore")]
pub mod kcore;
pub mod scripted;

/// The geographic origin of a tile layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerOrigin {
    pub latitude: f32,
    pub longitude: f32,
}

impl Default for LayerOrigin {
    fn default() -> Self {
        Self {
            latitude: 46.9181,
            longitude: 142.7189,
        }
    }
}

/// Where the data of an elevation piece is read from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElevationSourceKind {
    #[default]
    File,
    Url,
}

impl ElevationSourceKind {
    pub fn tag(self) -> i32 {
        match self {
            ElevationSourceKind::File => 0,
            ElevationSourceKind::Url => 1,
        }
    }
}

/// One piece of elevation data (e.g. an SRTM cell) registered with the elevation service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationPiece {
    pub location: String,
    #[serde(default)]
    pub kind: ElevationSourceKind,
}

impl ElevationPiece {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            location: path.into(),
            kind: ElevationSourceKind::File,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            location: url.into(),
            kind: ElevationSourceKind::Url,
        }
    }
}

/// The parameters of a tile mesh request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshRequest {
    pub segments_x: u32,
    pub segments_y: u32,
    pub flip_u: bool,
    pub flip_v: bool,
}

impl Default for MeshRequest {
    fn default() -> Self {
        Self {
            segments_x: 16,
            segments_y: 16,
            flip_u: false,
            flip_v: false,
        }
    }
}

/// The buffers of a mesh produced by the elevation service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeshChannel {
    /// Three `f32` per vertex.
    Positions,
    /// Three `f32` per vertex.
    Normals,
    /// Two `f32` per vertex.
    Uvs,
    /// Three `u32` per triangle.
    Indices,
}

impl MeshChannel {
    /// The count of values that make up one vertex (or one triangle for the indices).
    pub fn stride(self) -> usize {
        match self {
            MeshChannel::Positions | MeshChannel::Normals | MeshChannel::Indices => 3,
            MeshChannel::Uvs => 2,
        }
    }
}

impl fmt::Display for MeshChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MeshChannel::Positions => "position",
            MeshChannel::Normals => "normal",
            MeshChannel::Uvs => "uv",
            MeshChannel::Indices => "index",
        })
    }
}

/// A mesh owned by the engine, whose buffers are exposed as raw memory.
///
/// # Safety
///
/// For every channel, [`channel_data`](RawMesh::channel_data) must either return null or a
/// pointer that is valid for reads of [`channel_len`](RawMesh::channel_len) elements
/// (`f32` for positions, normals and uvs, `u32` for indices) for as long as the mesh is
/// borrowed. The pointer does not have to be aligned.
pub unsafe trait RawMesh {
    /// The count of elements (not vertices) stored in the channel.
    fn channel_len(&self, channel: MeshChannel) -> usize;

    fn channel_data(&self, channel: MeshChannel) -> *const u8;
}

/// A tile event as it is stored in the engine's tile event queue.
#[derive(Clone, Debug)]
pub struct RawTileEvent {
    pub tag: i32,
    pub quadcode: [u8; QUADCODE_SIZE],
    /// The bytes of a [`RawTileSummary`], if the engine attached one.
    pub payload: Option<Vec<u8>>,
}

impl RawTileEvent {
    /// Copies a tile event out of native memory.
    ///
    /// Only in-frustum events carry a summary. The payload pointer of every other tag is
    /// left unread, since the engine may reuse or free it.
    ///
    /// # Safety
    ///
    /// For in-frustum events, `payload` must either be null or point to a [`RawTileSummary`]
    /// that is valid for reads. It does not have to be aligned.
    pub unsafe fn from_native(
        tag: i32,
        quadcode: [u8; QUADCODE_SIZE],
        payload: *const c_void,
    ) -> Self {
        let payload = (tag == EventKind::InFrustum.tag() && !payload.is_null()).then(|| {
            let summary = ptr::read_unaligned(payload.cast::<RawTileSummary>());
            bytemuck::bytes_of(&summary).to_vec()
        });

        Self {
            tag,
            quadcode,
            payload,
        }
    }
}

/// The geometry summary the engine attaches to in-frustum events.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct RawTileSummary {
    pub tilecode: [i32; 3],
    pub center: [f32; 2],
    pub scale: f32,
    pub kind: i32,
    pub visibility: i32,
    pub quadcode: [u8; QUADCODE_SIZE],
}

const _: () = assert!(mem::size_of::<RawTileSummary>() == 64);

/// An image event as it is stored in the engine's image event queue.
#[derive(Clone, Debug)]
pub struct RawImageEvent {
    pub tag: i32,
    pub quadcode: [u8; QUADCODE_SIZE],
    pub payload: Option<RawImagePayload>,
}

#[derive(Clone, Debug)]
pub struct RawImagePayload {
    pub width: u32,
    pub height: u32,
    pub format: i32,
    /// The byte size declared by the engine.
    pub size: u64,
    pub pixels: Vec<u8>,
}

/// A tile layer of the engine, which computes the visible tiles from the camera matrices.
pub trait TileLayerEngine: 'static {
    /// Creates a layer centered at the `origin`.
    /// If a `source_url` is provided, the tile images are generated from it.
    fn create(origin: LayerOrigin, source_url: Option<&str>) -> Result<Self, EngineError>
    where
        Self: Sized;

    /// Sets the projection matrix used by the next [`recompute`](TileLayerEngine::recompute).
    fn push_projection_matrix(&mut self, matrix: &[f32; 16]) -> Result<(), EngineError>;

    /// Sets the view matrix used by the next [`recompute`](TileLayerEngine::recompute).
    fn push_view_matrix(&mut self, matrix: &[f32; 16]) -> Result<(), EngineError>;

    /// Runs the frustum test and the subdivision, which fills both event queues.
    fn recompute(&mut self) -> Result<(), EngineError>;

    /// Takes all pending tile events. The queue is empty afterwards.
    fn drain_tile_events(&mut self) -> Result<Vec<RawTileEvent>, EngineError>;

    /// Takes all pending image events. The queue is empty afterwards.
    fn drain_image_events(&mut self) -> Result<Vec<RawImageEvent>, EngineError>;
}

/// The elevation source of the engine, which generates the tile meshes.
pub trait ElevationService: 'static {
    type Mesh: RawMesh;

    fn create() -> Result<Self, EngineError>
    where
        Self: Sized;

    fn add_piece(&mut self, piece: &ElevationPiece) -> Result<(), EngineError>;

    /// Generates the mesh of a tile. Blocks until the mesh is available.
    fn request_mesh(
        &mut self,
        quadcode: &Quadcode,
        request: &MeshRequest,
    ) -> Result<Self::Mesh, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RawTileSummary {
        RawTileSummary {
            tilecode: [4, 5, 6],
            center: [0.25, -0.5],
            scale: 2.0,
            kind: 2,
            visibility: 1,
            quadcode: Quadcode::from("21").to_raw().unwrap(),
        }
    }

    #[test]
    fn copies_the_summary_of_in_frustum_events() {
        let summary = summary();
        let quadcode = summary.quadcode;

        let event = unsafe {
            RawTileEvent::from_native(
                EventKind::InFrustum.tag(),
                quadcode,
                ptr::from_ref(&summary).cast(),
            )
        };

        assert_eq!(event.payload.as_deref(), Some(bytemuck::bytes_of(&summary)));
    }

    #[test]
    fn ignores_the_payload_of_other_events() {
        let quadcode = Quadcode::from("21").to_raw().unwrap();

        // never dereferenced
        let stale = ptr::dangling::<RawTileSummary>().cast::<c_void>();

        for tag in [EventKind::NotInFrustum.tag(), EventKind::ImageReady.tag(), 7] {
            let event = unsafe { RawTileEvent::from_native(tag, quadcode, stale) };

            assert_eq!(event.tag, tag);
            assert_eq!(event.payload, None);
        }

        let event =
            unsafe { RawTileEvent::from_native(EventKind::InFrustum.tag(), quadcode, ptr::null()) };
        assert_eq!(event.payload, None);
    }
}
