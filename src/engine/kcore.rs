//! The binding to the native tile-layer engine (`libkcore`).
//!
//! The library does not offer a way to destroy layers, elevation sources or meshes,
//! so the handles are never freed. Event queues are copied out completely while they are
//! drained, since the library reuses their storage during the next calculation.

use crate::{
    engine::{
        ElevationPiece, ElevationService, LayerOrigin, MeshChannel, MeshRequest, RawImageEvent,
        RawImagePayload, RawMesh, RawTileEvent, TileLayerEngine,
    },
    error::EngineError,
    quadcode::QUADCODE_SIZE,
    Quadcode,
};
use std::{
    ffi::{c_char, c_float, c_int, c_uint, c_void, CString},
    mem, ptr, slice,
};

#[repr(C)]
#[derive(Clone, Copy)]
struct LayerEvent {
    tag: c_int,
    quadcode: [u8; QUADCODE_SIZE],
    payload: *const c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ImagePayload {
    width: u32,
    height: u32,
    format: c_int,
    size: u64,
    data: *const u8,
}

const _: () = assert!(mem::size_of::<LayerEvent>() == 48);
const _: () = assert!(mem::size_of::<ImagePayload>() == 32);

#[link(name = "kcore")]
extern "C" {
    fn CreateTileLayer(latitude: c_float, longitude: c_float) -> *mut c_void;
    fn CreateTileLayerWithURL(
        latitude: c_float,
        longitude: c_float,
        url: *const c_char,
    ) -> *mut c_void;
    fn UpdateProjectionMatrix(layer: *mut c_void, matrix: *const c_float, transpose: bool);
    fn UpdateViewMatrix(layer: *mut c_void, matrix: *const c_float, transpose: bool);
    fn Calculate(layer: *mut c_void);
    fn GetCoreEventsVector(layer: *mut c_void) -> *mut c_void;
    fn GetImageEventsVector(layer: *mut c_void) -> *mut c_void;
    fn EjectEventsFromVector(vector: *mut c_void, length: *mut c_int) -> *const LayerEvent;

    fn CreateSRTMElevationSource() -> *mut c_void;
    fn AddSRTMPiece(elevation: *mut c_void, path: *const c_char, kind: c_int) -> *mut c_void;

    fn CreateTileMeshQuadcode(
        elevation: *mut c_void,
        quadcode: *const c_char,
        segments_x: c_uint,
        segments_y: c_uint,
        flip_u: bool,
        flip_v: bool,
    ) -> *mut c_void;
    fn GetMeshVertices(mesh: *mut c_void, length: *mut c_int) -> *const c_float;
    fn GetMeshNormals(mesh: *mut c_void, length: *mut c_int) -> *const c_float;
    fn GetMeshUVs(mesh: *mut c_void, length: *mut c_int) -> *const c_float;
    fn GetMeshIndices(mesh: *mut c_void, length: *mut c_int) -> *const c_uint;
}

fn c_string(value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::InvalidString(value.to_string()))
}

fn non_null(handle: *mut c_void, name: &'static str) -> Result<*mut c_void, EngineError> {
    if handle.is_null() {
        Err(EngineError::NullHandle(name))
    } else {
        Ok(handle)
    }
}

/// Takes all events of one of the layer's event vectors.
///
/// # Safety
///
/// `vector` has to be an event vector of a live layer.
unsafe fn eject_events(vector: *mut c_void) -> Result<Vec<LayerEvent>, EngineError> {
    let vector = non_null(vector, "event vector")?;

    let mut length: c_int = 0;
    let events = EjectEventsFromVector(vector, &mut length);

    if events.is_null() || length <= 0 {
        return Ok(Vec::new());
    }

    Ok(slice::from_raw_parts(events, length as usize).to_vec())
}

/// A tile layer of the native engine.
pub struct KcoreLayer {
    handle: *mut c_void,
}

impl TileLayerEngine for KcoreLayer {
    fn create(origin: LayerOrigin, source_url: Option<&str>) -> Result<Self, EngineError> {
        let handle = match source_url {
            None => unsafe { CreateTileLayer(origin.latitude, origin.longitude) },
            Some(url) => {
                let url = c_string(url)?;
                unsafe { CreateTileLayerWithURL(origin.latitude, origin.longitude, url.as_ptr()) }
            }
        };

        Ok(Self {
            handle: non_null(handle, "layer")?,
        })
    }

    fn push_projection_matrix(&mut self, matrix: &[f32; 16]) -> Result<(), EngineError> {
        unsafe { UpdateProjectionMatrix(self.handle, matrix.as_ptr(), false) };
        Ok(())
    }

    fn push_view_matrix(&mut self, matrix: &[f32; 16]) -> Result<(), EngineError> {
        unsafe { UpdateViewMatrix(self.handle, matrix.as_ptr(), false) };
        Ok(())
    }

    fn recompute(&mut self) -> Result<(), EngineError> {
        unsafe { Calculate(self.handle) };
        Ok(())
    }

    fn drain_tile_events(&mut self) -> Result<Vec<RawTileEvent>, EngineError> {
        let events = unsafe { eject_events(GetCoreEventsVector(self.handle))? };

        Ok(events
            .into_iter()
            // SAFETY: in-frustum payloads point to a tile summary owned by the layer
            .map(|event| unsafe {
                RawTileEvent::from_native(event.tag, event.quadcode, event.payload)
            })
            .collect())
    }

    fn drain_image_events(&mut self) -> Result<Vec<RawImageEvent>, EngineError> {
        let events = unsafe { eject_events(GetImageEventsVector(self.handle))? };

        Ok(events
            .into_iter()
            .map(|event| {
                let payload = (!event.payload.is_null()).then(|| {
                    // SAFETY: image payloads point to an image owned by the layer, whose pixels
                    // hold `size` bytes
                    unsafe {
                        let image = ptr::read_unaligned(event.payload.cast::<ImagePayload>());
                        let pixels = if image.data.is_null() {
                            Vec::new()
                        } else {
                            slice::from_raw_parts(image.data, image.size as usize).to_vec()
                        };

                        RawImagePayload {
                            width: image.width,
                            height: image.height,
                            format: image.format,
                            size: image.size,
                            pixels,
                        }
                    }
                });

                RawImageEvent {
                    tag: event.tag,
                    quadcode: event.quadcode,
                    payload,
                }
            })
            .collect())
    }
}

/// The SRTM elevation source of the native engine.
pub struct KcoreElevation {
    handle: *mut c_void,
}

impl ElevationService for KcoreElevation {
    type Mesh = KcoreMesh;

    fn create() -> Result<Self, EngineError> {
        let handle = unsafe { CreateSRTMElevationSource() };

        Ok(Self {
            handle: non_null(handle, "elevation source")?,
        })
    }

    fn add_piece(&mut self, piece: &ElevationPiece) -> Result<(), EngineError> {
        let location = c_string(&piece.location)?;
        unsafe { AddSRTMPiece(self.handle, location.as_ptr(), piece.kind.tag()) };
        Ok(())
    }

    fn request_mesh(
        &mut self,
        quadcode: &Quadcode,
        request: &MeshRequest,
    ) -> Result<KcoreMesh, EngineError> {
        let quadcode = c_string(quadcode.as_str())?;

        let handle = unsafe {
            CreateTileMeshQuadcode(
                self.handle,
                quadcode.as_ptr(),
                request.segments_x,
                request.segments_y,
                request.flip_u,
                request.flip_v,
            )
        };

        Ok(KcoreMesh {
            handle: non_null(handle, "mesh")?,
        })
    }
}

pub struct KcoreMesh {
    handle: *mut c_void,
}

impl KcoreMesh {
    fn query(&self, channel: MeshChannel) -> (*const u8, usize) {
        let mut length: c_int = 0;

        let data = unsafe {
            match channel {
                MeshChannel::Positions => GetMeshVertices(self.handle, &mut length).cast(),
                MeshChannel::Normals => GetMeshNormals(self.handle, &mut length).cast(),
                MeshChannel::Uvs => GetMeshUVs(self.handle, &mut length).cast(),
                MeshChannel::Indices => GetMeshIndices(self.handle, &mut length).cast(),
            }
        };

        (data, length.max(0) as usize)
    }
}

// SAFETY: the mesh buffers are owned by the mesh handle, which is never freed.
unsafe impl RawMesh for KcoreMesh {
    fn channel_len(&self, channel: MeshChannel) -> usize {
        self.query(channel).1
    }

    fn channel_data(&self, channel: MeshChannel) -> *const u8 {
        self.query(channel).0
    }
}
