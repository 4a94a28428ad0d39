//! Copies the raw payloads of the engine into owned, render ready data.
//!
//! The engine keeps ownership of its mesh buffers, so they are copied out before the
//! mesh handle is dropped. Image payloads are validated against their declared format
//! and expanded to RGBA, since the GPU has no native 16 or 24 bit color formats.

use crate::{
    engine::{MeshChannel, RawImagePayload, RawMesh},
    error::{LayerError, LayerResult},
};
use bevy::{
    image::Image,
    render::{
        mesh::{Indices, Mesh, PrimitiveTopology},
        render_asset::RenderAssetUsages,
        render_resource::{Extent3d, TextureDimension, TextureFormat},
    },
};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::{mem, slice};

/// How indices that do not fit into 16 bits are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexPolicy {
    /// Keep the 32 bit indices for meshes that can not be narrowed.
    #[default]
    Widen,
    /// Refuse to build meshes that can not be narrowed.
    Reject,
}

/// Copies one channel of an engine mesh into an owned buffer.
///
/// The length is queried before the data pointer and trusted as is.
fn copy_channel<T: Pod>(mesh: &impl RawMesh, channel: MeshChannel) -> LayerResult<Vec<T>> {
    debug_assert_eq!(mem::size_of::<T>(), 4);

    let len = mesh.channel_len(channel);

    if len == 0 {
        return Ok(Vec::new());
    }

    let data = mesh.channel_data(channel);

    if data.is_null() {
        return Err(LayerError::MissingChannel { channel, len });
    }

    let mut values = vec![T::zeroed(); len];

    // SAFETY: `RawMesh` guarantees that `data` is readable for `len` elements of the channel,
    // and the copy goes through bytes, so the source does not have to be aligned.
    let bytes = unsafe { slice::from_raw_parts(data, len * mem::size_of::<T>()) };
    bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(bytes);

    Ok(values)
}

/// Groups the flat values of a channel into vertices.
fn group<const N: usize>(channel: MeshChannel, values: &[f32]) -> LayerResult<Vec<[f32; N]>>
where
    [f32; N]: Pod,
{
    bytemuck::try_cast_slice(values)
        .map(<[[f32; N]]>::to_vec)
        .map_err(|_| LayerError::RaggedChannel {
            channel,
            len: values.len(),
            stride: N,
        })
}

/// Flips the vertical texture axis: every odd component `v` becomes `1.0 - v`.
///
/// This has to be applied exactly once per mesh.
pub fn flip_uvs(uvs: &mut [f32]) {
    for v in uvs.iter_mut().skip(1).step_by(2) {
        *v = 1.0 - *v;
    }
}

/// Narrows the indices to 16 bits, failing on the first index that does not fit.
pub fn narrow_indices(indices: &[u32]) -> LayerResult<Vec<u16>> {
    indices
        .iter()
        .enumerate()
        .map(|(position, &value)| {
            u16::try_from(value).map_err(|_| LayerError::IndexOverflow { position, value })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl TileIndices {
    pub fn len(&self) -> usize {
        match self {
            TileIndices::U16(indices) => indices.len(),
            TileIndices::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The geometry of a tile, copied out of the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct TileMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: TileIndices,
}

impl TileMesh {
    pub fn from_raw(mesh: &impl RawMesh, policy: IndexPolicy) -> LayerResult<Self> {
        let positions = copy_channel::<f32>(mesh, MeshChannel::Positions)?;
        let normals = copy_channel::<f32>(mesh, MeshChannel::Normals)?;
        let mut uvs = copy_channel::<f32>(mesh, MeshChannel::Uvs)?;
        let indices = copy_channel::<u32>(mesh, MeshChannel::Indices)?;

        flip_uvs(&mut uvs);

        let positions = group::<3>(MeshChannel::Positions, &positions)?;
        let normals = group::<3>(MeshChannel::Normals, &normals)?;
        let uvs = group::<2>(MeshChannel::Uvs, &uvs)?;

        for (channel, actual) in [
            (MeshChannel::Normals, normals.len()),
            (MeshChannel::Uvs, uvs.len()),
        ] {
            if actual != positions.len() {
                return Err(LayerError::VertexCountMismatch {
                    channel,
                    expected: positions.len(),
                    actual,
                });
            }
        }

        if indices.len() % MeshChannel::Indices.stride() != 0 {
            return Err(LayerError::RaggedChannel {
                channel: MeshChannel::Indices,
                len: indices.len(),
                stride: MeshChannel::Indices.stride(),
            });
        }

        let indices = match (narrow_indices(&indices), policy) {
            (Ok(narrowed), _) => TileIndices::U16(narrowed),
            (Err(_), IndexPolicy::Widen) => TileIndices::U32(indices),
            (Err(error), IndexPolicy::Reject) => return Err(error),
        };

        Ok(Self {
            positions,
            normals,
            uvs,
            indices,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn into_mesh(self) -> Mesh {
        let indices = match self.indices {
            TileIndices::U16(indices) => Indices::U16(indices),
            TileIndices::U32(indices) => Indices::U32(indices),
        };

        Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::RENDER_WORLD,
        )
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, self.positions)
        .with_inserted_attribute(Mesh::ATTRIBUTE_NORMAL, self.normals)
        .with_inserted_attribute(Mesh::ATTRIBUTE_UV_0, self.uvs)
        .with_inserted_indices(indices)
    }
}

/// The pixel formats the engine generates tile images in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    /// 16 bit RGB (5-6-5), little endian.
    Rgb565,
    /// 24 bit RGB.
    Rgb888,
    /// 32 bit RGBA.
    Rgba8888,
}

impl ImageFormat {
    pub fn from_tag(tag: i32) -> LayerResult<Self> {
        match tag {
            0 => Ok(ImageFormat::Rgb565),
            1 => Ok(ImageFormat::Rgb888),
            2 => Ok(ImageFormat::Rgba8888),
            tag => Err(LayerError::UnknownImageFormat { tag }),
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            ImageFormat::Rgb565 => 0,
            ImageFormat::Rgb888 => 1,
            ImageFormat::Rgba8888 => 2,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ImageFormat::Rgb565 => 2,
            ImageFormat::Rgb888 => 3,
            ImageFormat::Rgba8888 => 4,
        }
    }
}

/// Expands a 5 or 6 bit channel to 8 bits by replicating its high bits.
#[inline]
fn expand_bits(value: u16, bits: u32) -> u8 {
    let value = value as u32;
    ((value << (8 - bits)) | (value >> (2 * bits - 8))) as u8
}

/// A validated tile image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub pixels: Vec<u8>,
}

impl TileImage {
    pub fn decode(payload: RawImagePayload) -> LayerResult<Self> {
        let format = ImageFormat::from_tag(payload.format)?;

        let expected = (payload.width as usize)
            .checked_mul(payload.height as usize)
            .and_then(|count| count.checked_mul(format.bytes_per_pixel()))
            .unwrap_or(usize::MAX);
        let declared = usize::try_from(payload.size).unwrap_or(usize::MAX);

        if declared != expected {
            return Err(LayerError::ImageSizeMismatch {
                expected,
                actual: declared,
            });
        }
        if payload.pixels.len() != expected {
            return Err(LayerError::ImageSizeMismatch {
                expected,
                actual: payload.pixels.len(),
            });
        }

        Ok(Self {
            width: payload.width,
            height: payload.height,
            format,
            pixels: payload.pixels,
        })
    }

    /// Converts the pixels to 8 bit RGBA.
    pub fn to_rgba8(&self) -> Vec<u8> {
        match self.format {
            ImageFormat::Rgb565 => self
                .pixels
                .chunks_exact(2)
                .flat_map(|pixel| {
                    let value = u16::from_le_bytes([pixel[0], pixel[1]]);
                    [
                        expand_bits(value >> 11, 5),
                        expand_bits((value >> 5) & 0x3f, 6),
                        expand_bits(value & 0x1f, 5),
                        u8::MAX,
                    ]
                })
                .collect(),
            // extend alpha channel
            ImageFormat::Rgb888 => self
                .pixels
                .chunks_exact(3)
                .flat_map(|pixel| [pixel[0], pixel[1], pixel[2], u8::MAX])
                .collect(),
            ImageFormat::Rgba8888 => self.pixels.clone(),
        }
    }

    pub fn into_image(self) -> Image {
        let data = match self.format {
            ImageFormat::Rgba8888 => self.pixels,
            _ => self.to_rgba8(),
        };

        Image::new(
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            data,
            TextureFormat::Rgba8UnormSrgb,
            RenderAssetUsages::RENDER_WORLD,
        )
    }
}
