//! Decodes the raw events drained from the engine.
//!
//! The engine reports tile visibility and image generation in two separate queues.
//! Each raw event carries a numeric tag, the quadcode of its tile and an optional payload,
//! whose layout depends on the tag. Decoding moves the payload into the matching variant,
//! so that its presence no longer has to be checked by the [`TileRegistry`](crate::registry::TileRegistry).

use crate::{
    engine::{RawImageEvent, RawImagePayload, RawTileEvent, RawTileSummary},
    error::{LayerError, LayerResult},
    Quadcode,
};
use bevy::math::Vec2;
use std::fmt;

/// The two event queues of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventQueue {
    Tile,
    Image,
}

impl fmt::Display for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventQueue::Tile => "tile",
            EventQueue::Image => "image",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    InFrustum,
    NotInFrustum,
    ImageReady,
}

impl EventKind {
    pub fn from_tag(queue: EventQueue, tag: i32) -> LayerResult<Self> {
        match tag {
            0 => Ok(EventKind::InFrustum),
            1 => Ok(EventKind::NotInFrustum),
            2 => Ok(EventKind::ImageReady),
            tag => Err(LayerError::UnknownEventTag { queue, tag }),
        }
    }

    pub fn tag(self) -> i32 {
        match self {
            EventKind::InFrustum => 0,
            EventKind::NotInFrustum => 1,
            EventKind::ImageReady => 2,
        }
    }
}

/// The position of a tile inside the quadtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileKind {
    Root,
    Separated,
    Leaf,
    Unknown(i32),
}

impl TileKind {
    fn from_tag(tag: i32) -> Self {
        match tag {
            0 => TileKind::Root,
            1 => TileKind::Separated,
            2 => TileKind::Leaf,
            tag => TileKind::Unknown(tag),
        }
    }
}

/// Whether the engine considers the tile to be shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileVisibility {
    Hide,
    Visible,
    Unknown(i32),
}

impl TileVisibility {
    fn from_tag(tag: i32) -> Self {
        match tag {
            0 => TileVisibility::Hide,
            1 => TileVisibility::Visible,
            tag => TileVisibility::Unknown(tag),
        }
    }
}

/// The geometry summary of a tile that entered the frustum.
#[derive(Clone, Debug, PartialEq)]
pub struct TileSummary {
    pub tilecode: [i32; 3],
    /// The center of the tile in layer space.
    pub center: Vec2,
    pub scale: f32,
    pub kind: TileKind,
    pub visibility: TileVisibility,
    pub quadcode: Quadcode,
}

impl TileSummary {
    /// Decodes the summary, returning `None` for payloads that do not hold a valid summary.
    ///
    /// Unknown kind and visibility tags are kept, since the tile only needs its center and scale.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let raw = bytemuck::try_pod_read_unaligned::<RawTileSummary>(bytes).ok()?;

        Some(Self {
            tilecode: raw.tilecode,
            center: Vec2::from_array(raw.center),
            scale: raw.scale,
            kind: TileKind::from_tag(raw.kind),
            visibility: TileVisibility::from_tag(raw.visibility),
            quadcode: Quadcode::from_raw(&raw.quadcode).ok()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TileEvent {
    /// The tile entered the frustum. Without a summary the tile can not be created.
    InFrustum {
        quadcode: Quadcode,
        summary: Option<TileSummary>,
    },
    /// The tile left the frustum.
    NotInFrustum { quadcode: Quadcode },
}

impl TileEvent {
    pub fn decode(raw: RawTileEvent) -> LayerResult<Self> {
        let kind = EventKind::from_tag(EventQueue::Tile, raw.tag)?;
        let quadcode = Quadcode::from_raw(&raw.quadcode)?;

        match kind {
            EventKind::InFrustum => Ok(TileEvent::InFrustum {
                quadcode,
                summary: raw.payload.as_deref().and_then(TileSummary::decode),
            }),
            EventKind::NotInFrustum => Ok(TileEvent::NotInFrustum { quadcode }),
            EventKind::ImageReady => Err(LayerError::UnknownEventTag {
                queue: EventQueue::Tile,
                tag: raw.tag,
            }),
        }
    }

    pub fn quadcode(&self) -> &Quadcode {
        match self {
            TileEvent::InFrustum { quadcode, .. } | TileEvent::NotInFrustum { quadcode } => {
                quadcode
            }
        }
    }
}

/// The image of a tile finished generating.
#[derive(Clone, Debug)]
pub struct ImageReady {
    pub quadcode: Quadcode,
    pub payload: RawImagePayload,
}

impl ImageReady {
    pub fn decode(raw: RawImageEvent) -> LayerResult<Self> {
        let kind = EventKind::from_tag(EventQueue::Image, raw.tag)?;

        if kind != EventKind::ImageReady {
            return Err(LayerError::UnknownEventTag {
                queue: EventQueue::Image,
                tag: raw.tag,
            });
        }

        let quadcode = Quadcode::from_raw(&raw.quadcode)?;

        match raw.payload {
            Some(payload) => Ok(Self { quadcode, payload }),
            None => Err(LayerError::MissingImagePayload { quadcode }),
        }
    }
}
