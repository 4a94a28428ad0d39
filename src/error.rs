use crate::{engine::MeshChannel, events::EventQueue, Quadcode};
use thiserror::Error;

/// A failure reported across the engine boundary.
///
/// These are never recovered from, the frame loop is terminated instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("the engine returned a null {0} handle")]
    NullHandle(&'static str),
    #[error("the string {0:?} can not be passed to the engine")]
    InvalidString(String),
    #[error("engine call failed: {0}")]
    Call(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("unknown event tag {tag} in the {queue} event queue")]
    UnknownEventTag { queue: EventQueue, tag: i32 },
    #[error("the quadcode is not valid utf-8")]
    InvalidQuadcode,
    #[error("the quadcode {0:?} does not fit into the engine's quadcode buffer")]
    QuadcodeTooLong(String),
    #[error("the image event for {quadcode} carries no payload")]
    MissingImagePayload { quadcode: Quadcode },
    #[error("unknown image format {tag}")]
    UnknownImageFormat { tag: i32 },
    #[error("the image payload holds {actual} bytes, but {expected} were declared")]
    ImageSizeMismatch { expected: usize, actual: usize },
    #[error("the {channel} channel declares {len} values, but has no data")]
    MissingChannel { channel: MeshChannel, len: usize },
    #[error("the {channel} channel holds {len} values, which is not a multiple of {stride}")]
    RaggedChannel {
        channel: MeshChannel,
        len: usize,
        stride: usize,
    },
    #[error("the {channel} channel holds {actual} vertices, but the positions hold {expected}")]
    VertexCountMismatch {
        channel: MeshChannel,
        expected: usize,
        actual: usize,
    },
    #[error("index {value} at position {position} does not fit into 16 bits")]
    IndexOverflow { position: usize, value: u32 },
    #[error("engine fault")]
    Engine(#[from] EngineError),
}

pub type LayerResult<T> = Result<T, LayerError>;
