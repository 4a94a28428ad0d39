use crate::error::{LayerError, LayerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The size of the fixed, nul padded buffer the engine stores quadcodes in.
pub const QUADCODE_SIZE: usize = 32;

/// The identifier of a tile inside the engine's quadtree.
///
/// This is opaque to the layer: it is compared and hashed, but never parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quadcode(String);

impl Quadcode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Decodes a quadcode from the engine's nul padded buffer.
    pub fn from_raw(raw: &[u8; QUADCODE_SIZE]) -> LayerResult<Self> {
        let len = raw.iter().position(|&byte| byte == 0).unwrap_or(QUADCODE_SIZE);

        std::str::from_utf8(&raw[..len])
            .map(Self::new)
            .map_err(|_| LayerError::InvalidQuadcode)
    }

    /// Encodes the quadcode into the engine's buffer layout.
    /// One byte is reserved for the terminating nul.
    pub fn to_raw(&self) -> LayerResult<[u8; QUADCODE_SIZE]> {
        let bytes = self.0.as_bytes();

        if bytes.len() >= QUADCODE_SIZE || bytes.contains(&0) {
            return Err(LayerError::QuadcodeTooLong(self.0.clone()));
        }

        let mut raw = [0; QUADCODE_SIZE];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Quadcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Quadcode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for Quadcode {
    fn from(code: String) -> Self {
        Self(code)
    }
}
