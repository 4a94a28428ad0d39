//! This crate streams the tiles of an external tile-layer engine into a Bevy scene.
//!
//! The engine decides which tiles of its quadtree are visible from the camera, samples the
//! elevation and generates the tile images. This crate feeds the engine with the camera
//! matrices each frame and turns the events it reports into tiles that can be rendered.
//!
//! # Tile lifecycle
//! A tile is created when the engine reports that it entered the frustum. Its mesh is
//! requested from the elevation service right away, copied out of the engine and uploaded.
//! Once the engine finished generating the image of the tile, it is attached as the tile's
//! texture. When the tile leaves the frustum, it is evicted together with its mesh and texture.
//! All tiles are kept in the [`TileRegistry`](registry::TileRegistry), which is the only
//! place where tiles are created or removed.
//!
//! # Engines
//! The engine is accessed through the [`TileLayerEngine`](engine::TileLayerEngine) and
//! [`ElevationService`](engine::ElevationService) traits. The native engine is available with
//! the `kcore` feature, while the [`scripted`](engine::scripted) engine replays events from
//! memory and requires no native library.

pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod marshal;
pub mod plugin;
pub mod quadcode;
pub mod registry;
pub mod render;
pub mod transform;

pub use crate::quadcode::Quadcode;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        camera::{FreeCamera, LayerCamera},
        config::TileLayerConfig,
        engine::{
            scripted::{ScriptedElevation, ScriptedEngine},
            ElevationPiece, ElevationService, LayerOrigin, MeshRequest, TileLayerEngine,
        },
        error::{EngineError, LayerError, LayerResult},
        frame::FrameStats,
        marshal::IndexPolicy,
        plugin::{LayerCameraPlugin, LayerTiles, TileLayerPlugin, TileLayerSet},
        transform::MatrixLayout,
        Quadcode,
    };

    #[cfg(feature = "kcore")]
    #[doc(hidden)]
    pub use crate::engine::kcore::{KcoreElevation, KcoreLayer};
}
