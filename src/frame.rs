//! Runs the engine once per frame and keeps the tile registry in sync with it.
//!
//! Each frame the camera matrices are pushed to the engine, the engine recomputes the
//! visible tiles, and both event queues are drained. Tile events are applied before
//! image events, so that an image can be attached to a tile created in the same frame.
//! Events that can not be applied are dropped one by one, while any failure of the
//! engine itself ends the frame loop.

use crate::{
    camera::LayerCamera,
    config::TileLayerConfig,
    engine::{ElevationService, RawImageEvent, RawTileEvent, TileLayerEngine},
    error::{EngineError, LayerError, LayerResult},
    events::{ImageReady, TileEvent},
    plugin::LayerTiles,
    registry::TileRegistry,
    render::{BevyTileRenderer, TileEntity, TileRenderer},
    transform::{push_matrices, MatrixLayout, ViewMatrices},
};
use bevy::{prelude::*, window::PrimaryWindow};

/// What happened during the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Resource)]
pub struct FrameStats {
    pub in_frustum: u32,
    pub not_in_frustum: u32,
    pub image_events: u32,
    pub created: u32,
    pub evicted: u32,
    pub textured: u32,
    pub dropped: u32,
}

impl FrameStats {
    /// Drops the event, unless the engine failed.
    fn settle(&mut self, result: LayerResult<bool>) -> Result<bool, EngineError> {
        match result {
            Ok(applied) => Ok(applied),
            Err(LayerError::Engine(error)) => Err(error),
            Err(error @ LayerError::IndexOverflow { .. }) => {
                warn!("Dropped a tile, whose mesh was rejected: {error}");
                self.dropped += 1;
                Ok(false)
            }
            Err(error) => {
                debug!("Dropped an event: {error}");
                self.dropped += 1;
                Ok(false)
            }
        }
    }
}

/// Applies the drained events to the registry, tile events first.
pub fn sync_tiles<S, R>(
    registry: &mut TileRegistry<R::Mesh, R::Texture>,
    elevation: &mut S,
    renderer: &mut R,
    tile_events: Vec<RawTileEvent>,
    image_events: Vec<RawImageEvent>,
) -> Result<FrameStats, EngineError>
where
    S: ElevationService,
    R: TileRenderer,
{
    let mut stats = FrameStats::default();

    for raw in tile_events {
        let event = match TileEvent::decode(raw) {
            Ok(event) => event,
            Err(error) => {
                stats.settle(Err(error))?;
                continue;
            }
        };

        match event {
            TileEvent::InFrustum { quadcode, summary } => {
                stats.in_frustum += 1;

                let Some(summary) = summary else {
                    debug!("The in-frustum event of {quadcode} carries no summary.");
                    continue;
                };

                let result = registry.on_in_frustum(elevation, renderer, &quadcode, &summary);

                if stats.settle(result)? {
                    stats.created += 1;
                }
            }
            TileEvent::NotInFrustum { quadcode } => {
                stats.not_in_frustum += 1;

                if registry.on_not_in_frustum(renderer, &quadcode) {
                    stats.evicted += 1;
                }
            }
        }
    }

    for raw in image_events {
        stats.image_events += 1;

        let result = ImageReady::decode(raw).and_then(|event| {
            let applied = registry.on_image_ready(renderer, &event.quadcode, event.payload)?;

            if !applied {
                debug!("Ignored the image of {}, which is not registered.", event.quadcode);
            }

            Ok(applied)
        });

        if stats.settle(result)? {
            stats.textured += 1;
        }
    }

    Ok(stats)
}

/// Pushes the matrices, recomputes the layer and applies all events it produced.
pub fn run_frame<E, S, R>(
    engine: &mut E,
    elevation: &mut S,
    registry: &mut TileRegistry<R::Mesh, R::Texture>,
    renderer: &mut R,
    matrices: &ViewMatrices,
    layout: MatrixLayout,
) -> Result<FrameStats, EngineError>
where
    E: TileLayerEngine,
    S: ElevationService,
    R: TileRenderer,
{
    push_matrices(engine, matrices, layout)?;
    engine.recompute()?;

    let tile_events = engine.drain_tile_events()?;
    let image_events = engine.drain_image_events()?;

    sync_tiles(registry, elevation, renderer, tile_events, image_events)
}

/// Creates the layer and the elevation service and registers all elevation pieces.
pub fn connect<E, S>(config: &TileLayerConfig) -> Result<(E, S), EngineError>
where
    E: TileLayerEngine,
    S: ElevationService,
{
    let engine = E::create(config.origin, config.source_url.as_deref())?;

    info!(
        "Connected the tile layer at {}, {}.",
        config.origin.latitude, config.origin.longitude
    );

    let mut elevation = S::create()?;

    for piece in &config.elevation {
        elevation.add_piece(piece)?;
    }

    info!("Registered {} elevation pieces.", config.elevation.len());

    Ok((engine, elevation))
}

pub fn connect_layer<E: TileLayerEngine, S: ElevationService>(world: &mut World) {
    let config = world.resource::<TileLayerConfig>().clone();

    match connect::<E, S>(&config) {
        Ok((engine, elevation)) => {
            world.insert_non_send_resource(engine);
            world.insert_non_send_resource(elevation);
        }
        Err(error) => {
            error!("Failed to connect the tile layer: {error}");
            world.send_event(AppExit::error());
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn update_tile_layer<E: TileLayerEngine, S: ElevationService>(
    engine: Option<NonSendMut<E>>,
    elevation: Option<NonSendMut<S>>,
    config: Res<TileLayerConfig>,
    cameras: Query<(&LayerCamera, &Transform), Without<TileEntity>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut tiles: ResMut<LayerTiles>,
    mut stats: ResMut<FrameStats>,
    mut renderer: BevyTileRenderer,
    mut exit: EventWriter<AppExit>,
) {
    let (Some(mut engine), Some(mut elevation)) = (engine, elevation) else {
        return;
    };
    let Ok((camera, transform)) = cameras.get_single() else {
        return;
    };

    let aspect_ratio = windows
        .get_single()
        .ok()
        .filter(|window| window.height() > 0.0)
        .map_or(config.fallback_aspect_ratio, |window| {
            window.width() / window.height()
        });

    let matrices = camera.matrices(transform, aspect_ratio);

    match run_frame(
        &mut *engine,
        &mut *elevation,
        &mut *tiles,
        &mut renderer,
        &matrices,
        config.matrix_layout,
    ) {
        Ok(frame) => {
            trace!("Tile layer frame: {frame:?}, {} tiles", tiles.len());
            *stats = frame;
        }
        Err(error) => {
            error!("The tile layer engine failed: {error}");
            exit.send(AppExit::error());
        }
    }
}

pub fn draw_tiles(
    tiles: Res<LayerTiles>,
    config: Res<TileLayerConfig>,
    mut renderer: BevyTileRenderer,
) {
    tiles.draw(&mut renderer, config.debug_colors);
}
