use crate::{
    camera::free_camera_control,
    config::TileLayerConfig,
    engine::{ElevationService, TileLayerEngine},
    frame::{connect_layer, draw_tiles, update_tile_layer, FrameStats},
    registry::TileRegistry,
    render::TileModel,
};
use bevy::prelude::*;
use std::marker::PhantomData;

/// The tiles as they are rendered by the [`BevyTileRenderer`](crate::render::BevyTileRenderer).
pub type LayerTiles = TileRegistry<TileModel, Handle<Image>>;

/// Updates the tile layer and draws its tiles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, SystemSet)]
pub struct TileLayerSet;

/// Streams the tiles of a tile-layer engine into the scene.
///
/// The engine `E` and its elevation service `S` are created on startup and stored as non-send
/// resources, so all engine calls happen on the main thread.
pub struct TileLayerPlugin<E, S> {
    pub config: TileLayerConfig,
    marker: PhantomData<fn() -> (E, S)>,
}

impl<E, S> TileLayerPlugin<E, S> {
    pub fn new(config: TileLayerConfig) -> Self {
        Self {
            config,
            marker: PhantomData,
        }
    }
}

impl<E: TileLayerEngine, S: ElevationService> Plugin for TileLayerPlugin<E, S> {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.config.clone())
            .insert_resource(LayerTiles::from_config(&self.config))
            .init_resource::<FrameStats>()
            .add_systems(Startup, connect_layer::<E, S>)
            .add_systems(
                Update,
                (update_tile_layer::<E, S>, draw_tiles)
                    .chain()
                    .in_set(TileLayerSet),
            );
    }
}

/// Moves the [`FreeCamera`](crate::camera::FreeCamera) with the keyboard and the mouse.
pub struct LayerCameraPlugin;

impl Plugin for LayerCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, free_camera_control.before(TileLayerSet));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::LayerCamera,
        engine::{
            scripted::{ScriptedElevation, ScriptedEngine},
            ElevationPiece,
        },
        render::TileEntity,
    };
    use bevy::asset::AssetPlugin;

    fn app() -> App {
        let config = TileLayerConfig {
            color_seed: Some(1),
            ..default()
        }
        .with_elevation(ElevationPiece::file("assets/elevation/N46E142.hgt"));

        let mut app = App::new();
        app.add_plugins((MinimalPlugins, AssetPlugin::default()))
            .init_asset::<Mesh>()
            .init_asset::<Image>()
            .init_asset::<StandardMaterial>()
            .add_plugins(TileLayerPlugin::<ScriptedEngine, ScriptedElevation>::new(
                config,
            ));

        app.update();
        app
    }

    fn engine(app: &mut App) -> Mut<ScriptedEngine> {
        app.world_mut().non_send_resource_mut::<ScriptedEngine>()
    }

    fn tile_entities(app: &mut App) -> Vec<(Entity, Visibility)> {
        app.world_mut()
            .query_filtered::<(Entity, &Visibility), With<TileEntity>>()
            .iter(app.world())
            .map(|(entity, visibility)| (entity, *visibility))
            .collect()
    }

    #[test]
    fn connects_on_startup() {
        let mut app = app();

        let elevation = app.world().non_send_resource::<ScriptedElevation>();
        assert_eq!(elevation.pieces.len(), 1);

        // nothing happens without a layer camera
        assert_eq!(engine(&mut app).recompute_count, 0);
    }

    #[test]
    fn streams_tiles_into_the_scene() {
        let mut app = app();
        app.world_mut()
            .spawn((LayerCamera::default(), Transform::from_xyz(1.0, 5.0, 10.0)));

        engine(&mut app).tile_entered("0123", [1.0, 2.0], 0.5).unwrap();
        engine(&mut app).image_ready("0123", 4, 4, [0, 255, 0, 255]).unwrap();
        app.update();

        assert!(engine(&mut app).projection.is_some());
        assert_eq!(app.world().resource::<LayerTiles>().len(), 1);
        assert_eq!(app.world().resource::<FrameStats>().created, 1);

        let entities = tile_entities(&mut app);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].1, Visibility::Visible);

        let tiles = app.world().resource::<LayerTiles>();
        let tile = tiles.get(&"0123".into()).unwrap();
        let texture = tile.texture.clone();
        let material = app
            .world()
            .resource::<Assets<StandardMaterial>>()
            .get(&tile.mesh.material)
            .unwrap();
        assert_eq!(material.base_color_texture, texture);
        assert!(material.unlit);

        let transform = app.world().get::<Transform>(entities[0].0).unwrap();
        assert_eq!(transform.translation, Vec3::new(-1.0, 0.0, 2.0));

        engine(&mut app).tile_left("0123").unwrap();
        app.update();

        assert!(app.world().resource::<LayerTiles>().is_empty());
        assert!(tile_entities(&mut app).is_empty());
        assert_eq!(app.world().resource::<Assets<Mesh>>().len(), 0);
        assert_eq!(app.world().resource::<Assets<Image>>().len(), 0);
    }

    #[test]
    fn engine_failures_exit_the_app() {
        let mut app = app();
        app.world_mut()
            .spawn((LayerCamera::default(), Transform::default()));

        engine(&mut app).fail_next_recompute();
        app.update();

        let exits: Vec<AppExit> = app
            .world_mut()
            .resource_mut::<Events<AppExit>>()
            .drain()
            .collect();
        assert!(exits.iter().any(AppExit::is_error));
    }
}
