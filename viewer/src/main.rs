use bevy::{prelude::*, window::WindowResolution};
use bevy_tile_layer::prelude::*;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tile_viewer", author, version, about)]
pub struct Cli {
    #[arg(default_value = "assets/tile_layer.ron")]
    pub config: PathBuf,
    /// Tint every tile with its own color.
    #[arg(short, long, default_value_t = false)]
    pub debug_colors: bool,
}

fn setup(mut commands: Commands) {
    let camera = LayerCamera::default();

    commands.spawn((
        Name::new("Layer Camera"),
        Camera3d::default(),
        camera.projection(),
        Msaa::Sample4,
        Transform::from_xyz(1.0, 5.0, 10.0).looking_at(Vec3::ZERO, Vec3::Y),
        camera,
        FreeCamera::default(),
    ));
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let mut config = TileLayerConfig::load(&args.config)?;
    config.debug_colors |= args.debug_colors;

    let exit = App::new()
        .insert_resource(ClearColor(Color::BLACK))
        .add_plugins((
            DefaultPlugins.set(WindowPlugin {
                primary_window: Some(Window {
                    title: "Tile Layer Viewer".into(),
                    resolution: WindowResolution::new(1920.0, 1200.0),
                    ..default()
                }),
                ..default()
            }),
            TileLayerPlugin::<KcoreLayer, KcoreElevation>::new(config),
            LayerCameraPlugin,
        ))
        .add_systems(Startup, setup)
        .run();

    if exit.is_error() {
        anyhow::bail!("the tile layer viewer exited with an error");
    }

    Ok(())
}
