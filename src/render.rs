//! The render backend the tile registry uploads to and draws with.
//!
//! The registry only deals in opaque mesh and texture handles, so it can be driven by
//! any backend. [`BevyTileRenderer`] turns every tile into an entity with its own mesh
//! and material, which is hidden until the tile is drawn for the first time.

use crate::{
    marshal::{TileImage, TileMesh},
    Quadcode,
};
use bevy::{ecs::system::SystemParam, prelude::*};

/// Uploads tile data to the GPU and issues the draw calls of the tiles.
///
/// Every handle is owned by exactly one tile and is released exactly once.
pub trait TileRenderer {
    type Mesh;
    type Texture;

    fn upload_mesh(&mut self, quadcode: &Quadcode, mesh: TileMesh) -> Self::Mesh;

    fn upload_texture(&mut self, image: TileImage) -> Self::Texture;

    fn release_mesh(&mut self, mesh: Self::Mesh);

    fn release_texture(&mut self, texture: Self::Texture);

    fn draw(
        &mut self,
        mesh: &Self::Mesh,
        texture: Option<&Self::Texture>,
        transform: Transform,
        tint: Color,
    );
}

/// Marks the entity rendering the tile with the quadcode.
#[derive(Clone, Debug, Component)]
pub struct TileEntity(pub Quadcode);

/// The GPU resources of a tile.
#[derive(Clone, Debug)]
pub struct TileModel {
    pub entity: Entity,
    pub mesh: Handle<Mesh>,
    pub material: Handle<StandardMaterial>,
}

#[derive(SystemParam)]
pub struct BevyTileRenderer<'w, 's> {
    commands: Commands<'w, 's>,
    meshes: ResMut<'w, Assets<Mesh>>,
    images: ResMut<'w, Assets<Image>>,
    materials: ResMut<'w, Assets<StandardMaterial>>,
    tiles: Query<'w, 's, (&'static mut Transform, &'static mut Visibility), With<TileEntity>>,
}

impl TileRenderer for BevyTileRenderer<'_, '_> {
    type Mesh = TileModel;
    type Texture = Handle<Image>;

    fn upload_mesh(&mut self, quadcode: &Quadcode, mesh: TileMesh) -> TileModel {
        let mesh = self.meshes.add(mesh.into_mesh());
        let material = self.materials.add(StandardMaterial {
            base_color: Color::WHITE,
            unlit: true,
            cull_mode: None,
            double_sided: true,
            ..default()
        });

        let entity = self
            .commands
            .spawn((
                Name::new(format!("Tile {quadcode}")),
                TileEntity(quadcode.clone()),
                Mesh3d(mesh.clone()),
                MeshMaterial3d(material.clone()),
                Visibility::Hidden,
            ))
            .id();

        TileModel {
            entity,
            mesh,
            material,
        }
    }

    fn upload_texture(&mut self, image: TileImage) -> Handle<Image> {
        self.images.add(image.into_image())
    }

    fn release_mesh(&mut self, model: TileModel) {
        self.commands.entity(model.entity).despawn();
        self.meshes.remove(&model.mesh);
        self.materials.remove(&model.material);
    }

    fn release_texture(&mut self, texture: Handle<Image>) {
        self.images.remove(&texture);
    }

    fn draw(
        &mut self,
        model: &TileModel,
        texture: Option<&Handle<Image>>,
        transform: Transform,
        tint: Color,
    ) {
        match self.tiles.get_mut(model.entity) {
            Ok((mut current, mut visibility)) => {
                current.set_if_neq(transform);
                visibility.set_if_neq(Visibility::Visible);
            }
            // spawned this frame
            Err(_) => {
                self.commands
                    .entity(model.entity)
                    .try_insert((transform, Visibility::Visible));
            }
        }

        let outdated = self.materials.get(&model.material).is_some_and(|material| {
            material.base_color != tint || material.base_color_texture.as_ref() != texture
        });

        if outdated {
            if let Some(material) = self.materials.get_mut(&model.material) {
                material.base_color = tint;
                material.base_color_texture = texture.cloned();
            }
        }
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingRenderer;
