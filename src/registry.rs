//! The registry of all tiles that are currently inside the frustum.
//!
//! Tiles are only ever created, textured and evicted by the three event handlers of
//! the [`TileRegistry`]. A tile is created with its mesh, which is requested from the
//! elevation service synchronously, so every registered tile can be drawn right away.
//! Its texture arrives later, once the engine finished generating the tile image.

use crate::{
    config::TileLayerConfig,
    engine::{ElevationService, MeshRequest, RawImagePayload},
    error::LayerResult,
    events::{TileKind, TileSummary, TileVisibility},
    marshal::{IndexPolicy, TileImage, TileMesh},
    render::TileRenderer,
    Quadcode,
};
use bevy::{prelude::*, utils::HashMap};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;

/// A tile inside the frustum, together with its render resources.
#[derive(Clone, Debug)]
pub struct Tile<M, T> {
    pub quadcode: Quadcode,
    /// The position of the tile in world space.
    pub position: Vec3,
    pub scale: f32,
    pub tilecode: [i32; 3],
    pub kind: TileKind,
    pub visibility: TileVisibility,
    /// A random color, which stays the same for the lifetime of the tile.
    pub color: Color,
    pub mesh: M,
    pub texture: Option<T>,
}

impl<M, T> Tile<M, T> {
    /// The transform the tile is drawn with.
    ///
    /// The layer space is mirrored along the x axis, which the rotation and the negative
    /// x scale undo.
    pub fn transform(&self) -> Transform {
        Transform {
            translation: self.position,
            rotation: Quat::from_rotation_y(PI),
            scale: Vec3::new(-self.scale, 1.0, self.scale),
        }
    }
}

#[derive(Resource)]
pub struct TileRegistry<M, T> {
    tiles: HashMap<Quadcode, Tile<M, T>>,
    mesh_request: MeshRequest,
    index_policy: IndexPolicy,
    rng: StdRng,
}

impl<M, T> TileRegistry<M, T> {
    pub fn new(mesh_request: MeshRequest, index_policy: IndexPolicy, rng: StdRng) -> Self {
        Self {
            tiles: default(),
            mesh_request,
            index_policy,
            rng,
        }
    }

    pub fn from_config(config: &TileLayerConfig) -> Self {
        let rng = config
            .color_seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Self::new(config.mesh, config.index_policy, rng)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, quadcode: &Quadcode) -> bool {
        self.tiles.contains_key(quadcode)
    }

    pub fn get(&self, quadcode: &Quadcode) -> Option<&Tile<M, T>> {
        self.tiles.get(quadcode)
    }

    /// Iterates over all tiles in an unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Tile<M, T>> {
        self.tiles.values()
    }

    fn random_color(&mut self) -> Color {
        Color::srgb_u8(self.rng.random(), self.rng.random(), self.rng.random())
    }

    /// Creates the tile, unless it is registered already.
    ///
    /// Returns whether a tile was created. If the mesh can not be built, no tile is created.
    pub fn on_in_frustum<S, R>(
        &mut self,
        elevation: &mut S,
        renderer: &mut R,
        quadcode: &Quadcode,
        summary: &TileSummary,
    ) -> LayerResult<bool>
    where
        S: ElevationService,
        R: TileRenderer<Mesh = M, Texture = T>,
    {
        if self.tiles.contains_key(quadcode) {
            return Ok(false);
        }

        let mesh = {
            let raw = elevation.request_mesh(quadcode, &self.mesh_request)?;
            TileMesh::from_raw(&raw, self.index_policy)?
        };

        let tile = Tile {
            quadcode: quadcode.clone(),
            position: Vec3::new(-summary.center.x, 0.0, summary.center.y),
            scale: summary.scale,
            tilecode: summary.tilecode,
            kind: summary.kind,
            visibility: summary.visibility,
            color: self.random_color(),
            mesh: renderer.upload_mesh(quadcode, mesh),
            texture: None,
        };

        self.tiles.insert(quadcode.clone(), tile);
        Ok(true)
    }

    /// Evicts the tile and releases its render resources.
    ///
    /// Returns whether the tile was registered.
    pub fn on_not_in_frustum<R>(&mut self, renderer: &mut R, quadcode: &Quadcode) -> bool
    where
        R: TileRenderer<Mesh = M, Texture = T>,
    {
        let Some(tile) = self.tiles.remove(quadcode) else {
            return false;
        };

        renderer.release_mesh(tile.mesh);

        if let Some(texture) = tile.texture {
            renderer.release_texture(texture);
        }

        true
    }

    /// Attaches the image to the tile, replacing its previous texture.
    ///
    /// Returns whether the tile was registered. Images of unknown tiles are not decoded.
    pub fn on_image_ready<R>(
        &mut self,
        renderer: &mut R,
        quadcode: &Quadcode,
        payload: RawImagePayload,
    ) -> LayerResult<bool>
    where
        R: TileRenderer<Mesh = M, Texture = T>,
    {
        let Some(tile) = self.tiles.get_mut(quadcode) else {
            return Ok(false);
        };

        let image = TileImage::decode(payload)?;
        let texture = renderer.upload_texture(image);

        if let Some(previous) = tile.texture.replace(texture) {
            renderer.release_texture(previous);
        }

        Ok(true)
    }

    /// Draws every tile, tinted white or with its own color.
    pub fn draw<R>(&self, renderer: &mut R, debug_colors: bool)
    where
        R: TileRenderer<Mesh = M, Texture = T>,
    {
        for tile in self.tiles.values() {
            let tint = if debug_colors {
                tile.color
            } else {
                Color::WHITE
            };

            renderer.draw(&tile.mesh, tile.texture.as_ref(), tile.transform(), tint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::scripted::{ScriptedElevation, ScriptedMesh},
        error::LayerError,
        render::RecordingRenderer,
    };

    struct Fixture {
        registry: TileRegistry<u32, u32>,
        elevation: ScriptedElevation,
        renderer: RecordingRenderer,
    }

    impl Fixture {
        fn new(index_policy: IndexPolicy) -> Self {
            Self {
                registry: TileRegistry::new(
                    MeshRequest::default(),
                    index_policy,
                    StdRng::seed_from_u64(7),
                ),
                elevation: ScriptedElevation::default(),
                renderer: RecordingRenderer::default(),
            }
        }

        fn enter(&mut self, quadcode: &str, center: Vec2, scale: f32) -> LayerResult<bool> {
            let summary = TileSummary {
                tilecode: [4, 5, 6],
                center,
                scale,
                kind: TileKind::Leaf,
                visibility: TileVisibility::Visible,
                quadcode: quadcode.into(),
            };

            self.registry.on_in_frustum(
                &mut self.elevation,
                &mut self.renderer,
                &quadcode.into(),
                &summary,
            )
        }

        fn leave(&mut self, quadcode: &str) -> bool {
            self.registry
                .on_not_in_frustum(&mut self.renderer, &quadcode.into())
        }

        fn image(&mut self, quadcode: &str, format: i32, pixels: Vec<u8>) -> LayerResult<bool> {
            let payload = RawImagePayload {
                width: 2,
                height: 2,
                format,
                size: pixels.len() as u64,
                pixels,
            };

            self.registry
                .on_image_ready(&mut self.renderer, &quadcode.into(), payload)
        }
    }

    #[test]
    fn creates_tile_with_mesh() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);

        assert_eq!(fixture.enter("0123", Vec2::new(1.0, 2.0), 0.5), Ok(true));
        assert_eq!(fixture.registry.len(), 1);

        let tile = fixture.registry.get(&"0123".into()).unwrap();
        assert_eq!(tile.position, Vec3::new(-1.0, 0.0, 2.0));
        assert_eq!(tile.scale, 0.5);
        assert_eq!(tile.tilecode, [4, 5, 6]);
        assert!(fixture.renderer.live_meshes.contains(&tile.mesh));
        assert!(tile.texture.is_none());

        let (quadcode, request) = &fixture.elevation.requests[0];
        assert_eq!(quadcode.as_str(), "0123");
        assert_eq!(*request, MeshRequest::default());

        let (_, mesh) = &fixture.renderer.meshes[0];
        assert_eq!(mesh.vertex_count(), 17 * 17);
        assert_eq!(mesh.triangle_count(), 16 * 16 * 2);
    }

    #[test]
    fn texture_attaches_until_eviction() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);
        fixture.enter("0123", Vec2::new(1.0, 2.0), 0.5).unwrap();

        assert_eq!(fixture.image("0123", 2, vec![255; 16]), Ok(true));

        let texture = fixture.registry.get(&"0123".into()).unwrap().texture;
        assert!(texture.is_some());

        assert!(fixture.leave("0123"));
        assert!(fixture.registry.is_empty());
        assert!(fixture.renderer.live_meshes.is_empty());
        assert!(fixture.renderer.live_textures.is_empty());
        assert_eq!(fixture.renderer.released_textures, vec![texture.unwrap()]);
    }

    #[test]
    fn repeated_in_frustum_keeps_the_tile() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);

        assert_eq!(fixture.enter("0123", Vec2::new(1.0, 2.0), 0.5), Ok(true));
        assert_eq!(fixture.enter("0123", Vec2::new(3.0, 4.0), 2.0), Ok(false));

        assert_eq!(fixture.registry.len(), 1);
        assert_eq!(fixture.elevation.requests.len(), 1);
        assert_eq!(fixture.renderer.live_meshes.len(), 1);

        let tile = fixture.registry.get(&"0123".into()).unwrap();
        assert_eq!(tile.position, Vec3::new(-1.0, 0.0, 2.0));
    }

    #[test]
    fn eviction_without_texture_releases_mesh() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);
        fixture.enter("0", Vec2::ZERO, 1.0).unwrap();
        fixture.enter("1", Vec2::ZERO, 1.0).unwrap();

        assert!(fixture.leave("0"));
        assert!(!fixture.leave("0"));

        assert_eq!(fixture.registry.len(), 1);
        assert!(fixture.registry.contains(&"1".into()));
        assert_eq!(fixture.renderer.released_meshes.len(), 1);
        assert!(fixture.renderer.released_textures.is_empty());
    }

    #[test]
    fn image_for_unknown_tile_is_ignored() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);
        fixture.enter("0", Vec2::ZERO, 1.0).unwrap();

        // not decoded, so even an invalid format is ignored
        assert_eq!(fixture.image("1", 7, vec![0; 16]), Ok(false));

        assert_eq!(fixture.registry.len(), 1);
        assert!(fixture.registry.get(&"0".into()).unwrap().texture.is_none());
        assert!(fixture.renderer.live_textures.is_empty());
    }

    #[test]
    fn replacing_a_texture_releases_the_previous_one() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);
        fixture.enter("0", Vec2::ZERO, 1.0).unwrap();

        fixture.image("0", 2, vec![0; 16]).unwrap();
        let first = fixture.registry.get(&"0".into()).unwrap().texture.unwrap();

        fixture.image("0", 1, vec![0; 12]).unwrap();
        let second = fixture.registry.get(&"0".into()).unwrap().texture.unwrap();

        assert_ne!(first, second);
        assert_eq!(fixture.renderer.released_textures, vec![first]);
        assert_eq!(fixture.renderer.live_textures.len(), 1);
    }

    #[test]
    fn invalid_image_keeps_the_previous_texture() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);
        fixture.enter("0", Vec2::ZERO, 1.0).unwrap();
        fixture.image("0", 2, vec![0; 16]).unwrap();

        assert_eq!(
            fixture.image("0", 3, vec![0; 16]),
            Err(LayerError::UnknownImageFormat { tag: 3 })
        );
        assert!(fixture.registry.get(&"0".into()).unwrap().texture.is_some());
        assert!(fixture.renderer.released_textures.is_empty());
    }

    #[test]
    fn rejected_mesh_creates_no_tile() {
        let mut fixture = Fixture::new(IndexPolicy::Reject);
        let mut mesh = ScriptedMesh::grid(1, 1);
        mesh.indices[5] = 70_000;
        fixture.elevation.insert_mesh("0", mesh);

        assert_eq!(
            fixture.enter("0", Vec2::ZERO, 1.0),
            Err(LayerError::IndexOverflow {
                position: 5,
                value: 70_000
            })
        );
        assert!(fixture.registry.is_empty());
        assert!(fixture.renderer.live_meshes.is_empty());
    }

    #[test]
    fn draws_every_tile() {
        let mut fixture = Fixture::new(IndexPolicy::Widen);
        fixture.enter("0", Vec2::new(1.0, 2.0), 0.5).unwrap();
        fixture.enter("1", Vec2::new(-1.0, 0.0), 0.5).unwrap();
        fixture.image("1", 2, vec![0; 16]).unwrap();

        fixture.registry.draw(&mut fixture.renderer, false);

        assert_eq!(fixture.renderer.draws.len(), 2);
        assert!(fixture.renderer.draws.iter().all(|draw| draw.tint == Color::WHITE));
        assert_eq!(
            fixture
                .renderer
                .draws
                .iter()
                .filter(|draw| draw.texture.is_some())
                .count(),
            1
        );

        let draw = fixture
            .renderer
            .draws
            .iter()
            .find(|draw| draw.transform.translation == Vec3::new(-1.0, 0.0, 2.0))
            .unwrap();
        assert_eq!(draw.transform.scale, Vec3::new(-0.5, 1.0, 0.5));
        assert_eq!(draw.transform.rotation, Quat::from_rotation_y(PI));
    }

    #[test]
    fn debug_colors_are_deterministic() {
        let colors = || {
            let mut fixture = Fixture::new(IndexPolicy::Widen);
            fixture.enter("0", Vec2::ZERO, 1.0).unwrap();
            fixture.registry.draw(&mut fixture.renderer, true);
            fixture.renderer.draws[0].tint
        };

        assert_eq!(colors(), colors());
    }
}
