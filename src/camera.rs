use crate::transform::{mirrored_view, ViewMatrices};
use bevy::{
    input::mouse::AccumulatedMouseMotion,
    prelude::*,
    render::camera::{PerspectiveProjection, Projection},
};
use std::f32::consts::FRAC_PI_2;

/// The camera whose matrices are pushed to the tile-layer engine.
///
/// It has to be a root entity, since its local transform is used as its world transform.
#[derive(Clone, Copy, Debug, Component)]
pub struct LayerCamera {
    /// The vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for LayerCamera {
    fn default() -> Self {
        Self {
            fov: 60.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl LayerCamera {
    /// An OpenGL style perspective projection, with a depth range of -1 to 1.
    pub fn projection_matrix(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov, aspect_ratio, self.near, self.far)
    }

    pub fn view_matrix(&self, transform: &Transform) -> Mat4 {
        let eye = transform.translation;

        mirrored_view(eye, eye + *transform.forward(), *transform.up())
    }

    pub fn matrices(&self, transform: &Transform, aspect_ratio: f32) -> ViewMatrices {
        ViewMatrices {
            projection: self.projection_matrix(aspect_ratio),
            view: self.view_matrix(transform),
        }
    }

    /// The projection of the render camera, matching the one seen by the engine.
    pub fn projection(&self) -> Projection {
        Projection::Perspective(PerspectiveProjection {
            fov: self.fov,
            near: self.near,
            far: self.far,
            ..default()
        })
    }
}

/// A camera flying freely through the scene.
#[derive(Clone, Debug, Component)]
pub struct FreeCamera {
    pub translation_speed: f32,
    pub rotation_speed: f32,
}

impl Default for FreeCamera {
    fn default() -> Self {
        Self {
            translation_speed: 5.0,
            rotation_speed: 0.003,
        }
    }
}

pub fn free_camera_control(
    time: Res<Time>,
    keys: Res<ButtonInput<KeyCode>>,
    mouse_motion: Res<AccumulatedMouseMotion>,
    mut cameras: Query<(&mut Transform, &FreeCamera)>,
) {
    let delta_time = time.delta_secs();

    for (mut transform, camera) in &mut cameras {
        let mut translation_delta = Vec3::ZERO;

        if keys.any_pressed([KeyCode::ArrowLeft, KeyCode::KeyA]) {
            translation_delta.x -= 1.0;
        }
        if keys.any_pressed([KeyCode::ArrowRight, KeyCode::KeyD]) {
            translation_delta.x += 1.0;
        }
        if keys.pressed(KeyCode::PageUp) {
            translation_delta.y += 1.0;
        }
        if keys.pressed(KeyCode::PageDown) {
            translation_delta.y -= 1.0;
        }
        if keys.any_pressed([KeyCode::ArrowUp, KeyCode::KeyW]) {
            translation_delta.z -= 1.0;
        }
        if keys.any_pressed([KeyCode::ArrowDown, KeyCode::KeyS]) {
            translation_delta.z += 1.0;
        }

        let (mut yaw, mut pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
        let rotation_delta = -mouse_motion.delta * camera.rotation_speed;

        yaw += rotation_delta.x;
        pitch = (pitch + rotation_delta.y).clamp(-FRAC_PI_2 + 0.01, FRAC_PI_2 - 0.01);
        transform.rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);

        // moves along the ground plane, regardless of the pitch
        let translation_delta = Quat::from_rotation_y(yaw) * translation_delta.normalize_or_zero();
        transform.translation += translation_delta * camera.translation_speed * delta_time;
    }
}
