//! Pinhole viewpoints observing the splat population

use anyhow::{Context, Result};
use glam::{Mat3, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;

/// Camera with a world-to-camera extrinsic and pixel intrinsics
///
/// Camera space is x right, y down, z forward; points in front of the
/// camera have positive depth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewpoint {
    /// World-to-camera rotation, row-major
    pub rotation: [[f32; 3]; 3],
    /// World-to-camera translation
    pub translation: [f32; 3],
    /// Horizontal focal length in pixels
    pub focal_x: f32,
    /// Vertical focal length in pixels
    pub focal_y: f32,
    pub width: u32,
    pub height: u32,
}

impl Viewpoint {
    pub fn new(
        rotation: Mat3,
        translation: Vec3,
        focal_x: f32,
        focal_y: f32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            rotation: rotation.transpose().to_cols_array_2d(),
            translation: translation.to_array(),
            focal_x,
            focal_y,
            width,
            height,
        }
    }

    /// Camera at `eye` looking at `target`
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, focal: f32, width: u32, height: u32) -> Self {
        let forward = (target - eye).normalize();
        let right = forward.cross(up).normalize();
        let down = forward.cross(right);
        let rotation = Mat3::from_cols(right, down, forward).transpose();
        let translation = -(rotation * eye);
        Self::new(rotation, translation, focal, focal, width, height)
    }

    /// World-to-camera rotation matrix
    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_cols_array_2d(&self.rotation).transpose()
    }

    /// Camera center in world space
    pub fn center(&self) -> Vec3 {
        -(self.rotation_matrix().transpose() * Vec3::from_array(self.translation))
    }

    /// Transform a world point into camera space
    pub fn world_to_camera(&self, world_pos: Vec3) -> Vec3 {
        self.rotation_matrix() * world_pos + Vec3::from_array(self.translation)
    }

    /// Pinhole projection of a camera-space point, principal point at the image center
    ///
    /// Depth is clamped away from zero so points behind the camera still map
    /// to finite pixels; callers test depth separately.
    pub fn project(&self, cam_pos: Vec3) -> Vec2 {
        let z = cam_pos.z.max(0.001);
        Vec2::new(
            cam_pos.x / z * self.focal_x + self.width as f32 / 2.0,
            cam_pos.y / z * self.focal_y + self.height as f32 / 2.0,
        )
    }
}

/// Generate viewpoints on a sphere around `center`, all looking at it
pub fn orbit_viewpoints(
    center: Vec3,
    radius: f32,
    num_views: usize,
    image_size: (u32, u32),
    focal: f32,
) -> Vec<Viewpoint> {
    let mut viewpoints = Vec::with_capacity(num_views);

    let golden_ratio = (1.0 + 5.0_f32.sqrt()) / 2.0;

    for i in 0..num_views {
        let t = i as f32 / num_views as f32;

        // Fibonacci sphere distribution
        let theta = 2.0 * PI * t * golden_ratio;
        let phi = (1.0 - 2.0 * (i as f32 + 0.5) / num_views as f32).acos();

        let x = phi.sin() * theta.cos();
        let y = phi.cos();
        let z = phi.sin() * theta.sin();

        let eye = center + Vec3::new(x, y, z) * radius;
        viewpoints.push(Viewpoint::look_at(
            eye,
            center,
            Vec3::Y,
            focal,
            image_size.0,
            image_size.1,
        ));
    }

    viewpoints
}

/// Load a JSON array of viewpoints
pub fn load_viewpoints(path: &Path) -> Result<Vec<Viewpoint>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading viewpoints from {:?}", path))?;
    let viewpoints = serde_json::from_str(&json)
        .with_context(|| format!("parsing viewpoints in {:?}", path))?;
    Ok(viewpoints)
}

pub fn save_viewpoints(viewpoints: &[Viewpoint], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(viewpoints)?;
    std::fs::write(path, json)?;
    Ok(())
}
