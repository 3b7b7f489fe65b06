use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};

use crate::error::{SplatError, SplatResult};

/// Activated splat handed to a renderer
///
/// Memory layout: 56 bytes, GPU-friendly alignment
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RenderSplat {
    /// World-space position
    pub pos: [f32; 3],
    /// Scale along each axis, filter-inflated when requested
    pub scale: [f32; 3],
    /// Unit rotation quaternion (w, x, y, z)
    pub rotation: [f32; 4],
    /// Degree-0 color coefficient
    pub color_dc: [f32; 3],
    /// Opacity in (0, 1), filter-compensated when requested
    pub opacity: f32,
}

impl RenderSplat {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Raw parameters of one splat
#[derive(Clone, Debug, PartialEq)]
pub struct Splat {
    pub position: [f32; 3],
    pub log_scale: [f32; 3],
    /// Quaternion (w, x, y, z), not necessarily unit length
    pub rotation: [f32; 4],
    pub opacity_logit: f32,
    pub color_dc: [f32; 3],
    /// Higher-order color coefficients, `[K][3]` coefficient-major
    pub color_rest: Vec<f32>,
}

impl Splat {
    /// Splat built from activated values (scale and opacity are inverted to raw form)
    pub fn from_activated(
        position: [f32; 3],
        scale: [f32; 3],
        rotation: [f32; 4],
        opacity: f32,
        color_dc: [f32; 3],
        rest_len: usize,
    ) -> Self {
        Self {
            position,
            log_scale: scale.map(|s| s.max(1e-12).ln()),
            rotation,
            opacity_logit: inverse_sigmoid(opacity),
            color_dc,
            color_rest: vec![0.0; rest_len],
        }
    }
}

/// Batch of raw splat rows laid out as parallel arrays
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplatRows {
    pub positions: Vec<[f32; 3]>,
    pub log_scales: Vec<[f32; 3]>,
    pub rotations: Vec<[f32; 4]>,
    pub opacity_logits: Vec<f32>,
    pub color_dc: Vec<[f32; 3]>,
    /// `len() * rest_len` values, one `[K][3]` block per row
    pub color_rest: Vec<f32>,
}

impl SplatRows {
    pub fn with_capacity(rows: usize, rest_len: usize) -> Self {
        Self {
            positions: Vec::with_capacity(rows),
            log_scales: Vec::with_capacity(rows),
            rotations: Vec::with_capacity(rows),
            opacity_logits: Vec::with_capacity(rows),
            color_dc: Vec::with_capacity(rows),
            color_rest: Vec::with_capacity(rows * rest_len),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, splat: Splat) {
        self.positions.push(splat.position);
        self.log_scales.push(splat.log_scale);
        self.rotations.push(splat.rotation);
        self.opacity_logits.push(splat.opacity_logit);
        self.color_dc.push(splat.color_dc);
        self.color_rest.extend_from_slice(&splat.color_rest);
    }

    /// Check that every array describes the same number of rows
    pub fn validate(&self, rest_len: usize) -> SplatResult<usize> {
        let n = self.positions.len();
        SplatError::check_len("log_scales", n, self.log_scales.len())?;
        SplatError::check_len("rotations", n, self.rotations.len())?;
        SplatError::check_len("opacity_logits", n, self.opacity_logits.len())?;
        SplatError::check_len("color_dc", n, self.color_dc.len())?;
        SplatError::check_len("color_rest", n * rest_len, self.color_rest.len())?;
        Ok(n)
    }
}

impl FromIterator<Splat> for SplatRows {
    fn from_iter<I: IntoIterator<Item = Splat>>(iter: I) -> Self {
        let mut rows = SplatRows::default();
        for splat in iter {
            rows.push(splat);
        }
        rows
    }
}

/// Number of higher-order coefficients per color channel for a degree
pub fn rest_coefficients(max_sh_degree: u32) -> usize {
    let per_channel = (max_sh_degree as usize + 1).pow(2);
    per_channel - 1
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn inverse_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x)).ln()
}

/// Normalize a (w, x, y, z) quaternion, falling back to identity
pub fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if len > 0.0 {
        [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
    } else {
        [1.0, 0.0, 0.0, 0.0]
    }
}

/// Stored (w, x, y, z) quaternion as a normalized glam rotation
pub fn to_glam_quat(q: [f32; 4]) -> Quat {
    let [w, x, y, z] = normalize_quat(q);
    Quat::from_xyzw(x, y, z, w)
}

/// glam rotation back to stored (w, x, y, z) order
pub fn from_glam_quat(q: Quat) -> [f32; 4] {
    [q.w, q.x, q.y, q.z]
}

/// Scale after convolving each axis with an isotropic filter of the given radius
///
/// Variances add: `sqrt(s^2 + r^2)` per axis.
pub fn effective_scale(scale: Vec3, filter_radius: f32) -> Vec3 {
    let r2 = filter_radius * filter_radius;
    let var = scale * scale + Vec3::splat(r2);
    Vec3::new(var.x.sqrt(), var.y.sqrt(), var.z.sqrt())
}

/// Ratio of Gaussian-integral determinants before and after filter inflation
///
/// Equal to `sqrt(prod(s^2) / prod(s^2 + r^2))`, evaluated per axis so that
/// tiny scales do not underflow the determinant product. Without a filter the
/// coefficient is exactly 1.
pub fn compensation_coef(scale: Vec3, filter_radius: f32) -> f32 {
    if filter_radius == 0.0 {
        return 1.0;
    }
    let inflated = effective_scale(scale, filter_radius);
    let ratio = scale / inflated;
    if ratio.is_finite() {
        ratio.x * ratio.y * ratio.z
    } else {
        0.0
    }
}
