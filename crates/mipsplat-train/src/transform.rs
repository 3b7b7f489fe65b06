//! Rigid and uniform-scale transforms of a whole scene
//!
//! None of these change the population size. Filter radii are left as they
//! are; call [`GaussianModel::update_filter`] afterwards when they matter.

use glam::{Quat, Vec3};

use mipsplat_data::splat::{from_glam_quat, to_glam_quat};

use crate::model::GaussianModel;
use crate::optim::OptimizerStateBridge;

pub fn translate<O: OptimizerStateBridge>(model: &mut GaussianModel<O>, offset: Vec3) {
    for p in model.params_mut().positions.iter_mut() {
        *p = (Vec3::from_array(*p) + offset).to_array();
    }
}

/// Scale positions and splat extents by `factor` about the origin
pub fn rescale<O: OptimizerStateBridge>(model: &mut GaussianModel<O>, factor: f32) {
    let log_factor = factor.ln();
    let mut params = model.params_mut();
    for p in params.positions.iter_mut() {
        *p = (Vec3::from_array(*p) * factor).to_array();
    }
    for s in params.log_scales.iter_mut() {
        *s = s.map(|v| v + log_factor);
    }
}

/// Rotate positions and orientations by `rotation` about the origin
pub fn rotate<O: OptimizerStateBridge>(model: &mut GaussianModel<O>, rotation: Quat) {
    let rotation = rotation.normalize();
    let mut params = model.params_mut();
    for p in params.positions.iter_mut() {
        *p = (rotation * Vec3::from_array(*p)).to_array();
    }
    for r in params.rotations.iter_mut() {
        *r = from_glam_quat((rotation * to_glam_quat(*r)).normalize());
    }
}
