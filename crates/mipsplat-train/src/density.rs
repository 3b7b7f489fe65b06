//! Adaptive density control: clone, split and prune driven by gradient statistics

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use mipsplat_data::splat::{inverse_sigmoid, to_glam_quat};
use mipsplat_data::{SplatError, SplatResult, SplatRows};

use crate::config::DensifyConfig;
use crate::model::GaussianModel;
use crate::optim::OptimizerStateBridge;

/// Children generated per split parent
pub const DEFAULT_SPLIT_COUNT: usize = 2;
/// Ceiling applied to effective opacity by [`DensityController::reset_opacity`]
pub const OPACITY_RESET_CEILING: f32 = 0.01;

/// Thresholds for one density pass
#[derive(Clone, Debug, PartialEq)]
pub struct DensifyParams {
    /// Average screen-space gradient norm that triggers densification
    pub max_grad: f32,
    /// Splats whose effective opacity falls below this are pruned
    pub min_opacity: f32,
    pub scene_extent: f32,
    /// Fraction of `scene_extent` separating small (clone) from large (split) splats
    pub percent_dense: f32,
    pub prune_extent: f32,
    /// Screen radius above which splats are pruned; `None` disables both size clauses
    pub max_screen_size: Option<f32>,
}

/// Population change produced by one [`DensityController::run`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DensifyReport {
    pub cloned: usize,
    pub split: usize,
    pub pruned: usize,
    pub total: usize,
}

#[derive(Debug)]
pub struct DensityController {
    rng: StdRng,
    split_count: usize,
    opacity_reset_ceiling: f32,
}

impl Default for DensityController {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DensityController {
    /// Controller splitting into [`DEFAULT_SPLIT_COUNT`] children; a seed makes splits reproducible
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            split_count: DEFAULT_SPLIT_COUNT,
            opacity_reset_ceiling: OPACITY_RESET_CEILING,
        }
    }

    /// Controller seeded and sized from a densification config
    pub fn from_config(config: &DensifyConfig) -> Self {
        Self::new(config.seed)
            .with_split_count(config.split_count)
            .with_opacity_reset_ceiling(config.opacity_reset_ceiling)
    }

    pub fn with_split_count(mut self, split_count: usize) -> Self {
        self.split_count = split_count.max(1);
        self
    }

    pub fn with_opacity_reset_ceiling(mut self, ceiling: f32) -> Self {
        self.opacity_reset_ceiling = ceiling;
        self
    }

    pub fn split_count(&self) -> usize {
        self.split_count
    }

    pub fn opacity_reset_ceiling(&self) -> f32 {
        self.opacity_reset_ceiling
    }

    /// Accumulate one step's screen-space gradient norm for splat `index`
    pub fn add_statistics<O: OptimizerStateBridge>(
        &self,
        model: &mut GaussianModel<O>,
        index: usize,
        grad_norm: f32,
    ) -> SplatResult<()> {
        model.stats_mut().accumulate(index, grad_norm)
    }

    /// Feed one render's outputs: xy gradients and screen radii for every splat
    ///
    /// Only splats with `update_mask[i]` set are accumulated.
    pub fn observe<O: OptimizerStateBridge>(
        &self,
        model: &mut GaussianModel<O>,
        update_mask: &[bool],
        viewspace_grads: &[[f32; 2]],
        radii: &[f32],
    ) -> SplatResult<()> {
        let n = model.len();
        SplatError::check_len("update mask", n, update_mask.len())?;
        SplatError::check_len("viewspace gradients", n, viewspace_grads.len())?;
        SplatError::check_len("screen radii", n, radii.len())?;

        let stats = model.stats_mut();
        for (i, &visible) in update_mask.iter().enumerate() {
            if !visible {
                continue;
            }
            let [gx, gy] = viewspace_grads[i];
            stats.accumulate(i, (gx * gx + gy * gy).sqrt())?;
            stats.observe_radius(i, radii[i])?;
        }
        Ok(())
    }

    /// Clone, split, then prune, and reset statistics
    pub fn run<O: OptimizerStateBridge>(
        &mut self,
        model: &mut GaussianModel<O>,
        params: &DensifyParams,
    ) -> SplatResult<DensifyReport> {
        let grads = model.store().stats().average_gradients();
        let size_limit = params.percent_dense * params.scene_extent;

        let n = model.len();
        let mut clone_idx = Vec::new();
        let mut split_idx = Vec::new();
        for (i, &grad) in grads.iter().enumerate() {
            if grad < params.max_grad {
                continue;
            }
            if model.store().max_scale(i) <= size_limit {
                clone_idx.push(i);
            } else {
                split_idx.push(i);
            }
        }

        // Clones land at [n, n + cloned); selection indices stay valid.
        let cloned = clone_idx.len();
        if cloned > 0 {
            let rows = model.store().gather(&clone_idx)?;
            model.append(rows)?;
        }

        let split = split_idx.len();
        if split > 0 {
            let children = self.split_children(model, &split_idx)?;
            let after = model.append(children)?;
            let mut drop = vec![false; after];
            for &i in &split_idx {
                drop[i] = true;
            }
            model.remove_where(&drop)?;
        }

        let drop = prune_mask(model, params);
        let pruned = drop.iter().filter(|&&d| d).count();
        if pruned > 0 {
            model.remove_where(&drop)?;
        }

        model.reset_statistics();

        let report = DensifyReport {
            cloned,
            split,
            pruned,
            total: model.len(),
        };
        tracing::info!(
            "Densify: {} -> {} splats (cloned {}, split {}, pruned {})",
            n,
            report.total,
            report.cloned,
            report.split,
            report.pruned
        );
        Ok(report)
    }

    /// Cap effective opacity at the reset ceiling and write back the matching logits
    ///
    /// Population size is unchanged; the opacity moments are zeroed through
    /// [`OptimizerStateBridge::on_replace`].
    pub fn reset_opacity<O: OptimizerStateBridge>(&self, model: &mut GaussianModel<O>) -> SplatResult<()> {
        let ceiling = self.opacity_reset_ceiling;
        let store = model.store();
        let logits: Vec<f32> = (0..store.len())
            .map(|i| {
                let coef = store.compensation_coef(i);
                if coef <= 0.0 {
                    return store.opacity_logits()[i];
                }
                let capped = store.effective_opacity(i).min(ceiling);
                inverse_sigmoid(capped / coef)
            })
            .collect();

        model.replace_opacity_logits(&logits)?;
        tracing::info!("Reset opacity of {} splats to at most {}", logits.len(), ceiling);
        Ok(())
    }

    /// Children of the selected parents, in repeat order
    fn split_children<O: OptimizerStateBridge>(
        &mut self,
        model: &GaussianModel<O>,
        parents: &[usize],
    ) -> SplatResult<SplatRows> {
        let store = model.store();
        let n_split = self.split_count;
        let shrink = 0.8 * n_split as f32;
        let rest_len = store.rest_len();

        let template = store.gather(parents)?;
        let mut children = SplatRows::with_capacity(parents.len() * n_split, store.rest_len());
        for _ in 0..n_split {
            for (k, &i) in parents.iter().enumerate() {
                let scale = store.scale(i);
                let sample = Vec3::new(
                    self.rng.sample::<f32, _>(StandardNormal),
                    self.rng.sample::<f32, _>(StandardNormal),
                    self.rng.sample::<f32, _>(StandardNormal),
                ) * scale;
                let offset = to_glam_quat(template.rotations[k]) * sample;

                children.positions.push((store.position(i) + offset).to_array());
                children.log_scales.push((scale / shrink).to_array().map(f32::ln));
                children.rotations.push(template.rotations[k]);
                children.opacity_logits.push(template.opacity_logits[k]);
                children.color_dc.push(template.color_dc[k]);
                children
                    .color_rest
                    .extend_from_slice(&template.color_rest[k * rest_len..(k + 1) * rest_len]);
            }
        }
        Ok(children)
    }
}

/// Drop mask for the prune pass (true = drop)
fn prune_mask<O: OptimizerStateBridge>(model: &GaussianModel<O>, params: &DensifyParams) -> Vec<bool> {
    let store = model.store();
    let radii = store.stats().max_screen_radius();
    (0..store.len())
        .map(|i| {
            let faint = store.effective_opacity(i) < params.min_opacity;
            let oversized = params.max_screen_size.is_some_and(|max_screen| {
                radii[i] > max_screen || store.max_scale(i) > 0.1 * params.prune_extent
            });
            faint || oversized
        })
        .collect()
}
