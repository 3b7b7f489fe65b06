//! Densification schedule and thresholds

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::density::{DensifyParams, DEFAULT_SPLIT_COUNT, OPACITY_RESET_CEILING};

/// Adaptive density control configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensifyConfig {
    pub densify_from_iter: usize,
    pub densify_until_iter: usize,
    pub densification_interval: usize,
    pub opacity_reset_interval: usize,
    pub densify_grad_threshold: f32,
    pub min_opacity: f32,
    pub percent_dense: f32,
    /// Screen-size prune threshold, active after the first opacity reset
    pub screen_size_threshold: f32,
    pub split_count: usize,
    pub opacity_reset_ceiling: f32,
    pub seed: Option<u64>,
}

impl Default for DensifyConfig {
    fn default() -> Self {
        Self {
            densify_from_iter: 500,
            densify_until_iter: 15_000,
            densification_interval: 100,
            opacity_reset_interval: 3000,
            densify_grad_threshold: 0.0002,
            min_opacity: 0.005,
            percent_dense: 0.01,
            screen_size_threshold: 20.0,
            split_count: DEFAULT_SPLIT_COUNT,
            opacity_reset_ceiling: OPACITY_RESET_CEILING,
            seed: None,
        }
    }
}

impl DensifyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading densify config {:?}", path))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("parsing densify config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject intervals that would make the schedule divide by zero
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.densification_interval > 0, "densification_interval must be positive");
        anyhow::ensure!(self.opacity_reset_interval > 0, "opacity_reset_interval must be positive");
        anyhow::ensure!(self.split_count > 0, "split_count must be positive");
        Ok(())
    }

    /// Whether a density pass runs after iteration `iter`
    pub fn should_densify(&self, iter: usize) -> bool {
        iter > self.densify_from_iter
            && iter < self.densify_until_iter
            && self.densification_interval > 0
            && iter % self.densification_interval == 0
    }

    /// Whether opacities are reset after iteration `iter`
    pub fn should_reset_opacity(&self, iter: usize) -> bool {
        iter > 0
            && iter < self.densify_until_iter
            && self.opacity_reset_interval > 0
            && iter % self.opacity_reset_interval == 0
    }

    /// Thresholds for a density pass at `iter`
    pub fn params_at(&self, iter: usize, scene_extent: f32) -> DensifyParams {
        let max_screen_size =
            (iter > self.opacity_reset_interval).then_some(self.screen_size_threshold);
        DensifyParams {
            max_grad: self.densify_grad_threshold,
            min_opacity: self.min_opacity,
            scene_extent,
            percent_dense: self.percent_dense,
            prune_extent: scene_extent,
            max_screen_size,
        }
    }
}
