//! Splat population paired with its optimizer state

use std::path::Path;

use mipsplat_data::ply::{load_ply, save_ply, PlyVariant};
use mipsplat_data::{SplatError, SplatParamsMut, SplatResult, SplatRows, SplatStats, SplatStore};

use crate::camera::Viewpoint;
use crate::error::TrainResult;
use crate::filter::{FilterSummary, VisibilityFilter};
use crate::optim::{AdamState, OptimizerStateBridge, ParamGroup};

/// Learnable Gaussian splats and the optimizer moments mirroring them
///
/// The store is never handed out mutably as a whole, so every structural
/// change goes through [`GaussianModel::append`] or
/// [`GaussianModel::remove_where`], which resize the optimizer state in the
/// same call.
#[derive(Clone, Debug)]
pub struct GaussianModel<O: OptimizerStateBridge = AdamState> {
    store: SplatStore,
    optimizer: O,
}

impl GaussianModel<AdamState> {
    /// Model with freshly zeroed Adam moments
    pub fn new(store: SplatStore) -> Self {
        let optimizer = AdamState::new(store.len(), store.rest_len());
        Self { store, optimizer }
    }

    pub fn load_ply(path: &Path, max_sh_degree: u32) -> SplatResult<Self> {
        Ok(Self::new(load_ply(path, max_sh_degree)?))
    }

    /// Moments of one parameter group for the host's update rule
    pub fn moments_mut(&mut self, group: ParamGroup) -> (&mut [f32], &mut [f32]) {
        self.optimizer.moments_mut(group)
    }
}

impl<O: OptimizerStateBridge> GaussianModel<O> {
    pub fn with_optimizer(store: SplatStore, optimizer: O) -> SplatResult<Self> {
        SplatError::check_len("optimizer rows", store.len(), optimizer.rows())?;
        Ok(Self { store, optimizer })
    }

    pub fn store(&self) -> &SplatStore {
        &self.store
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn into_parts(self) -> (SplatStore, O) {
        (self.store, self.optimizer)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Append rows to the store and zeroed moments to every optimizer group
    pub fn append(&mut self, rows: SplatRows) -> SplatResult<usize> {
        let before = self.store.len();
        let after = self.store.append(rows)?;
        self.optimizer.on_append(after - before);
        debug_assert_eq!(self.optimizer.rows(), after);
        Ok(after)
    }

    /// Remove rows marked `true` from the store and the optimizer state
    pub fn remove_where(&mut self, drop: &[bool]) -> SplatResult<usize> {
        // Both sides are validated before either is touched.
        SplatError::check_len("removal mask", self.store.len(), drop.len())?;
        SplatError::check_len("optimizer rows", self.store.len(), self.optimizer.rows())?;
        let after = self.store.remove_where(drop)?;
        self.optimizer.on_remove(drop)?;
        debug_assert_eq!(self.optimizer.rows(), after);
        Ok(after)
    }

    /// Explicit delete-by-mask outside of density control
    pub fn delete_where(&mut self, drop: &[bool]) -> SplatResult<usize> {
        let before = self.store.len();
        let after = self.remove_where(drop)?;
        tracing::info!("Deleted {} splats, {} remain", before - after, after);
        Ok(after)
    }

    /// In-place access to raw parameters; lengths cannot change
    pub fn params_mut(&mut self) -> SplatParamsMut<'_> {
        self.store.params_mut()
    }

    /// Overwrite every opacity logit and notify the optimizer
    pub fn replace_opacity_logits(&mut self, logits: &[f32]) -> SplatResult<()> {
        SplatError::check_len("opacity logits", self.store.len(), logits.len())?;
        self.store.params_mut().opacity_logits.copy_from_slice(logits);
        self.optimizer.on_replace(ParamGroup::Opacity);
        Ok(())
    }

    pub fn stats_mut(&mut self) -> &mut SplatStats {
        self.store.stats_mut()
    }

    pub fn reset_statistics(&mut self) {
        self.store.reset_statistics();
    }

    pub fn oneup_sh_degree(&mut self) {
        self.store.oneup_sh_degree();
    }

    /// Recompute filter radii from the current positions
    pub fn update_filter(
        &mut self,
        filter: &VisibilityFilter,
        viewpoints: &[Viewpoint],
    ) -> TrainResult<FilterSummary> {
        filter.apply(&mut self.store, viewpoints)
    }

    pub fn save_ply(&self, path: &Path, variant: PlyVariant) -> SplatResult<()> {
        save_ply(&self.store, path, variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mipsplat_data::Splat;

    fn model_of(n: usize) -> GaussianModel {
        let rows: SplatRows = (0..n)
            .map(|i| Splat::from_activated([i as f32, 0.0, 0.0], [0.1; 3], [1.0, 0.0, 0.0, 0.0], 0.5, [0.0; 3], 9))
            .collect();
        GaussianModel::new(SplatStore::from_rows(1, rows).unwrap())
    }

    fn assert_in_lockstep(model: &GaussianModel) {
        let n = model.len();
        assert_eq!(model.optimizer().rows(), n);
        for group in ParamGroup::ALL {
            let m = model.optimizer().group(group);
            assert_eq!(m.exp_avg.len(), n * m.width());
        }
        assert_eq!(model.store().stats().len(), n);
        assert_eq!(model.store().filter_radii().len(), n);
    }

    #[test]
    fn test_append_and_remove_in_lockstep() {
        let mut model = model_of(3);
        model.moments_mut(ParamGroup::Position).0.fill(1.0);

        let extra = model.store().gather(&[0, 2]).unwrap();
        assert_eq!(model.append(extra).unwrap(), 5);
        assert_in_lockstep(&model);

        assert_eq!(model.remove_where(&[false, true, false, true, false]).unwrap(), 3);
        assert_in_lockstep(&model);

        // rows 0 and 2 kept their moments, the appended row starts at zero
        let pos = model.optimizer().group(ParamGroup::Position);
        assert_eq!(&pos.exp_avg[..6], &[1.0; 6]);
        assert_eq!(&pos.exp_avg[6..], &[0.0; 3]);
    }

    #[test]
    fn test_bad_mask_leaves_model_untouched() {
        let mut model = model_of(3);
        assert!(model.remove_where(&[true, true]).is_err());
        assert_eq!(model.len(), 3);
        assert_in_lockstep(&model);
    }

    #[test]
    fn test_with_optimizer_checks_rows() {
        let store = model_of(2).into_parts().0;
        assert!(GaussianModel::with_optimizer(store.clone(), AdamState::new(3, 9)).is_err());
        assert!(GaussianModel::with_optimizer(store, AdamState::new(2, 9)).is_ok());
    }

    #[test]
    fn test_replace_opacity_resets_moments() {
        let mut model = model_of(2);
        model.moments_mut(ParamGroup::Opacity).0.fill(3.0);
        model.replace_opacity_logits(&[0.0, 1.0]).unwrap();
        assert_eq!(model.store().opacity_logits(), &[0.0, 1.0]);
        assert!(model.optimizer().group(ParamGroup::Opacity).exp_avg.iter().all(|&v| v == 0.0));
        assert!(model.replace_opacity_logits(&[0.0]).is_err());
    }
}
