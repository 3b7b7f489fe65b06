//! Structure-of-arrays splat population
//!
//! `SplatStore` owns every per-splat array (raw parameters, filter radius and
//! training statistics). All arrays share one index space; the only
//! operations that change the population size are [`SplatStore::append`] and
//! [`SplatStore::remove_where`], and both validate their input before touching
//! any array.

use glam::{Quat, Vec3};

use crate::error::{SplatError, SplatResult};
use crate::splat::{
    compensation_coef, effective_scale, rest_coefficients, sigmoid, to_glam_quat, RenderSplat,
    Splat, SplatRows,
};

/// Per-splat statistics gathered between two density passes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplatStats {
    grad_accum: Vec<f32>,
    grad_count: Vec<u32>,
    max_screen_radius: Vec<f32>,
}

impl SplatStats {
    fn zeros(n: usize) -> Self {
        Self {
            grad_accum: vec![0.0; n],
            grad_count: vec![0; n],
            max_screen_radius: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.grad_accum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grad_accum.is_empty()
    }

    pub fn grad_accum(&self) -> &[f32] {
        &self.grad_accum
    }

    pub fn grad_count(&self) -> &[u32] {
        &self.grad_count
    }

    pub fn max_screen_radius(&self) -> &[f32] {
        &self.max_screen_radius
    }

    /// Add one step's screen-space gradient norm to a splat
    pub fn accumulate(&mut self, index: usize, grad_norm: f32) -> SplatResult<()> {
        let len = self.len();
        let accum = self
            .grad_accum
            .get_mut(index)
            .ok_or(SplatError::IndexOutOfRange { index, len })?;
        *accum += grad_norm;
        self.grad_count[index] += 1;
        Ok(())
    }

    /// Raise the running maximum screen radius of a splat
    pub fn observe_radius(&mut self, index: usize, radius: f32) -> SplatResult<()> {
        let len = self.len();
        let max = self
            .max_screen_radius
            .get_mut(index)
            .ok_or(SplatError::IndexOutOfRange { index, len })?;
        *max = max.max(radius);
        Ok(())
    }

    /// Mean gradient norm per splat; splats never observed (0/0) report 0
    pub fn average_gradients(&self) -> Vec<f32> {
        self.grad_accum
            .iter()
            .zip(&self.grad_count)
            .map(|(&accum, &count)| {
                let avg = accum / count as f32;
                if avg.is_finite() {
                    avg
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn reset(&mut self, n: usize) {
        *self = Self::zeros(n);
    }

    fn compact(&mut self, drop: &[bool]) {
        compact_rows(&mut self.grad_accum, 1, drop);
        compact_rows(&mut self.grad_count, 1, drop);
        compact_rows(&mut self.max_screen_radius, 1, drop);
    }
}

/// Mutable views of the raw parameter arrays
///
/// Slices can be written in place but never resized, so the population
/// size stays under the store's control.
pub struct SplatParamsMut<'a> {
    pub positions: &'a mut [[f32; 3]],
    pub log_scales: &'a mut [[f32; 3]],
    pub rotations: &'a mut [[f32; 4]],
    pub opacity_logits: &'a mut [f32],
    pub color_dc: &'a mut [[f32; 3]],
    pub color_rest: &'a mut [f32],
}

/// Arena of splat parameters addressed by row index
#[derive(Clone, Debug, PartialEq)]
pub struct SplatStore {
    max_sh_degree: u32,
    active_sh_degree: u32,
    rest_len: usize,
    positions: Vec<[f32; 3]>,
    log_scales: Vec<[f32; 3]>,
    rotations: Vec<[f32; 4]>,
    opacity_logits: Vec<f32>,
    color_dc: Vec<[f32; 3]>,
    color_rest: Vec<f32>,
    filter_radius: Vec<f32>,
    stats: SplatStats,
}

impl SplatStore {
    /// Empty store for the given maximum color degree
    pub fn new(max_sh_degree: u32) -> Self {
        Self {
            max_sh_degree,
            active_sh_degree: 0,
            rest_len: 3 * rest_coefficients(max_sh_degree),
            positions: Vec::new(),
            log_scales: Vec::new(),
            rotations: Vec::new(),
            opacity_logits: Vec::new(),
            color_dc: Vec::new(),
            color_rest: Vec::new(),
            filter_radius: Vec::new(),
            stats: SplatStats::default(),
        }
    }

    /// Store of `n` all-zero rows
    pub fn zeros(max_sh_degree: u32, n: usize) -> Self {
        let mut store = Self::new(max_sh_degree);
        store.positions = vec![[0.0; 3]; n];
        store.log_scales = vec![[0.0; 3]; n];
        store.rotations = vec![[0.0; 4]; n];
        store.opacity_logits = vec![0.0; n];
        store.color_dc = vec![[0.0; 3]; n];
        store.color_rest = vec![0.0; n * store.rest_len];
        store.filter_radius = vec![0.0; n];
        store.stats = SplatStats::zeros(n);
        store
    }

    pub fn from_rows(max_sh_degree: u32, rows: SplatRows) -> SplatResult<Self> {
        let mut store = Self::new(max_sh_degree);
        store.append(rows)?;
        Ok(store)
    }

    /// Population size N
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn max_sh_degree(&self) -> u32 {
        self.max_sh_degree
    }

    pub fn active_sh_degree(&self) -> u32 {
        self.active_sh_degree
    }

    pub fn set_active_sh_degree(&mut self, degree: u32) {
        self.active_sh_degree = degree.min(self.max_sh_degree);
    }

    /// Enable one more band of color coefficients, up to the maximum degree
    pub fn oneup_sh_degree(&mut self) {
        if self.active_sh_degree < self.max_sh_degree {
            self.active_sh_degree += 1;
        }
    }

    /// Floats of `color_rest` per row (3 * K)
    pub fn rest_len(&self) -> usize {
        self.rest_len
    }

    /// Append rows with zero filter radius; returns the new N
    ///
    /// Statistics of the whole population restart from zero.
    pub fn append(&mut self, rows: SplatRows) -> SplatResult<usize> {
        rows.validate(self.rest_len)?;
        self.positions.extend(rows.positions);
        self.log_scales.extend(rows.log_scales);
        self.rotations.extend(rows.rotations);
        self.opacity_logits.extend(rows.opacity_logits);
        self.color_dc.extend(rows.color_dc);
        self.color_rest.extend(rows.color_rest);
        self.filter_radius.resize(self.positions.len(), 0.0);
        self.stats.reset(self.len());
        Ok(self.len())
    }

    /// Remove every row whose mask entry is `true`, keeping survivors in order
    pub fn remove_where(&mut self, drop: &[bool]) -> SplatResult<usize> {
        SplatError::check_len("removal mask", self.len(), drop.len())?;
        compact_rows(&mut self.positions, 1, drop);
        compact_rows(&mut self.log_scales, 1, drop);
        compact_rows(&mut self.rotations, 1, drop);
        compact_rows(&mut self.opacity_logits, 1, drop);
        compact_rows(&mut self.color_dc, 1, drop);
        compact_rows(&mut self.color_rest, self.rest_len, drop);
        compact_rows(&mut self.filter_radius, 1, drop);
        self.stats.compact(drop);
        Ok(self.len())
    }

    /// Copy of one row's raw parameters
    pub fn row(&self, index: usize) -> SplatResult<Splat> {
        self.check_index(index)?;
        Ok(Splat {
            position: self.positions[index],
            log_scale: self.log_scales[index],
            rotation: self.rotations[index],
            opacity_logit: self.opacity_logits[index],
            color_dc: self.color_dc[index],
            color_rest: self.rest_block(index).to_vec(),
        })
    }

    /// Copy the raw parameters of the given rows, in the given order
    pub fn gather(&self, indices: &[usize]) -> SplatResult<SplatRows> {
        let mut rows = SplatRows::with_capacity(indices.len(), self.rest_len);
        for &index in indices {
            rows.push(self.row(index)?);
        }
        Ok(rows)
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn log_scales(&self) -> &[[f32; 3]] {
        &self.log_scales
    }

    pub fn rotations(&self) -> &[[f32; 4]] {
        &self.rotations
    }

    pub fn opacity_logits(&self) -> &[f32] {
        &self.opacity_logits
    }

    pub fn color_dc(&self) -> &[[f32; 3]] {
        &self.color_dc
    }

    pub fn color_rest(&self) -> &[f32] {
        &self.color_rest
    }

    /// `[K][3]` block of higher-order color coefficients for one row
    pub fn rest_block(&self, index: usize) -> &[f32] {
        &self.color_rest[index * self.rest_len..(index + 1) * self.rest_len]
    }

    pub fn params_mut(&mut self) -> SplatParamsMut<'_> {
        SplatParamsMut {
            positions: &mut self.positions,
            log_scales: &mut self.log_scales,
            rotations: &mut self.rotations,
            opacity_logits: &mut self.opacity_logits,
            color_dc: &mut self.color_dc,
            color_rest: &mut self.color_rest,
        }
    }

    pub fn position(&self, index: usize) -> Vec3 {
        Vec3::from_array(self.positions[index])
    }

    /// Activated scale, `exp(log_scale)`
    pub fn scale(&self, index: usize) -> Vec3 {
        Vec3::from_array(self.log_scales[index]).exp()
    }

    /// Largest activated scale axis
    pub fn max_scale(&self, index: usize) -> f32 {
        self.scale(index).max_element()
    }

    /// Rotation normalized at read time
    pub fn rotation(&self, index: usize) -> Quat {
        to_glam_quat(self.rotations[index])
    }

    /// Activated opacity, `sigmoid(opacity_logit)`
    pub fn opacity(&self, index: usize) -> f32 {
        sigmoid(self.opacity_logits[index])
    }

    pub fn filter_radius(&self, index: usize) -> f32 {
        self.filter_radius[index]
    }

    pub fn filter_radii(&self) -> &[f32] {
        &self.filter_radius
    }

    /// Replace every filter radius; the slice must cover the whole population
    pub fn set_filter_radii(&mut self, radii: Vec<f32>) -> SplatResult<()> {
        SplatError::check_len("filter radii", self.len(), radii.len())?;
        self.filter_radius = radii;
        Ok(())
    }

    pub fn effective_scale(&self, index: usize) -> Vec3 {
        effective_scale(self.scale(index), self.filter_radius[index])
    }

    pub fn compensation_coef(&self, index: usize) -> f32 {
        compensation_coef(self.scale(index), self.filter_radius[index])
    }

    pub fn effective_opacity(&self, index: usize) -> f32 {
        self.opacity(index) * self.compensation_coef(index)
    }

    pub fn effective_opacities(&self) -> Vec<f32> {
        (0..self.len()).map(|i| self.effective_opacity(i)).collect()
    }

    pub fn stats(&self) -> &SplatStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SplatStats {
        &mut self.stats
    }

    /// Zero every statistic, keeping one entry per splat
    pub fn reset_statistics(&mut self) {
        self.stats.reset(self.len());
    }

    /// Activated records for a renderer
    pub fn render_splats(&self, use_filter: bool) -> Vec<RenderSplat> {
        (0..self.len())
            .map(|i| {
                let (scale, opacity) = if use_filter {
                    (self.effective_scale(i), self.effective_opacity(i))
                } else {
                    (self.scale(i), self.opacity(i))
                };
                let q = self.rotation(i);
                RenderSplat {
                    pos: self.positions[i],
                    scale: scale.to_array(),
                    rotation: [q.w, q.x, q.y, q.z],
                    color_dc: self.color_dc[i],
                    opacity,
                }
            })
            .collect()
    }

    fn check_index(&self, index: usize) -> SplatResult<()> {
        if index < self.len() {
            Ok(())
        } else {
            Err(SplatError::IndexOutOfRange {
                index,
                len: self.len(),
            })
        }
    }
}

/// Stable in-place compaction of a row-major array with `stride` values per row
///
/// The caller guarantees `values.len() == drop.len() * stride`.
pub fn compact_rows<T: Copy>(values: &mut Vec<T>, stride: usize, drop: &[bool]) {
    let mut write = 0;
    for (read, &dropped) in drop.iter().enumerate() {
        if dropped {
            continue;
        }
        if write != read {
            values.copy_within(read * stride..(read + 1) * stride, write * stride);
        }
        write += 1;
    }
    values.truncate(write * stride);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn splat_at(x: f32, rest_len: usize) -> Splat {
        Splat {
            position: [x, 0.0, 0.0],
            log_scale: [x.ln_1p(); 3],
            rotation: [2.0, 0.0, 0.0, 0.0],
            opacity_logit: x,
            color_dc: [x; 3],
            color_rest: (0..rest_len).map(|k| x * 100.0 + k as f32).collect(),
        }
    }

    fn store_of(n: usize) -> SplatStore {
        let rows: SplatRows = (0..n).map(|i| splat_at(i as f32, 9)).collect();
        SplatStore::from_rows(1, rows).unwrap()
    }

    fn assert_aligned(store: &SplatStore) {
        let n = store.len();
        assert_eq!(store.log_scales().len(), n);
        assert_eq!(store.rotations().len(), n);
        assert_eq!(store.opacity_logits().len(), n);
        assert_eq!(store.color_dc().len(), n);
        assert_eq!(store.color_rest().len(), n * store.rest_len());
        assert_eq!(store.filter_radii().len(), n);
        assert_eq!(store.stats().len(), n);
        assert_eq!(store.stats().grad_count().len(), n);
        assert_eq!(store.stats().max_screen_radius().len(), n);
    }

    #[test]
    fn test_append_returns_new_size() {
        let mut store = SplatStore::new(1);
        assert_eq!(store.rest_len(), 9);
        let rows: SplatRows = (0..3).map(|i| splat_at(i as f32, 9)).collect();
        assert_eq!(store.append(rows).unwrap(), 3);
        let more: SplatRows = (3..5).map(|i| splat_at(i as f32, 9)).collect();
        assert_eq!(store.append(more).unwrap(), 5);
        assert_aligned(&store);
        assert!(store.filter_radii().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn test_append_rejects_bad_batch() {
        let mut store = store_of(2);
        let rows: SplatRows = (0..2).map(|i| splat_at(i as f32, 4)).collect();
        assert!(store.append(rows).is_err());
        assert_eq!(store.len(), 2);
        assert_aligned(&store);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut store = store_of(6);
        let drop = [true, false, false, true, false, true];
        assert_eq!(store.remove_where(&drop).unwrap(), 3);
        assert_aligned(&store);

        let xs: Vec<f32> = store.positions().iter().map(|p| p[0]).collect();
        assert_eq!(xs, vec![1.0, 2.0, 4.0]);
        assert_eq!(store.rest_block(2)[0], 400.0);
        assert_eq!(store.rest_block(1)[8], 208.0);
    }

    #[test]
    fn test_remove_with_keep_mask_conversion() {
        let mut store = store_of(4);
        let keep = [true, false, true, false];
        let drop: Vec<bool> = keep.iter().map(|k| !k).collect();
        store.remove_where(&drop).unwrap();
        let xs: Vec<f32> = store.positions().iter().map(|p| p[0]).collect();
        assert_eq!(xs, vec![0.0, 2.0]);
    }

    #[test]
    fn test_remove_rejects_short_mask() {
        let mut store = store_of(3);
        let err = store.remove_where(&[true, false]).unwrap_err();
        assert!(matches!(err, SplatError::LengthMismatch { expected: 3, actual: 2, .. }));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_statistics_follow_rows() {
        let mut store = store_of(3);
        store.stats_mut().accumulate(2, 0.5).unwrap();
        store.stats_mut().accumulate(2, 0.25).unwrap();
        store.stats_mut().observe_radius(2, 7.0).unwrap();
        store.stats_mut().observe_radius(2, 3.0).unwrap();
        assert!(store.stats_mut().accumulate(3, 1.0).is_err());

        store.remove_where(&[true, false, false]).unwrap();
        assert_eq!(store.stats().grad_accum(), &[0.0, 0.75]);
        assert_eq!(store.stats().grad_count(), &[0, 2]);
        assert_eq!(store.stats().max_screen_radius(), &[0.0, 7.0]);

        let avg = store.stats().average_gradients();
        assert_eq!(avg[0], 0.0);
        assert_relative_eq!(avg[1], 0.375);

        store.reset_statistics();
        assert!(store.stats().grad_accum().iter().all(|&g| g == 0.0));
        assert_aligned(&store);
    }

    #[test]
    fn test_append_zeroes_all_statistics() {
        let mut store = store_of(2);
        store.stats_mut().accumulate(0, 0.5).unwrap();
        store.stats_mut().observe_radius(1, 50.0).unwrap();
        store.remove_where(&[false, false]).unwrap();
        assert_eq!(store.stats().max_screen_radius(), &[0.0, 50.0]);

        let extra = store.gather(&[0]).unwrap();
        store.append(extra).unwrap();
        assert_eq!(store.stats().grad_accum(), &[0.0; 3]);
        assert_eq!(store.stats().grad_count(), &[0; 3]);
        assert_eq!(store.stats().max_screen_radius(), &[0.0; 3]);
        assert_aligned(&store);
    }

    #[test]
    fn test_activation_views() {
        let mut store = SplatStore::new(0);
        let splat = Splat::from_activated(
            [1.0, 2.0, 3.0],
            [0.5, 0.25, 0.125],
            [0.0, 0.0, 2.0, 0.0],
            0.3,
            [0.1, 0.2, 0.3],
            0,
        );
        store.append(SplatRows::from_iter([splat])).unwrap();

        assert_relative_eq!(store.scale(0).x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(store.max_scale(0), 0.5, epsilon = 1e-6);
        assert_relative_eq!(store.opacity(0), 0.3, epsilon = 1e-6);
        assert_relative_eq!(store.rotation(0).y, 1.0, epsilon = 1e-6);
        // reads never normalize storage
        assert_eq!(store.rotations()[0], [0.0, 0.0, 2.0, 0.0]);
        assert_relative_eq!(store.effective_opacity(0), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_filter_radii_length_checked() {
        let mut store = store_of(2);
        assert!(store.set_filter_radii(vec![0.1]).is_err());
        store.set_filter_radii(vec![0.1, 0.2]).unwrap();
        assert_eq!(store.filter_radius(1), 0.2);
        assert!(store.effective_scale(1).x > store.scale(1).x);
    }

    #[test]
    fn test_render_splats_use_filter() {
        let mut store = store_of(2);
        store.set_filter_radii(vec![0.0, 0.5]).unwrap();
        let raw = store.render_splats(false);
        let filtered = store.render_splats(true);
        assert_eq!(raw[0], filtered[0]);
        assert!(filtered[1].opacity < raw[1].opacity);
        assert_relative_eq!(raw[1].rotation[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sh_degree_progression() {
        let mut store = SplatStore::zeros(2, 4);
        assert_eq!(store.len(), 4);
        assert_eq!(store.rest_len(), 24);
        assert_eq!(store.active_sh_degree(), 0);
        store.oneup_sh_degree();
        store.oneup_sh_degree();
        store.oneup_sh_degree();
        assert_eq!(store.active_sh_degree(), 2);
        store.set_active_sh_degree(9);
        assert_eq!(store.active_sh_degree(), 2);
    }
}
