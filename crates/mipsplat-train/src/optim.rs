//! Per-parameter optimizer moments mirrored row-for-row with the splat store
//!
//! The update rule itself belongs to whatever drives the optimization; this
//! module owns the first/second moment arrays and keeps them aligned with
//! the population when rows are appended or removed.

use mipsplat_data::{compact_rows, SplatError, SplatResult};

/// Parameter groups, one per raw splat array
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamGroup {
    Position,
    ColorDc,
    ColorRest,
    Opacity,
    Scaling,
    Rotation,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 6] = [
        ParamGroup::Position,
        ParamGroup::ColorDc,
        ParamGroup::ColorRest,
        ParamGroup::Opacity,
        ParamGroup::Scaling,
        ParamGroup::Rotation,
    ];

    /// Floats per row for this group
    pub fn width(self, rest_len: usize) -> usize {
        match self {
            ParamGroup::Position | ParamGroup::ColorDc | ParamGroup::Scaling => 3,
            ParamGroup::ColorRest => rest_len,
            ParamGroup::Opacity => 1,
            ParamGroup::Rotation => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamGroup::Position => "xyz",
            ParamGroup::ColorDc => "f_dc",
            ParamGroup::ColorRest => "f_rest",
            ParamGroup::Opacity => "opacity",
            ParamGroup::Scaling => "scaling",
            ParamGroup::Rotation => "rotation",
        }
    }
}

/// Contract for optimizer state that must track population changes
///
/// Both calls happen in the same transaction as the matching store mutation;
/// see [`crate::model::GaussianModel`], the single call site.
pub trait OptimizerStateBridge {
    /// Rows currently mirrored
    fn rows(&self) -> usize;

    /// Extend every group with `count` zeroed rows
    fn on_append(&mut self, count: usize);

    /// Drop the rows marked `true`, compacting like the store does
    fn on_remove(&mut self, drop: &[bool]) -> SplatResult<()>;

    /// Every value of `group` was overwritten in place; row count is unchanged
    fn on_replace(&mut self, _group: ParamGroup) {}
}

/// First and second moments of one parameter group
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MomentState {
    width: usize,
    pub exp_avg: Vec<f32>,
    pub exp_avg_sq: Vec<f32>,
}

impl MomentState {
    pub fn zeros(width: usize, rows: usize) -> Self {
        Self {
            width,
            exp_avg: vec![0.0; width * rows],
            exp_avg_sq: vec![0.0; width * rows],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.exp_avg.len() / self.width
        }
    }

    fn extend_zeros(&mut self, count: usize) {
        let len = self.exp_avg.len() + count * self.width;
        self.exp_avg.resize(len, 0.0);
        self.exp_avg_sq.resize(len, 0.0);
    }

    fn compact(&mut self, drop: &[bool]) {
        compact_rows(&mut self.exp_avg, self.width, drop);
        compact_rows(&mut self.exp_avg_sq, self.width, drop);
    }

    fn zero(&mut self) {
        self.exp_avg.fill(0.0);
        self.exp_avg_sq.fill(0.0);
    }
}

/// Adam moment buffers for every parameter group
#[derive(Clone, Debug, PartialEq)]
pub struct AdamState {
    rows: usize,
    groups: Vec<(ParamGroup, MomentState)>,
}

impl AdamState {
    /// Zeroed state for `rows` splats with `rest_len` color_rest floats each
    pub fn new(rows: usize, rest_len: usize) -> Self {
        let groups = ParamGroup::ALL
            .iter()
            .map(|&g| (g, MomentState::zeros(g.width(rest_len), rows)))
            .collect();
        Self { rows, groups }
    }

    pub fn group(&self, group: ParamGroup) -> &MomentState {
        &self.groups[Self::slot(group)].1
    }

    /// Moments of one group for an external update rule; lengths are fixed
    pub fn moments_mut(&mut self, group: ParamGroup) -> (&mut [f32], &mut [f32]) {
        let state = &mut self.groups[Self::slot(group)].1;
        (state.exp_avg.as_mut_slice(), state.exp_avg_sq.as_mut_slice())
    }

    /// Zero one group's moments without resizing, e.g. after its values were replaced
    pub fn reset_group(&mut self, group: ParamGroup) {
        self.groups[Self::slot(group)].1.zero();
    }

    // groups are stored in `ParamGroup::ALL` order
    fn slot(group: ParamGroup) -> usize {
        group as usize
    }
}

impl OptimizerStateBridge for AdamState {
    fn rows(&self) -> usize {
        self.rows
    }

    fn on_append(&mut self, count: usize) {
        for (_, state) in &mut self.groups {
            state.extend_zeros(count);
        }
        self.rows += count;
    }

    fn on_remove(&mut self, drop: &[bool]) -> SplatResult<()> {
        SplatError::check_len("optimizer removal mask", self.rows, drop.len())?;
        for (_, state) in &mut self.groups {
            state.compact(drop);
        }
        self.rows -= drop.iter().filter(|&&d| d).count();
        Ok(())
    }

    fn on_replace(&mut self, group: ParamGroup) {
        self.reset_group(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_group_rows(state: &AdamState, rows: usize) {
        assert_eq!(state.rows(), rows);
        for group in ParamGroup::ALL {
            let m = state.group(group);
            assert_eq!(m.exp_avg.len(), rows * m.width(), "{}", group.name());
            assert_eq!(m.exp_avg_sq.len(), rows * m.width(), "{}", group.name());
        }
    }

    #[test]
    fn test_group_widths() {
        assert_eq!(ParamGroup::ColorRest.width(45), 45);
        assert_eq!(ParamGroup::Rotation.width(45), 4);
        assert_eq!(ParamGroup::Opacity.width(45), 1);
    }

    #[test]
    fn test_append_zero_rows() {
        let mut state = AdamState::new(2, 9);
        state.moments_mut(ParamGroup::Position).0.fill(1.0);
        state.on_append(3);
        assert_group_rows(&state, 5);

        let pos = state.group(ParamGroup::Position);
        assert!(pos.exp_avg[..6].iter().all(|&v| v == 1.0));
        assert!(pos.exp_avg[6..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_remove_compacts_in_order() {
        let mut state = AdamState::new(4, 3);
        {
            let (avg, avg_sq) = state.moments_mut(ParamGroup::Rotation);
            for (i, v) in avg.iter_mut().enumerate() {
                *v = (i / 4) as f32;
            }
            avg_sq.fill(2.0);
        }
        state.on_remove(&[false, true, false, true]).unwrap();
        assert_group_rows(&state, 2);

        let rot = state.group(ParamGroup::Rotation);
        assert_eq!(&rot.exp_avg[..4], &[0.0; 4]);
        assert_eq!(&rot.exp_avg[4..], &[2.0; 4]);
        assert!(rot.exp_avg_sq.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_remove_rejects_wrong_mask() {
        let mut state = AdamState::new(3, 0);
        assert!(state.on_remove(&[true]).is_err());
        assert_group_rows(&state, 3);
    }

    #[test]
    fn test_reset_group_keeps_length() {
        let mut state = AdamState::new(3, 0);
        state.moments_mut(ParamGroup::Opacity).0.fill(0.5);
        state.moments_mut(ParamGroup::Scaling).1.fill(0.5);
        state.reset_group(ParamGroup::Opacity);
        assert_group_rows(&state, 3);
        assert!(state.group(ParamGroup::Opacity).exp_avg.iter().all(|&v| v == 0.0));
        assert!(state.group(ParamGroup::Scaling).exp_avg_sq.iter().all(|&v| v == 0.5));
    }
}
