//! Multi-view 3D smoothing filter
//!
//! Each splat gets a world-space filter radius equal to the footprint of one
//! pixel at the closest depth any camera sees it from, scaled by
//! `sqrt(FILTER_VARIANCE)`. The radius band-limits the splat through
//! [`mipsplat_data::splat::effective_scale`] and
//! [`mipsplat_data::splat::compensation_coef`].

use glam::Vec3;
use rayon::prelude::*;

use mipsplat_data::SplatStore;

use crate::camera::Viewpoint;
use crate::error::{TrainError, TrainResult};

/// Points closer than this to the image plane are ignored
pub const MIN_DEPTH: f32 = 0.2;
/// Fraction of the image size tolerated outside each border
pub const SCREEN_MARGIN: f32 = 0.15;
/// Variance of the one-pixel box filter approximated by a Gaussian
pub const FILTER_VARIANCE: f32 = 0.2;

#[derive(Clone, Debug)]
pub struct VisibilityFilter {
    pub min_depth: f32,
    pub screen_margin: f32,
    pub filter_variance: f32,
}

impl Default for VisibilityFilter {
    fn default() -> Self {
        Self {
            min_depth: MIN_DEPTH,
            screen_margin: SCREEN_MARGIN,
            filter_variance: FILTER_VARIANCE,
        }
    }
}

/// Outcome of one filter computation
#[derive(Clone, Debug, PartialEq)]
pub struct FilterSummary {
    pub seen: usize,
    pub unseen: usize,
    pub max_focal: f32,
    /// Depth assigned to splats no viewpoint sees
    pub fallback_depth: f32,
}

impl VisibilityFilter {
    /// Filter radius for every position
    pub fn compute(
        &self,
        positions: &[[f32; 3]],
        viewpoints: &[Viewpoint],
    ) -> TrainResult<(Vec<f32>, FilterSummary)> {
        if viewpoints.is_empty() {
            return Err(TrainError::NoViewpoints);
        }

        let n = positions.len();
        let mut nearest = vec![f32::INFINITY; n];
        let mut seen = vec![false; n];
        let mut max_focal = 0.0f32;

        for view in viewpoints {
            let rotation = view.rotation_matrix();
            let translation = Vec3::from_array(view.translation);
            let (w, h) = (view.width as f32, view.height as f32);
            let (x_min, x_max) = (-self.screen_margin * w, (1.0 + self.screen_margin) * w);
            let (y_min, y_max) = (-self.screen_margin * h, (1.0 + self.screen_margin) * h);

            nearest
                .par_iter_mut()
                .zip(seen.par_iter_mut())
                .zip(positions.par_iter())
                .for_each(|((depth, seen), pos)| {
                    let cam = rotation * Vec3::from_array(*pos) + translation;
                    if cam.z <= self.min_depth {
                        return;
                    }
                    let pixel = view.project(cam);
                    let in_screen = pixel.x >= x_min
                        && pixel.x <= x_max
                        && pixel.y >= y_min
                        && pixel.y <= y_max;
                    if in_screen {
                        *depth = depth.min(cam.z);
                        *seen = true;
                    }
                });

            max_focal = max_focal.max(view.focal_x);
        }

        if max_focal <= 0.0 {
            return Err(TrainError::Config(format!(
                "viewpoints need a positive focal length, max was {max_focal}"
            )));
        }

        let seen_count = seen.iter().filter(|&&s| s).count();
        if n > 0 && seen_count == 0 {
            return Err(TrainError::NoVisibleSplats(n));
        }

        // Heuristic: unseen splats borrow the farthest nearest-depth among seen ones.
        let fallback_depth = nearest
            .iter()
            .zip(&seen)
            .filter(|(_, &s)| s)
            .map(|(&d, _)| d)
            .fold(0.0f32, f32::max);

        let sigma = self.filter_variance.sqrt();
        let radii = nearest
            .iter()
            .zip(&seen)
            .map(|(&d, &s)| {
                let depth = if s { d } else { fallback_depth };
                depth / max_focal * sigma
            })
            .collect();

        let summary = FilterSummary {
            seen: seen_count,
            unseen: n - seen_count,
            max_focal,
            fallback_depth,
        };
        Ok((radii, summary))
    }

    /// Recompute and store the filter radius of every splat in `store`
    pub fn apply(&self, store: &mut SplatStore, viewpoints: &[Viewpoint]) -> TrainResult<FilterSummary> {
        let (radii, summary) = self.compute(store.positions(), viewpoints)?;
        store.set_filter_radii(radii)?;
        tracing::info!(
            "3D filter: {} seen, {} unseen (fallback depth {:.4}), max focal {:.1}",
            summary.seen,
            summary.unseen,
            summary.fallback_depth,
            summary.max_focal
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Mat3;

    /// Identity-pose camera looking down +z
    fn axis_camera(focal: f32) -> Viewpoint {
        Viewpoint::new(Mat3::IDENTITY, Vec3::ZERO, focal, focal, 100, 100)
    }

    #[test]
    fn test_single_view_radius() {
        let positions = [[0.0, 0.0, 4.0]];
        let (radii, summary) = VisibilityFilter::default()
            .compute(&positions, &[axis_camera(500.0)])
            .unwrap();
        assert_eq!(summary.seen, 1);
        assert_eq!(radii[0], 4.0 / 500.0 * 0.2f32.sqrt());
    }

    #[test]
    fn test_nearest_depth_and_max_focal() {
        let positions = [[0.0, 0.0, 4.0]];
        let near = Viewpoint::new(Mat3::IDENTITY, Vec3::new(0.0, 0.0, -2.0), 300.0, 300.0, 100, 100);
        let (radii, summary) = VisibilityFilter::default()
            .compute(&positions, &[axis_camera(500.0), near])
            .unwrap();
        assert_eq!(summary.max_focal, 500.0);
        assert_relative_eq!(radii[0], 2.0 / 500.0 * 0.2f32.sqrt(), max_relative = 1e-6);
    }

    #[test]
    fn test_depth_clamp_and_margin() {
        let positions = [
            [0.0, 0.0, 0.1],  // too close
            [0.0, 0.0, -3.0], // behind
            [0.6, 0.0, 1.0],  // x = 0.6 * 100 + 50 = 110 <= 115, inside margin
            [0.7, 0.0, 1.0],  // x = 120 > 115, outside
            [0.0, 0.0, 8.0],
        ];
        let (radii, summary) = VisibilityFilter::default()
            .compute(&positions, &[axis_camera(100.0)])
            .unwrap();
        assert_eq!(summary.seen, 2);
        assert_eq!(summary.unseen, 3);
        assert_eq!(summary.fallback_depth, 8.0);

        let unit = 0.2f32.sqrt() / 100.0;
        assert_relative_eq!(radii[2], 1.0 * unit, max_relative = 1e-6);
        for i in [0, 1, 3, 4] {
            assert_relative_eq!(radii[i], 8.0 * unit, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_errors() {
        let filter = VisibilityFilter::default();
        assert!(matches!(
            filter.compute(&[[0.0, 0.0, 1.0]], &[]),
            Err(TrainError::NoViewpoints)
        ));
        assert!(matches!(
            filter.compute(&[[0.0, 0.0, -1.0]], &[axis_camera(10.0)]),
            Err(TrainError::NoVisibleSplats(1))
        ));
        let (radii, _) = filter.compute(&[], &[axis_camera(10.0)]).unwrap();
        assert!(radii.is_empty());
    }

    #[test]
    fn test_apply_writes_store() {
        let mut store = SplatStore::zeros(0, 2);
        store.params_mut().positions[0] = [0.0, 0.0, 2.0];
        store.params_mut().positions[1] = [0.0, 0.0, 3.0];
        VisibilityFilter::default()
            .apply(&mut store, &[axis_camera(200.0)])
            .unwrap();
        assert!(store.filter_radius(0) > 0.0);
        assert!(store.filter_radius(1) > store.filter_radius(0));
    }
}
