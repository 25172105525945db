// pfslam_core/src/estimator.rs

use dyn_clone::DynClone;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{Result, SlamError};
use crate::grid::GridMap;
use crate::pose::Pose;
use crate::scan::RangeScan;

// --- The Estimator Trait ("Contract") ---
/// Scores how well a scan taken from `pose` agrees with a particle's map.
///
/// Implementations must be deterministic and return a log-probability `<= 0`
/// (higher is a better fit). The score is a *sum* over beams, so scans with
/// more informative beams carry proportionally more weight.
pub trait ScanProbabilityEstimator: DynClone + Debug + Send + Sync {
    fn likelihood(&self, pose: &Pose, scan: &RangeScan, map: &GridMap) -> f64;
}

// Make the trait object cloneable.
dyn_clone::clone_trait_object!(ScanProbabilityEstimator);

/// Tuning for [`GmappingEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimatorConfig {
    /// Half-width, in cells, of the square searched around each beam endpoint.
    pub window_radius: usize,
    /// Standard deviation (metres) of the endpoint-to-obstacle distance.
    pub sigma: f64,
    /// Use every `beam_skip`-th valid beam.
    pub beam_skip: usize,
    /// Score of a beam without an echo. Zero keeps open space neutral.
    pub no_return_score: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window_radius: 1,
            sigma: 0.05,
            beam_skip: 1,
            no_return_score: 0.0,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(SlamError::config(format!(
                "estimator.sigma must be positive, got {}",
                self.sigma
            )));
        }
        if self.beam_skip == 0 {
            return Err(SlamError::config("estimator.beam_skip must be at least 1"));
        }
        if !(self.no_return_score.is_finite() && self.no_return_score <= 0.0) {
            return Err(SlamError::config(format!(
                "estimator.no_return_score must be a finite log-probability (<= 0), got {}",
                self.no_return_score
            )));
        }
        Ok(())
    }
}

/// Gmapping-style endpoint likelihood.
///
/// Each echo is projected into the map; the closest occupied cell inside a small
/// window around the endpoint yields a Gaussian score on the distance. Beams
/// that find nothing are charged a fixed penalty that is strictly worse than
/// any in-window match.
#[derive(Debug, Clone, Default)]
pub struct GmappingEstimator {
    config: EstimatorConfig,
}

impl GmappingEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    fn gaussian(&self, distance_sq: f64) -> f64 {
        -distance_sq / (2.0 * self.config.sigma * self.config.sigma)
    }

    /// Penalty for an endpoint with no occupied cell nearby.
    ///
    /// Every cell centre of the window lies within `√2·(w + ½)` cells of the
    /// endpoint, so using `√2·(w + 1)` keeps a miss below every possible match.
    pub fn unmatched_score(&self, resolution: f64) -> f64 {
        let reach = (self.config.window_radius as f64 + 1.0) * resolution;
        self.gaussian(2.0 * reach * reach)
    }

    fn endpoint_score(&self, endpoint: &Point2<f64>, map: &GridMap) -> f64 {
        let geometry = map.geometry();
        let Some(centre) = geometry.world_to_cell(endpoint) else {
            return self.unmatched_score(geometry.resolution);
        };
        let (cx, cy) = (centre.x as i64, centre.y as i64);
        let w = self.config.window_radius as i64;

        let mut best_sq = f64::INFINITY;
        for dy in -w..=w {
            for dx in -w..=w {
                let Some(index) = geometry.checked_index(cx + dx, cy + dy) else {
                    continue;
                };
                if !map.is_occupied(index) {
                    continue;
                }
                let d_sq = (geometry.cell_to_world(index) - endpoint).norm_squared();
                if d_sq < best_sq {
                    best_sq = d_sq;
                }
            }
        }

        if best_sq.is_finite() {
            self.gaussian(best_sq)
        } else {
            self.unmatched_score(geometry.resolution)
        }
    }
}

impl ScanProbabilityEstimator for GmappingEstimator {
    fn likelihood(&self, pose: &Pose, scan: &RangeScan, map: &GridMap) -> f64 {
        if !pose.is_finite() {
            return f64::NEG_INFINITY;
        }
        scan.valid_beams()
            .step_by(self.config.beam_skip.max(1))
            .map(|beam| {
                if scan.is_echo(beam) {
                    self.endpoint_score(&pose.project(beam.bearing, beam.range), map)
                } else {
                    self.config.no_return_score
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::OccupancyModel;
    use crate::grid::GridGeometry;
    use crate::scan::Beam;

    // Walls sit on a cell centre line so that endpoints never straddle a cell border.
    const WALL_X: f64 = 2.025;

    fn wall_scan(x: f64) -> RangeScan {
        let beams = (-10..=10)
            .map(|i| {
                let bearing = i as f64 * 0.02;
                Beam::hit(bearing, x / bearing.cos())
            })
            .collect();
        RangeScan::new(8.0, beams)
    }

    fn map_with_wall_at(x: f64) -> GridMap {
        let mut map = GridMap::new(
            GridGeometry {
                resolution: 0.05,
                width: 200,
                height: 200,
                origin: [-5.0, -5.0],
            },
            OccupancyModel::default(),
        );
        let scan = wall_scan(x);
        for _ in 0..3 {
            map.integrate_scan(&Pose::IDENTITY, &scan);
        }
        map
    }

    #[test]
    fn test_empty_scan_is_indifferent() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        assert_eq!(
            estimator.likelihood(&Pose::IDENTITY, &RangeScan::empty(8.0), &map),
            0.0
        );
        let invalid_only = RangeScan::new(8.0, vec![Beam::hit(f64::NAN, 1.0)]);
        assert_eq!(estimator.likelihood(&Pose::IDENTITY, &invalid_only, &map), 0.0);
    }

    #[test]
    fn test_likelihood_is_non_positive_and_deterministic() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        let scan = wall_scan(WALL_X);
        let a = estimator.likelihood(&Pose::IDENTITY, &scan, &map);
        let b = estimator.likelihood(&Pose::IDENTITY, &scan, &map);
        assert!(a <= 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_matching_pose_scores_higher_than_shifted_pose() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        let scan = wall_scan(WALL_X);
        let aligned = estimator.likelihood(&Pose::IDENTITY, &scan, &map);
        let shifted = estimator.likelihood(&Pose::new(0.3, 0.0, 0.0), &scan, &map);
        assert!(aligned > shifted, "aligned {} <= shifted {}", aligned, shifted);
        // Fully unmatched scan pays the penalty on every beam.
        let penalty = estimator.unmatched_score(0.05) * scan.len() as f64;
        assert!((shifted - penalty).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_a_sum_over_beams() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        let one = RangeScan::new(8.0, vec![Beam::hit(0.0, 3.0)]);
        let two = RangeScan::new(8.0, vec![Beam::hit(0.0, 3.0), Beam::hit(0.0, 3.0)]);
        let l1 = estimator.likelihood(&Pose::IDENTITY, &one, &map);
        let l2 = estimator.likelihood(&Pose::IDENTITY, &two, &map);
        assert!(l1 < 0.0);
        assert!((l2 - 2.0 * l1).abs() < 1e-12);
    }

    #[test]
    fn test_no_return_beams_are_neutral() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        let scan = RangeScan::new(8.0, vec![Beam::no_return(0.0), Beam::hit(0.0, 9.0)]);
        assert_eq!(estimator.likelihood(&Pose::IDENTITY, &scan, &map), 0.0);
    }

    #[test]
    fn test_beam_skip_subsamples() {
        let estimator = GmappingEstimator::new(EstimatorConfig {
            beam_skip: 2,
            ..Default::default()
        });
        let map = map_with_wall_at(WALL_X);
        let scan = RangeScan::new(8.0, vec![Beam::hit(0.0, 3.0); 5]);
        let full = GmappingEstimator::default().likelihood(&Pose::IDENTITY, &scan, &map);
        let skipped = estimator.likelihood(&Pose::IDENTITY, &scan, &map);
        assert!((skipped - full * 3.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_off_raster_endpoint_pays_the_penalty() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        let penalty = estimator.unmatched_score(0.05);

        let far = RangeScan::new(f64::MAX, vec![Beam::hit(0.0, 1e300)]);
        assert_eq!(estimator.likelihood(&Pose::IDENTITY, &far, &map), penalty);

        // Just past the raster border.
        let edge = RangeScan::new(20.0, vec![Beam::hit(0.0, 5.01)]);
        assert_eq!(estimator.likelihood(&Pose::IDENTITY, &edge, &map), penalty);
    }

    #[test]
    fn test_matched_beam_beats_unmatched_penalty() {
        let estimator = GmappingEstimator::default();
        let map = map_with_wall_at(WALL_X);
        // Endpoint a little off the wall, still inside the search window.
        let near = RangeScan::new(8.0, vec![Beam::hit(0.0, 2.07)]);
        let score = estimator.likelihood(&Pose::IDENTITY, &near, &map);
        assert!(score > estimator.unmatched_score(0.05));
    }
}
