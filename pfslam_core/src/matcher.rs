// pfslam_core/src/matcher.rs

//! Pose correction: the trigger band that decides *when* a particle's predicted
//! pose is refined against its map, and the hill-climbing search that does it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};
use crate::estimator::ScanProbabilityEstimator;
use crate::grid::GridMap;
use crate::pose::{Pose, PoseDelta};
use crate::scan::RangeScan;

// =========================================================================
// == Trigger band ==
// =========================================================================

/// Closed interval `[min, max]` on the magnitude of accumulated motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min < 0.0 {
            return Err(SlamError::config(format!(
                "{} band must be finite and non-negative, got [{}, {}]",
                name, self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(SlamError::config(format!(
                "{} band has min > max ([{}, {}])",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Gates the expensive correction search on how far the robot moved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanMatchTrigger {
    /// Accumulated translation band, metres.
    pub xy: Band,
    /// Accumulated rotation band, radians.
    pub theta: Band,
}

impl Default for ScanMatchTrigger {
    fn default() -> Self {
        Self {
            xy: Band::new(0.6, 0.8),
            theta: Band::new(0.3, 0.4),
        }
    }
}

/// What the trigger decided for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Still below both bands: trust the prediction and keep accumulating.
    Accumulate,
    /// Inside a band: run the correction search, then restart accumulation.
    Correct,
    /// Past a band's upper edge: a correction would be unreliable, trust the
    /// prediction and restart accumulation.
    Overshoot,
}

impl ScanMatchTrigger {
    pub fn validate(&self) -> Result<()> {
        self.xy.validate("trigger.xy")?;
        self.theta.validate("trigger.theta")
    }

    pub fn decide(&self, linear: f64, angular: f64) -> TriggerDecision {
        if linear > self.xy.max || angular > self.theta.max {
            TriggerDecision::Overshoot
        } else if self.xy.contains(linear) || self.theta.contains(angular) {
            TriggerDecision::Correct
        } else {
            TriggerDecision::Accumulate
        }
    }
}

/// Raw odometry travelled since the last correction (or overshoot).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionAccumulator {
    pub linear: f64,
    pub angular: f64,
}

impl MotionAccumulator {
    /// Adds this cycle's raw delta and asks the trigger what to do.
    pub fn advance(&mut self, delta: &PoseDelta, trigger: &ScanMatchTrigger) -> TriggerDecision {
        self.linear += delta.linear();
        self.angular += delta.angular();
        let decision = trigger.decide(self.linear, self.angular);
        if decision != TriggerDecision::Accumulate {
            *self = MotionAccumulator::default();
        }
        decision
    }
}

// =========================================================================
// == Hill-climbing correction ==
// =========================================================================

/// Step sizes and budget of the correction search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Initial translational step, metres.
    pub linear_step: f64,
    /// Initial rotational step, radians.
    pub angular_step: f64,
    /// How many times the steps are halved before giving up.
    pub refinements: u32,
    /// Hard cap on likelihood evaluations per search.
    pub max_iterations: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            linear_step: 0.05,
            angular_step: 0.05,
            refinements: 5,
            max_iterations: 100,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.linear_step.is_finite() && self.linear_step > 0.0)
            || !(self.angular_step.is_finite() && self.angular_step > 0.0)
        {
            return Err(SlamError::config(format!(
                "search steps must be positive, got linear {} / angular {}",
                self.linear_step, self.angular_step
            )));
        }
        if self.max_iterations == 0 {
            return Err(SlamError::config("search.max_iterations must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub pose: Pose,
    pub score: f64,
    pub evaluations: u32,
}

/// Deterministic greedy search over `(x, y, θ)` around a predicted pose.
#[derive(Debug, Clone, Default)]
pub struct HillClimbMatcher {
    config: SearchConfig,
}

impl HillClimbMatcher {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Climbs from `start` toward a better-scoring pose.
    ///
    /// The returned score is never lower than the score of `start`.
    pub fn refine(
        &self,
        start: &Pose,
        scan: &RangeScan,
        map: &GridMap,
        estimator: &dyn ScanProbabilityEstimator,
    ) -> MatchResult {
        let mut best = MatchResult {
            pose: *start,
            score: estimator.likelihood(start, scan, map),
            evaluations: 1,
        };
        let mut linear = self.config.linear_step;
        let mut angular = self.config.angular_step;
        let mut refinements = 0;

        while refinements < self.config.refinements
            && best.evaluations < self.config.max_iterations
        {
            let moves = [
                (linear, 0.0, 0.0),
                (-linear, 0.0, 0.0),
                (0.0, linear, 0.0),
                (0.0, -linear, 0.0),
                (0.0, 0.0, angular),
                (0.0, 0.0, -angular),
            ];

            let mut step_best: Option<(Pose, f64)> = None;
            for (dx, dy, dtheta) in moves {
                if best.evaluations >= self.config.max_iterations {
                    break;
                }
                let candidate = Pose::new(
                    best.pose.x + dx,
                    best.pose.y + dy,
                    best.pose.theta + dtheta,
                );
                let score = estimator.likelihood(&candidate, scan, map);
                best.evaluations += 1;

                let threshold = step_best.map_or(best.score, |(_, s)| s);
                if score > threshold {
                    step_best = Some((candidate, score));
                }
            }

            match step_best {
                Some((pose, score)) => {
                    best.pose = pose;
                    best.score = score;
                }
                None => {
                    linear *= 0.5;
                    angular *= 0.5;
                    refinements += 1;
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::OccupancyModel;
    use crate::estimator::GmappingEstimator;
    use crate::grid::GridGeometry;
    use crate::scan::Beam;

    #[test]
    fn test_trigger_band_decisions() {
        let trigger = ScanMatchTrigger::default();
        assert_eq!(trigger.decide(0.1, 0.0), TriggerDecision::Accumulate);
        assert_eq!(trigger.decide(0.7, 0.0), TriggerDecision::Correct);
        assert_eq!(trigger.decide(0.0, 0.35), TriggerDecision::Correct);
        assert_eq!(trigger.decide(0.9, 0.0), TriggerDecision::Overshoot);
        assert_eq!(trigger.decide(0.7, 0.5), TriggerDecision::Overshoot);
    }

    #[test]
    fn test_accumulator_resets_after_correction() {
        let trigger = ScanMatchTrigger::default();
        let mut acc = MotionAccumulator::default();
        let step = Pose::new(0.25, 0.0, 0.0);
        assert_eq!(acc.advance(&step, &trigger), TriggerDecision::Accumulate);
        assert_eq!(acc.advance(&step, &trigger), TriggerDecision::Accumulate);
        assert_eq!(acc.advance(&step, &trigger), TriggerDecision::Correct);
        assert_eq!(acc, MotionAccumulator::default());
        // A single jump past the band is not corrected.
        assert_eq!(
            acc.advance(&Pose::new(1.5, 0.0, 0.0), &trigger),
            TriggerDecision::Overshoot
        );
        assert_eq!(acc.linear, 0.0);
    }

    #[test]
    fn test_band_validation() {
        let inverted = ScanMatchTrigger {
            xy: Band::new(0.8, 0.6),
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(SlamError::InvalidConfig(_))));
        assert!(ScanMatchTrigger::default().validate().is_ok());
    }

    fn room_map() -> (GridMap, RangeScan) {
        let mut map = GridMap::new(
            GridGeometry {
                resolution: 0.05,
                width: 160,
                height: 160,
                origin: [-4.0, -4.0],
            },
            OccupancyModel::default(),
        );
        // Full sweep inside a 3.0 x 3.0 square centred at the origin.
        let beams: Vec<Beam> = (0..180)
            .map(|i| {
                let bearing = -std::f64::consts::PI + i as f64 * std::f64::consts::PI / 90.0;
                let (c, s) = (bearing.cos().abs(), bearing.sin().abs());
                let range = 1.525 / c.max(s);
                Beam::hit(bearing, range)
            })
            .collect();
        let scan = RangeScan::new(6.0, beams);
        for _ in 0..4 {
            map.integrate_scan(&Pose::IDENTITY, &scan);
        }
        (map, scan)
    }

    #[test]
    fn test_refine_never_worsens_and_recovers_offset() {
        let (map, scan) = room_map();
        let estimator = GmappingEstimator::default();
        let matcher = HillClimbMatcher::default();

        let start = Pose::new(0.08, -0.06, 0.03);
        let start_score = estimator.likelihood(&start, &scan, &map);
        let result = matcher.refine(&start, &scan, &map, &estimator);

        assert!(result.score >= start_score);
        assert!(result.evaluations <= matcher.config().max_iterations);
        let error_before = start.linear();
        let error_after = result.pose.linear();
        assert!(
            error_after < error_before,
            "search moved away: {:?} -> {:?}",
            start,
            result.pose
        );
    }

    #[test]
    fn test_refine_on_blank_map_stays_put() {
        let map = GridMap::new(GridGeometry::default(), OccupancyModel::default());
        let scan = RangeScan::new(6.0, vec![Beam::hit(0.0, 1.0), Beam::hit(1.0, 2.0)]);
        let start = Pose::new(0.5, 0.5, 0.1);
        let result = HillClimbMatcher::default().refine(
            &start,
            &scan,
            &map,
            &GmappingEstimator::default(),
        );
        assert_eq!(result.pose, start);
    }
}
