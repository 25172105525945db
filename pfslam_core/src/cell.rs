// pfslam_core/src/cell.rs

//! Per-cell occupancy evidence and the rule that turns it into a probability.
//!
//! Evidence is accumulated in log-odds form:
//!
//! ```text
//! l = ln(p / (1 - p))        p = 1 / (1 + exp(-l))
//! l_new = clamp(l_old + l_observation)
//! ```
//!
//! Additions commute, so the order in which beams touch a cell does not matter
//! until the clamp bounds are reached.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};

/// Evidence accumulated for one raster cell.
///
/// The occupancy probability is never stored; it is always recomputed from
/// `log_odds` by [`OccupancyModel::occupancy`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cell {
    pub log_odds: f32,
    /// Number of rays that touched this cell.
    pub observations: u32,
}

impl Cell {
    pub fn is_known(&self) -> bool {
        self.observations > 0
    }
}

/// What a traced ray says about a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayOutcome {
    /// The beam ended in this cell.
    Hit,
    /// The beam passed through this cell.
    Miss,
}

/// Three-way classification used by ray casting and map export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Unknown,
    Free,
    Occupied,
}

/// The occupancy cell model: inverse sensor model parameters plus clamp bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OccupancyModel {
    /// Probability that a cell is occupied given a beam ended in it.
    pub hit_probability: f64,
    /// Probability that a cell is occupied given a beam passed through it.
    pub miss_probability: f64,
    /// Lower log-odds clamp; keeps free cells able to become occupied again.
    pub log_odds_min: f32,
    /// Upper log-odds clamp.
    pub log_odds_max: f32,
    /// Cells with occupancy above this are treated as obstacles.
    pub occupied_threshold: f64,
}

impl Default for OccupancyModel {
    fn default() -> Self {
        Self {
            hit_probability: 0.7,
            miss_probability: 0.4,
            log_odds_min: -20.0,
            log_odds_max: 20.0,
            occupied_threshold: 0.5,
        }
    }
}

fn log_odds(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

impl OccupancyModel {
    pub fn validate(&self) -> Result<()> {
        if !(self.hit_probability > 0.5 && self.hit_probability < 1.0) {
            return Err(SlamError::config(format!(
                "occupancy.hit_probability must lie in (0.5, 1), got {}",
                self.hit_probability
            )));
        }
        if !(self.miss_probability > 0.0 && self.miss_probability < 0.5) {
            return Err(SlamError::config(format!(
                "occupancy.miss_probability must lie in (0, 0.5), got {}",
                self.miss_probability
            )));
        }
        if !(self.log_odds_min < 0.0 && self.log_odds_max > 0.0) {
            return Err(SlamError::config(format!(
                "occupancy log-odds clamp must straddle zero, got [{}, {}]",
                self.log_odds_min, self.log_odds_max
            )));
        }
        if !(self.occupied_threshold >= 0.5 && self.occupied_threshold < 1.0) {
            return Err(SlamError::config(format!(
                "occupancy.occupied_threshold must lie in [0.5, 1), got {}",
                self.occupied_threshold
            )));
        }
        Ok(())
    }

    /// Log-odds increment applied for a ray outcome.
    pub fn increment(&self, outcome: RayOutcome) -> f32 {
        match outcome {
            RayOutcome::Hit => log_odds(self.hit_probability) as f32,
            RayOutcome::Miss => log_odds(self.miss_probability) as f32,
        }
    }

    /// Returns the cell state after integrating one more ray outcome.
    pub fn update(&self, cell: Cell, outcome: RayOutcome) -> Cell {
        let log_odds = (cell.log_odds + self.increment(outcome))
            .clamp(self.log_odds_min, self.log_odds_max);
        Cell {
            log_odds,
            observations: cell.observations.saturating_add(1),
        }
    }

    /// Occupancy probability in [0, 1]; exactly 0.5 for a cell with no evidence.
    pub fn occupancy(&self, cell: &Cell) -> f64 {
        1.0 / (1.0 + (-(cell.log_odds as f64)).exp())
    }

    pub fn classify(&self, cell: &Cell) -> CellState {
        let p = self.occupancy(cell);
        if p > self.occupied_threshold {
            CellState::Occupied
        } else if cell.is_known() && p < 0.5 {
            CellState::Free
        } else {
            CellState::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_empty_cell_is_neutral() {
        let model = OccupancyModel::default();
        assert_eq!(model.occupancy(&Cell::default()), 0.5);
        assert_eq!(model.classify(&Cell::default()), CellState::Unknown);
    }

    #[test]
    fn test_repeated_hits_increase_occupancy_toward_one() {
        let model = OccupancyModel::default();
        let mut cell = Cell::default();
        let mut last = model.occupancy(&cell);
        for _ in 0..10 {
            cell = model.update(cell, RayOutcome::Hit);
            let p = model.occupancy(&cell);
            assert!(p > last, "occupancy did not increase: {} -> {}", last, p);
            last = p;
        }
        assert!(last > 0.99);
        assert_eq!(model.classify(&cell), CellState::Occupied);
    }

    #[test]
    fn test_repeated_misses_decrease_occupancy_toward_zero() {
        let model = OccupancyModel::default();
        let mut cell = Cell::default();
        let mut last = model.occupancy(&cell);
        for _ in 0..15 {
            cell = model.update(cell, RayOutcome::Miss);
            let p = model.occupancy(&cell);
            assert!(p < last, "occupancy did not decrease: {} -> {}", last, p);
            last = p;
        }
        assert!(last < 0.01);
        assert_eq!(model.classify(&cell), CellState::Free);
    }

    #[test]
    fn test_evidence_order_does_not_matter() {
        let model = OccupancyModel::default();
        let a = [RayOutcome::Hit, RayOutcome::Miss, RayOutcome::Miss, RayOutcome::Hit];
        let b = [RayOutcome::Miss, RayOutcome::Hit, RayOutcome::Hit, RayOutcome::Miss];
        let fold = |outcomes: &[RayOutcome]| {
            outcomes
                .iter()
                .fold(Cell::default(), |cell, o| model.update(cell, *o))
        };
        assert_abs_diff_eq!(
            model.occupancy(&fold(&a)),
            model.occupancy(&fold(&b)),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_log_odds_are_clamped() {
        let model = OccupancyModel {
            log_odds_max: 2.0,
            ..Default::default()
        };
        let cell = (0..100).fold(Cell::default(), |c, _| model.update(c, RayOutcome::Hit));
        assert_eq!(cell.log_odds, 2.0);
        assert_eq!(cell.observations, 100);
    }

    #[test]
    fn test_validate_rejects_inverted_probabilities() {
        let model = OccupancyModel {
            hit_probability: 0.3,
            ..Default::default()
        };
        assert!(matches!(model.validate(), Err(SlamError::InvalidConfig(_))));
        assert!(OccupancyModel::default().validate().is_ok());
    }
}
