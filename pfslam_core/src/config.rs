// pfslam_core/src/config.rs

use serde::{Deserialize, Serialize};

use crate::cell::OccupancyModel;
use crate::error::{Result, SlamError};
use crate::estimator::EstimatorConfig;
use crate::grid::GridGeometry;
use crate::matcher::{ScanMatchTrigger, SearchConfig};
use crate::particles::{MotionNoise, ResamplingConfig};
use crate::pose::Pose;

// =========================================================================
// == Top-Level Filter Configuration ==
// =========================================================================

/// Everything needed to build a [`crate::filter::GmappingFilter`].
///
/// Every section falls back to its `Default`, so a config file only has to
/// name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Number of particles (N). Fixed for the lifetime of the filter.
    pub particles: usize,
    /// Seeds the master random stream; every particle stream derives from it.
    pub seed: u64,
    /// Pose every particle starts from.
    pub initial_pose: Pose,
    pub motion: MotionNoise,
    pub trigger: ScanMatchTrigger,
    pub grid: GridGeometry,
    pub occupancy: OccupancyModel,
    pub estimator: EstimatorConfig,
    pub search: SearchConfig,
    pub resampling: ResamplingConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            particles: 30,
            seed: 0,
            initial_pose: Pose::IDENTITY,
            motion: MotionNoise::default(),
            trigger: ScanMatchTrigger::default(),
            grid: GridGeometry::default(),
            occupancy: OccupancyModel::default(),
            estimator: EstimatorConfig::default(),
            search: SearchConfig::default(),
            resampling: ResamplingConfig::default(),
        }
    }
}

impl FilterConfig {
    /// Checks every section; the first problem found is reported.
    pub fn validate(&self) -> Result<()> {
        if self.particles == 0 {
            return Err(SlamError::config("particles must be at least 1"));
        }
        if !self.initial_pose.is_finite() {
            return Err(SlamError::config(format!(
                "initial_pose must be finite, got {:?}",
                self.initial_pose
            )));
        }
        self.motion.validate()?;
        self.trigger.validate()?;
        self.grid.validate()?;
        self.occupancy.validate()?;
        self.estimator.validate()?;
        self.search.validate()?;
        self.resampling.validate()
    }
}
