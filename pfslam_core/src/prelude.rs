// pfslam_core/src/prelude.rs

// --- Core Abstractions ---
pub use crate::estimator::ScanProbabilityEstimator;

// --- Core Data Structures ---
pub use crate::cell::{Cell, CellState, OccupancyModel, RayOutcome};
pub use crate::grid::{CellIndex, GridGeometry, GridMap};
pub use crate::pose::{normalize_angle, Pose, PoseDelta};
pub use crate::scan::{Beam, RangeScan};

// --- Configuration ---
pub use crate::config::FilterConfig;
pub use crate::estimator::EstimatorConfig;
pub use crate::matcher::{Band, ScanMatchTrigger, SearchConfig};
pub use crate::particles::{Gaussian, MotionNoise, ResamplingConfig};

// --- The Filter ---
pub use crate::error::{Result, SlamError};
pub use crate::estimator::GmappingEstimator;
pub use crate::filter::{BestParticle, CycleReport, GmappingFilter};
