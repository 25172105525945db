// pfslam_core/src/lib.rs

// Grid-based SLAM with a Rao-Blackwellized particle filter. Each particle
// carries a pose hypothesis and the occupancy map built along its trajectory.
pub mod cell;
pub mod config;
pub mod error;
pub mod estimator;
pub mod filter;
pub mod grid;
pub mod matcher;
pub mod particles;
pub mod pose;
pub mod prelude;
pub mod scan;
