// pfslam_sim/src/lib.rs

// This prelude is for convenience for binaries and tests using the harness.
pub mod prelude;

// Configuration and command line.
pub mod cli;
pub mod config;
pub mod error;

// The simulated robot and its sensors.
pub mod sensors;
pub mod world;

// The run itself.
pub mod observer;
pub mod pipeline;
pub mod publish;
