// pfslam_core/src/error.rs

use thiserror::Error;

/// Failures the particle filter can report.
///
/// Everything else (malformed beams, beams leaving the raster) is absorbed
/// locally and never surfaces as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlamError {
    /// Rejected at construction time; no filter is instantiated.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every particle scored zero likelihood, so no valid distribution is left.
    #[error("particle weights degenerated at cycle {cycle}: every hypothesis has zero likelihood")]
    DegenerateWeights { cycle: u64 },
}

impl SlamError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SlamError::InvalidConfig(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SlamError>;
