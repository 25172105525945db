// pfslam_sim/src/error.rs

use std::path::PathBuf;

use pfslam_core::error::SlamError;
use thiserror::Error;

/// Everything that can stop a simulation run.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("failed to load scenario configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error(transparent)]
    Slam(#[from] SlamError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize the resolved scenario: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to spawn the {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("the {0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl SimError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn scenario(msg: impl Into<String>) -> Self {
        SimError::InvalidScenario(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
