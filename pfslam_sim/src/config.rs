// pfslam_sim/src/config.rs

//! Scenario configuration: built-in defaults, overridden by a TOML file,
//! overridden by `PFSLAM_*` environment variables.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use log::info;
use pfslam_core::config::FilterConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::observer::GateConfig;
use crate::publish::OutputConfig;
use crate::sensors::{LidarModel, OdometryModel};
use crate::world::{DriverConfig, World};

/// Environment overrides use this prefix and `__` between nested keys,
/// e.g. `PFSLAM_FILTER__PARTICLES=50`.
pub const ENV_PREFIX: &str = "PFSLAM_";

// =========================================================================
// == Top-Level Scenario ==
// =========================================================================

/// # ScenarioConfig
/// The root of the data parsed from a `scenario.toml` file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)] // Fail if the TOML has fields not in our struct
pub struct ScenarioConfig {
    pub run: RunConfig,
    pub world: World,
    pub driver: DriverConfig,
    pub lidar: LidarModel,
    pub odometry: OdometryModel,
    pub gate: GateConfig,
    pub output: OutputConfig,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of sensor frames produced by the simulated robot.
    pub steps: usize,
    /// Seed of the sensor and odometry noise (the filter has its own).
    pub seed: u64,
    /// Pace the sensor thread at `scan_period_ms` and drop scans the filter
    /// cannot keep up with. Otherwise every scan is processed.
    pub realtime: bool,
    pub scan_period_ms: u64,
    /// Publish a map snapshot every this many processed cycles.
    pub publish_every: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: 600,
            seed: 7,
            realtime: false,
            scan_period_ms: 20,
            publish_every: 50,
        }
    }
}

impl ScenarioConfig {
    /// Loads a scenario file on top of the defaults, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SimError::scenario(format!(
                "scenario file {} does not exist",
                path.display()
            )));
        }
        info!("Loading scenario from: {}", path.display());
        Self::extract(Figment::from(Serialized::defaults(ScenarioConfig::default())).merge(Toml::file(path)))
    }

    /// Defaults plus environment overrides, without a scenario file.
    pub fn from_env() -> Result<Self> {
        Self::extract(Figment::from(Serialized::defaults(ScenarioConfig::default())))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: ScenarioConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.steps == 0 {
            return Err(SimError::scenario("run.steps must be at least 1"));
        }
        if self.run.publish_every == 0 {
            return Err(SimError::scenario("run.publish_every must be at least 1"));
        }
        self.world.validate()?;
        self.driver.validate()?;
        self.lidar.validate()?;
        self.odometry.validate()?;
        self.filter.validate()?;
        Ok(())
    }

    /// The scenario as TOML, written next to the outputs for reproducibility.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ScenarioConfig::default().validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[run]\nsteps = 12\n\n[filter]\nparticles = 4\n\n[filter.grid]\nresolution = 0.1\n"
        )
        .unwrap();

        let config = ScenarioConfig::load(file.path()).unwrap();
        assert_eq!(config.run.steps, 12);
        assert_eq!(config.filter.particles, 4);
        assert_eq!(config.filter.grid.resolution, 0.1);
        // Untouched sections keep their defaults.
        assert_eq!(config.filter.grid.width, 400);
        assert_eq!(config.lidar, LidarModel::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[filter]\nparticle_count = 4\n").unwrap();
        assert!(matches!(
            ScenarioConfig::load(file.path()),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_filter_section_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[filter]\nparticles = 0\n").unwrap();
        assert!(matches!(
            ScenarioConfig::load(file.path()),
            Err(SimError::Slam(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ScenarioConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(SimError::InvalidScenario(_))));
    }

    #[test]
    fn test_resolved_scenario_round_trips_through_toml() {
        let config = ScenarioConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: ScenarioConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
