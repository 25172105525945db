// pfslam_sim/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

use crate::config::ScenarioConfig;

/// pfslam: particle-filter grid SLAM on a simulated robot.
///
/// Runs a scenario end to end and writes the best particle's map
/// (PGM + YAML) and the map-to-odometry corrections to the output directory.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the scenario TOML file to run. Built-in defaults when omitted.
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Seed for both the sensor noise and the filter.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of sensor frames to simulate.
    #[arg(long)]
    pub steps: Option<usize>,

    /// Particle count.
    #[arg(short, long)]
    pub particles: Option<usize>,

    /// Directory for the map and correction files.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Pace the sensor in real time and drop scans the filter cannot keep up with.
    #[arg(long, default_value_t = false)]
    pub realtime: bool,
}

impl Cli {
    /// Command-line values win over the scenario file and the environment.
    pub fn apply(&self, config: &mut ScenarioConfig) {
        if let Some(seed) = self.seed {
            config.run.seed = seed;
            config.filter.seed = seed;
        }
        if let Some(steps) = self.steps {
            config.run.steps = steps;
        }
        if let Some(particles) = self.particles {
            config.filter.particles = particles;
        }
        if let Some(output) = &self.output {
            config.output.directory = output.clone();
        }
        if self.realtime {
            config.run.realtime = true;
        }
    }
}
