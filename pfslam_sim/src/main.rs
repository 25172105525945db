// pfslam_sim/src/main.rs

use clap::Parser;
use log::{error, info};
use pfslam_sim::prelude::*;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,pfslam_core=info"))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run_cli(&cli) {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}

fn run_cli(cli: &Cli) -> Result<()> {
    let mut config = match &cli.scenario {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::from_env()?,
    };
    cli.apply(&mut config);

    let summary = run(&config)?;
    info!(
        "Done: {} cycles ({} corrected, {} resampled), {} frames dropped, {} gated",
        summary.cycles,
        summary.corrections,
        summary.resamples,
        summary.frames_dropped,
        summary.frames_gated
    );
    info!(
        "Final position error {:.3} m (raw odometry {:.3} m); outputs in {}",
        summary.position_error(),
        summary.odometry_error(),
        config.output.directory.display()
    );
    Ok(())
}
