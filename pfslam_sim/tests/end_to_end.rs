// pfslam_sim/tests/end_to_end.rs

use std::fs;
use std::path::Path;

use pfslam_core::particles::Gaussian;
use pfslam_sim::prelude::*;
use pfslam_sim::publish::{PIXEL_FREE, PIXEL_OCCUPIED};

fn short_scenario(output: &Path) -> ScenarioConfig {
    let mut config = ScenarioConfig::default();
    config.run.steps = 120;
    config.run.publish_every = 40;
    config.filter.particles = 8;
    config.filter.seed = 3;
    config.filter.motion.xy = Gaussian::new(0.0, 0.01);
    config.filter.motion.theta = Gaussian::new(0.0, 0.01);
    config.filter.estimator.beam_skip = 2;
    config.output.directory = output.to_path_buf();
    config.output.keep_snapshots = true;
    config
}

fn pgm_pixels(path: &Path) -> Vec<u8> {
    let bytes = fs::read(path).unwrap();
    // Header is three newline-terminated lines.
    let mut newlines = 0;
    let start = bytes
        .iter()
        .position(|&b| {
            if b == b'\n' {
                newlines += 1;
            }
            newlines == 3
        })
        .unwrap();
    bytes[start + 1..].to_vec()
}

#[test]
fn test_short_run_maps_the_room() {
    let dir = tempfile::tempdir().unwrap();
    let config = short_scenario(dir.path());

    let summary = run(&config).unwrap();

    assert_eq!(summary.frames_produced, 120);
    assert_eq!(summary.frames_dropped, 0);
    assert_eq!(summary.cycles, 120);
    assert!(
        summary.position_error() < 0.5,
        "estimate drifted {:.3} m from the truth",
        summary.position_error()
    );

    // Final map plus the three periodic snapshots.
    assert_eq!(summary.publish.maps_written, 4);
    assert!(dir.path().join("map.yaml").is_file());
    assert!(dir.path().join("map_000040.pgm").is_file());
    assert!(dir.path().join("scenario.resolved.toml").is_file());

    let pixels = pgm_pixels(&dir.path().join("map.pgm"));
    assert_eq!(pixels.len(), 400 * 400);
    let occupied = pixels.iter().filter(|&&p| p == PIXEL_OCCUPIED).count();
    let free = pixels.iter().filter(|&&p| p == PIXEL_FREE).count();
    assert!(occupied > 100, "only {} occupied pixels", occupied);
    assert!(free > occupied, "{} free vs {} occupied pixels", free, occupied);

    let corrections = fs::read_to_string(dir.path().join("corrections.csv")).unwrap();
    assert_eq!(corrections.lines().count(), 121);
    assert!(corrections.starts_with("cycle,x,y,theta\n1,"));
}

#[test]
fn test_realtime_run_accounts_for_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = short_scenario(dir.path());
    config.run.steps = 40;
    config.run.realtime = true;
    config.run.scan_period_ms = 0;
    config.output.keep_snapshots = false;

    let summary = run(&config).unwrap();
    assert_eq!(summary.frames_produced, 40);
    assert_eq!(
        summary.cycles + summary.frames_dropped + summary.frames_gated,
        40
    );
    assert!(summary.cycles >= 1);
    assert!(dir.path().join("map.pgm").is_file());
}

#[test]
fn test_shipped_scenario_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/scenarios/box_room.toml");
    let config = ScenarioConfig::load(&path).unwrap();
    assert_eq!(config.world.segments.len(), 8);
    assert_eq!(config.filter.particles, 30);
    assert_eq!(config.filter.grid.width, 220);
    assert_eq!(config.output.map_name, "box_room");
}

#[test]
fn test_invalid_scenario_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = short_scenario(dir.path());
    config.filter.particles = 0;
    assert!(matches!(run(&config), Err(SimError::Slam(_))));
    assert!(!dir.path().join("map.pgm").exists());
}
