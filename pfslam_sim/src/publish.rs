// pfslam_sim/src/publish.rs

//! Output side of the harness: map snapshots in the ROS `map_server` layout
//! (PGM image + YAML metadata) and the map-to-odometry pose correction.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use pfslam_core::cell::CellState;
use pfslam_core::grid::{CellIndex, GridMap};
use pfslam_core::pose::Pose;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

// --- PGM pixel values used by map_server ---
pub const PIXEL_FREE: u8 = 254;
pub const PIXEL_OCCUPIED: u8 = 0;
pub const PIXEL_UNKNOWN: u8 = 205;

/// Where and what the publisher writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Base name of the final map files (`<name>.pgm`, `<name>.yaml`).
    pub map_name: String,
    /// Also keep every periodic snapshot as `<name>_<cycle>.pgm`.
    pub keep_snapshots: bool,
    /// Append every pose correction to `corrections.csv`.
    pub write_corrections: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            map_name: "map".to_string(),
            keep_snapshots: false,
            write_corrections: true,
        }
    }
}

fn pixel(state: CellState) -> u8 {
    match state {
        CellState::Free => PIXEL_FREE,
        CellState::Occupied => PIXEL_OCCUPIED,
        CellState::Unknown => PIXEL_UNKNOWN,
    }
}

/// Renders the map as a binary PGM (P5) image, top row first.
pub fn encode_pgm(map: &GridMap) -> Vec<u8> {
    let (width, height) = (map.width(), map.height());
    let header = format!("P5\n{} {}\n255\n", width, height);
    let mut bytes = Vec::with_capacity(header.len() + width * height);
    bytes.extend_from_slice(header.as_bytes());
    // Image rows run top-down, map rows bottom-up.
    for y in (0..height).rev() {
        for x in 0..width {
            bytes.push(pixel(map.state(CellIndex::new(x, y))));
        }
    }
    bytes
}

/// `map_server` metadata pointing at `image`.
///
/// The thresholds apply to `(255 - pixel) / 255`, which places the unknown
/// value 205 strictly between free and occupied.
pub fn encode_yaml(map: &GridMap, image: &str) -> String {
    let geometry = map.geometry();
    format!(
        "image: {}\nresolution: {}\norigin: [{}, {}, 0.0]\nnegate: 0\noccupied_thresh: 0.65\nfree_thresh: 0.196\n",
        image, geometry.resolution, geometry.origin[0], geometry.origin[1]
    )
}

/// Writes `<stem>.pgm` and `<stem>.yaml` next to each other.
pub fn write_map(map: &GridMap, directory: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(directory).map_err(|e| SimError::io(directory, e))?;
    let image_name = format!("{}.pgm", stem);
    let image_path = directory.join(&image_name);
    fs::write(&image_path, encode_pgm(map)).map_err(|e| SimError::io(&image_path, e))?;

    let yaml_path = directory.join(format!("{}.yaml", stem));
    fs::write(&yaml_path, encode_yaml(map, &image_name))
        .map_err(|e| SimError::io(&yaml_path, e))?;
    Ok(image_path)
}

/// `map -> odom` transform: what must be prepended to the odometry pose to
/// land on the filter's best estimate.
pub fn pose_correction(best: &Pose, odometry: &Pose) -> Pose {
    best.compose(&odometry.inverse())
}

// =========================================================================
// == Publisher ==
// =========================================================================

/// Owned data handed from the filter loop to the publisher thread.
#[derive(Debug, Clone)]
pub enum Publication {
    Map { cycle: u64, map: GridMap, final_map: bool },
    Correction { cycle: u64, best: Pose, odometry: Pose },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub maps_written: usize,
    pub corrections_written: usize,
}

/// Consumes publications and writes them to the output directory.
pub struct MapPublisher {
    config: OutputConfig,
    corrections: Option<BufWriter<File>>,
    stats: PublishStats,
}

impl MapPublisher {
    pub fn new(config: OutputConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory).map_err(|e| SimError::io(&config.directory, e))?;
        let corrections = if config.write_corrections {
            let path = config.directory.join("corrections.csv");
            let mut writer = BufWriter::new(File::create(&path).map_err(|e| SimError::io(&path, e))?);
            writeln!(writer, "cycle,x,y,theta").map_err(|e| SimError::io(&path, e))?;
            Some(writer)
        } else {
            None
        };
        Ok(Self {
            config,
            corrections,
            stats: PublishStats::default(),
        })
    }

    pub fn handle(&mut self, publication: Publication) -> Result<()> {
        match publication {
            Publication::Map {
                cycle,
                map,
                final_map,
            } => {
                if final_map {
                    let path = write_map(&map, &self.config.directory, &self.config.map_name)?;
                    info!("Final map written to {}", path.display());
                    self.stats.maps_written += 1;
                } else if self.config.keep_snapshots {
                    let stem = format!("{}_{:06}", self.config.map_name, cycle);
                    write_map(&map, &self.config.directory, &stem)?;
                    self.stats.maps_written += 1;
                }
                info!(
                    "Cycle {}: map snapshot with {} known cells",
                    cycle,
                    map.known_cells()
                );
            }
            Publication::Correction {
                cycle,
                best,
                odometry,
            } => {
                let correction = pose_correction(&best, &odometry);
                if let Some(writer) = self.corrections.as_mut() {
                    writeln!(
                        writer,
                        "{},{:.6},{:.6},{:.6}",
                        cycle, correction.x, correction.y, correction.theta
                    )
                    .map_err(|e| SimError::io(&self.config.directory, e))?;
                    self.stats.corrections_written += 1;
                }
            }
        }
        Ok(())
    }

    /// Flushes pending output and reports what was written.
    pub fn finish(mut self) -> Result<PublishStats> {
        if let Some(writer) = self.corrections.as_mut() {
            writer
                .flush()
                .map_err(|e| SimError::io(&self.config.directory, e))?;
        }
        Ok(self.stats)
    }
}
