// pfslam_sim/src/observer.rs

//! Turns raw sensor frames (scan + absolute odometry) into filter observations.

use log::{debug, error};
use pfslam_core::error::SlamError;
use pfslam_core::filter::{CycleReport, GmappingFilter};
use pfslam_core::pose::{Pose, PoseDelta};
use pfslam_core::scan::RangeScan;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One laser scan stamped with the odometry pose it was taken at.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub seq: u64,
    pub scan: RangeScan,
    /// Absolute pose reported by wheel odometry, in the odometry frame.
    pub odometry: Pose,
    /// Ground-truth pose in the world frame. Only used for evaluation.
    pub truth: Pose,
}

/// Which scans are handed to the filter at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Drop readings at or beyond the sensor range instead of using them to
    /// clear free space along the whole beam.
    pub skip_exceeding_ranges: bool,
    /// Scans with fewer valid beams than this are skipped.
    pub min_valid_beams: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            skip_exceeding_ranges: false,
            min_valid_beams: 10,
        }
    }
}

/// What became of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Processed(CycleReport),
    /// Rejected by the gate; its motion is folded into the next processed frame.
    Gated,
}

/// Feeds frames to the filter, converting absolute odometry into increments.
#[derive(Debug, Clone, Default)]
pub struct ScanObserver {
    gate: GateConfig,
    last_odometry: Option<Pose>,
}

impl ScanObserver {
    pub fn new(gate: GateConfig) -> Self {
        Self {
            gate,
            last_odometry: None,
        }
    }

    /// Applies the range policy to a scan.
    pub fn filter_scan(&self, scan: &RangeScan) -> RangeScan {
        if !self.gate.skip_exceeding_ranges {
            return scan.clone();
        }
        let beams = scan
            .beams
            .iter()
            .filter(|beam| scan.is_echo(beam))
            .copied()
            .collect();
        RangeScan::new(scan.max_range, beams)
    }

    /// Motion since the last frame handed to the filter. The first frame
    /// defines the odometry reference and carries no motion.
    pub fn delta_for(&self, odometry: &Pose) -> PoseDelta {
        match self.last_odometry {
            Some(last) => last.between(odometry),
            None => Pose::IDENTITY,
        }
    }

    /// Hands a frame to the filter unless the gate rejects it.
    ///
    /// Degenerate weights end the estimate: the error is returned and the
    /// odometry reference stays at the last committed frame.
    pub fn observe(
        &mut self,
        filter: &mut GmappingFilter,
        frame: &SensorFrame,
    ) -> Result<Observation> {
        let scan = self.filter_scan(&frame.scan);
        let valid = scan.valid_beams().count();
        if valid < self.gate.min_valid_beams {
            debug!(
                "Frame {}: {} valid beams, below the gate of {}; skipped",
                frame.seq, valid, self.gate.min_valid_beams
            );
            return Ok(Observation::Gated);
        }

        let delta = self.delta_for(&frame.odometry);
        let report = filter.handle_observation(&scan, &delta).map_err(|e| {
            if let SlamError::DegenerateWeights { cycle } = e {
                error!(
                    "Frame {}: every particle lost its weight at cycle {}; no estimate left",
                    frame.seq, cycle
                );
            }
            e
        })?;
        self.last_odometry = Some(frame.odometry);
        Ok(Observation::Processed(report))
    }
}
