// pfslam_sim/src/sensors.rs

use pfslam_core::pose::{Pose, PoseDelta};
use pfslam_core::scan::{Beam, RangeScan};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::world::World;

/// A newtype wrapper around `ChaCha8Rng`.
/// This is the deterministic pseudo-random number generator for the sensor thread.
#[derive(Debug, Clone)]
pub struct SimulationRng(pub ChaCha8Rng);

impl SimulationRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }
}

fn normal(stddev: f64, what: &str) -> Result<Normal<f64>> {
    Normal::new(0.0, stddev)
        .map_err(|e| SimError::scenario(format!("invalid {} noise {}: {}", what, stddev, e)))
}

// =========================================================================
// == Laser ==
// =========================================================================

/// A model for a single-plane, 2D LiDAR sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LidarModel {
    pub max_range: f64,
    pub horizontal_fov_deg: f64,
    pub horizontal_beams: u32,
    pub range_noise_stddev: f64,
    pub angular_noise_stddev_deg: f64,
}

impl Default for LidarModel {
    fn default() -> Self {
        Self {
            max_range: 6.0,
            horizontal_fov_deg: 360.0,
            horizontal_beams: 180,
            range_noise_stddev: 0.01,
            angular_noise_stddev_deg: 0.0,
        }
    }
}

impl LidarModel {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_range > 0.0 && self.max_range.is_finite()) {
            return Err(SimError::scenario("lidar.max_range must be positive"));
        }
        if self.horizontal_beams < 2 {
            return Err(SimError::scenario("lidar needs at least two beams"));
        }
        if !(self.horizontal_fov_deg > 0.0 && self.horizontal_fov_deg <= 360.0) {
            return Err(SimError::scenario("lidar.horizontal_fov_deg must lie in (0, 360]"));
        }
        normal(self.range_noise_stddev, "range")?;
        normal(self.angular_noise_stddev_deg, "angular")?;
        Ok(())
    }

    /// Bearing of every beam, evenly spread over the field of view.
    ///
    /// A full circle does not repeat its first bearing at the end.
    pub fn bearings(&self) -> Vec<f64> {
        let fov_rad = self.horizontal_fov_deg.to_radians();
        let full_circle = self.horizontal_fov_deg >= 360.0;
        let start_angle = -fov_rad / 2.0;
        let slots = if full_circle {
            self.horizontal_beams
        } else {
            self.horizontal_beams - 1
        };
        let angle_increment = fov_rad / slots as f64;
        (0..self.horizontal_beams)
            .map(|i| start_angle + (i as f64) * angle_increment)
            .collect()
    }

    /// Casts every beam from the ground-truth `pose` and adds sensor noise.
    ///
    /// Beams that reach `max_range` without hitting a wall come back as no-return.
    pub fn scan<R: Rng + ?Sized>(
        &self,
        world: &World,
        pose: &Pose,
        rng: &mut R,
    ) -> Result<RangeScan> {
        let range_noise = normal(self.range_noise_stddev, "range")?;
        let angular_noise = normal(self.angular_noise_stddev_deg.to_radians(), "angular")?;
        let origin = pose.position();

        let beams = self
            .bearings()
            .into_iter()
            .map(|bearing| {
                // 1. Perturb the true direction of the beam.
                let true_angle = pose.theta + bearing + angular_noise.sample(rng);
                // 2. Cast against the walls and perturb the measured distance.
                match world.cast(&origin, true_angle, self.max_range) {
                    Some(distance) => {
                        let noisy = (distance + range_noise.sample(rng)).max(0.0);
                        Beam::hit(bearing, noisy)
                    }
                    None => Beam::no_return(bearing),
                }
            })
            .collect();
        Ok(RangeScan::new(self.max_range, beams))
    }
}

// =========================================================================
// == Odometry ==
// =========================================================================

/// Wheel odometry: integrates noisy copies of the true motion increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OdometryModel {
    /// Noise per metre travelled on the forward and lateral components.
    pub linear_noise_per_m: f64,
    /// Heading noise per radian turned.
    pub angular_noise_per_rad: f64,
    /// Constant heading drift per step, radians.
    pub heading_bias: f64,
}

impl Default for OdometryModel {
    fn default() -> Self {
        Self {
            linear_noise_per_m: 0.05,
            angular_noise_per_rad: 0.05,
            heading_bias: 0.0,
        }
    }
}

impl OdometryModel {
    pub fn validate(&self) -> Result<()> {
        normal(self.linear_noise_per_m, "odometry linear")?;
        normal(self.angular_noise_per_rad, "odometry angular")?;
        if !self.heading_bias.is_finite() {
            return Err(SimError::scenario("odometry.heading_bias must be finite"));
        }
        Ok(())
    }

    /// The increment the wheel encoders report for a true increment.
    ///
    /// A robot standing still reports exactly zero motion.
    pub fn measure<R: Rng + ?Sized>(&self, truth: &PoseDelta, rng: &mut R) -> Result<PoseDelta> {
        if truth.is_zero() {
            return Ok(*truth);
        }
        let linear = normal(self.linear_noise_per_m * truth.linear(), "odometry linear")?;
        let angular = normal(self.angular_noise_per_rad * truth.angular(), "odometry angular")?;
        Ok(Pose::new(
            truth.x + linear.sample(rng),
            truth.y + linear.sample(rng),
            truth.theta + angular.sample(rng) + self.heading_bias,
        ))
    }
}
