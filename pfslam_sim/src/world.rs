// pfslam_sim/src/world.rs

//! The synthetic 2D world: wall segments the simulated laser can hit, and a
//! waypoint driver that moves the ground-truth robot through it.

use nalgebra::{Point2, Vector2};
use pfslam_core::pose::{normalize_angle, Pose, PoseDelta};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

// =========================================================================
// == Geometry ==
// =========================================================================

/// A straight wall between two world points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Segment {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

impl Segment {
    pub fn new(start: [f64; 2], end: [f64; 2]) -> Self {
        Self { start, end }
    }

    /// Distance along the ray `origin + t * direction` to this segment, if it is hit.
    fn intersect(&self, origin: &Point2<f64>, direction: &Vector2<f64>) -> Option<f64> {
        let a = Point2::new(self.start[0], self.start[1]);
        let edge = Point2::new(self.end[0], self.end[1]) - a;
        let denom = cross(direction, &edge);
        if denom.abs() < 1e-12 {
            return None;
        }
        let to_start = a - origin;
        let t = cross(&to_start, &edge) / denom;
        let s = cross(&to_start, direction) / denom;
        (t >= 0.0 && (0.0..=1.0).contains(&s)).then_some(t)
    }
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// The static environment, described as wall segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct World {
    pub segments: Vec<Segment>,
}

impl Default for World {
    fn default() -> Self {
        let mut world = World::rectangle([-4.0, -3.0], [4.0, 3.0]);
        // A pillar so the room is not perfectly symmetric.
        world
            .segments
            .extend(World::rectangle([0.8, -0.6], [1.6, 0.2]).segments);
        world
    }
}

impl World {
    /// Four walls of an axis-aligned rectangle.
    pub fn rectangle(min: [f64; 2], max: [f64; 2]) -> Self {
        let corners = [
            [min[0], min[1]],
            [max[0], min[1]],
            [max[0], max[1]],
            [min[0], max[1]],
        ];
        let segments = (0..4)
            .map(|i| Segment::new(corners[i], corners[(i + 1) % 4]))
            .collect();
        Self { segments }
    }

    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(SimError::scenario("world needs at least one segment"));
        }
        let finite = |p: &[f64; 2]| p[0].is_finite() && p[1].is_finite();
        if let Some(bad) = self
            .segments
            .iter()
            .find(|s| !finite(&s.start) || !finite(&s.end))
        {
            return Err(SimError::scenario(format!("non-finite wall segment {:?}", bad)));
        }
        Ok(())
    }

    /// Distance from `origin` along world-frame `angle` to the nearest wall,
    /// or `None` when nothing lies within `max_range`.
    pub fn cast(&self, origin: &Point2<f64>, angle: f64, max_range: f64) -> Option<f64> {
        let direction = Vector2::new(angle.cos(), angle.sin());
        self.segments
            .iter()
            .filter_map(|segment| segment.intersect(origin, &direction))
            .filter(|&t| t <= max_range)
            .min_by(|a, b| a.total_cmp(b))
    }
}

// =========================================================================
// == Ground-truth motion ==
// =========================================================================

/// Drives the robot around a closed list of waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Visited in order, then again from the first one.
    pub waypoints: Vec<[f64; 2]>,
    /// Forward distance per step, metres.
    pub speed: f64,
    /// Maximum heading change per step, radians.
    pub turn_rate: f64,
    /// A waypoint closer than this counts as reached.
    pub reach_threshold: f64,
    /// Ground-truth pose of the robot when the run starts.
    pub start: Pose,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            waypoints: vec![[2.5, -2.0], [2.8, 2.0], [-2.5, 2.0], [-2.5, -2.0]],
            speed: 0.05,
            turn_rate: 0.1,
            reach_threshold: 0.2,
            start: Pose::new(-2.5, -2.0, 0.0),
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.waypoints.is_empty() {
            return Err(SimError::scenario("driver needs at least one waypoint"));
        }
        if !(self.speed > 0.0 && self.turn_rate > 0.0 && self.reach_threshold > 0.0) {
            return Err(SimError::scenario(
                "driver speed, turn_rate and reach_threshold must be positive",
            ));
        }
        Ok(())
    }
}

/// Turns toward the current waypoint, then drives at it.
#[derive(Debug, Clone)]
pub struct WaypointDriver {
    config: DriverConfig,
    next: usize,
}

impl WaypointDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config, next: 0 }
    }

    pub fn current_waypoint(&self) -> Point2<f64> {
        let [x, y] = self.config.waypoints[self.next % self.config.waypoints.len()];
        Point2::new(x, y)
    }

    /// Body-frame increment that moves the robot one step from `pose`.
    pub fn step(&mut self, pose: &Pose) -> PoseDelta {
        let mut to_target = self.current_waypoint() - pose.position();
        if to_target.norm() < self.config.reach_threshold {
            self.next = (self.next + 1) % self.config.waypoints.len();
            to_target = self.current_waypoint() - pose.position();
        }

        let heading_error = normalize_angle(to_target.y.atan2(to_target.x) - pose.theta);
        let turn = heading_error.clamp(-self.config.turn_rate, self.config.turn_rate);
        if heading_error.abs() > self.config.turn_rate {
            // Rotate in place until roughly facing the waypoint.
            return Pose::new(0.0, 0.0, turn);
        }
        Pose::new(self.config.speed.min(to_target.norm()), 0.0, turn)
    }
}
