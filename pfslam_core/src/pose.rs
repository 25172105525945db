// pfslam_core/src/pose.rs

use nalgebra::{Isometry2, Point2, Vector2};
use num_traits::{Float, FloatConst};
use serde::{Deserialize, Serialize};

/// Wraps an angle into the half-open interval (-π, π].
///
/// NaN passes through untouched so that callers can detect it downstream.
pub fn normalize_angle<T: Float + FloatConst>(angle: T) -> T {
    let two_pi = T::PI() + T::PI();
    let wrapped = angle % two_pi;
    if wrapped > T::PI() {
        wrapped - two_pi
    } else if wrapped <= -T::PI() {
        wrapped + two_pi
    } else {
        wrapped
    }
}

// =========================================================================
// == Pose ==
// =========================================================================

/// A planar pose `(x, y, θ)` expressed in the fixed world (map) frame.
///
/// The heading is always kept normalized to (-π, π]. `Pose` is a plain value
/// type: copying it is free and no operation mutates it in place.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// An odometry increment, expressed in the body frame of the pose it is applied to.
///
/// `dx` is along the heading, `dy` is lateral (to the left), `dθ` is the turn.
pub type PoseDelta = Pose;

impl Pose {
    pub const IDENTITY: Pose = Pose {
        x: 0.0,
        y: 0.0,
        theta: 0.0,
    };

    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// `self ⊕ delta`: applies a body-frame increment to this pose.
    pub fn compose(&self, delta: &PoseDelta) -> Pose {
        Pose::from_isometry(&(self.to_isometry() * delta.to_isometry()))
    }

    pub fn inverse(&self) -> Pose {
        Pose::from_isometry(&self.to_isometry().inverse())
    }

    /// The increment that takes `self` to `other`, i.e. `self⁻¹ ⊕ other`.
    pub fn between(&self, other: &Pose) -> PoseDelta {
        Pose::from_isometry(&(self.to_isometry().inverse() * other.to_isometry()))
    }

    /// Maps a point from this pose's body frame into the world frame.
    pub fn transform_point(&self, point: &Point2<f64>) -> Point2<f64> {
        self.to_isometry() * point
    }

    /// World-frame endpoint of a beam of `range` metres at body-frame `bearing`.
    pub fn project(&self, bearing: f64, range: f64) -> Point2<f64> {
        let angle = self.theta + bearing;
        Point2::new(self.x + range * angle.cos(), self.y + range * angle.sin())
    }

    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }

    pub fn from_isometry(iso: &Isometry2<f64>) -> Self {
        Pose::new(
            iso.translation.vector.x,
            iso.translation.vector.y,
            iso.rotation.angle(),
        )
    }

    /// Translational magnitude of this pose when read as an increment.
    pub fn linear(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Rotational magnitude of this pose when read as an increment.
    pub fn angular(&self) -> f64 {
        self.theta.abs()
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.theta == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPSILON: f64 = 1e-9;

    fn assert_pose_eq(a: &Pose, b: &Pose) {
        assert_abs_diff_eq!(a.x, b.x, epsilon = EPSILON);
        assert_abs_diff_eq!(a.y, b.y, epsilon = EPSILON);
        assert_abs_diff_eq!(normalize_angle(a.theta - b.theta), 0.0, epsilon = EPSILON);
    }

    #[test]
    fn test_normalize_angle_range() {
        assert_abs_diff_eq!(normalize_angle(2.5 * PI), FRAC_PI_2, epsilon = EPSILON);
        assert_abs_diff_eq!(normalize_angle(-PI), PI, epsilon = EPSILON);
        assert_abs_diff_eq!(normalize_angle(-3.0 * FRAC_PI_2), FRAC_PI_2, epsilon = EPSILON);
        assert_abs_diff_eq!(normalize_angle(0.25_f32), 0.25_f32, epsilon = 1e-6);
        for k in -20..20 {
            let a = normalize_angle(k as f64 * 0.7);
            assert!(a > -PI && a <= PI, "angle {} out of range", a);
        }
    }

    #[test]
    fn test_compose_moves_along_heading() {
        let pose = Pose::new(1.0, 2.0, FRAC_PI_2);
        let moved = pose.compose(&Pose::new(1.0, 0.0, 0.0));
        assert_pose_eq(&moved, &Pose::new(1.0, 3.0, FRAC_PI_2));

        let strafed = pose.compose(&Pose::new(0.0, 1.0, 0.0));
        assert_pose_eq(&strafed, &Pose::new(0.0, 2.0, FRAC_PI_2));
    }

    #[test]
    fn test_between_inverts_compose() {
        let a = Pose::new(0.3, -1.2, 2.9);
        let delta = Pose::new(0.5, 0.1, 0.6);
        let b = a.compose(&delta);
        assert_pose_eq(&a.between(&b), &delta);
        assert_pose_eq(&a.compose(&a.inverse()), &Pose::IDENTITY);
        // Heading stays normalized after wrapping past π.
        assert!(b.theta <= PI && b.theta > -PI);
    }

    #[test]
    fn test_project_and_transform_point_agree() {
        let pose = Pose::new(-2.0, 0.5, 0.4);
        let bearing: f64 = -0.3;
        let range = 2.5;
        let projected = pose.project(bearing, range);
        let local = Point2::new(range * bearing.cos(), range * bearing.sin());
        let transformed = pose.transform_point(&local);
        assert_abs_diff_eq!(projected.x, transformed.x, epsilon = EPSILON);
        assert_abs_diff_eq!(projected.y, transformed.y, epsilon = EPSILON);
    }
}
