// pfslam_core/src/scan.rs

use serde::{Deserialize, Serialize};

/// A single range reading of a planar laser scan, in the sensor's body frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// Beam direction relative to the robot heading, in radians.
    pub bearing: f64,
    /// Measured distance in metres. Meaningless when `returned` is false.
    pub range: f64,
    /// `false` when the beam travelled its full range without an echo.
    pub returned: bool,
}

impl Beam {
    pub fn hit(bearing: f64, range: f64) -> Self {
        Self {
            bearing,
            range,
            returned: true,
        }
    }

    pub fn no_return(bearing: f64) -> Self {
        Self {
            bearing,
            range: f64::INFINITY,
            returned: false,
        }
    }

    /// Malformed readings (NaN bearing, NaN/negative/infinite echo) carry no information.
    pub fn is_valid(&self) -> bool {
        if !self.bearing.is_finite() {
            return false;
        }
        !self.returned || (self.range.is_finite() && self.range >= 0.0)
    }
}

/// An ordered sweep of beams taken from one pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeScan {
    /// Sensor range limit; echoes at or beyond it are treated as "no return".
    pub max_range: f64,
    pub beams: Vec<Beam>,
}

impl RangeScan {
    pub fn new(max_range: f64, beams: Vec<Beam>) -> Self {
        Self { max_range, beams }
    }

    pub fn empty(max_range: f64) -> Self {
        Self::new(max_range, Vec::new())
    }

    /// Builds a scan from an evenly spaced range array (the usual laser driver layout).
    ///
    /// Infinite readings and readings at or beyond `max_range` become no-return
    /// beams; NaN and negative readings are kept but are invalid and ignored later.
    pub fn from_ranges(angle_min: f64, angle_increment: f64, ranges: &[f64], max_range: f64) -> Self {
        let beams = ranges
            .iter()
            .enumerate()
            .map(|(i, &range)| {
                let bearing = angle_min + i as f64 * angle_increment;
                if range >= max_range {
                    Beam::no_return(bearing)
                } else {
                    Beam::hit(bearing, range)
                }
            })
            .collect();
        Self::new(max_range, beams)
    }

    pub fn len(&self) -> usize {
        self.beams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    /// Iterates the beams that carry information, in scan order.
    pub fn valid_beams(&self) -> impl Iterator<Item = &Beam> + '_ {
        self.beams.iter().filter(|beam| beam.is_valid())
    }

    /// `true` if the beam produced an echo inside the sensor's usable range.
    pub fn is_echo(&self, beam: &Beam) -> bool {
        beam.returned && beam.range < self.max_range
    }

    /// Length of free space a beam certifies: the echo range, or `max_range` without one.
    pub fn free_length(&self, beam: &Beam) -> f64 {
        if self.is_echo(beam) {
            beam.range
        } else {
            self.max_range
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ranges_classifies_readings() {
        let scan = RangeScan::from_ranges(
            -0.5,
            0.5,
            &[1.0, f64::INFINITY, 12.0, f64::NAN, -1.0],
            10.0,
        );
        assert_eq!(scan.len(), 5);
        assert!(scan.beams[0].returned);
        assert!(!scan.beams[1].returned);
        assert!(!scan.beams[2].returned);
        assert!(!scan.beams[3].is_valid());
        assert!(!scan.beams[4].is_valid());
        assert_eq!(scan.valid_beams().count(), 3);
        assert_eq!(scan.beams[2].bearing, 0.5);
    }

    #[test]
    fn test_free_length_caps_at_max_range() {
        let scan = RangeScan::new(4.0, vec![Beam::hit(0.0, 2.0), Beam::no_return(0.1)]);
        assert_eq!(scan.free_length(&scan.beams[0]), 2.0);
        assert_eq!(scan.free_length(&scan.beams[1]), 4.0);
        assert!(scan.is_echo(&scan.beams[0]));
        assert!(!scan.is_echo(&scan.beams[1]));
    }
}
