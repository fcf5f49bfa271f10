//! Proportional row-drift corrector.
//!
//! The side ultrasonic sensor faces the crop row.  Reading more than the
//! target means the robot has wandered away from the row; reading less
//! means it is too close.  Inside the tolerance band no correction is
//! applied.
//!
//! ```rust
//! use krishi_hal::drift::DriftCorrector;
//!
//! let corrector = DriftCorrector::new(20.0, 5.0, 4.0, 80);
//! assert_eq!(corrector.correction(22.0), None);
//! // 10 cm too far from the row: steer towards it.
//! assert_eq!(corrector.correction(30.0), Some(40));
//! assert_eq!(corrector.wheel_pair(210, 40), (170, 250));
//! ```

#[derive(Debug, Clone, Copy)]
pub struct DriftCorrector {
    target_cm: f32,
    tolerance_cm: f32,
    /// Differential PWM per centimetre of error.
    gain: f32,
    max_correction: i16,
}

impl DriftCorrector {
    pub fn new(target_cm: f32, tolerance_cm: f32, gain: f32, max_correction: i16) -> Self {
        Self {
            target_cm,
            tolerance_cm,
            gain,
            max_correction: max_correction.abs(),
        }
    }

    /// Differential speed to apply for a side reading, or `None` when the
    /// robot is within tolerance.  Positive steers towards the row.
    pub fn correction(&self, side_cm: f32) -> Option<i16> {
        if !side_cm.is_finite() {
            return None;
        }
        let error = side_cm - self.target_cm;
        if error.abs() <= self.tolerance_cm {
            return None;
        }
        let limit = f32::from(self.max_correction);
        Some((self.gain * error).clamp(-limit, limit).round() as i16)
    }

    /// Left/right wheel speeds for straight travel at `base` with
    /// `correction` applied, clamped to the drive range.
    pub fn wheel_pair(&self, base: i16, correction: i16) -> (i16, i16) {
        let left = base.saturating_sub(correction).clamp(-255, 255);
        let right = base.saturating_add(correction).clamp(-255, 255);
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrector() -> DriftCorrector {
        DriftCorrector::new(20.0, 5.0, 4.0, 80)
    }

    #[test]
    fn inside_tolerance_no_correction() {
        assert_eq!(corrector().correction(15.0), None);
        assert_eq!(corrector().correction(25.0), None);
    }

    #[test]
    fn correction_is_proportional_and_signed() {
        assert_eq!(corrector().correction(27.0), Some(28));
        assert_eq!(corrector().correction(12.0), Some(-32));
    }

    #[test]
    fn correction_is_clamped() {
        assert_eq!(corrector().correction(400.0), Some(80));
        assert_eq!(corrector().correction(-400.0), Some(-80));
    }

    #[test]
    fn non_finite_reading_ignored() {
        assert_eq!(corrector().correction(f32::NAN), None);
    }

    #[test]
    fn wheel_pair_stays_in_range() {
        assert_eq!(corrector().wheel_pair(250, -80), (255, 170));
        assert_eq!(corrector().wheel_pair(210, 0), (210, 210));
    }
}
