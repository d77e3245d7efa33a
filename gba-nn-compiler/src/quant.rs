//! Fixed-point requantization constants.
//!
//! A quantized dense layer accumulates `int8 * int8` products in 32 bits. The
//! accumulator is rescaled to the output scale with one integer multiply and
//! one arithmetic right shift, so the target never touches floating point.

use thiserror::Error;

/// Accumulator rescale `acc * multiplier >> shift`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Requant {
    pub multiplier: i32,
    pub shift: i32,
    /// `input_scale * weight_scale / output_scale`, kept for diagnostics.
    pub effective_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequantError {
    #[error("{which} scale {value} is not a positive finite number")]
    InvalidScale { which: &'static str, value: f64 },
    #[error("effective scale {effective_scale} does not fit a 32-bit multiplier")]
    Overflow { effective_scale: f64 },
    #[error("effective scale {effective_scale} rounds to a zero multiplier")]
    Underflow { effective_scale: f64 },
}

const MULTIPLIER_CEILING: f64 = (1u64 << 30) as f64;
const MAX_SHIFT: i32 = 31;

impl Requant {
    pub fn from_scales(
        input_scale: f64,
        weight_scale: f64,
        output_scale: f64,
    ) -> Result<Self, RequantError> {
        for (which, value) in [
            ("input", input_scale),
            ("weight", weight_scale),
            ("output", output_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(RequantError::InvalidScale { which, value });
            }
        }

        let effective_scale = input_scale * weight_scale / output_scale;
        let mut shift = 0;
        while effective_scale * 2f64.powi(shift) < MULTIPLIER_CEILING && shift < MAX_SHIFT {
            shift += 1;
        }
        // Back off one step so the multiplier stays below 2^30.
        shift -= 1;
        if shift < 0 {
            return Err(RequantError::Overflow { effective_scale });
        }

        let multiplier = (effective_scale * 2f64.powi(shift)).round();
        if multiplier > f64::from(i32::MAX) {
            return Err(RequantError::Overflow { effective_scale });
        }
        // Every output would be the zero point.
        if multiplier < 1.0 {
            return Err(RequantError::Underflow { effective_scale });
        }

        Ok(Self {
            multiplier: multiplier as i32,
            shift,
            effective_scale,
        })
    }

    /// Rescale one accumulator the way the target kernel does; ties round
    /// toward positive infinity.
    pub fn apply(&self, acc: i32) -> i64 {
        let product = i64::from(acc) * i64::from(self.multiplier);
        if self.shift == 0 {
            return product;
        }
        (product + (1i64 << (self.shift - 1))) >> self.shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eighth_scale_uses_full_shift() {
        let rq = Requant::from_scales(0.5, 0.25, 1.0).unwrap();
        assert_eq!(rq.effective_scale, 0.125);
        assert_eq!(rq.shift, 30);
        assert_eq!(rq.multiplier, 134_217_728);
    }

    #[test]
    fn multiplier_stays_below_two_pow_thirty() {
        for &(i, w, o) in &[
            (0.02, 0.003, 0.05),
            (1.0, 1.0, 1.0),
            (0.9, 0.9, 0.01),
            (1e-3, 1e-3, 1.0),
        ] {
            let rq = Requant::from_scales(i, w, o).unwrap();
            assert!(rq.multiplier > 0, "{rq:?}");
            assert!(f64::from(rq.multiplier) < MULTIPLIER_CEILING, "{rq:?}");
            assert!((0..MAX_SHIFT).contains(&rq.shift), "{rq:?}");
        }
    }

    #[test]
    fn vanishing_scale_is_rejected() {
        let err = Requant::from_scales(1e-6, 1e-6, 1.0).unwrap_err();
        assert!(matches!(err, RequantError::Underflow { .. }), "{err}");
        // Smallest scale that still rounds to a multiplier of one at shift 30.
        let rq = Requant::from_scales(1.0, 1.0 / (1u64 << 30) as f64, 1.0).unwrap();
        assert_eq!((rq.multiplier, rq.shift), (1, 30));
    }

    #[test]
    fn apply_approximates_float_rescale() {
        let rq = Requant::from_scales(0.02, 0.003, 0.05).unwrap();
        for acc in [-5000, -17, 0, 1, 999, 12_345] {
            let expected = (f64::from(acc) * rq.effective_scale).round() as i64;
            assert!((rq.apply(acc) - expected).abs() <= 1, "acc {acc}");
        }
    }

    #[test]
    fn rejects_non_positive_scale() {
        assert_eq!(
            Requant::from_scales(0.5, 0.0, 1.0),
            Err(RequantError::InvalidScale {
                which: "weight",
                value: 0.0
            })
        );
        assert!(Requant::from_scales(f64::NAN, 1.0, 1.0).is_err());
    }

    #[test]
    fn rejects_huge_effective_scale() {
        let err = Requant::from_scales(1e6, 1e6, 1e-3).unwrap_err();
        assert!(matches!(err, RequantError::Overflow { .. }));
    }
}
