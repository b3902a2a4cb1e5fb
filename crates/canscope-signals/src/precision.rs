//! Floating point precision handling
//!
//! Avoids ugly values like 13.000000001 by rounding to the precision the
//! scale factor actually carries.

/// Determine appropriate decimal places from scale factor
///
/// # Examples
/// - scale 1.0 → 0 decimal places (integers)
/// - scale 0.1 → 1 decimal place
/// - scale 0.25 → 2 decimal places (1/4 needs 2 places)
pub fn precision_from_scale(scale: f64) -> u8 {
    if scale == 0.0 || !scale.is_finite() {
        return 3;
    }

    let abs_scale = scale.abs();
    if abs_scale >= 1.0 && (abs_scale - abs_scale.round()).abs() < 1e-9 {
        return 0;
    }

    let mut temp = abs_scale;
    let mut precision = 0u8;

    while precision < 6 {
        if (temp - temp.round()).abs() < 1e-9 {
            break;
        }
        temp *= 10.0;
        precision += 1;
    }

    precision
}

/// Round a value to the specified number of decimal places
pub fn round_to_precision(value: f64, precision: u8) -> f64 {
    if precision == 0 {
        value.round()
    } else {
        let factor = 10_f64.powi(precision as i32);
        (value * factor).round() / factor
    }
}

/// Round a value based on the scale factor used to produce it
pub fn round_for_scale(value: f64, scale: f64) -> f64 {
    round_to_precision(value, precision_from_scale(scale))
}
