// Fader curve shared with the host UI
//
// A fader position `def` in [0, 1] maps to decibels on a logarithmic curve with a
// 6 dB offset and a 96 dB range. Both directions must agree with the host's own
// faders, so the constants are fixed.

/// Offset of the logarithmic fader curve in dB
pub const LOG_OFFSET_DB: f32 = 6.0;
/// Range of the logarithmic fader curve in dB
pub const LOG_RANGE_DB: f32 = 96.0;
/// -log10(LOG_OFFSET_DB)
pub const LOG_OFFSET_VAL: f32 = -0.778_151_25;
/// -log10(LOG_RANGE_DB + LOG_OFFSET_DB)
pub const LOG_RANGE_VAL: f32 = -2.008_600_2;

/// Fader position to dB: 1 -> 0 dB, 0 -> -inf
pub fn def_to_db(def: f32) -> f32 {
    if def >= 1.0 {
        return 0.0;
    }
    if def <= 0.0 {
        return f32::NEG_INFINITY;
    }
    let span = LOG_RANGE_DB + LOG_OFFSET_DB;
    -span * (span / LOG_OFFSET_DB).powf(-def) + LOG_OFFSET_DB
}

/// dB to fader position, the inverse of [`def_to_db`]
pub fn db_to_def(db: f32) -> f32 {
    if db >= 0.0 {
        return 1.0;
    }
    if db <= -LOG_RANGE_DB {
        return 0.0;
    }
    (-(-db + LOG_OFFSET_DB).log10() - LOG_RANGE_VAL) / (LOG_OFFSET_VAL - LOG_RANGE_VAL)
}

/// Linear gain to dB, -inf for silence
pub fn mul_to_db(mul: f32) -> f32 {
    if mul == 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * mul.log10()
    }
}

/// dB to linear gain; non-finite input (e.g. -inf) is silence
pub fn db_to_mul(db: f32) -> f32 {
    if db.is_finite() {
        10.0_f32.powf(db / 20.0)
    } else {
        0.0
    }
}

/// Fader position straight to linear gain
pub fn def_to_mul(def: f32) -> f32 {
    db_to_mul(def_to_db(def))
}

/// Linear gain straight to fader position
pub fn mul_to_def(mul: f32) -> f32 {
    db_to_def(mul_to_db(mul))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_their_definitions() {
        assert!((LOG_OFFSET_VAL - (-(LOG_OFFSET_DB.log10()))).abs() < 1e-6);
        assert!((LOG_RANGE_VAL - (-((LOG_RANGE_DB + LOG_OFFSET_DB).log10()))).abs() < 1e-6);
    }

    #[test]
    fn test_curve_end_points() {
        assert_eq!(def_to_db(1.0), 0.0);
        assert_eq!(def_to_db(0.0), f32::NEG_INFINITY);
        assert_eq!(db_to_def(0.0), 1.0);
        assert_eq!(db_to_def(-120.0), 0.0);
        assert_eq!(db_to_mul(f32::NEG_INFINITY), 0.0);
        assert_eq!(mul_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_unity_gain_is_zero_db() {
        assert!(mul_to_db(1.0).abs() < 1e-6);
        assert!((db_to_mul(-6.0) - 0.501_187).abs() < 1e-4);
    }
}
