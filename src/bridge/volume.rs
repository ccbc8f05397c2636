//! Volume curve conversions
//!
//! Absolute controllers set an explicit position mapped through a
//! -60dB..0dB logarithmic curve; relative controllers nudge the last known
//! value by a bounded dB increment. The floor clamps to hard-zero rather
//! than a very small multiplier so "fader all the way down" is silence.

/// Bottom of the usable curve
pub const DB_FLOOR: f32 = -60.0;

/// dB applied per relative delta unit
pub const DB_PER_DELTA: f32 = 0.5;

/// Largest dB change a single relative event may apply
pub const MAX_DB_STEP: f32 = 3.0;

/// Positions at or below this couple mute=true on absolute moves
pub const MUTE_COUPLING_POSITION: f32 = 0.01;

/// Multiplier for a dB value
pub fn db_to_mul(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// dB for a multiplier; zero and below map to the floor
pub fn mul_to_db(mul: f32) -> f32 {
    if mul <= 0.0 {
        DB_FLOOR
    } else {
        (20.0 * mul.log10()).max(DB_FLOOR)
    }
}

/// Map a normalized fader position [0,1] to a volume multiplier.
///
/// Position 1.0 is 0 dB (unity); position 0.0 hits the floor and clamps to
/// hard-zero.
pub fn position_to_mul(position: f32) -> f32 {
    let position = position.clamp(0.0, 1.0);
    let db = DB_FLOOR * (1.0 - position);
    if db <= DB_FLOOR + 1e-3 {
        0.0
    } else {
        db_to_mul(db)
    }
}

/// Inverse of [`position_to_mul`], for snapshot display
pub fn mul_to_position(mul: f32) -> f32 {
    if mul <= 0.0 {
        return 0.0;
    }
    (1.0 - mul_to_db(mul) / DB_FLOOR).clamp(0.0, 1.0)
}

/// Bounded dB step for one relative delta
pub fn bounded_db_step(delta: i32) -> f32 {
    (delta as f32 * DB_PER_DELTA).clamp(-MAX_DB_STEP, MAX_DB_STEP)
}

/// Apply a relative delta to the last known multiplier
pub fn apply_relative(mul: f32, delta: i32) -> f32 {
    let db = mul_to_db(mul) + bounded_db_step(delta);
    if db <= DB_FLOOR {
        0.0
    } else {
        db_to_mul(db.min(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_endpoints() {
        assert_eq!(position_to_mul(1.0), 1.0);
        assert_eq!(position_to_mul(0.0), 0.0);
        // Out-of-range positions clamp first
        assert_eq!(position_to_mul(1.5), 1.0);
        assert_eq!(position_to_mul(-0.2), 0.0);
    }

    #[test]
    fn test_floor_is_hard_zero_not_epsilon() {
        // -60 dB would be ~0.001; the curve must return exactly 0 instead
        assert_eq!(position_to_mul(0.0), 0.0);
        assert!(position_to_mul(0.05) > 0.0);
    }

    #[test]
    fn test_midpoint_is_minus_30_db() {
        let mul = position_to_mul(0.5);
        let expected = db_to_mul(-30.0);
        assert!((mul - expected).abs() < 1e-6);
    }

    #[test]
    fn test_position_round_trip() {
        for pos in [0.1f32, 0.25, 0.5, 0.75, 1.0] {
            let back = mul_to_position(position_to_mul(pos));
            assert!((back - pos).abs() < 1e-4, "pos {} -> {}", pos, back);
        }
    }

    #[test]
    fn test_bounded_db_step() {
        assert_eq!(bounded_db_step(1), 0.5);
        assert_eq!(bounded_db_step(-2), -1.0);
        // Large deltas clamp to the bound
        assert_eq!(bounded_db_step(63), MAX_DB_STEP);
        assert_eq!(bounded_db_step(-63), -MAX_DB_STEP);
    }

    #[test]
    fn test_apply_relative_accumulates_and_clamps() {
        let mut mul = db_to_mul(-10.0);
        mul = apply_relative(mul, 2); // -9 dB
        assert!((mul_to_db(mul) + 9.0).abs() < 1e-3);

        // Ceiling at 0 dB
        let up = apply_relative(1.0, 63);
        assert_eq!(up, 1.0);

        // Floor collapses to hard zero
        let down = apply_relative(db_to_mul(-59.0), -63);
        assert_eq!(down, 0.0);
    }

    #[test]
    fn test_relative_from_silence_stays_at_floor() {
        // From hard zero, the last known dB is the floor; a small bump must
        // come back out of it deterministically
        let mul = apply_relative(0.0, 4);
        assert!((mul_to_db(mul) - (DB_FLOOR + 2.0)).abs() < 1e-3);
    }
}
