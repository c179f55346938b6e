//! Level conversions shared by every tracker
//!
//! All conversions are floored so silence never produces `-inf`.

/// Smallest linear value treated as signal
pub const LINEAR_EPSILON: f64 = 1e-10;

/// [`LINEAR_EPSILON`] expressed as a mean-square power
const POWER_EPSILON: f64 = LINEAR_EPSILON * LINEAR_EPSILON;

/// Floor for every dB / LUFS reading
pub const DB_FLOOR: f64 = -120.0;

/// BS.1770 loudness offset applied to mean-square power
pub const LOUDNESS_OFFSET: f64 = -0.691;

/// Absolute gate for block loudness (LUFS)
pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;

/// Relative gate below the ungated integrated loudness (LU)
pub const RELATIVE_GATE_LU: f64 = -10.0;

/// Convert a linear amplitude to dB, floored at [`DB_FLOOR`]
#[inline]
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    (20.0 * amplitude.abs().max(LINEAR_EPSILON).log10()).max(DB_FLOOR)
}

/// Convert a mean-square power to dB, floored at [`DB_FLOOR`]
#[inline]
pub fn power_to_db(power: f64) -> f64 {
    (10.0 * power.max(POWER_EPSILON).log10()).max(DB_FLOOR)
}

/// Convert a K-weighted mean-square power to loudness (LUFS)
#[inline]
pub fn power_to_lufs(power: f64) -> f64 {
    (LOUDNESS_OFFSET + 10.0 * power.max(POWER_EPSILON).log10()).max(DB_FLOOR)
}

/// Inverse of [`power_to_lufs`] (without the floor)
#[inline]
pub fn lufs_to_power(lufs: f64) -> f64 {
    10.0_f64.powf((lufs - LOUDNESS_OFFSET) / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_is_zero_db() {
        assert!(amplitude_to_db(1.0).abs() < 1e-12);
        assert!(amplitude_to_db(-1.0).abs() < 1e-12);
        assert!((amplitude_to_db(0.5) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn silence_hits_floor() {
        assert_eq!(amplitude_to_db(0.0), DB_FLOOR);
        assert_eq!(power_to_db(0.0), DB_FLOOR);
        assert_eq!(power_to_lufs(0.0), DB_FLOOR);
        assert!(amplitude_to_db(0.0).is_finite());
    }

    #[test]
    fn power_floor_matches_amplitude_floor() {
        // A 1e-10 amplitude is a 1e-20 power; both read as the floor
        assert_eq!(power_to_db(1e-20), amplitude_to_db(1e-10));
        assert!((power_to_db(1e-8) + 80.0).abs() < 1e-9);
        assert!((power_to_lufs(1e-8) + 80.691).abs() < 1e-9);
    }

    #[test]
    fn lufs_power_inverse() {
        for lufs in [-60.0, -23.0, -14.0, -3.01, 0.0] {
            let back = power_to_lufs(lufs_to_power(lufs));
            assert!((back - lufs).abs() < 1e-9, "{lufs} -> {back}");
        }
    }
}
