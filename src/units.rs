//! Physical constants and conversions between mixing ratio, number concentration,
//! and column density.
//!
//! All constants are fixed; nothing here is configurable.

/// Universal gas constant as used by the matchup, in J/(mol K)
pub const R_GAS: f64 = 8.314;

/// Standard gravity in m/s2
pub const GRAVITY: f64 = 9.80665;

/// Molar mass of dry air in g/mol
pub const M_AIR: f64 = 28.9644;

/// Factor converting (pressure thickness in Pa) x (mole fraction) into moles per square meter.
///
/// The 1000 converts the molar mass of air from g/mol to kg/mol.
pub const PA_TO_MOL_M2: f64 = 1000.0 / (GRAVITY * M_AIR);

/// Multiplier from mole fraction to parts per billion
pub const PPB: f64 = 1.0e9;

/// Convert a mole fraction (mol/mol) to ppb.
pub fn mole_fraction_to_ppb(x: f64) -> f64 {
    x * PPB
}

/// Convert a mole fraction to a molar concentration (mol/m3) using the ideal gas law
/// at pressure `p` (Pa) and temperature `t` (K).
pub fn mole_fraction_to_concentration(x: f64, p: f64, t: f64) -> f64 {
    x * p / (R_GAS * t)
}

/// Convert a measured molar concentration (mol/m3) into a dry-air mixing ratio in ppb.
///
/// This is the inverse of [`mole_fraction_to_concentration`] followed by division by
/// `(1 - q)`, with `q` the specific humidity (kg/kg) of the air the concentration was
/// measured in. A `q` of exactly 1 divides by zero and yields an infinite or NaN result.
pub fn concentration_to_dry_ppb(conc: f64, p: f64, t: f64, q: f64) -> f64 {
    conc / p * (R_GAS * t) * PPB / (1.0 - q)
}

/// Moles per square meter of a trace gas held in one model layer of pressure thickness
/// `delp` (Pa), with mole fraction `x` and specific humidity `q`.
///
/// The `(1 - q)` factor removes the mass of water vapor from the layer.
pub fn layer_column(x: f64, delp: f64, q: f64) -> f64 {
    x * delp * (1.0 - q) * PA_TO_MOL_M2
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_column_factor() {
        // 1000 / (9.80665 * 28.9644) computed by hand
        assert_relative_eq!(PA_TO_MOL_M2, 3.5205846, epsilon = 1e-7);
    }

    #[test]
    fn test_concentration_round_trip() {
        let x = 2.5e-8;
        let p = 101325.0;
        let t = 288.15;
        let q = 0.012;
        let conc = mole_fraction_to_concentration(x, p, t);
        // The inverse includes the dry-air correction, so undo it to compare
        let back = concentration_to_dry_ppb(conc, p, t, q) * (1.0 - q);
        assert_relative_eq!(back, mole_fraction_to_ppb(x), max_relative = 1e-12);
    }

    #[test]
    fn test_saturated_humidity_is_not_clamped() {
        let v = concentration_to_dry_ppb(1e-6, 1e5, 290.0, 1.0);
        assert!(v.is_infinite());
    }

    #[test]
    fn test_layer_column() {
        let c = layer_column(2e-8, 100.0, 0.01);
        assert_relative_eq!(c, 2e-8 * 100.0 * 0.99 * PA_TO_MOL_M2);
    }
}
