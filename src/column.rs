//! Partial column integration of model profiles.
//!
//! Pandora reports its NO2 partial column from the surface up to a retrieved layer
//! height. To compare, the model profile at the matched grid cell is integrated from
//! the surface upward until that height is reached. The integration walks whole
//! model layers and stops after the first layer which only partly lies below the
//! target height; that layer contributes in proportion to the fraction of its
//! geometric thickness below the target.
use ndarray::{Array1, ArrayView1};

use crate::units;

#[derive(Debug, thiserror::Error)]
pub enum ColumnError {
    #[error("Profile arrays must all have the same length, got delp = {delp}, mixing ratio = {mixing_ratio}, specific humidity = {specific_humidity}, mid-layer height = {mid_height}")]
    LengthMismatch { delp: usize, mixing_ratio: usize, specific_humidity: usize, mid_height: usize },
    #[error("Profile has no layers")]
    Empty,
}

/// A model profile at one grid cell, ordered from the surface upward.
#[derive(Debug, Clone, PartialEq)]
pub struct VerticalProfile {
    /// Pressure thickness of each layer (Pa)
    pub delp: Array1<f64>,
    /// Trace gas mole fraction (mol/mol)
    pub mixing_ratio: Array1<f64>,
    /// Specific humidity (kg/kg)
    pub specific_humidity: Array1<f64>,
    /// Geometric height of each layer's midpoint above the surface (m)
    pub mid_height: Array1<f64>,
}

impl VerticalProfile {
    /// Create a profile from arrays already ordered surface-first.
    pub fn new(delp: Array1<f64>, mixing_ratio: Array1<f64>, specific_humidity: Array1<f64>, mid_height: Array1<f64>) -> Result<Self, ColumnError> {
        let n = delp.len();
        if mixing_ratio.len() != n || specific_humidity.len() != n || mid_height.len() != n {
            return Err(ColumnError::LengthMismatch {
                delp: n,
                mixing_ratio: mixing_ratio.len(),
                specific_humidity: specific_humidity.len(),
                mid_height: mid_height.len()
            });
        }

        if n == 0 {
            return Err(ColumnError::Empty);
        }

        Ok(Self { delp, mixing_ratio, specific_humidity, mid_height })
    }

    /// Create a profile from arrays in model level order (top of atmosphere first),
    /// reversing them so that index 0 is the surface layer.
    pub fn from_top_down(delp: ArrayView1<f64>, mixing_ratio: ArrayView1<f64>, specific_humidity: ArrayView1<f64>, mid_height: ArrayView1<f64>) -> Result<Self, ColumnError> {
        fn flip(a: ArrayView1<f64>) -> Array1<f64> {
            a.slice(ndarray::s![..;-1]).to_owned()
        }

        Self::new(flip(delp), flip(mixing_ratio), flip(specific_humidity), flip(mid_height))
    }

    pub fn nlev(&self) -> usize {
        self.delp.len()
    }

    /// Height of the boundary between layers `i` and `i+1`.
    ///
    /// Interior boundaries are halfway between mid-layer heights. The top of the
    /// uppermost layer has no layer above it, so it is placed as far above the
    /// midpoint as the layer's bottom is below it.
    pub fn layer_top(&self, i: usize) -> f64 {
        let z = &self.mid_height;
        if i + 1 < z.len() {
            (z[i] + z[i+1]) / 2.0
        } else {
            2.0 * z[i] - self.layer_bottom(i)
        }
    }

    /// Height of the bottom of layer `i`; the surface (0 m) for the first layer.
    pub fn layer_bottom(&self, i: usize) -> f64 {
        if i == 0 {
            0.0
        } else {
            (self.mid_height[i-1] + self.mid_height[i]) / 2.0
        }
    }
}

/// The result of integrating a profile up to a target height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialColumn {
    /// Trace gas column amount (mol/m2)
    pub amount: f64,
    /// How many layers (from the surface) contributed
    pub layers_used: usize,
    /// `false` if the target height is above the top of the modeled atmosphere,
    /// in which case `amount` is the sum over every layer.
    pub reached_target: bool,
}

/// Integrate the trace gas column from the surface to `target_height` (m).
///
/// Layers entirely at or below the target contribute fully. The first layer whose top
/// is above the target contributes the fraction `(H - bottom) / (top - bottom)` and ends
/// the integration. A target exactly on a layer boundary therefore counts that layer in
/// full and adds nothing from the layer above.
///
/// If every layer is consumed without reaching the target, a warning is logged and the
/// full-column sum is returned with `reached_target = false`.
pub fn integrate_partial_column(profile: &VerticalProfile, target_height: f64) -> PartialColumn {
    let mut amount = 0.0;
    for i in 0..profile.nlev() {
        let top = profile.layer_top(i);
        let frac = if top > target_height {
            let bottom = profile.layer_bottom(i);
            (target_height - bottom) / (top - bottom)
        } else {
            1.0
        };

        amount += units::layer_column(profile.mixing_ratio[i], profile.delp[i], profile.specific_humidity[i]) * frac;
        if frac < 1.0 {
            return PartialColumn { amount, layers_used: i + 1, reached_target: true };
        }
    }

    log::warn!(
        "Pandora layer height ({target_height} m) greater than entire model atmosphere ({} m), using the full column",
        profile.layer_top(profile.nlev() - 1)
    );
    PartialColumn { amount, layers_used: profile.nlev(), reached_target: false }
}

/// Model state at the surface of the matched grid cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceState {
    /// Surface pressure (Pa)
    pub pressure: f64,
    /// Temperature of the lowest model layer (K)
    pub temperature: f64,
    /// Trace gas mole fraction in the lowest model layer (mol/mol)
    pub mixing_ratio: f64,
}

/// All quantities derived from the model for one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnQuantities {
    /// Model surface mixing ratio (ppb)
    pub model_sfc_ppb: f64,
    /// Model surface concentration (mol/m3)
    pub model_sfc_conc: f64,
    /// Model partial column up to the observed layer height (mol/m2)
    pub model_partial_column: f64,
    /// The instrument's surface concentration expressed as a dry mixing ratio (ppb)
    pub instrument_sfc_ppb: f64,
}

/// Derive the model surface and partial column quantities, and convert the measured surface
/// concentration to a mixing ratio with the same model surface conditions.
///
/// `target_height` is in meters and `measured_conc` in mol/m3. The dry-air correction for the
/// instrument value uses the specific humidity of the lowest model layer.
pub fn compute_column_quantities(profile: &VerticalProfile, surface: &SurfaceState, target_height: f64, measured_conc: f64) -> ColumnQuantities {
    let model_sfc_ppb = units::mole_fraction_to_ppb(surface.mixing_ratio);
    let model_sfc_conc = units::mole_fraction_to_concentration(surface.mixing_ratio, surface.pressure, surface.temperature);
    let column = integrate_partial_column(profile, target_height);
    let instrument_sfc_ppb = units::concentration_to_dry_ppb(
        measured_conc, surface.pressure, surface.temperature, profile.specific_humidity[0]
    );

    ColumnQuantities {
        model_sfc_ppb,
        model_sfc_conc,
        model_partial_column: column.amount,
        instrument_sfc_ppb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rstest::{fixture, rstest};

    #[fixture]
    fn three_layers() -> VerticalProfile {
        VerticalProfile::new(
            array![600.0, 1200.0, 1800.0],
            array![3e-8, 2e-8, 1e-8],
            array![0.01, 0.008, 0.005],
            array![50.0, 150.0, 300.0],
        ).unwrap()
    }

    fn closed_form(p: &VerticalProfile, fracs: &[f64]) -> f64 {
        fracs.iter().enumerate()
            .map(|(i, f)| p.mixing_ratio[i] * p.delp[i] * (1.0 - p.specific_humidity[i]) * units::PA_TO_MOL_M2 * f)
            .sum()
    }

    #[test]
    fn test_single_layer_example() {
        let p = VerticalProfile::new(array![100.0], array![2e-8], array![0.01], array![50.0]).unwrap();
        assert_relative_eq!(p.layer_top(0), 100.0);
        let col = integrate_partial_column(&p, 40.0);
        assert!(col.reached_target);
        assert_eq!(col.layers_used, 1);
        // 2e-8 * 100 * 0.99 * 0.4 * 1000 / (9.80665 * 28.9644)
        assert_relative_eq!(col.amount, 2.78830302260195e-06, max_relative = 1e-12);
    }

    #[rstest]
    fn test_fractional_top_layer(three_layers: VerticalProfile) {
        // Layer 0 spans 0-100 m, layer 1 spans 100-225 m, so 200 m is 80% through layer 1
        let col = integrate_partial_column(&three_layers, 200.0);
        assert!(col.reached_target);
        assert_eq!(col.layers_used, 2);
        assert_relative_eq!(col.amount, closed_form(&three_layers, &[1.0, 0.8]), max_relative = 1e-12);
        assert_relative_eq!(col.amount, 0.00012979128100057137, max_relative = 1e-10);
    }

    #[rstest]
    fn test_boundary_height_does_not_overcount(three_layers: VerticalProfile) {
        let col = integrate_partial_column(&three_layers, 100.0);
        assert!(col.reached_target);
        // Layer 0 counts fully, layer 1 gets a zero fraction and ends the loop
        assert_eq!(col.layers_used, 2);
        assert_relative_eq!(col.amount, closed_form(&three_layers, &[1.0]), max_relative = 1e-12);
    }

    #[rstest]
    fn test_running_sum_non_decreasing(three_layers: VerticalProfile) {
        let mut last = 0.0;
        for h in (1..=375).map(|h| h as f64) {
            let col = integrate_partial_column(&three_layers, h);
            assert!(col.amount >= last, "column decreased going from {} to {h} m", h - 1.0);
            last = col.amount;
        }
    }

    #[rstest]
    fn test_target_above_atmosphere(three_layers: VerticalProfile) {
        // Top of the last layer = 2 * 300 - 225 = 375 m
        assert_relative_eq!(three_layers.layer_top(2), 375.0);
        let col = integrate_partial_column(&three_layers, 5000.0);
        assert!(!col.reached_target);
        assert_eq!(col.layers_used, 3);
        assert_relative_eq!(col.amount, closed_form(&three_layers, &[1.0, 1.0, 1.0]), max_relative = 1e-12);
    }

    #[test]
    fn test_from_top_down_reverses() {
        let p = VerticalProfile::from_top_down(
            array![1800.0, 1200.0, 600.0].view(),
            array![1e-8, 2e-8, 3e-8].view(),
            array![0.005, 0.008, 0.01].view(),
            array![300.0, 150.0, 50.0].view(),
        ).unwrap();
        assert_eq!(p.delp, array![600.0, 1200.0, 1800.0]);
        assert_eq!(p.mid_height, array![50.0, 150.0, 300.0]);
        assert_relative_eq!(p.specific_humidity[0], 0.01);
    }

    #[test]
    fn test_length_mismatch() {
        let err = VerticalProfile::new(array![1.0, 2.0], array![1.0], array![1.0, 2.0], array![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, ColumnError::LengthMismatch { delp: 2, mixing_ratio: 1, .. }));
    }

    #[rstest]
    fn test_quantities_round_trip(three_layers: VerticalProfile) {
        let surface = SurfaceState { pressure: 100_500.0, temperature: 291.3, mixing_ratio: 3e-8 };
        let q = compute_column_quantities(&three_layers, &surface, 200.0, 0.0);
        assert_relative_eq!(q.model_sfc_ppb, 30.0, max_relative = 1e-12);

        // Feeding the model's own concentration back in recovers its mixing ratio, up to the dry-air factor
        let q2 = compute_column_quantities(&three_layers, &surface, 200.0, q.model_sfc_conc);
        assert_relative_eq!(q2.instrument_sfc_ppb * (1.0 - 0.01), q.model_sfc_ppb, max_relative = 1e-12);
    }
}
