//! Physical and numerical constants shared by the grid, response and rebin code.

/// `E[keV] * lambda[Angstrom]` for a photon.
pub const KEV_ANGSTROM: f64 = 12.398_419_843_320_026_f64;

/// Relative tolerance used when checking that adjacent bins do not overlap.
pub const GRID_EDGE_TOLERANCE: f64 = 1.0e-10_f64;

/// Default fractional tolerance when comparing two grids that should coincide.
pub const GRID_MATCH_TOLERANCE: f64 = 1.0e-4_f64;

/// Value substituted for non-positive uncertainties.
pub const DEFAULT_UNCERTAINTY: f64 = 1.0_f64;

#[cfg(test)]
mod tests {
    use super::{DEFAULT_UNCERTAINTY, GRID_EDGE_TOLERANCE, GRID_MATCH_TOLERANCE, KEV_ANGSTROM};

    #[test]
    fn photon_energy_wavelength_product_is_stable() {
        // 1 keV photon sits near 12.4 Angstrom.
        assert!((KEV_ANGSTROM - 12.398_42).abs() < 1.0e-5);
    }

    #[test]
    fn tolerances_are_small_and_positive() {
        for value in [GRID_EDGE_TOLERANCE, GRID_MATCH_TOLERANCE] {
            assert!(value > 0.0 && value < 1.0e-3);
        }
        assert_eq!(DEFAULT_UNCERTAINTY, 1.0);
    }
}
