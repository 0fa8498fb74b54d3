//! Sign-aware mass tolerance windows.
//!
//! Negative polarity masses are carried as negative numbers throughout this crate, so a
//! relative window around a mass must flip its factors when the mass is negative to keep
//! `low <= mass <= high`. [`mzpeaks::Tolerance::bounds`] does not do this, so all windows
//! used for searching are built here.
use mzpeaks::coordinate::Span1D;
use mzpeaks::Tolerance;

/// A closed mass interval `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassWindow {
    pub low: f64,
    pub high: f64,
}

impl MassWindow {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Build the window around `center` for `tolerance`.
    ///
    /// For [`Tolerance::PPM`], a non-negative center produces `(v(1-ppm), v(1+ppm))`
    /// and a negative center produces `(v(1+ppm), v(1-ppm))`. A center of exactly zero
    /// takes the non-negative branch.
    pub fn around(center: f64, tolerance: Tolerance) -> Self {
        match tolerance {
            Tolerance::PPM(ppm) => {
                let ppm = ppm / 1e6;
                if center >= 0.0 {
                    Self::new(center * (1.0 - ppm), center * (1.0 + ppm))
                } else {
                    Self::new(center * (1.0 + ppm), center * (1.0 - ppm))
                }
            }
            Tolerance::Da(da) => Self::new(center - da, center + da),
        }
    }

    /// Shorthand for [`MassWindow::around`] with a parts-per-million tolerance
    pub fn ppm(center: f64, ppm: f64) -> Self {
        Self::around(center, Tolerance::PPM(ppm))
    }

    pub fn contains_mass(&self, mass: f64) -> bool {
        self.low <= mass && mass <= self.high
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

impl Span1D for MassWindow {
    type DimType = f64;

    fn start(&self) -> Self::DimType {
        self.low
    }

    fn end(&self) -> Self::DimType {
        self.high
    }
}

/// The relative error of `observed` against `target` in parts-per-million
pub fn ppm_error(observed: f64, target: f64) -> f64 {
    1e6 * (observed - target) / target
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_positive_window() {
        let w = MassWindow::ppm(100.0, 20.0);
        assert_is_close!(w.low, 99.998, 1e-9, "low");
        assert_is_close!(w.high, 100.002, 1e-9, "high");
        assert!(w.contains_mass(100.0));
        assert!(w.contains_mass(100.0015));
        assert!(!w.contains_mass(100.0025));
    }

    #[test]
    fn test_negative_window() {
        let w = MassWindow::ppm(-100.0, 20.0);
        assert!(w.low < w.high);
        assert_is_close!(w.low, -100.002, 1e-9, "low");
        assert_is_close!(w.high, -99.998, 1e-9, "high");
        assert!(w.contains_mass(-100.0));
    }

    #[test]
    fn test_zero_center() {
        let w = MassWindow::ppm(0.0, 20.0);
        assert_eq!(w.low, 0.0);
        assert_eq!(w.high, 0.0);
        assert!(w.contains_mass(0.0));
    }

    #[test]
    fn test_window_encloses_and_is_relatively_symmetric() {
        for v in [1e-3, 0.5, 12.0, 300.0, 1234.5678, 99999.0] {
            for ppm in [0.1, 5.0, 20.0, 1000.0, 500_000.0] {
                for v in [v, -v] {
                    let w = MassWindow::ppm(v, ppm);
                    assert!(w.low <= v && v <= w.high, "{v} not in {w:?}");
                    let below = (v - w.low) / v.abs();
                    let above = (w.high - v) / v.abs();
                    assert_is_close!(below, above, 1e-12, "relative spread");
                }
            }
        }
    }

    #[test]
    fn test_dalton_window() {
        let w = MassWindow::around(-50.0, Tolerance::Da(0.5));
        assert_eq!(w.low, -50.5);
        assert_eq!(w.high, -49.5);
        assert!(w.contains(&-50.2));
        assert_is_close!(w.width(), 1.0, 1e-12, "width");
    }

    #[test]
    fn test_ppm_error() {
        assert_is_close!(ppm_error(300.0003, 300.0), 1.0, 1e-6, "ppm");
        assert_is_close!(ppm_error(-300.0, -300.0), 0.0, 1e-12, "ppm");
    }
}
