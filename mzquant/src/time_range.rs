use std::fmt::Display;

use mzpeaks::coordinate::Span1D;

/// A closed retention time interval in minutes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// A window of `width` centered on `time`, never starting before zero
    pub fn centered(time: f64, width: f64) -> Self {
        Self::new((time - width / 2.0).max(0.0), time + width / 2.0)
    }

    /// `tolerance` on either side of `time`, clipped to `[0, limit]`
    pub fn clipped(time: f64, tolerance: f64, limit: f64) -> Self {
        Self::new((time - tolerance).max(0.0), (time + tolerance).min(limit))
    }

    pub fn contains_time(&self, time: f64) -> bool {
        self.start <= time && time <= self.end
    }
}

impl Span1D for TimeRange {
    type DimType = f64;

    fn start(&self) -> Self::DimType {
        self.start
    }

    fn end(&self) -> Self::DimType {
        self.end
    }
}

/// Unbounded above
impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: f64::INFINITY,
        }
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_centered_clips_at_zero() {
        let t = TimeRange::centered(0.1, 0.5);
        assert_eq!(t.start, 0.0);
        assert!((t.end - 0.35).abs() < 1e-12);
        assert!(t.contains_time(0.2));
        assert!(!t.contains_time(0.4));
    }

    #[test]
    fn test_clipped() {
        let t = TimeRange::clipped(5.0, 0.5, 5.2);
        assert_eq!(t, TimeRange::new(4.5, 5.2));
        let t = TimeRange::clipped(0.2, 0.5, 10.0);
        assert_eq!(t.start(), 0.0);
        assert!((t.end() - 0.7).abs() < 1e-12);
        assert!(TimeRange::default().contains_time(1e9));
    }
}
