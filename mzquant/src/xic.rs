//! Densified extracted ion chromatograms.
//!
//! An [`Xic`] has one [`XicPoint`] for every scan time of its sample, whether or not
//! anything was detected at that time. Points without a detection keep the literal
//! `(0, 0)` intensity/m/z values but are flagged as absent.
use std::cmp::Ordering;

use tracing::trace;

use crate::peaks::{Detection, Polarity};

/// One scan time of an [`Xic`]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct XicPoint {
    pub time: f64,
    pub intensity: f64,
    /// The observed m/z, always positive for present points
    pub mz: f64,
    /// Whether a detection was overlaid onto this point
    pub present: bool,
}

impl XicPoint {
    /// The `(0, 0)` "no signal" point at `time`
    pub fn absent(time: f64) -> Self {
        Self {
            time,
            intensity: 0.0,
            mz: 0.0,
            present: false,
        }
    }

    /// Compare two points by `(intensity, mz)`
    pub fn signal_cmp(&self, other: &Self) -> Ordering {
        self.intensity
            .total_cmp(&other.intensity)
            .then(self.mz.total_cmp(&other.mz))
    }

    /// Compare two points by `(intensity, mz, time)`
    pub fn signal_time_cmp(&self, other: &Self) -> Ordering {
        self.signal_cmp(other)
            .then(self.time.total_cmp(&other.time))
    }
}

/// Select the first maximum of `iter` under `cmp`. [`Iterator::max_by`] returns the last.
fn first_max_by<T, I: Iterator<Item = T>, F: Fn(&T, &T) -> Ordering>(iter: I, cmp: F) -> Option<T> {
    iter.fold(None, |best, item| match best {
        None => Some(item),
        Some(best) => {
            if cmp(&item, &best) == Ordering::Greater {
                Some(item)
            } else {
                Some(best)
            }
        }
    })
}

/// A single sample's chromatogram for one target mass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Xic {
    pub points: Vec<XicPoint>,
}

impl Xic {
    /// Build a chromatogram with one absent point per scan time, then overlay the most
    /// intense detection at each time, ties broken by the larger m/z.
    ///
    /// For negative polarity the detection masses are negated before comparison so that
    /// observed masses are reported as positive values. Detections at times which are not
    /// in `scan_times` are ignored.
    pub fn densify<'a, I: IntoIterator<Item = &'a Detection>>(
        scan_times: &[f64],
        detections: I,
        polarity: Polarity,
    ) -> Self {
        let mut points: Vec<XicPoint> = scan_times.iter().copied().map(XicPoint::absent).collect();
        for det in detections {
            let idx = match points.binary_search_by(|p| p.time.total_cmp(&det.time)) {
                Ok(idx) => idx,
                Err(_) => {
                    trace!("Detection at {} has no matching scan", det.time);
                    continue;
                }
            };
            let candidate = XicPoint {
                time: det.time,
                intensity: det.intensity,
                mz: polarity.sign() * det.mz,
                present: true,
            };
            let current = &mut points[idx];
            if candidate.signal_cmp(current) == Ordering::Greater {
                *current = candidate;
            }
        }
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, XicPoint> {
        self.points.iter()
    }

    /// The first point with the greatest `(intensity, mz)`, or [`None`] if there are no
    /// scans at all
    pub fn robust_max(&self) -> Option<&XicPoint> {
        first_max_by(self.points.iter(), |a, b| a.signal_cmp(b))
    }

    /// The point with the greatest `(intensity, mz, time)` in `[start, stop]`, or [`None`]
    /// when no scan falls within that window
    pub fn refined_max(&self, start: f64, stop: f64) -> Option<&XicPoint> {
        self.points
            .iter()
            .filter(|p| start <= p.time && p.time <= stop)
            .max_by(|a, b| a.signal_time_cmp(b))
    }

    /// The point at exactly `time`, if that is one of this chromatogram's scan times
    pub fn imposed_max(&self, time: f64) -> Option<&XicPoint> {
        self.points.iter().find(|p| p.time == time)
    }
}

/// Pick the first sample whose [`Xic::robust_max`] is greatest, returning its position and
/// the winning point
pub fn best_sample(xics: &[Xic]) -> Option<(usize, &XicPoint)> {
    first_max_by(
        xics.iter()
            .enumerate()
            .filter_map(|(i, x)| x.robust_max().map(|p| (i, p))),
        |a, b| a.1.signal_cmp(b.1),
    )
}
