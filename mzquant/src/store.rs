//! Access to peak and scan stores.
//!
//! The clustering and quantification engines only need a handful of queries from a store,
//! described by [`PeakStore`]. All values handed out by a store are de-scaled: masses are
//! floating point m/z (negative for negative polarity) and times are minutes.
use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::peaks::{Detection, FragmentDetection, Polarity, Sample, SampleId, ScanClass};
use crate::time_range::TimeRange;
use crate::tolerance::MassWindow;

mod memory;
mod sqlite;

pub use memory::MemoryPeakStore;
pub use sqlite::SqlitePeakStore;

/// The default number of stored mass units per Dalton, 1 unit = 0.0001 Da
pub const DEFAULT_MASS_SCALE: f64 = 10_000.0;
/// The default number of stored time units per second, 1 unit = 0.001 s
pub const DEFAULT_TIME_SCALE: f64 = 1_000.0;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An error occurred while querying the peak store: {0}")]
    Sqlite(
        #[source]
        #[from]
        rusqlite::Error,
    ),
    #[error("Sanity check failure: expected {expected} samples but observed {observed} files with scans")]
    InconsistentSamples { expected: usize, observed: usize },
    #[error("Invalid scale factor {name}={value}")]
    InvalidScaleFactor { name: &'static str, value: f64 },
}

/// The integer scaling a store uses to persist masses and times.
///
/// Masses are stored as `round(mz * mass)` and times as `round(minutes * 60 * time)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub mass: f64,
    pub time: f64,
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self {
            mass: DEFAULT_MASS_SCALE,
            time: DEFAULT_TIME_SCALE,
        }
    }
}

impl ScaleFactors {
    pub fn new(mass: f64, time: f64) -> Result<Self, StoreError> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(StoreError::InvalidScaleFactor {
                name: "mass_translation_factor",
                value: mass,
            });
        }
        if !(time.is_finite() && time > 0.0) {
            return Err(StoreError::InvalidScaleFactor {
                name: "time_translation_factor",
                value: time,
            });
        }
        Ok(Self { mass, time })
    }

    pub fn mass_to_stored(&self, mz: f64) -> i64 {
        (mz * self.mass).round() as i64
    }

    pub fn mass_from_stored(&self, stored: i64) -> f64 {
        stored as f64 / self.mass
    }

    pub fn time_to_stored(&self, minutes: f64) -> i64 {
        (minutes * 60.0 * self.time).round() as i64
    }

    pub fn time_from_stored(&self, stored: i64) -> f64 {
        stored as f64 / (60.0 * self.time)
    }
}

/// The queries the engines need from a collection of peaks and scans
pub trait PeakStore {
    /// All samples in the store, ordered by id
    fn samples(&self) -> Result<Vec<Sample>, StoreError>;

    /// Every `(sample, time)` pair of scans with the given polarity and class, ordered
    /// by sample then time
    fn scan_times(
        &self,
        polarity: Polarity,
        scan_class: ScanClass,
    ) -> Result<Vec<(SampleId, f64)>, StoreError>;

    /// All MS1 detections with a mass in `window` and a time in `time_range`, ordered by
    /// sample, time, then intensity
    fn query_range(
        &self,
        window: &MassWindow,
        time_range: &TimeRange,
    ) -> Result<Vec<Detection>, StoreError>;

    /// All MS1 detections more intense than `min_intensity`, most intense first
    fn intense_peaks(&self, min_intensity: f64) -> Result<Vec<Detection>, StoreError>;

    /// All fragment detections whose precursor-to-fragment loss lies in `loss_window`,
    /// most intense first. When `absolute` is set the magnitude of the loss is compared.
    fn neutral_losses(
        &self,
        loss_window: &MassWindow,
        absolute: bool,
    ) -> Result<Vec<FragmentDetection>, StoreError>;

    /// Verify that the number of registered samples matches the number of samples with
    /// scans. Inconsistent stores must not be processed.
    fn check_consistency(&self) -> Result<(), StoreError>;
}

/// Scan times of one polarity and class, grouped per sample in the sample order of the store.
///
/// Samples without any scan of this kind carry an empty time list.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanTimeIndex {
    pub polarity: Polarity,
    times: Vec<Vec<f64>>,
}

impl ScanTimeIndex {
    pub fn new(polarity: Polarity, samples: &[Sample], pairs: Vec<(SampleId, f64)>) -> Self {
        let mut grouped: Vec<(SampleId, Vec<f64>)> = Vec::new();
        for (sample, chunk) in &pairs.into_iter().group_by(|(sample, _)| *sample) {
            let mut times: Vec<f64> = chunk.map(|(_, t)| t).collect();
            times.sort_by(|a, b| a.total_cmp(b));
            times.dedup();
            grouped.push((sample, times));
        }
        let times = samples
            .iter()
            .map(|s| {
                grouped
                    .iter()
                    .find(|(sid, _)| *sid == s.id)
                    .map(|(_, times)| times.clone())
                    .unwrap_or_default()
            })
            .collect();
        Self { polarity, times }
    }

    /// The scan times of the `i`th sample
    pub fn times_for(&self, i: usize) -> &[f64] {
        self.times.get(i).map(|t| t.as_slice()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.times.iter().map(|t| t.as_slice())
    }
}

/// The immutable scan layout of a store, loaded once and shared read-only for the rest
/// of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanIndex {
    pub samples: Vec<Sample>,
    pub positive: ScanTimeIndex,
    pub negative: ScanTimeIndex,
}

impl ScanIndex {
    pub fn load<S: PeakStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let samples = store.samples()?;
        let positive = ScanTimeIndex::new(
            Polarity::Positive,
            &samples,
            store.scan_times(Polarity::Positive, ScanClass::MS1)?,
        );
        let negative = ScanTimeIndex::new(
            Polarity::Negative,
            &samples,
            store.scan_times(Polarity::Negative, ScanClass::MS1)?,
        );
        debug!(
            "Loaded scan index for {} samples ({} positive, {} negative scans)",
            samples.len(),
            positive.iter().map(|t| t.len()).sum::<usize>(),
            negative.iter().map(|t| t.len()).sum::<usize>(),
        );
        Ok(Self {
            samples,
            positive,
            negative,
        })
    }

    pub fn for_polarity(&self, polarity: Polarity) -> &ScanTimeIndex {
        match polarity {
            Polarity::Positive => &self.positive,
            Polarity::Negative => &self.negative,
        }
    }

    pub fn sample_names(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.name.as_str())
    }

    pub fn position_of(&self, sample: SampleId) -> Option<usize> {
        self.samples.iter().position(|s| s.id == sample)
    }
}
