//! Targeted quantification of analytes from densified chromatograms.
//!
//! Every isotope variant of an analyte is extracted in every sample. The most intense
//! observation across all variants and samples anchors a retention time, each sample then picks
//! its own best time near that anchor, and every variant is measured at exactly those
//! per-sample times.
use std::cmp::Ordering;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::formula::{analyte_mz, AnalyteMassError, FormulaSummary, IonType, IonTypeError};
use crate::labeling::{IsotopeVariant, LabelingError, LabelingSpec};
use crate::peaks::{Detection, Polarity};
use crate::store::{PeakStore, ScanIndex, StoreError};
use crate::time_range::TimeRange;
use crate::tolerance::{ppm_error, MassWindow};
use crate::xic::{best_sample, Xic, XicPoint};

pub const DEFAULT_MZ_TOLERANCE: f64 = 15.0;
pub const DEFAULT_RT_TOLERANCE: f64 = 0.2;
pub const DEFAULT_RT_WINDOW: f64 = 0.5;

/// Defaults for analytes that do not carry their own tolerances
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantParams {
    /// The m/z tolerance in ppm
    pub mz_tolerance: f64,
    /// The half width of the window around the anchor time, in minutes
    pub rt_tolerance: f64,
    /// The width of the extraction window around a point retention time, in minutes
    pub rt_window: f64,
}

impl Default for QuantParams {
    fn default() -> Self {
        Self {
            mz_tolerance: DEFAULT_MZ_TOLERANCE,
            rt_tolerance: DEFAULT_RT_TOLERANCE,
            rt_window: DEFAULT_RT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyteError {
    #[error("Insufficient retention time information, expected a retention time or a start and end time")]
    MissingRetentionTime,
    #[error(transparent)]
    IonType(#[from] IonTypeError),
    #[error(transparent)]
    Mass(#[from] AnalyteMassError),
    #[error(transparent)]
    Labeling(#[from] LabelingError),
}

/// One row of an analyte list, before defaults are applied
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AnalyteRequest {
    pub metabolite: String,
    /// An elemental formula or a signed m/z value
    pub formula: String,
    pub inchikey: Option<String>,
    pub labeling: Option<String>,
    pub ion_type: String,
    pub fdr: Option<i64>,
    pub rt: Option<f64>,
    pub rt_start: Option<f64>,
    pub rt_stop: Option<f64>,
    pub mz_tolerance: Option<f64>,
    pub rt_tolerance: Option<f64>,
}

impl AnalyteRequest {
    pub fn new(metabolite: impl Into<String>, formula: impl Into<String>, ion_type: impl Into<String>) -> Self {
        Self {
            metabolite: metabolite.into(),
            formula: formula.into(),
            ion_type: ion_type.into(),
            ..Default::default()
        }
    }

    pub fn with_rt(mut self, rt: f64) -> Self {
        self.rt = Some(rt);
        self
    }

    pub fn with_rt_window(mut self, start: f64, stop: f64) -> Self {
        self.rt_start = Some(start);
        self.rt_stop = Some(stop);
        self
    }

    pub fn with_labeling(mut self, labeling: impl Into<String>) -> Self {
        self.labeling = Some(labeling.into());
        self
    }

    pub fn with_tolerances(mut self, mz_tolerance: f64, rt_tolerance: f64) -> Self {
        self.mz_tolerance = Some(mz_tolerance);
        self.rt_tolerance = Some(rt_tolerance);
        self
    }

    /// The extraction window: an explicit start and end, or `rt_window` centered on the
    /// point retention time
    pub fn time_range(&self, rt_window: f64) -> Result<TimeRange, AnalyteError> {
        match (self.rt_start, self.rt_stop, self.rt) {
            (Some(start), Some(stop), _) => Ok(TimeRange::new(start, stop)),
            (_, _, Some(rt)) => Ok(TimeRange::centered(rt, rt_window)),
            _ => Err(AnalyteError::MissingRetentionTime),
        }
    }

    /// Compute the target masses of this analyte and fill in missing parameters from `params`
    pub fn resolve(&self, params: &QuantParams) -> Result<ResolvedAnalyte, AnalyteError> {
        let rt_range = self.time_range(params.rt_window)?;
        let (base_mz, polarity, formula) = match self.formula.trim().parse::<f64>() {
            Ok(mz) => (mz, Polarity::of_mass(mz), None),
            Err(_) => {
                let ion_type = IonType::parse(&self.ion_type)?;
                let (mz, summary) = analyte_mz(&self.formula, &ion_type)?;
                (mz, ion_type.polarity, Some(summary))
            }
        };
        let labeling: LabelingSpec = match self.labeling.as_deref() {
            Some(text) => text.parse()?,
            None => LabelingSpec::Unlabeled,
        };
        let mut variants = labeling.expand(base_mz, formula.as_ref())?;
        if variants.is_empty() {
            variants.push(IsotopeVariant::unlabeled(base_mz));
        }
        Ok(ResolvedAnalyte {
            polarity,
            base_mz,
            formula,
            variants,
            rt_range,
            mz_tolerance: self.mz_tolerance.unwrap_or(params.mz_tolerance),
            rt_tolerance: self.rt_tolerance.unwrap_or(params.rt_tolerance),
        })
    }
}

/// An analyte with its target masses and effective tolerances
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAnalyte {
    pub polarity: Polarity,
    pub base_mz: f64,
    /// Present when the target was given as a formula
    pub formula: Option<FormulaSummary>,
    /// Never empty
    pub variants: Vec<IsotopeVariant>,
    pub rt_range: TimeRange,
    pub mz_tolerance: f64,
    pub rt_tolerance: f64,
}

#[derive(Debug, Error)]
pub enum QuantError {
    #[error("An error occurred while reading peaks: {0}")]
    Store(
        #[source]
        #[from]
        StoreError,
    ),
    #[error("Insufficient coverage in sample {sample} in range [{start} - {stop}]")]
    InsufficientCoverage { sample: String, start: f64, stop: f64 },
    #[error("No {0} polarity scans found in any sample")]
    NoScans(Polarity),
}

/// The observation that anchors the retention time of an analyte
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GlobalWinner {
    pub intensity: f64,
    pub variant: usize,
    pub time: f64,
}

impl GlobalWinner {
    fn rank_cmp(&self, other: &Self) -> Ordering {
        self.intensity
            .total_cmp(&other.intensity)
            .then(self.variant.cmp(&other.variant))
            .then(self.time.total_cmp(&other.time))
    }
}

/// The measurement of one isotope variant across all samples
#[derive(Debug, Clone, PartialEq)]
pub struct VariantQuantification {
    pub suffix: String,
    pub target_mz: f64,
    pub is_global_winner: bool,
    /// The sample with the greatest finalized intensity, if any sample has signal
    pub winner: Option<String>,
    pub winner_time: f64,
    pub winner_intensity: f64,
    /// The observed m/z of the winner, always positive
    pub observed_mz: f64,
    pub ppm_error: f64,
    pub rt_min: f64,
    pub rt_max: f64,
    pub rt_range: f64,
    /// The number of samples with a non-zero finalized intensity
    pub detections: usize,
    /// One finalized intensity per sample, in sample order
    pub intensities: Vec<f64>,
}

impl VariantQuantification {
    fn empty(variant: &IsotopeVariant, is_global_winner: bool, n_samples: usize) -> Self {
        Self {
            suffix: variant.suffix.clone(),
            target_mz: variant.target_mz,
            is_global_winner,
            winner: None,
            winner_time: 0.0,
            winner_intensity: 0.0,
            observed_mz: 0.0,
            ppm_error: 0.0,
            rt_min: 0.0,
            rt_max: 0.0,
            rt_range: 0.0,
            detections: 0,
            intensities: vec![0.0; n_samples],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyteQuantification {
    pub global_winner: GlobalWinner,
    /// The time each sample was measured at, in sample order
    pub sample_times: Vec<f64>,
    /// One entry per variant, in variant order
    pub variants: Vec<VariantQuantification>,
}

/// Quantifies analytes against the scan layout of one store
#[derive(Debug, Clone, Copy)]
pub struct Quantifier<'a> {
    pub index: &'a ScanIndex,
}

impl<'a> Quantifier<'a> {
    pub fn new(index: &'a ScanIndex) -> Self {
        Self { index }
    }

    fn densify_variant(&self, detections: &[Detection], polarity: Polarity) -> Vec<Xic> {
        let scan_times = self.index.for_polarity(polarity);
        let mut by_sample: Vec<Vec<&Detection>> = vec![Vec::new(); self.index.samples.len()];
        for det in detections {
            if let Some(i) = self.index.position_of(det.sample) {
                by_sample[i].push(det);
            }
        }
        by_sample
            .into_iter()
            .enumerate()
            .map(|(i, dets)| Xic::densify(scan_times.times_for(i), dets, polarity))
            .collect()
    }

    /// Build one [`Xic`] per sample for every variant of `analyte`, indexed `[variant][sample]`
    pub fn extract<S: PeakStore + ?Sized>(
        &self,
        store: &S,
        analyte: &ResolvedAnalyte,
    ) -> Result<Vec<Vec<Xic>>, QuantError> {
        if self
            .index
            .for_polarity(analyte.polarity)
            .iter()
            .all(|times| times.is_empty())
        {
            return Err(QuantError::NoScans(analyte.polarity));
        }
        let detections = analyte
            .variants
            .iter()
            .map(|v| {
                let window = MassWindow::ppm(v.target_mz, analyte.mz_tolerance);
                store.query_range(&window, &analyte.rt_range)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let xics = detections
            .par_iter()
            .map(|dets| self.densify_variant(dets, analyte.polarity))
            .collect();
        Ok(xics)
    }

    pub fn quantify<S: PeakStore + ?Sized>(
        &self,
        store: &S,
        analyte: &ResolvedAnalyte,
    ) -> Result<AnalyteQuantification, QuantError> {
        let xics = self.extract(store, analyte)?;
        self.quantify_extracted(analyte, &xics)
    }

    /// Select the global winner and measure every variant from already extracted
    /// chromatograms, indexed `[variant][sample]`
    pub fn quantify_extracted(
        &self,
        analyte: &ResolvedAnalyte,
        xics: &[Vec<Xic>],
    ) -> Result<AnalyteQuantification, QuantError> {
        let mut mega_max: Vec<GlobalWinner> = xics
            .iter()
            .enumerate()
            .filter_map(|(variant, per_sample)| {
                best_sample(per_sample).map(|(_, point)| GlobalWinner {
                    intensity: point.intensity,
                    variant,
                    time: point.time,
                })
            })
            .collect();
        mega_max.sort_by(|a, b| b.rank_cmp(a));
        let global_winner = *mega_max
            .first()
            .ok_or(QuantError::NoScans(analyte.polarity))?;
        debug!(
            "Global winner of {:.4}: variant {} @ {:.3} with {}",
            analyte.base_mz, global_winner.variant, global_winner.time, global_winner.intensity
        );

        let start = global_winner.time - analyte.rt_tolerance;
        let stop = global_winner.time + analyte.rt_tolerance;
        let n_samples = self.index.samples.len();
        let mut sample_times = Vec::with_capacity(n_samples);
        for (i, sample) in self.index.samples.iter().enumerate() {
            let mut sample_winner: Option<&XicPoint> = None;
            for per_sample in xics {
                let point = per_sample
                    .get(i)
                    .and_then(|xic| xic.refined_max(start, stop))
                    .ok_or_else(|| QuantError::InsufficientCoverage {
                        sample: sample.name.clone(),
                        start,
                        stop,
                    })?;
                sample_winner = match sample_winner {
                    Some(best) if point.signal_time_cmp(best).is_le() => Some(best),
                    _ => Some(point),
                };
            }
            sample_times.push(sample_winner.map(|p| p.time).unwrap_or(global_winner.time));
        }

        let variants = analyte
            .variants
            .iter()
            .zip(xics)
            .enumerate()
            .map(|(offset, (variant, per_sample))| {
                let is_global_winner = offset == global_winner.variant;
                if global_winner.intensity == 0.0 {
                    VariantQuantification::empty(variant, is_global_winner, n_samples)
                } else {
                    self.finalize(analyte, variant, is_global_winner, per_sample, &sample_times)
                }
            })
            .collect();

        Ok(AnalyteQuantification {
            global_winner,
            sample_times,
            variants,
        })
    }

    fn finalize(
        &self,
        analyte: &ResolvedAnalyte,
        variant: &IsotopeVariant,
        is_global_winner: bool,
        per_sample: &[Xic],
        sample_times: &[f64],
    ) -> VariantQuantification {
        let finalized: Vec<XicPoint> = sample_times
            .iter()
            .enumerate()
            .map(|(i, time)| {
                per_sample
                    .get(i)
                    .and_then(|xic| xic.imposed_max(*time))
                    .copied()
                    .unwrap_or_else(|| {
                        warn!("Imposed time {time} is not a scan time of sample {i}");
                        XicPoint::absent(*time)
                    })
            })
            .collect();

        let mut result = VariantQuantification::empty(variant, is_global_winner, 0);
        let mut rts = Vec::new();
        for (i, point) in finalized.iter().enumerate() {
            if point.intensity > 0.0 {
                rts.push(point.time);
            }
            if point.intensity > result.winner_intensity {
                result.winner_intensity = point.intensity;
                result.observed_mz = point.mz;
                result.winner_time = point.time;
                result.winner = self.index.samples.get(i).map(|s| s.name.clone());
            }
        }
        result.detections = rts.len();
        if !rts.is_empty() {
            result.rt_min = rts.iter().copied().fold(f64::INFINITY, f64::min);
            result.rt_max = rts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            result.rt_range = result.rt_max - result.rt_min;
            result.ppm_error =
                ppm_error(analyte.polarity.sign() * result.observed_mz, variant.target_mz);
        }
        result.intensities = finalized.iter().map(|p| p.intensity).collect();
        result
    }
}
