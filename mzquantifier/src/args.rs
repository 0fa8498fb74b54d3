use std::fmt::Display;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use mzpeaks::Tolerance;
use mzquant::quant::{DEFAULT_MZ_TOLERANCE, DEFAULT_RT_TOLERANCE, DEFAULT_RT_WINDOW};
use mzquant::refine::{Equivalence, RefineParams};
use mzquant::{ClusterParams, QuantParams};

pub(crate) fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

fn stdout_path() -> PathBuf {
    PathBuf::from("-")
}

/// How two identifications are decided to describe the same compound
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgEquivalence {
    #[default]
    /// The same InChIKey and ion type
    Inchikey,
    /// The same first InChIKey block and ion type
    Inchik,
    /// The same name and ion type
    Name,
    /// An m/z within the ppm tolerance, taking the m/z from the formula column
    Mzrt,
}

impl From<ArgEquivalence> for Equivalence {
    fn from(value: ArgEquivalence) -> Self {
        match value {
            ArgEquivalence::Inchikey => Equivalence::InChIKey,
            ArgEquivalence::Inchik => Equivalence::InChIKeyPrefix,
            ArgEquivalence::Name => Equivalence::Name,
            ArgEquivalence::Mzrt => Equivalence::MzRt,
        }
    }
}

impl Display for ArgEquivalence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Equivalence::from(*self))
    }
}

/// The identification score column to rank and filter by
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreColumn {
    #[default]
    Score,
    #[value(name = "mcrl_score", alias = "mcrl-score")]
    McrlScore,
    Dot,
    Revdot,
    Prob,
    Percentile,
}

impl ScoreColumn {
    /// The table header this score is read from
    pub fn header(&self) -> &'static str {
        match self {
            ScoreColumn::Score => "Score",
            ScoreColumn::McrlScore => "MCRL_Score",
            ScoreColumn::Dot => "Dot",
            ScoreColumn::Revdot => "RevDot",
            ScoreColumn::Prob => "Prob",
            ScoreColumn::Percentile => "Percentile",
        }
    }
}

impl Display for ScoreColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header())
    }
}

/// Measure each analyte of a table across every sample of a peak store
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct QuantifyArgs {
    /// The SQLite peak store of the study
    #[arg()]
    pub store: PathBuf,

    /// The tab-separated table of analytes to quantify
    #[arg()]
    pub analytes: PathBuf,

    /// The path to write the quantification table to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "stdout_path")]
    pub output_file: PathBuf,

    /// The m/z tolerance in ppm for analytes that do not specify one
    #[arg(short = 'm', long = "mz-tolerance", default_value_t = DEFAULT_MZ_TOLERANCE, value_parser = non_negative_float)]
    pub mz_tolerance: f64,

    /// The retention time tolerance in minutes for analytes that do not specify one
    #[arg(short = 'r', long = "rt-tolerance", default_value_t = DEFAULT_RT_TOLERANCE, value_parser = non_negative_float)]
    pub rt_tolerance: f64,

    /// The width in minutes of the window searched around an analyte with a single
    /// retention time
    #[arg(short = 'w', long = "rt-window", default_value_t = DEFAULT_RT_WINDOW, value_parser = non_negative_float)]
    pub rt_window: f64,
}

impl QuantifyArgs {
    pub fn quant_params(&self) -> QuantParams {
        QuantParams {
            mz_tolerance: self.mz_tolerance,
            rt_tolerance: self.rt_tolerance,
            rt_window: self.rt_window,
        }
    }
}

/// Discover features by clustering intense MS1 peaks of all samples
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesArgs {
    /// The SQLite peak store of the study
    #[arg()]
    pub store: PathBuf,

    /// The path to write the feature table to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "stdout_path")]
    pub output_file: PathBuf,

    /// The mass tolerance in ppm for joining a peak to a feature
    #[arg(short = 'p', long = "ppm", default_value_t = 20.0, value_parser = non_negative_float)]
    pub ppm: f64,

    /// The retention time tolerance in minutes for joining a peak to a feature
    #[arg(short = 'r', long = "rt-tolerance", default_value_t = 2.0, value_parser = non_negative_float)]
    pub rt_tolerance: f64,

    /// Only peaks more intense than this are clustered
    #[arg(short = 's', long = "min-signal", default_value_t = 1e5, value_parser = non_negative_float)]
    pub min_signal: f64,

    /// The minimum ratio of greatest to least intensity for a feature to be reported
    #[arg(short = 'g', long = "min-range", default_value_t = 10.0, value_parser = non_negative_float)]
    pub min_range: f64,

    /// Let peaks of any sample lower a feature's least intensity, rather than only peaks
    /// of the sample that founded it
    #[arg(long = "any-sample-minimum")]
    #[serde(default)]
    pub any_sample_minimum: bool,
}

impl FeaturesArgs {
    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams::new(Tolerance::PPM(self.ppm), self.rt_tolerance)
            .with_same_sample_minimum(!self.any_sample_minimum)
    }
}

/// Find candidate parent ions whose fragments show a common neutral loss
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct NeutralLossArgs {
    /// The SQLite peak store of the study
    #[arg()]
    pub store: PathBuf,

    /// The path to write the candidate table to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "stdout_path")]
    pub output_file: PathBuf,

    /// The neutral loss mass to search for
    #[arg(short = 'n', long = "neutral-loss", default_value_t = 132.0420, allow_negative_numbers = true)]
    pub neutral_loss: f64,

    /// The mass tolerance in ppm for both the loss and the precursor clustering
    #[arg(short = 'p', long = "ppm", default_value_t = 20.0, value_parser = non_negative_float)]
    pub ppm: f64,

    /// The retention time tolerance in minutes for joining precursors
    #[arg(short = 'r', long = "rt-tolerance", default_value_t = 0.5, value_parser = non_negative_float)]
    pub rt_tolerance: f64,

    /// Compare the magnitude of the precursor to fragment difference with the loss
    #[arg(short = 'a', long = "absolute")]
    #[serde(default)]
    pub absolute: bool,
}

impl NeutralLossArgs {
    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams::new(Tolerance::PPM(self.ppm), self.rt_tolerance)
    }
}

/// Deduplicate scored identifications and optionally filter them by target/decoy FDR
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct RefineArgs {
    /// The tab-separated table of scored identifications
    #[arg()]
    pub identifications: PathBuf,

    /// The path to write the refined table to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "stdout_path")]
    pub output_file: PathBuf,

    /// The score column to rank identifications by
    #[arg(short = 's', long = "score", default_value = "score")]
    #[serde(default)]
    pub score: ScoreColumn,

    /// How to decide two identifications are the same compound
    #[arg(short = 'e', long = "equivalence", default_value = "inchikey")]
    #[serde(default)]
    pub equivalence: ArgEquivalence,

    /// Skip the target/decoy FDR estimate and filter by minimum score instead
    #[arg(long = "no-fdr")]
    #[serde(default)]
    pub no_fdr: bool,

    /// The largest FDR, in percent, to keep
    #[arg(long = "max-fdr", default_value_t = 100.0, value_parser = non_negative_float)]
    pub max_fdr: f64,

    /// The smallest score to keep when FDR estimation is off
    #[arg(long = "min-score", default_value_t = 900.0)]
    pub min_score: f64,

    /// The retention time tolerance in minutes for equivalent identifications
    #[arg(short = 'r', long = "rt-tolerance", default_value_t = 2.0, value_parser = non_negative_float)]
    pub rt_tolerance: f64,

    /// The m/z tolerance in ppm for `mzrt` equivalence
    #[arg(short = 'p', long = "ppm", default_value_t = 20.0, value_parser = non_negative_float)]
    pub ppm: f64,

    /// Drop identifications whose ion type polarity disagrees with their Source column
    #[arg(long = "match-polarity")]
    #[serde(default)]
    pub match_polarity: bool,

    /// Keep decoy identifications in the output
    #[arg(long = "keep-decoys")]
    #[serde(default)]
    pub keep_decoys: bool,
}

impl RefineArgs {
    pub fn refine_params(&self) -> RefineParams {
        RefineParams {
            equivalence: self.equivalence.into(),
            rt_tolerance: self.rt_tolerance,
            ppm: self.ppm,
            match_polarity: self.match_polarity,
            fdr: !self.no_fdr,
            min_score: self.min_score,
            max_fdr: self.max_fdr,
            keep_decoys: self.keep_decoys,
        }
    }
}
