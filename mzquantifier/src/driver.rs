use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzquant::cluster::ClusterEngine;
use mzquant::quant::QuantError;
use mzquant::{
    AnalyteRequest, IntensityOrdered, MassWindow, PeakStore, QuantParams, Quantifier, ScanIndex,
    SqlitePeakStore, StoreError,
};

use crate::args::{FeaturesArgs, NeutralLossArgs, QuantifyArgs, RefineArgs};
use crate::progress::ProgressRecord;
use crate::table::{self, QuantifyLayout, Row, TableError};
use crate::write::{collate_results, open_output, write_rows, BUFFER_SIZE};

/// Quantify one analyte into one row per isotope variant.
///
/// Problems with the analyte itself are logged and the analyte is skipped, while failures of
/// the store are returned.
fn quantify_analyte<S: PeakStore + ?Sized>(
    store: &S,
    quantifier: &Quantifier<'_>,
    params: &QuantParams,
    layout: &QuantifyLayout,
    request: &AnalyteRequest,
) -> Result<(Vec<Row>, ProgressRecord), StoreError> {
    let analyte = match request.resolve(params) {
        Ok(analyte) => analyte,
        Err(e) => {
            warn!("Skipping {}: {e}", request.metabolite);
            return Ok((Vec::new(), ProgressRecord::skipped()));
        }
    };
    match quantifier.quantify(store, &analyte) {
        Ok(quant) => {
            let rows: Vec<Row> = quant
                .variants
                .iter()
                .map(|variant| layout.row(request, &analyte, variant))
                .collect();
            let prog = ProgressRecord {
                analytes: 1,
                variants: quant.variants.len(),
                rows: rows.len(),
                ..Default::default()
            };
            Ok((rows, prog))
        }
        Err(QuantError::Store(e)) => Err(e),
        Err(e @ QuantError::InsufficientCoverage { .. }) => {
            warn!("Skipping {} with {e}", request.metabolite);
            let prog = ProgressRecord {
                analytes: 1,
                insufficient_coverage: 1,
                ..Default::default()
            };
            Ok((Vec::new(), prog))
        }
        Err(e) => {
            warn!("Skipping {}: {e}", request.metabolite);
            Ok((Vec::new(), ProgressRecord::skipped()))
        }
    }
}

#[derive(Debug, Error)]
pub enum MZQuantifierError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("The peak store {0} does not exist")]
    StoreNotFound(PathBuf),
    #[error(transparent)]
    StoreError(#[from] StoreError),
    #[error(transparent)]
    TableError(#[from] TableError),
    #[error("Failed to write table: {0}")]
    WriteError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Failed to read configuration: {0}")]
    ConfigError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to build thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("Failed to configure logging: {0}")]
    LoggingError(String),
    #[error("The {0} task failed to complete")]
    TaskFailed(&'static str),
}

#[derive(Subcommand, Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    Quantify(QuantifyArgs),
    Features(FeaturesArgs),
    NeutralLoss(NeutralLossArgs),
    Refine(RefineArgs),
}

/// Feature discovery and targeted quantification of mass spectrometry peak stores.
///
/// Cluster the peaks of every sample of a study into features, measure known analytes
/// across all samples, search for neutral losses, or refine identification tables.
#[derive(Parser, Debug, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZQuantifier {
    #[command(subcommand)]
    pub command: Command,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzquantifier.toml` in the working directory.
    /// Environment variables prefixed with `MZQUANTIFIER_` will be read too.
    #[arg(long = "config-file", global = true)]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
        global = true,
    )]
    pub threads: i32,
}

impl MZQuantifier {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZQuantifierError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()?.into()
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    pub fn main(&self) -> Result<(), MZQuantifierError> {
        info!(
            "mzquantifier v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        let start = Instant::now();
        self.create_threadpool()?.install(|| match &self.command {
            Command::Quantify(args) => self.run_quantify(args),
            Command::Features(args) => self.run_features(args),
            Command::NeutralLoss(args) => self.run_neutral_loss(args),
            Command::Refine(args) => self.run_refine(args),
        })?;
        info!("Total Elapsed Time: {:0.3?}", start.elapsed());
        Ok(())
    }

    /// Open a store and refuse to go on if its sample tables disagree
    fn open_store(&self, path: &Path) -> Result<SqlitePeakStore, MZQuantifierError> {
        if !path.exists() {
            return Err(MZQuantifierError::StoreNotFound(path.to_path_buf()));
        }
        info!("Store: {}", path.display());
        let store = SqlitePeakStore::open(path)?;
        store.check_consistency()?;
        Ok(store)
    }

    fn run_quantify(&self, args: &QuantifyArgs) -> Result<(), MZQuantifierError> {
        info!("Analytes: {}", args.analytes.display());
        info!("Output: {}", args.output_file.display());
        let store = self.open_store(&args.store)?;
        let index = ScanIndex::load(&store)?;
        let (requests, layout) = table::read_analytes(&args.analytes)?;
        info!(
            "Quantifying {} analytes across {} samples",
            requests.len(),
            index.samples.len()
        );

        let writer = open_output(&args.output_file)?;
        let header = layout.header(index.sample_names());
        let (send_rows, recv_rows) = bounded(BUFFER_SIZE);
        let (send_collated, recv_collated) = bounded(BUFFER_SIZE);
        let collate_task = thread::spawn(move || collate_results(recv_rows, send_collated));
        let write_task = thread::spawn(move || write_rows(writer, header, recv_collated));

        let params = args.quant_params();
        let quantifier = Quantifier::new(&index);
        let path = store.path().to_path_buf();
        let factors = store.scale_factors();
        let started = Instant::now();
        let outcome: Result<ProgressRecord, StoreError> = requests
            .par_iter()
            .enumerate()
            .map_init(
                || None::<SqlitePeakStore>,
                |connection, (i, request)| {
                    let store = match connection.take() {
                        Some(store) => store,
                        None => SqlitePeakStore::open_with_factors(&path, factors)?,
                    };
                    let result = quantify_analyte(&store, &quantifier, &params, &layout, request);
                    *connection = Some(store);
                    let (rows, prog) = result?;
                    if let Err(e) = send_rows.send((i, rows)) {
                        warn!("Failed to send analyte {i}: {e}");
                    }
                    Ok(prog)
                },
            )
            .try_fold(ProgressRecord::default, |acc, prog| {
                prog.map(|p| acc + p)
            })
            .try_reduce(ProgressRecord::default, |a, b| Ok(a + b));
        drop(send_rows);
        debug!("Quantification finished in {:0.3?}", started.elapsed());

        if collate_task.join().is_err() {
            warn!("Failed to join collator task");
        }
        let written = write_task
            .join()
            .map_err(|_| MZQuantifierError::TaskFailed("writer"))??;

        let prog = outcome?;
        info!(
            "Analytes: {} | Variants: {} | Rows: {} | Rows Written: {written}",
            prog.analytes, prog.variants, prog.rows
        );
        if prog.rows != written {
            warn!("Produced {} rows but wrote {written}", prog.rows);
        }
        info!(
            "Skipped: {} | Insufficient Coverage: {}",
            prog.skipped, prog.insufficient_coverage
        );
        Ok(())
    }

    fn run_features(&self, args: &FeaturesArgs) -> Result<(), MZQuantifierError> {
        info!("Output: {}", args.output_file.display());
        let store = self.open_store(&args.store)?;
        let started = Instant::now();
        let peaks = store.intense_peaks(args.min_signal)?;
        info!(
            "Read {} peaks more intense than {} in {:0.3?}",
            peaks.len(),
            args.min_signal,
            started.elapsed()
        );

        let mut engine = ClusterEngine::new(args.cluster_params());
        let clusters = engine.cluster(IntensityOrdered::sort(peaks));
        let features = clusters.features(args.min_range);
        info!(
            "Clustered peaks into {} slots, {} with an intensity range over {}",
            clusters.len(),
            features.len(),
            args.min_range
        );

        let mut writer = open_output(&args.output_file)?;
        writer.write_record(table::feature_header())?;
        for feature in features.iter() {
            writer.write_record(table::feature_row(feature))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn run_neutral_loss(&self, args: &NeutralLossArgs) -> Result<(), MZQuantifierError> {
        info!("Output: {}", args.output_file.display());
        let store = self.open_store(&args.store)?;
        let loss_window = MassWindow::ppm(args.neutral_loss, args.ppm);
        let started = Instant::now();
        let fragments = store.neutral_losses(&loss_window, args.absolute)?;
        info!(
            "Found {} fragments with a neutral loss of {:.4} in {:0.3?}",
            fragments.len(),
            args.neutral_loss,
            started.elapsed()
        );

        let mut engine = ClusterEngine::new(args.cluster_params());
        let parents = engine.cluster(IntensityOrdered::sort(fragments));
        info!("Grouped neutral losses into {} potential parents", parents.len());

        let mut writer = open_output(&args.output_file)?;
        writer.write_record(table::neutral_loss_header())?;
        for slot in parents.slots.iter() {
            writer.write_record(table::neutral_loss_row(
                slot,
                args.neutral_loss,
                parents.max_time,
                args.ppm,
                args.rt_tolerance,
            ))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn run_refine(&self, args: &RefineArgs) -> Result<(), MZQuantifierError> {
        info!("Identifications: {}", args.identifications.display());
        info!("Output: {}", args.output_file.display());
        let params = args.refine_params();
        let score_column = args.score.header();
        let (identifications, has_inchikey) = table::read_identifications(
            &args.identifications,
            score_column,
            params.match_polarity,
        )?;
        let n = identifications.len();
        let refined = params.refine(identifications);
        info!(
            "Kept {} of {n} identifications by {} equivalence",
            refined.len(),
            params.equivalence
        );

        let mut writer = open_output(&args.output_file)?;
        writer.write_record(table::refine_header(has_inchikey, score_column, params.fdr))?;
        for ident in refined.iter() {
            writer.write_record(table::refine_row(ident, has_inchikey))?;
        }
        writer.flush()?;
        Ok(())
    }
}
