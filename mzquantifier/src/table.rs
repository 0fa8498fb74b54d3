//! Reading and writing of the tab-separated tables exchanged with the rest of a study's
//! pipeline.
//!
//! Input columns are matched by their exact header name. A missing required column is an
//! error, unknown columns are ignored, and an empty cell in an optional numeric column is
//! treated as absent.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use mzquant::cluster::{Feature, Slot};
use mzquant::quant::{ResolvedAnalyte, VariantQuantification};
use mzquant::refine::{Identification, RefinedIdentification};
use mzquant::{AnalyteRequest, FragmentDetection, TimeRange};

pub(crate) type Row = Vec<String>;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("An IO error occurred while reading {path}: {source}")]
    IOError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read table: {0}")]
    CsvError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Required column \"{column}\" is missing from {path}")]
    MissingColumn { column: String, path: PathBuf },
    #[error("Invalid value {value:?} for column \"{column}\" on line {line}")]
    InvalidValue {
        column: String,
        line: u64,
        value: String,
    },
}

/// Positions of the named columns of a table header
#[derive(Debug, Default, Clone)]
pub(crate) struct HeaderMap {
    path: PathBuf,
    indices: HashMap<String, usize>,
}

impl HeaderMap {
    pub fn new(path: &Path, headers: &csv::StringRecord) -> Self {
        let indices = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_string(), i))
            .collect();
        Self {
            path: path.to_path_buf(),
            indices,
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.indices.contains_key(column)
    }

    pub fn optional(&self, column: &str) -> Option<usize> {
        self.indices.get(column).copied()
    }

    pub fn required(&self, column: &str) -> Result<usize, TableError> {
        self.optional(column)
            .ok_or_else(|| TableError::MissingColumn {
                column: column.to_string(),
                path: self.path.clone(),
            })
    }
}

/// A single data row paired with the header it is read through
struct RecordView<'a> {
    record: &'a csv::StringRecord,
    line: u64,
}

impl<'a> RecordView<'a> {
    fn new(record: &'a csv::StringRecord) -> Self {
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        Self { record, line }
    }

    fn text(&self, index: usize) -> String {
        self.record.get(index).unwrap_or_default().trim().to_string()
    }

    fn optional_text(&self, index: Option<usize>) -> Option<String> {
        index.map(|i| self.text(i)).filter(|s| !s.is_empty())
    }

    fn parse<T: FromStr>(&self, index: usize, column: &str) -> Result<T, TableError> {
        let value = self.text(index);
        value.parse().map_err(|_| TableError::InvalidValue {
            column: column.to_string(),
            line: self.line,
            value,
        })
    }

    fn parse_optional<T: FromStr>(
        &self,
        index: Option<usize>,
        column: &str,
    ) -> Result<Option<T>, TableError> {
        match index {
            Some(i) if !self.text(i).is_empty() => self.parse(i, column).map(Some),
            _ => Ok(None),
        }
    }
}

fn open_table(path: &Path) -> Result<(csv::Reader<fs::File>, HeaderMap), TableError> {
    let handle = fs::File::open(path).map_err(|source| TableError::IOError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .has_headers(true)
        .from_reader(handle);
    let headers = HeaderMap::new(path, reader.headers()?);
    Ok((reader, headers))
}

pub mod columns {
    pub const METABOLITE: &str = "Metabolite";
    pub const FORMULA: &str = "Formula";
    pub const INCHIKEY: &str = "InChIKey";
    pub const FDR: &str = "FDR";
    pub const LABELING: &str = "Labeling";
    pub const ION_TYPE: &str = "Ion Type";
    pub const RT: &str = "RT (min)";
    pub const RT_START: &str = "RT Start (min)";
    pub const RT_END: &str = "RT End (min)";
    pub const MZ_TOLERANCE: &str = "m/z Tolerance (ppm)";
    pub const RT_TOLERANCE: &str = "RT Tolerance (min)";
    pub const SOURCE: &str = "Source";
    pub const PERCENTILE: &str = "Percentile";
}

/// Which optional columns of an analyte table were present, and so are carried into the
/// quantification table
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct QuantifyLayout {
    pub inchikey: bool,
    pub fdr: bool,
    pub labeling: bool,
}

impl QuantifyLayout {
    pub fn header<'a>(&self, samples: impl Iterator<Item = &'a str>) -> Row {
        let mut header = vec![columns::METABOLITE, columns::FORMULA];
        if self.inchikey {
            header.push(columns::INCHIKEY);
        }
        if self.fdr {
            header.push(columns::FDR);
        }
        if self.labeling {
            header.push(columns::LABELING);
        }
        header.extend([
            columns::ION_TYPE,
            columns::RT_START,
            columns::RT_END,
            columns::MZ_TOLERANCE,
            columns::RT_TOLERANCE,
            "mz",
            "obs_mz",
            "ppm",
            "winner",
        ]);
        if self.labeling {
            header.push("is_global_winner");
        }
        header.extend(["RT", "RT_min", "RT_max", "RT_range", "detections"]);
        header
            .into_iter()
            .map(String::from)
            .chain(samples.map(String::from))
            .collect()
    }

    /// Format the row of one measured variant of `request`
    pub fn row(
        &self,
        request: &AnalyteRequest,
        analyte: &ResolvedAnalyte,
        variant: &VariantQuantification,
    ) -> Row {
        let suffix = variant.suffix.as_str();
        let mut row = vec![
            format!("{}{suffix}", request.metabolite),
            format!("{}{suffix}", request.formula),
        ];
        if self.inchikey {
            row.push(format!(
                "{}{suffix}",
                request.inchikey.as_deref().unwrap_or_default()
            ));
        }
        if self.fdr {
            row.push(request.fdr.map(|f| f.to_string()).unwrap_or_default());
        }
        if self.labeling {
            row.push(request.labeling.clone().unwrap_or_default());
        }
        row.extend([
            request.ion_type.clone(),
            format!("{:.1}", analyte.rt_range.start),
            format!("{:.1}", analyte.rt_range.end),
            format!("{:.1}", analyte.mz_tolerance),
            format!("{:.1}", analyte.rt_tolerance),
            format!("{:.4}", variant.target_mz.abs()),
            format!("{:.4}", variant.observed_mz.abs()),
            format!("{:.1}", variant.ppm_error),
            variant.winner.clone().unwrap_or_default(),
        ]);
        if self.labeling {
            row.push(if variant.is_global_winner { "Yes" } else { "No" }.to_string());
        }
        row.extend([
            format!("{:.2}", variant.winner_time),
            format!("{:.2}", variant.rt_min),
            format!("{:.2}", variant.rt_max),
            format!("{:.2}", variant.rt_range),
            variant.detections.to_string(),
        ]);
        row.extend(variant.intensities.iter().map(|i| format!("{i:.0}")));
        row
    }
}

fn parse_fdr(view: &RecordView, index: Option<usize>) -> Result<Option<i64>, TableError> {
    match view.parse_optional::<i64>(index, columns::FDR) {
        Ok(v) => Ok(v),
        Err(e) => match view.parse_optional::<f64>(index, columns::FDR) {
            Ok(v) => Ok(v.map(|f| f.trunc() as i64)),
            Err(_) => Err(e),
        },
    }
}

/// Read the analytes to quantify from the table at `path`
pub fn read_analytes(path: &Path) -> Result<(Vec<AnalyteRequest>, QuantifyLayout), TableError> {
    let (mut reader, headers) = open_table(path)?;
    let metabolite = headers.required(columns::METABOLITE)?;
    let formula = headers.required(columns::FORMULA)?;
    let ion_type = headers.required(columns::ION_TYPE)?;
    let inchikey = headers.optional(columns::INCHIKEY);
    let labeling = headers.optional(columns::LABELING);
    let fdr = headers.optional(columns::FDR);
    let rt = headers.optional(columns::RT);
    let rt_start = headers.optional(columns::RT_START);
    let rt_stop = headers.optional(columns::RT_END);
    let mz_tolerance = headers.optional(columns::MZ_TOLERANCE);
    let rt_tolerance = headers.optional(columns::RT_TOLERANCE);

    let layout = QuantifyLayout {
        inchikey: inchikey.is_some(),
        fdr: fdr.is_some(),
        labeling: labeling.is_some(),
    };

    let mut requests = Vec::new();
    for record in reader.records() {
        let record = record?;
        let view = RecordView::new(&record);
        let request = AnalyteRequest {
            metabolite: view.text(metabolite),
            formula: view.text(formula),
            inchikey: view.optional_text(inchikey),
            labeling: view.optional_text(labeling),
            ion_type: view.text(ion_type),
            fdr: parse_fdr(&view, fdr)?,
            rt: view.parse_optional(rt, columns::RT)?,
            rt_start: view.parse_optional(rt_start, columns::RT_START)?,
            rt_stop: view.parse_optional(rt_stop, columns::RT_END)?,
            mz_tolerance: view.parse_optional(mz_tolerance, columns::MZ_TOLERANCE)?,
            rt_tolerance: view.parse_optional(rt_tolerance, columns::RT_TOLERANCE)?,
        };
        requests.push(request);
    }
    debug!("Read {} analytes from {}", requests.len(), path.display());
    Ok((requests, layout))
}

/// Read scored identifications from the table at `path`, taking scores from `score_column`.
///
/// Returns the identifications and whether the table carried InChIKeys.
pub fn read_identifications(
    path: &Path,
    score_column: &str,
    require_source: bool,
) -> Result<(Vec<Identification>, bool), TableError> {
    let (mut reader, headers) = open_table(path)?;
    let metabolite = headers.required(columns::METABOLITE)?;
    let ion_type = headers.required(columns::ION_TYPE)?;
    let formula = headers.required(columns::FORMULA)?;
    let rt = headers.required(columns::RT)?;
    let score = headers.required(score_column)?;
    let source = if require_source {
        Some(headers.required(columns::SOURCE)?)
    } else {
        headers.optional(columns::SOURCE)
    };
    let inchikey = headers.optional(columns::INCHIKEY);

    let mut identifications = Vec::new();
    for record in reader.records() {
        let record = record?;
        let view = RecordView::new(&record);
        identifications.push(Identification {
            metabolite: view.text(metabolite),
            inchikey: view.optional_text(inchikey),
            ion_type: view.text(ion_type),
            formula: view.text(formula),
            rt: view.parse(rt, columns::RT)?,
            score: view.parse(score, score_column)?,
            source: view.optional_text(source),
        });
    }
    debug!(
        "Read {} identifications from {}",
        identifications.len(),
        path.display()
    );
    Ok((identifications, headers.contains(columns::INCHIKEY)))
}

pub fn refine_header(inchikey: bool, score_column: &str, fdr: bool) -> Row {
    let mut header = vec![columns::METABOLITE];
    if inchikey {
        header.push(columns::INCHIKEY);
    }
    header.extend([columns::ION_TYPE, columns::FORMULA, columns::RT, score_column]);
    if fdr {
        header.push(columns::FDR);
    }
    header.into_iter().map(String::from).collect()
}

pub fn refine_row(refined: &RefinedIdentification, inchikey: bool) -> Row {
    let ident = &refined.identification;
    let mut row = vec![ident.metabolite.clone()];
    if inchikey {
        row.push(ident.inchikey.clone().unwrap_or_default());
    }
    row.extend([
        ident.ion_type.clone(),
        ident.formula.clone(),
        format!("{:.2}", ident.rt),
        ident.score.to_string(),
    ]);
    if let Some(q) = refined.q_value {
        row.push(format!("{:.0}", q * 100.0));
    }
    row
}

pub fn feature_header() -> Row {
    [
        columns::METABOLITE,
        columns::FORMULA,
        columns::ION_TYPE,
        columns::RT,
        columns::PERCENTILE,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn feature_row(feature: &Feature) -> Row {
    vec![
        format!(
            "Feature_{}_{:.4}_{:.1}",
            feature.polarity(),
            feature.mz.abs(),
            feature.time
        ),
        format!("{:.4}", feature.mz),
        String::new(),
        format!("{:.3}", feature.time),
        format!("{:.3}", feature.percentile),
    ]
}

pub fn neutral_loss_header() -> Row {
    [
        columns::METABOLITE,
        columns::FORMULA,
        columns::ION_TYPE,
        columns::RT_START,
        columns::RT_END,
        columns::MZ_TOLERANCE,
        columns::RT_TOLERANCE,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Format a candidate parent ion found by clustering fragments sharing a neutral loss.
///
/// The retention time window is clipped to `[0, max_time]`.
pub fn neutral_loss_row(
    slot: &Slot<FragmentDetection>,
    loss: f64,
    max_time: f64,
    ppm: f64,
    rt_tolerance: f64,
) -> Row {
    let window = TimeRange::clipped(slot.time, rt_tolerance, max_time);
    vec![
        format!(
            "Parent_{:.4}_{:.4}_{:.4}_{:.1}",
            slot.mass, loss, slot.founder.mz, slot.time
        ),
        format!("{:.4}", slot.mass),
        String::new(),
        format!("{:.2}", window.start),
        format!("{:.2}", window.end),
        format!("{ppm:.1}"),
        format!("{rt_tolerance:.1}"),
    ]
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn write_table(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut handle = fs::File::create(&path).unwrap();
        handle.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_analytes() -> Result<(), TableError> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(
            &dir,
            "analytes.tsv",
            "Metabolite\tFormula\tIon Type\tRT (min)\tm/z Tolerance (ppm)\tNotes\n\
             glucose\tC6H12O6\t[M+H]+\t1.5\t\tsugar\n\
             valine\t200.1\t\t\t10\t\n",
        );
        let (requests, layout) = read_analytes(&path)?;
        assert_eq!(layout, QuantifyLayout::default());
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].metabolite, "glucose");
        assert_eq!(requests[0].rt, Some(1.5));
        assert_eq!(requests[0].mz_tolerance, None);
        assert_eq!(requests[1].rt, None);
        assert_eq!(requests[1].mz_tolerance, Some(10.0));
        Ok(())
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "analytes.tsv", "Metabolite\tIon Type\nx\t[M+H]+\n");
        let err = read_analytes(&path).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn { ref column, .. } if column == "Formula"));
    }

    #[test]
    fn test_invalid_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(
            &dir,
            "analytes.tsv",
            "Metabolite\tFormula\tIon Type\tRT (min)\nx\tC6\t[M+H]+\tsoon\n",
        );
        let err = read_analytes(&path).unwrap_err();
        assert!(matches!(err, TableError::InvalidValue { line: 2, .. }));
    }

    #[test]
    fn test_quantify_header() {
        let layout = QuantifyLayout {
            inchikey: false,
            fdr: true,
            labeling: true,
        };
        let header = layout.header(["a", "b"].into_iter());
        assert_eq!(header[2], "FDR");
        assert_eq!(header[3], "Labeling");
        assert_eq!(header[13], "is_global_winner");
        assert_eq!(header.last().map(String::as_str), Some("b"));
        let plain = QuantifyLayout::default().header(std::iter::empty());
        assert_eq!(plain.len(), 16);
        assert!(!plain.iter().any(|h| h == "is_global_winner"));
    }

    #[test]
    fn test_feature_row() {
        let feature = Feature {
            slot: 0,
            mz: -180.06339,
            time: 2.345,
            min_intensity: 1e5,
            max_intensity: 1e7,
            percentile: 0.5,
        };
        let row = feature_row(&feature);
        assert_eq!(row[0], "Feature_-_180.0634_2.3");
        assert_eq!(row[1], "-180.0634");
        assert_eq!(row[2], "");
        assert_eq!(row[3], "2.345");
        assert_eq!(row[4], "0.500");
    }

    #[test]
    fn test_refine_row() {
        let refined = RefinedIdentification {
            identification: Identification::new("alanine", "[M+H]+", "C3H7NO2", 1.234, 950.5),
            q_value: Some(0.0125),
        };
        let row = refine_row(&refined, false);
        assert_eq!(row, vec!["alanine", "[M+H]+", "C3H7NO2", "1.23", "950.5", "1"]);
        let header = refine_header(true, "Score", true);
        assert_eq!(header[1], "InChIKey");
        assert_eq!(header.last().map(String::as_str), Some("FDR"));
    }
}
