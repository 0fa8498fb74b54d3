//! Reduce a list of scored identifications to distinct identification and retention time
//! combinations, optionally controlling the false discovery rate with decoy hits.
use std::fmt::Display;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::formula::IonType;

/// Identifications whose name starts with this are decoys
pub const DECOY_PREFIX: &str = "Decoy_";

/// How two identifications are judged to be the same
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Equivalence {
    /// The full InChIKey, falling back to the name when the kept entry has none
    #[default]
    InChIKey,
    /// The first block of the InChIKey, the molecular skeleton
    InChIKeyPrefix,
    Name,
    /// Formula given as an m/z value within a ppm tolerance
    MzRt,
}

impl Display for Equivalence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Equivalence::InChIKey => "inchikey",
            Equivalence::InChIKeyPrefix => "inchik",
            Equivalence::Name => "name",
            Equivalence::MzRt => "mzrt",
        };
        f.write_str(name)
    }
}

impl FromStr for Equivalence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inchikey" => Ok(Self::InChIKey),
            "inchik" => Ok(Self::InChIKeyPrefix),
            "name" => Ok(Self::Name),
            "mzrt" => Ok(Self::MzRt),
            _ => Err(format!("Unknown equivalence {s}")),
        }
    }
}

const INCHIKEY_SKELETON_LEN: usize = 14;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Identification {
    pub metabolite: String,
    pub inchikey: Option<String>,
    pub ion_type: String,
    pub formula: String,
    pub rt: f64,
    pub score: f64,
    /// The scan the identification came from, e.g. `FTMS + p ESI ...`
    pub source: Option<String>,
}

impl Identification {
    pub fn new(metabolite: impl Into<String>, ion_type: impl Into<String>, formula: impl Into<String>, rt: f64, score: f64) -> Self {
        Self {
            metabolite: metabolite.into(),
            ion_type: ion_type.into(),
            formula: formula.into(),
            rt,
            score,
            ..Default::default()
        }
    }

    pub fn with_inchikey(mut self, inchikey: impl Into<String>) -> Self {
        self.inchikey = Some(inchikey.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_decoy(&self) -> bool {
        self.metabolite.starts_with(DECOY_PREFIX)
    }

    fn inchikey(&self) -> Option<&str> {
        self.inchikey.as_deref().filter(|k| !k.is_empty())
    }

    /// Whether the polarity character ending the first token of the source agrees with the
    /// ion type's
    pub fn polarity_matches_source(&self) -> bool {
        let source_polarity = self
            .source
            .as_deref()
            .and_then(|s| s.split(' ').next())
            .and_then(|token| token.chars().last());
        source_polarity.is_some() && source_polarity == self.ion_type.chars().last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefineParams {
    pub equivalence: Equivalence,
    pub rt_tolerance: f64,
    /// Mass tolerance in ppm for [`Equivalence::MzRt`]
    pub ppm: f64,
    pub match_polarity: bool,
    /// Estimate the false discovery rate from decoys, otherwise filter by `min_score`
    pub fdr: bool,
    pub min_score: f64,
    /// The largest FDR to report, as a percentage
    pub max_fdr: f64,
    pub keep_decoys: bool,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            equivalence: Equivalence::InChIKey,
            rt_tolerance: 2.0,
            ppm: 20.0,
            match_polarity: false,
            fdr: true,
            min_score: 900.0,
            max_fdr: 100.0,
            keep_decoys: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinedIdentification {
    pub identification: Identification,
    /// Present when the FDR was estimated
    pub q_value: Option<f64>,
}

/// A candidate with its formula read as an m/z when comparing by mass
struct Candidate {
    identification: Identification,
    mz: f64,
}

/// q-values of identifications in descending score order, from the running count of
/// decoys: `q_i = min(q_{i+1}, d_i / max(d_i, (i + 1) - d_i))`.
///
/// The top ranked entry keeps its raw ratio and is not smoothed, so a leading decoy always
/// has a q-value of 1.
pub fn q_values(identifications: &[Identification]) -> Vec<f64> {
    let mut decoys = 0usize;
    let raw: Vec<f64> = identifications
        .iter()
        .enumerate()
        .map(|(i, ident)| {
            if ident.is_decoy() {
                decoys += 1;
            }
            let targets = i + 1 - decoys;
            decoys as f64 / decoys.max(targets) as f64
        })
        .collect();
    let mut q = raw;
    for i in (1..q.len().saturating_sub(1)).rev() {
        q[i] = q[i].min(q[i + 1]);
    }
    q
}

impl RefineParams {
    fn equivalent(&self, row: &Candidate, existing: &Candidate) -> bool {
        let (row_id, kept) = (&row.identification, &existing.identification);
        if (row_id.rt - kept.rt).abs() > self.rt_tolerance {
            return false;
        }
        let same_ion = row_id.ion_type == kept.ion_type;
        let same_name = row_id.metabolite == kept.metabolite;
        match self.equivalence {
            Equivalence::InChIKey | Equivalence::InChIKeyPrefix => {
                match (kept.inchikey(), row_id.inchikey()) {
                    (Some(a), Some(b)) => {
                        let same_key = if self.equivalence == Equivalence::InChIKeyPrefix {
                            a.get(..INCHIKEY_SKELETON_LEN).unwrap_or(a)
                                == b.get(..INCHIKEY_SKELETON_LEN).unwrap_or(b)
                        } else {
                            a == b
                        };
                        same_key && same_ion
                    }
                    (Some(_), None) => false,
                    (None, b) => b.is_none() && same_name && same_ion,
                }
            }
            Equivalence::Name => same_name && same_ion,
            Equivalence::MzRt => ((existing.mz - row.mz) / existing.mz).abs() <= self.ppm / 1e6,
        }
    }

    fn admit(&self, ident: &Identification) -> bool {
        if self.match_polarity && !ident.polarity_matches_source() {
            return false;
        }
        if !self.fdr && ident.score < self.min_score {
            return false;
        }
        if !ident.ion_type.is_empty() {
            if let Err(e) = IonType::parse(&ident.ion_type) {
                debug!("Skipping {}: {e}", ident.metabolite);
                return false;
            }
        }
        true
    }

    /// Keep the best scoring representative of each group of equivalent identifications,
    /// in descending score order
    pub fn deduplicate(&self, mut identifications: Vec<Identification>) -> Vec<Identification> {
        identifications.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut kept: Vec<Candidate> = Vec::new();
        for ident in identifications {
            let mz = if self.equivalence == Equivalence::MzRt {
                match ident.formula.trim().parse::<f64>() {
                    Ok(mz) => mz,
                    Err(_) => {
                        warn!(
                            "Skipping {}, formula `{}` is not an m/z value",
                            ident.metabolite, ident.formula
                        );
                        continue;
                    }
                }
            } else {
                0.0
            };
            if !self.admit(&ident) {
                continue;
            }
            let candidate = Candidate {
                identification: ident,
                mz,
            };
            if !kept.iter().any(|existing| self.equivalent(&candidate, existing)) {
                kept.push(candidate);
            }
        }
        kept.into_iter()
            .map(|mut c| {
                if self.equivalence == Equivalence::MzRt {
                    c.identification.formula = format!("{:.4}", c.mz);
                }
                c.identification
            })
            .collect()
    }

    /// Deduplicate and then, when enabled, apply the FDR cut
    pub fn refine(&self, identifications: Vec<Identification>) -> Vec<RefinedIdentification> {
        let n_rows = identifications.len();
        let kept = self.deduplicate(identifications);
        let refined: Vec<_> = if !self.fdr {
            kept.into_iter()
                .map(|identification| RefinedIdentification {
                    identification,
                    q_value: None,
                })
                .collect()
        } else {
            let q = q_values(&kept);
            let max_q = self.max_fdr / 100.0;
            kept.into_iter()
                .zip(q)
                .filter(|(ident, q)| (self.keep_decoys || !ident.is_decoy()) && *q <= max_q)
                .map(|(identification, q)| RefinedIdentification {
                    identification,
                    q_value: Some(q),
                })
                .collect()
        };
        debug!("Reduced {n_rows} rows to {} identifications", refined.len());
        refined
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ident(name: &str, key: &str, rt: f64, score: f64) -> Identification {
        Identification::new(name, "[M+H]+", "C6H12O6", rt, score).with_inchikey(key)
    }

    #[test]
    fn test_inchikey_equivalence() {
        let params = RefineParams {
            fdr: false,
            min_score: 0.0,
            ..Default::default()
        };
        let rows = vec![
            ident("A", "WQZGKKKJIJFFOK-GASJEMHNSA-N", 5.0, 900.0),
            ident("A2", "WQZGKKKJIJFFOK-GASJEMHNSA-N", 6.0, 950.0),
            ident("B", "WQZGKKKJIJFFOK-VFUOTHLCSA-N", 5.0, 800.0),
            ident("A", "WQZGKKKJIJFFOK-GASJEMHNSA-N", 9.0, 700.0),
        ];
        let kept = params.deduplicate(rows.clone());
        let names: Vec<_> = kept.iter().map(|i| i.metabolite.as_str()).collect();
        assert_eq!(names, vec!["A2", "B", "A"]);

        let params = RefineParams {
            equivalence: Equivalence::InChIKeyPrefix,
            ..params
        };
        let kept = params.deduplicate(rows);
        let names: Vec<_> = kept.iter().map(|i| i.metabolite.as_str()).collect();
        assert_eq!(names, vec!["A2", "A"]);
    }

    #[test]
    fn test_name_fallback_and_filters() {
        let params = RefineParams {
            fdr: false,
            match_polarity: true,
            ..Default::default()
        };
        let rows = vec![
            Identification::new("X", "[M+H]+", "C6H12O6", 1.0, 990.0).with_source("FTMS+ p"),
            Identification::new("X", "[M+H]+", "C6H12O6", 1.5, 980.0).with_source("FTMS+ p"),
            Identification::new("Y", "[M-H]-", "C6H12O6", 1.0, 970.0).with_source("FTMS+ p"),
            Identification::new("Z", "[M+H]+", "C6H12O6", 1.0, 800.0).with_source("FTMS+ p"),
            Identification::new("W", "[M+Qq]+", "C6H12O6", 1.0, 999.0).with_source("FTMS+ p"),
        ];
        let kept = params.deduplicate(rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].metabolite, "X");
        assert_eq!(kept[0].rt, 1.0);
    }

    #[test]
    fn test_mzrt() {
        let params = RefineParams {
            equivalence: Equivalence::MzRt,
            fdr: false,
            min_score: 0.0,
            ..Default::default()
        };
        let rows = vec![
            Identification::new("F1", "", "300.0", 1.0, 0.9),
            Identification::new("F2", "", "300.001", 1.1, 0.8),
            Identification::new("F3", "", "not a mass", 1.1, 0.95),
            Identification::new("F4", "", "300.1", 1.1, 0.7),
        ];
        let kept = params.deduplicate(rows);
        let formulas: Vec<_> = kept.iter().map(|i| i.formula.as_str()).collect();
        assert_eq!(formulas, vec!["300.0000", "300.1000"]);
    }

    #[test]
    fn test_q_values() {
        let rows: Vec<_> = ["T1", "T2", "Decoy_1", "T3", "Decoy_2", "Decoy_3"]
            .iter()
            .enumerate()
            .map(|(i, name)| ident(name, &format!("KEY{i}"), 1.0, 100.0 - i as f64))
            .collect();
        let q = q_values(&rows);
        assert_eq!(q, vec![0.0, 0.0, 1.0 / 3.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]);

        let params = RefineParams {
            max_fdr: 40.0,
            ..Default::default()
        };
        let refined = params.refine(rows.clone());
        let names: Vec<_> = refined.iter().map(|r| r.identification.metabolite.as_str()).collect();
        assert_eq!(names, vec!["T1", "T2", "T3"]);
        assert_eq!(refined[2].q_value, Some(1.0 / 3.0));

        let params = RefineParams {
            keep_decoys: true,
            ..Default::default()
        };
        assert_eq!(params.refine(rows).len(), 6);
        assert!(q_values(&[]).is_empty());
    }

    #[test]
    fn test_leading_decoy_is_not_smoothed() {
        let rows: Vec<_> = ["Decoy_1", "T1", "T2", "T3"]
            .iter()
            .enumerate()
            .map(|(i, name)| ident(name, &format!("KEY{i}"), 1.0, 100.0 - i as f64))
            .collect();
        let q = q_values(&rows);
        assert_eq!(q, vec![1.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]);

        let params = RefineParams {
            keep_decoys: true,
            max_fdr: 50.0,
            ..Default::default()
        };
        let names: Vec<_> = params
            .refine(rows)
            .into_iter()
            .map(|r| r.identification.metabolite)
            .collect();
        assert_eq!(names, vec!["T1", "T2", "T3"]);
        assert_eq!(q_values(&[ident("T1", "KEY", 1.0, 10.0)]), vec![0.0]);
    }
}
