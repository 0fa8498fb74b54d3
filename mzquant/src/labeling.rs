//! Heavy isotope labeling specifications and the analyte variants they expand into.
//!
//! A specification names a label by its prefix, `13C`, `15N` or `18O`, optionally followed by
//! an explicit count `[n]` or an inclusive range `[a-b]`. A bare prefix covers every count
//! from zero up to the number of atoms of that element in the analyte's formula. Two labels
//! separated by a comma describe a single co-labeled variant.
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

use crate::formula::FormulaSummary;

/// The mass difference between `C[13]` and `C[12]`
pub const C13_DELTA: f64 = 1.003354838;
/// The mass difference between `N[15]` and `N[14]`
pub const N15_DELTA: f64 = 0.9970348934;
/// The mass difference between `O[18]` and `O[16]`
pub const O18_DELTA: f64 = 2.0042463804;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelingError {
    #[error("Invalid labeling label `{0}`, expected one of 13C, 15N or 18O")]
    UnknownLabel(String),
    #[error("Cannot expand `{0}` when the analyte is given as an m/z value")]
    RequiresFormula(String),
    #[error("Malformed label count `{0}`")]
    MalformedCount(String),
    #[error("Label `{0}` in a labeling pair must select exactly one count")]
    PairPartNotSingle(String),
    #[error("Labeling `{0}` has more than two labels")]
    TooManyLabels(String),
}

/// A heavy isotope label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    C13,
    N15,
    O18,
}

impl Label {
    pub fn prefix(&self) -> &'static str {
        match self {
            Label::C13 => "13C",
            Label::N15 => "15N",
            Label::O18 => "18O",
        }
    }

    /// The mass shift of a single incorporated heavy atom
    pub fn delta(&self) -> f64 {
        match self {
            Label::C13 => C13_DELTA,
            Label::N15 => N15_DELTA,
            Label::O18 => O18_DELTA,
        }
    }

    /// The number of atoms of the labeled element in a formula
    pub fn count_in(&self, formula: &FormulaSummary) -> u32 {
        let n = match self {
            Label::C13 => formula.carbon,
            Label::N15 => formula.nitrogen,
            Label::O18 => formula.oxygen,
        };
        n.max(0) as u32
    }

    fn split_prefix(text: &str) -> Option<(Self, &str)> {
        [Label::C13, Label::N15, Label::O18]
            .into_iter()
            .find_map(|label| text.strip_prefix(label.prefix()).map(|rest| (label, rest)))
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// How many heavy atoms a label part selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCount {
    Exact(u32),
    /// An inclusive range
    Range(u32, u32),
    /// Everything the formula allows
    Natural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPart {
    pub label: Label,
    pub count: LabelCount,
}

impl LabelPart {
    /// Resolve this part to the counts it covers. A bare part inside a pair resolves to the
    /// full element count only.
    fn counts(
        &self,
        text: &str,
        formula: Option<&FormulaSummary>,
        part_of_pair: bool,
    ) -> Result<Vec<u32>, LabelingError> {
        match self.count {
            LabelCount::Exact(n) => Ok(vec![n]),
            LabelCount::Range(a, b) => Ok((a..=b).collect()),
            LabelCount::Natural => {
                let formula = formula.ok_or_else(|| LabelingError::RequiresFormula(text.to_string()))?;
                let n = self.label.count_in(formula);
                if part_of_pair {
                    Ok(vec![n])
                } else {
                    Ok((0..=n).collect())
                }
            }
        }
    }
}

impl FromStr for LabelPart {
    type Err = LabelingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (label, rest) =
            Label::split_prefix(s).ok_or_else(|| LabelingError::UnknownLabel(s.to_string()))?;
        if rest.is_empty() {
            return Ok(Self {
                label,
                count: LabelCount::Natural,
            });
        }
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| LabelingError::MalformedCount(s.to_string()))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| LabelingError::MalformedCount(s.to_string()))
        };
        let count = match inner.split_once('-') {
            Some((a, b)) => {
                let (a, b) = (parse(a)?, parse(b)?);
                if a > b {
                    return Err(LabelingError::MalformedCount(s.to_string()));
                }
                LabelCount::Range(a, b)
            }
            None => LabelCount::Exact(parse(inner)?),
        };
        Ok(Self { label, count })
    }
}

/// A parsed labeling specification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LabelingSpec {
    #[default]
    Unlabeled,
    Single(LabelPart),
    Pair(LabelPart, LabelPart),
}

impl FromStr for LabelingSpec {
    type Err = LabelingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(s)
            .trim();
        if s.is_empty() {
            return Ok(Self::Unlabeled);
        }
        let parts: Vec<&str> = s.split(',').collect();
        match parts.as_slice() {
            [single] => Ok(Self::Single(single.parse()?)),
            [first, second] => Ok(Self::Pair(first.parse()?, second.parse()?)),
            _ => Err(LabelingError::TooManyLabels(s.to_string())),
        }
    }
}

/// One mass to extract for an analyte, named by the suffix appended to its identifiers
#[derive(Debug, Clone, PartialEq)]
pub struct IsotopeVariant {
    pub suffix: String,
    pub target_mz: f64,
}

impl IsotopeVariant {
    pub fn new(suffix: String, target_mz: f64) -> Self {
        Self { suffix, target_mz }
    }

    pub fn unlabeled(target_mz: f64) -> Self {
        Self::new(String::new(), target_mz)
    }
}

/// Shift `base_mz` away from zero by `delta`, so negative ions become more negative
fn shifted(base_mz: f64, delta: f64) -> f64 {
    if base_mz > 0.0 {
        base_mz + delta
    } else {
        base_mz - delta
    }
}

impl LabelingSpec {
    pub fn is_labeled(&self) -> bool {
        !matches!(self, Self::Unlabeled)
    }

    /// Expand this specification into variants of `base_mz`. `formula` is needed when a
    /// label does not give its count explicitly.
    ///
    /// An unlabeled specification expands to nothing.
    pub fn expand(
        &self,
        base_mz: f64,
        formula: Option<&FormulaSummary>,
    ) -> Result<Vec<IsotopeVariant>, LabelingError> {
        match self {
            Self::Unlabeled => Ok(Vec::new()),
            Self::Single(part) => {
                let text = part.label.prefix();
                let variants = part
                    .counts(text, formula, false)?
                    .into_iter()
                    .map(|n| {
                        IsotopeVariant::new(
                            format!("-{}-{}", part.label, n),
                            shifted(base_mz, n as f64 * part.label.delta()),
                        )
                    })
                    .collect();
                Ok(variants)
            }
            Self::Pair(first, second) => {
                let n1 = Self::single_count(first, formula)?;
                let n2 = Self::single_count(second, formula)?;
                let delta = n1 as f64 * first.label.delta() + n2 as f64 * second.label.delta();
                Ok(vec![IsotopeVariant::new(
                    format!("-{},{}-{},{}", first.label, second.label, n1, n2),
                    shifted(base_mz, delta),
                )])
            }
        }
    }

    fn single_count(part: &LabelPart, formula: Option<&FormulaSummary>) -> Result<u32, LabelingError> {
        let text = part.label.prefix();
        match part.counts(text, formula, true)?.as_slice() {
            [n] => Ok(*n),
            _ => Err(LabelingError::PairPartNotSingle(text.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn glucose() -> FormulaSummary {
        FormulaSummary {
            mass: 180.0633881,
            carbon: 6,
            nitrogen: 0,
            oxygen: 6,
        }
    }

    #[test]
    fn test_natural_range() {
        let spec: LabelingSpec = "13C".parse().unwrap();
        let variants = spec.expand(181.0707, Some(&glucose())).unwrap();
        assert_eq!(variants.len(), 7);
        assert_eq!(variants[0].suffix, "-13C-0");
        assert_eq!(variants[0].target_mz, 181.0707);
        assert_eq!(variants[6].suffix, "-13C-6");
        assert!((variants[6].target_mz - (181.0707 + 6.0 * C13_DELTA)).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_counts() {
        let spec: LabelingSpec = "\"15N[1-2]\"".parse().unwrap();
        let variants = spec.expand(-100.0, None).unwrap();
        let suffixes: Vec<_> = variants.iter().map(|v| v.suffix.as_str()).collect();
        assert_eq!(suffixes, vec!["-15N-1", "-15N-2"]);
        assert!((variants[1].target_mz - (-100.0 - 2.0 * N15_DELTA)).abs() < 1e-9);

        let spec: LabelingSpec = "18O[3]".parse().unwrap();
        let variants = spec.expand(50.0, None).unwrap();
        assert_eq!(variants.len(), 1);
        assert!((variants[0].target_mz - (50.0 + 3.0 * O18_DELTA)).abs() < 1e-9);
    }

    #[test]
    fn test_pair() {
        let spec: LabelingSpec = "13C,18O[2]".parse().unwrap();
        let variants = spec.expand(181.0707, Some(&glucose())).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].suffix, "-13C,18O-6,2");
        let expected = 181.0707 + 6.0 * C13_DELTA + 2.0 * O18_DELTA;
        assert!((variants[0].target_mz - expected).abs() < 1e-9);

        let spec: LabelingSpec = "13C[0-2],15N[1]".parse().unwrap();
        assert!(matches!(
            spec.expand(10.0, None),
            Err(LabelingError::PairPartNotSingle(_))
        ));
    }

    #[test]
    fn test_empty_and_errors() {
        let spec: LabelingSpec = "\"\"".parse().unwrap();
        assert!(!spec.is_labeled());
        assert!(spec.expand(10.0, None).unwrap().is_empty());

        assert!(matches!(
            "2H[1]".parse::<LabelingSpec>(),
            Err(LabelingError::UnknownLabel(_))
        ));
        assert!(matches!(
            "13C[a]".parse::<LabelingSpec>(),
            Err(LabelingError::MalformedCount(_))
        ));
        assert!(matches!(
            "13C[3-1]".parse::<LabelingSpec>(),
            Err(LabelingError::MalformedCount(_))
        ));
        assert!(matches!(
            "13C,15N,18O".parse::<LabelingSpec>(),
            Err(LabelingError::TooManyLabels(_))
        ));
        let spec: LabelingSpec = "13C".parse().unwrap();
        assert!(matches!(
            spec.expand(10.0, None),
            Err(LabelingError::RequiresFormula(_))
        ));
    }
}
