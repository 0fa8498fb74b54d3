//! Detections and the small value types that describe where they came from.
use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// The identifier of a sample (raw file) in a peak store. Real samples are always positive.
pub type SampleId = i64;

/// A named sample from a peak store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sample {
    pub id: SampleId,
    pub name: String,
}

impl Sample {
    pub fn new(id: SampleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The ionization polarity of a scan or analyte.
///
/// Negative polarity masses are represented as negative numbers, so the polarity of a
/// bare m/z value can be recovered from its sign.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarity {
    #[default]
    Positive,
    Negative,
}

impl Polarity {
    /// Infer the polarity of a signed mass. Zero is treated as positive.
    pub fn of_mass(mass: f64) -> Self {
        if mass >= 0.0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Positive => '+',
            Self::Negative => '-',
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` is not a polarity, expected `+` or `-`")]
pub struct PolarityParseError(pub String);

impl FromStr for Polarity {
    type Err = PolarityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "+" => Ok(Self::Positive),
            "-" => Ok(Self::Negative),
            _ => Err(PolarityParseError(s.to_string())),
        }
    }
}

impl TryFrom<char> for Polarity {
    type Error = PolarityParseError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            '+' => Ok(Self::Positive),
            '-' => Ok(Self::Negative),
            _ => Err(PolarityParseError(value.to_string())),
        }
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// The acquisition class of a scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanClass {
    #[default]
    MS1,
    MS2,
}

impl ScanClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanClass::MS1 => "MS1",
            ScanClass::MS2 => "MS2",
        }
    }
}

impl Display for ScanClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single MS1 peak observation, already de-scaled to m/z and minutes
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Detection {
    pub mz: f64,
    pub time: f64,
    pub intensity: f64,
    pub sample: SampleId,
}

impl Detection {
    pub fn new(mz: f64, time: f64, intensity: f64, sample: SampleId) -> Self {
        Self {
            mz,
            time,
            intensity,
            sample,
        }
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::of_mass(self.mz)
    }
}

/// A fragment peak observed in a product ion scan, carrying the m/z of the precursor
/// it was produced from
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FragmentDetection {
    pub precursor_mz: f64,
    pub mz: f64,
    pub time: f64,
    pub intensity: f64,
    pub sample: SampleId,
}

impl FragmentDetection {
    pub fn new(precursor_mz: f64, mz: f64, time: f64, intensity: f64, sample: SampleId) -> Self {
        Self {
            precursor_mz,
            mz,
            time,
            intensity,
            sample,
        }
    }

    /// The mass lost between the precursor and this fragment
    pub fn loss(&self) -> f64 {
        self.precursor_mz - self.mz
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_polarity() {
        assert_eq!(Polarity::of_mass(0.0), Polarity::Positive);
        assert_eq!(Polarity::of_mass(-12.0), Polarity::Negative);
        assert_eq!("-".parse::<Polarity>().unwrap(), Polarity::Negative);
        assert_eq!(Polarity::try_from('+').unwrap(), Polarity::Positive);
        assert!("x".parse::<Polarity>().is_err());
        assert_eq!(Polarity::Negative.to_string(), "-");
        assert_eq!(Polarity::Negative.sign(), -1.0);
    }

    #[test]
    fn test_fragment_loss() {
        let frag = FragmentDetection::new(300.0, 167.958, 1.0, 1e5, 1);
        assert!((frag.loss() - 132.042).abs() < 1e-9);
    }
}
