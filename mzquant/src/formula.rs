/*! Elemental formulas, ion type descriptions and the m/z of an analyte ion.

An ion type is written like `[M+H]+`, `[M-H]-`, `[2M+Na]+`, `[M+2H]2+` or `[M-H2O+H]+`.
The analyte m/z is then

```text
mz = (mass * molecular_ion_count + delta - charge * ELECTRON) / charge
```

which is negative for negative ions.
*/
use std::fmt::Display;
use std::str::FromStr;

use chemical_elements::{ChemicalComposition, ElementSpecification, PERIODIC_TABLE};
use thiserror::Error;

use crate::peaks::Polarity;

/// The mass of an electron
pub const ELECTRON: f64 = 0.00054858;
/// The mass of H+, a hydrogen atom minus an electron
pub const PROTON: f64 = 1.00727647;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("Failed to parse formula `{0}`: {1}")]
    MalformedFormula(String, String),
    #[error("Empty formula")]
    EmptyFormula,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IonTypeError {
    #[error("Ion type `{0}` does not end with a polarity")]
    MissingPolarity(String),
    #[error("Ion type `{0}` does not contain a molecular ion `M`")]
    MissingMolecularIon(String),
    #[error("Ion type `{0}` has a malformed charge `{1}`")]
    MalformedCharge(String, String),
    #[error("Ion type `{0}` has a zero charge")]
    ZeroCharge(String),
    #[error("Ion type `{0}` has a malformed adduct `{1}`: {2}")]
    MalformedAdduct(String, String, FormulaError),
    #[error("Ion type `{0}` has a malformed multiplier `{1}`")]
    MalformedMultiplier(String, String),
}

/// The monoisotopic mass of a formula with the counts of the elements that can be
/// isotopically labeled
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FormulaSummary {
    pub mass: f64,
    pub carbon: i32,
    pub nitrogen: i32,
    pub oxygen: i32,
}

fn element_count(composition: &ChemicalComposition, symbol: &str) -> Result<i32, FormulaError> {
    let element = ElementSpecification::parse(symbol)
        .map_err(|e| FormulaError::MalformedFormula(symbol.to_string(), format!("{e:?}")))?;
    Ok(composition[&element])
}

/// Reject element symbols missing from the periodic table before the composition parser
/// looks them up.
fn check_element_symbols(formula: &str) -> Result<(), FormulaError> {
    let mut chars = formula.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c.is_ascii_lowercase() {
            return Err(FormulaError::MalformedFormula(
                formula.to_string(),
                format!("unexpected `{c}` at {start}"),
            ));
        }
        if !c.is_ascii_uppercase() {
            continue;
        }
        let mut end = start + 1;
        while let Some((i, _)) = chars.next_if(|(_, n)| n.is_ascii_lowercase()) {
            end = i + 1;
        }
        let symbol = &formula[start..end];
        if PERIODIC_TABLE.get(symbol).is_none() {
            return Err(FormulaError::MalformedFormula(
                formula.to_string(),
                format!("unknown element `{symbol}`"),
            ));
        }
    }
    Ok(())
}

impl FormulaSummary {
    pub fn parse(formula: &str) -> Result<Self, FormulaError> {
        let formula = formula.trim();
        if formula.is_empty() {
            return Err(FormulaError::EmptyFormula);
        }
        check_element_symbols(formula)?;
        let composition = ChemicalComposition::parse(formula)
            .map_err(|e| FormulaError::MalformedFormula(formula.to_string(), format!("{e:?}")))?;
        Ok(Self {
            mass: composition.mass(),
            carbon: element_count(&composition, "C")?,
            nitrogen: element_count(&composition, "N")?,
            oxygen: element_count(&composition, "O")?,
        })
    }
}

impl FromStr for FormulaSummary {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A parsed ion type description
#[derive(Debug, Clone, PartialEq)]
pub struct IonType {
    /// The number of molecules in the ion, the `n` of `[nM+...]`
    pub molecular_ion_count: i32,
    /// The signed sum of the neutral masses added and removed
    pub delta: f64,
    /// The charge token, e.g. `+`, `-` or `2+`
    pub z: String,
    pub polarity: Polarity,
    text: String,
}

impl IonType {
    pub fn parse(text: &str) -> Result<Self, IonTypeError> {
        let text = text.trim();
        let polarity = text
            .chars()
            .last()
            .and_then(|c| Polarity::try_from(c).ok())
            .ok_or_else(|| IonTypeError::MissingPolarity(text.to_string()))?;

        let (body, z) = match text.rfind(']') {
            Some(i) => (&text[..i], &text[i + 1..]),
            None => {
                // Without brackets the charge token is the trailing digits and sign
                let sign_at = text.len() - 1;
                let digits_start = text[..sign_at]
                    .rfind(|c: char| !c.is_ascii_digit())
                    .map(|i| i + 1)
                    .unwrap_or(0);
                (&text[..digits_start], &text[digits_start..])
            }
        };
        let body = body.strip_prefix('[').unwrap_or(body);
        if z.is_empty() || !z[..z.len() - 1].chars().all(|c| c.is_ascii_digit()) {
            return Err(IonTypeError::MalformedCharge(
                text.to_string(),
                z.to_string(),
            ));
        }

        let m_at = body
            .find('M')
            .ok_or_else(|| IonTypeError::MissingMolecularIon(text.to_string()))?;
        let multiplier = &body[..m_at];
        let molecular_ion_count = if multiplier.is_empty() {
            1
        } else {
            multiplier.parse::<i32>().map_err(|_| {
                IonTypeError::MalformedMultiplier(text.to_string(), multiplier.to_string())
            })?
        };

        let delta = parse_adducts(&body[m_at + 1..])
            .map_err(|(adduct, e)| IonTypeError::MalformedAdduct(text.to_string(), adduct, e))?;

        let ion = Self {
            molecular_ion_count,
            delta,
            z: z.to_string(),
            polarity,
            text: text.to_string(),
        };
        if ion.charge()? == 0 {
            return Err(IonTypeError::ZeroCharge(text.to_string()));
        }
        Ok(ion)
    }

    /// The signed charge of the ion. A bare sign is a unit charge, otherwise the leading
    /// digits give the magnitude and the ion's polarity gives the sign.
    pub fn charge(&self) -> Result<i32, IonTypeError> {
        match self.z.as_str() {
            "+" => Ok(1),
            "-" => Ok(-1),
            z => {
                let magnitude: i32 = z[..z.len() - 1].parse().map_err(|_| {
                    IonTypeError::MalformedCharge(self.text.clone(), z.to_string())
                })?;
                Ok(magnitude * self.polarity.sign() as i32)
            }
        }
    }

    /// The m/z of this ion formed from a molecule of `mass`
    pub fn mz_of(&self, mass: f64) -> Result<f64, IonTypeError> {
        let charge = self.charge()? as f64;
        Ok((mass * self.molecular_ion_count as f64 + self.delta - charge * ELECTRON) / charge)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for IonType {
    type Err = IonTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for IonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Sum the signed masses of a sequence of `+A-B+2C` terms
fn parse_adducts(terms: &str) -> Result<f64, (String, FormulaError)> {
    let malformed = |term: &str, reason: String| {
        (
            term.to_string(),
            FormulaError::MalformedFormula(term.to_string(), reason),
        )
    };
    let mut delta = 0.0;
    let mut rest = terms.trim();
    while !rest.is_empty() {
        let sign = match rest.as_bytes()[0] {
            b'+' => 1.0,
            b'-' => -1.0,
            _ => return Err(malformed(rest, "expected `+` or `-`".to_string())),
        };
        let end = rest[1..]
            .find(|c: char| c == '+' || c == '-')
            .map(|i| i + 1)
            .unwrap_or(rest.len());
        let term = &rest[1..end];
        let count_end = term
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(term.len());
        let count: f64 = if count_end == 0 {
            1.0
        } else {
            term[..count_end]
                .parse()
                .map_err(|e: std::num::ParseFloatError| malformed(term, e.to_string()))?
        };
        let summary =
            FormulaSummary::parse(&term[count_end..]).map_err(|e| (term.to_string(), e))?;
        delta += sign * count * summary.mass;
        rest = &rest[end..];
    }
    Ok(delta)
}

/// The m/z of `formula` ionized as `ion_type`, with its labelable element counts
pub fn analyte_mz(
    formula: &str,
    ion_type: &IonType,
) -> Result<(f64, FormulaSummary), AnalyteMassError> {
    let summary = FormulaSummary::parse(formula)?;
    let mz = ion_type.mz_of(summary.mass)?;
    Ok((mz, summary))
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyteMassError {
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    IonType(#[from] IonTypeError),
}

#[cfg(test)]
mod test {
    use super::*;

    const GLUCOSE: f64 = 180.06338810;
    const HYDROGEN: f64 = 1.00782503;

    #[test]
    fn test_formula_summary() {
        let glucose = FormulaSummary::parse("C6H12O6").unwrap();
        assert_is_close!(glucose.mass, GLUCOSE, 1e-4, "mass");
        assert_eq!(glucose.carbon, 6);
        assert_eq!(glucose.nitrogen, 0);
        assert_eq!(glucose.oxygen, 6);
        assert!(FormulaSummary::parse("").is_err());
    }

    #[test]
    fn test_protonated() {
        let ion = IonType::parse("[M+H]+").unwrap();
        assert_eq!(ion.molecular_ion_count, 1);
        assert_eq!(ion.charge().unwrap(), 1);
        assert_eq!(ion.polarity, Polarity::Positive);
        assert_is_close!(ion.delta, HYDROGEN, 1e-6, "delta");
        let (mz, _) = analyte_mz("C6H12O6", &ion).unwrap();
        assert_is_close!(mz, GLUCOSE + PROTON, 1e-4, "mz");
    }

    #[test]
    fn test_deprotonated_is_negative() {
        let ion = IonType::parse("[M-H]-").unwrap();
        assert_eq!(ion.charge().unwrap(), -1);
        let mz = ion.mz_of(GLUCOSE).unwrap();
        assert_is_close!(mz, -(GLUCOSE - PROTON), 1e-4, "mz");
    }

    #[test]
    fn test_multiply_charged_and_dimer() {
        let ion = IonType::parse("[M+2H]2+").unwrap();
        assert_eq!(ion.charge().unwrap(), 2);
        assert_is_close!(ion.mz_of(GLUCOSE).unwrap(), (GLUCOSE + 2.0 * PROTON) / 2.0, 1e-4, "mz");

        let ion = IonType::parse("[2M+Na]+").unwrap();
        assert_eq!(ion.molecular_ion_count, 2);
        assert_is_close!(ion.delta, 22.98976928, 1e-4, "delta");

        let ion = IonType::parse("[M-H2O+H]+").unwrap();
        assert_is_close!(ion.delta, HYDROGEN - 18.0105647, 1e-4, "delta");

        let ion = IonType::parse("[M]+").unwrap();
        assert_eq!(ion.delta, 0.0);
    }

    #[test]
    fn test_malformed_ion_types() {
        assert!(matches!(
            IonType::parse("[M+H]"),
            Err(IonTypeError::MissingPolarity(_))
        ));
        assert!(matches!(
            IonType::parse("[X+H]+"),
            Err(IonTypeError::MissingMolecularIon(_))
        ));
        assert!(matches!(
            IonType::parse("[M+H]a+"),
            Err(IonTypeError::MalformedCharge(_, _))
        ));
        assert!(matches!(
            IonType::parse("[M+Qq]+"),
            Err(IonTypeError::MalformedAdduct(_, _, _))
        ));
    }

    #[test]
    fn test_unknown_elements() {
        let err = FormulaSummary::parse("C6H12Xx").unwrap_err();
        assert!(
            matches!(&err, FormulaError::MalformedFormula(f, reason) if f == "C6H12Xx" && reason.contains("`Xx`")),
            "{err}"
        );
        assert!(matches!(
            FormulaSummary::parse("c6H12O6"),
            Err(FormulaError::MalformedFormula(_, _))
        ));
        assert!(matches!(
            IonType::parse("[M+Zz]+"),
            Err(IonTypeError::MalformedAdduct(_, _, _))
        ));
        let ion = IonType::parse("[M+H]+").unwrap();
        assert!(matches!(
            analyte_mz("C6Xx", &ion),
            Err(AnalyteMassError::Formula(FormulaError::MalformedFormula(_, _)))
        ));
        assert!(FormulaSummary::parse("C6H12O6").is_ok());
    }
}
