use std::ops::{Add, AddAssign};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub analytes: usize,
    pub variants: usize,
    pub skipped: usize,
    pub insufficient_coverage: usize,
    pub rows: usize,
}

impl ProgressRecord {
    pub fn skipped() -> Self {
        Self {
            analytes: 1,
            skipped: 1,
            ..Default::default()
        }
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.analytes += rhs.analytes;
        self.variants += rhs.variants;
        self.skipped += rhs.skipped;
        self.insufficient_coverage += rhs.insufficient_coverage;
        self.rows += rhs.rows;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_accumulate() {
        let rows = ProgressRecord {
            analytes: 1,
            variants: 3,
            rows: 3,
            ..Default::default()
        };
        let mut total = rows + ProgressRecord::skipped();
        total += ProgressRecord {
            analytes: 1,
            insufficient_coverage: 1,
            ..Default::default()
        };
        assert_eq!(
            total,
            ProgressRecord {
                analytes: 3,
                variants: 3,
                skipped: 1,
                insufficient_coverage: 1,
                rows: 3,
            }
        );
    }
}
