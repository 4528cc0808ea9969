use rustfst::semirings::{LogWeight, Semiring};

use crate::error::Result;

/// Log-probability in integer units of a [`LogMath`] base.
pub type LogProb = i32;

/// Integer log-domain arithmetic.
///
/// Recognizer scores are stored as `round(log_base(p))`.  Addition of
/// probabilities goes through rustfst's log semiring, which works on
/// negated natural logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogMath {
    base: f64,
    ln_base: f64,
}

impl LogMath {
    pub fn new(base: f64) -> Self {
        Self {
            base,
            ln_base: base.ln(),
        }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// Convert a natural log to integer log units.
    pub fn ln_to_log(&self, ln: f64) -> LogProb {
        (ln / self.ln_base).round() as LogProb
    }

    pub fn log_to_ln(&self, log: LogProb) -> f64 {
        f64::from(log) * self.ln_base
    }

    /// `log(base^a + base^b)`, never smaller than the larger operand.
    pub fn add(&self, a: LogProb, b: LogProb) -> Result<LogProb> {
        let mut sum = LogWeight::from(-self.log_to_ln(a) as f32);
        sum.plus_assign(LogWeight::from(-self.log_to_ln(b) as f32))?;
        let merged = self.ln_to_log(-f64::from(*sum.value()));
        Ok(merged.max(a.max(b)))
    }

    /// Log-add every value of `scores`; `None` when it is empty.
    pub fn sum<I>(&self, scores: I) -> Result<Option<LogProb>>
    where
        I: IntoIterator<Item = LogProb>,
    {
        let mut total = None;
        for score in scores {
            total = Some(match total {
                None => score,
                Some(acc) => self.add(acc, score)?,
            });
        }
        Ok(total)
    }
}

impl Default for LogMath {
    fn default() -> Self {
        Self::new(1.0001)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_converts_between_bases() {
        let lmath = LogMath::default();
        let half = lmath.ln_to_log(0.5f64.ln());
        assert!(half < 0);
        assert!((lmath.log_to_ln(half) - 0.5f64.ln()).abs() < 1e-3);
    }

    #[test]
    fn it_adds_probabilities() {
        let lmath = LogMath::default();
        let half = lmath.ln_to_log(0.5f64.ln());
        let one = lmath.add(half, half).unwrap();
        assert!(one.abs() <= 2, "got {}", one);
        let quarter = lmath.ln_to_log(0.25f64.ln());
        let sum = lmath.add(half, quarter).unwrap();
        let expected = lmath.ln_to_log(0.75f64.ln());
        assert!((sum - expected).abs() <= 2, "{} vs {}", sum, expected);
    }

    #[test]
    fn it_never_goes_below_the_larger_operand() {
        let lmath = LogMath::default();
        let a = -20;
        let b = -2_000_000;
        assert_eq!(lmath.add(a, b).unwrap(), a);
        assert_eq!(lmath.add(b, a).unwrap(), a);
    }

    #[test]
    fn it_sums_sequences() {
        let lmath = LogMath::default();
        assert_eq!(lmath.sum(Vec::new()).unwrap(), None);
        assert_eq!(lmath.sum(vec![-7]).unwrap(), Some(-7));
        let quarter = lmath.ln_to_log(0.25f64.ln());
        let total = lmath.sum(vec![quarter; 4]).unwrap().unwrap();
        assert!(total.abs() <= 4, "got {}", total);
    }
}
