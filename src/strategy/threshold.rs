//! Threshold comparison expressions.
//!
//! A metric condition's threshold is a string like `<100`, `<=0.05`, or
//! `>=0.9`: one comparison operator followed by a number. Expressions are
//! validated once at load time and re-parsed on use.

use super::validation::StrategyError;

/// Comparison operator of a threshold expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// A parsed threshold expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub op: CompareOp,
    pub value: f64,
}

impl ThresholdExpr {
    /// Parse an expression like `<=0.05`.
    ///
    /// Two-character operators are matched before their one-character
    /// prefixes, so `<=` never parses as `<` applied to `=0.05`.
    pub fn parse(expr: &str) -> Result<Self, StrategyError> {
        let (op, rest) = if let Some(rest) = expr.strip_prefix("<=") {
            (CompareOp::Le, rest)
        } else if let Some(rest) = expr.strip_prefix(">=") {
            (CompareOp::Ge, rest)
        } else if let Some(rest) = expr.strip_prefix('<') {
            (CompareOp::Lt, rest)
        } else if let Some(rest) = expr.strip_prefix('>') {
            (CompareOp::Gt, rest)
        } else if let Some(rest) = expr.strip_prefix('=') {
            (CompareOp::Eq, rest)
        } else {
            return Err(StrategyError::Threshold {
                expr: expr.to_string(),
                reason: "missing comparison operator".into(),
            });
        };

        let value: f64 = rest.parse().map_err(|_| StrategyError::Threshold {
            expr: expr.to_string(),
            reason: format!("invalid number '{rest}'"),
        })?;

        Ok(Self { op, value })
    }

    /// Apply the comparison to an observed value.
    pub fn matches(&self, actual: f64) -> bool {
        match self.op {
            CompareOp::Lt => actual < self.value,
            CompareOp::Le => actual <= self.value,
            CompareOp::Gt => actual > self.value,
            CompareOp::Ge => actual >= self.value,
            CompareOp::Eq => actual == self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_operators() {
        assert_eq!(
            ThresholdExpr::parse("<100").expect("test: parse").op,
            CompareOp::Lt
        );
        assert_eq!(
            ThresholdExpr::parse("<=100").expect("test: parse").op,
            CompareOp::Le
        );
        assert_eq!(
            ThresholdExpr::parse(">0.5").expect("test: parse").op,
            CompareOp::Gt
        );
        assert_eq!(
            ThresholdExpr::parse(">=0.5").expect("test: parse").op,
            CompareOp::Ge
        );
        assert_eq!(
            ThresholdExpr::parse("=42").expect("test: parse").op,
            CompareOp::Eq
        );
    }

    #[test]
    fn test_parse_rejects_missing_operator() {
        let err = ThresholdExpr::parse("100").unwrap_err();
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_parse_rejects_bad_number() {
        assert!(ThresholdExpr::parse("<abc").is_err());
        assert!(ThresholdExpr::parse("<").is_err());
    }

    #[test]
    fn test_equality_boundary() {
        // Threshold equal to actual: true for '=', false for strict
        // comparisons.
        assert!(ThresholdExpr::parse("=100").expect("test").matches(100.0));
        assert!(!ThresholdExpr::parse("<100").expect("test").matches(100.0));
        assert!(!ThresholdExpr::parse(">100").expect("test").matches(100.0));
        assert!(ThresholdExpr::parse("<=100").expect("test").matches(100.0));
        assert!(ThresholdExpr::parse(">=100").expect("test").matches(100.0));
    }

    #[test]
    fn test_less_than_is_monotone_decreasing_in_actual() {
        // If `<t` holds for some actual, it holds for every smaller actual.
        let expr = ThresholdExpr::parse("<0.05").expect("test: parse");
        let samples = [0.0, 0.01, 0.04, 0.05, 0.06, 1.0];
        let mut previous = true;
        for actual in samples {
            let current = expr.matches(actual);
            assert!(previous || !current, "result became true as actual grew");
            previous = current;
        }
    }

    #[test]
    fn test_greater_equal_is_monotone_increasing_in_actual() {
        let expr = ThresholdExpr::parse(">=0.9").expect("test: parse");
        let samples = [0.0, 0.5, 0.89, 0.9, 0.91, 1.0];
        let mut previous = false;
        for actual in samples {
            let current = expr.matches(actual);
            assert!(!previous || current, "result became false as actual grew");
            previous = current;
        }
    }

    #[test]
    fn test_parse_negative_and_fractional_values() {
        let expr = ThresholdExpr::parse("<=-1.5").expect("test: parse");
        assert!(expr.matches(-2.0));
        assert!(!expr.matches(0.0));
    }
}
