use super::{Checker, CheckerError, CheckerResult, LineComparison};

fn unify_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Trim trailing whitespace per line and drop trailing empty lines.
fn normalize_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Byte-for-byte comparison after unifying line endings.
#[derive(Debug, Default)]
pub struct ExactChecker;

impl Checker for ExactChecker {
    fn check(&self, _input: &str, received: &str, expected: &str, _is_trial: bool) -> CheckerResult {
        let (received, expected) = (unify_line_endings(received), unify_line_endings(expected));
        if received == expected {
            CheckerResult::correct()
        } else {
            CheckerResult::wrong_by(
                LineComparison::Exact,
                "Output differs from expected",
                &received,
                &expected,
            )
        }
    }
}

/// Ignores trailing whitespace on each line and trailing blank lines.
#[derive(Debug, Default)]
pub struct TrimChecker;

impl Checker for TrimChecker {
    fn check(&self, _input: &str, received: &str, expected: &str, _is_trial: bool) -> CheckerResult {
        if normalize_lines(received.trim_start()) == normalize_lines(expected.trim_start()) {
            CheckerResult::correct()
        } else {
            CheckerResult::wrong("Output differs from expected", received, expected)
        }
    }
}

/// Order of lines does not matter.
#[derive(Debug, Default)]
pub struct SortChecker;

impl Checker for SortChecker {
    fn check(&self, _input: &str, received: &str, expected: &str, _is_trial: bool) -> CheckerResult {
        let mut r = normalize_lines(received);
        let mut e = normalize_lines(expected);
        r.retain(|l| !l.is_empty());
        e.retain(|l| !l.is_empty());
        r.sort_unstable();
        e.sort_unstable();
        if r == e {
            CheckerResult::correct()
        } else {
            CheckerResult::wrong(
                "Sorted output differs from expected",
                &r.join("\n"),
                &e.join("\n"),
            )
        }
    }
}

#[derive(Debug, Default)]
pub struct CaseInsensitiveChecker;

impl Checker for CaseInsensitiveChecker {
    fn check(&self, _input: &str, received: &str, expected: &str, _is_trial: bool) -> CheckerResult {
        let r = received.to_lowercase();
        let e = expected.to_lowercase();
        if normalize_lines(r.trim_start()) == normalize_lines(e.trim_start()) {
            CheckerResult::correct()
        } else {
            CheckerResult::wrong("Output differs from expected", received, expected)
        }
    }
}

/// Compares whitespace-separated tokens; numeric tokens match within
/// `10^-digits`, everything else must match exactly.
#[derive(Debug)]
pub struct PrecisionChecker {
    digits: u32,
    epsilon: f64,
}

impl PrecisionChecker {
    pub const DEFAULT_DIGITS: u32 = 14;

    pub fn new(digits: u32) -> Self {
        Self {
            digits,
            epsilon: 10f64.powi(-(digits as i32)),
        }
    }

    pub fn from_parameter(parameter: Option<&str>) -> Result<Self, CheckerError> {
        let Some(raw) = parameter.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(Self::new(Self::DEFAULT_DIGITS));
        };
        match raw.parse::<u32>() {
            Ok(digits) if digits <= 18 => Ok(Self::new(digits)),
            _ => Err(CheckerError::InvalidParameter {
                checker: "PrecisionChecker".into(),
                reason: format!("expected a digit count between 0 and 18, got '{raw}'"),
            }),
        }
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    fn tokens_match(&self, received: &str, expected: &str) -> bool {
        match (received.parse::<f64>(), expected.parse::<f64>()) {
            (Ok(r), Ok(e)) if r.is_finite() && e.is_finite() => {
                // Fall back to relative error for large magnitudes.
                let diff = (r - e).abs();
                diff <= self.epsilon || diff <= self.epsilon * e.abs()
            }
            _ => received == expected,
        }
    }
}

impl Default for PrecisionChecker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIGITS)
    }
}

impl Checker for PrecisionChecker {
    fn check(&self, _input: &str, received: &str, expected: &str, _is_trial: bool) -> CheckerResult {
        let r: Vec<&str> = received.split_whitespace().collect();
        let e: Vec<&str> = expected.split_whitespace().collect();
        if r.len() != e.len() {
            return CheckerResult::wrong(
                format!("Expected {} tokens, received {}", e.len(), r.len()),
                received,
                expected,
            );
        }
        match r
            .iter()
            .zip(&e)
            .position(|(r, e)| !self.tokens_match(r, e))
        {
            None => CheckerResult::correct(),
            Some(index) => CheckerResult::wrong(
                format!(
                    "Token {} differs: expected '{}', received '{}'",
                    index + 1,
                    e[index],
                    r[index]
                ),
                received,
                expected,
            ),
        }
    }
}
