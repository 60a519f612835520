pub mod builtin;
pub mod registry;

use std::panic::{AssertUnwindSafe, catch_unwind};

use common::judge_result::truncate_fragment;
use thiserror::Error;

pub use builtin::{
    CaseInsensitiveChecker, ExactChecker, PrecisionChecker, SortChecker, TrimChecker,
};
pub use registry::{CheckerFactory, CheckerRegistry};

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("Unknown checker '{0}'")]
    Unknown(String),

    #[error("Invalid parameter for checker '{checker}': {reason}")]
    InvalidParameter { checker: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckerDetails {
    pub comment: Option<String>,
    pub expected_output_fragment: Option<String>,
    pub user_output_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerResult {
    pub is_correct: bool,
    pub details: CheckerDetails,
}

impl CheckerResult {
    pub fn correct() -> Self {
        Self {
            is_correct: true,
            details: CheckerDetails::default(),
        }
    }

    /// A wrong answer with fragments starting at the first differing line,
    /// ignoring trailing whitespace when locating it.
    pub fn wrong(comment: impl Into<String>, received: &str, expected: &str) -> Self {
        Self::wrong_by(LineComparison::IgnoreTrailingWhitespace, comment, received, expected)
    }

    pub fn wrong_by(
        comparison: LineComparison,
        comment: impl Into<String>,
        received: &str,
        expected: &str,
    ) -> Self {
        let line = first_differing_line(received, expected, comparison);
        Self {
            is_correct: false,
            details: CheckerDetails {
                comment: Some(comment.into()),
                expected_output_fragment: Some(fragment_from_line(expected, line)),
                user_output_fragment: Some(fragment_from_line(received, line)),
            },
        }
    }

    fn failed(comment: String) -> Self {
        Self {
            is_correct: false,
            details: CheckerDetails {
                comment: Some(comment),
                ..CheckerDetails::default()
            },
        }
    }
}

/// Verifies a program's output for one test.
///
/// Implementations must be deterministic and must report malformed output
/// as an incorrect answer rather than failing.
pub trait Checker: Send + Sync {
    fn check(&self, input: &str, received: &str, expected: &str, is_trial: bool) -> CheckerResult;
}

/// Run a checker, turning a panic into a wrong answer.
pub fn check_safely(
    checker: &dyn Checker,
    input: &str,
    received: &str,
    expected: &str,
    is_trial: bool,
) -> CheckerResult {
    match catch_unwind(AssertUnwindSafe(|| {
        checker.check(input, received, expected, is_trial)
    })) {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            CheckerResult::failed(format!("Checker failed: {reason}"))
        }
    }
}

/// How lines are compared when locating the first difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineComparison {
    /// Byte-for-byte, a missing final newline included.
    Exact,
    IgnoreTrailingWhitespace,
}

/// 0-based index of the first line that differs.
pub(crate) fn first_differing_line(
    received: &str,
    expected: &str,
    comparison: LineComparison,
) -> usize {
    match comparison {
        LineComparison::Exact => {
            leading_equal_lines(received.split('\n'), expected.split('\n'), |r, e| r == e)
        }
        LineComparison::IgnoreTrailingWhitespace => {
            leading_equal_lines(received.lines(), expected.lines(), |r, e| {
                r.trim_end() == e.trim_end()
            })
        }
    }
}

fn leading_equal_lines<'a>(
    mut received: impl Iterator<Item = &'a str>,
    mut expected: impl Iterator<Item = &'a str>,
    same: impl Fn(&str, &str) -> bool,
) -> usize {
    let mut index = 0;
    loop {
        match (received.next(), expected.next()) {
            (Some(r), Some(e)) if same(r, e) => index += 1,
            _ => return index,
        }
    }
}

fn fragment_from_line(text: &str, line: usize) -> String {
    let offset: usize = text
        .split_inclusive('\n')
        .take(line)
        .map(str::len)
        .sum();
    truncate_fragment(&text[offset.min(text.len())..])
}
