//! Assertions on build reports and emitted files.
//!
//! These return [`HarnessError::Assertion`] instead of panicking so they
//! compose with `?` inside spec bodies.

use crate::error::{HarnessError, Result};
use crate::session::TestEnv;
use crate::tool::CompileReport;

/// Output file read when none is named.
pub const DEFAULT_OUTPUT_FILE: &str = "index.js";

/// Check that `report` has exactly `count` errors, each containing at least
/// one of the `covered` fragments.
pub fn expect_errors(report: &CompileReport, count: usize, covered: &[&str]) -> Result<()> {
    if let Some(error) = report
        .errors
        .iter()
        .find(|error| !covered.iter().any(|fragment| error.contains(fragment)))
    {
        return Err(HarnessError::assertion(format!(
            "error not covered by any of {covered:?}:\n{error}"
        )));
    }
    if report.errors.len() != count {
        return Err(HarnessError::assertion(format!(
            "expected {count} errors, got {}:\n{}",
            report.errors.len(),
            report.errors.join("\n")
        )));
    }
    Ok(())
}

/// Read a file from the session's output directory.
pub fn read_output(env: &TestEnv, file: Option<&str>) -> Result<String> {
    let path = env.out_path().join(file.unwrap_or(DEFAULT_OUTPUT_FILE));
    HarnessError::with_io_context(
        std::fs::read_to_string(&path),
        format!("reading {}", path.display()),
    )
}

/// Check that an output file contains `fragment`, ignoring all whitespace.
pub fn check_output(env: &TestEnv, file: Option<&str>, fragment: &str) -> Result<()> {
    let source = read_output(env, file)?;
    if contains_ignoring_whitespace(&source, fragment) {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "expected {} to contain {fragment:?}, got:\n{source}",
            file.unwrap_or(DEFAULT_OUTPUT_FILE)
        )))
    }
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Check containment after removing all whitespace from both sides.
#[must_use]
pub fn contains_ignoring_whitespace(haystack: &str, needle: &str) -> bool {
    strip_whitespace(haystack).contains(&strip_whitespace(needle))
}
