//! Stream-scoped output matchers.
//!
//! A [`Matcher`] is a predicate over a single [`OutputEvent`]. It is bound to
//! one stream at construction and never fires for chunks on the other one.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::types::{OutputEvent, Stream};

/// A caller-supplied predicate over chunk text.
pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One entry of a [`Test::Terms`] list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// The chunk must contain this text.
    Contains(String),
    /// The chunk must not contain this text.
    Excludes(String),
}

impl Term {
    /// Require the chunk to contain `text`.
    pub fn contains(text: impl Into<String>) -> Self {
        Self::Contains(text.into())
    }

    /// Require the chunk not to contain `text`.
    pub fn excludes(text: impl Into<String>) -> Self {
        Self::Excludes(text.into())
    }

    /// Check this term against the chunk text.
    #[must_use]
    pub fn holds(&self, text: &str) -> bool {
        match self {
            Self::Contains(s) => text.contains(s.as_str()),
            Self::Excludes(s) => !text.contains(s.as_str()),
        }
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Self::contains(s)
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Self::Contains(s)
    }
}

/// `(true, s)` requires `s`, `(false, s)` forbids it.
impl From<(bool, &str)> for Term {
    fn from((required, s): (bool, &str)) -> Self {
        if required {
            Self::contains(s)
        } else {
            Self::excludes(s)
        }
    }
}

/// A compiled regular expression with its source pattern.
#[derive(Clone)]
pub struct CompiledRegex {
    pattern: String,
    regex: Regex,
}

impl CompiledRegex {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    /// Get the source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check whether the text contains a match.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl From<Regex> for CompiledRegex {
    fn from(regex: Regex) -> Self {
        Self {
            pattern: regex.as_str().to_string(),
            regex,
        }
    }
}

/// What a matcher checks in a chunk's text.
#[derive(Clone)]
pub enum Test {
    /// The chunk contains this substring.
    Literal(String),
    /// Every term holds for the same chunk.
    Terms(Vec<Term>),
    /// The regex matches somewhere in the chunk.
    Regex(CompiledRegex),
    /// An arbitrary predicate.
    Custom(Predicate),
}

impl Test {
    /// Create a literal substring test.
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    /// Create a test from a list of terms.
    pub fn terms<I, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Term>,
    {
        Self::Terms(terms.into_iter().map(Into::into).collect())
    }

    /// Create a regex test.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        CompiledRegex::new(pattern).map(Self::Regex)
    }

    /// Create a test from a caller function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Check the test against chunk text.
    #[must_use]
    pub fn accepts(&self, text: &str) -> bool {
        match self {
            Self::Literal(s) => text.contains(s.as_str()),
            Self::Terms(terms) => terms.iter().all(|term| term.holds(text)),
            Self::Regex(r) => r.is_match(text),
            Self::Custom(f) => f(text),
        }
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "Literal({s:?})"),
            Self::Terms(terms) => f.debug_tuple("Terms").field(terms).finish(),
            Self::Regex(r) => write!(f, "Regex({:?})", r.pattern()),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl From<&str> for Test {
    fn from(s: &str) -> Self {
        Self::literal(s)
    }
}

impl From<String> for Test {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl<const N: usize> From<[&str; N]> for Test {
    fn from(terms: [&str; N]) -> Self {
        Self::terms(terms)
    }
}

impl From<Vec<Term>> for Test {
    fn from(terms: Vec<Term>) -> Self {
        Self::Terms(terms)
    }
}

impl From<Regex> for Test {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex.into())
    }
}

/// A predicate over one output chunk on one stream.
#[derive(Debug, Clone)]
pub struct Matcher {
    stream: Stream,
    test: Test,
}

impl Matcher {
    /// Bind a test to a stream.
    pub fn new(stream: Stream, test: impl Into<Test>) -> Self {
        Self {
            stream,
            test: test.into(),
        }
    }

    /// The stream this matcher listens on.
    #[must_use]
    pub const fn stream(&self) -> Stream {
        self.stream
    }

    /// The test applied to chunk text.
    #[must_use]
    pub const fn test(&self) -> &Test {
        &self.test
    }

    /// Check whether the event satisfies this matcher.
    #[must_use]
    pub fn accepts(&self, event: &OutputEvent) -> bool {
        event.stream == self.stream && self.test.accepts(&event.data)
    }
}

/// Create a matcher for stdout chunks.
pub fn stdout(test: impl Into<Test>) -> Matcher {
    Matcher::new(Stream::Stdout, test)
}

/// Create a matcher for stderr chunks.
pub fn stderr(test: impl Into<Test>) -> Matcher {
    Matcher::new(Stream::Stderr, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_substring_test() {
        let m = stderr("Checking finished with 1 errors");
        assert!(m.accepts(&OutputEvent::stderr(
            "[at-loader] Checking finished with 1 errors\n"
        )));
        assert!(!m.accepts(&OutputEvent::stderr("Checking finished with 0 errors")));
    }

    #[test]
    fn matcher_is_stream_scoped() {
        let m = stdout("hello");
        assert!(m.accepts(&OutputEvent::stdout("hello")));
        assert!(!m.accepts(&OutputEvent::stderr("hello")));
    }

    #[test]
    fn terms_require_all_in_one_chunk() {
        let m = stdout([
            "ERROR in [at-loader]",
            "Argument of type '\"1\"' is not assignable to parameter of type 'number'",
        ]);
        assert!(m.accepts(&OutputEvent::stdout(
            "ERROR in [at-loader] ./src/index.ts:6:12\n    \
             Argument of type '\"1\"' is not assignable to parameter of type 'number'."
        )));
        assert!(!m.accepts(&OutputEvent::stdout("ERROR in [at-loader] ./src/index.ts")));
    }

    #[test]
    fn excluded_terms() {
        let test = Test::terms([(true, "bundle.js"), (false, "ERROR")]);
        assert!(test.accepts("bundle.js  1.2 kB"));
        assert!(!test.accepts("bundle.js\nERROR in ./src"));
    }

    #[test]
    fn regex_test() {
        let m = stdout(Test::regex(r"Time: \d+ms").unwrap());
        assert!(m.accepts(&OutputEvent::stdout("Hash: abc\nTime: 412ms\n")));
        assert!(!m.accepts(&OutputEvent::stdout("Time: soon")));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(Test::regex("(unclosed").is_err());
    }

    #[test]
    fn custom_predicate() {
        let m = stdout(Test::custom(|text| text.lines().count() == 2));
        assert!(m.accepts(&OutputEvent::stdout("a\nb")));
        assert!(!m.accepts(&OutputEvent::stdout("a")));
        assert_eq!(format!("{:?}", m.test()), "Custom(..)");
    }
}
