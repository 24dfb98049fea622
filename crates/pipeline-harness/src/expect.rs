//! Output expectations.
//!
//! This module provides stream-scoped matchers and the engine that settles
//! batches of them against a subprocess's interleaved stdout and stderr.

mod engine;
mod matcher;

pub use engine::{Expectation, OutputMatcher, SharedMatcher};
pub use matcher::{CompiledRegex, Matcher, Predicate, Term, Test, stderr, stdout};
