//! Convenient re-exports for writing pipeline tests.
//!
//! ```ignore
//! use pipeline_harness::prelude::*;
//! ```

// Error handling
pub use crate::error::{HarnessError, Result};

// Configuration
pub use crate::config::HarnessConfig;

// Sessions
pub use crate::session::{Done, Spec, SpecOutcome, TestEnv, spec, spec_with_done};

// Fixtures
pub use crate::fixture::{Fixture, json, touch_file};

// Tool configuration
pub use crate::compose::{Mutator, base_config, compose, entry, merge, query, write_config};

// Running the tool
pub use crate::tool::{CompileReport, Exec, ToolWatch, compile, exec, watch, watch_with};

// Matchers
pub use crate::expect::{Term, Test, stderr, stdout};

// Assertions
pub use crate::assertions::{check_output, expect_errors, read_output};

// Timeouts
pub use crate::util::TimeoutExt;
