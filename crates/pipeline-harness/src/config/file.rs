//! File-based configuration loading.

use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

/// Name of the harness configuration file.
pub const CONFIG_FILE_NAME: &str = "harness.toml";

/// Configuration file locator.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Search paths, in priority order.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a search path.
    #[must_use]
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Find a config file by name in the search paths.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Read a config file.
    pub fn read(path: &Path) -> Result<String> {
        HarnessError::with_io_context(
            std::fs::read_to_string(path),
            format!("reading {}", path.display()),
        )
    }
}
