//! Configuration for pipeline-harness.
//!
//! [`HarnessConfig`] is layered: built-in defaults, then an optional
//! `harness.toml`, then `HARNESS_*` environment variables. Paths are made
//! absolute when the configuration is loaded, because sessions switch the
//! process working directory.

mod env;
mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use env::{DEFAULT_PREFIX, EnvOverrides, vars};
pub use file::{CONFIG_FILE_NAME, ConfigLoader};

use crate::error::Result;

/// Default directory holding per-test working directories.
pub const DEFAULT_TEST_ROOT: &str = ".test";

/// Default source subdirectory of a session.
pub const DEFAULT_SRC_DIR: &str = "./src";

/// Default output subdirectory of a session.
pub const DEFAULT_OUT_DIR: &str = "./out";

/// Default name of the generated tool configuration.
pub const DEFAULT_TOOL_CONFIG_FILE: &str = "webpack.config.js";

/// Default expect timeout (30 seconds).
pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default marker of an error entry in tool output.
pub const DEFAULT_ERROR_MARKER: &str = r"(?m)^ERROR in ";

/// Default marker printed by the tool after each (re)build.
pub const DEFAULT_BUILD_BOUNDARY: &str = r"(?m)^Time: \d+ms";

/// Harness configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory under which per-test working directories are created.
    pub test_root: PathBuf,

    /// Source subdirectory name, relative to the session directory.
    pub src_dir: String,

    /// Output subdirectory name, relative to the session directory.
    pub out_dir: String,

    /// The loader under test.
    pub loader: PathBuf,

    /// The build tool's CLI entry script.
    pub tool_entry: PathBuf,

    /// Interpreter used to run the entry script.
    pub node: String,

    /// File name of the generated tool configuration.
    pub config_file: String,

    /// Echo subprocess output to the console.
    pub echo_output: bool,

    /// Default timeout for awaiting expectations, in milliseconds.
    pub expect_timeout_ms: u64,

    /// Regex marking the start of an error entry in tool output.
    pub error_marker: String,

    /// Regex marking the end of a build in watch mode.
    pub build_boundary: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self {
            test_root: cwd.join(DEFAULT_TEST_ROOT),
            src_dir: DEFAULT_SRC_DIR.to_string(),
            out_dir: DEFAULT_OUT_DIR.to_string(),
            loader: cwd.join("index.js"),
            tool_entry: cwd
                .join("node_modules")
                .join("webpack")
                .join("bin")
                .join("webpack.js"),
            node: "node".to_string(),
            config_file: DEFAULT_TOOL_CONFIG_FILE.to_string(),
            echo_output: true,
            expect_timeout_ms: millis(DEFAULT_EXPECT_TIMEOUT),
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            build_boundary: DEFAULT_BUILD_BOUNDARY.to_string(),
        }
    }
}

/// Absolute directory containing `path`, also for a bare file name.
fn file_dir(path: &Path) -> Result<PathBuf> {
    let path = std::path::absolute(path)?;
    Ok(path.parent().map_or_else(|| path.clone(), Path::to_path_buf))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl HarnessConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the configuration the usual way: defaults, then `harness.toml`
    /// from the current directory if present, then `HARNESS_*` variables.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let config = match ConfigLoader::new().add_path(&cwd).find(CONFIG_FILE_NAME) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        Ok(config.apply_env(&EnvOverrides::from_env()).resolve_paths(&cwd))
    }

    /// Load from a TOML file. Relative paths are resolved against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = ConfigLoader::read(path)?;
        Ok(Self::from_toml_str(&content)?.resolve_paths(&file_dir(path)?))
    }

    /// Parse from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides.
    #[must_use]
    pub fn apply_env(mut self, env: &EnvOverrides) -> Self {
        if let Some(root) = &env.test_root {
            self.test_root.clone_from(root);
        }
        if let Some(loader) = &env.loader {
            self.loader.clone_from(loader);
        }
        if let Some(entry) = &env.tool_entry {
            self.tool_entry.clone_from(entry);
        }
        if let Some(node) = &env.node {
            self.node.clone_from(node);
        }
        if let Some(echo) = env.echo_output {
            self.echo_output = echo;
        }
        if let Some(timeout) = env.expect_timeout {
            self.expect_timeout_ms = millis(timeout);
        }
        self
    }

    /// Make `test_root`, `loader` and `tool_entry` absolute against `base`.
    #[must_use]
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        for path in [&mut self.test_root, &mut self.loader, &mut self.tool_entry] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Set the test root directory.
    #[must_use]
    pub fn test_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.test_root = path.into();
        self
    }

    /// Set the loader under test.
    #[must_use]
    pub fn loader(mut self, path: impl Into<PathBuf>) -> Self {
        self.loader = path.into();
        self
    }

    /// Set the tool entry script and the interpreter that runs it.
    #[must_use]
    pub fn tool(mut self, node: impl Into<String>, entry: impl Into<PathBuf>) -> Self {
        self.node = node.into();
        self.tool_entry = entry.into();
        self
    }

    /// Set whether subprocess output is echoed.
    #[must_use]
    pub const fn echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    /// Set the default expect timeout.
    #[must_use]
    pub fn expect_timeout(mut self, timeout: Duration) -> Self {
        self.expect_timeout_ms = millis(timeout);
        self
    }

    /// Set the watch-mode build boundary regex.
    #[must_use]
    pub fn build_boundary(mut self, pattern: impl Into<String>) -> Self {
        self.build_boundary = pattern.into();
        self
    }

    /// The default expect timeout.
    #[must_use]
    pub const fn expect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }
}
