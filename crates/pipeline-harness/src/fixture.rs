//! Fixture files.
//!
//! A [`Fixture`] is a live handle to a file the test wrote. Every mutation is
//! written through to disk immediately; the in-memory content mirrors the last
//! write made through the handle.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Value, json};

use crate::compose::deep_merge;
use crate::error::{HarnessError, Result};

/// Name of the baseline package manifest.
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Name of the compiler-options manifest.
pub const COMPILER_OPTIONS_MANIFEST: &str = "tsconfig.json";

/// A file materialized on disk for a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    path: PathBuf,
    content: String,
}

impl Fixture {
    /// Write `content` to `path`, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>, content: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let content = content.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            HarnessError::with_io_context(
                std::fs::create_dir_all(parent),
                format!("creating {}", parent.display()),
            )?;
        }
        write(&path, &content)?;
        tracing::trace!(path = %path.display(), bytes = content.len(), "wrote fixture");
        Ok(Self { path, content })
    }

    /// The fixture's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The content of the last write.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Replace the content with `updater(current)` and write it through.
    pub fn update<F>(&mut self, updater: F) -> Result<()>
    where
        F: FnOnce(&str) -> String,
    {
        let content = updater(&self.content);
        write(&self.path, &content)?;
        self.content = content;
        Ok(())
    }

    /// Rewrite the file with its current on-disk content, bumping its
    /// modification time so watchers see a change.
    pub fn touch(&self) -> Result<()> {
        touch_file(&self.path)
    }

    /// Delete the file.
    pub fn remove(self) -> Result<()> {
        HarnessError::with_io_context(
            std::fs::remove_file(&self.path),
            format!("removing {}", self.path.display()),
        )
    }
}

impl fmt::Display for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for Fixture {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

fn write(path: &Path, content: &str) -> Result<()> {
    HarnessError::with_io_context(
        std::fs::write(path, content),
        format!("writing {}", path.display()),
    )
}

/// Rewrite a file with its own content.
pub fn touch_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = HarnessError::with_io_context(
        std::fs::read(path),
        format!("reading {}", path.display()),
    )?;
    HarnessError::with_io_context(
        std::fs::write(path, content),
        format!("writing {}", path.display()),
    )
}

/// Serialize as JSON indented with four spaces.
pub fn json(value: &impl Serialize) -> Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(|e| HarnessError::fixture(format!("JSON output is not UTF-8: {e}")))
}

/// Write the baseline package manifest into `dir`.
pub fn pkg(dir: &Path) -> Result<Fixture> {
    let manifest = json!({ "name": "test", "license": "MIT" });
    Fixture::create(dir.join(PACKAGE_MANIFEST), json(&manifest)?)
}

/// Write a compiler-options manifest into `dir`.
///
/// `compiler_options` is merged over `{"target": "es6"}`, and `extra` over
/// the whole document.
pub fn tsconfig(dir: &Path, compiler_options: Option<Value>, extra: Option<Value>) -> Result<Fixture> {
    let mut options = json!({ "target": "es6" });
    if let Some(overrides) = compiler_options {
        deep_merge(&mut options, overrides);
    }
    let mut document = json!({ "compilerOptions": options });
    if let Some(extra) = extra {
        deep_merge(&mut document, extra);
    }
    Fixture::create(dir.join(COMPILER_OPTIONS_MANIFEST), json(&document)?)
}
