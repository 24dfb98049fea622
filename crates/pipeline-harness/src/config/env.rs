//! `HARNESS_*` environment overrides.

use std::path::PathBuf;
use std::time::Duration;

/// Prefix of every variable the harness reads.
pub const DEFAULT_PREFIX: &str = "HARNESS";

/// Variable names, without the prefix.
pub mod vars {
    /// Test root directory.
    pub const TEST_ROOT: &str = "TEST_ROOT";
    /// Loader under test.
    pub const LOADER: &str = "LOADER";
    /// Tool entry script.
    pub const TOOL_ENTRY: &str = "TOOL_ENTRY";
    /// Interpreter for the entry script.
    pub const NODE: &str = "NODE";
    /// Echo subprocess output (`1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`).
    pub const ECHO_OUTPUT: &str = "ECHO_OUTPUT";
    /// Default expect timeout in milliseconds.
    pub const EXPECT_TIMEOUT_MS: &str = "EXPECT_TIMEOUT_MS";
}

/// Values found in the environment. `None` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// `HARNESS_TEST_ROOT`
    pub test_root: Option<PathBuf>,
    /// `HARNESS_LOADER`
    pub loader: Option<PathBuf>,
    /// `HARNESS_TOOL_ENTRY`
    pub tool_entry: Option<PathBuf>,
    /// `HARNESS_NODE`
    pub node: Option<String>,
    /// `HARNESS_ECHO_OUTPUT`
    pub echo_output: Option<bool>,
    /// `HARNESS_EXPECT_TIMEOUT_MS`
    pub expect_timeout: Option<Duration>,
}

impl EnvOverrides {
    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(DEFAULT_PREFIX, |name| std::env::var(name).ok())
    }

    /// Read `<prefix>_<NAME>` variables through `lookup`.
    ///
    /// Empty values count as unset. Values that do not parse are ignored
    /// with a warning.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}_{name}")
            };
            lookup(&key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        let echo_output = get(vars::ECHO_OUTPUT).and_then(|(key, value)| {
            let flag = parse_flag(&value);
            if flag.is_none() {
                tracing::warn!(%key, %value, "ignoring unrecognized flag");
            }
            flag
        });
        let expect_timeout = get(vars::EXPECT_TIMEOUT_MS).and_then(|(key, value)| {
            value
                .parse()
                .map(Duration::from_millis)
                .map_err(|err| tracing::warn!(%key, %value, %err, "ignoring invalid timeout"))
                .ok()
        });

        Self {
            test_root: get(vars::TEST_ROOT).map(|(_, value)| value.into()),
            loader: get(vars::LOADER).map(|(_, value)| value.into()),
            tool_entry: get(vars::TOOL_ENTRY).map(|(_, value)| value.into()),
            node: get(vars::NODE).map(|(_, value)| value),
            echo_output,
            expect_timeout,
        }
    }

    /// Check whether nothing was overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_prefixed_variables() {
        let overrides = EnvOverrides::from_lookup(
            DEFAULT_PREFIX,
            lookup(&[
                ("HARNESS_LOADER", "/repo/dist/index.js"),
                ("HARNESS_NODE", " /opt/node/bin/node "),
                ("HARNESS_ECHO_OUTPUT", "off"),
                ("HARNESS_EXPECT_TIMEOUT_MS", "1500"),
                ("LOADER", "/ignored/without/prefix.js"),
            ]),
        );
        assert_eq!(overrides.loader, Some(PathBuf::from("/repo/dist/index.js")));
        assert_eq!(overrides.node.as_deref(), Some("/opt/node/bin/node"));
        assert_eq!(overrides.echo_output, Some(false));
        assert_eq!(overrides.expect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(overrides.test_root, None);
    }

    #[test]
    fn empty_prefix_uses_bare_names() {
        let overrides = EnvOverrides::from_lookup("", lookup(&[("TOOL_ENTRY", "bin/webpack.js")]));
        assert_eq!(overrides.tool_entry, Some(PathBuf::from("bin/webpack.js")));
    }

    #[test]
    fn empty_and_invalid_values_are_ignored() {
        let overrides = EnvOverrides::from_lookup(
            DEFAULT_PREFIX,
            lookup(&[
                ("HARNESS_TEST_ROOT", "  "),
                ("HARNESS_ECHO_OUTPUT", "sometimes"),
                ("HARNESS_EXPECT_TIMEOUT_MS", "soon"),
            ]),
        );
        assert!(overrides.is_empty());
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
