//! Build-tool configuration composer.
//!
//! The tool's configuration is a JSON document built from a base template by
//! folding a list of [`Mutator`]s over it. Each mutator is a pure
//! `Value -> Value` transform; later mutators see the effects of earlier
//! ones, and the template itself is never modified.

use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::fixture::{Fixture, json};
use crate::session::TestEnv;

/// Extensions the tool resolves.
pub const RESOLVE_EXTENSIONS: [&str; 4] = [".ts", ".tsx", ".js", ".jsx"];

/// Source files routed through the loader under test.
pub const LOADER_TEST: &str = r"\.(tsx?|jsx?)";

/// One step of configuration composition.
pub type Mutator = Box<dyn Fn(Value) -> Value + Send + Sync>;

/// The base configuration for a session.
#[must_use]
pub fn base_config(env: &TestEnv) -> Value {
    let src = env.src_path();
    json!({
        "entry": { "index": src.join("index.ts").to_string_lossy() },
        "output": {
            "path": env.out_path().to_string_lossy(),
            "filename": "[name].js"
        },
        "resolve": { "extensions": RESOLVE_EXTENSIONS },
        "module": {
            "loaders": [
                {
                    "test": LOADER_TEST,
                    "loader": env.loader.to_string_lossy(),
                    "include": [src.to_string_lossy()],
                    "query": { "silent": true }
                }
            ]
        }
    })
}

/// Apply `mutators` in order to a copy of `base`.
pub fn compose<I>(base: &Value, mutators: I) -> Value
where
    I: IntoIterator<Item = Mutator>,
{
    mutators
        .into_iter()
        .fold(base.clone(), |config, mutator| mutator(config))
}

/// Point the `index` entry at `file` inside the source directory.
#[must_use]
pub fn entry(env: &TestEnv, file: &str) -> Mutator {
    let path = env.src_path().join(file).to_string_lossy().into_owned();
    set("/entry/index", Value::String(path))
}

/// Merge `query` into the options of the rule that uses the loader under test.
#[must_use]
pub fn query(env: &TestEnv, query: Value) -> Mutator {
    let loader = env.loader.to_string_lossy().into_owned();
    Box::new(move |mut config| {
        let rule = config
            .pointer_mut("/module/loaders")
            .and_then(Value::as_array_mut)
            .and_then(|rules| {
                rules
                    .iter_mut()
                    .find(|rule| rule.get("loader").and_then(Value::as_str) == Some(loader.as_str()))
            });

        match rule.and_then(Value::as_object_mut) {
            Some(rule) => {
                let options = rule
                    .entry("query")
                    .or_insert_with(|| Value::Object(Map::new()));
                deep_merge(options, query.clone());
            }
            None => tracing::warn!(%loader, "no rule uses the loader under test, query ignored"),
        }
        config
    })
}

/// Deep-merge `value` into the whole configuration.
#[must_use]
pub fn merge(value: Value) -> Mutator {
    Box::new(move |mut config| {
        deep_merge(&mut config, value.clone());
        config
    })
}

/// Assign `value` at a JSON pointer, creating objects along the way.
#[must_use]
pub fn set(pointer: &str, value: Value) -> Mutator {
    let tokens: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect();
    Box::new(move |mut config| {
        *slot(&mut config, &tokens) = value.clone();
        config
    })
}

fn slot<'a>(mut current: &'a mut Value, tokens: &[String]) -> &'a mut Value {
    for token in tokens {
        current = match current {
            Value::Array(items) => match token.parse::<usize>() {
                Ok(index) if index < items.len() => &mut items[index],
                _ => {
                    items.push(Value::Null);
                    let last = items.len() - 1;
                    &mut items[last]
                }
            },
            other => {
                if !other.is_object() {
                    *other = Value::Object(Map::new());
                }
                match other {
                    Value::Object(map) => map.entry(token.as_str()).or_insert(Value::Null),
                    _ => unreachable!("replaced by an object above"),
                }
            }
        };
    }
    current
}

/// Merge `source` into `target`.
///
/// Objects merge key by key, arrays merge index by index, anything else in
/// `source` replaces the value in `target`.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for (index, value) in source.into_iter().enumerate() {
                match target.get_mut(index) {
                    Some(existing) => deep_merge(existing, value),
                    None => target.push(value),
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Render the configuration as the JavaScript module the tool loads.
///
/// Rule `test` strings become regular expressions.
pub fn render_config(config: &Value) -> Result<String> {
    Ok(format!(
        "const config = {};\n\
         for (const rule of (config.module && config.module.loaders) || []) {{\n    \
             if (typeof rule.test === 'string') {{\n        \
                 rule.test = new RegExp(rule.test);\n    \
             }}\n\
         }}\n\
         module.exports = config;\n",
        json(config)?
    ))
}

/// Write the configuration into the session directory.
pub fn write_config(env: &TestEnv, config: &Value) -> Result<Fixture> {
    Fixture::create(env.config_path(), render_config(config)?)
}
