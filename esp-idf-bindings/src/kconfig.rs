//! Kconfig options of an ESP-IDF project, as found in `sdkconfig` or in the
//! `sdkconfig.json` written to the build directory.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use embuild::kconfig;
pub use embuild::kconfig::{Tristate, Value};

use crate::preprocessor::Macros;

/// Kconfig option names are stored without their `CONFIG_` prefix.
#[derive(Debug, Clone, Default)]
pub struct Kconfig {
    options: BTreeMap<String, Value>,
}

impl Kconfig {
    const PREFIX: &'static str = "CONFIG_";

    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an `sdkconfig` (or `sdkconfig.defaults`) file, or
    /// `sdkconfig.json` if the file has a `.json` extension.
    ///
    /// Integer options are not kept; no conditional of `bindings.h` tests
    /// one.
    pub fn load(path: &Path) -> Result<Self> {
        let kconfig = if path.extension().is_some_and(|ext| ext == "json") {
            kconfig::try_from_json_file(path).map(Iterator::collect)
        } else {
            kconfig::try_from_config_file(path).map(Iterator::collect)
        };

        kconfig.with_context(|| format!("Failed to read {}", path.display()))
    }

    /// `bool` options enabled without an `sdkconfig`.
    pub fn enabled<S: AsRef<str>>(keys: impl IntoIterator<Item = S>) -> Self {
        keys.into_iter()
            .map(|key| (key, Value::Tristate(Tristate::True)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key.strip_prefix(Self::PREFIX).unwrap_or(key))
    }

    pub fn set(&mut self, key: &str, value: Value) {
        let key = key.strip_prefix(Self::PREFIX).unwrap_or(key);
        self.options.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.options
            .remove(key.strip_prefix(Self::PREFIX).unwrap_or(key))
    }

    /// Enables a `bool` option.
    pub fn enable(&mut self, key: &str) {
        self.set(key, Value::Tristate(Tristate::True));
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        matches!(self.get(key), Some(Value::Tristate(Tristate::True)))
    }

    /// Overrides options with the ones of `other`.
    pub fn extend(&mut self, other: Kconfig) {
        self.options.extend(other.options);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.options.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// The defines of the `sdkconfig.h` ESP-IDF generates from these options.
    pub fn macros(&self) -> Macros {
        self.iter()
            .filter_map(|(key, value)| {
                c_define(value).map(|define| (format!("{}{key}", Self::PREFIX), define))
            })
            .collect()
    }

    /// `rustc` cfgs for the options.
    ///
    /// Only enabled options and string options related to the target are
    /// turned into cfgs, otherwise the `rustc` command line gets too long on
    /// some hosts.
    pub fn cfg_args(&self) -> impl Iterator<Item = String> + '_ {
        self.iter()
            .filter(|(key, value)| {
                matches!(value, Value::Tristate(Tristate::True)) || key.contains("IDF_TARGET")
            })
            .filter_map(|(key, value)| value.to_rustc_cfg("esp_idf", key))
    }
}

impl<K: AsRef<str>> FromIterator<(K, Value)> for Kconfig {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut kconfig = Self::new();
        for (key, value) in iter {
            kconfig.set(key.as_ref(), value);
        }
        kconfig
    }
}

/// The replacement text of the `sdkconfig.h` define of an option, if the
/// option is defined there at all.
fn c_define(value: &Value) -> Option<String> {
    match value {
        Value::Tristate(Tristate::True | Tristate::Module) => Some("1".to_string()),
        Value::String(s) => Some(format!("\"{}\"", s.escape_default())),
        _ => None,
    }
}
