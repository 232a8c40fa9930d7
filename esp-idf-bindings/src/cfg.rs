//! `rustc` cfgs derived from an ESP-IDF configuration, their propagation to
//! dependent crates, and the bookkeeping needed to declare them with
//! `rustc-check-cfg`.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    fs,
    io::Write,
    path::Path,
};

use anyhow::{Context, Result, bail};

pub use embuild::build::{CInclArgs, CfgArgs, LinkArgs};

use strum::IntoEnumIterator;

use crate::{Chip, EspIdfVersion, IdfConfiguration};

/// What the build script of the bindings hands over to cargo and, through
/// `links` metadata, to the build scripts of dependent crates.
pub struct BuildArgs {
    pub cfg_args: CfgArgs,
    /// Include arguments, so that other `-sys` crates can compile against
    /// the ESP-IDF headers.
    pub cincl_args: Option<CInclArgs>,
    /// Only known when cargo drives the final link.
    pub link_args: Option<LinkArgs>,
}

impl BuildArgs {
    pub fn new(config: &IdfConfiguration) -> Self {
        Self {
            cfg_args: CfgArgs {
                args: config.cfg_args().collect(),
            },
            cincl_args: None,
            link_args: None,
        }
    }

    pub fn with_cincl_args(mut self, cincl_args: CInclArgs) -> Self {
        self.cincl_args = Some(cincl_args);
        self
    }

    pub fn with_link_args(mut self, link_args: LinkArgs) -> Self {
        self.link_args = Some(link_args);
        self
    }

    /// Applies the cfgs to the current crate and propagates everything to
    /// dependents. Only meaningful from a build script.
    pub fn output(&self) {
        self.cfg_args.propagate();
        self.cfg_args.output();

        if let Some(cincl_args) = &self.cincl_args {
            cincl_args.propagate();
        }

        if let Some(link_args) = &self.link_args {
            link_args.propagate();
        }
    }
}

/// Applies the cfgs and link arguments propagated by the crate whose `links`
/// key is `lib_name` to the current crate.
pub fn output_propagated(lib_name: &str) -> Result<()> {
    CfgArgs::output_propagated(lib_name)?;
    LinkArgs::output_propagated(lib_name)?;
    Ok(())
}

/// Every cfg that any supported configuration can produce, with the values
/// seen for each.
///
/// Stored one cfg per line, sorted, as either `name` or `name=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgCollection(BTreeMap<String, BTreeSet<String>>);

impl CfgCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cfgs set by `rustc` itself for the targets the bindings are built for.
    pub fn with_builtin(mut self) -> Self {
        self.add_cfg_args(["espidf_time64"]);
        self
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut collection = Self::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((name, value)) = line.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    bail!("line {}: missing cfg name", index + 1);
                }
                collection.insert(name, Some(value.trim().trim_matches('"')));
            } else {
                collection.insert(line, None);
            }
        }

        Ok(collection)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn insert(&mut self, name: &str, value: Option<&str>) {
        let values = self.0.entry(name.to_string()).or_default();
        if let Some(value) = value {
            values.insert(value.to_string());
        }
    }

    pub fn add_cfg_args<S: AsRef<str>>(&mut self, args: impl IntoIterator<Item = S>) {
        for arg in args {
            match arg.as_ref().split_once('=') {
                Some((name, value)) => self.insert(name, Some(value.trim_matches('"'))),
                None => self.insert(arg.as_ref(), None),
            }
        }
    }

    /// Adds the cfgs of every chip for each supported version in `versions`.
    /// Unsupported versions are skipped.
    pub fn add_configurations(&mut self, versions: &[EspIdfVersion]) {
        for version in versions.iter().filter(|version| version.is_supported()) {
            for chip in Chip::iter() {
                let config = IdfConfiguration::new(*version, chip);
                self.add_cfg_args(config.cfg_args());
                self.add_cfg_args([format!("esp_idf_idf_target=\"{chip}\"")]);
            }
        }
    }

    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Emits a `cargo:rustc-check-cfg` line per cfg.
    pub fn emit_check_cfg(&self, mut writer: impl Write) -> Result<()> {
        for (name, values) in &self.0 {
            if values.is_empty() {
                writeln!(writer, "cargo:rustc-check-cfg=cfg({name})")?;
            } else {
                let values = values
                    .iter()
                    .map(|value| format!("\"{value}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(writer, "cargo:rustc-check-cfg=cfg({name}, values({values}))")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for CfgCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, values) in &self.0 {
            if values.is_empty() {
                writeln!(f, "{name}")?;
            }
            for value in values {
                writeln!(f, "{name}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    use super::*;
    use crate::EspIdfComponents;

    #[test]
    fn build_args_of_a_configuration() {
        let config = IdfConfiguration::new(EspIdfVersion::new(5, 1, 2), Chip::Esp32c3)
            .with_components(EspIdfComponents::from_enabled(["mqtt"]));

        let args = BuildArgs::new(&config)
            .with_cincl_args(CInclArgs {
                args: "-I/idf/components/mqtt/include".to_string(),
            })
            .with_link_args(LinkArgs {
                args: vec!["-Wl,--gc-sections".to_string()],
            });

        assert_eq!(args.cfg_args.args, config.cfg_args().collect::<Vec<_>>());
        assert!(args.cfg_args.args.contains(&"esp_idf_comp_mqtt_enabled".to_string()));
        assert!(args.cfg_args.args.contains(&"esp32c3".to_string()));
        assert_eq!(
            args.cincl_args.map(|cincl| cincl.args).as_deref(),
            Some("-I/idf/components/mqtt/include")
        );
        assert_eq!(
            args.link_args.map(|link| link.args),
            Some(vec!["-Wl,--gc-sections".to_string()])
        );
    }

    #[test]
    fn collection_round_trips_through_a_file() {
        let mut collection = CfgCollection::new().with_builtin();
        collection.add_cfg_args(["esp_idf_version=\"5.1\"", "esp32", "esp_idf_version=\"4.4\""]);
        collection.add_cfg_args(["esp32", "esp_idf_comp_mqtt_enabled"]);

        assert_eq!(
            collection.to_string(),
            "esp32\n\
             esp_idf_comp_mqtt_enabled\n\
             esp_idf_version=4.4\n\
             esp_idf_version=5.1\n\
             espidf_time64\n"
        );

        let dir = TempDir::new("cfgs").unwrap();
        let path = dir.path().join("collected_cfgs.txt");
        collection.save(&path).unwrap();

        assert_eq!(CfgCollection::load(&path).unwrap(), collection);
    }

    #[test]
    fn collected_configurations_survive_a_reload() {
        let mut collection = CfgCollection::new().with_builtin();
        collection.add_configurations(&[
            EspIdfVersion::new(4, 3, 1),
            EspIdfVersion::new(4, 4, 8),
            EspIdfVersion::new(5, 1, 2),
        ]);

        assert_eq!(
            collection.values("esp_idf_version").unwrap().iter().collect::<Vec<_>>(),
            ["4.4", "5.1"]
        );
        assert!(collection.values("esp32c3").is_some());
        assert!(collection.values("esp_idf_comp_mqtt_enabled").is_some());
        assert!(
            collection
                .values("esp_idf_idf_target")
                .unwrap()
                .contains("esp32s3")
        );

        let dir = TempDir::new("cfgs").unwrap();
        let path = dir.path().join("collected_cfgs.txt");
        collection.save(&path).unwrap();

        let reloaded = CfgCollection::load(&path).unwrap();
        assert_eq!(reloaded, collection);

        let mut check_cfg = Vec::new();
        reloaded.emit_check_cfg(&mut check_cfg).unwrap();
        assert!(
            String::from_utf8(check_cfg)
                .unwrap()
                .contains("cargo:rustc-check-cfg=cfg(esp_idf_version, values(\"4.4\", \"5.1\"))\n")
        );
    }

    #[test]
    fn accepts_quoted_and_bare_values() {
        let collection = CfgCollection::parse("esp_idf_version=5.1\nesp_idf_version=\"4.4\"\n\nesp32\n").unwrap();

        assert_eq!(
            collection.values("esp_idf_version").unwrap().iter().collect::<Vec<_>>(),
            ["4.4", "5.1"]
        );
        assert!(collection.values("esp32").unwrap().is_empty());
        assert!(CfgCollection::parse("=1\n").is_err());
    }

    #[test]
    fn emits_check_cfg_lines() {
        let mut collection = CfgCollection::new();
        collection.add_cfg_args(["esp_idf_version=\"4.4\"", "esp_idf_version=\"5.1\"", "esp32"]);

        let mut out = Vec::new();
        collection.emit_check_cfg(&mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "cargo:rustc-check-cfg=cfg(esp32)\n\
             cargo:rustc-check-cfg=cfg(esp_idf_version, values(\"4.4\", \"5.1\"))\n"
        );
    }
}
