use core::{fmt, str::FromStr};
use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow, bail, ensure};

use crate::preprocessor::{self, Macros};

/// An ESP-IDF release version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize, serde::Serialize,
)]
pub struct EspIdfVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EspIdfVersion {
    /// The oldest release the bindings header accepts.
    pub const MIN_SUPPORTED: Self = Self::new(4, 3, 2);

    /// The release used when nothing else is configured.
    pub const DEFAULT: Self = Self::new(5, 2, 1);

    /// Location of the version header inside an ESP-IDF checkout.
    pub const VERSION_HEADER: &'static str = "components/esp_common/include/esp_idf_version.h";

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self >= Self::MIN_SUPPORTED
    }

    /// Fails for releases older than [`Self::MIN_SUPPORTED`], with the same
    /// message the `#error` guard of `bindings.h` produces.
    pub fn ensure_supported(&self) -> Result<()> {
        ensure!(
            self.is_supported(),
            "Only ESP-IDF versions >= V{} are currently supported (found V{self})",
            Self::MIN_SUPPORTED
        );

        Ok(())
    }

    /// Reads the version from the `ESP_IDF_VERSION_*` defines of
    /// `esp_idf_version.h`.
    pub fn from_version_header(text: &str) -> Result<Self> {
        let defines = preprocessor::collect_defines(text, &Macros::new())?;

        let grab = |name: &str| -> Result<u32> {
            let value = defines
                .value_of(name)
                .ok_or_else(|| anyhow!("`{name}` is not defined"))?;

            parse_c_integer(value).with_context(|| format!("Invalid value for `{name}`"))
        };

        Ok(Self::new(
            grab("ESP_IDF_VERSION_MAJOR")?,
            grab("ESP_IDF_VERSION_MINOR")?,
            grab("ESP_IDF_VERSION_PATCH")?,
        ))
    }

    /// Reads the version of the ESP-IDF checkout at `idf_path`.
    pub fn from_idf_path(idf_path: &Path) -> Result<Self> {
        let header = idf_path.join(Self::VERSION_HEADER);
        let text = fs::read_to_string(&header)
            .with_context(|| format!("Failed to read {}", header.display()))?;

        Self::from_version_header(&text)
    }

    /// Reads the version from the `ESP_IDF_VERSION_*` constants of a
    /// generated Rust bindings file.
    pub fn from_bindings(text: &str) -> Result<Self> {
        Ok(Self::new(
            grab_const(text, "ESP_IDF_VERSION_MAJOR")?,
            grab_const(text, "ESP_IDF_VERSION_MINOR")?,
            grab_const(text, "ESP_IDF_VERSION_PATCH")?,
        ))
    }

    /// Picks the release versions out of `git ls-remote --tags` output.
    ///
    /// Pre-releases and peeled tag entries are skipped. The result is sorted
    /// and free of duplicates.
    pub fn from_git_tags(output: &str) -> Vec<Self> {
        let mut versions = output
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter_map(|reference| reference.strip_prefix("refs/tags/"))
            .filter(|tag| !tag.ends_with("^{}") && !tag.contains('-'))
            .filter_map(|tag| tag.parse::<Self>().ok())
            .collect::<Vec<_>>();

        versions.sort();
        versions.dedup();
        versions
    }

    /// `rustc` cfgs describing this version.
    pub fn cfg_args(&self) -> impl Iterator<Item = String> {
        [
            format!("esp_idf_version_full=\"{self}\""),
            format!("esp_idf_version=\"{}.{}\"", self.major, self.minor),
            format!("esp_idf_version_major=\"{}\"", self.major),
            format!("esp_idf_version_minor=\"{}\"", self.minor),
            format!("esp_idf_version_patch=\"{}\"", self.patch),
        ]
        .into_iter()
    }

    /// The defines `esp_idf_version.h` contributes.
    pub fn macros(&self) -> Macros {
        let mut macros = Macros::new();
        macros.define_object("ESP_IDF_VERSION_MAJOR", self.major);
        macros.define_object("ESP_IDF_VERSION_MINOR", self.minor);
        macros.define_object("ESP_IDF_VERSION_PATCH", self.patch);
        macros
    }
}

impl Default for EspIdfVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for EspIdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for EspIdfVersion {
    type Err = anyhow::Error;

    /// Accepts `5`, `5.1`, `5.1.2`, optionally prefixed with `v` or
    /// `release/v` and followed by a pre-release suffix (`v5.1-rc1`).
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix("release/").unwrap_or(trimmed);
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let trimmed = trimmed.split_once('-').map_or(trimmed, |(version, _)| version);

        let parts = trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid ESP-IDF version `{s}`"))?;

        match parts.as_slice() {
            [major] => Ok(Self::new(*major, 0, 0)),
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => bail!("Invalid ESP-IDF version `{s}`"),
        }
    }
}

fn grab_const(text: &str, name: &str) -> Result<u32> {
    let re = regex::Regex::new(&format!(r"\s+const\s+{name}\s*:\s*u32\s*=\s*(\S+)\s*;"))?;

    let value = re
        .captures(text)
        .ok_or_else(|| anyhow!("Failed to capture constant {name}"))?
        .get(1)
        .ok_or_else(|| anyhow!("Failed to capture the value of constant {name}"))?
        .as_str();

    Ok(value.parse()?)
}

fn parse_c_integer(value: &str) -> Result<u32> {
    let value = value.trim().trim_end_matches(['u', 'U', 'l', 'L']);

    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => value.parse()?,
    };

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_version_strings() {
        assert_eq!("v5.1.2".parse::<EspIdfVersion>().unwrap(), EspIdfVersion::new(5, 1, 2));
        assert_eq!("5.1".parse::<EspIdfVersion>().unwrap(), EspIdfVersion::new(5, 1, 0));
        assert_eq!("v5.1-rc1".parse::<EspIdfVersion>().unwrap(), EspIdfVersion::new(5, 1, 0));
        assert_eq!(
            "release/v4.4".parse::<EspIdfVersion>().unwrap(),
            EspIdfVersion::new(4, 4, 0)
        );

        assert!("master".parse::<EspIdfVersion>().is_err());
        assert!("5.1.2.3".parse::<EspIdfVersion>().is_err());
    }

    #[test]
    fn versions_are_ordered_numerically() {
        assert!(EspIdfVersion::new(4, 3, 10) > EspIdfVersion::new(4, 3, 2));
        assert!(EspIdfVersion::new(5, 0, 0) > EspIdfVersion::new(4, 4, 7));
    }

    #[test]
    fn older_versions_are_not_supported() {
        assert!(EspIdfVersion::new(4, 3, 2).ensure_supported().is_ok());

        let err = EspIdfVersion::new(4, 3, 1).ensure_supported().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Only ESP-IDF versions >= V4.3.2 are currently supported (found V4.3.1)"
        );
    }

    #[test]
    fn reads_the_version_header() {
        let header = r#"
#pragma once

/** Major version number (X.x.x) */
#define ESP_IDF_VERSION_MAJOR   5
/** Minor version number (x.X.x) */
#define ESP_IDF_VERSION_MINOR   1
/** Patch version number (x.x.X) */
#define ESP_IDF_VERSION_PATCH   2

#define ESP_IDF_VERSION_VAL(major, minor, patch) ((major << 16) | (minor << 8) | (patch))
"#;

        assert_eq!(
            EspIdfVersion::from_version_header(header).unwrap(),
            EspIdfVersion::new(5, 1, 2)
        );
    }

    #[test]
    fn reads_generated_bindings() {
        let bindings = r#"
pub const ESP_IDF_VERSION_MAJOR: u32 = 4;
pub const ESP_IDF_VERSION_MINOR: u32 = 4;
pub const ESP_IDF_VERSION_PATCH: u32 = 7;
"#;

        assert_eq!(
            EspIdfVersion::from_bindings(bindings).unwrap(),
            EspIdfVersion::new(4, 4, 7)
        );
        assert!(EspIdfVersion::from_bindings("pub const X: u32 = 1;").is_err());
    }

    #[test]
    fn emits_version_cfgs() {
        let cfgs = EspIdfVersion::new(5, 1, 2).cfg_args().collect::<Vec<_>>();

        assert_eq!(
            cfgs,
            [
                "esp_idf_version_full=\"5.1.2\"",
                "esp_idf_version=\"5.1\"",
                "esp_idf_version_major=\"5\"",
                "esp_idf_version_minor=\"1\"",
                "esp_idf_version_patch=\"2\"",
            ]
        );
    }

    #[test]
    fn picks_release_tags() {
        let output = "\
1111\trefs/tags/v4.4.7
2222\trefs/tags/v4.4.7^{}
3333\trefs/tags/v5.0-beta1
4444\trefs/tags/v5.1.2
5555\trefs/tags/v5.1
";

        assert_eq!(
            EspIdfVersion::from_git_tags(output),
            [
                EspIdfVersion::new(4, 4, 7),
                EspIdfVersion::new(5, 1, 0),
                EspIdfVersion::new(5, 1, 2),
            ]
        );
    }
}
