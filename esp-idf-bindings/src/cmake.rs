//! Build information handed over by an ESP-IDF CMake project that drives
//! the cargo build, instead of the other way around.

use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};

use crate::{
    Chip,
    EspIdfComponents,
    EspIdfVersion,
    IdfConfiguration,
    cfg::{BuildArgs, CInclArgs},
    kconfig::{Kconfig, Value},
};

pub const ACTIVE_VAR: &str = "CARGO_CMAKE_BUILD_ACTIVE";
pub const INCLUDES_VAR: &str = "CARGO_CMAKE_BUILD_INCLUDES";
pub const LINK_LIBRARIES_VAR: &str = "CARGO_CMAKE_BUILD_LINK_LIBRARIES";
pub const COMPILER_VAR: &str = "CARGO_CMAKE_BUILD_COMPILER";
pub const SDKCONFIG_VAR: &str = "CARGO_CMAKE_BUILD_SDKCONFIG";
pub const ESP_IDF_VAR: &str = "CARGO_CMAKE_BUILD_ESP_IDF";

/// What the CMake project reports about its build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmakeBuildInfo {
    /// Include directories, `;`-separated.
    pub includes: String,
    /// Link libraries, `;`-separated. ESP-IDF components are `__idf_<name>`.
    pub link_libraries: String,
    pub compiler: PathBuf,
    pub sdkconfig: PathBuf,
    pub esp_idf: PathBuf,
}

impl CmakeBuildInfo {
    /// Whether the build is driven by CMake.
    pub fn is_active(lookup: impl Fn(&str) -> Option<String>) -> bool {
        lookup(ACTIVE_VAR).is_some() || lookup(INCLUDES_VAR).is_some()
    }

    pub fn from_env() -> Result<Option<Self>> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Reads the build information, or `None` when the build is not driven
    /// by CMake.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        if !Self::is_active(&lookup) {
            return Ok(None);
        }

        let var = |name: &str| match lookup(name) {
            Some(value) => Ok(value),
            None => bail!("`{name}` must be set by the CMake build"),
        };

        Ok(Some(Self {
            includes: var(INCLUDES_VAR)?,
            link_libraries: var(LINK_LIBRARIES_VAR)?,
            compiler: var(COMPILER_VAR)?.into(),
            sdkconfig: var(SDKCONFIG_VAR)?.into(),
            esp_idf: var(ESP_IDF_VAR)?.into(),
        }))
    }

    pub fn components(&self) -> EspIdfComponents {
        EspIdfComponents::from_link_libraries(&self.link_libraries)
    }

    /// `-I` arguments for every include directory.
    pub fn include_args(&self) -> impl Iterator<Item = String> + '_ {
        self.includes
            .split(';')
            .filter(|dir| !dir.is_empty())
            .map(|dir| format!("-I{dir}"))
    }

    /// The include arguments, in the form dependents read back from the
    /// `links` metadata.
    pub fn cincl_args(&self) -> CInclArgs {
        CInclArgs {
            args: self.include_args().collect::<Vec<_>>().join(" "),
        }
    }

    pub fn kconfig(&self) -> Result<Kconfig> {
        Kconfig::load(&self.sdkconfig)
    }

    /// The configuration of the CMake build: the version of its ESP-IDF
    /// checkout, the chip its sdkconfig targets, its components and Kconfig
    /// options.
    pub fn configuration(&self) -> Result<IdfConfiguration> {
        let version = EspIdfVersion::from_idf_path(&self.esp_idf)?;
        let kconfig = self.kconfig()?;

        let chip = match kconfig.get("IDF_TARGET") {
            Some(Value::String(target)) => target
                .parse::<Chip>()
                .with_context(|| format!("Unsupported IDF_TARGET `{target}`"))?,
            _ => bail!("{} does not set CONFIG_IDF_TARGET", self.sdkconfig.display()),
        };

        let mut config = IdfConfiguration::new(version, chip)
            .with_components(self.components())
            .with_kconfig(kconfig);

        if let Err(err) = config.load_soc_caps(&self.esp_idf) {
            log::warn!("Using the bundled SoC capabilities: {err:#}");
        }

        Ok(config)
    }

    /// The cfgs and include arguments of the CMake build. The CMake build
    /// links the executable itself, so there are no link arguments.
    pub fn build_args(&self) -> Result<BuildArgs> {
        Ok(BuildArgs::new(&self.configuration()?).with_cincl_args(self.cincl_args()))
    }
}
