//! Build configuration, read from the environment and from the
//! `[package.metadata.esp-idf-bindings]` table of crate manifests.
//!
//! Environment variables take precedence over the root crate's manifest.
//! Extra components may be declared by any crate of the dependency graph.

use std::{
    collections::BTreeMap,
    env,
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use embuild::{cargo, espidf, git};
use serde::{Deserialize, Deserializer};

use crate::{Chip, EspIdfComponents, EspIdfVersion, kconfig::Kconfig};

/// Prefix of the variables this crate owns.
pub const VAR_PREFIX: &str = "ESP_IDF_";
/// Prefix of the `ESP_IDF_GLOB_*` variables, which are consumed by the
/// ESP-IDF build itself.
pub const GLOB_VAR_PREFIX: &str = "ESP_IDF_GLOB";
/// Key of the manifest metadata table.
pub const METADATA_KEY: &str = "esp-idf-bindings";

pub const DEFAULT_SDKCONFIG: &str = "sdkconfig";
pub const DEFAULT_SDKCONFIG_DEFAULTS: &str = "sdkconfig.defaults";
pub const DEFAULT_REPOSITORY: &str = "https://github.com/espressif/esp-idf.git";

/// Subdirectory of the install directory the ESP-IDF tools go to.
pub const TOOLS_DIR_NAME: &str = "espressif";

const TOOLS_INSTALL_DIR_VAR: &str = "ESP_IDF_TOOLS_INSTALL_DIR";
const SDKCONFIG_VAR: &str = "ESP_IDF_SDKCONFIG";
const SDKCONFIG_DEFAULTS_VAR: &str = "ESP_IDF_SDKCONFIG_DEFAULTS";
const MCU_VAR: &str = "MCU";
const VERSION_VAR: &str = "ESP_IDF_VERSION";
const REPOSITORY_VAR: &str = "ESP_IDF_REPOSITORY";
const IDF_PATH_VAR: &str = "IDF_PATH";
const COMPONENTS_VAR: &str = "ESP_IDF_COMPONENTS";
const COMPONENT_MANAGER_VAR: &str = "ESP_IDF_COMPONENT_MANAGER";

/// Every variable [`BuildConfig::from_env`] reads.
pub const ENV_VARS: &[&str] = &[
    TOOLS_INSTALL_DIR_VAR,
    SDKCONFIG_VAR,
    SDKCONFIG_DEFAULTS_VAR,
    MCU_VAR,
    VERSION_VAR,
    REPOSITORY_VAR,
    IDF_PATH_VAR,
    COMPONENTS_VAR,
    COMPONENT_MANAGER_VAR,
];

const TRUE_VALUES: &[&str] = &["true", "y", "yes", "on"];
const FALSE_VALUES: &[&str] = &["false", "n", "no", "off"];

/// The ESP-IDF version a tag or release branch refers to, e.g. `v5.1.2` or
/// `release/v5.1`.
pub fn release_version(git_ref: &git::Ref) -> Option<EspIdfVersion> {
    match git_ref {
        git::Ref::Tag(name) | git::Ref::Branch(name) => name.parse().ok(),
        git::Ref::Commit(_) => None,
    }
}

/// Where the ESP-IDF tools should be installed, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum InstallDirLocation {
    Global,
    Workspace,
    Out,
    FromEnv,
    Custom(PathBuf),
}

impl InstallDirLocation {
    /// Resolves the location against the workspace and `OUT_DIR`. Relative
    /// custom directories are relative to the workspace.
    pub fn resolve(&self, workspace_dir: &Path, out_dir: &Path) -> InstallDir {
        match self {
            InstallDirLocation::Global => InstallDir::Global,
            InstallDirLocation::Workspace => {
                InstallDir::Workspace(workspace_dir.join(".embuild").join(TOOLS_DIR_NAME))
            }
            InstallDirLocation::Out => InstallDir::Out(out_dir.join(TOOLS_DIR_NAME)),
            InstallDirLocation::FromEnv => InstallDir::FromEnv,
            InstallDirLocation::Custom(dir) => InstallDir::Custom(workspace_dir.join(dir)),
        }
    }
}

impl FromStr for InstallDirLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        let location = match s.to_lowercase().as_str() {
            "global" => InstallDirLocation::Global,
            "workspace" => InstallDirLocation::Workspace,
            "out" => InstallDirLocation::Out,
            "fromenv" => InstallDirLocation::FromEnv,
            lower if lower.starts_with("custom:") => {
                InstallDirLocation::Custom(PathBuf::from(&s["custom:".len()..]))
            }
            _ => bail!(
                "Invalid installation directory format. \
                 Should be one of `global`, `workspace`, `out`, `fromenv` or `custom:<dir>`."
            ),
        };

        Ok(location)
    }
}

impl TryFrom<String> for InstallDirLocation {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A resolved ESP-IDF tools install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDir {
    /// `~/.espressif`
    Global,
    Workspace(PathBuf),
    Out(PathBuf),
    Custom(PathBuf),
    /// Tools are already installed and on the `PATH`.
    FromEnv,
}

impl InstallDir {
    pub fn is_from_env(&self) -> bool {
        matches!(self, InstallDir::FromEnv)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            InstallDir::Global | InstallDir::FromEnv => None,
            InstallDir::Workspace(path) | InstallDir::Out(path) | InstallDir::Custom(path) => {
                Some(path)
            }
        }
    }
}

impl fmt::Display for InstallDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallDir::Global => write!(f, "global"),
            InstallDir::Workspace(path) => write!(f, "workspace ({})", path.display()),
            InstallDir::Out(path) => write!(f, "out ({})", path.display()),
            InstallDir::Custom(path) => write!(f, "custom ({})", path.display()),
            InstallDir::FromEnv => write!(f, "fromenv"),
        }
    }
}

/// A component of the ESP-IDF component registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteComponent {
    pub name: String,
    pub version: String,
    pub git: Option<String>,
    pub path: Option<String>,
    pub service_url: Option<String>,
}

/// A component outside of ESP-IDF whose bindings are generated too.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtraComponent {
    /// Directories of the component, or of several components.
    #[serde(deserialize_with = "parse::list")]
    pub component_dirs: Vec<PathBuf>,
    pub remote_component: Option<RemoteComponent>,
    /// C header to generate bindings for, relative to the manifest.
    pub bindings_header: Option<PathBuf>,
    /// Module to put the bindings in, instead of the crate root.
    pub bindings_module: Option<String>,

    #[serde(skip)]
    pub manifest_dir: PathBuf,
    #[serde(skip)]
    pub crate_name: String,
}

impl ExtraComponent {
    fn is_empty(&self) -> bool {
        self.component_dirs.is_empty()
            && self.remote_component.is_none()
            && self.bindings_header.is_none()
    }

    fn bindings_header_path(&self) -> Result<Option<PathBuf>> {
        let Some(header) = &self.bindings_header else {
            return Ok(None);
        };

        let path = self.manifest_dir.join(header);
        if !path.is_file() {
            bail!(
                "extra components C header file '{}' specified by crate '{}' does not exist",
                path.display(),
                self.crate_name
            );
        }

        Ok(Some(path))
    }
}

/// The build configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub esp_idf_tools_install_dir: Option<InstallDirLocation>,
    pub esp_idf_sdkconfig: Option<PathBuf>,
    #[serde(deserialize_with = "parse::opt_list")]
    pub esp_idf_sdkconfig_defaults: Option<Vec<PathBuf>>,
    pub mcu: Option<String>,
    /// `tag:<tag>`, `branch:<branch>` or `commit:<hash>`. Without a prefix,
    /// version numbers (`5.1`, `v5.1.2`) are tags and anything else is a
    /// branch.
    pub esp_idf_version: Option<String>,
    pub esp_idf_repository: Option<String>,
    pub idf_path: Option<PathBuf>,
    #[serde(deserialize_with = "parse::opt_list")]
    pub esp_idf_components: Option<Vec<String>>,
    #[serde(deserialize_with = "parse::toggle")]
    pub esp_idf_component_manager: Option<bool>,
    pub extra_components: Vec<ExtraComponent>,
}

#[derive(Deserialize)]
struct Manifest {
    package: Option<Package>,
}

#[derive(Deserialize)]
struct Package {
    name: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(rename = "esp-idf-bindings")]
    bindings: Option<BuildConfig>,
}

impl BuildConfig {
    /// Reads the configuration from the environment of the build script.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            env::vars_os()
                .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?))),
        )
    }

    /// Reads the configuration from `vars`. Empty values count as unset.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (name, value) in vars {
            let (name, value) = (name.as_ref(), value.as_ref().trim());

            if ENV_VARS.contains(&name) {
                if !value.is_empty() {
                    config
                        .set_var(name, value)
                        .with_context(|| format!("Invalid value of `{name}`"))?;
                }
            } else if name.starts_with(VAR_PREFIX) && !name.starts_with(GLOB_VAR_PREFIX) {
                log::warn!("Ignoring unknown variable `{name}`");
            }
        }

        Ok(config)
    }

    fn set_var(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            TOOLS_INSTALL_DIR_VAR => self.esp_idf_tools_install_dir = Some(value.parse()?),
            SDKCONFIG_VAR => self.esp_idf_sdkconfig = Some(value.into()),
            SDKCONFIG_DEFAULTS_VAR => {
                self.esp_idf_sdkconfig_defaults =
                    Some(parse::split(value, &[';']).map(PathBuf::from).collect())
            }
            MCU_VAR => self.mcu = Some(value.to_string()),
            VERSION_VAR => self.esp_idf_version = Some(value.to_string()),
            REPOSITORY_VAR => self.esp_idf_repository = Some(value.to_string()),
            IDF_PATH_VAR => self.idf_path = Some(value.into()),
            COMPONENTS_VAR => {
                self.esp_idf_components =
                    Some(parse::split(value, &[';', ',']).map(String::from).collect())
            }
            COMPONENT_MANAGER_VAR => self.esp_idf_component_manager = Some(parse::flag(value)?),
            _ => unreachable!("`{name}` is not a configuration variable"),
        }

        Ok(())
    }

    /// Applies the metadata of the root crate's manifest. Options that are
    /// already set are kept.
    pub fn with_root_manifest(self, manifest: &str, manifest_dir: &Path) -> Result<Self> {
        self.with_manifest(manifest, manifest_dir, true)
    }

    /// Adds the extra components declared in the manifest of a dependency.
    pub fn with_component_manifest(self, manifest: &str, manifest_dir: &Path) -> Result<Self> {
        self.with_manifest(manifest, manifest_dir, false)
    }

    fn with_manifest(mut self, manifest: &str, manifest_dir: &Path, root: bool) -> Result<Self> {
        let manifest: Manifest = basic_toml::from_str(manifest).with_context(|| {
            format!("Failed to parse the manifest in {}", manifest_dir.display())
        })?;

        // Virtual workspace manifests have no package.
        let Some(package) = manifest.package else {
            return Ok(self);
        };
        let Some(metadata) = package.metadata.and_then(|metadata| metadata.bindings) else {
            return Ok(self);
        };

        if root {
            set_when_none(&mut self.esp_idf_tools_install_dir, metadata.esp_idf_tools_install_dir);
            set_when_none(&mut self.esp_idf_sdkconfig, metadata.esp_idf_sdkconfig);
            set_when_none(&mut self.esp_idf_sdkconfig_defaults, metadata.esp_idf_sdkconfig_defaults);
            set_when_none(&mut self.mcu, metadata.mcu);
            set_when_none(&mut self.esp_idf_version, metadata.esp_idf_version);
            set_when_none(&mut self.esp_idf_repository, metadata.esp_idf_repository);
            set_when_none(&mut self.idf_path, metadata.idf_path);
            set_when_none(&mut self.esp_idf_components, metadata.esp_idf_components);
            set_when_none(&mut self.esp_idf_component_manager, metadata.esp_idf_component_manager);
        }

        for mut component in metadata.extra_components {
            if component.is_empty() {
                log::warn!(
                    "Ignoring an empty extra component of crate '{}'",
                    package.name
                );
                continue;
            }

            component.manifest_dir = manifest_dir.to_path_buf();
            component.crate_name = package.name.clone();
            self.extra_components.push(component);
        }

        Ok(self)
    }

    pub fn esp_idf_version(&self) -> git::Ref {
        match self.esp_idf_version.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => espidf::parse_esp_idf_git_ref(version),
            _ => espidf::parse_esp_idf_git_ref(&format!("v{}", EspIdfVersion::DEFAULT)),
        }
    }

    pub fn esp_idf_repository(&self) -> &str {
        self.esp_idf_repository.as_deref().unwrap_or(DEFAULT_REPOSITORY)
    }

    pub fn esp_idf_sdkconfig(&self) -> PathBuf {
        self.esp_idf_sdkconfig
            .clone()
            .unwrap_or_else(|| DEFAULT_SDKCONFIG.into())
    }

    pub fn esp_idf_sdkconfig_defaults(&self) -> Vec<PathBuf> {
        self.esp_idf_sdkconfig_defaults
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_SDKCONFIG_DEFAULTS.into()])
    }

    /// The install directory of the ESP-IDF tools, and whether it is the
    /// default one rather than a configured one.
    pub fn esp_idf_tools_install_dir(&self, workspace_dir: &Path, out_dir: &Path) -> (InstallDir, bool) {
        match &self.esp_idf_tools_install_dir {
            Some(location) => (location.resolve(workspace_dir, out_dir), false),
            None => (InstallDirLocation::Workspace.resolve(workspace_dir, out_dir), true),
        }
    }

    /// `"1"` or `"0"`, as the ESP-IDF build expects `IDF_COMPONENT_MANAGER`.
    pub fn idf_component_manager(&self) -> &'static str {
        match self.esp_idf_component_manager {
            Some(true) | None => "1",
            Some(false) => "0",
        }
    }

    /// The components bindings are generated for. All of them, unless
    /// restricted with `ESP_IDF_COMPONENTS`.
    pub fn components(&self) -> EspIdfComponents {
        match &self.esp_idf_components {
            Some(components) => EspIdfComponents::from_enabled(components),
            None => EspIdfComponents::all(),
        }
    }

    /// The chip for the Rust target `triple`, honoring `MCU`.
    pub fn chip(&self, triple: &str) -> Result<Chip> {
        Chip::select(triple, self.mcu.as_deref())
    }

    /// The Kconfig options of the project in `root`.
    ///
    /// A generated `sdkconfig` wins. Otherwise the `sdkconfig.defaults` files
    /// are merged, each followed by its profile and chip specific variants.
    pub fn kconfig(&self, root: &Path, profile: &str, chip: Chip) -> Result<Kconfig> {
        let chip = chip.to_string();

        let sdkconfig = root.join(self.esp_idf_sdkconfig());
        if let Some(path) = list_specific_sdkconfigs(&sdkconfig, profile, &chip).first() {
            log::debug!("Using {}", path.display());
            return Kconfig::load(path);
        }

        let mut kconfig = Kconfig::new();
        for defaults in self.esp_idf_sdkconfig_defaults() {
            for path in list_specific_sdkconfigs(&root.join(defaults), profile, &chip)
                .iter()
                .rev()
            {
                log::debug!("Merging {}", path.display());
                kconfig.extend(Kconfig::load(path)?);
            }
        }

        Ok(kconfig)
    }

    /// The component directories of all extra components.
    ///
    /// A directory without a `CMakeLists.txt` is a directory of components:
    /// each of its non-hidden subdirectories with a `CMakeLists.txt` is one.
    pub fn extra_component_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();

        for component in &self.extra_components {
            for dir in &component.component_dirs {
                let dir = component.manifest_dir.join(dir);
                if !dir.is_dir() {
                    bail!(
                        "extra component dir '{}' specified by crate '{}' does not exist",
                        dir.display(),
                        component.crate_name
                    );
                }

                if dir.join("CMakeLists.txt").is_file() {
                    dirs.push(dir);
                    continue;
                }

                let mut entries = fs::read_dir(&dir)?
                    .map(|entry| entry.map(|entry| entry.path()))
                    .collect::<Result<Vec<_>, _>>()?;
                entries.sort();

                dirs.extend(entries.into_iter().filter(|path| {
                    let hidden = path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with('.'));

                    !hidden && path.join("CMakeLists.txt").is_file()
                }));
            }
        }

        Ok(dirs)
    }

    /// The `idf_component.yml` manifest listing the remote components, if
    /// there are any.
    pub fn generate_idf_component_yml(&self) -> Option<String> {
        let remote = self
            .extra_components
            .iter()
            .filter_map(|component| component.remote_component.as_ref())
            .collect::<Vec<_>>();

        if remote.is_empty() {
            return None;
        }

        let mut yml = String::from("dependencies:\n");
        for component in remote {
            yml.push_str(&format!("  {}:\n", component.name));
            yml.push_str(&format!("    version: '{}'\n", component.version));

            for (key, value) in [
                ("git", &component.git),
                ("path", &component.path),
                ("service_url", &component.service_url),
            ] {
                if let Some(value) = value {
                    yml.push_str(&format!("    {key}: '{value}'\n"));
                }
            }
        }

        Some(yml)
    }

    /// Bindings headers of the extra components that are generated together
    /// with the ESP-IDF bindings.
    pub fn combined_bindings_headers(&self) -> Result<Vec<PathBuf>> {
        let mut headers = Vec::new();

        for component in &self.extra_components {
            if component.bindings_module.is_some() {
                continue;
            }

            headers.extend(component.bindings_header_path()?);
        }

        Ok(headers)
    }

    /// Bindings headers of the extra components that have a module of their
    /// own, grouped by module.
    pub fn module_bindings_headers(&self) -> Result<BTreeMap<String, Vec<PathBuf>>> {
        let mut modules = BTreeMap::<String, Vec<PathBuf>>::new();

        for component in &self.extra_components {
            let Some(module) = &component.bindings_module else {
                continue;
            };

            validate_module_name(module, component)?;

            if let Some(header) = component.bindings_header_path()? {
                modules.entry(module.clone()).or_default().push(header);
            }
        }

        Ok(modules)
    }
}

/// Reruns the build script when any configuration variable changes.
pub fn track_env_vars() {
    for var in ENV_VARS {
        cargo::track_env_var(var);
    }
}

/// The variants of the `sdkconfig` file at `path` that exist, most specific
/// first: `<file>.<profile>.<chip>`, `<file>.<chip>`, `<file>.<profile>`,
/// then `<file>` itself.
pub fn list_specific_sdkconfigs(path: &Path, profile: &str, chip: &str) -> Vec<PathBuf> {
    let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return Vec::new();
    };

    [
        format!("{file_name}.{profile}.{chip}"),
        format!("{file_name}.{chip}"),
        format!("{file_name}.{profile}"),
        file_name,
    ]
    .into_iter()
    .map(|name| path.with_file_name(name))
    .filter(|path| path.is_file())
    .collect()
}

/// `sdkconfig.defaults` content selecting the C compiler optimization that
/// matches the cargo profile (`OPT_LEVEL` and `DEBUG`).
pub fn optimization_sdkconfig(opt_level: &str, debug: &str) -> Result<String> {
    const OPTIONS: [&str; 4] = [
        "CONFIG_COMPILER_OPTIMIZATION_NONE",
        "CONFIG_COMPILER_OPTIMIZATION_DEFAULT",
        "CONFIG_COMPILER_OPTIMIZATION_PERF",
        "CONFIG_COMPILER_OPTIMIZATION_SIZE",
    ];

    let selected = match (opt_level, debug) {
        ("s" | "z", _) => 3,
        ("1", _) | (_, "2" | "true") => 1,
        ("0", _) => 0,
        ("2" | "3", _) => 2,
        _ => bail!("Invalid optimization level `{opt_level}` (debug `{debug}`)"),
    };

    Ok(OPTIONS
        .iter()
        .enumerate()
        .map(|(index, option)| format!("{option}={}\n", if index == selected { 'y' } else { 'n' }))
        .collect())
}

/// Extra component modules become Rust modules.
pub fn validate_module_name(name: &str, component: &ExtraComponent) -> Result<()> {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        bail!(
            "extra component module name specified by crate '{}' cannot be empty",
            component.crate_name
        );
    };

    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!(
            "extra component module name '{name}' specified by crate '{}' can only contain \
             ASCII alphanumeric or `_` characters and must be a valid Rust module name",
            component.crate_name
        );
    }

    Ok(())
}

fn set_when_none<T>(target: &mut Option<T>, value: Option<T>) {
    if target.is_none() {
        *target = value;
    }
}

mod parse {
    use super::*;

    pub fn split<'a>(value: &'a str, separators: &'a [char]) -> impl Iterator<Item = &'a str> {
        value
            .split(separators)
            .map(str::trim)
            .filter(|item| !item.is_empty())
    }

    pub fn flag(value: &str) -> Result<bool> {
        let lower = value.trim().to_lowercase();

        if TRUE_VALUES.contains(&lower.as_str()) {
            Ok(true)
        } else if FALSE_VALUES.contains(&lower.as_str()) {
            Ok(false)
        } else {
            bail!(
                "invalid option '{value}', should be one of {TRUE_VALUES:?} for true or \
                 {FALSE_VALUES:?} for false"
            )
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ValueOrList {
        Value(String),
        List(Vec<String>),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Toggle {
        Bool(bool),
        Value(String),
    }

    /// A list, or a single `;`-separated string.
    pub fn list<'d, T, D>(de: D) -> Result<Vec<T>, D::Error>
    where
        T: From<String>,
        D: Deserializer<'d>,
    {
        Ok(match ValueOrList::deserialize(de)? {
            ValueOrList::Value(value) => split(&value, &[';']).map(|item| T::from(item.to_string())).collect(),
            ValueOrList::List(list) => list.into_iter().map(T::from).collect(),
        })
    }

    pub fn opt_list<'d, T, D>(de: D) -> Result<Option<Vec<T>>, D::Error>
    where
        T: From<String>,
        D: Deserializer<'d>,
    {
        list(de).map(Some)
    }

    pub fn toggle<'d, D: Deserializer<'d>>(de: D) -> Result<Option<bool>, D::Error> {
        match Toggle::deserialize(de)? {
            Toggle::Bool(value) => Ok(Some(value)),
            Toggle::Value(value) => flag(&value).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> BuildConfig {
        BuildConfig::from_vars(vars.iter().copied()).unwrap()
    }

    #[test]
    fn reads_variables() {
        let config = config(&[
            ("ESP_IDF_VERSION", "v5.1.2"),
            ("ESP_IDF_SDKCONFIG_DEFAULTS", "sdkconfig.defaults; ;sdkconfig.release"),
            ("ESP_IDF_COMPONENTS", "esp_wifi,mqtt;pthread"),
            ("ESP_IDF_COMPONENT_MANAGER", "Off"),
            ("MCU", "esp32c3"),
            ("ESP_IDF_SDKCONFIG", ""),
            ("ESP_IDF_GLOB_BASE", "."),
            ("PATH", "/usr/bin"),
        ]);

        assert!(matches!(config.esp_idf_version(), git::Ref::Tag(tag) if tag == "v5.1.2"));
        assert_eq!(
            config.esp_idf_sdkconfig_defaults(),
            [PathBuf::from("sdkconfig.defaults"), PathBuf::from("sdkconfig.release")]
        );
        assert_eq!(
            config.components().iter().collect::<Vec<_>>(),
            ["esp_wifi", "mqtt", "pthread"]
        );
        assert_eq!(config.idf_component_manager(), "0");
        assert_eq!(config.mcu.as_deref(), Some("esp32c3"));
        assert_eq!(config.esp_idf_sdkconfig(), PathBuf::from("sdkconfig"));
    }

    #[test]
    fn defaults() {
        let config = BuildConfig::default();

        assert!(matches!(config.esp_idf_version(), git::Ref::Tag(tag) if tag == "v5.2.1"));
        assert_eq!(config.esp_idf_repository(), DEFAULT_REPOSITORY);
        assert_eq!(config.idf_component_manager(), "1");
        assert_eq!(config.components(), EspIdfComponents::all());
        assert_eq!(
            config.esp_idf_tools_install_dir(Path::new("/ws"), Path::new("/out")),
            (InstallDir::Workspace(PathBuf::from("/ws/.embuild/espressif")), true)
        );
    }

    #[test]
    fn invalid_values_are_errors() {
        let err = BuildConfig::from_vars([("ESP_IDF_COMPONENT_MANAGER", "maybe")]).unwrap_err();
        assert!(format!("{err:#}").contains("invalid option 'maybe'"));

        assert!(BuildConfig::from_vars([("ESP_IDF_TOOLS_INSTALL_DIR", "nowhere")]).is_err());
    }

    #[test]
    fn reads_the_process_environment() {
        temp_env::with_vars(
            [
                ("ESP_IDF_VERSION", Some("branch:release/v5.1")),
                ("ESP_IDF_TOOLS_INSTALL_DIR", Some("custom:tools")),
                ("IDF_PATH", None),
            ],
            || {
                let config = BuildConfig::from_env().unwrap();

                assert!(matches!(
                    config.esp_idf_version(),
                    git::Ref::Branch(branch) if branch == "release/v5.1"
                ));
                assert_eq!(
                    release_version(&config.esp_idf_version()),
                    Some(EspIdfVersion::new(5, 1, 0))
                );
                assert_eq!(config.idf_path, None);
                assert_eq!(
                    config.esp_idf_tools_install_dir(Path::new("/ws"), Path::new("/out")),
                    (InstallDir::Custom(PathBuf::from("/ws/tools")), false)
                );
            },
        );
    }

    #[test]
    fn parses_git_refs() {
        let git_ref = |version: &str| {
            BuildConfig {
                esp_idf_version: Some(version.to_string()),
                ..Default::default()
            }
            .esp_idf_version()
        };

        assert!(matches!(git_ref("5.1"), git::Ref::Tag(tag) if tag == "v5.1"));
        assert!(matches!(git_ref("v4.4.7"), git::Ref::Tag(tag) if tag == "v4.4.7"));
        assert!(matches!(git_ref("master"), git::Ref::Branch(branch) if branch == "master"));
        assert!(matches!(git_ref("commit:abc123"), git::Ref::Commit(hash) if hash == "abc123"));
        assert!(matches!(git_ref("  "), git::Ref::Tag(tag) if tag == "v5.2.1"));

        assert_eq!(release_version(&git_ref("tag:v5.0-rc1")), Some(EspIdfVersion::new(5, 0, 0)));
        assert_eq!(release_version(&git_ref("master")), None);
        assert_eq!(release_version(&git_ref("commit:abc123")), None);
    }

    #[test]
    fn install_dirs() {
        let ws = Path::new("/ws");
        let out = Path::new("/out");
        let resolve = |s: &str| s.parse::<InstallDirLocation>().unwrap().resolve(ws, out);

        assert_eq!(resolve("Global"), InstallDir::Global);
        assert_eq!(resolve("out"), InstallDir::Out(PathBuf::from("/out/espressif")));
        assert!(resolve("fromenv").is_from_env());
        assert_eq!(resolve("custom:/opt/Tools"), InstallDir::Custom(PathBuf::from("/opt/Tools")));
        assert_eq!(resolve("custom:/opt/Tools").to_string(), "custom (/opt/Tools)");
        assert_eq!(resolve("global").path(), None);
    }

    const MANIFEST: &str = r#"
[package]
name = "app"
version = "0.1.0"

[package.metadata.esp-idf-bindings]
esp_idf_version = "v5.1.2"
esp_idf_sdkconfig_defaults = ["sdkconfig.defaults", "sdkconfig.defaults.wifi"]
esp_idf_component_manager = false
mcu = "esp32s3"

[[package.metadata.esp-idf-bindings.extra_components]]
component_dirs = "components"
bindings_header = "src/bindings.h"

[[package.metadata.esp-idf-bindings.extra_components]]
remote_component = { name = "espressif/mdns", version = "1.2" }
bindings_header = "src/mdns.h"
bindings_module = "mdns"

[[package.metadata.esp-idf-bindings.extra_components]]
bindings_module = "nothing"
"#;

    #[test]
    fn environment_wins_over_the_manifest() {
        let config = config(&[("MCU", "esp32c3")])
            .with_root_manifest(MANIFEST, Path::new("/app"))
            .unwrap();

        assert_eq!(config.mcu.as_deref(), Some("esp32c3"));
        assert!(matches!(config.esp_idf_version(), git::Ref::Tag(tag) if tag == "v5.1.2"));
        assert_eq!(config.esp_idf_sdkconfig_defaults().len(), 2);
        assert_eq!(config.esp_idf_component_manager, Some(false));

        // The last one declares nothing.
        assert_eq!(config.extra_components.len(), 2);
        assert_eq!(config.extra_components[0].manifest_dir, PathBuf::from("/app"));
        assert_eq!(config.extra_components[0].crate_name, "app");
        assert_eq!(config.extra_components[0].component_dirs, [PathBuf::from("components")]);
    }

    #[test]
    fn dependencies_only_contribute_components() {
        let config = BuildConfig::default()
            .with_component_manifest(MANIFEST, Path::new("/dep"))
            .unwrap();

        assert_eq!(config.mcu, None);
        assert_eq!(config.extra_components.len(), 2);

        let workspace = BuildConfig::default()
            .with_root_manifest("[workspace]\nmembers = [\"a\"]\n", Path::new("/ws"))
            .unwrap();
        assert_eq!(workspace, BuildConfig::default());
    }

    #[test]
    fn generates_the_component_manifest() {
        let config = BuildConfig::default()
            .with_root_manifest(MANIFEST, Path::new("/app"))
            .unwrap();

        assert_eq!(
            config.generate_idf_component_yml().unwrap(),
            "dependencies:\n  espressif/mdns:\n    version: '1.2'\n"
        );
        assert_eq!(BuildConfig::default().generate_idf_component_yml(), None);
    }

    #[test]
    fn bindings_headers() {
        let dir = TempDir::new("app").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/bindings.h"), "").unwrap();
        fs::write(dir.path().join("src/mdns.h"), "").unwrap();

        let config = BuildConfig::default()
            .with_root_manifest(MANIFEST, dir.path())
            .unwrap();

        assert_eq!(
            config.combined_bindings_headers().unwrap(),
            [dir.path().join("src/bindings.h")]
        );

        let modules = config.module_bindings_headers().unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules["mdns"], [dir.path().join("src/mdns.h")]);

        fs::remove_file(dir.path().join("src/bindings.h")).unwrap();
        let err = config.combined_bindings_headers().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn module_names() {
        let component = ExtraComponent::default();

        assert!(validate_module_name("mdns", &component).is_ok());
        assert!(validate_module_name("_private2", &component).is_ok());
        assert!(validate_module_name("", &component).is_err());
        assert!(validate_module_name("2fast", &component).is_err());
        assert!(validate_module_name("my-module", &component).is_err());
    }

    #[test]
    fn component_dirs() {
        let dir = TempDir::new("app").unwrap();
        let single = dir.path().join("single");
        let many = dir.path().join("many");

        for path in [
            single.clone(),
            many.join("a"),
            many.join("b"),
            many.join(".hidden"),
            many.join("not_a_component"),
        ] {
            fs::create_dir_all(&path).unwrap();
        }
        for path in [&single, &many.join("a"), &many.join("b"), &many.join(".hidden")] {
            fs::write(path.join("CMakeLists.txt"), "").unwrap();
        }

        let config = BuildConfig {
            extra_components: vec![ExtraComponent {
                component_dirs: vec!["single".into(), "many".into()],
                manifest_dir: dir.path().to_path_buf(),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert_eq!(
            config.extra_component_dirs().unwrap(),
            [single, many.join("a"), many.join("b")]
        );

        let missing = BuildConfig {
            extra_components: vec![ExtraComponent {
                component_dirs: vec!["missing".into()],
                manifest_dir: dir.path().to_path_buf(),
                crate_name: "app".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(missing.extra_component_dirs().is_err());
    }

    #[test]
    fn specific_sdkconfigs() {
        let dir = TempDir::new("app").unwrap();
        for name in ["sdkconfig.defaults", "sdkconfig.defaults.esp32c3", "sdkconfig.defaults.release"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let base = dir.path().join("sdkconfig.defaults");
        assert_eq!(
            list_specific_sdkconfigs(&base, "release", "esp32c3"),
            [
                dir.path().join("sdkconfig.defaults.esp32c3"),
                dir.path().join("sdkconfig.defaults.release"),
                base.clone(),
            ]
        );
        assert_eq!(list_specific_sdkconfigs(&base, "debug", "esp32"), [base]);
    }

    #[test]
    fn merges_sdkconfig_defaults() {
        let dir = TempDir::new("app").unwrap();
        fs::write(
            dir.path().join("sdkconfig.defaults"),
            "CONFIG_BT_ENABLED=y\nCONFIG_LWIP_LOCAL_HOSTNAME=\"espressif\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sdkconfig.defaults.esp32c3"),
            "CONFIG_LWIP_LOCAL_HOSTNAME=\"c3\"\n",
        )
        .unwrap();

        let config = BuildConfig::default();
        let kconfig = config.kconfig(dir.path(), "debug", Chip::Esp32c3).unwrap();
        assert!(kconfig.is_enabled("BT_ENABLED"));
        assert_eq!(kconfig.macros().value_of("CONFIG_LWIP_LOCAL_HOSTNAME"), Some("\"c3\""));

        // A generated sdkconfig replaces the defaults.
        fs::write(dir.path().join("sdkconfig"), "CONFIG_FREERTOS_UNICORE=y\n").unwrap();
        let kconfig = config.kconfig(dir.path(), "debug", Chip::Esp32c3).unwrap();
        assert!(!kconfig.is_enabled("BT_ENABLED"));
        assert!(kconfig.is_enabled("FREERTOS_UNICORE"));
    }

    #[test]
    fn optimization_follows_the_profile() {
        assert_eq!(
            optimization_sdkconfig("z", "false").unwrap(),
            "CONFIG_COMPILER_OPTIMIZATION_NONE=n\n\
             CONFIG_COMPILER_OPTIMIZATION_DEFAULT=n\n\
             CONFIG_COMPILER_OPTIMIZATION_PERF=n\n\
             CONFIG_COMPILER_OPTIMIZATION_SIZE=y\n"
        );
        assert!(optimization_sdkconfig("3", "true").unwrap().contains("DEFAULT=y"));
        assert!(optimization_sdkconfig("0", "false").unwrap().contains("NONE=y"));
        assert!(optimization_sdkconfig("fast", "false").is_err());
    }

    #[test]
    fn tracks_every_variable_it_reads() {
        track_env_vars();

        let vars = ENV_VARS.iter().map(|var| (*var, "1")).collect::<Vec<_>>();
        let err = BuildConfig::from_vars(vars).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid value of `ESP_IDF_TOOLS_INSTALL_DIR`"));
    }
}
