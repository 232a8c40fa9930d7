//! Resolving `bindings.h` for many versions and chips at once, optionally
//! checking that every selected header exists in an ESP-IDF checkout.

use std::{
    collections::BTreeSet,
    fmt,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use strum::IntoEnumIterator;

use crate::{BindingsHeader, Chip, EspIdfVersion, IdfConfiguration, preprocessor};

/// The headers of an ESP-IDF checkout, as include paths.
///
/// Every header below a `components/` subdirectory is registered under all
/// of its path suffixes, since include directories are nested at different
/// depths in different components.
#[derive(Debug, Clone, Default)]
pub struct IdfTree {
    root: PathBuf,
    headers: BTreeSet<String>,
}

impl IdfTree {
    pub fn open(root: &Path) -> Result<Self> {
        let components = root.join("components");
        if !components.is_dir() {
            bail!("{} is not an ESP-IDF checkout", root.display());
        }

        let mut tree = Self {
            root: root.to_path_buf(),
            headers: BTreeSet::new(),
        };
        tree.scan(&components, &components)?;

        log::debug!("Found {} include paths in {}", tree.headers.len(), root.display());

        Ok(tree)
    }

    fn scan(&mut self, base: &Path, dir: &Path) -> Result<()> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                self.scan(base, &path)?;
            } else if path.extension().is_some_and(|ext| ext == "h") {
                let Ok(relative) = path.strip_prefix(base) else {
                    continue;
                };

                let parts = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>();

                for start in 0..parts.len() {
                    self.headers.insert(parts[start..].join("/"));
                }
            }
        }

        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, include: &str) -> bool {
        self.headers.contains(include)
    }

    pub fn version(&self) -> Result<EspIdfVersion> {
        EspIdfVersion::from_idf_path(&self.root)
    }
}

/// How `bindings.h` resolved for one version and chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The header's `#error` guard fired.
    Rejected(String),
    Resolved {
        headers: usize,
        /// Selected headers that do not exist in the checkout.
        missing: Vec<String>,
    },
    /// Anything else went wrong.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub version: EspIdfVersion,
    pub chip: Chip,
    pub outcome: Outcome,
}

impl Entry {
    /// Why this entry is a failure, if it is one. Supported versions must
    /// resolve to existing headers. Unsupported ones must be rejected.
    pub fn failure(&self) -> Option<String> {
        let supported = self.version.ensure_supported().is_ok();

        match &self.outcome {
            Outcome::Rejected(message) if supported => Some(format!("rejected: {message}")),
            Outcome::Resolved { .. } if !supported => {
                Some("resolved, but the version guard should have fired".to_string())
            }
            Outcome::Resolved { missing, .. } if !missing.is_empty() => {
                Some(format!("missing headers: {}", missing.join(", ")))
            }
            Outcome::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }
}

/// The versions and chips to resolve `bindings.h` for.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub versions: Vec<EspIdfVersion>,
    pub chips: Vec<Chip>,
    /// Kconfig and components shared by all entries.
    pub template: IdfConfiguration,
}

impl Matrix {
    pub fn new(versions: Vec<EspIdfVersion>) -> Self {
        Self {
            versions,
            chips: Chip::iter().collect(),
            template: IdfConfiguration::new(EspIdfVersion::DEFAULT, Chip::Esp32),
        }
    }

    pub fn with_chips(mut self, chips: Vec<Chip>) -> Self {
        self.chips = chips;
        self
    }

    pub fn with_template(mut self, template: IdfConfiguration) -> Self {
        self.template = template;
        self
    }

    pub fn run(&self, header: &BindingsHeader, tree: Option<&IdfTree>) -> MatrixReport {
        let mut entries = Vec::new();

        for version in &self.versions {
            for chip in &self.chips {
                let mut config = self.template.for_chip(*chip).for_version(*version);
                if let Some(tree) = tree {
                    if let Err(err) = config.load_soc_caps(tree.root()) {
                        log::warn!("Using the bundled SoC capabilities of {chip}: {err:#}");
                    }
                }

                let outcome = match header.resolve(&config) {
                    Ok(resolution) => {
                        let missing = tree
                            .map(|tree| {
                                resolution
                                    .includes()
                                    .filter(|include| !tree.contains(&include.path))
                                    .map(|include| include.path.clone())
                                    .collect()
                            })
                            .unwrap_or_default();

                        Outcome::Resolved {
                            headers: resolution.includes().count(),
                            missing,
                        }
                    }
                    Err(err) => match err.downcast_ref::<preprocessor::Error>() {
                        Some(preprocessor::Error::Directive { message, .. }) => {
                            Outcome::Rejected(message.clone())
                        }
                        _ => Outcome::Failed(format!("{err:#}")),
                    },
                };

                log::debug!("v{version} {chip}: {outcome:?}");

                entries.push(Entry {
                    version: *version,
                    chip: *chip,
                    outcome,
                });
            }
        }

        MatrixReport { entries }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixReport {
    pub entries: Vec<Entry>,
}

impl MatrixReport {
    pub fn failures(&self) -> impl Iterator<Item = (&Entry, String)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.failure().map(|failure| (entry, failure)))
    }

    pub fn is_ok(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let status = match &entry.outcome {
                Outcome::Rejected(_) => "rejected".to_string(),
                Outcome::Resolved { headers, missing } if missing.is_empty() => {
                    format!("{headers} headers")
                }
                Outcome::Resolved { headers, missing } => {
                    format!("{headers} headers, {} missing", missing.len())
                }
                Outcome::Failed(_) => "failed".to_string(),
            };

            let verdict = if entry.failure().is_some() { "FAIL" } else { "ok" };

            writeln!(
                f,
                "{:<10} {:<8} {:<24} {verdict}",
                entry.version.to_string(),
                entry.chip.to_string(),
                status
            )?;
        }

        Ok(())
    }
}
