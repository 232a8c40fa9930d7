use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::{
    IdfConfiguration,
    preprocessor::{Preprocessor, Resolution},
};

/// An aggregation header whose conditionals select the ESP-IDF APIs that
/// bindings are generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingsHeader {
    name: String,
    source: Cow<'static, str>,
}

impl BindingsHeader {
    /// The location of the bundled header, relative to the crate root.
    pub const ESP_IDF_PATH: &'static str = "include/esp-idf/bindings.h";

    /// The bundled ESP-IDF `bindings.h`.
    pub fn esp_idf() -> Self {
        Self {
            name: "bindings.h".to_string(),
            source: Cow::Borrowed(include_str!("../include/esp-idf/bindings.h")),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Ok(Self {
            name: path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            source: Cow::Owned(source),
        })
    }

    pub fn from_source(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Cow::Owned(source.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Appends an `#include` of each of `headers` (the bindings headers of
    /// extra components), so that their bindings are generated together with
    /// the ESP-IDF ones.
    pub fn with_extra_headers<P: AsRef<Path>>(mut self, headers: &[P]) -> Self {
        if headers.is_empty() {
            return self;
        }

        let mut source = self.source.into_owned();
        if !source.ends_with('\n') {
            source.push('\n');
        }

        source.push_str("\n// Extra components\n");
        for header in headers {
            // Forward slashes also work for Windows paths and need no escaping.
            let path = header.as_ref().to_string_lossy().replace('\\', "/");
            source.push_str(&format!("#include \"{path}\"\n"));
        }

        self.source = Cow::Owned(source);
        self
    }

    /// Evaluates the header's conditionals for `config`.
    ///
    /// Fails if an active `#error` is reached, which is how the header
    /// rejects unsupported ESP-IDF versions.
    pub fn resolve(&self, config: &IdfConfiguration) -> Result<Resolution> {
        let mut preprocessor = Preprocessor::new(config.macros());

        let resolution = preprocessor.process(&self.source).with_context(|| {
            format!(
                "Failed to resolve {} for ESP-IDF v{} on {}",
                self.name, config.version, config.chip
            )
        })?;

        log::debug!(
            "{} resolved to {} includes for ESP-IDF v{} on {}",
            self.name,
            resolution.includes().count(),
            config.version,
            config.chip
        );

        Ok(resolution)
    }

    /// Renders `resolution` as a header without conditionals.
    pub fn render(&self, resolution: &Resolution, config: &IdfConfiguration) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("bindings.h", include_str!("../templates/bindings.h.jinja"))?;

        let template = env.get_template("bindings.h")?;
        let rendered = template.render(context! {
            source => self.name,
            version => config.version.to_string(),
            chip => config.chip.to_string(),
            pretty_name => config.chip.pretty_name(),
            components => config.components.iter().collect::<Vec<_>>(),
            lines => resolution.items.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })?;

        Ok(rendered)
    }

    /// Resolves and renders the header for `config` into `path`.
    pub fn flatten_to(&self, config: &IdfConfiguration, path: &Path) -> Result<PathBuf> {
        let resolution = self.resolve(config)?;
        let rendered = self.render(&resolution, config)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path.to_path_buf())
    }
}
