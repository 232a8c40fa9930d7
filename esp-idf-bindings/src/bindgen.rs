//! Generating Rust bindings for the resolved `bindings.h`.
//!
//! The clang arguments and macro policy are always available. Running
//! `bindgen` itself needs the `bindgen` feature and a libclang able to parse
//! the ESP-IDF headers.

use std::path::{Path, PathBuf};

use crate::{BindingsHeader, IdfConfiguration};

/// Whether `name` is an ESP-IDF error code macro (`ESP_OK`, `ESP_FAIL`,
/// `ESP_ERR_*`). These are `esp_err_t`, so they are generated as `i32`.
pub fn is_esp_err_macro(name: &str) -> bool {
    match name.strip_prefix("ESP_") {
        Some(rest) => rest.starts_with("ERR_") || rest == "OK" || rest == "FAIL",
        None => false,
    }
}

/// Generates the bindings of a [`BindingsHeader`] for one configuration.
#[derive(Debug, Clone)]
pub struct BindingsGenerator<'a> {
    header: BindingsHeader,
    config: &'a IdfConfiguration,
    clang_args: Vec<String>,
    sysroot: Option<PathBuf>,
}

impl<'a> BindingsGenerator<'a> {
    pub fn new(header: BindingsHeader, config: &'a IdfConfiguration) -> Self {
        Self {
            header,
            config,
            clang_args: Vec::new(),
            sysroot: None,
        }
    }

    /// Extra clang arguments, typically the `-I` arguments of the ESP-IDF
    /// build.
    pub fn with_clang_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.clang_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The sysroot of the GCC toolchain, for the C library headers.
    pub fn with_sysroot(mut self, sysroot: impl Into<PathBuf>) -> Self {
        self.sysroot = Some(sysroot.into());
        self
    }

    /// Every clang argument `bindgen` is run with.
    pub fn clang_args(&self) -> Vec<String> {
        let mut args = self.config.clang_args().collect::<Vec<_>>();
        args.extend(self.clang_args.iter().cloned());

        if let Some(sysroot) = &self.sysroot {
            args.push(format!("-I{}", canon(&sysroot.join("include"))));
            args.push(format!("--sysroot={}", canon(sysroot)));
        }

        args
    }
}

// clang wants forward slashes, also on Windows.
fn canon(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

#[cfg(feature = "bindgen")]
pub use self::generate::{BindgenCallbacks, GeneratedBindings};

#[cfg(feature = "bindgen")]
mod generate {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use anyhow::{Context, Result, anyhow};
    use ::bindgen::{
        Builder,
        callbacks::{IntKind, ParseCallbacks},
    };

    use super::{BindingsGenerator, is_esp_err_macro};
    use crate::EspIdfVersion;

    #[derive(Debug)]
    pub struct BindgenCallbacks;

    impl ParseCallbacks for BindgenCallbacks {
        fn int_macro(&self, name: &str, _value: i64) -> Option<IntKind> {
            is_esp_err_macro(name).then_some(IntKind::I32)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GeneratedBindings {
        /// The flattened header `bindgen` was run on.
        pub header_file: PathBuf,
        pub bindings_file: PathBuf,
        /// The version recorded in the generated bindings.
        pub version: EspIdfVersion,
    }

    impl BindingsGenerator<'_> {
        fn builder(&self) -> Builder {
            Builder::default()
                .use_core()
                .ctypes_prefix("c_types")
                .derive_default(true)
                .layout_tests(false)
                .parse_callbacks(Box::new(BindgenCallbacks))
                .blocklist_function("strtold")
                .blocklist_function("_strtold_r")
                .clang_args(self.clang_args())
        }

        /// Writes the flattened header and its bindings to `out_dir`.
        pub fn generate(&self, out_dir: &Path) -> Result<GeneratedBindings> {
            log::info!(
                "Generating bindings for ESP-IDF v{} on {}",
                self.config.version,
                self.config.chip
            );

            let header_file = self.header.flatten_to(self.config, &out_dir.join("bindings.h"))?;

            let bindings = self
                .builder()
                .header(header_file.to_string_lossy())
                .generate()
                .map_err(|_| anyhow!("Failed to generate bindings"))?;

            let bindings_file = out_dir.join("bindings.rs");
            log::info!("Writing out bindings to: {}", bindings_file.display());
            bindings.write_to_file(&bindings_file)?;

            let text = fs::read_to_string(&bindings_file)?;
            let version = EspIdfVersion::from_bindings(&text).with_context(|| {
                format!(
                    "Failed to read the ESP-IDF version from {}",
                    bindings_file.display()
                )
            })?;

            if version != self.config.version {
                log::warn!(
                    "Bindings were generated for ESP-IDF v{version}, but v{} was configured",
                    self.config.version
                );
            }

            Ok(GeneratedBindings {
                header_file,
                bindings_file,
                version,
            })
        }

        /// Generates the bindings of an extra component module, restricted to
        /// the items declared in `headers`.
        pub fn generate_module(
            &self,
            module: &str,
            headers: &[PathBuf],
            out_dir: &Path,
        ) -> Result<PathBuf> {
            log::info!("Generating bindings for module `{module}`");

            let module_header = out_dir.join(format!("{module}.h"));
            let includes = headers
                .iter()
                .map(|header| format!("#include \"{}\"\n", super::canon(header)))
                .collect::<String>();
            fs::write(&module_header, includes)?;

            let mut builder = self.builder().header(module_header.to_string_lossy());
            for header in headers {
                builder = builder.allowlist_file(regex::escape(&super::canon(header)));
            }

            let bindings = builder
                .generate()
                .map_err(|_| anyhow!("Failed to generate bindings for module `{module}`"))?;

            let bindings_file = out_dir.join(format!("{module}.rs"));
            bindings.write_to_file(&bindings_file)?;

            Ok(bindings_file)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{Chip, EspIdfComponents, EspIdfVersion};

    #[test]
    fn error_code_macros() {
        for name in ["ESP_OK", "ESP_FAIL", "ESP_ERR_NO_MEM", "ESP_ERR_WIFI_BASE"] {
            assert!(is_esp_err_macro(name), "{name}");
        }
        for name in ["ESP_OKAY", "ESP_IDF_VERSION_MAJOR", "ERR_OK", "ESP_ERRNO"] {
            assert!(!is_esp_err_macro(name), "{name}");
        }
    }

    #[test]
    fn clang_args() {
        let config = IdfConfiguration::new(EspIdfVersion::new(5, 1, 2), Chip::Esp32c3)
            .with_components(EspIdfComponents::from_enabled(["mqtt"]));

        let generator = BindingsGenerator::new(BindingsHeader::esp_idf(), &config)
            .with_clang_args(["-I/idf/components/mqtt/include"])
            .with_sysroot(r"C:\tools\riscv32-esp-elf");

        assert_eq!(
            generator.clang_args(),
            [
                "-DESP_IDF_COMP_MQTT_ENABLED",
                "-target",
                "riscv32",
                "-I/idf/components/mqtt/include",
                "-IC:/tools/riscv32-esp-elf/include",
                "--sysroot=C:/tools/riscv32-esp-elf",
            ]
        );
    }
}
