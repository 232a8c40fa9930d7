use std::{fs, path::Path};

use anyhow::{Context, Result};
use strum::IntoEnumIterator;

use crate::{
    Chip,
    EspIdfComponents,
    EspIdfVersion,
    kconfig::{Kconfig, Value},
    preprocessor::{self, Macros},
};

/// Everything the conditionals of `bindings.h` depend on.
#[derive(Debug, Clone)]
pub struct IdfConfiguration {
    pub version: EspIdfVersion,
    pub chip: Chip,
    pub kconfig: Kconfig,
    pub components: EspIdfComponents,
    /// Defines of the chip's `soc/soc_caps.h`.
    pub soc_caps: Macros,
}

impl IdfConfiguration {
    /// A configuration with every known component, no Kconfig options and
    /// the SoC capabilities of the bundled device data.
    pub fn new(version: EspIdfVersion, chip: Chip) -> Self {
        Self {
            version,
            chip,
            kconfig: Kconfig::new(),
            components: EspIdfComponents::all(),
            soc_caps: Self::default_soc_caps(chip),
        }
    }

    pub fn with_kconfig(mut self, kconfig: Kconfig) -> Self {
        self.kconfig = kconfig;
        self
    }

    pub fn with_components(mut self, components: EspIdfComponents) -> Self {
        self.components = components;
        self
    }

    pub fn with_soc_caps(mut self, soc_caps: Macros) -> Self {
        self.soc_caps = soc_caps;
        self
    }

    /// Same configuration, another version.
    pub fn for_version(&self, version: EspIdfVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// Same configuration, another chip. Target-specific Kconfig options and
    /// SoC capabilities are those of the new chip.
    pub fn for_chip(&self, chip: Chip) -> Self {
        let mut kconfig = self.kconfig.clone();
        if kconfig.get("IDF_TARGET").is_some() {
            for option in Self::target_options() {
                kconfig.remove(&option);
            }

            kconfig.set("IDF_TARGET", Value::String(chip.to_string()));
            kconfig.enable(&chip.target_macro());
            kconfig.enable(Self::arch_option(chip));
        }

        Self {
            chip,
            kconfig,
            soc_caps: Self::default_soc_caps(chip),
            ..self.clone()
        }
    }

    /// The capability macros listed in the device data of `chip`.
    pub fn default_soc_caps(chip: Chip) -> Macros {
        chip.soc_caps().iter().map(|cap| (cap.as_str(), "1")).collect()
    }

    /// Reads the SoC capabilities of the chip from an ESP-IDF checkout.
    pub fn load_soc_caps(&mut self, idf_path: &Path) -> Result<()> {
        let header = idf_path
            .join("components/soc")
            .join(self.chip.to_string())
            .join("include/soc/soc_caps.h");

        let text = fs::read_to_string(&header)
            .with_context(|| format!("Failed to read {}", header.display()))?;

        let caps = preprocessor::collect_defines(&text, &Macros::new())
            .with_context(|| format!("Failed to evaluate {}", header.display()))?;

        self.soc_caps = caps
            .iter()
            .filter(|(name, _)| name.starts_with("SOC_"))
            .map(|(name, definition)| (name, definition.body()))
            .collect();

        log::debug!(
            "Loaded {} SoC capabilities from {}",
            self.soc_caps.len(),
            header.display()
        );

        Ok(())
    }

    /// The macros visible to `bindings.h` when it is compiled for this
    /// configuration.
    pub fn macros(&self) -> Macros {
        let mut macros = Macros::new();

        macros.extend(self.soc_caps.clone());
        macros.extend(self.components.macros());
        macros.extend(self.kconfig.macros());

        match self.kconfig.get("IDF_TARGET") {
            Some(Value::String(target)) if *target != self.chip.to_string() => {
                log::warn!(
                    "sdkconfig targets '{target}', but the bindings are resolved for '{}'",
                    self.chip
                );
            }
            _ => {}
        }

        // The target defines are always those of `chip`, whatever the
        // sdkconfig says.
        for option in Self::target_options() {
            macros.undef(&option);
        }
        macros.define_object("CONFIG_IDF_TARGET", format!("\"{}\"", self.chip));
        macros.define_object(self.chip.target_macro(), 1);
        macros.define_object(Self::arch_option(self.chip), 1);

        macros.extend(self.version.macros());
        macros
    }

    fn target_options() -> impl Iterator<Item = String> {
        Chip::iter().map(|chip| chip.target_macro()).chain([
            "CONFIG_IDF_TARGET_ARCH_XTENSA".to_string(),
            "CONFIG_IDF_TARGET_ARCH_RISCV".to_string(),
        ])
    }

    fn arch_option(chip: Chip) -> &'static str {
        if chip.is_xtensa() {
            "CONFIG_IDF_TARGET_ARCH_XTENSA"
        } else {
            "CONFIG_IDF_TARGET_ARCH_RISCV"
        }
    }

    /// Extra arguments clang needs to parse `bindings.h` for this
    /// configuration.
    pub fn clang_args(&self) -> impl Iterator<Item = String> + '_ {
        self.components
            .clang_args()
            .chain(["-target".to_string(), self.chip.clang_target().to_string()])
    }

    /// All `rustc` cfgs of this configuration.
    pub fn cfg_args(&self) -> impl Iterator<Item = String> + '_ {
        self.kconfig
            .cfg_args()
            .chain(self.version.cfg_args())
            .chain(self.components.cfg_args())
            .chain([self.chip.to_string()])
    }
}
