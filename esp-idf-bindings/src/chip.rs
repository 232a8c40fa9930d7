use std::sync::OnceLock;

use anyhow::{Result, bail, ensure};
use strum::IntoEnumIterator;

use crate::EspIdfVersion;

macro_rules! include_toml {
    (Config, $file:expr) => {{
        static LOADED_TOML: OnceLock<Config> = OnceLock::new();
        LOADED_TOML.get_or_init(|| {
            let config: Config = basic_toml::from_str(include_str!($file)).unwrap();

            config.validate().expect("Invalid device configuration");

            config
        })
    }};
}

/// Supported device architectures.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Arch {
    /// RISC-V architecture
    RiscV,
    /// Xtensa architecture
    Xtensa,
}

/// Chips ESP-IDF can target.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::AsRefStr,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Chip {
    /// Xtensa LX6 based dual core
    Esp32,
    /// Xtensa LX7 based single core
    Esp32s2,
    /// Xtensa LX7 based dual core
    Esp32s3,
    /// RISC-V based single core
    Esp32c2,
    /// RISC-V based single core
    Esp32c3,
    /// RISC-V based single core with atomics support
    Esp32c5,
    /// RISC-V based single core with atomics support
    Esp32c6,
    /// RISC-V based single core with atomics support
    Esp32h2,
    /// RISC-V based dual core
    Esp32p4,
}

impl Chip {
    /// The chips an ESP-IDF Rust target triple can build for.
    ///
    /// The first entry is the default pick for the triple.
    pub fn detect(rust_target_triple: &str) -> Result<&'static [Chip]> {
        let chips: &[Chip] = match rust_target_triple {
            "xtensa-esp32-espidf" => &[Chip::Esp32],
            "xtensa-esp32s2-espidf" => &[Chip::Esp32s2],
            "xtensa-esp32s3-espidf" => &[Chip::Esp32s3],
            // C2 does not build with older ESP-IDF releases.
            "riscv32imc-esp-espidf" => &[Chip::Esp32c3, Chip::Esp32c2],
            // H2 has no Wi-Fi.
            "riscv32imac-esp-espidf" => &[Chip::Esp32c6, Chip::Esp32c5, Chip::Esp32h2],
            "riscv32imafc-esp-espidf" => &[Chip::Esp32p4],
            _ => bail!("Unsupported target '{}'", rust_target_triple),
        };

        Ok(chips)
    }

    /// Picks the chip for a target triple, honouring an explicit `mcu`
    /// selection when it is valid for the triple.
    pub fn select(rust_target_triple: &str, mcu: Option<&str>) -> Result<Chip> {
        let supported = Self::detect(rust_target_triple)?;

        let Some(mcu) = mcu else {
            return Ok(supported[0]);
        };

        let chip = mcu.parse::<Chip>().map_err(|_| {
            anyhow::anyhow!(
                "Unknown MCU '{mcu}', expected one of: {}",
                Chip::iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
            )
        })?;

        ensure!(
            supported.contains(&chip),
            "Specified MCU '{chip}' is not amongst the MCUs ({}) supported by the build target ('{rust_target_triple}')",
            supported
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(chip)
    }

    pub fn pretty_name(&self) -> &str {
        &self.config().pretty_name
    }

    pub fn arch(&self) -> Arch {
        self.config().arch
    }

    pub fn cores(&self) -> usize {
        self.config().cores
    }

    /// The ESP-IDF Rust target triple of the chip.
    pub fn rust_target(&self) -> &str {
        &self.config().rust_target
    }

    pub fn is_xtensa(&self) -> bool {
        self.arch() == Arch::Xtensa
    }

    pub fn is_riscv(&self) -> bool {
        !self.is_xtensa()
    }

    /// The `-target` passed to clang when parsing headers for the chip.
    pub fn clang_target(&self) -> &'static str {
        match self.arch() {
            Arch::RiscV => "riscv32",
            Arch::Xtensa => "xtensa",
        }
    }

    /// The Kconfig-derived macro `sdkconfig.h` defines for the chip, e.g.
    /// `CONFIG_IDF_TARGET_ESP32C3`.
    pub fn target_macro(&self) -> String {
        format!("CONFIG_IDF_TARGET_{}", self.as_ref().to_uppercase())
    }

    /// SoC capability macros of the chip.
    pub fn soc_caps(&self) -> &[String] {
        &self.config().soc_caps
    }

    /// The name of the gcc toolchain (to compile ESP-IDF) for `idf_tools.py`.
    pub fn gcc_toolchain(&self, version: Option<&EspIdfVersion>) -> &'static str {
        let unified = version.map_or(true, |version| *version >= EspIdfVersion::new(5, 2, 0));

        match self {
            _ if self.is_riscv() => "riscv32-esp-elf",
            _ if unified => "xtensa-esp-elf",
            Self::Esp32 => "xtensa-esp32-elf",
            Self::Esp32s2 => "xtensa-esp32s2-elf",
            _ => "xtensa-esp32s3-elf",
        }
    }

    /// The name of the clang toolchain used by `bindgen`, for `idf_tools.py`.
    pub fn clang_toolchain(&self, version: Option<&EspIdfVersion>) -> &'static str {
        if version.map_or(true, |version| *version >= EspIdfVersion::new(5, 1, 0)) {
            "esp-clang"
        } else {
            // Older releases call it `xtensa-clang`, RISC-V included.
            "xtensa-clang"
        }
    }

    /// The name of the ESP ROM ELF files "toolchain" for `idf_tools.py`.
    pub fn esp_rom_elfs(&self, version: Option<&EspIdfVersion>) -> Option<&'static str> {
        version
            .map_or(true, |version| *version >= EspIdfVersion::new(5, 1, 0))
            .then_some("esp-rom-elfs")
    }

    /// The name of the gcc toolchain for the ultra low-power co-processor,
    /// for `idf_tools.py`.
    pub fn ulp_gcc_toolchain(&self, version: Option<&EspIdfVersion>) -> Option<&'static str> {
        match self {
            Self::Esp32 => Some("esp32ulp-elf"),
            Self::Esp32s2 | Self::Esp32s3 | Self::Esp32c6 | Self::Esp32p4 => Some(
                if version.map_or(true, |version| *version >= EspIdfVersion::new(4, 4, 2)) {
                    "esp32ulp-elf"
                } else {
                    "esp32s2ulp-elf"
                },
            ),
            _ => None,
        }
    }

    pub fn cmake_toolchain_file(&self) -> String {
        format!("toolchain-{self}.cmake")
    }

    fn config(&self) -> &'static Device {
        &Config::for_chip(self).device
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct Device {
    name: String,
    pretty_name: String,
    arch: Arch,
    cores: usize,
    rust_target: String,
    #[serde(default)]
    soc_caps: Vec<String>,
}

/// Device data file format.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct Config {
    device: Device,
}

impl Config {
    fn for_chip(chip: &Chip) -> &'static Self {
        match chip {
            Chip::Esp32 => include_toml!(Config, "../devices/esp32.toml"),
            Chip::Esp32s2 => include_toml!(Config, "../devices/esp32s2.toml"),
            Chip::Esp32s3 => include_toml!(Config, "../devices/esp32s3.toml"),
            Chip::Esp32c2 => include_toml!(Config, "../devices/esp32c2.toml"),
            Chip::Esp32c3 => include_toml!(Config, "../devices/esp32c3.toml"),
            Chip::Esp32c5 => include_toml!(Config, "../devices/esp32c5.toml"),
            Chip::Esp32c6 => include_toml!(Config, "../devices/esp32c6.toml"),
            Chip::Esp32h2 => include_toml!(Config, "../devices/esp32h2.toml"),
            Chip::Esp32p4 => include_toml!(Config, "../devices/esp32p4.toml"),
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            Chip::detect(&self.device.rust_target)?
                .iter()
                .any(|chip| chip.as_ref() == self.device.name),
            "Target '{}' does not build for '{}'",
            self.device.rust_target,
            self.device.name
        );

        for cap in &self.device.soc_caps {
            ensure!(
                cap.starts_with("SOC_"),
                "SoC capability '{cap}' of '{}' is not a SOC_ macro",
                self.device.name
            );
        }

        Ok(())
    }
}
