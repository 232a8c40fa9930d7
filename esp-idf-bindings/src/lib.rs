//! Resolve the ESP-IDF binding surface for a chip, SDK version and sdkconfig.
//!
//! The crate ships `bindings.h`, the aggregation header handed to `bindgen`
//! when generating the raw ESP-IDF bindings. Which system headers end up in
//! the generated bindings depends on four inputs:
//!
//! - the ESP-IDF version (`ESP_IDF_VERSION_MAJOR/MINOR/PATCH`)
//! - the target chip (`CONFIG_IDF_TARGET_*`)
//! - the Kconfig options of the project's `sdkconfig` (`CONFIG_*`)
//! - the components that are part of the build (`ESP_IDF_COMP_*_ENABLED`)
//!
//! [`IdfConfiguration`] collects these inputs and turns them into a macro set.
//! [`BindingsHeader::resolve`] evaluates the header's conditionals against that
//! set on the host, so the resulting include list can be inspected, flattened,
//! turned into `rustc` cfgs and checked against an SDK checkout without a C
//! toolchain.
//!
//! ```rust,no_run
//! use esp_idf_bindings::{BindingsHeader, Chip, EspIdfVersion, IdfConfiguration};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = IdfConfiguration::new(EspIdfVersion::new(5, 1, 2), Chip::Esp32c3);
//! let resolution = BindingsHeader::esp_idf().resolve(&config)?;
//!
//! for include in resolution.includes() {
//!     println!("{}", include.path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
#![doc = document_features::document_features!()]

pub mod bindgen;
pub mod cfg;
mod chip;
pub mod cmake;
pub mod component;
pub mod config;
pub mod error;
mod header;
mod idf;
pub mod kconfig;
pub mod matrix;
pub mod preprocessor;
mod version;

pub use self::{
    chip::{Arch, Chip},
    component::EspIdfComponents,
    error::{EspError, IdfError, LwIPError, esp_err_t},
    header::BindingsHeader,
    idf::IdfConfiguration,
    version::EspIdfVersion,
};
