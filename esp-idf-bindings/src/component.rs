//! ESP-IDF components that gate parts of the binding surface.

use std::collections::BTreeSet;

use crate::preprocessor::Macros;

/// Every component `bindings.h` knows a `ESP_IDF_COMP_<NAME>_ENABLED` flag
/// for. Managed components keep their `<namespace>__` prefix.
pub const ALL_COMPONENTS: &[&str] = &[
    "app_update",
    "bootloader_support",
    "console",
    "driver",
    "efuse",
    "esp_adc",
    "esp_adc_cal",
    "esp_eth",
    "esp_event",
    "esp_http_client",
    "esp_http_server",
    "esp_lcd",
    "esp_netif",
    "esp_partition",
    "esp_pm",
    "esp_psram",
    "esp_serial_slave_link",
    "esp_timer",
    "esp_tls",
    "esp_websocket_client",
    "esp_wifi",
    "espcoredump",
    "espressif__esp_websocket_client",
    "espressif__mdns",
    "fatfs",
    "lwip",
    "mbedtls",
    "mdns",
    "mqtt",
    "nvs_flash",
    "pthread",
    "soc",
    "spi_flash",
    "spiffs",
    "tcp_transport",
    "ulp",
    "usb",
    "vfs",
    "wifi_provisioning",
    "wpa_supplicant",
];

/// The set of components taking part in a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspIdfComponents(BTreeSet<&'static str>);

impl EspIdfComponents {
    /// All known components.
    pub fn all() -> Self {
        Self(ALL_COMPONENTS.iter().copied().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// The known components amongst `enabled`. Other names are ignored.
    pub fn from_enabled<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut components = Self::none();
        for name in enabled {
            if !components.insert(name.as_ref()) {
                log::debug!("Ignoring component without bindings: {}", name.as_ref());
            }
        }
        components
    }

    /// The components of the `;`-separated link libraries list reported by
    /// the ESP-IDF CMake build. `driver` is always part of the result.
    pub fn from_link_libraries(libraries: &str) -> Self {
        let mut components = Self::from_enabled(
            libraries
                .split(';')
                .map(str::trim)
                .filter_map(|library| library.strip_prefix("__idf_")),
        );

        // `driver` is not reported as a link library by all releases.
        components.insert("driver");
        components
    }

    /// Adds a known component, returning `false` for unknown names.
    pub fn insert(&mut self, name: &str) -> bool {
        match ALL_COMPONENTS.iter().find(|known| **known == name) {
            Some(known) => {
                self.0.insert(*known);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clang_args(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|c| format!("-D{}", Self::flag(c)))
    }

    pub fn cfg_args(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|c| format!("esp_idf_comp_{c}_enabled"))
    }

    pub fn macros(&self) -> Macros {
        self.iter().map(|c| (Self::flag(c), "1".to_string())).collect()
    }

    fn flag(component: &str) -> String {
        format!("ESP_IDF_COMP_{}_ENABLED", component.to_uppercase())
    }
}

impl Default for EspIdfComponents {
    fn default() -> Self {
        Self::all()
    }
}
