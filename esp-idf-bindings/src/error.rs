//! Error codes returned by ESP-IDF and lwIP functions.
//!
//! `ESP_ERR_*` macros are generated as `i32` constants, so [`esp_err_t`] is
//! an `i32` here as well. The [`esp!`](crate::esp),
//! [`esp_result!`](crate::esp_result), [`esp_nofail!`](crate::esp_nofail) and
//! [`lwip!`](crate::lwip) macros turn raw return codes into `Result`s.

#![allow(non_camel_case_types)]

use core::fmt;

/// Return code of ESP-IDF functions.
pub type esp_err_t = i32;

/// Return code of lwIP functions (`err_enum_t`).
pub type err_t = i32;

pub const ESP_OK: esp_err_t = 0;
pub const ESP_FAIL: esp_err_t = -1;

pub const ESP_ERR_NO_MEM: esp_err_t = 0x101;
pub const ESP_ERR_INVALID_ARG: esp_err_t = 0x102;
pub const ESP_ERR_INVALID_STATE: esp_err_t = 0x103;
pub const ESP_ERR_INVALID_SIZE: esp_err_t = 0x104;
pub const ESP_ERR_NOT_FOUND: esp_err_t = 0x105;
pub const ESP_ERR_NOT_SUPPORTED: esp_err_t = 0x106;
pub const ESP_ERR_TIMEOUT: esp_err_t = 0x107;
pub const ESP_ERR_INVALID_RESPONSE: esp_err_t = 0x108;
pub const ESP_ERR_INVALID_CRC: esp_err_t = 0x109;
pub const ESP_ERR_INVALID_VERSION: esp_err_t = 0x10A;
pub const ESP_ERR_INVALID_MAC: esp_err_t = 0x10B;
pub const ESP_ERR_NOT_FINISHED: esp_err_t = 0x10C;
pub const ESP_ERR_NOT_ALLOWED: esp_err_t = 0x10D;

pub const ESP_ERR_WIFI_BASE: esp_err_t = 0x3000;
pub const ESP_ERR_MESH_BASE: esp_err_t = 0x4000;
pub const ESP_ERR_FLASH_BASE: esp_err_t = 0x6000;
pub const ESP_ERR_HW_CRYPTO_BASE: esp_err_t = 0xc000;
pub const ESP_ERR_MEMPROT_BASE: esp_err_t = 0xd000;

const ESP_ERR_NAMES: &[(esp_err_t, &str)] = &[
    (ESP_OK, "ESP_OK"),
    (ESP_FAIL, "ESP_FAIL"),
    (ESP_ERR_NO_MEM, "ESP_ERR_NO_MEM"),
    (ESP_ERR_INVALID_ARG, "ESP_ERR_INVALID_ARG"),
    (ESP_ERR_INVALID_STATE, "ESP_ERR_INVALID_STATE"),
    (ESP_ERR_INVALID_SIZE, "ESP_ERR_INVALID_SIZE"),
    (ESP_ERR_NOT_FOUND, "ESP_ERR_NOT_FOUND"),
    (ESP_ERR_NOT_SUPPORTED, "ESP_ERR_NOT_SUPPORTED"),
    (ESP_ERR_TIMEOUT, "ESP_ERR_TIMEOUT"),
    (ESP_ERR_INVALID_RESPONSE, "ESP_ERR_INVALID_RESPONSE"),
    (ESP_ERR_INVALID_CRC, "ESP_ERR_INVALID_CRC"),
    (ESP_ERR_INVALID_VERSION, "ESP_ERR_INVALID_VERSION"),
    (ESP_ERR_INVALID_MAC, "ESP_ERR_INVALID_MAC"),
    (ESP_ERR_NOT_FINISHED, "ESP_ERR_NOT_FINISHED"),
    (ESP_ERR_NOT_ALLOWED, "ESP_ERR_NOT_ALLOWED"),
    (ESP_ERR_WIFI_BASE, "ESP_ERR_WIFI_BASE"),
    (ESP_ERR_MESH_BASE, "ESP_ERR_MESH_BASE"),
    (ESP_ERR_FLASH_BASE, "ESP_ERR_FLASH_BASE"),
    (ESP_ERR_HW_CRYPTO_BASE, "ESP_ERR_HW_CRYPTO_BASE"),
    (ESP_ERR_MEMPROT_BASE, "ESP_ERR_MEMPROT_BASE"),
];

/// The name `esp_err_to_name` returns for `code`.
pub fn esp_err_to_name(code: esp_err_t) -> &'static str {
    ESP_ERR_NAMES
        .iter()
        .find(|(known, _)| *known == code)
        .map_or("UNKNOWN ERROR", |(_, name)| name)
}

/// A non-`ESP_OK` return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EspError(esp_err_t);

impl EspError {
    pub fn from(code: esp_err_t) -> Option<Self> {
        if code == ESP_OK {
            None
        } else {
            Some(Self(code))
        }
    }

    pub fn check_and_return<T>(code: esp_err_t, value: T) -> Result<T, Self> {
        match Self::from(code) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    pub fn convert(code: esp_err_t) -> Result<(), Self> {
        Self::check_and_return(code, ())
    }

    pub fn panic(&self) -> ! {
        panic!("ESP-IDF ERROR: {self}");
    }

    pub fn code(&self) -> esp_err_t {
        self.0
    }
}

impl fmt::Display for EspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(esp_err_to_name(self.0))
    }
}

impl std::error::Error for EspError {}

pub const ERR_OK: err_t = 0;
pub const ERR_MEM: err_t = -1;
pub const ERR_BUF: err_t = -2;
pub const ERR_TIMEOUT: err_t = -3;
pub const ERR_RTE: err_t = -4;
pub const ERR_INPROGRESS: err_t = -5;
pub const ERR_VAL: err_t = -6;
pub const ERR_WOULDBLOCK: err_t = -7;
pub const ERR_USE: err_t = -8;
pub const ERR_ALREADY: err_t = -9;
pub const ERR_ISCONN: err_t = -10;
pub const ERR_CONN: err_t = -11;
pub const ERR_IF: err_t = -12;
pub const ERR_ABRT: err_t = -13;
pub const ERR_RST: err_t = -14;
pub const ERR_CLSD: err_t = -15;
pub const ERR_ARG: err_t = -16;

/// A negative lwIP return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LwIPError {
    /// The return value of a socket call, when the error came from one.
    cause: Option<i32>,
    internal: err_t,
}

impl LwIPError {
    pub fn from_raw(error: err_t) -> Self {
        Self {
            cause: None,
            internal: error,
        }
    }

    /// A socket call failed with `cause`, for the lwIP reason `internal`.
    pub fn with_cause(cause: i32, internal: err_t) -> Self {
        Self {
            cause: Some(cause),
            internal,
        }
    }

    pub fn from(error: i32) -> Option<Self> {
        (error < 0).then(|| Self::from_raw(error))
    }

    pub fn check_and_return<T>(error: i32, value: T) -> Result<T, Self> {
        match Self::from(error) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    pub fn convert(error: i32) -> Result<(), Self> {
        Self::check_and_return(error, ())
    }

    pub fn panic(&self) -> ! {
        panic!("LWIP ERROR: {self}");
    }

    pub fn code(&self) -> err_t {
        self.internal
    }

    pub fn cause(&self) -> Option<i32> {
        self.cause
    }

    fn message(&self) -> &'static str {
        // lwIP only has `lwip_strerr` with LWIP_DEBUG.
        match self.internal {
            ERR_OK => "No error, everything OK.",
            ERR_MEM => "Out of memory error.",
            ERR_BUF => "Buffer error.",
            ERR_TIMEOUT => "Timeout.",
            ERR_RTE => "Routing problem.",
            ERR_INPROGRESS => "Operation in progress",
            ERR_VAL => "Illegal value.",
            ERR_WOULDBLOCK => "Operation would block.",
            ERR_USE => "Address in use.",
            ERR_ALREADY => "Already connecting.",
            ERR_ISCONN => "Conn already established.",
            ERR_CONN => "Not connected.",
            ERR_IF => "Low-level netif error",
            ERR_ABRT => "Connection aborted.",
            ERR_RST => "Connection reset.",
            ERR_CLSD => "Connection closed.",
            ERR_ARG => "Illegal argument.",
            _ => "Unknown error.",
        }
    }
}

impl fmt::Display for LwIPError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lwip error")?;
        if let Some(cause) = self.cause {
            write!(f, " (cause: {cause})")?;
        }
        write!(f, ": {}", self.message())
    }
}

impl std::error::Error for LwIPError {}

/// Either kind of ESP-IDF error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum IdfError {
    #[error("esp-idf esp error: {0}")]
    Esp(#[from] EspError),
    #[error("esp-idf lwip error: {0}")]
    Lwip(#[from] LwIPError),
}

/// `Ok(())` for `ESP_OK`, an [`EspError`](crate::error::EspError) otherwise.
#[macro_export]
macro_rules! esp {
    ($err:expr) => {{
        $crate::error::EspError::convert($err as $crate::error::esp_err_t)
    }};
}

/// `Ok($value)` for `ESP_OK`, an [`EspError`](crate::error::EspError)
/// otherwise.
#[macro_export]
macro_rules! esp_result {
    ($err:expr, $value:expr) => {{
        $crate::error::EspError::check_and_return($err as $crate::error::esp_err_t, $value)
    }};
}

/// Panics unless `$err` is `ESP_OK`.
#[macro_export]
macro_rules! esp_nofail {
    ($err:expr) => {{
        if let Some(error) = $crate::error::EspError::from($err as $crate::error::esp_err_t) {
            error.panic();
        }
    }};
}

/// `Ok(())` for non-negative lwIP return codes.
#[macro_export]
macro_rules! lwip {
    ($err:expr) => {{
        $crate::error::LwIPError::convert($err as i32)
    }};
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn esp_ok_is_not_an_error() {
        assert_eq!(EspError::from(ESP_OK), None);
        assert_eq!(crate::esp!(ESP_OK), Ok(()));
        assert_eq!(crate::esp_result!(0u32, "value"), Ok("value"));
        crate::esp_nofail!(ESP_OK);
    }

    #[test]
    fn codes_are_named() {
        let err = EspError::from(ESP_ERR_TIMEOUT).unwrap();

        assert_eq!(err.code(), 0x107);
        assert_eq!(err.to_string(), "ESP_ERR_TIMEOUT");
        assert_eq!(crate::esp!(ESP_FAIL).unwrap_err().to_string(), "ESP_FAIL");
        assert_eq!(crate::esp!(0x1234).unwrap_err().to_string(), "UNKNOWN ERROR");
        assert_eq!(
            IdfError::from(err).to_string(),
            "esp-idf esp error: ESP_ERR_TIMEOUT"
        );
    }

    #[test]
    #[should_panic(expected = "ESP-IDF ERROR: ESP_ERR_NO_MEM")]
    fn nofail_panics_on_errors() {
        crate::esp_nofail!(ESP_ERR_NO_MEM);
    }

    #[test]
    fn lwip_errors() {
        assert_eq!(crate::lwip!(5), Ok(()));

        let err = crate::lwip!(ERR_RST).unwrap_err();
        assert_eq!(err.code(), -14);
        assert_eq!(err.to_string(), "lwip error: Connection reset.");

        assert_eq!(
            LwIPError::with_cause(-1, ERR_WOULDBLOCK).to_string(),
            "lwip error (cause: -1): Operation would block."
        );
        assert_eq!(LwIPError::from_raw(-100).to_string(), "lwip error: Unknown error.");
        assert_eq!(
            IdfError::from(LwIPError::from_raw(ERR_MEM)).to_string(),
            "esp-idf lwip error: lwip error: Out of memory error."
        );
    }
}
