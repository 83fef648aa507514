// src/settings.rs
//
// Application settings, persisted as TOML. Every field has a serde default
// so files written by older versions keep loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogLevel;
use crate::protocol::poe_serial::DEFAULT_PARTIAL_TIMEOUT_MS;
use crate::protocol::reassembly::{
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_PARTIAL_BYTES, DEFAULT_TIMEOUT_MS,
};
use crate::protocol::simple_serial::DEFAULT_MAX_LINE_LENGTH;
use crate::protocol::{slcan, ProtocolKind, ReassemblyLimits};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<SettingsError> for String {
    fn from(e: SettingsError) -> String {
        e.to_string()
    }
}

/// Serial baud rates the device firmware supports.
pub const BAUD_RATES: &[u32] = &[
    600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 56000, 57600, 115200, 128000, 256000,
];

// ============================================================================
// Serial Line
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial line parameters checked into their typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub flow_control: FlowControl,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

/// Connection parameters as entered by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u32,
    /// 0 = none, 1 = software, 2 = hardware
    #[serde(default)]
    pub flow_control: u32,
    /// 0 = none, 1 = odd, 2 = even
    #[serde(default)]
    pub parity: u32,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u32,
    /// Read timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolKind,
    #[serde(default)]
    pub can_bitrate: Option<String>,
    #[serde(default)]
    pub canfd_bitrate: Option<String>,
    #[serde(default)]
    pub canfd_data_bitrate: Option<String>,
}

fn default_baud_rate() -> u32 {
    115200
}
fn default_data_bits() -> u32 {
    8
}
fn default_stop_bits() -> u32 {
    1
}
fn default_protocol() -> ProtocolKind {
    ProtocolKind::SimpleSerial
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            path: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            flow_control: 0,
            parity: 0,
            stop_bits: default_stop_bits(),
            timeout: None,
            protocol: default_protocol(),
            can_bitrate: None,
            canfd_bitrate: None,
            canfd_data_bitrate: None,
        }
    }
}

fn invalid(field: &'static str, reason: String) -> SettingsError {
    SettingsError::Invalid { field, reason }
}

impl SerialConfig {
    /// Check the numeric line options and, for CAN protocols, the adapter
    /// bitrates.
    pub fn validate(&self) -> Result<LineSettings, SettingsError> {
        if !BAUD_RATES.contains(&self.baud_rate) {
            return Err(invalid(
                "baud_rate",
                format!("{} is not a supported rate", self.baud_rate),
            ));
        }
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            n => return Err(invalid("data_bits", format!("{} (expected 5-8)", n))),
        };
        let flow_control = match self.flow_control {
            0 => FlowControl::None,
            1 => FlowControl::Software,
            2 => FlowControl::Hardware,
            n => return Err(invalid("flow_control", format!("{} (expected 0-2)", n))),
        };
        let parity = match self.parity {
            0 => Parity::None,
            1 => Parity::Odd,
            2 => Parity::Even,
            n => return Err(invalid("parity", format!("{} (expected 0-2)", n))),
        };
        let stop_bits = match self.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            n => return Err(invalid("stop_bits", format!("{} (expected 1-2)", n))),
        };

        if self.protocol.is_can() {
            slcan::open_commands(self).map_err(|e| invalid("bitrate", e.to_string()))?;
        }

        Ok(LineSettings {
            baud_rate: self.baud_rate,
            data_bits,
            flow_control,
            parity,
            stop_bits,
        })
    }
}

// ============================================================================
// Protocol Settings
// ============================================================================

/// Line terminator choices for SimpleSerial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndPackage {
    #[serde(rename = "LF")]
    Lf,
    #[serde(rename = "CR")]
    Cr,
    #[serde(rename = "CRLF")]
    CrLf,
    None,
}

impl EndPackage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndPackage::Lf => "\n",
            EndPackage::Cr => "\r",
            EndPackage::CrLf => "\r\n",
            EndPackage::None => "",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, SettingsError> {
        match name.to_ascii_uppercase().as_str() {
            "LF" => Ok(EndPackage::Lf),
            "CR" => Ok(EndPackage::Cr),
            "CRLF" => Ok(EndPackage::CrLf),
            "NONE" => Ok(EndPackage::None),
            _ => Err(invalid("end_package", format!("unknown terminator '{}'", name))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleSerialSettings {
    #[serde(default = "default_end_package")]
    pub end_package: EndPackage,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_end_package() -> EndPackage {
    EndPackage::CrLf
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

impl Default for SimpleSerialSettings {
    fn default() -> Self {
        SimpleSerialSettings {
            end_package: default_end_package(),
            max_line_length: default_max_line_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoeSerialSettings {
    #[serde(default = "default_partial_timeout_ms")]
    pub partial_timeout_ms: u64,
}

fn default_partial_timeout_ms() -> u64 {
    DEFAULT_PARTIAL_TIMEOUT_MS
}

impl Default for PoeSerialSettings {
    fn default() -> Self {
        PoeSerialSettings {
            partial_timeout_ms: default_partial_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassemblySettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_partial_bytes")]
    pub max_partial_bytes: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_max_partial_bytes() -> usize {
    DEFAULT_MAX_PARTIAL_BYTES
}
fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

impl Default for ReassemblySettings {
    fn default() -> Self {
        ReassemblySettings {
            timeout_ms: default_timeout_ms(),
            max_partial_bytes: default_max_partial_bytes(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ReassemblySettings {
    pub fn limits(&self) -> ReassemblyLimits {
        ReassemblyLimits {
            timeout_ms: self.timeout_ms,
            max_partial_bytes: self.max_partial_bytes,
            max_in_flight: self.max_in_flight.max(1),
        }
    }
}

// ============================================================================
// App Settings
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub log_level: LogLevel,
    /// Directory for log files; file logging is off when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub simple_serial: SimpleSerialSettings,
    #[serde(default)]
    pub poe_serial: PoeSerialSettings,
    #[serde(default)]
    pub reassembly: ReassemblySettings,
}

/// `<config dir>/poe-terminal/settings.toml`, or the working directory when
/// the platform has no config dir.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("poe-terminal")
        .join("settings.toml")
}

/// Load settings; a missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<AppSettings, SettingsError> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| SettingsError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}
