// src/logging.rs
//
// Leveled, timestamped diagnostics shared by every layer.
// The threshold is process-wide; each level includes everything below it.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
#[doc(hidden)]
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Current threshold, stored as `LogLevel as u8`.
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Ordered verbosity threshold. `None` silences everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    /// Short tag written in front of each message.
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::None => "",
            LogLevel::Error => "ERR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Parse level from its configuration name.
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "error" | "err" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::None,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Whether a message at `level` passes the configured threshold.
/// A `None` message level never passes.
pub fn enabled(level: LogLevel) -> bool {
    level != LogLevel::None && level <= log_level()
}

/// Initialise file logging to the given reports directory.
/// Creates a timestamped log file and a `poe-terminal.log` symlink (Unix only).
pub fn init_file_logging(reports_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(reports_dir)
        .map_err(|e| format!("Failed to create reports dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-poe-terminal.log")
        .to_string();
    let log_path = reports_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    // Windows symlinks require elevated privileges
    #[cfg(unix)]
    {
        let symlink_path = reports_dir.join("poe-terminal.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} WARN: [logging] Failed to create poe-terminal.log symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would lock LOG_FILE again, write directly
    eprintln!(
        "{} INFO: [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(())
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} INFO: [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Leveled, timestamped logging macro.
///
/// `tlog!(LogLevel::Warning, "[poe_serial] dropped {} bytes", n)` writes
/// `HH:MM:SS.mmm WARN: [poe_serial] dropped 3 bytes` to stderr, and to the
/// log file when file logging is enabled. Messages above the configured
/// threshold are discarded before formatting.
#[macro_export]
macro_rules! tlog {
    ($level:expr, $($arg:tt)*) => {{
        let level: $crate::logging::LogLevel = $level;
        if $crate::logging::enabled(level) {
            use std::io::Write as _;
            let msg = format!(
                "{} {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                level.tag(),
                format_args!($($arg)*)
            );
            eprintln!("{}", msg);
            if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
                if let Some(ref mut f) = *guard {
                    let _ = writeln!(f, "{}", msg);
                }
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered_supersets() {
        assert!(LogLevel::None < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(LogLevel::from_str("none").unwrap(), LogLevel::None);
        assert_eq!(LogLevel::from_str("WARNING").unwrap(), LogLevel::Warning);
        assert_eq!(LogLevel::from_str("err").unwrap(), LogLevel::Error);
        assert!(LogLevel::from_str("verbose").is_err());
    }

    // Single test so the global threshold is not raced by parallel tests
    #[test]
    fn test_threshold_filtering() {
        set_log_level(LogLevel::None);
        assert!(!enabled(LogLevel::Error));
        assert!(!enabled(LogLevel::Debug));

        set_log_level(LogLevel::Warning);
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Warning));
        assert!(!enabled(LogLevel::Info));

        set_log_level(LogLevel::Debug);
        assert!(enabled(LogLevel::Info));
        assert!(enabled(LogLevel::Debug));
        assert!(!enabled(LogLevel::None));

        set_log_level(LogLevel::Info);
        assert_eq!(log_level(), LogLevel::Info);
    }
}
