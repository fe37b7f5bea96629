//! Transaction log records and bitmask filtering.
//!
//! Every record carries exactly one [`LogType`] bit. Readers filter with a
//! [`LogMask`]: a record is visible iff `record.kind & mask != 0`. The usual
//! masks are the cumulative [`LogLevel`]s, but any OR of types is accepted.

use core::ops::BitOr;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a single log record (one bit each).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LogType {
    Error = 0b0001,
    Warn = 0b0010,
    Info = 0b0100,
    Debug = 0b1000,
}

impl LogType {
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// Cumulative filter presets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Errors only.
    Simple,
    /// Errors and warnings.
    #[default]
    Normal,
    /// Errors, warnings and info.
    Detailed,
    /// Everything.
    Debug,
}

impl LogLevel {
    pub const fn mask(self) -> LogMask {
        let bits = match self {
            LogLevel::Simple => LogType::Error.bits(),
            LogLevel::Normal => LogType::Error.bits() | LogType::Warn.bits(),
            LogLevel::Detailed => {
                LogType::Error.bits() | LogType::Warn.bits() | LogType::Info.bits()
            }
            LogLevel::Debug => {
                LogType::Error.bits()
                    | LogType::Warn.bits()
                    | LogType::Info.bits()
                    | LogType::Debug.bits()
            }
        };
        LogMask(bits)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(LogLevel::Simple),
            "normal" => Ok(LogLevel::Normal),
            "detailed" => Ok(LogLevel::Detailed),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// A set of [`LogType`] bits used to filter the transaction log.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogMask(u8);

impl LogMask {
    pub const NONE: LogMask = LogMask(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn admits(self, kind: LogType) -> bool {
        self.0 & kind.bits() != 0
    }
}

impl Default for LogMask {
    fn default() -> Self {
        LogLevel::default().mask()
    }
}

impl From<LogLevel> for LogMask {
    fn from(level: LogLevel) -> Self {
        level.mask()
    }
}

impl From<LogType> for LogMask {
    fn from(kind: LogType) -> Self {
        LogMask(kind.bits())
    }
}

impl BitOr for LogType {
    type Output = LogMask;

    fn bitor(self, rhs: LogType) -> LogMask {
        LogMask(self.bits() | rhs.bits())
    }
}

impl BitOr<LogType> for LogMask {
    type Output = LogMask;

    fn bitor(self, rhs: LogType) -> LogMask {
        LogMask(self.0 | rhs.bits())
    }
}

/// One entry of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: LogType,
    pub message: String,
    /// Command name (or caller-chosen scope for out-of-band entries).
    pub scope: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(kind: LogType, message: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: scope.into(),
            timestamp: Utc::now(),
        }
    }
}
