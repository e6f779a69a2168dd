use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

use super::function_types::read_i32;

/// Severity of a guest log record, mirroring `log::Level` plus a `None`
/// sentinel the guest can use to suppress a record entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Information = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
    None = 6,
}

impl TryFrom<u8> for LogLevel {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LogLevel::Trace),
            1 => Ok(LogLevel::Debug),
            2 => Ok(LogLevel::Information),
            3 => Ok(LogLevel::Warning),
            4 => Ok(LogLevel::Error),
            5 => Ok(LogLevel::Critical),
            6 => Ok(LogLevel::None),
            other => bail!("Unknown LogLevel tag {}", other),
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Information => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error | LogLevel::Critical => log::Level::Error,
            LogLevel::None => log::Level::Trace,
        }
    }
}

/// `{level, message, source, caller, file, line}`, written by the guest's
/// logging shim into the log buffer and read by the host's `LOG` port
/// handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestLogData {
    pub message: String,
    pub source: String,
    pub level: LogLevel,
    pub caller: String,
    pub source_file: String,
    pub line: i32,
}

impl GuestLogData {
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn new(
        message: String,
        source: String,
        level: LogLevel,
        caller: String,
        source_file: String,
        line: i32,
    ) -> Self {
        Self {
            message,
            source,
            level,
            caller,
            source_file,
            line,
        }
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.level as u8);
        buf.extend_from_slice(&self.line.to_le_bytes());
        for field in [&self.message, &self.source, &self.caller, &self.source_file] {
            buf.extend_from_slice(&(field.len() as i32).to_le_bytes());
            buf.extend_from_slice(field.as_bytes());
        }
        buf
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let level_tag = *buf.get(pos).ok_or_else(|| Error::msg("truncated guest log data"))?;
        pos += 1;
        let level = LogLevel::try_from(level_tag)?;
        let line = read_i32(buf, &mut pos)?;
        let mut fields: Vec<String> = Vec::with_capacity(4);
        for _ in 0..4 {
            let len = read_i32(buf, &mut pos)? as usize;
            let bytes = buf
                .get(pos..pos + len)
                .ok_or_else(|| Error::msg("truncated guest log data field"))?;
            pos += len;
            fields.push(core::str::from_utf8(bytes).map_err(|e| Error::msg(e.to_string()))?.to_string());
        }
        let mut it = fields.into_iter();
        Ok(Self {
            message: it.next().expect("4 fields written"),
            source: it.next().expect("4 fields written"),
            caller: it.next().expect("4 fields written"),
            source_file: it.next().expect("4 fields written"),
            level,
            line,
        })
    }
}

impl TryFrom<&[u8]> for GuestLogData {
    type Error = Error;
    fn try_from(buf: &[u8]) -> Result<Self> {
        Self::decode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = GuestLogData::new(
            "test log".to_string(),
            "test source".to_string(),
            LogLevel::Warning,
            "test caller".to_string(),
            "test source file".to_string(),
            123,
        );
        let encoded = data.encode();
        let decoded = GuestLogData::decode(&encoded).unwrap();
        assert_eq!(data, decoded);
    }
}
