use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

use super::function_types::read_i32;

/// Structured error codes a guest can report back to the host through the
/// guest-error buffer. `NoError` is the value written when a sandbox is
/// freshly initialized and no error has occurred yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
#[repr(u64)]
pub enum ErrorCode {
    NoError = 0,
    UnsupportedCallingConvention = 1,
    GuestFunctionNameNotProvided = 2,
    GuestFunctionNotFound = 3,
    GuestFunctionIncorrectNumberOfParameters = 4,
    GuestFunctionParameterTypeMismatch = 5,
    GsCheckFailed = 6,
    TooManyGuestFunctions = 7,
    MallocFailed = 8,
    ArrayLengthParamIsMissing = 9,
    UnknownError = 10,
}

impl ErrorCode {
    /// Whether this error code always poisons the sandbox, per the error
    /// taxonomy: most guest errors leave the sandbox `Ready`, but a handful
    /// indicate memory corruption or exhaustion severe enough that no
    /// further call can be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::GsCheckFailed | ErrorCode::MallocFailed | ErrorCode::TooManyGuestFunctions
        )
    }
}

impl TryFrom<u64> for ErrorCode {
    type Error = Error;
    fn try_from(value: u64) -> Result<Self> {
        match value {
            0 => Ok(ErrorCode::NoError),
            1 => Ok(ErrorCode::UnsupportedCallingConvention),
            2 => Ok(ErrorCode::GuestFunctionNameNotProvided),
            3 => Ok(ErrorCode::GuestFunctionNotFound),
            4 => Ok(ErrorCode::GuestFunctionIncorrectNumberOfParameters),
            5 => Ok(ErrorCode::GuestFunctionParameterTypeMismatch),
            6 => Ok(ErrorCode::GsCheckFailed),
            7 => Ok(ErrorCode::TooManyGuestFunctions),
            8 => Ok(ErrorCode::MallocFailed),
            9 => Ok(ErrorCode::ArrayLengthParamIsMissing),
            10 => Ok(ErrorCode::UnknownError),
            other => bail!("Unknown ErrorCode value {}", other),
        }
    }
}

/// `{code: ErrorCode, message: string}`, the frame the guest writes into the
/// guest-error buffer whenever a `call_guest` fails on the guest side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestError {
    pub code: ErrorCode,
    pub message: String,
}

impl Default for GuestError {
    fn default() -> Self {
        Self {
            code: ErrorCode::NoError,
            message: String::new(),
        }
    }
}

impl GuestError {
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn new(code: ErrorCode, message: String) -> Self {
        Self { code, message }
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.code as u64).to_le_bytes());
        buf.extend_from_slice(&(self.message.len() as i32).to_le_bytes());
        buf.extend_from_slice(self.message.as_bytes());
        buf
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let code_bytes = buf.get(0..8).ok_or_else(|| Error::msg("truncated guest error code"))?;
        pos += 8;
        let code = ErrorCode::try_from(u64::from_le_bytes(code_bytes.try_into().expect("checked len")))?;
        let len = read_i32(buf, &mut pos)? as usize;
        let msg_bytes = buf.get(pos..pos + len).ok_or_else(|| Error::msg("truncated guest error message"))?;
        let message = core::str::from_utf8(msg_bytes)
            .map_err(|e| Error::msg(e.to_string()))?
            .to_string();
        Ok(Self { code, message })
    }
}
