use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

/// The type of a guest- or host-function parameter.
///
/// Kept in sync with [`ParameterValue`]; every variant here has exactly one
/// matching variant there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
#[repr(u8)]
pub enum ParameterType {
    Int = 1,
    Long = 2,
    String = 3,
    Bool = 4,
    VecBytes = 5,
}

impl TryFrom<u8> for ParameterType {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ParameterType::Int),
            2 => Ok(ParameterType::Long),
            3 => Ok(ParameterType::String),
            4 => Ok(ParameterType::Bool),
            5 => Ok(ParameterType::VecBytes),
            other => bail!("Unknown ParameterType tag {}", other),
        }
    }
}

/// A parameter value passed across the host/guest call boundary.
///
/// `VecBytes` is always immediately preceded on the wire by its own `i32`
/// length so readers that don't understand the byte vector can still skip
/// over it; see [`ParameterValue::write_to`]/`read_from`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Int(i32),
    Long(i64),
    String(String),
    Bool(bool),
    VecBytes(Vec<u8>),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterType {
        match self {
            ParameterValue::Int(_) => ParameterType::Int,
            ParameterValue::Long(_) => ParameterType::Long,
            ParameterValue::String(_) => ParameterType::String,
            ParameterValue::Bool(_) => ParameterType::Bool,
            ParameterValue::VecBytes(_) => ParameterType::VecBytes,
        }
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind() as u8);
        match self {
            ParameterValue::Int(v) => buf.extend_from_slice(&v.to_le_bytes()),
            ParameterValue::Long(v) => buf.extend_from_slice(&v.to_le_bytes()),
            ParameterValue::Bool(v) => buf.push(*v as u8),
            ParameterValue::String(s) => {
                buf.extend_from_slice(&(s.len() as i32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            ParameterValue::VecBytes(v) => {
                buf.extend_from_slice(&(v.len() as i32).to_le_bytes());
                buf.extend_from_slice(v);
            }
        }
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub(crate) fn read_from(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let tag = *buf.get(*pos).ok_or_else(|| Error::msg("truncated parameter"))?;
        *pos += 1;
        let kind = ParameterType::try_from(tag)?;
        match kind {
            ParameterType::Int => {
                let v = read_i32(buf, pos)?;
                Ok(ParameterValue::Int(v))
            }
            ParameterType::Long => {
                let v = read_i64(buf, pos)?;
                Ok(ParameterValue::Long(v))
            }
            ParameterType::Bool => {
                let b = *buf.get(*pos).ok_or_else(|| Error::msg("truncated bool"))?;
                *pos += 1;
                Ok(ParameterValue::Bool(b != 0))
            }
            ParameterType::String => {
                let len = read_i32(buf, pos)? as usize;
                let s = read_bytes(buf, pos, len)?;
                Ok(ParameterValue::String(
                    String::from_utf8(s.to_vec()).map_err(|e| Error::msg(e.to_string()))?,
                ))
            }
            ParameterType::VecBytes => {
                let len = read_i32(buf, pos)? as usize;
                let bytes = read_bytes(buf, pos, len)?;
                Ok(ParameterValue::VecBytes(bytes.to_vec()))
            }
        }
    }
}

/// The type of value a guest or host function returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
#[repr(u8)]
pub enum ReturnType {
    Int = 1,
    Long = 2,
    String = 3,
    Bool = 4,
    Void = 5,
    VecBytes = 6,
}

impl TryFrom<u8> for ReturnType {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ReturnType::Int),
            2 => Ok(ReturnType::Long),
            3 => Ok(ReturnType::String),
            4 => Ok(ReturnType::Bool),
            5 => Ok(ReturnType::Void),
            6 => Ok(ReturnType::VecBytes),
            other => bail!("Unknown ReturnType tag {}", other),
        }
    }
}

/// The value returned from a guest or host function call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Int(i32),
    Long(i64),
    String(String),
    Bool(bool),
    Void,
    VecBytes(Vec<u8>),
}

impl ReturnValue {
    pub fn kind(&self) -> ReturnType {
        match self {
            ReturnValue::Int(_) => ReturnType::Int,
            ReturnValue::Long(_) => ReturnType::Long,
            ReturnValue::String(_) => ReturnType::String,
            ReturnValue::Bool(_) => ReturnType::Bool,
            ReturnValue::Void => ReturnType::Void,
            ReturnValue::VecBytes(_) => ReturnType::VecBytes,
        }
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind() as u8);
        match self {
            ReturnValue::Int(v) => buf.extend_from_slice(&v.to_le_bytes()),
            ReturnValue::Long(v) => buf.extend_from_slice(&v.to_le_bytes()),
            ReturnValue::Bool(v) => buf.push(*v as u8),
            ReturnValue::Void => {}
            ReturnValue::String(s) => {
                buf.extend_from_slice(&(s.len() as i32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            ReturnValue::VecBytes(v) => {
                buf.extend_from_slice(&(v.len() as i32).to_le_bytes());
                buf.extend_from_slice(v);
            }
        }
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn read_from(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let tag = *buf.get(*pos).ok_or_else(|| Error::msg("truncated return value"))?;
        *pos += 1;
        let kind = ReturnType::try_from(tag)?;
        match kind {
            ReturnType::Int => Ok(ReturnValue::Int(read_i32(buf, pos)?)),
            ReturnType::Long => Ok(ReturnValue::Long(read_i64(buf, pos)?)),
            ReturnType::Bool => {
                let b = *buf.get(*pos).ok_or_else(|| Error::msg("truncated bool"))?;
                *pos += 1;
                Ok(ReturnValue::Bool(b != 0))
            }
            ReturnType::Void => Ok(ReturnValue::Void),
            ReturnType::String => {
                let len = read_i32(buf, pos)? as usize;
                let s = read_bytes(buf, pos, len)?;
                Ok(ReturnValue::String(
                    String::from_utf8(s.to_vec()).map_err(|e| Error::msg(e.to_string()))?,
                ))
            }
            ReturnType::VecBytes => {
                let len = read_i32(buf, pos)? as usize;
                let bytes = read_bytes(buf, pos, len)?;
                Ok(ReturnValue::VecBytes(bytes.to_vec()))
            }
        }
    }
}

pub(crate) fn read_i32(buf: &[u8], pos: &mut usize) -> Result<i32> {
    let bytes = read_bytes(buf, pos, 4)?;
    Ok(i32::from_le_bytes(bytes.try_into().expect("checked len")))
}

pub(crate) fn read_i64(buf: &[u8], pos: &mut usize) -> Result<i64> {
    let bytes = read_bytes(buf, pos, 8)?;
    Ok(i64::from_le_bytes(bytes.try_into().expect("checked len")))
}

pub(crate) fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos.checked_add(len).ok_or_else(|| Error::msg("length overflow"))?;
    if end > buf.len() {
        bail!("truncated buffer: need {} bytes at {}, have {}", len, *pos, buf.len());
    }
    let slc = &buf[*pos..end];
    *pos = end;
    Ok(slc)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn round_trip_parameter_values() {
        let values = vec![
            ParameterValue::Int(-42),
            ParameterValue::Long(i64::MAX),
            ParameterValue::String("hello".to_string()),
            ParameterValue::Bool(true),
            ParameterValue::VecBytes(vec![1, 2, 3, 4, 5, 6]),
        ];
        for v in values {
            let mut buf = Vec::new();
            v.write_to(&mut buf);
            let mut pos = 0;
            let back = ParameterValue::read_from(&buf, &mut pos).unwrap();
            assert_eq!(v, back);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn round_trip_return_values() {
        let values = vec![
            ReturnValue::Int(7),
            ReturnValue::Long(-1),
            ReturnValue::String("world".to_string()),
            ReturnValue::Bool(false),
            ReturnValue::Void,
            ReturnValue::VecBytes(vec![9, 8, 7]),
        ];
        for v in values {
            let mut buf = Vec::new();
            v.write_to(&mut buf);
            let mut pos = 0;
            let back = ReturnValue::read_from(&buf, &mut pos).unwrap();
            assert_eq!(v, back);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let buf = [0xFFu8];
        let mut pos = 0;
        assert!(ParameterValue::read_from(&buf, &mut pos).is_err());
    }
}
