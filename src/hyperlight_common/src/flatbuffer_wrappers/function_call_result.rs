use alloc::string::ToString;
use alloc::vec::Vec;

use anyhow::{bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

use super::function_types::{read_i32, ReturnValue};

/// The outcome of a `FunctionCall`, written into the output buffer (for a
/// host→guest call) or the input buffer (for a guest→host call).
///
/// A non-zero `status` means the call failed on the callee side; the
/// paired error record lives in the guest-error or host-exception buffer,
/// not in this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionCallResult {
    Ok(ReturnValue),
    Err,
}

impl FunctionCallResult {
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            FunctionCallResult::Ok(v) => {
                body.extend_from_slice(&0i32.to_le_bytes());
                v.write_to(&mut body);
            }
            FunctionCallResult::Err => {
                body.extend_from_slice(&(-1i32).to_le_bytes());
            }
        }
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(&body);
        framed
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn decode(framed: &[u8]) -> Result<Self> {
        if framed.len() < 4 {
            bail!("function call result frame too short");
        }
        let len = u32::from_le_bytes(framed[0..4].try_into().expect("checked len")) as usize;
        let body = framed
            .get(4..4 + len)
            .ok_or_else(|| Error::msg("function call result frame length exceeds buffer"))?;
        let mut pos = 0usize;
        let status = read_i32(body, &mut pos)?;
        if status != 0 {
            return Ok(FunctionCallResult::Err);
        }
        let value = ReturnValue::read_from(body, &mut pos)?;
        Ok(FunctionCallResult::Ok(value))
    }
}

impl TryFrom<&[u8]> for FunctionCallResult {
    type Error = Error;
    fn try_from(framed: &[u8]) -> Result<Self> {
        Self::decode(framed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ok() {
        let res = FunctionCallResult::Ok(ReturnValue::Int(85));
        let encoded = res.encode();
        let decoded = FunctionCallResult::decode(&encoded).unwrap();
        assert_eq!(res, decoded);
    }

    #[test]
    fn round_trip_err() {
        let res = FunctionCallResult::Err;
        let encoded = res.encode();
        let decoded = FunctionCallResult::decode(&encoded).unwrap();
        assert_eq!(res, decoded);
    }
}
