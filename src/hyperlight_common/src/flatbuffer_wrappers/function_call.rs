use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

use super::function_types::{read_i32, ParameterValue, ReturnType};

/// The type of function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCallType {
    /// The function call is to a guest function.
    Guest = 0,
    /// The function call is to a host function.
    Host = 1,
}

impl TryFrom<u8> for FunctionCallType {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FunctionCallType::Guest),
            1 => Ok(FunctionCallType::Host),
            other => bail!("Invalid function call type tag: {}", other),
        }
    }
}

/// `FunctionCall` represents a call to a function in the guest or host,
/// serialized into the input or output buffer respectively.
///
/// On the wire this is a size-prefixed frame: a leading `u32` total length
/// followed by the fields below in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// The function name
    pub function_name: String,
    /// The parameters for the function call.
    pub parameters: Option<Vec<ParameterValue>>,
    pub function_call_type: FunctionCallType,
    pub expected_return_type: ReturnType,
}

impl FunctionCall {
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn new(
        function_name: String,
        parameters: Option<Vec<ParameterValue>>,
        function_call_type: FunctionCallType,
        expected_return_type: ReturnType,
    ) -> Self {
        Self {
            function_name,
            parameters,
            function_call_type,
            expected_return_type,
        }
    }

    pub fn function_call_type(&self) -> FunctionCallType {
        self.function_call_type
    }

    /// Encode into a size-prefixed frame, including the leading length word.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(self.function_call_type as u8);
        body.push(self.expected_return_type as u8);
        body.extend_from_slice(&(self.function_name.len() as i32).to_le_bytes());
        body.extend_from_slice(self.function_name.as_bytes());
        let params = self.parameters.as_deref().unwrap_or(&[]);
        body.extend_from_slice(&(params.len() as i32).to_le_bytes());
        for p in params {
            p.write_to(&mut body);
        }

        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(&body);
        framed
    }

    /// Decode a size-prefixed frame produced by [`Self::encode`].
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn decode(framed: &[u8]) -> Result<Self> {
        if framed.len() < 4 {
            bail!("function call frame too short");
        }
        let len = u32::from_le_bytes(framed[0..4].try_into().expect("checked len")) as usize;
        let body = framed
            .get(4..4 + len)
            .ok_or_else(|| Error::msg("function call frame length exceeds buffer"))?;
        Self::parse_body(body)
    }

    /// Parse the un-prefixed body written by [`Self::encode`] (everything
    /// after the leading length word).
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    fn parse_body(body: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let call_type_tag = *body.get(pos).ok_or_else(|| Error::msg("truncated function call"))?;
        pos += 1;
        let function_call_type = FunctionCallType::try_from(call_type_tag)?;
        let return_type_tag = *body.get(pos).ok_or_else(|| Error::msg("truncated function call"))?;
        pos += 1;
        let expected_return_type = ReturnType::try_from(return_type_tag)?;

        let name_len = read_i32(body, &mut pos)? as usize;
        let name_bytes = body
            .get(pos..pos + name_len)
            .ok_or_else(|| Error::msg("truncated function name"))?;
        pos += name_len;
        let function_name = core::str::from_utf8(name_bytes)
            .map_err(|e| Error::msg(e.to_string()))?
            .to_string();

        let num_params = read_i32(body, &mut pos)? as usize;
        let mut parameters = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            parameters.push(ParameterValue::read_from(body, &mut pos)?);
        }
        let parameters = if parameters.is_empty() { None } else { Some(parameters) };

        Ok(Self {
            function_name,
            parameters,
            function_call_type,
            expected_return_type,
        })
    }
}

#[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
pub fn validate_guest_function_call_buffer(function_call_buffer: &[u8]) -> Result<()> {
    let call = FunctionCall::decode(function_call_buffer)?;
    match call.function_call_type {
        FunctionCallType::Guest => Ok(()),
        other => bail!("Invalid function call type: {:?}", other),
    }
}

#[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
pub fn validate_host_function_call_buffer(function_call_buffer: &[u8]) -> Result<()> {
    let call = FunctionCall::decode(function_call_buffer)?;
    match call.function_call_type {
        FunctionCallType::Host => Ok(()),
        other => bail!("Invalid function call type: {:?}", other),
    }
}

impl TryFrom<&[u8]> for FunctionCall {
    type Error = Error;
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    fn try_from(framed: &[u8]) -> Result<Self> {
        Self::decode(framed)
    }
}

impl TryFrom<FunctionCall> for Vec<u8> {
    type Error = Error;
    fn try_from(value: FunctionCall) -> Result<Vec<u8>> {
        Ok(value.encode())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn round_trip_guest_call() {
        let call = FunctionCall::new(
            "PrintNineArgs".to_string(),
            Some(vec![
                ParameterValue::String("Test9".to_string()),
                ParameterValue::Int(8),
                ParameterValue::Long(9),
                ParameterValue::Bool(true),
            ]),
            FunctionCallType::Guest,
            ReturnType::Int,
        );
        let encoded = call.encode();
        let decoded = FunctionCall::decode(&encoded).unwrap();
        assert_eq!(call, decoded);
    }

    #[test]
    fn round_trip_host_call_no_params() {
        let call = FunctionCall::new(
            "HostMethod1".to_string(),
            None,
            FunctionCallType::Host,
            ReturnType::Int,
        );
        let encoded = call.encode();
        let decoded = FunctionCall::decode(&encoded).unwrap();
        assert_eq!(decoded.parameters, None);
        assert_eq!(decoded.function_call_type, FunctionCallType::Host);
        assert!(validate_host_function_call_buffer(&encoded).is_ok());
        assert!(validate_guest_function_call_buffer(&encoded).is_err());
    }
}
