use alloc::string::{String, ToString};
use alloc::vec::Vec;

use anyhow::{bail, Error, Result};
#[cfg(feature = "tracing")]
use tracing::{instrument, Span};

use super::function_types::{read_i32, ParameterType, ReturnType};

/// One entry of the host-function table: a name, its parameter types, and
/// its return type. The guest binary-searches this table by name, so the
/// table as a whole must be written sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFunctionDefinition {
    pub function_name: String,
    pub parameter_types: Vec<ParameterType>,
    pub return_type: ReturnType,
}

impl HostFunctionDefinition {
    pub fn new(
        function_name: String,
        parameter_types: Vec<ParameterType>,
        return_type: ReturnType,
    ) -> Self {
        Self {
            function_name,
            parameter_types,
            return_type,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.function_name.len() as i32).to_le_bytes());
        buf.extend_from_slice(self.function_name.as_bytes());
        buf.push(self.return_type as u8);
        buf.extend_from_slice(&(self.parameter_types.len() as i32).to_le_bytes());
        for p in &self.parameter_types {
            buf.push(*p as u8);
        }
    }

    fn decode(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let name_len = read_i32(buf, pos)? as usize;
        let name_bytes = buf
            .get(*pos..*pos + name_len)
            .ok_or_else(|| Error::msg("truncated host function name"))?;
        *pos += name_len;
        let function_name = core::str::from_utf8(name_bytes)
            .map_err(|e| Error::msg(e.to_string()))?
            .to_string();
        let return_tag = *buf.get(*pos).ok_or_else(|| Error::msg("truncated host function def"))?;
        *pos += 1;
        let return_type = ReturnType::try_from(return_tag)?;
        let num_params = read_i32(buf, pos)? as usize;
        let mut parameter_types = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            let tag = *buf.get(*pos).ok_or_else(|| Error::msg("truncated parameter type"))?;
            *pos += 1;
            parameter_types.push(ParameterType::try_from(tag)?);
        }
        Ok(Self {
            function_name,
            parameter_types,
            return_type,
        })
    }
}

/// The full, sorted-by-name host function table, written once into
/// `host_function_definition_size` bytes during sandbox construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFunctionDetails {
    pub host_functions: Option<Vec<HostFunctionDefinition>>,
}

impl HostFunctionDetails {
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn new(mut host_functions: Vec<HostFunctionDefinition>) -> Self {
        host_functions.sort_by(|a, b| a.function_name.cmp(&b.function_name));
        Self {
            host_functions: Some(host_functions),
        }
    }

    /// Binary-search the sorted table by name, the same strategy the guest
    /// uses on its copy of this table.
    pub fn find(&self, name: &str) -> Option<&HostFunctionDefinition> {
        let functions = self.host_functions.as_ref()?;
        functions
            .binary_search_by(|f| f.function_name.as_str().cmp(name))
            .ok()
            .map(|idx| &functions[idx])
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let functions = self.host_functions.as_deref().unwrap_or(&[]);
        buf.extend_from_slice(&(functions.len() as i32).to_le_bytes());
        for f in functions {
            f.encode(&mut buf);
        }
        buf
    }

    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let num = read_i32(buf, &mut pos)? as usize;
        let mut host_functions = Vec::with_capacity(num);
        for _ in 0..num {
            host_functions.push(HostFunctionDefinition::decode(buf, &mut pos)?);
        }
        Ok(Self {
            host_functions: if host_functions.is_empty() { None } else { Some(host_functions) },
        })
    }
}

impl TryFrom<&[u8]> for HostFunctionDetails {
    type Error = Error;
    fn try_from(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            bail!("empty host function details buffer");
        }
        Self::decode(buf)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn round_trip_and_sorted_lookup() {
        let details = HostFunctionDetails::new(vec![
            HostFunctionDefinition::new("Zeta".to_string(), vec![ParameterType::Int], ReturnType::Int),
            HostFunctionDefinition::new(
                "Alpha".to_string(),
                vec![ParameterType::String],
                ReturnType::String,
            ),
        ]);
        let names: Vec<&str> = details
            .host_functions
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| f.function_name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);

        let encoded = details.encode();
        let decoded = HostFunctionDetails::decode(&encoded).unwrap();
        assert_eq!(details, decoded);

        assert!(decoded.find("Alpha").is_some());
        assert!(decoded.find("Missing").is_none());
    }
}
