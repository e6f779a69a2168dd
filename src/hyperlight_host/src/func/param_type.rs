use hyperlight_common::flatbuffer_wrappers::function_types::{ParameterType, ParameterValue};

use crate::{new_error, Result};

/// A type that can be passed from the host to the guest as a function
/// parameter. Implemented for every variant `ParameterValue` carries.
pub trait SupportedParameterType<T> {
    /// The `ParameterType` tag this type encodes as.
    fn get_hyperlight_type() -> ParameterType;
    /// Wrap `self` into the `ParameterValue` carried on the wire.
    fn get_hyperlight_value(&self) -> ParameterValue;
    /// Unwrap a `ParameterValue` back into `T`, failing if the tag doesn't match.
    fn get_inner(value: ParameterValue) -> Result<T>;
}

macro_rules! supported_parameter_type {
    ($type:ty, $enum_value:ident, $ptype:ident) => {
        impl SupportedParameterType<$type> for $type {
            fn get_hyperlight_type() -> ParameterType {
                ParameterType::$ptype
            }

            fn get_hyperlight_value(&self) -> ParameterValue {
                ParameterValue::$enum_value(self.clone())
            }

            fn get_inner(value: ParameterValue) -> Result<$type> {
                match value {
                    ParameterValue::$enum_value(i) => Ok(i),
                    other => Err(new_error!(
                        "expected parameter of type {}, got {:?}",
                        stringify!($type),
                        other
                    )),
                }
            }
        }
    };
}

supported_parameter_type!(i32, Int, Int);
supported_parameter_type!(i64, Long, Long);
supported_parameter_type!(String, String, String);
supported_parameter_type!(bool, Bool, Bool);
supported_parameter_type!(Vec<u8>, VecBytes, VecBytes);
