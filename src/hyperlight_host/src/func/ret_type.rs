use hyperlight_common::flatbuffer_wrappers::function_types::{ReturnType, ReturnValue};

use crate::{new_error, Result};

/// A type a host function may return. Implemented for every variant
/// `ReturnValue` carries, plus `()` for `Void`.
pub trait SupportedReturnType<T> {
    /// The `ReturnType` tag this type encodes as.
    fn get_hyperlight_type() -> ReturnType;
    /// Wrap `self` into the `ReturnValue` carried on the wire.
    fn get_hyperlight_value(self) -> ReturnValue;
    /// Unwrap a `ReturnValue` back into `T`, failing if the tag doesn't match.
    fn get_inner(value: ReturnValue) -> Result<T>;
}

macro_rules! supported_return_type {
    ($type:ty, $enum_value:ident, $rtype:ident) => {
        impl SupportedReturnType<$type> for $type {
            fn get_hyperlight_type() -> ReturnType {
                ReturnType::$rtype
            }

            fn get_hyperlight_value(self) -> ReturnValue {
                ReturnValue::$enum_value(self)
            }

            fn get_inner(value: ReturnValue) -> Result<$type> {
                match value {
                    ReturnValue::$enum_value(i) => Ok(i),
                    other => Err(new_error!(
                        "expected return value of type {}, got {:?}",
                        stringify!($type),
                        other
                    )),
                }
            }
        }
    };
}

supported_return_type!(i32, Int, Int);
supported_return_type!(i64, Long, Long);
supported_return_type!(String, String, String);
supported_return_type!(bool, Bool, Bool);
supported_return_type!(Vec<u8>, VecBytes, VecBytes);

impl SupportedReturnType<()> for () {
    fn get_hyperlight_type() -> ReturnType {
        ReturnType::Void
    }

    fn get_hyperlight_value(self) -> ReturnValue {
        ReturnValue::Void
    }

    fn get_inner(value: ReturnValue) -> Result<()> {
        match value {
            ReturnValue::Void => Ok(()),
            other => Err(new_error!("expected Void return value, got {:?}", other)),
        }
    }
}
