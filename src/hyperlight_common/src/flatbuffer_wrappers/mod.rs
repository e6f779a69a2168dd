/// A call to a guest or host function, size-prefixed on the wire.
pub mod function_call;
/// The outcome of a `FunctionCall`, size-prefixed on the wire.
pub mod function_call_result;
/// Parameter and return value types shared by [`function_call`].
pub mod function_types;
/// The error record a guest writes back to the host when a call fails.
pub mod guest_error;
/// Log records forwarded from the guest through the `LOG` port.
pub mod guest_log_data;
/// The sorted host-function table handed to the guest at startup.
pub mod host_function_details;
