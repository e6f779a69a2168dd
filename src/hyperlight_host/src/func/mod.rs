/// Small helpers used by the sandbox setup path.
pub(crate) mod exports;
/// A context for making one or more guest function calls without giving
/// up exclusive access to the sandbox between calls.
pub mod call_ctx;
/// Drives a single guest function call through the hypervisor or
/// in-process dispatcher and decodes its result.
pub(crate) mod guest_dispatch;
/// Checks the guest error buffer after a call and turns it into a `Result`.
pub(crate) mod guest_err;
/// Definitions and functionality to enable guest-to-host function calling,
/// also called "host functions".
///
/// This module includes functionality to do the following:
///
/// - Define several prototypes for what a host function must look like,
///   including the number of arguments (arity) they can have, supported
///   argument types, and supported return types
/// - Registering host functions to be callable by the guest
/// - Dynamically dispatching a call from the guest to the appropriate
///   host function
pub mod host_functions;
/// Definitions and functionality for supported parameter types.
pub(crate) mod param_type;
/// Definitions and functionality for supported return types.
pub(crate) mod ret_type;

use std::sync::{Arc, Mutex};

use hyperlight_common::flatbuffer_wrappers::function_types::{ParameterValue, ReturnValue};
pub use param_type::SupportedParameterType;
pub use ret_type::SupportedReturnType;

type HLFunc<'a> =
    Arc<Mutex<Box<dyn FnMut(Vec<ParameterValue>) -> anyhow::Result<ReturnValue> + 'a + Send>>>;

/// A boxed, type-erased host function, closed over whatever state its
/// registering closure captured.
#[derive(Clone)]
pub struct HyperlightFunction<'a>(HLFunc<'a>);

impl<'a> HyperlightFunction<'a> {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnMut(Vec<ParameterValue>) -> anyhow::Result<ReturnValue> + 'a + Send,
    {
        Self(Arc::new(Mutex::new(Box::new(f))))
    }

    pub(crate) fn call(&self, args: Vec<ParameterValue>) -> anyhow::Result<ReturnValue> {
        let mut f = self.0.lock().unwrap();
        f(args)
    }
}
