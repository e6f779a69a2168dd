use anyhow::Result;
use std::sync::{Arc, Mutex};

/// The trait representing custom logic to handle the case when
/// a Hypervisor's virtual CPU (vCPU) informs Hyperlight the guest
/// has initiated an outb operation.
pub trait OutBHandlerCaller {
    fn call(&mut self, port: u16, payload: u64) -> Result<()>;
}

/// A convenient type representing a common way `OutBHandler` implementations
/// are passed as parameters to functions
///
/// Note: This needs to be wrapped in a Mutex to be able to grab a mutable
/// reference to the underlying data (i.e., handle_outb in `Sandbox` takes
/// a &mut self). It must be `'static` because it is moved into the
/// hypervisor handler thread.
pub type OutBHandlerWrapper = Arc<Mutex<dyn OutBHandlerCaller + Send + 'static>>;

pub(crate) type OutBHandlerFunction = Box<dyn FnMut(u16, u64) -> Result<()> + Send + 'static>;

/// A `OutBHandler` implementation using a `OutBHandlerFunction`
pub(crate) struct OutBHandler(OutBHandlerFunction);

impl From<OutBHandlerFunction> for OutBHandler {
    fn from(func: OutBHandlerFunction) -> Self {
        Self(func)
    }
}

impl OutBHandlerCaller for OutBHandler {
    fn call(&mut self, port: u16, payload: u64) -> Result<()> {
        (self.0)(port, payload)
    }
}

/// The trait representing custom logic to handle the case when
/// a Hypervisor's virtual CPU (vCPU) informs Hyperlight a memory access
/// outside the designated address space has occured.
pub trait MemAccessHandlerCaller {
    fn call(&mut self) -> Result<()>;
}

/// A convenient type representing a common way `MemAccessHandler` implementations
/// are passed as parameters to functions
///
/// Note: This needs to be wrapped in a Mutex to be able to grab a mutable
/// reference to the underlying data (i.e., handle_mmio_exit in `Sandbox` takes
/// a &mut self).
pub type MemAccessHandlerWrapper = Arc<Mutex<dyn MemAccessHandlerCaller + Send + 'static>>;

pub(crate) type MemAccessHandlerFunction = Box<dyn FnMut() -> Result<()> + Send + 'static>;

/// A `MemAccessHandler` implementation using `MemAccessHandlerFunction`.
pub(crate) struct MemAccessHandler(MemAccessHandlerFunction);

impl From<MemAccessHandlerFunction> for MemAccessHandler {
    fn from(func: MemAccessHandlerFunction) -> Self {
        Self(func)
    }
}

impl MemAccessHandlerCaller for MemAccessHandler {
    fn call(&mut self) -> Result<()> {
        (self.0)()
    }
}
