use tracing::instrument;

use crate::mem::mgr::SandboxMemoryManager;
use crate::Result;

/// Wraps a [`SandboxMemoryManager`], giving every sandbox facade a single,
/// shared way to reach it regardless of which lifecycle state it is in.
#[derive(Debug)]
pub(crate) struct MemMgrWrapper(SandboxMemoryManager);

impl MemMgrWrapper {
    pub(crate) fn new(mgr: SandboxMemoryManager) -> Self {
        Self(mgr)
    }

    pub(crate) fn as_ref(&self) -> &SandboxMemoryManager {
        &self.0
    }

    pub(crate) fn as_mut(&mut self) -> &mut SandboxMemoryManager {
        &mut self.0
    }

    pub(crate) fn unwrap(self) -> SandboxMemoryManager {
        self.0
    }

    /// Check the stack guard cookie written to guest memory against the
    /// one the manager wrote at load time. `Ok(false)` means the guest
    /// corrupted its own stack guard; `Err` means the guard could not be
    /// read at all.
    #[instrument(err(Debug), skip(self))]
    pub(crate) fn check_stack_guard(&self) -> Result<bool> {
        self.0.check_stack_guard()
    }
}
