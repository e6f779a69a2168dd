use hyperlight_common::flatbuffer_wrappers::guest_error::ErrorCode;
use thiserror::Error;

/// All of the ways a sandbox operation can fail, grouped into the
/// taxonomy used to decide whether a failure leaves the sandbox `Ready`
/// or transitions it to `Poisoned`:
///
/// - validation/argument errors (caller mistakes) never poison;
/// - guest errors poison only for the "fatal" [`ErrorCode`] subset;
/// - hypervisor errors (faults, timeouts, hung cancellation) always poison;
/// - load errors prevent a sandbox from ever being constructed.
#[derive(Error, Debug)]
pub enum HyperlightError {
    /// A catch-all for failures that don't have a more specific variant.
    #[error("{0}")]
    Error(String),

    // --- validation errors (C6 argument encoding, C1 bounds checks) ---
    #[error("Array length parameter is missing for a vec<u8> parameter")]
    ArrayLengthMismatch,
    #[error("Offset {0:#x} + size {1} is out of bounds for a region of size {2:#x}")]
    OutOfBounds(u64, usize, u64),
    #[error("Snapshot length {0} does not match region size {1}")]
    SizeMismatch(usize, u64),
    #[error("Invalid function call type: expected {0}")]
    InvalidFunctionCallType(String),
    #[error("Unexpected number of arguments: expected {0}, got {1}")]
    UnexpectedNoOfArguments(usize, usize),
    #[error("Host function {0} was not found")]
    HostFunctionNotFound(String),
    #[error("Failed to acquire lock: {0}")]
    LockAttemptFailed(String),

    // --- guest errors (C6 guest->host path, C4 guest-error buffer) ---
    #[error("Guest error: {0:?}: {1}")]
    GuestError(ErrorCode, String),
    #[error("Guest aborted execution with code {0}")]
    GuestAborted(u8, String),

    // --- hypervisor errors (C5), always fatal to the sandbox ---
    #[error("No hypervisor (KVM) was found on this host")]
    NoHypervisorFound,
    #[error("The hypervisor faulted: {0}")]
    HypervisorFault(String),
    #[error("Execution was cancelled by the host")]
    ExecutionCanceledByHost,
    #[error("Failed to cancel guest execution")]
    HostFailedToCancelGuestExecution,
    #[error("Failed to cancel guest execution by sending signals")]
    HostFailedToCancelGuestExecutionSendingSignals,
    #[error("The vCPU did not exit within the cancellation grace period")]
    HungCancellation,
    #[error("Communication with the hypervisor handler thread failed: {0}")]
    HypervisorHandlerCommunicationFailure(String),
    #[error("Attempted to cancel guest execution on a hypervisor handler that had already finished")]
    HypervisorHandlerExecutionCancelAttemptOnFinishedExecution,
    #[error("Timed out waiting for a message from the hypervisor handler thread")]
    HypervisorHandlerMessageReceiveTimedout,
    #[error("This sandbox is poisoned and can no longer accept calls")]
    Poisoned,
    #[error("Only one run-from-binary sandbox may exist per process")]
    SingleInstance,

    // --- memory errors (C1/C3/C4) ---
    #[error("mmap failed: {0}")]
    MmapFailed(String),
    #[error("mprotect failed: {0}")]
    MprotectFailed(String),
    #[error("Failed to allocate {0} bytes of guest memory")]
    MemoryAllocationFailed(usize),
    #[error("Requested memory size {0:#x} is larger than the permitted maximum {1:#x}")]
    MemoryRequestTooBig(u64, u64),
    #[error("Guest offset {0:#x} is invalid for this region")]
    GuestOffsetIsInvalid(u64),

    // --- load errors (C2), fatal at construction time ---
    #[error("Not a valid PE image: bad DOS/NT signature")]
    BadSignature,
    #[error("Image is not PE32+ (64-bit)")]
    NotPE32Plus,
    #[error("PE image is truncated")]
    TruncatedImage,
    #[error("Unsupported base relocation type {0}")]
    UnsupportedReloc(u32),
    #[error("Integer overflow computing a PE-derived quantity")]
    IntegerOverflow,
    #[error("PE parsing failed: {0}")]
    LoadError(String),

    #[error(transparent)]
    AnyhowError(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// The `Result` type used throughout this crate.
pub type Result<T> = core::result::Result<T, HyperlightError>;

/// Construct a [`HyperlightError::Error`] from a `format!`-style message.
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {
        $crate::error::HyperlightError::Error(format!($msg))
    };
    ($msg:literal, $($arg:tt)*) => {
        $crate::error::HyperlightError::Error(format!($msg, $($arg)*))
    };
}

/// Log a formatted error at `error` level, then return it from the current
/// function. Saves a `tracing::error!(...)` / `return Err(...)` pair at
/// every early-return error site.
#[macro_export]
macro_rules! log_then_return {
    ($msg:literal $(,)?) => {
        {
            let __err = $crate::new_error!($msg);
            tracing::error!("{}", __err);
            return Err(__err);
        }
    };
    ($msg:literal, $($arg:tt)*) => {
        {
            let __err = $crate::new_error!($msg, $($arg)*);
            tracing::error!("{}", __err);
            return Err(__err);
        }
    };
    ($err:expr) => {
        {
            let __err: $crate::error::HyperlightError = $err;
            tracing::error!("{}", __err);
            return Err(__err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_guest_error_reported_with_code() {
        let err = HyperlightError::GuestError(ErrorCode::GsCheckFailed, "stack smashed".to_string());
        assert!(err.to_string().contains("stack smashed"));
    }
}
