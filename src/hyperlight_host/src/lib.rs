//! An SDK for executing small, untrusted, statically-linked guest binaries
//! inside a minimal hardware-virtualized sandbox.
//!
//! A [`sandbox::UninitializedSandbox`] is built from a guest binary path and
//! a [`sandbox::SandboxConfiguration`], evolved into an
//! [`sandbox::MultiUseSandbox`] or [`sandbox::SingleUseSandbox`], and then
//! driven through repeated guest-function calls. See the `sandbox` module
//! for the full lifecycle.
#![deny(dead_code, unused_mut)]

/// Dealing with errors, including errors that cross the host/guest boundary.
pub mod error;
/// Host- and guest-function call plumbing: typed registration, dispatch,
/// and the per-call guest context.
#[deny(missing_docs)]
pub mod func;
/// The hypervisor `Driver` abstraction (KVM and in-process backends) and
/// the cancellation-timer handler that wraps it.
pub mod hypervisor;
/// Shared memory, the PE loader, the memory layout schedule, and the
/// memory manager that composes them.
pub mod mem;
/// The sandbox lifecycle facade: `UninitializedSandbox` ->
/// `MultiUseSandbox` / `SingleUseSandbox`.
#[deny(missing_docs)]
pub mod sandbox;
/// A typestate pattern for expressing valid sandbox-lifecycle transitions
/// at the type level.
pub mod sandbox_state;

/// Prometheus-backed counters and histograms for sandbox operations.
pub(crate) mod metrics;
/// Signal-based vCPU interruption used to implement call cancellation.
pub(crate) mod signal_handlers;

pub use error::{HyperlightError, Result};
pub use sandbox::{GuestBinary, MultiUseSandbox, SandboxConfiguration, SandboxRunOptions, SingleUseSandbox, UninitializedSandbox};
