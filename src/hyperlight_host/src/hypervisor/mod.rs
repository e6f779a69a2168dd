///! Functionality to manipulate KVM-based virtual machines.
#[cfg(target_os = "linux")]
pub(crate) mod kvm;
///! KVM register definitions
#[cfg(target_os = "linux")]
pub(crate) mod kvm_regs;
///! Guest memory region registration against a KVM VM
#[cfg(target_os = "linux")]
pub(crate) mod kvm_mem;
///! The concrete KVM-backed `Hypervisor` implementation
#[cfg(target_os = "linux")]
pub(crate) mod kvm_driver;

pub(crate) mod handlers;
pub(crate) mod hypervisor_handler;

use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{Receiver, Sender};

use self::handlers::{MemAccessHandlerWrapper, OutBHandlerWrapper};
use self::hypervisor_handler::{HandlerMsg, VCPUAction};
use crate::mem::ptr::RawPtr;
use crate::Result;

/// Returns `true` if a hardware-virtualized hypervisor this crate can use
/// (currently: KVM) is present on this machine.
pub(crate) fn is_hypervisor_present() -> bool {
    #[cfg(target_os = "linux")]
    {
        kvm::is_present().is_ok()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// One virtualized vCPU and the single guest binary running on it.
/// Implemented once, by [`kvm_driver::KvmDriver`]; the trait exists so the
/// hypervisor handler thread and `HypervisorWrapper` don't need to depend
/// on the concrete backend.
pub(crate) trait Hypervisor: Sync + Send {
    /// Set the PEB address, a random seed, and the host's page size in the
    /// guest, then run until the guest signals it has finished
    /// initializing (or a fault/timeout occurs).
    fn initialise(
        &mut self,
        peb_addr: RawPtr,
        seed: u64,
        page_size: u32,
        outb_handle_fn: OutBHandlerWrapper,
        mem_access_fn: MemAccessHandlerWrapper,
    ) -> Result<()>;

    /// Run the vCPU starting at `dispatch_func_addr`, servicing `OUT`
    /// exits via `outb_handle_fn` until the guest halts, faults, is
    /// cancelled, or a memory-access violation is reported through
    /// `mem_access_fn`.
    fn dispatch_call_from_host(
        &mut self,
        dispatch_func_addr: RawPtr,
        outb_handle_fn: OutBHandlerWrapper,
        mem_access_fn: MemAccessHandlerWrapper,
    ) -> Result<()>;

    fn setup_hypervisor_handler_communication_channels(&mut self);
    fn get_to_handler_tx(&self) -> Sender<VCPUAction>;
    fn drop_to_handler_tx(&mut self);
    fn get_from_handler_rx(&self) -> Receiver<HandlerMsg>;
    fn get_from_handler_tx(&self) -> Sender<HandlerMsg>;
    fn get_to_handler_rx(&self) -> Receiver<VCPUAction>;

    /// Reset the "has this execution been cancelled" flag ahead of a new
    /// `initialise`/`dispatch_call_from_host` call.
    fn set_termination_status(&mut self, value: bool);
    /// A handle to the flag set by [`Hypervisor::set_termination_status`],
    /// shared with whichever thread calls [`terminate_execution`] on this
    /// vCPU's behalf.
    fn get_termination_status(&self) -> Arc<AtomicCell<bool>>;
    /// Linux-only: reset the "a cancellation signal was sent and received"
    /// flag ahead of a new call.
    fn set_run_cancelled(&mut self, value: bool);
    /// Linux-only: a handle to the flag the run loop sets once it has
    /// observed `EINTR` from a cancellation signal.
    fn get_run_cancelled(&self) -> Arc<AtomicCell<bool>>;
    /// Linux-only: record the pthread id of the thread about to run the
    /// vCPU, so [`terminate_execution`] can signal it.
    fn set_thread_id(&mut self, thread_id: libc::pthread_t);
    fn get_thread_id(&self) -> libc::pthread_t;
    fn set_handler_join_handle(&mut self, handle: JoinHandle<Result<()>>);
    fn get_mut_handler_join_handle(&mut self) -> &mut Option<JoinHandle<Result<()>>>;

    fn as_any(&self) -> &dyn Any;
}

/// Send repeated `SIGRTMIN` signals to the thread running the vCPU until
/// either it acknowledges cancellation (`run_cancelled` becomes `true`) or
/// `max_wait_for_cancellation` elapses. Returns `Ok(())` if the vCPU
/// acknowledged in time, `Err` (always
/// [`crate::HyperlightError::HostFailedToCancelGuestExecutionSendingSignals`])
/// if it did not.
#[cfg(target_os = "linux")]
pub(crate) fn terminate_execution(
    max_execution_time: Duration,
    termination_status: Arc<AtomicCell<bool>>,
    run_cancelled: Arc<AtomicCell<bool>>,
    thread_id: libc::pthread_t,
    max_wait_for_cancellation: Duration,
) -> Result<()> {
    use std::time::Instant;

    use vmm_sys_util::signal::SIGRTMIN;

    termination_status.store(true);

    let start = Instant::now();
    while !run_cancelled.load() {
        unsafe {
            libc::pthread_kill(thread_id, SIGRTMIN());
        }
        if start.elapsed() > max_wait_for_cancellation {
            return Err(crate::HyperlightError::HostFailedToCancelGuestExecutionSendingSignals(
                "timed out waiting for the vCPU thread to acknowledge cancellation".to_string(),
            ));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
