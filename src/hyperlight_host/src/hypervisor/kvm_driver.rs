use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, Receiver, Sender};
use kvm_ioctls::{VcpuExit, VcpuFd, VmFd};

use super::handlers::{MemAccessHandlerWrapper, OutBHandlerWrapper};
use super::hypervisor_handler::{HandlerMsg, VCPUAction};
use super::kvm_mem::map_vm_memory_region_raw;
use super::kvm_regs::{set_long_mode, Regs};
use super::{is_hypervisor_present, Hypervisor};
use crate::mem::ptr::RawPtr;
use crate::mem::shared_mem::SharedMemory;
use crate::{log_then_return, HyperlightError, Result};

/// Return `true` if KVM is usable on this machine.
pub(crate) fn is_kvm_present() -> bool {
    is_hypervisor_present()
}

/// A single vCPU running entirely inside KVM, with a single identity-mapped
/// guest memory region. One `KvmDriver` is created per sandbox and lives
/// for the sandbox's whole lifetime; every guest call re-enters the same
/// vCPU at a new `rip`.
pub(crate) struct KvmDriver {
    vm: VmFd,
    vcpu: VcpuFd,
    mem_slot: u32,
    entrypoint: u64,
    orig_rsp: u64,

    termination_status: Arc<AtomicCell<bool>>,
    run_cancelled: Arc<AtomicCell<bool>>,
    thread_id: libc::pthread_t,

    to_handler_tx: Option<Sender<VCPUAction>>,
    to_handler_rx: Option<Receiver<VCPUAction>>,
    from_handler_tx: Option<Sender<HandlerMsg>>,
    from_handler_rx: Option<Receiver<HandlerMsg>>,
    handler_join_handle: Option<JoinHandle<Result<()>>>,
}

impl KvmDriver {
    /// Create a new driver with a single vCPU, map all of `guest_mem` into
    /// it as one region starting at `guest_base_addr`, and set up long mode
    /// with `pml4_addr` as the top-level page table.
    pub(crate) fn new(
        guest_mem: &SharedMemory,
        guest_base_addr: u64,
        pml4_addr: u64,
        entrypoint: u64,
        rsp: u64,
    ) -> Result<Self> {
        let kvm = super::kvm::open()?;
        let vm = super::kvm::create_vm(&kvm)?;
        let vcpu = super::kvm::create_vcpu(&vm)?;

        let mem_slot = map_vm_memory_region_raw(
            &vm,
            guest_base_addr,
            guest_mem.raw_ptr(),
            guest_mem.mem_size() as u64,
        )?;

        let mut sregs = super::kvm::get_sregisters(&vcpu)?;
        set_long_mode(&mut sregs, pml4_addr);
        super::kvm::set_sregisters(&vcpu, &sregs)?;

        let regs = Regs {
            rip: entrypoint,
            rsp,
            rflags: 0x2,
            ..Default::default()
        };
        super::kvm::set_registers(&vcpu, &regs)?;

        Ok(Self {
            vm,
            vcpu,
            mem_slot,
            entrypoint,
            orig_rsp: rsp,
            termination_status: Arc::new(AtomicCell::new(false)),
            run_cancelled: Arc::new(AtomicCell::new(false)),
            thread_id: 0,
            to_handler_tx: None,
            to_handler_rx: None,
            from_handler_tx: None,
            from_handler_rx: None,
            handler_join_handle: None,
        })
    }

    /// Run the vCPU from `rip`/`rsp` until it halts, faults, or is
    /// cancelled, calling `outb_handle_fn` for every `OUT` exit.
    fn run_loop(
        &mut self,
        rip: u64,
        rsp: u64,
        outb_handle_fn: OutBHandlerWrapper,
        _mem_access_fn: MemAccessHandlerWrapper,
    ) -> Result<()> {
        let regs = Regs {
            rip,
            rsp,
            rflags: 0x2,
            ..Default::default()
        };
        super::kvm::set_registers(&self.vcpu, &regs)?;

        loop {
            match self.vcpu.run() {
                Ok(VcpuExit::Hlt) => return Ok(()),
                Ok(VcpuExit::IoOut(port, data)) => {
                    let mut payload = [0u8; 8];
                    let len = data.len().min(8);
                    payload[..len].copy_from_slice(&data[..len]);
                    let value = u64::from_le_bytes(payload);
                    outb_handle_fn
                        .lock()
                        .map_err(|e| {
                            HyperlightError::LockAttemptFailed(format!(
                                "failed to lock outb handler: {e}"
                            ))
                        })?
                        .call(port, value)?;
                }
                Ok(exit) => {
                    log_then_return!(HyperlightError::HypervisorFault(format!(
                        "unexpected vCPU exit: {:?}",
                        exit
                    )));
                }
                Err(e) if e.errno() == libc::EINTR => {
                    self.run_cancelled.store(true);
                    log_then_return!(HyperlightError::ExecutionCanceledByHost);
                }
                Err(e) => {
                    log_then_return!(HyperlightError::HypervisorFault(e.to_string()));
                }
            }
        }
    }
}

impl Hypervisor for KvmDriver {
    fn initialise(
        &mut self,
        peb_addr: RawPtr,
        seed: u64,
        page_size: u32,
        outb_handle_fn: OutBHandlerWrapper,
        mem_access_fn: MemAccessHandlerWrapper,
    ) -> Result<()> {
        let regs = Regs {
            rip: self.entrypoint,
            rsp: self.orig_rsp,
            rcx: u64::from(peb_addr),
            rdx: seed,
            r8: u64::from(page_size),
            rflags: 0x2,
            ..Default::default()
        };
        super::kvm::set_registers(&self.vcpu, &regs)?;
        self.run_loop(self.entrypoint, self.orig_rsp, outb_handle_fn, mem_access_fn)
    }

    fn dispatch_call_from_host(
        &mut self,
        dispatch_func_addr: RawPtr,
        outb_handle_fn: OutBHandlerWrapper,
        mem_access_fn: MemAccessHandlerWrapper,
    ) -> Result<()> {
        self.run_loop(
            u64::from(dispatch_func_addr),
            self.orig_rsp,
            outb_handle_fn,
            mem_access_fn,
        )
    }

    fn setup_hypervisor_handler_communication_channels(&mut self) {
        let (to_handler_tx, to_handler_rx) = bounded(1);
        let (from_handler_tx, from_handler_rx) = bounded(1);
        self.to_handler_tx = Some(to_handler_tx);
        self.to_handler_rx = Some(to_handler_rx);
        self.from_handler_tx = Some(from_handler_tx);
        self.from_handler_rx = Some(from_handler_rx);
    }

    fn get_to_handler_tx(&self) -> Sender<VCPUAction> {
        self.to_handler_tx.clone().expect("communication channels not set up")
    }

    fn drop_to_handler_tx(&mut self) {
        self.to_handler_tx = None;
    }

    fn get_from_handler_rx(&self) -> Receiver<HandlerMsg> {
        self.from_handler_rx.clone().expect("communication channels not set up")
    }

    fn get_from_handler_tx(&self) -> Sender<HandlerMsg> {
        self.from_handler_tx.clone().expect("communication channels not set up")
    }

    fn get_to_handler_rx(&self) -> Receiver<VCPUAction> {
        self.to_handler_rx.clone().expect("communication channels not set up")
    }

    fn set_termination_status(&mut self, value: bool) {
        self.termination_status.store(value);
    }

    fn get_termination_status(&self) -> Arc<AtomicCell<bool>> {
        self.termination_status.clone()
    }

    fn set_run_cancelled(&mut self, value: bool) {
        self.run_cancelled.store(value);
    }

    fn get_run_cancelled(&self) -> Arc<AtomicCell<bool>> {
        self.run_cancelled.clone()
    }

    fn set_thread_id(&mut self, thread_id: libc::pthread_t) {
        self.thread_id = thread_id;
    }

    fn get_thread_id(&self) -> libc::pthread_t {
        self.thread_id
    }

    fn set_handler_join_handle(&mut self, handle: JoinHandle<Result<()>>) {
        self.handler_join_handle = Some(handle);
    }

    fn get_mut_handler_join_handle(&mut self) -> &mut Option<JoinHandle<Result<()>>> {
        &mut self.handler_join_handle
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for KvmDriver {
    fn drop(&mut self) {
        let _ = super::kvm_mem::unmap_vm_memory_region_raw(&self.vm, &mut self.mem_slot);
    }
}

