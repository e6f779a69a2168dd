use std::fs::File;
use std::io::Read as _;

use hyperlight_common::flatbuffer_wrappers::function_call::{FunctionCall, FunctionCallType};
use hyperlight_common::flatbuffer_wrappers::function_call_result::FunctionCallResult;
use hyperlight_common::flatbuffer_wrappers::function_types::{
    ParameterValue, ReturnType, ReturnValue,
};
use hyperlight_common::flatbuffer_wrappers::guest_error::{ErrorCode, GuestError};
use hyperlight_common::flatbuffer_wrappers::guest_log_data::GuestLogData;
use hyperlight_common::flatbuffer_wrappers::host_function_details::HostFunctionDetails;
use tracing::{instrument, Span};

use super::layout::SandboxMemoryLayout;
use super::pe::pe_info::PEInfo;
use super::ptr::{GuestPtr, HostPtr, RawPtr};
use super::ptr_addr_space::{GuestAddressSpace, HostAddressSpace};
use super::ptr_offset::Offset;
use super::shared_mem::SharedMemory;
use super::shared_mem_snapshot::SharedMemorySnapshot;
use crate::sandbox::SandboxConfiguration;
use crate::{new_error, Result};

/// A page table entry granting read, write and present permissions to
/// whatever it points at.
const PAGE_PRESENT_RW: u64 = 0x3;
/// Set on a PD entry to mark it as a 2MiB large page rather than a
/// pointer to a page table.
const PAGE_SIZE_2MB: u64 = 0x80;
const TWO_MIB: u64 = 0x200000;

/// Owns the guest's [`SharedMemory`] region and the [`SandboxMemoryLayout`]
/// describing it, and mediates every read and write a sandbox needs to make
/// of that memory: loading the guest binary, setting up the page tables
/// handed to the hypervisor, pushing and popping function call frames, and
/// reading back guest errors and log records.
pub struct SandboxMemoryManager {
    /// The configuration this manager's memory was sized from.
    pub mem_cfg: SandboxConfiguration,
    /// Whether the guest entry point runs directly on the host thread
    /// (`true`) or under a hypervisor (`false`).
    pub run_from_process_memory: bool,
    mem_snapshot: Option<SharedMemorySnapshot>,
    /// The memory region itself.
    pub shared_mem: SharedMemory,
    /// The schedule of offsets within `shared_mem`.
    pub layout: SandboxMemoryLayout,
    /// The address (guest or host, depending on `run_from_process_memory`)
    /// the guest's code was loaded at.
    pub load_addr: RawPtr,
    /// The offset of the entrypoint from the start of the loaded image.
    pub entrypoint_offset: Offset,
    /// The cookie most recently written by [`Self::set_stack_guard`].
    stack_guard_cookie: [u8; 16],
}

impl SandboxMemoryManager {
    /// Read, relocate and load a guest binary from `guest_bin_path` into a
    /// freshly-allocated `SharedMemory` region, and write the resulting
    /// memory layout into it.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn load_guest_binary_into_memory(
        cfg: SandboxConfiguration,
        guest_bin_path: &str,
        run_from_process_memory: bool,
    ) -> Result<Self> {
        let mut pe_bytes = Vec::new();
        File::open(guest_bin_path)?.read_to_end(&mut pe_bytes)?;
        let pe_info = PEInfo::new(&pe_bytes)?;

        let stack_size = cfg.get_stack_size(&pe_info);
        let heap_size = cfg.get_heap_size(&pe_info);
        let layout = SandboxMemoryLayout::new(
            cfg,
            pe_info.get_payload_len(),
            usize::try_from(stack_size)?,
            usize::try_from(heap_size)?,
        )?;
        let mem_size = layout.get_memory_size()?;
        let mut shared_mem = SharedMemory::new(mem_size)?;

        let (load_addr, guest_offset): (RawPtr, usize) = if run_from_process_memory {
            let addr = shared_mem.calculate_address(SandboxMemoryLayout::CODE_OFFSET)?;
            (RawPtr::from(u64::try_from(addr)?), shared_mem.base_addr())
        } else {
            (
                RawPtr::from(SandboxMemoryLayout::GUEST_CODE_ADDRESS as u64),
                SandboxMemoryLayout::BASE_ADDRESS,
            )
        };

        let mut payload = pe_info.get_payload().to_vec();
        let patches = pe_info.get_exe_relocation_patches(&payload, load_addr.0 as usize)?;
        PEInfo::apply_relocation_patches(&mut payload, patches)?;
        shared_mem.copy_from_slice(&payload, SandboxMemoryLayout::CODE_OFFSET)?;
        shared_mem.write_u64(usize::try_from(layout.get_code_pointer_offset())?, load_addr.0)?;

        let run_mode_flag = if run_from_process_memory {
            SandboxMemoryLayout::RUN_MODE_IN_PROCESS
        } else {
            SandboxMemoryLayout::RUN_MODE_HYPERVISOR
        };
        layout.write(&mut shared_mem, guest_offset, mem_size, run_mode_flag)?;

        let entrypoint_offset = Offset::try_from(pe_info.entry_point_offset())?;

        Ok(Self {
            mem_cfg: cfg,
            run_from_process_memory,
            mem_snapshot: None,
            shared_mem,
            layout,
            load_addr,
            entrypoint_offset,
            stack_guard_cookie: [0u8; 16],
        })
    }

    /// Whether the guest entry point runs directly on the host thread
    /// rather than under a hypervisor.
    pub fn is_in_process(&self) -> bool {
        self.run_from_process_memory
    }

    /// Get a mutable reference to the `SharedMemory` backing this manager.
    pub fn get_shared_mem_mut(&mut self) -> &mut SharedMemory {
        &mut self.shared_mem
    }

    /// Get a reference to the `SharedMemory` backing this manager.
    pub fn get_shared_mem(&self) -> &SharedMemory {
        &self.shared_mem
    }

    /// Write `cookie` into the stack guard slot of the PEB and remember it
    /// for later comparison in [`Self::check_stack_guard`].
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_stack_guard(&mut self, cookie: &[u8; 16]) -> Result<()> {
        self.stack_guard_cookie = *cookie;
        self.shared_mem.copy_from_slice(
            cookie,
            usize::try_from(self.layout.get_stack_guard_cookie_offset())?,
        )
    }

    /// Compare the PEB's current stack guard cookie against the one last
    /// written by [`Self::set_stack_guard`]. Returns `false` if the guest
    /// has smashed its stack.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn check_stack_guard(&self) -> Result<bool> {
        let mut cookie = [0u8; 16];
        self.shared_mem.copy_to_slice(
            &mut cookie,
            usize::try_from(self.layout.get_stack_guard_cookie_offset())?,
        )?;
        Ok(cookie == self.stack_guard_cookie)
    }

    /// Take a snapshot of the current memory contents, replacing any
    /// previous snapshot.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn snapshot(&mut self) -> Result<()> {
        match self.mem_snapshot.as_mut() {
            Some(snapshot) => Ok(snapshot.replace_snapshot()?),
            None => {
                self.mem_snapshot = Some(SharedMemorySnapshot::new(self.shared_mem.clone())?);
                Ok(())
            }
        }
    }

    /// Restore memory to the state captured by the most recent
    /// [`Self::snapshot`] call.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn restore(&mut self) -> Result<()> {
        match self.mem_snapshot.as_mut() {
            Some(snapshot) => Ok(snapshot.restore_from_snapshot()?),
            None => Err(new_error!("no snapshot has been taken of this sandbox")),
        }
    }

    /// Build the single-level, 2MiB-paged identity map covering the first
    /// `mem_size` bytes of guest memory, and return the CR3 value (the
    /// guest address of the PML4 table) the hypervisor should load.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_up_hypervisor_partition(&mut self, mem_size: u64) -> Result<u64> {
        self.shared_mem.write_u64(
            SandboxMemoryLayout::PML4_OFFSET,
            SandboxMemoryLayout::PDPT_GUEST_ADDRESS as u64 | PAGE_PRESENT_RW,
        )?;
        self.shared_mem.write_u64(
            SandboxMemoryLayout::PDPT_OFFSET,
            SandboxMemoryLayout::PD_GUEST_ADDRESS as u64 | PAGE_PRESENT_RW,
        )?;

        let num_pages = usize::try_from((mem_size + TWO_MIB - 1) / TWO_MIB)?;
        for i in 0..num_pages {
            let page_addr = i as u64 * TWO_MIB;
            self.shared_mem.write_u64(
                SandboxMemoryLayout::PD_OFFSET + i * 8,
                page_addr | PAGE_PRESENT_RW | PAGE_SIZE_2MB,
            )?;
        }

        Ok(SandboxMemoryLayout::BASE_ADDRESS as u64)
    }

    /// Get the guest (or host, in in-process mode) address of the PEB,
    /// given `source_addr`, the base address memory was loaded at.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_peb_address(&self, source_addr: u64) -> Result<u64> {
        if self.run_from_process_memory {
            Ok(u64::try_from(self.layout.peb_address)?)
        } else {
            Ok(source_addr + u64::from(self.layout.get_in_process_peb_offset()))
        }
    }

    /// Get the address of the guest's entrypoint function.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_entry_point(&self) -> Result<u64> {
        Ok(self.load_addr.0 + u64::from(self.entrypoint_offset))
    }

    /// Get the guest address of the top of the stack, to be loaded into
    /// `rsp` before the guest's first run. The stack grows down from here.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_stack_top(&self) -> Result<u64> {
        Ok(u64::try_from(SandboxMemoryLayout::BASE_ADDRESS)? + u64::try_from(self.shared_mem.mem_size())?)
    }

    /// Get the address of the guest's dispatch function, which the guest
    /// writes into the PEB during its one-time initialization run.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_pointer_to_dispatch_function(&self) -> Result<u64> {
        self.shared_mem
            .read_u64(usize::try_from(self.layout.get_dispatch_function_pointer_offset())?)
    }

    /// Write the address of the in-process OutB handler into the PEB. Only
    /// meaningful when running the guest in-process.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn set_outb_address(&mut self, addr: u64) -> Result<()> {
        self.shared_mem
            .write_u64(usize::try_from(self.layout.get_outb_pointer_offset())?, addr)
    }

    /// Translate `guest_ptr` (a raw pointer into the guest address space)
    /// into its absolute address in the host's view of `shared_mem`.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_host_address_from_ptr(&self, guest_ptr: RawPtr) -> Result<u64> {
        let guest: GuestPtr = GuestPtr::try_from((guest_ptr, self.run_from_process_memory))?;
        let host: HostPtr =
            guest.to_foreign_ptr(HostAddressSpace::new(&self.shared_mem, self.run_from_process_memory))?;
        Ok(host.absolute()?)
    }

    /// Translate `host_ptr` (a raw pointer into the host's view of
    /// `shared_mem`) into its absolute address in the guest address space.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_guest_address_from_ptr(&self, host_ptr: RawPtr) -> Result<u64> {
        let host: HostPtr =
            HostPtr::try_from((host_ptr, &self.shared_mem, self.run_from_process_memory))?;
        let guest: GuestPtr = host.to_foreign_ptr(GuestAddressSpace::new(self.run_from_process_memory))?;
        Ok(guest.absolute()?)
    }

    /// Whether the host exception buffer currently holds a non-empty
    /// exception.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn has_host_exception(&self) -> Result<bool> {
        Ok(self.get_host_exception_length()? > 0)
    }

    /// The length, in bytes, of the exception currently in the host
    /// exception buffer, or `0` if there is none.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_host_exception_length(&self) -> Result<i32> {
        self.shared_mem
            .read_i32(usize::try_from(self.layout.get_host_exception_offset())?)
    }

    /// The raw bytes of the exception currently in the host exception
    /// buffer.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_host_exception_data(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.get_host_exception_length()?)?;
        let mut data = vec![0u8; len];
        let offset = usize::try_from(self.layout.get_host_exception_offset())? + 4;
        self.shared_mem.copy_to_slice(&mut data, offset)?;
        Ok(data)
    }

    /// Record `exception`, raised while handling an OutB write to `port`,
    /// as both the raw host exception blob and a structured guest error.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn write_outb_exception(&mut self, port: u16, exception: &[u8]) -> Result<()> {
        let host_exception_offset = usize::try_from(self.layout.get_host_exception_offset())?;
        self.shared_mem
            .write_i32(host_exception_offset, i32::try_from(exception.len())?)?;
        self.shared_mem
            .copy_from_slice(exception, host_exception_offset + 4)?;

        let guest_error = GuestError::new(
            ErrorCode::UnknownError,
            format!("unhandled exception writing to port {port:#x}"),
        );
        self.shared_mem.copy_from_slice(
            &guest_error.encode(),
            usize::try_from(self.layout.guest_error_buffer_offset)?,
        )?;
        Ok(())
    }

    /// Read the structured error the guest last wrote to the guest error
    /// buffer. Returns `(ErrorCode::NoError, None)` if the guest hasn't
    /// reported one.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_guest_error(&self) -> Result<(ErrorCode, Option<String>)> {
        let mut buf = vec![0u8; self.mem_cfg.guest_error_buffer_size];
        self.shared_mem
            .copy_to_slice(&mut buf, usize::try_from(self.layout.guest_error_buffer_offset)?)?;
        let guest_error = GuestError::decode(&buf)?;
        let message = match guest_error.code {
            ErrorCode::NoError => None,
            _ => Some(guest_error.message),
        };
        Ok((guest_error.code, message))
    }

    /// Write a function call requesting the guest run `function_name` with
    /// `args`, expecting a return value of `expected_return_type`, into the
    /// host-to-guest input buffer.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn write_guest_function_call(
        &mut self,
        function_name: &str,
        args: Option<Vec<ParameterValue>>,
        expected_return_type: ReturnType,
    ) -> Result<()> {
        let call = FunctionCall::new(
            function_name.to_string(),
            args,
            FunctionCallType::Guest,
            expected_return_type,
        );
        self.shared_mem.push_buffer(
            usize::try_from(self.layout.input_data_buffer_offset)?,
            self.mem_cfg.input_data_size,
            &call.encode(),
        )
    }

    /// Read back the result of the most recent guest function call from
    /// the input buffer.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_return_value(&mut self) -> Result<ReturnValue> {
        let result: FunctionCallResult = self.shared_mem.try_pop_buffer_into(
            usize::try_from(self.layout.input_data_buffer_offset)?,
            self.mem_cfg.input_data_size,
        )?;
        match result {
            FunctionCallResult::Ok(value) => Ok(value),
            FunctionCallResult::Err => {
                let (code, message) = self.get_guest_error()?;
                Err(crate::HyperlightError::GuestError(
                    code,
                    message.unwrap_or_default(),
                ))
            }
        }
    }

    /// Write the host function table the guest should use to validate and
    /// dispatch calls to host functions.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn write_host_function_details(&mut self, table: &HostFunctionDetails) -> Result<()> {
        self.shared_mem.copy_from_slice(
            &table.encode(),
            usize::try_from(self.layout.host_function_definitions_buffer_offset)?,
        )
    }

    /// Read a pending guest-to-host function call from the output buffer.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn get_host_function_call(&mut self) -> Result<FunctionCall> {
        self.shared_mem.try_pop_buffer_into(
            usize::try_from(self.layout.output_data_buffer_offset)?,
            self.mem_cfg.output_data_size,
        )
    }

    /// Write the result of a host function call back into the output
    /// buffer for the guest to read.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn write_response_from_host_method_call(&mut self, return_value: &ReturnValue) -> Result<()> {
        let result = FunctionCallResult::Ok(return_value.clone());
        self.shared_mem.push_buffer(
            usize::try_from(self.layout.output_data_buffer_offset)?,
            self.mem_cfg.output_data_size,
            &result.encode(),
        )
    }

    /// Read the oldest pending log record the guest has queued.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn read_guest_log_data(&mut self) -> Result<GuestLogData> {
        self.shared_mem.try_pop_buffer_into(
            usize::try_from(self.layout.get_guest_log_buffer_offset())?,
            self.mem_cfg.guest_log_buffer_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use hyperlight_common::flatbuffer_wrappers::function_call::FunctionCallType;
    use hyperlight_common::flatbuffer_wrappers::function_types::ParameterType;
    use hyperlight_common::flatbuffer_wrappers::host_function_details::HostFunctionDefinition;

    use super::*;

    fn new_test_manager() -> SandboxMemoryManager {
        let cfg = SandboxConfiguration::default();
        let layout = SandboxMemoryLayout::new(cfg, 4096, 0x1000, 0x1000).unwrap();
        let mem_size = layout.get_memory_size().unwrap();
        let mut shared_mem = SharedMemory::new(mem_size).unwrap();
        layout
            .write(
                &mut shared_mem,
                SandboxMemoryLayout::BASE_ADDRESS,
                mem_size,
                SandboxMemoryLayout::RUN_MODE_HYPERVISOR,
            )
            .unwrap();
        SandboxMemoryManager {
            mem_cfg: cfg,
            run_from_process_memory: false,
            mem_snapshot: None,
            shared_mem,
            layout,
            load_addr: RawPtr::from(SandboxMemoryLayout::GUEST_CODE_ADDRESS as u64),
            entrypoint_offset: Offset::zero(),
            stack_guard_cookie: [0u8; 16],
        }
    }

    #[test]
    fn stack_guard_round_trip() {
        let mut mgr = new_test_manager();
        let cookie = [7u8; 16];
        mgr.set_stack_guard(&cookie).unwrap();
        assert!(mgr.check_stack_guard().unwrap());

        // simulate a guest stack smash overwriting the cookie directly,
        // bypassing set_stack_guard
        mgr.shared_mem
            .copy_from_slice(
                &[0u8; 16],
                usize::try_from(mgr.layout.get_stack_guard_cookie_offset()).unwrap(),
            )
            .unwrap();
        assert!(!mgr.check_stack_guard().unwrap());
    }

    #[test]
    fn guest_function_call_round_trip() {
        let mut mgr = new_test_manager();
        mgr.write_guest_function_call(
            "PrintOutput",
            Some(vec![ParameterValue::String("hello".to_string())]),
            ReturnType::Int,
        )
        .unwrap();

        let call: FunctionCall = mgr
            .shared_mem
            .try_pop_buffer_into(
                usize::try_from(mgr.layout.input_data_buffer_offset).unwrap(),
                mgr.mem_cfg.input_data_size,
            )
            .unwrap();
        assert_eq!(call.function_name, "PrintOutput");
        assert_eq!(call.function_call_type, FunctionCallType::Guest);
        assert_eq!(
            call.parameters,
            Some(vec![ParameterValue::String("hello".to_string())])
        );
    }

    #[test]
    fn guest_call_return_value_round_trip() {
        let mut mgr = new_test_manager();
        let result = FunctionCallResult::Ok(ReturnValue::Int(99));
        mgr.shared_mem
            .push_buffer(
                usize::try_from(mgr.layout.input_data_buffer_offset).unwrap(),
                mgr.mem_cfg.input_data_size,
                &result.encode(),
            )
            .unwrap();
        assert_eq!(mgr.get_return_value().unwrap(), ReturnValue::Int(99));
    }

    #[test]
    fn host_function_call_and_response_round_trip() {
        let mut mgr = new_test_manager();
        let call = FunctionCall::new(
            "HostMethod1".to_string(),
            None,
            FunctionCallType::Host,
            ReturnType::Int,
        );
        mgr.shared_mem
            .push_buffer(
                usize::try_from(mgr.layout.output_data_buffer_offset).unwrap(),
                mgr.mem_cfg.output_data_size,
                &call.encode(),
            )
            .unwrap();

        let popped = mgr.get_host_function_call().unwrap();
        assert_eq!(popped, call);

        mgr.write_response_from_host_method_call(&ReturnValue::Int(5))
            .unwrap();
        let result: FunctionCallResult = mgr
            .shared_mem
            .try_pop_buffer_into(
                usize::try_from(mgr.layout.output_data_buffer_offset).unwrap(),
                mgr.mem_cfg.output_data_size,
            )
            .unwrap();
        assert_eq!(result, FunctionCallResult::Ok(ReturnValue::Int(5)));
    }

    #[test]
    fn host_function_details_round_trip() {
        let mut mgr = new_test_manager();
        let table = HostFunctionDetails::new(vec![HostFunctionDefinition::new(
            "HostPrint".to_string(),
            vec![ParameterType::String],
            ReturnType::Int,
        )]);
        mgr.write_host_function_details(&table).unwrap();

        let mut buf = vec![0u8; mgr.mem_cfg.host_function_definition_size];
        mgr.shared_mem
            .copy_to_slice(
                &mut buf,
                usize::try_from(mgr.layout.host_function_definitions_buffer_offset).unwrap(),
            )
            .unwrap();
        assert_eq!(HostFunctionDetails::decode(&buf).unwrap(), table);
    }

    #[test]
    fn guest_error_defaults_to_no_error() {
        let mgr = new_test_manager();
        assert_eq!(mgr.get_guest_error().unwrap(), (ErrorCode::NoError, None));
    }

    #[test]
    fn outb_exception_populates_host_exception_and_guest_error() {
        let mut mgr = new_test_manager();
        mgr.write_outb_exception(0x65, b"boom").unwrap();
        assert!(mgr.has_host_exception().unwrap());
        assert_eq!(mgr.get_host_exception_data().unwrap(), b"boom".to_vec());
        let (code, message) = mgr.get_guest_error().unwrap();
        assert_eq!(code, ErrorCode::UnknownError);
        assert!(message.unwrap().contains("0x65"));
    }

    #[test]
    fn hypervisor_partition_returns_base_address_as_cr3() {
        let mut mgr = new_test_manager();
        let mem_size = mgr.layout.get_memory_size().unwrap() as u64;
        let cr3 = mgr.set_up_hypervisor_partition(mem_size).unwrap();
        assert_eq!(cr3, SandboxMemoryLayout::BASE_ADDRESS as u64);

        let pml4_entry = mgr.shared_mem.read_u64(SandboxMemoryLayout::PML4_OFFSET).unwrap();
        assert_eq!(
            pml4_entry,
            SandboxMemoryLayout::PDPT_GUEST_ADDRESS as u64 | PAGE_PRESENT_RW
        );
    }

    #[test]
    fn entry_point_is_load_address_plus_offset() {
        let mgr = new_test_manager();
        assert_eq!(
            mgr.get_entry_point().unwrap(),
            SandboxMemoryLayout::GUEST_CODE_ADDRESS as u64
        );
    }

    #[test]
    fn peb_address_in_hypervisor_mode() {
        let mgr = new_test_manager();
        let addr = mgr
            .get_peb_address(SandboxMemoryLayout::BASE_ADDRESS as u64)
            .unwrap();
        assert_eq!(addr, u64::try_from(mgr.layout.peb_address).unwrap());
    }
}
