#[cfg(test)]
use super::ptr::HostPtr;
use super::shared_mem::SharedMemory;
use crate::error::HyperlightError::{GuestOffsetIsInvalid, MemoryRequestTooBig};
use crate::mem::ptr_offset::Offset;
use crate::sandbox::SandboxConfiguration;
use crate::Result;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{instrument, Span};

// +-------------------------------------------+
// |          Trailing Guard Pages (2)         |
// +-------------------------------------------+
// |               Guest Stack                 |
// +-------------------------------------------+
// |             Guard Page (4KiB)             |
// +-------------------------------------------+
// |             Guest Heap                    |
// +-------------------------------------------+
// |         Guest Panic Context               |
// +-------------------------------------------+
// |             Guest Log Buffer               |
// +-------------------------------------------+
// |             Output Data                   |
// +-------------------------------------------+
// |              Input Data                   |
// +-------------------------------------------+
// |           Guest Error Log                 |
// +-------------------------------------------+
// |        Host Exception Handlers            |
// +-------------------------------------------+
// |        Host Function Definitions          |
// +-------------------------------------------+
// |                PEB Struct                 |
// +-------------------------------------------+
// |               Guest Code                  |
// +-------------------------------------------+ 0x203_000
// |                    PD                     |
// +-------------------------------------------+ 0x202_000
// |                   PDPT                    |
// +-------------------------------------------+ 0x201_000
// |                   PML4                    |
// +-------------------------------------------+ 0x200_000
// |                    ⋮                      |
// |                 Unmapped                  |
// |                    ⋮                      |
// +-------------------------------------------+ 0x0

/// The header block written into guest memory describing the rest of the
/// sandbox layout to the guest. Every field is a guest-address pointer
/// (or a plain value) written as a little-endian `u64`, except for the
/// trailing stack guard cookie.
///
/// The field order below is load-bearing: guests read this block by
/// fixed offset, not by name.
///
/// 1. `p_code` - guest address of the loaded (and relocated) code.
/// 2. `p_dispatch` - guest address of the dispatch function. Written by
///    the guest itself during its one-time init run.
/// 3. `p_outb_handler` - guest address of the in-process OutB handler.
///    Only meaningful in in-process run mode.
/// 4. `p_input_buf` - guest address of the host→guest message buffer.
/// 5. `p_output_buf` - guest address of the guest→host message buffer.
/// 6. `p_host_func_defs` - guest address of the serialized host function
///    table.
/// 7. `p_host_exception` - guest address of the host exception buffer.
/// 8. `p_guest_error_buf` - guest address of the guest error buffer.
/// 9. `p_log_buf` - guest address of the guest log buffer.
/// 10. `heap_base` - guest address of the start of the heap.
/// 11. `heap_size` - size, in bytes, of the heap.
/// 12. `stack_top` - guest address of the highest addressable stack byte.
/// 13. `run_mode_flag` - `0` for hypervisor execution, `1` for in-process.
/// 14. `stack_guard_cookie` - 16 random bytes checked after every call.
#[derive(Copy, Clone, Debug)]
pub struct SandboxMemoryLayout {
    pub(super) sandbox_memory_config: SandboxConfiguration,
    /// The stack size of this sandbox.
    pub(super) stack_size: usize,
    /// The heap size of this sandbox.
    pub(super) heap_size: usize,

    /// Offsets to the individual fields of the PEB header, in the exact
    /// order guests expect them.
    peb_offset: Offset,
    peb_code_offset: Offset,
    peb_dispatch_offset: Offset, // set by the guest in its entrypoint
    peb_outb_handler_offset: Offset,
    peb_input_buf_offset: Offset,
    peb_output_buf_offset: Offset,
    pub(super) peb_host_function_definitions_offset: Offset,
    pub(crate) peb_host_exception_offset: Offset,
    peb_guest_error_offset: Offset,
    peb_log_buf_offset: Offset,
    peb_heap_base_offset: Offset,
    peb_heap_size_offset: Offset,
    peb_stack_top_offset: Offset,
    peb_run_mode_flag_offset: Offset,
    peb_stack_guard_cookie_offset: Offset,

    // The following are the offsets of the actual backing buffers the
    // PEB fields above point at.
    pub(crate) host_function_definitions_buffer_offset: Offset,
    pub(crate) host_exception_buffer_offset: Offset,
    pub(super) guest_error_buffer_offset: Offset,
    pub(super) input_data_buffer_offset: Offset,
    pub(super) output_data_buffer_offset: Offset,
    pub(super) guest_log_buffer_offset: Offset,
    guest_panic_context_buffer_offset: Offset,
    guest_heap_buffer_offset: Offset,
    guard_page_offset: Offset,
    guest_stack_buffer_offset: Offset, // the lowest address of the stack

    // other
    pub(crate) peb_address: usize,
    code_size: usize,
    extra_heap_needed: usize, // for alignment so guard page starts at 4K
}
impl SandboxMemoryLayout {
    /// Four Kilobytes (16^3 bytes) - used to round the total amount of memory
    /// used to the nearest 4K
    const FOUR_K: usize = 0x1000;
    /// The size of the page table within a sandbox
    const PAGE_TABLE_SIZE: usize = 0x3000;
    /// The offset into the sandbox's memory where the PML4 Table is located.
    /// See https://www.pagetable.com/?p=14 for more information.
    pub(crate) const PML4_OFFSET: usize = 0x0000;
    /// The offset into the sandbox's memory where the Page Directory Pointer
    /// Table starts.
    pub(super) const PDPT_OFFSET: usize = 0x1000;
    /// The offset into the sandbox's memory where the Page Directory starts.
    pub(super) const PD_OFFSET: usize = 0x2000;
    /// The address (not the offset) to the start of the page directory
    pub(super) const PD_GUEST_ADDRESS: usize = Self::BASE_ADDRESS + Self::PD_OFFSET;
    /// The address (not the offset) into sandbox memory where the Page
    /// Directory Pointer Table starts
    pub(super) const PDPT_GUEST_ADDRESS: usize = Self::BASE_ADDRESS + Self::PDPT_OFFSET;
    /// The offset into the sandbox's memory where code starts.
    pub(super) const CODE_OFFSET: usize = Self::PAGE_TABLE_SIZE;
    /// The maximum amount of memory a single sandbox will be allowed.
    const MAX_MEMORY_SIZE: usize = 0x3FEF0000;

    /// The base address of the sandbox's memory.
    pub const BASE_ADDRESS: usize = 0x0200000;

    /// The absolute address (assuming sandbox memory starts at BASE_ADDRESS) into
    /// sandbox memory where code starts.
    pub(super) const GUEST_CODE_ADDRESS: usize = Self::BASE_ADDRESS + Self::CODE_OFFSET;

    // the offset into a sandbox's input/output buffer where the stack starts
    const STACK_POINTER_SIZE_BYTES: u64 = 8;

    /// The width, in bytes, of every PEB field except the trailing
    /// stack guard cookie.
    const PEB_FIELD_SIZE: usize = 8;
    /// The width, in bytes, of the stack guard cookie.
    const STACK_GUARD_COOKIE_SIZE: usize = 16;
    /// Total size in bytes of the PEB header: 13 pointer/value fields
    /// plus the 16-byte stack guard cookie.
    const PEB_SIZE: usize = Self::PEB_FIELD_SIZE * 13 + Self::STACK_GUARD_COOKIE_SIZE;

    /// Fixed size of the area reserved for guest panic context.
    const GUEST_PANIC_CONTEXT_SIZE: usize = 0x400;

    /// `run_mode_flag` value written when the sandbox executes under a
    /// hypervisor.
    pub(crate) const RUN_MODE_HYPERVISOR: u64 = 0;
    /// `run_mode_flag` value written when the sandbox executes the guest
    /// entry point directly on the host thread.
    pub(crate) const RUN_MODE_IN_PROCESS: u64 = 1;

    /// Create a new `SandboxMemoryLayout` with the given
    /// `SandboxConfiguration`, code size and stack/heap size.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn new(
        cfg: SandboxConfiguration,
        code_size: usize,
        stack_size: usize,
        heap_size: usize,
    ) -> Result<Self> {
        // Offsets of the fields within the PEB header itself, in the
        // exact order guests expect them.
        let peb_offset = Offset::try_from(Self::PAGE_TABLE_SIZE + code_size)?;
        let peb_code_offset = peb_offset;
        let peb_dispatch_offset = peb_code_offset + Self::PEB_FIELD_SIZE;
        let peb_outb_handler_offset = peb_dispatch_offset + Self::PEB_FIELD_SIZE;
        let peb_input_buf_offset = peb_outb_handler_offset + Self::PEB_FIELD_SIZE;
        let peb_output_buf_offset = peb_input_buf_offset + Self::PEB_FIELD_SIZE;
        let peb_host_function_definitions_offset = peb_output_buf_offset + Self::PEB_FIELD_SIZE;
        let peb_host_exception_offset =
            peb_host_function_definitions_offset + Self::PEB_FIELD_SIZE;
        let peb_guest_error_offset = peb_host_exception_offset + Self::PEB_FIELD_SIZE;
        let peb_log_buf_offset = peb_guest_error_offset + Self::PEB_FIELD_SIZE;
        let peb_heap_base_offset = peb_log_buf_offset + Self::PEB_FIELD_SIZE;
        let peb_heap_size_offset = peb_heap_base_offset + Self::PEB_FIELD_SIZE;
        let peb_stack_top_offset = peb_heap_size_offset + Self::PEB_FIELD_SIZE;
        let peb_run_mode_flag_offset = peb_stack_top_offset + Self::PEB_FIELD_SIZE;
        let peb_stack_guard_cookie_offset = peb_run_mode_flag_offset + Self::PEB_FIELD_SIZE;

        // Offsets of the backing buffers the pointer fields above point at.
        let peb_address = usize::try_from(Self::BASE_ADDRESS + peb_offset)?;
        let host_function_definitions_buffer_offset = peb_offset + Self::PEB_SIZE;
        let host_exception_buffer_offset =
            host_function_definitions_buffer_offset + cfg.host_function_definition_size;
        let guest_error_buffer_offset = host_exception_buffer_offset + cfg.host_exception_size;
        let input_data_buffer_offset = guest_error_buffer_offset + cfg.guest_error_buffer_size;
        let output_data_buffer_offset = input_data_buffer_offset + cfg.input_data_size;
        let guest_log_buffer_offset = output_data_buffer_offset + cfg.output_data_size;
        let guest_panic_context_buffer_offset =
            guest_log_buffer_offset + cfg.guest_log_buffer_size;
        let guest_heap_buffer_offset =
            guest_panic_context_buffer_offset + Self::GUEST_PANIC_CONTEXT_SIZE;
        let guard_page_offset =
            (guest_heap_buffer_offset + heap_size).round_up_to(Self::FOUR_K.try_into()?); // make sure guard page starts at 4K boundary
                                                                                          // which might result in a slightly larger heap
        let guest_stack_buffer_offset = guard_page_offset + Self::FOUR_K;

        let extra_heap_needed = (u64::from(
            (guest_heap_buffer_offset + heap_size).round_up_to(Self::FOUR_K.try_into()?),
        ) - u64::from(guest_heap_buffer_offset + heap_size))
        .try_into()?;

        Ok(Self {
            peb_offset,
            stack_size,
            heap_size,
            peb_code_offset,
            peb_dispatch_offset,
            peb_outb_handler_offset,
            peb_input_buf_offset,
            peb_output_buf_offset,
            peb_host_function_definitions_offset,
            peb_host_exception_offset,
            peb_guest_error_offset,
            peb_log_buf_offset,
            peb_heap_base_offset,
            peb_heap_size_offset,
            peb_stack_top_offset,
            peb_run_mode_flag_offset,
            peb_stack_guard_cookie_offset,
            guest_error_buffer_offset,
            sandbox_memory_config: cfg,
            code_size,
            host_function_definitions_buffer_offset,
            host_exception_buffer_offset,
            input_data_buffer_offset,
            output_data_buffer_offset,
            guest_log_buffer_offset,
            guest_heap_buffer_offset,
            guest_stack_buffer_offset,
            peb_address,
            guest_panic_context_buffer_offset,
            extra_heap_needed,
            guard_page_offset,
        })
    }

    /// Get the offset in guest memory to the start of host errors
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_host_exception_offset(&self) -> Offset {
        self.host_exception_buffer_offset
    }

    /// Get the address of the code section on the host, given `share_mem`'s
    /// base address and whether or not Hyperlight is executing with in-memory
    /// mode enabled.
    #[cfg(test)]
    pub(crate) fn get_host_code_address(shared_mem: &SharedMemory) -> Result<HostPtr> {
        let code_offset: Offset = Self::CODE_OFFSET.try_into()?;
        HostPtr::try_from((code_offset, shared_mem))
    }

    /// Get the offset in guest memory to the OutB handler pointer.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_outb_pointer_offset(&self) -> Offset {
        self.peb_outb_handler_offset
    }

    /// Get the offset in guest memory to the start of output data.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(crate) fn get_output_data_offset(&self) -> Offset {
        self.output_data_buffer_offset
    }

    /// Get the offset in guest memory to the code pointer field.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_code_pointer_offset(&self) -> Offset {
        self.peb_code_offset
    }

    /// Get the offset in guest memory to where the guest dispatch function
    /// pointer is written
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_dispatch_function_pointer_offset(&self) -> Offset {
        self.peb_dispatch_offset
    }

    /// Get the offset in guest memory to the PEB address
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_in_process_peb_offset(&self) -> Offset {
        self.peb_offset
    }

    #[cfg(test)]
    pub(super) fn get_stack_size(&self) -> usize {
        self.stack_size
    }

    /// Get the offset to the top of the stack in guest memory
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_top_of_stack_offset(&self) -> Offset {
        self.guest_stack_buffer_offset
    }

    /// Get the offset in guest memory to the stack guard cookie.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(crate) fn get_stack_guard_cookie_offset(&self) -> Offset {
        self.peb_stack_guard_cookie_offset
    }

    /// Get the offset in guest memory to the guest log buffer.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(crate) fn get_guest_log_buffer_offset(&self) -> Offset {
        self.guest_log_buffer_offset
    }

    /// Get the offset to the start of the guest panic context data
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(crate) fn get_guest_panic_context_buffer_offset(&self) -> Offset {
        self.guest_panic_context_buffer_offset
    }

    /// Get the offset to the guest guard page
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn get_guard_page_offset(&self) -> Offset {
        self.guard_page_offset
    }

    /// Get the total size of guest memory in `self`'s memory
    /// layout.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    fn get_unaligned_memory_size(&self) -> usize {
        // in order, starting from bottom
        Self::PAGE_TABLE_SIZE
            + self.code_size
            + Self::PEB_SIZE
            + self.sandbox_memory_config.host_function_definition_size
            + self.sandbox_memory_config.host_exception_size
            + self.sandbox_memory_config.guest_error_buffer_size
            + self.sandbox_memory_config.input_data_size
            + self.sandbox_memory_config.output_data_size
            + self.sandbox_memory_config.guest_log_buffer_size
            + Self::GUEST_PANIC_CONTEXT_SIZE
            + self.heap_size
            + self.extra_heap_needed
            + Self::FOUR_K // stack guard page
            + self.stack_size
            + 2 * Self::FOUR_K // trailing guard pages
    }

    /// Get the total size of guest memory in `self`'s memory
    /// layout aligned to 4k page boundaries.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub(super) fn get_memory_size(&self) -> Result<usize> {
        let total_memory = self.get_unaligned_memory_size();

        // Size should be a multiple of 4K.
        let remainder = total_memory % Self::FOUR_K;
        let multiples = total_memory / Self::FOUR_K;
        let size = match remainder {
            0 => total_memory,
            _ => (multiples + 1) * Self::FOUR_K,
        };

        // For our page table, we only mapped virtual memory up to 0x3FFFFFFF and map each 2 meg
        // virtual chunk to physical addresses 2 megabytes below the virtual address.  Since we
        // map virtual up to 0x3FFFFFFF, the max physical address we handle is 0x3FDFFFFF (or
        // 0x3FEF0000 physical total memory)

        if size > Self::MAX_MEMORY_SIZE {
            Err(MemoryRequestTooBig(size, Self::MAX_MEMORY_SIZE))
        } else {
            Ok(size)
        }
    }

    /// Translate `region_offset` to the guest address a PEB pointer field
    /// should carry, given the `guest_offset` the layout is being written
    /// at (either the host's view of the region, or a true guest base
    /// address when running under a hypervisor).
    fn pointer_field_value(
        &self,
        shared_mem: &SharedMemory,
        guest_offset: usize,
        region_offset: Offset,
    ) -> Result<u64> {
        if guest_offset == 0 {
            let calculated_addr = shared_mem.calculate_address(usize::try_from(region_offset)?)?;
            Ok(u64::try_from(calculated_addr)?)
        } else {
            Ok(u64::from(Offset::try_from(guest_offset)? + region_offset))
        }
    }

    /// Write the finished memory layout to `shared_mem` and return
    /// `Ok` if successful.
    ///
    /// Note: `shared_mem` may have been modified, even if `Err` was returned
    /// from this function.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace")]
    pub(crate) fn write(
        &self,
        shared_mem: &mut SharedMemory,
        guest_offset: usize,
        size: usize,
        run_mode_flag: u64,
    ) -> Result<()> {
        if guest_offset != SandboxMemoryLayout::BASE_ADDRESS
            && guest_offset != shared_mem.base_addr()
        {
            return Err(GuestOffsetIsInvalid(guest_offset));
        }

        // Start of setting up the PEB. The following are in the exact
        // order of the PEB fields.

        // p_code is set when the relocated image is copied into the code
        // region; p_dispatch is set by the guest itself during its
        // one-time init run. p_outb_handler is only meaningful in
        // in-process mode and is set up by that driver.

        let input_buf_addr =
            self.pointer_field_value(shared_mem, guest_offset, self.input_data_buffer_offset)?;
        shared_mem.write_u64(usize::try_from(self.peb_input_buf_offset)?, input_buf_addr)?;

        let output_buf_addr =
            self.pointer_field_value(shared_mem, guest_offset, self.output_data_buffer_offset)?;
        shared_mem.write_u64(
            usize::try_from(self.peb_output_buf_offset)?,
            output_buf_addr,
        )?;

        let host_func_defs_addr = self.pointer_field_value(
            shared_mem,
            guest_offset,
            self.host_function_definitions_buffer_offset,
        )?;
        shared_mem.write_u64(
            usize::try_from(self.peb_host_function_definitions_offset)?,
            host_func_defs_addr,
        )?;

        let host_exception_addr = self.pointer_field_value(
            shared_mem,
            guest_offset,
            self.host_exception_buffer_offset,
        )?;
        shared_mem.write_u64(
            usize::try_from(self.peb_host_exception_offset)?,
            host_exception_addr,
        )?;

        let guest_error_addr =
            self.pointer_field_value(shared_mem, guest_offset, self.guest_error_buffer_offset)?;
        shared_mem.write_u64(
            usize::try_from(self.peb_guest_error_offset)?,
            guest_error_addr,
        )?;

        let log_buf_addr =
            self.pointer_field_value(shared_mem, guest_offset, self.guest_log_buffer_offset)?;
        shared_mem.write_u64(usize::try_from(self.peb_log_buf_offset)?, log_buf_addr)?;

        let heap_base_addr =
            self.pointer_field_value(shared_mem, guest_offset, self.guest_heap_buffer_offset)?;
        shared_mem.write_u64(usize::try_from(self.peb_heap_base_offset)?, heap_base_addr)?;
        shared_mem.write_u64(
            usize::try_from(self.peb_heap_size_offset)?,
            self.heap_size.try_into()?,
        )?;

        let stack_top = (guest_offset + (size - self.stack_size)).try_into()?;
        shared_mem.write_u64(usize::try_from(self.peb_stack_top_offset)?, stack_top)?;

        shared_mem.write_u64(
            usize::try_from(self.peb_run_mode_flag_offset)?,
            run_mode_flag,
        )?;

        // Set up the stack guard cookie
        let mut stack_guard_cookie = [0u8; 16];
        OsRng.fill_bytes(&mut stack_guard_cookie);
        shared_mem.copy_from_slice(
            &stack_guard_cookie,
            usize::try_from(self.peb_stack_guard_cookie_offset)?,
        )?;

        // End of setting up the PEB

        // Initialize the stack pointers of input data and output data
        // to point to the ninth (index 8) byte, which is the first free address
        // of the each respective stack. The first 8 bytes are the stack pointer itself.
        shared_mem.write_u64(
            usize::try_from(self.input_data_buffer_offset)?,
            Self::STACK_POINTER_SIZE_BYTES,
        )?;
        shared_mem.write_u64(
            usize::try_from(self.output_data_buffer_offset)?,
            Self::STACK_POINTER_SIZE_BYTES,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::{ptr_offset::Offset, shared_mem::SharedMemory};

    use super::{SandboxConfiguration, SandboxMemoryLayout};

    #[test]
    fn get_host_code_address() {
        let sm = SharedMemory::new(100).unwrap();
        let hca_in_proc = SandboxMemoryLayout::get_host_code_address(&sm).unwrap();
        let hca_in_vm = SandboxMemoryLayout::get_host_code_address(&sm).unwrap();
        let code_offset: Offset = SandboxMemoryLayout::CODE_OFFSET.try_into().unwrap();
        assert_eq!(hca_in_proc.offset(), code_offset);
        assert_eq!(hca_in_vm.offset(), code_offset);
        assert_eq!(hca_in_proc, hca_in_vm);
    }

    #[test]
    fn test_get_memory_size() {
        // Note: this test assumes that the stack is the last element in the
        // guest memory layout, followed only by the two trailing guard
        // pages, in order to determine the total size of the memory layout.
        let sbox_cfg = SandboxConfiguration::default();
        let sbox_mem_layout = SandboxMemoryLayout::new(sbox_cfg, 4096, 2048, 4096).unwrap();
        let mem_size = sbox_mem_layout.get_unaligned_memory_size() as u64;
        let end_of_memory = u64::try_from(sbox_mem_layout.get_top_of_stack_offset()).unwrap()
            + sbox_mem_layout.get_stack_size() as u64
            + 2 * SandboxMemoryLayout::FOUR_K as u64;
        assert_eq!(mem_size, end_of_memory);
    }

    #[test]
    fn peb_field_offsets_are_strictly_increasing_and_in_order() {
        let sbox_cfg = SandboxConfiguration::default();
        let layout = SandboxMemoryLayout::new(sbox_cfg, 4096, 2048, 4096).unwrap();
        let offsets = [
            layout.peb_code_offset,
            layout.peb_dispatch_offset,
            layout.peb_outb_handler_offset,
            layout.peb_input_buf_offset,
            layout.peb_output_buf_offset,
            layout.peb_host_function_definitions_offset,
            layout.peb_host_exception_offset,
            layout.peb_guest_error_offset,
            layout.peb_log_buf_offset,
            layout.peb_heap_base_offset,
            layout.peb_heap_size_offset,
            layout.peb_stack_top_offset,
            layout.peb_run_mode_flag_offset,
            layout.peb_stack_guard_cookie_offset,
        ];
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
