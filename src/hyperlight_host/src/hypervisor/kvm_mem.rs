use std::ffi::c_void;

use anyhow::{bail, Result};
use kvm_bindings::kvm_userspace_memory_region;
use kvm_ioctls::VmFd;

use crate::mem::shared_mem::SharedMemory;

/// Register `guest_mem`'s backing pages with `vm` as a single userspace
/// memory region at guest physical address `guest_phys_addr`. Returns the
/// slot the region was registered under so it can later be unmapped with
/// [`unmap_vm_memory_region_raw`].
pub(crate) fn map_vm_memory_region(
    vm: &VmFd,
    guest_phys_addr: u64,
    guest_mem: &SharedMemory,
) -> Result<u32> {
    map_vm_memory_region_raw(
        vm,
        guest_phys_addr,
        guest_mem.raw_ptr(),
        guest_mem.mem_size() as u64,
    )
}

/// Register a raw host memory range with `vm` at guest physical address
/// `guest_phys_addr`, on slot 0. Only one region is ever mapped per VM in
/// this crate, so a fixed slot number is sufficient.
pub(crate) fn map_vm_memory_region_raw(
    vm: &VmFd,
    guest_phys_addr: u64,
    host_addr: *mut c_void,
    mem_size: u64,
) -> Result<u32> {
    if mem_size == 0 {
        bail!("cannot map a zero-sized memory region");
    }
    const SLOT: u32 = 0;
    let region = kvm_userspace_memory_region {
        slot: SLOT,
        flags: 0,
        guest_phys_addr,
        memory_size: mem_size,
        userspace_addr: host_addr as u64,
    };
    unsafe { vm.set_user_memory_region(region) }?;
    Ok(SLOT)
}

/// Unregister the memory region previously mapped onto `slot`.
pub(crate) fn unmap_vm_memory_region_raw(vm: &VmFd, slot: &mut u32) -> Result<()> {
    let region = kvm_userspace_memory_region {
        slot: *slot,
        flags: 0,
        guest_phys_addr: 0,
        memory_size: 0,
        userspace_addr: 0,
    };
    unsafe { vm.set_user_memory_region(region) }?;
    Ok(())
}
