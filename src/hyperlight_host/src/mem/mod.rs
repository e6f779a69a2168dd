//! Shared memory, the PE loader, the memory layout schedule, and the memory
//! manager that composes them into the guest's address space.
//!
//! The guest's memory region is a single anonymous mmap, guarded on both
//! sides by `PROT_NONE` pages. The page tables live at the start of the
//! region, followed by the loaded PE image, then a fixed schedule of
//! buffers (input, output, host-function table, host exception, guest
//! error, log) and finally the heap and stack. [`layout`] computes the
//! offsets of that schedule; [`mgr`] is the read/write API built on top of
//! it.

pub mod layout;
pub mod mgr;
pub mod pe;
pub mod ptr;
pub mod ptr_addr_space;
pub mod ptr_offset;
pub mod shared_mem;
pub mod shared_mem_snapshot;
mod try_add_ext;


pub use layout::SandboxMemoryLayout;
pub use mgr::SandboxMemoryManager;
pub use ptr::{GuestPtr, HostPtr, RawPtr};
pub use ptr_offset::Offset;
pub use shared_mem::SharedMemory;
