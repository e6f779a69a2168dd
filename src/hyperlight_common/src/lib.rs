#![no_std]

extern crate alloc;

/// Message schemas shared between the sandbox host and the guest: function
/// calls, results, guest errors, log records and the host-function table.
pub mod flatbuffer_wrappers;
/// Layout constants shared between the host and the guest's view of the
/// mapped sandbox region.
pub mod mem;
