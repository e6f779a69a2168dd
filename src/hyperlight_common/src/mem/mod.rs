//! Constants describing the page granularity the sandbox region is built
//! out of. The exact PEB header layout lives on the host side (it is the
//! one component that is never shared with `no_std` guest code), but the
//! page size is needed on both sides to reason about guard pages and
//! region sizing.

pub const PAGE_SHIFT: u64 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
pub const PAGE_SIZE_USIZE: usize = 1 << PAGE_SHIFT;

/// Round `val` up to the next multiple of the page size.
pub const fn round_up_to_page(val: u64) -> u64 {
    (val + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
