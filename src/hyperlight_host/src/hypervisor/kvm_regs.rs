/// General-purpose register file for a vCPU, independent of the
/// `kvm-bindings` struct layout so the rest of the crate doesn't need to
/// depend on it directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Regs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

impl From<&kvm_bindings::kvm_regs> for Regs {
    fn from(r: &kvm_bindings::kvm_regs) -> Self {
        Self {
            rax: r.rax,
            rbx: r.rbx,
            rcx: r.rcx,
            rdx: r.rdx,
            rsi: r.rsi,
            rdi: r.rdi,
            rsp: r.rsp,
            rbp: r.rbp,
            r8: r.r8,
            r9: r.r9,
            r10: r.r10,
            r11: r.r11,
            r12: r.r12,
            r13: r.r13,
            r14: r.r14,
            r15: r.r15,
            rip: r.rip,
            rflags: r.rflags,
        }
    }
}

impl From<&Regs> for kvm_bindings::kvm_regs {
    fn from(r: &Regs) -> Self {
        kvm_bindings::kvm_regs {
            rax: r.rax,
            rbx: r.rbx,
            rcx: r.rcx,
            rdx: r.rdx,
            rsi: r.rsi,
            rdi: r.rdi,
            rsp: r.rsp,
            rbp: r.rbp,
            r8: r.r8,
            r9: r.r9,
            r10: r.r10,
            r11: r.r11,
            r12: r.r12,
            r13: r.r13,
            r14: r.r14,
            r15: r.r15,
            rip: r.rip,
            rflags: r.rflags,
        }
    }
}

/// Segment/control register file for a vCPU. Thin wrapper around the raw
/// `kvm_bindings` struct: the fields needed to set up identity-mapped long
/// mode (`cs`, `cr0`, `cr3`, `cr4`, `efer`) are reached through `Deref`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SRegs(kvm_bindings::kvm_sregs);

impl std::ops::Deref for SRegs {
    type Target = kvm_bindings::kvm_sregs;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SRegs {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<&kvm_bindings::kvm_sregs> for SRegs {
    fn from(s: &kvm_bindings::kvm_sregs) -> Self {
        Self(*s)
    }
}

impl From<&SRegs> for kvm_bindings::kvm_sregs {
    fn from(s: &SRegs) -> Self {
        s.0
    }
}

/// Control register bits needed to enter 64-bit long mode with paging.
pub(crate) const CR0_PE: u64 = 1 << 0;
pub(crate) const CR0_PG: u64 = 1 << 31;
pub(crate) const CR4_PAE: u64 = 1 << 5;
pub(crate) const EFER_LME: u64 = 1 << 8;
pub(crate) const EFER_LMA: u64 = 1 << 10;

/// Set `sregs` up for 64-bit long mode, identity-mapped through `cr3`,
/// with a flat 64-bit code segment.
pub(crate) fn set_long_mode(sregs: &mut SRegs, cr3: u64) {
    sregs.cr3 = cr3;
    sregs.cr4 = CR4_PAE;
    sregs.cr0 = CR0_PE | CR0_PG;
    sregs.efer = EFER_LME | EFER_LMA;

    let mut code_seg = sregs.cs;
    code_seg.base = 0;
    code_seg.limit = 0xffff_ffff;
    code_seg.selector = 1 << 3;
    code_seg.present = 1;
    code_seg.type_ = 0xb; // execute, read, accessed
    code_seg.dpl = 0;
    code_seg.db = 0;
    code_seg.s = 1;
    code_seg.l = 1; // 64-bit code segment
    code_seg.g = 1;
    sregs.cs = code_seg;

    let mut data_seg = sregs.ds;
    data_seg.base = 0;
    data_seg.limit = 0xffff_ffff;
    data_seg.selector = 2 << 3;
    data_seg.present = 1;
    data_seg.type_ = 0x3; // read/write, accessed
    data_seg.dpl = 0;
    data_seg.db = 1;
    data_seg.s = 1;
    data_seg.l = 0;
    data_seg.g = 1;
    sregs.ds = data_seg;
    sregs.es = data_seg;
    sregs.fs = data_seg;
    sregs.gs = data_seg;
    sregs.ss = data_seg;
}
