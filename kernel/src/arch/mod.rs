//! Architecture support
//!
//! Everything that touches privileged CPU state lives behind this
//! module: descriptor tables, the interrupt controllers, port I/O, the
//! paging control registers. The functions here are the portable seam —
//! real instructions on `target_arch = "x86"`, benign no-ops elsewhere
//! so the resource-management logic stays host-testable.

#[cfg(target_arch = "x86")]
pub mod x86;

use crate::mm::{PhysAddr, VirtAddr};

/// Fixed selectors, by GDT position: null, kernel code, kernel data,
/// user code, user data. User selectors carry RPL 3.
pub const KERNEL_CODE_SELECTOR: u32 = 0x08;
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;
pub const USER_CODE_SELECTOR: u32 = 0x18 | 0x3;
pub const USER_DATA_SELECTOR: u32 = 0x20 | 0x3;

/// Top of the shared kernel stack the trap trampolines run on.
pub const KERNEL_STACK_TOP: u32 = 0x9_F000;

/// Load a page-directory root into the paging-root register.
pub fn load_page_directory(root: PhysAddr) {
    #[cfg(target_arch = "x86")]
    // SAFETY: the root is a live, correctly formed directory frame.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) root.as_u32(), options(nostack));
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = root;
}

/// Set the paging-enable bit in CR0.
pub fn enable_paging() {
    #[cfg(target_arch = "x86")]
    // SAFETY: called once during boot, after the kernel space is built
    // and its root is loaded.
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

/// Invalidate the translation cache entry for one page.
pub fn invlpg(virt: VirtAddr) {
    #[cfg(target_arch = "x86")]
    // SAFETY: invlpg has no memory effects beyond the TLB.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) virt.as_u32(), options(nostack));
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = virt;
}

/// The faulting linear address of the last page fault (CR2).
pub fn read_fault_address() -> u32 {
    #[cfg(target_arch = "x86")]
    {
        let addr: u32;
        // SAFETY: reading CR2 has no side effects.
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) addr, options(nostack));
        }
        return addr;
    }
    #[cfg(not(target_arch = "x86"))]
    return 0;
}

/// Acknowledge the master interrupt controller.
pub fn eoi_master() {
    #[cfg(target_arch = "x86")]
    x86::pic::eoi_master();
}

/// Acknowledge slave first, then master (IRQs 8..15).
pub fn eoi_slave_then_master() {
    #[cfg(target_arch = "x86")]
    x86::pic::eoi_slave_then_master();
}

/// Disable device interrupts for the lifetime of the guard, restoring
/// the previous state on drop. Kernel critical sections wrap themselves
/// in one of these.
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        #[cfg(target_arch = "x86")]
        {
            let flags: u32;
            // SAFETY: pushfd/pop reads EFLAGS; cli only clears IF.
            unsafe {
                core::arch::asm!("pushfd", "pop {}", "cli", out(reg) flags);
            }
            return Self {
                was_enabled: flags & 0x200 != 0,
            };
        }
        #[cfg(not(target_arch = "x86"))]
        return Self { was_enabled: false };
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            interrupts_enable();
        }
    }
}

/// Enable device interrupts.
pub fn interrupts_enable() {
    #[cfg(target_arch = "x86")]
    // SAFETY: sti only sets IF.
    unsafe {
        core::arch::asm!("sti", options(nostack, nomem));
    }
}

/// Disable device interrupts.
pub fn interrupts_disable() {
    #[cfg(target_arch = "x86")]
    // SAFETY: cli only clears IF.
    unsafe {
        core::arch::asm!("cli", options(nostack, nomem));
    }
}

/// Park the CPU for good: the last process exited or the kernel is in
/// an unrecoverable state.
pub fn idle_forever() -> ! {
    #[cfg(target_arch = "x86")]
    loop {
        // SAFETY: hlt with interrupts disabled parks the CPU.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nostack, nomem));
        }
    }
    #[cfg(not(target_arch = "x86"))]
    panic!("idle_forever reached on a host build");
    // The x86 arm never falls through; the host arm panics.
}
