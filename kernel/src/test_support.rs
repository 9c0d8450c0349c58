//! Shared fixtures for host tests
//!
//! Builds a full [`Kernel`] over an arena standing in for physical
//! memory: one 16 MiB usable region starting at 1 MiB, the shape of the
//! reference boot scenario. The arena is leaked so the frame bitmap's
//! `'static` storage stays valid for the duration of the test process.

use crate::bootstrap::Kernel;
use crate::mm::{MemoryRegion, PhysAddr, PhysWindow, RegionKind};

/// Size of the fake RAM arena (16 MiB).
pub const TEST_RAM_BYTES: usize = 16 * 1024 * 1024;

/// Physical base of the fake RAM (1 MiB).
pub const TEST_RAM_BASE: u32 = 0x10_0000;

/// A window over freshly leaked fake RAM.
pub fn test_window() -> PhysWindow {
    let ram = crate::mm::test_ram(TEST_RAM_BYTES);
    unsafe { PhysWindow::new(PhysAddr::new(TEST_RAM_BASE), TEST_RAM_BYTES, ram) }
}

/// The reference memory map: one usable region covering the arena.
pub fn test_memory_map() -> [MemoryRegion; 1] {
    [MemoryRegion::new(
        TEST_RAM_BASE as u64,
        TEST_RAM_BYTES as u64,
        RegionKind::Usable,
    )]
}

/// A booted kernel over fake RAM, ready for process and syscall tests.
pub fn boot_kernel() -> Kernel {
    let window = test_window();
    Kernel::new(window, &test_memory_map()).expect("test kernel boots")
}
