//! HematiteOS kernel library
//!
//! The resource-management and isolation core of a small 32-bit x86
//! kernel: physical frame allocation, two-level paging, the kernel
//! heap, processes with private address spaces, a round-robin
//! scheduler, trap/IRQ dispatch over remapped legacy controllers, and
//! the `int 0x80` system-call boundary with pipes, message queues,
//! shared memory, and signal bookkeeping.
//!
//! Everything that touches privileged CPU state is confined to
//! [`arch`]; the rest of the tree is written against the
//! [`mm::PhysWindow`] view of physical memory and builds (and tests) on
//! a host target unchanged.

#![no_std]

extern crate alloc;

// Host targets (tests, tooling) link std so the standard #[test]
// harness runs, with the system allocator backing test allocations.
// Bare metal registers the kernel heap instead (see mm::heap).
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod arch;
pub mod bootstrap;
pub mod elf;
pub mod error;
pub mod fs;
pub mod ipc;
pub mod irq;
pub mod klog;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;
pub mod timer;

#[cfg(any(test, feature = "testing"))]
pub mod test_support;

#[cfg(test)]
mod integration_tests;

pub use bootstrap::Kernel;
pub use error::{KernelError, KernelResult};
