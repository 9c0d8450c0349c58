//! System timer
//!
//! A 100 Hz periodic tick from PIT channel 0 (square-wave mode, rounded
//! divisor of the 1.193182 MHz source). Each tick bumps the monotonic
//! counter and drives the scheduler; a process that exhausts its
//! quantum is switched out right here, inside the interrupt's trap
//! frame.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::bootstrap::Kernel;
use crate::irq::TrapFrame;
use crate::process::lifecycle;

/// Input frequency of the interval timer (Hz).
pub const PIT_BASE_HZ: u32 = 1_193_182;

/// Configured tick rate (Hz).
pub const TIMER_HZ: u32 = 100;

/// Milliseconds per tick.
pub const MS_PER_TICK: u64 = (1000 / TIMER_HZ) as u64;

/// Monotonic tick counter since boot.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Channel-0 divisor for a target rate, rounded to nearest.
pub const fn divisor(hz: u32) -> u16 {
    ((PIT_BASE_HZ + hz / 2) / hz) as u16
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Uptime in milliseconds.
pub fn uptime_ms() -> u64 {
    ticks() * MS_PER_TICK
}

/// The IRQ0 handler: count the tick, let the scheduler account it, and
/// perform whatever switch it decides on.
pub fn timer_interrupt(kernel: &mut Kernel, frame: &mut TrapFrame) {
    TICKS.fetch_add(1, Ordering::Relaxed);
    if let Some(next) = kernel.sched.tick(&mut kernel.processes) {
        lifecycle::switch_to(kernel, next, frame);
    }
}

/// Program the interval timer and unmask its line.
#[cfg(target_arch = "x86")]
pub fn init() {
    use crate::arch::x86::{pic, port::outb};

    const PIT_CHANNEL0: u16 = 0x40;
    const PIT_COMMAND: u16 = 0x43;
    // Channel 0, lobyte/hibyte access, mode 3 (square wave).
    const PIT_MODE: u8 = 0x36;

    let divisor = divisor(TIMER_HZ);
    // SAFETY: the documented PIT programming sequence.
    unsafe {
        outb(PIT_COMMAND, PIT_MODE);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
    pic::enable_irq(crate::irq::IRQ_TIMER);
}
