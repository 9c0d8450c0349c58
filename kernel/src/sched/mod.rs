//! Round-robin scheduling

mod scheduler;

pub use scheduler::{Scheduler, QUANTUM_TICKS};
