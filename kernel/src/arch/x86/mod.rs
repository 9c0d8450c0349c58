//! x86 (32-bit protected mode) support
//!
//! Descriptor tables, the remapped legacy interrupt controllers, the
//! programmable interval timer's port programming, port I/O, and the
//! COM1 serial sink. Only compiled for `target_arch = "x86"`.

pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;
pub mod serial;

/// Install segment descriptors, the interrupt table, and remap the
/// interrupt controllers. Interrupts stay disabled until the kernel is
/// assembled.
pub fn init() {
    gdt::init();
    idt::init();
    pic::remap();
    serial::init();
}
