//! Trap and IRQ dispatch
//!
//! Every vector funnels through the assembly trampolines in
//! [`crate::arch::x86::idt`] into a uniform [`TrapFrame`] and the single
//! [`dispatch`] entry point here. Vectors 0..31 are CPU exceptions and
//! are handled by policy: a fault taken from user mode terminates the
//! offending process, a fault taken from kernel mode is fatal. Vectors
//! 32..47 are the remapped legacy device interrupts and run whatever
//! handler is registered, then acknowledge the interrupt controller
//! (slave first where applicable).
//!
//! Handlers run with device interrupts disabled; the trampoline's `iret`
//! restores the interrupted flag state.

use crate::bootstrap::Kernel;
use crate::process;

/// First vector of the remapped device range.
pub const IRQ_BASE: u8 = 32;

/// Number of legacy IRQ lines.
pub const IRQ_COUNT: u8 = 16;

/// The user-callable system-call gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// IRQ line numbers (offset by [`IRQ_BASE`] on the wire).
pub const IRQ_TIMER: u8 = 0;
pub const IRQ_KEYBOARD: u8 = 1;
pub const IRQ_CASCADE: u8 = 2;
pub const IRQ_ATA0: u8 = 14;
pub const IRQ_ATA1: u8 = 15;

/// CPU exception vectors the dispatcher treats specially.
pub const VECTOR_DIVIDE_ERROR: u8 = 0;
pub const VECTOR_INVALID_OPCODE: u8 = 6;
pub const VECTOR_DOUBLE_FAULT: u8 = 8;
pub const VECTOR_GP_FAULT: u8 = 13;
pub const VECTOR_PAGE_FAULT: u8 = 14;

/// The uniform frame the trampolines push on the kernel stack.
///
/// Layout matches the assembly: segment registers pushed last (lowest
/// addresses), then the `pusha` block, then the vector and error-code
/// slots, then the CPU-pushed interrupt frame. Vectors without a CPU
/// error code get a zero pushed so the layout never varies.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// Whether the interrupted context was user mode (RPL 3 selector).
    pub fn from_user_mode(&self) -> bool {
        self.cs & 0x3 == 0x3
    }
}

/// Vectors for which the CPU pushes an error code; the trampolines push
/// a zero for every other vector.
pub fn pushes_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10..=14 | 17)
}

/// Which controllers must be acknowledged after a given vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EoiTarget {
    None,
    Master,
    SlaveThenMaster,
}

pub fn eoi_target(vector: u8) -> EoiTarget {
    match vector {
        v if (IRQ_BASE..IRQ_BASE + 8).contains(&v) => EoiTarget::Master,
        v if (IRQ_BASE + 8..IRQ_BASE + IRQ_COUNT).contains(&v) => EoiTarget::SlaveThenMaster,
        _ => EoiTarget::None,
    }
}

/// Handler invoked for a registered vector.
pub type IrqHandler = fn(&mut Kernel, &mut TrapFrame);

/// Per-vector handler registry.
pub struct IrqTable {
    handlers: [Option<IrqHandler>; 256],
}

impl IrqTable {
    pub const fn new() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    pub fn register(&mut self, vector: u8, handler: IrqHandler) {
        self.handlers[vector as usize] = Some(handler);
    }

    pub fn handler(&self, vector: u8) -> Option<IrqHandler> {
        self.handlers[vector as usize]
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The common dispatcher behind every trampoline.
pub fn dispatch(kernel: &mut Kernel, frame: &mut TrapFrame) {
    let vector = frame.vector as u8;
    if vector < IRQ_BASE {
        handle_exception(kernel, frame);
    } else if let Some(handler) = kernel.irq.handler(vector) {
        handler(kernel, frame);
    }

    match eoi_target(vector) {
        EoiTarget::None => {}
        EoiTarget::Master => crate::arch::eoi_master(),
        EoiTarget::SlaveThenMaster => crate::arch::eoi_slave_then_master(),
    }
}

/// Exit status for a process killed by a fault: 128 plus the signal its
/// fault corresponds to.
pub fn fault_exit_code(vector: u8) -> i32 {
    let signal = match vector {
        VECTOR_DIVIDE_ERROR => crate::process::signal::SIGFPE,
        VECTOR_INVALID_OPCODE => crate::process::signal::SIGILL,
        VECTOR_GP_FAULT | VECTOR_PAGE_FAULT => crate::process::signal::SIGSEGV,
        _ => crate::process::signal::SIGILL,
    };
    128 + signal as i32
}

fn handle_exception(kernel: &mut Kernel, frame: &mut TrapFrame) {
    let vector = frame.vector as u8;
    let fault_addr = if vector == VECTOR_PAGE_FAULT {
        crate::arch::read_fault_address()
    } else {
        0
    };

    if frame.from_user_mode() {
        let pid = kernel.processes.current();
        log::warn!(
            "{} in user mode (pid {:?}, eip {:#010x}, addr {:#010x}, err {:#x}): killing process",
            exception_name(vector),
            pid,
            frame.eip,
            fault_addr,
            frame.error_code,
        );
        process::lifecycle::fault_exit(kernel, frame, fault_exit_code(vector));
        return;
    }

    // A fault inside the kernel means corrupted state; halt with a
    // diagnostic rather than limp on.
    panic!(
        "kernel {}: eip={:#010x} err={:#x} addr={:#010x}",
        exception_name(vector),
        frame.eip,
        frame.error_code,
        fault_addr,
    );
}

pub fn exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug exception",
        2 => "non-maskable interrupt",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range exceeded",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        9 => "coprocessor segment overrun",
        10 => "invalid TSS",
        11 => "segment not present",
        12 => "stack fault",
        13 => "general protection fault",
        14 => "page fault",
        16 => "x87 floating-point fault",
        17 => "alignment check",
        18 => "machine check",
        19 => "SIMD floating-point fault",
        20 => "virtualization exception",
        _ => "reserved exception",
    }
}
