//! Interrupt descriptor table and trap trampolines
//!
//! 256 gates: the 32 CPU exception vectors, the 16 remapped device
//! vectors, and the user-callable system-call gate at 0x80 (DPL 3).
//! Every stub funnels through `trap_common`, which builds the uniform
//! [`TrapFrame`](crate::irq::TrapFrame), switches to kernel data
//! segments, and calls into [`crate::irq::dispatch`]. Vectors without a
//! CPU-pushed error code push a zero so the frame layout never varies.
//!
//! Interrupt gates leave IF clear, so handlers run with device
//! interrupts disabled; `iretd` restores the interrupted flag state.

use lazy_static::lazy_static;

use crate::irq::TrapFrame;

/// Present, ring-0 interrupt gate.
const GATE_KERNEL: u8 = 0x8E;

/// Present, ring-3-callable interrupt gate (the syscall vector).
const GATE_USER: u8 = 0xEE;

/// One 8-byte gate descriptor.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    base_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    base_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            base_low: 0,
            selector: 0,
            zero: 0,
            flags: 0,
            base_high: 0,
        }
    }

    fn gate(handler: unsafe extern "C" fn(), flags: u8) -> Self {
        let base = handler as usize as u32;
        Self {
            base_low: (base & 0xFFFF) as u16,
            selector: crate::arch::KERNEL_CODE_SELECTOR as u16,
            zero: 0,
            flags,
            base_high: (base >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

macro_rules! trap_stub {
    ($name:ident, $vector:literal, no_error) => {
        core::arch::global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push 0\n",
            "    push ",
            $vector,
            "\n",
            "    jmp trap_common\n",
        ));
    };
    ($name:ident, $vector:literal, with_error) => {
        // The CPU already pushed the error code.
        core::arch::global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push ",
            $vector,
            "\n",
            "    jmp trap_common\n",
        ));
    };
}

trap_stub!(isr0, 0, no_error);
trap_stub!(isr1, 1, no_error);
trap_stub!(isr2, 2, no_error);
trap_stub!(isr3, 3, no_error);
trap_stub!(isr4, 4, no_error);
trap_stub!(isr5, 5, no_error);
trap_stub!(isr6, 6, no_error);
trap_stub!(isr7, 7, no_error);
trap_stub!(isr8, 8, with_error);
trap_stub!(isr9, 9, no_error);
trap_stub!(isr10, 10, with_error);
trap_stub!(isr11, 11, with_error);
trap_stub!(isr12, 12, with_error);
trap_stub!(isr13, 13, with_error);
trap_stub!(isr14, 14, with_error);
trap_stub!(isr15, 15, no_error);
trap_stub!(isr16, 16, no_error);
trap_stub!(isr17, 17, with_error);
trap_stub!(isr18, 18, no_error);
trap_stub!(isr19, 19, no_error);
trap_stub!(isr20, 20, no_error);
trap_stub!(isr21, 21, no_error);
trap_stub!(isr22, 22, no_error);
trap_stub!(isr23, 23, no_error);
trap_stub!(isr24, 24, no_error);
trap_stub!(isr25, 25, no_error);
trap_stub!(isr26, 26, no_error);
trap_stub!(isr27, 27, no_error);
trap_stub!(isr28, 28, no_error);
trap_stub!(isr29, 29, no_error);
trap_stub!(isr30, 30, no_error);
trap_stub!(isr31, 31, no_error);

trap_stub!(irq0, 32, no_error);
trap_stub!(irq1, 33, no_error);
trap_stub!(irq2, 34, no_error);
trap_stub!(irq3, 35, no_error);
trap_stub!(irq4, 36, no_error);
trap_stub!(irq5, 37, no_error);
trap_stub!(irq6, 38, no_error);
trap_stub!(irq7, 39, no_error);
trap_stub!(irq8, 40, no_error);
trap_stub!(irq9, 41, no_error);
trap_stub!(irq10, 42, no_error);
trap_stub!(irq11, 43, no_error);
trap_stub!(irq12, 44, no_error);
trap_stub!(irq13, 45, no_error);
trap_stub!(irq14, 46, no_error);
trap_stub!(irq15, 47, no_error);

trap_stub!(isr_syscall, 128, no_error);

// The shared tail: build the uniform frame, enter kernel segments, call
// the dispatcher with a pointer to the frame, then unwind and return to
// the interrupted context.
core::arch::global_asm!(
    ".global trap_common",
    "trap_common:",
    "    pusha",
    "    push ds",
    "    push es",
    "    push fs",
    "    push gs",
    "    mov ax, 0x10",
    "    mov ds, ax",
    "    mov es, ax",
    "    mov fs, ax",
    "    mov gs, ax",
    "    push esp",
    "    call trap_dispatch_entry",
    "    add esp, 4",
    "    pop gs",
    "    pop fs",
    "    pop es",
    "    pop ds",
    "    popa",
    "    add esp, 8",
    "    iretd",
);

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn isr20();
    fn isr21();
    fn isr22();
    fn isr23();
    fn isr24();
    fn isr25();
    fn isr26();
    fn isr27();
    fn isr28();
    fn isr29();
    fn isr30();
    fn isr31();
    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();
    fn isr_syscall();
}

lazy_static! {
    static ref IDT: [IdtEntry; 256] = build();
}

fn build() -> [IdtEntry; 256] {
    let mut idt = [IdtEntry::missing(); 256];
    let exceptions: [unsafe extern "C" fn(); 32] = [
        isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12,
        isr13, isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24,
        isr25, isr26, isr27, isr28, isr29, isr30, isr31,
    ];
    let irqs: [unsafe extern "C" fn(); 16] = [
        irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12,
        irq13, irq14, irq15,
    ];

    for (vector, &stub) in exceptions.iter().enumerate() {
        idt[vector] = IdtEntry::gate(stub, GATE_KERNEL);
    }
    for (line, &stub) in irqs.iter().enumerate() {
        idt[crate::irq::IRQ_BASE as usize + line] = IdtEntry::gate(stub, GATE_KERNEL);
    }
    idt[crate::irq::SYSCALL_VECTOR as usize] = IdtEntry::gate(isr_syscall, GATE_USER);
    idt
}

/// Load the table.
pub fn init() {
    let pointer = DescriptorPointer {
        limit: (core::mem::size_of::<[IdtEntry; 256]>() - 1) as u16,
        base: &*IDT as *const _ as u32,
    };
    let descriptor = &pointer as *const DescriptorPointer;
    // SAFETY: the table is 'static and every installed gate targets a
    // trampoline defined above.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) descriptor, options(nostack));
    }
}

/// C-level landing point for every trampoline.
#[no_mangle]
extern "C" fn trap_dispatch_entry(frame: *mut TrapFrame) {
    // SAFETY: trap_common passes a pointer to the frame it just built
    // on the kernel stack; it stays valid for the whole call.
    let frame = unsafe { &mut *frame };

    // Interrupt gates keep IF clear, so nothing nests on top of us; a
    // held lock here means a fault inside the dispatcher itself.
    let mut guard = crate::bootstrap::KERNEL
        .try_lock()
        .expect("trap dispatcher re-entered");
    if let Some(kernel) = guard.as_mut() {
        crate::irq::dispatch(kernel, frame);
    }
}
