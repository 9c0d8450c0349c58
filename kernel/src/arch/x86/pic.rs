//! Legacy 8259 interrupt controllers
//!
//! Remapped so IRQs 0..15 land on vectors 32..47, clear of the CPU
//! exception range: master offset 0x20, slave 0x28, slave cascaded on
//! line 2, 8086 mode. Line masks survive the remap.

use super::port::{inb, outb};

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;

const EOI: u8 = 0x20;

/// Vector offset of the master controller.
pub const MASTER_OFFSET: u8 = 0x20;

/// Vector offset of the slave controller.
pub const SLAVE_OFFSET: u8 = 0x28;

/// Run the initialization sequence, preserving the line masks.
pub fn remap() {
    // SAFETY: the documented 8259 initialization word sequence.
    unsafe {
        let mask1 = inb(PIC1_DATA);
        let mask2 = inb(PIC2_DATA);

        outb(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        outb(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);

        outb(PIC1_DATA, MASTER_OFFSET);
        outb(PIC2_DATA, SLAVE_OFFSET);

        // Master: slave on line 2. Slave: cascade identity 2.
        outb(PIC1_DATA, 0x04);
        outb(PIC2_DATA, 0x02);

        outb(PIC1_DATA, ICW4_8086);
        outb(PIC2_DATA, ICW4_8086);

        outb(PIC1_DATA, mask1);
        outb(PIC2_DATA, mask2);
    }
}

/// Acknowledge the master controller.
pub fn eoi_master() {
    // SAFETY: writing the EOI command to the command port.
    unsafe { outb(PIC1_COMMAND, EOI) };
}

/// Acknowledge slave first, then master.
pub fn eoi_slave_then_master() {
    // SAFETY: as above, both controllers.
    unsafe {
        outb(PIC2_COMMAND, EOI);
        outb(PIC1_COMMAND, EOI);
    }
}

/// Clear the mask bit for one IRQ line.
pub fn enable_irq(irq: u8) {
    let (port, line) = if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    };
    // SAFETY: read-modify-write of the mask register.
    unsafe {
        let mask = inb(port) & !(1 << line);
        outb(port, mask);
    }
}

/// Set the mask bit for one IRQ line.
pub fn disable_irq(irq: u8) {
    let (port, line) = if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    };
    // SAFETY: read-modify-write of the mask register.
    unsafe {
        let mask = inb(port) | (1 << line);
        outb(port, mask);
    }
}

/// Mask every line on both controllers.
pub fn disable_all() {
    // SAFETY: writes 0xFF to both mask registers.
    unsafe {
        outb(PIC1_DATA, 0xFF);
        outb(PIC2_DATA, 0xFF);
    }
}
