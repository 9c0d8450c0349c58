//! Global descriptor table
//!
//! Five flat 4 GiB descriptors, fixed by position: null, kernel code,
//! kernel data, user code, user data. Selector values are in
//! [`crate::arch`].

use lazy_static::lazy_static;

/// One 8-byte segment descriptor.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn flat(access: u8) -> Self {
        // Base 0, limit 0xFFFFF, 4 KiB granularity, 32-bit (0xCF).
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_middle: 0,
            access,
            granularity: 0xCF,
            base_high: 0,
        }
    }

    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }
}

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

lazy_static! {
    static ref GDT: [GdtEntry; 5] = [
        GdtEntry::null(),
        GdtEntry::flat(0x9A), // kernel code: present, ring 0, executable, readable
        GdtEntry::flat(0x92), // kernel data: present, ring 0, writable
        GdtEntry::flat(0xFA), // user code: present, ring 3, executable, readable
        GdtEntry::flat(0xF2), // user data: present, ring 3, writable
    ];
}

/// Load the table and reload every segment register.
pub fn init() {
    let pointer = DescriptorPointer {
        limit: (core::mem::size_of::<[GdtEntry; 5]>() - 1) as u16,
        base: &*GDT as *const _ as u32,
    };

    let descriptor = &pointer as *const DescriptorPointer;
    // SAFETY: the table is 'static and correctly formed; the far return
    // reloads CS with the new kernel code selector.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            "mov ax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push 0x08",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) descriptor,
            out("eax") _,
        );
    }
}
