//! 32-bit ELF executable loading
//!
//! Decodes a little-endian i386 `ET_EXEC` image and maps its loadable
//! segments into an address space: pages are allocated, zeroed, mapped
//! user-writable, and the file bytes copied in. Only `PT_LOAD` segments
//! are honored; the entry point comes from the header.

use crate::error::{KernelError, KernelResult};
use crate::mm::{AddressSpace, FrameBitmap, PageFlags, PhysWindow, VirtAddr, PAGE_SIZE};

/// `e_ident` magic: 0x7F "ELF".
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// 32-bit class in `e_ident[4]`.
const ELFCLASS32: u8 = 1;
/// Little-endian encoding in `e_ident[5]`.
const ELFDATA2LSB: u8 = 1;
/// Executable object type.
const ET_EXEC: u16 = 2;
/// i386 machine id.
const EM_386: u16 = 3;
/// Loadable program segment.
pub const PT_LOAD: u32 = 1;

/// Decoded ELF header fields the loader needs.
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

/// One program header.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub kind: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
}

fn read_u16(data: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(off..off + 2)?.try_into().ok()?))
}

fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(off..off + 4)?.try_into().ok()?))
}

/// Validate the identification and type fields and decode the header.
pub fn parse_header(data: &[u8]) -> KernelResult<ElfHeader> {
    if data.len() < 52 || data[0..4] != ELF_MAGIC {
        return Err(KernelError::BadExecutable);
    }
    if data[4] != ELFCLASS32 || data[5] != ELFDATA2LSB {
        return Err(KernelError::BadExecutable);
    }
    let e_type = read_u16(data, 16).ok_or(KernelError::BadExecutable)?;
    let machine = read_u16(data, 18).ok_or(KernelError::BadExecutable)?;
    if e_type != ET_EXEC || machine != EM_386 {
        return Err(KernelError::BadExecutable);
    }
    Ok(ElfHeader {
        entry: read_u32(data, 24).ok_or(KernelError::BadExecutable)?,
        phoff: read_u32(data, 28).ok_or(KernelError::BadExecutable)?,
        phentsize: read_u16(data, 42).ok_or(KernelError::BadExecutable)?,
        phnum: read_u16(data, 44).ok_or(KernelError::BadExecutable)?,
    })
}

/// Decode the `index`-th program header.
pub fn parse_program_header(
    data: &[u8],
    header: &ElfHeader,
    index: usize,
) -> KernelResult<ProgramHeader> {
    let base = header.phoff as usize + index * header.phentsize as usize;
    let err = KernelError::BadExecutable;
    Ok(ProgramHeader {
        kind: read_u32(data, base).ok_or(err)?,
        offset: read_u32(data, base + 4).ok_or(err)?,
        vaddr: read_u32(data, base + 8).ok_or(err)?,
        filesz: read_u32(data, base + 16).ok_or(err)?,
        memsz: read_u32(data, base + 20).ok_or(err)?,
        flags: read_u32(data, base + 24).ok_or(err)?,
    })
}

/// Map every loadable segment of `image` into `space` and return the
/// entry point.
pub fn load(
    space: &mut AddressSpace,
    frames: &mut FrameBitmap,
    window: &PhysWindow,
    image: &[u8],
) -> KernelResult<u32> {
    let header = parse_header(image)?;
    if header.phentsize < 32 {
        return Err(KernelError::BadExecutable);
    }

    for index in 0..header.phnum as usize {
        let phdr = parse_program_header(image, &header, index)?;
        if phdr.kind != PT_LOAD {
            continue;
        }
        if phdr.filesz > phdr.memsz {
            return Err(KernelError::BadExecutable);
        }
        let file_end = phdr.offset as usize + phdr.filesz as usize;
        if file_end > image.len() {
            return Err(KernelError::BadExecutable);
        }

        let start = VirtAddr::new(phdr.vaddr).align_down();
        let end = VirtAddr::new(phdr.vaddr + phdr.memsz).align_up();

        // Allocate, zero, and map the segment's pages.
        let mut page = start;
        while page < end {
            if space.translate(window, page).is_none() {
                let frame = space.alloc_page(frames, window, page, PageFlags::USER_RW)?;
                window.zero(frame, PAGE_SIZE);
            }
            page = page.offset(PAGE_SIZE as u32);
        }

        // Copy the file-backed bytes through the physical frames.
        let mut copied = 0usize;
        while copied < phdr.filesz as usize {
            let virt = VirtAddr::new(phdr.vaddr + copied as u32);
            let (phys, _) = space
                .translate(window, virt)
                .ok_or(KernelError::BadExecutable)?;
            let chunk =
                (PAGE_SIZE - virt.page_offset() as usize).min(phdr.filesz as usize - copied);
            // SAFETY: freshly mapped frames owned by `space`.
            let dst = unsafe { window.bytes_mut(phys, chunk) };
            dst.copy_from_slice(&image[phdr.offset as usize + copied..][..chunk]);
            copied += chunk;
        }
    }

    Ok(header.entry)
}
