//! User pointer validation and copy helpers
//!
//! Every system call validates pointer arguments against the caller's
//! address space before dereferencing them: each touched page must be
//! present and user-accessible (and writable for writes). Transfers then
//! go page by page through the physical window, so a hostile pointer can
//! fail but never crash the kernel.

use super::{AddressSpace, PageFlags, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};

use alloc::string::String;
use alloc::vec::Vec;

/// Lowest address user mappings may occupy (above the kernel identity
/// mapping).
pub const USER_SPACE_START: u32 = 0x40_0000;

/// Exclusive upper bound of user space (the kernel physmap base).
pub const USER_SPACE_END: u32 = super::vmm::PHYSMAP_BASE;

/// Check that `[addr, addr + len)` lies in user space and every page is
/// mapped user-accessible; `write` additionally requires the writable
/// bit.
pub fn validate_range(
    space: &AddressSpace,
    window: &PhysWindow,
    addr: u32,
    len: usize,
    write: bool,
) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = addr as u64 + len as u64;
    if addr < USER_SPACE_START || end > USER_SPACE_END as u64 {
        return Err(KernelError::BadUserPointer { addr });
    }

    let mut page = VirtAddr::new(addr).align_down();
    while (page.as_u32() as u64) < end {
        let Some((_, flags)) = space.translate(window, page) else {
            return Err(KernelError::BadUserPointer { addr });
        };
        if !flags.contains(PageFlags::USER) {
            return Err(KernelError::BadUserPointer { addr });
        }
        if write && !flags.contains(PageFlags::WRITABLE) {
            return Err(KernelError::BadUserPointer { addr });
        }
        page = page.offset(PAGE_SIZE as u32);
    }
    Ok(())
}

/// Copy `buf.len()` bytes from user memory into `buf`.
pub fn copy_from_user(
    space: &AddressSpace,
    window: &PhysWindow,
    addr: u32,
    buf: &mut [u8],
) -> KernelResult<()> {
    validate_range(space, window, addr, buf.len(), false)?;
    let mut done = 0;
    while done < buf.len() {
        let virt = VirtAddr::new(addr + done as u32);
        let (phys, _) = space
            .translate(window, virt)
            .ok_or(KernelError::BadUserPointer { addr })?;
        let chunk = (PAGE_SIZE - virt.page_offset() as usize).min(buf.len() - done);
        // SAFETY: validated user frame; the kernel-side buffer is ours.
        let src = unsafe { window.bytes_mut(phys, chunk) };
        buf[done..done + chunk].copy_from_slice(src);
        done += chunk;
    }
    Ok(())
}

/// Copy `data` into user memory at `addr`.
pub fn copy_to_user(
    space: &AddressSpace,
    window: &PhysWindow,
    addr: u32,
    data: &[u8],
) -> KernelResult<()> {
    validate_range(space, window, addr, data.len(), true)?;
    let mut done = 0;
    while done < data.len() {
        let virt = VirtAddr::new(addr + done as u32);
        let (phys, _) = space
            .translate(window, virt)
            .ok_or(KernelError::BadUserPointer { addr })?;
        let chunk = (PAGE_SIZE - virt.page_offset() as usize).min(data.len() - done);
        // SAFETY: validated writable user frame.
        let dst = unsafe { window.bytes_mut(phys, chunk) };
        dst.copy_from_slice(&data[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Copy a NUL-terminated string of at most `max` bytes (terminator
/// excluded) out of user memory. Fails if no terminator appears within
/// the limit or the bytes are not UTF-8.
pub fn copy_str_from_user(
    space: &AddressSpace,
    window: &PhysWindow,
    addr: u32,
    max: usize,
) -> KernelResult<String> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut offset = 0usize;
    'outer: while offset <= max {
        let virt = VirtAddr::new(addr + offset as u32);
        validate_range(space, window, virt.as_u32(), 1, false)?;
        let (phys, _) = space
            .translate(window, virt)
            .ok_or(KernelError::BadUserPointer { addr })?;
        let chunk = (PAGE_SIZE - virt.page_offset() as usize).min(max + 1 - offset);
        // SAFETY: validated user frame.
        let src = unsafe { window.bytes_mut(phys, chunk) };
        for &byte in src.iter() {
            if byte == 0 {
                break 'outer;
            }
            bytes.push(byte);
        }
        offset += chunk;
        if offset > max {
            return Err(KernelError::InvalidArgument);
        }
    }
    if bytes.len() > max {
        return Err(KernelError::InvalidArgument);
    }
    String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
}
