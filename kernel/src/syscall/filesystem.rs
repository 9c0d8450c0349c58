//! File and directory system calls
//!
//! Descriptors route three ways: the console (0/1/2), tagged pipe-end
//! descriptors (see [`crate::ipc::pipe`]), and regular VFS files. Every
//! user buffer is validated against the caller's address space before a
//! single byte moves.

use alloc::string::String;
use alloc::vec::Vec;

use crate::bootstrap::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::fs::file::{SEEK_CUR, SEEK_END, SEEK_SET};
use crate::fs::{NodeType, OpenFile, OpenFlags};
use crate::ipc::pipe;
use crate::mm::user_validation;

/// Cap on a single read/write transfer (one pipe buffer's worth times
/// sixteen); bounds the kernel-side bounce buffer.
const IO_MAX: usize = 64 * 1024;

pub fn sys_write(kernel: &mut Kernel, fd: u32, buf: u32, count: u32) -> KernelResult<usize> {
    let count = (count as usize).min(IO_MAX);
    let data = copy_in(kernel, buf, count)?;

    if pipe::decode_fd(fd as usize).is_some() {
        return kernel.ipc.pipes.write(fd as usize, &data);
    }

    let file = current_file(kernel, fd)?;
    let written = kernel.vfs.write(file.node, file.offset, &data)?;
    advance_offset(kernel, fd, written as u32);
    Ok(written)
}

pub fn sys_read(kernel: &mut Kernel, fd: u32, buf: u32, count: u32) -> KernelResult<usize> {
    let count = (count as usize).min(IO_MAX);
    // Validate the destination before doing any work.
    {
        let proc = kernel
            .processes
            .current_process()
            .ok_or(KernelError::NotFound)?;
        user_validation::validate_range(&proc.space, &kernel.window, buf, count, true)?;
    }

    let mut data = alloc::vec![0u8; count];
    let read = if pipe::decode_fd(fd as usize).is_some() {
        kernel.ipc.pipes.read(fd as usize, &mut data)?
    } else {
        let file = current_file(kernel, fd)?;
        let read = kernel.vfs.read(file.node, file.offset, &mut data)?;
        advance_offset(kernel, fd, read as u32);
        read
    };

    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    user_validation::copy_to_user(&proc.space, &kernel.window, buf, &data[..read])?;
    Ok(read)
}

pub fn sys_open(kernel: &mut Kernel, path_ptr: u32, flags: u32) -> KernelResult<usize> {
    let path = copy_path(kernel, path_ptr)?;
    let flags = OpenFlags::from_bits_truncate(flags);
    let node = kernel.vfs.open(&path, flags)?;
    let offset = if flags.contains(OpenFlags::APPEND) {
        kernel.vfs.node(node).map(|n| n.size()).unwrap_or(0)
    } else {
        0
    };
    let proc = kernel
        .processes
        .current_process_mut()
        .ok_or(KernelError::NotFound)?;
    proc.files.open(OpenFile {
        node,
        offset,
        flags,
    })
}

pub fn sys_close(kernel: &mut Kernel, fd: u32) -> KernelResult<usize> {
    if pipe::decode_fd(fd as usize).is_some() {
        kernel.ipc.pipes.close(fd as usize)?;
        return Ok(0);
    }
    let proc = kernel
        .processes
        .current_process_mut()
        .ok_or(KernelError::NotFound)?;
    proc.files.close(fd as usize);
    Ok(0)
}

pub fn sys_seek(kernel: &mut Kernel, fd: u32, offset: u32, whence: u32) -> KernelResult<usize> {
    let file = current_file(kernel, fd)?;
    let size = kernel.vfs.node(file.node).map(|n| n.size()).unwrap_or(0);

    let base = match whence {
        SEEK_SET => 0i64,
        SEEK_CUR => file.offset as i64,
        SEEK_END => size as i64,
        _ => return Err(KernelError::InvalidArgument),
    };
    let target = base + offset as i32 as i64;
    if target < 0 {
        return Err(KernelError::InvalidArgument);
    }

    let proc = kernel
        .processes
        .current_process_mut()
        .ok_or(KernelError::NotFound)?;
    let entry = proc
        .files
        .get_mut(fd as usize)
        .ok_or(KernelError::NotFound)?;
    entry.offset = target as u32;
    Ok(target as usize)
}

pub fn sys_mkdir(kernel: &mut Kernel, path_ptr: u32) -> KernelResult<usize> {
    let path = copy_path(kernel, path_ptr)?;
    kernel.vfs.mkdir(&path)?;
    Ok(0)
}

pub fn sys_rmdir(kernel: &mut Kernel, path_ptr: u32) -> KernelResult<usize> {
    let path = copy_path(kernel, path_ptr)?;
    kernel.vfs.rmdir(&path)?;
    Ok(0)
}

pub fn sys_unlink(kernel: &mut Kernel, path_ptr: u32) -> KernelResult<usize> {
    let path = copy_path(kernel, path_ptr)?;
    kernel.vfs.unlink(&path)?;
    Ok(0)
}

/// Copy the name of the `index`-th entry of the directory open at `fd`
/// into the user buffer, NUL-terminated.
pub fn sys_readdir(kernel: &mut Kernel, fd: u32, index: u32, buf: u32) -> KernelResult<usize> {
    let file = current_file(kernel, fd)?;
    let node = kernel.vfs.node(file.node).ok_or(KernelError::NotFound)?;
    if node.kind != NodeType::Directory {
        return Err(KernelError::InvalidArgument);
    }
    let name = kernel
        .vfs
        .readdir(file.node, index as usize)
        .ok_or(KernelError::NotFound)?;

    let mut bytes = Vec::with_capacity(name.len() + 1);
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);

    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    user_validation::copy_to_user(&proc.space, &kernel.window, buf, &bytes)?;
    Ok(0)
}

fn current_file(kernel: &Kernel, fd: u32) -> KernelResult<OpenFile> {
    kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?
        .files
        .get(fd as usize)
        .ok_or(KernelError::NotFound)
}

fn advance_offset(kernel: &mut Kernel, fd: u32, by: u32) {
    // The console has no position; files track theirs per descriptor.
    let console = kernel.vfs.console();
    if let Some(proc) = kernel.processes.current_process_mut() {
        if let Some(entry) = proc.files.get_mut(fd as usize) {
            if entry.node != console {
                entry.offset += by;
            }
        }
    }
}

fn copy_in(kernel: &Kernel, buf: u32, count: usize) -> KernelResult<Vec<u8>> {
    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    let mut data = alloc::vec![0u8; count];
    user_validation::copy_from_user(&proc.space, &kernel.window, buf, &mut data)?;
    Ok(data)
}

fn copy_path(kernel: &Kernel, path_ptr: u32) -> KernelResult<String> {
    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    user_validation::copy_str_from_user(
        &proc.space,
        &kernel.window,
        path_ptr,
        crate::fs::PATH_MAX,
    )
}
