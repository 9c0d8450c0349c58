//! IPC system calls: pipes, message queues, shared memory

use crate::bootstrap::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::ipc::message_queue::MAX_MESSAGE_SIZE;
use crate::ipc::IPC_RMID;
use crate::mm::user_validation;

/// Create a pipe and store `{read_fd, write_fd}` as two 32-bit values
/// at the user pointer.
pub fn sys_pipe(kernel: &mut Kernel, fds_ptr: u32) -> KernelResult<usize> {
    {
        let proc = kernel
            .processes
            .current_process()
            .ok_or(KernelError::NotFound)?;
        user_validation::validate_range(&proc.space, &kernel.window, fds_ptr, 8, true)?;
    }
    let owner = kernel.processes.current().ok_or(KernelError::NotFound)?;
    let (read_fd, write_fd) = kernel.ipc.pipes.create(owner)?;

    let mut raw = [0u8; 8];
    raw[..4].copy_from_slice(&(read_fd as u32).to_le_bytes());
    raw[4..].copy_from_slice(&(write_fd as u32).to_le_bytes());
    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    user_validation::copy_to_user(&proc.space, &kernel.window, fds_ptr, &raw)?;
    Ok(0)
}

pub fn sys_msgget(kernel: &mut Kernel, key: u32, _flags: u32) -> KernelResult<usize> {
    kernel.ipc.queues.get(key)
}

/// Send `{u32 type tag, payload}` from the user buffer. `size` counts
/// payload bytes only.
pub fn sys_msgsnd(kernel: &mut Kernel, id: u32, msg_ptr: u32, size: u32) -> KernelResult<usize> {
    let size = (size as usize).min(MAX_MESSAGE_SIZE);
    let mut raw = alloc::vec![0u8; 4 + size];
    {
        let proc = kernel
            .processes
            .current_process()
            .ok_or(KernelError::NotFound)?;
        user_validation::copy_from_user(&proc.space, &kernel.window, msg_ptr, &mut raw)?;
    }
    let mtype = u32::from_le_bytes(raw[..4].try_into().expect("tag is four bytes"));
    kernel.ipc.queues.send(id as usize, mtype, &raw[4..])?;
    Ok(0)
}

/// Receive the head message into the user buffer as `{u32 type tag,
/// payload}`. Returns tag plus payload length, or 0 when the queue is
/// empty. The type argument is accepted but not used for filtering.
pub fn sys_msgrcv(
    kernel: &mut Kernel,
    id: u32,
    msg_ptr: u32,
    size: u32,
    _msgtyp: u32,
) -> KernelResult<usize> {
    let size = (size as usize).min(MAX_MESSAGE_SIZE);
    {
        let proc = kernel
            .processes
            .current_process()
            .ok_or(KernelError::NotFound)?;
        user_validation::validate_range(&proc.space, &kernel.window, msg_ptr, 4 + size, true)?;
    }

    let Some(message) = kernel.ipc.queues.receive(id as usize, size)? else {
        return Ok(0);
    };

    let mut raw = alloc::vec![0u8; 4 + message.payload.len()];
    raw[..4].copy_from_slice(&message.mtype.to_le_bytes());
    raw[4..].copy_from_slice(&message.payload);
    let proc = kernel
        .processes
        .current_process()
        .ok_or(KernelError::NotFound)?;
    user_validation::copy_to_user(&proc.space, &kernel.window, msg_ptr, &raw)?;
    Ok(raw.len())
}

pub fn sys_msgctl(kernel: &mut Kernel, id: u32, cmd: u32) -> KernelResult<usize> {
    if cmd != IPC_RMID {
        return Err(KernelError::InvalidArgument);
    }
    kernel.ipc.queues.remove(id as usize)?;
    Ok(0)
}

pub fn sys_shmget(kernel: &mut Kernel, key: u32, size: u32, _flags: u32) -> KernelResult<usize> {
    let owner = kernel.processes.current().ok_or(KernelError::NotFound)?;
    kernel.ipc.shm.get(key, size, &mut kernel.frames, owner)
}

/// Attach the segment to the caller at its fixed address and return
/// that address.
pub fn sys_shmat(kernel: &mut Kernel, id: u32) -> KernelResult<usize> {
    let Kernel {
        frames,
        window,
        processes,
        ipc,
        ..
    } = kernel;
    let proc = processes
        .current_process_mut()
        .ok_or(KernelError::NotFound)?;
    let addr = ipc.shm.attach(id as usize, &mut proc.space, frames, window)?;
    Ok(addr as usize)
}

pub fn sys_shmdt(kernel: &mut Kernel, addr: u32) -> KernelResult<usize> {
    let Kernel {
        window,
        processes,
        ipc,
        ..
    } = kernel;
    let proc = processes
        .current_process_mut()
        .ok_or(KernelError::NotFound)?;
    ipc.shm.detach(addr, &mut proc.space, window)?;
    Ok(0)
}

pub fn sys_shmctl(kernel: &mut Kernel, id: u32, cmd: u32) -> KernelResult<usize> {
    if cmd != IPC_RMID {
        return Err(KernelError::InvalidArgument);
    }
    kernel.ipc.shm.remove(id as usize, &mut kernel.frames)?;
    Ok(0)
}
