//! System-call boundary
//!
//! User mode enters through the `int 0x80` trap gate; the trampoline
//! builds the uniform frame and the IRQ dispatcher routes vector 0x80
//! here. Registers carry `{eax = number, ebx, ecx, edx, esi = args}`;
//! the result returns in `eax`, negative values meaning failure. The
//! errno mapping is applied exactly once, in [`handle`]; handlers
//! themselves return structured results.
//!
//! Calls that replace the interrupted context (exit, successful exec, a
//! blocking wait) report [`Outcome::FrameReplaced`] so the dispatcher
//! leaves the frame alone.

mod filesystem;
mod ipc;
mod memory;
mod process;
mod signal;

use crate::bootstrap::Kernel;
use crate::error::{KernelError, KernelResult};
use crate::irq::TrapFrame;

/// System call numbers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 1,
    Write = 2,
    Read = 3,
    Open = 4,
    Close = 5,
    Fork = 6,
    Exec = 7,
    Wait = 8,
    GetPid = 9,
    Seek = 11,
    Mkdir = 12,
    Rmdir = 13,
    ReadDir = 14,
    Brk = 15,
    Sbrk = 16,
    Pipe = 17,
    MsgGet = 18,
    MsgSnd = 19,
    MsgRcv = 20,
    MsgCtl = 21,
    ShmGet = 22,
    ShmAt = 23,
    ShmDt = 24,
    ShmCtl = 25,
    Signal = 26,
    Kill = 27,
    Unlink = 28,
}

impl TryFrom<u32> for Syscall {
    type Error = KernelError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Syscall::Exit,
            2 => Syscall::Write,
            3 => Syscall::Read,
            4 => Syscall::Open,
            5 => Syscall::Close,
            6 => Syscall::Fork,
            7 => Syscall::Exec,
            8 => Syscall::Wait,
            9 => Syscall::GetPid,
            11 => Syscall::Seek,
            12 => Syscall::Mkdir,
            13 => Syscall::Rmdir,
            14 => Syscall::ReadDir,
            15 => Syscall::Brk,
            16 => Syscall::Sbrk,
            17 => Syscall::Pipe,
            18 => Syscall::MsgGet,
            19 => Syscall::MsgSnd,
            20 => Syscall::MsgRcv,
            21 => Syscall::MsgCtl,
            22 => Syscall::ShmGet,
            23 => Syscall::ShmAt,
            24 => Syscall::ShmDt,
            25 => Syscall::ShmCtl,
            26 => Syscall::Signal,
            27 => Syscall::Kill,
            28 => Syscall::Unlink,
            _ => return Err(KernelError::InvalidSyscall),
        })
    }
}

/// What a handler did with the call.
pub enum Outcome {
    /// Normal completion; the value goes into the caller's `eax`.
    Value(isize),
    /// The trap frame now belongs to another context (exit, exec, a
    /// blocked wait); nothing must be written into it.
    FrameReplaced,
}

impl Outcome {
    fn from_result(result: KernelResult<usize>) -> Self {
        match result {
            Ok(value) => Outcome::Value(value as isize),
            Err(err) => Outcome::Value(err.errno()),
        }
    }
}

/// IRQ-table entry for the syscall vector.
pub fn trap_entry(kernel: &mut Kernel, frame: &mut TrapFrame) {
    handle(kernel, frame);
}

/// Decode, dispatch, and write back the return value.
pub fn handle(kernel: &mut Kernel, frame: &mut TrapFrame) {
    let number = frame.eax;
    let args = [frame.ebx, frame.ecx, frame.edx, frame.esi];
    let outcome = match Syscall::try_from(number) {
        Ok(call) => dispatch(kernel, frame, call, args),
        Err(err) => Outcome::Value(err.errno()),
    };
    if let Outcome::Value(value) = outcome {
        frame.eax = value as u32;
    }
}

fn dispatch(kernel: &mut Kernel, frame: &mut TrapFrame, call: Syscall, args: [u32; 4]) -> Outcome {
    match call {
        Syscall::Exit => process::sys_exit(kernel, frame, args[0]),
        Syscall::Write => {
            Outcome::from_result(filesystem::sys_write(kernel, args[0], args[1], args[2]))
        }
        Syscall::Read => {
            Outcome::from_result(filesystem::sys_read(kernel, args[0], args[1], args[2]))
        }
        Syscall::Open => Outcome::from_result(filesystem::sys_open(kernel, args[0], args[1])),
        Syscall::Close => Outcome::from_result(filesystem::sys_close(kernel, args[0])),
        Syscall::Fork => Outcome::from_result(process::sys_fork(kernel, frame)),
        Syscall::Exec => process::sys_exec(kernel, frame, args[0], args[1]),
        Syscall::Wait => process::sys_wait(kernel, frame, args[0]),
        Syscall::GetPid => Outcome::from_result(process::sys_getpid(kernel)),
        Syscall::Seek => {
            Outcome::from_result(filesystem::sys_seek(kernel, args[0], args[1], args[2]))
        }
        Syscall::Mkdir => Outcome::from_result(filesystem::sys_mkdir(kernel, args[0])),
        Syscall::Rmdir => Outcome::from_result(filesystem::sys_rmdir(kernel, args[0])),
        Syscall::ReadDir => {
            Outcome::from_result(filesystem::sys_readdir(kernel, args[0], args[1], args[2]))
        }
        Syscall::Brk => Outcome::from_result(memory::sys_brk(kernel, args[0])),
        Syscall::Sbrk => Outcome::from_result(memory::sys_sbrk(kernel, args[0])),
        Syscall::Pipe => Outcome::from_result(ipc::sys_pipe(kernel, args[0])),
        Syscall::MsgGet => Outcome::from_result(ipc::sys_msgget(kernel, args[0], args[1])),
        Syscall::MsgSnd => {
            Outcome::from_result(ipc::sys_msgsnd(kernel, args[0], args[1], args[2]))
        }
        Syscall::MsgRcv => {
            Outcome::from_result(ipc::sys_msgrcv(kernel, args[0], args[1], args[2], args[3]))
        }
        Syscall::MsgCtl => Outcome::from_result(ipc::sys_msgctl(kernel, args[0], args[1])),
        Syscall::ShmGet => {
            Outcome::from_result(ipc::sys_shmget(kernel, args[0], args[1], args[2]))
        }
        Syscall::ShmAt => Outcome::from_result(ipc::sys_shmat(kernel, args[0])),
        Syscall::ShmDt => Outcome::from_result(ipc::sys_shmdt(kernel, args[0])),
        Syscall::ShmCtl => Outcome::from_result(ipc::sys_shmctl(kernel, args[0], args[1])),
        Syscall::Signal => Outcome::from_result(signal::sys_signal(kernel, args[0], args[1])),
        Syscall::Kill => signal::sys_kill(kernel, frame, args[0], args[1]),
        Syscall::Unlink => Outcome::from_result(filesystem::sys_unlink(kernel, args[0])),
    }
}
