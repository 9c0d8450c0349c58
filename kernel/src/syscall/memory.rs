//! User heap break system calls

use crate::bootstrap::Kernel;
use crate::error::KernelResult;
use crate::process::lifecycle;

/// Set the break to an absolute address. Failures leave the break
/// unchanged and return it, matching the classic contract.
pub fn sys_brk(kernel: &mut Kernel, addr: u32) -> KernelResult<usize> {
    Ok(lifecycle::brk(kernel, addr) as usize)
}

/// Move the break by a signed increment, returning the new break.
pub fn sys_sbrk(kernel: &mut Kernel, increment: u32) -> KernelResult<usize> {
    let new_break = lifecycle::sbrk(kernel, increment as i32)?;
    Ok(new_break as usize)
}
