//! Kernel state assembly and boot orchestration
//!
//! All singleton subsystem state lives in one owned [`Kernel`] value:
//! frame bitmap, VMM, process table, scheduler, IPC pools, VFS, and the
//! IRQ registry. Handlers receive `&mut Kernel` explicitly; the only
//! global is the handle the arch entry points (trap trampolines) use to
//! reach it. Host tests build their own `Kernel` over an arena-backed
//! window and never touch the global.

use spin::Mutex;

use crate::error::KernelResult;
use crate::fs::Vfs;
use crate::ipc::IpcRegistry;
use crate::irq::IrqTable;
use crate::mm::vmm::{Vmm, KERNEL_HEAP_BASE, KERNEL_HEAP_MAX};
use crate::mm::{heap, FrameBitmap, MemoryRegion, PageFlags, PhysWindow, VirtAddr, PAGE_SIZE};
use crate::process::table::ProcessTable;
use crate::sched::Scheduler;

/// The kernel's owned state.
pub struct Kernel {
    pub window: PhysWindow,
    pub frames: FrameBitmap,
    pub vmm: Vmm,
    pub processes: ProcessTable,
    pub sched: Scheduler,
    pub ipc: IpcRegistry,
    pub vfs: Vfs,
    pub irq: IrqTable,
}

impl Kernel {
    /// Assemble the resource-management core over a physical window and
    /// a boot memory map: frame allocator, kernel address space (paging
    /// enabled on bare metal), empty process table, scheduler, IPC
    /// pools, and the VFS with its console.
    pub fn new(window: PhysWindow, map: &[MemoryRegion]) -> KernelResult<Self> {
        let mut frames = FrameBitmap::from_memory_map(map, &window)?;
        let vmm = Vmm::init(&mut frames, &window)?;
        let mut kernel = Self {
            window,
            frames,
            vmm,
            processes: ProcessTable::new(),
            sched: Scheduler::new(),
            ipc: IpcRegistry::new(),
            vfs: Vfs::new(),
            irq: IrqTable::new(),
        };
        kernel.irq.register(
            crate::irq::IRQ_BASE + crate::irq::IRQ_TIMER,
            crate::timer::timer_interrupt,
        );
        kernel
            .irq
            .register(crate::irq::SYSCALL_VECTOR, crate::syscall::trap_entry);
        Ok(kernel)
    }

    /// Map `bytes` more heap at the current top and hand them to the
    /// allocator. Fails without side effects when the cap or the frame
    /// allocator says no.
    pub fn grow_heap(&mut self, bytes: usize) -> bool {
        let (total, _, _) = heap::ALLOCATOR.stats();
        if bytes == 0 || total + bytes > KERNEL_HEAP_MAX as usize {
            return false;
        }
        let pages = bytes.div_ceil(PAGE_SIZE);
        let space = self.vmm.kernel_space_mut();
        for page in 0..pages {
            let virt = VirtAddr::new(KERNEL_HEAP_BASE + (total + page * PAGE_SIZE) as u32);
            if space
                .alloc_page(&mut self.frames, &self.window, virt, PageFlags::KERNEL_RW)
                .is_err()
            {
                // Unwind this growth step's mappings and frames.
                for undo in 0..page {
                    let virt =
                        VirtAddr::new(KERNEL_HEAP_BASE + (total + undo * PAGE_SIZE) as u32);
                    if let Some((phys, _)) = space.translate(&self.window, virt) {
                        space.unmap(&self.window, virt);
                        self.frames.free(phys.align_down());
                    }
                }
                return false;
            }
        }
        // SAFETY: the pages were just mapped contiguously at the top.
        unsafe { heap::ALLOCATOR.extend(pages * PAGE_SIZE) };
        true
    }
}

/// Global handle used by the trap entry paths.
pub static KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);

/// Install the booted kernel behind the global handle.
pub fn install(kernel: Kernel) {
    *KERNEL.lock() = Some(kernel);
}

/// Run `f` against the global kernel, if booted.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    let mut guard = KERNEL.lock();
    guard.as_mut().map(f)
}

/// Heap grow hook: refuses rather than deadlocks when the kernel state
/// is already locked (an allocation inside a kernel critical section).
pub fn heap_grow_hook(bytes: usize) -> bool {
    let Some(mut guard) = KERNEL.try_lock() else {
        return false;
    };
    let Some(kernel) = guard.as_mut() else {
        return false;
    };
    kernel.grow_heap(bytes)
}
