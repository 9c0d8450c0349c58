//! HematiteOS bare-metal entry
//!
//! The loader drops us here in 32-bit protected mode with paging and
//! interrupts off, flat segments, and the memory map blob at 0x80000.
//! Boot order: descriptor tables and controllers, frame allocator,
//! kernel address space (paging on), heap, VFS, first process, then
//! interrupts — from which point the timer drives scheduling and the
//! syscall gate drives every service.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod entry {
    use core::panic::PanicInfo;

    use hematite_kernel::mm::memory_map::{self, MAX_ENTRIES};
    use hematite_kernel::mm::vmm::{KERNEL_HEAP_BASE, PHYSMAP_BASE};
    use hematite_kernel::mm::{
        heap, MemoryRegion, PageFlags, PhysWindow, RegionKind, VirtAddr, PAGE_SIZE,
    };
    use hematite_kernel::process::lifecycle;
    use hematite_kernel::{arch, bootstrap, klog, timer, Kernel};

    /// First user program, copied to its text page at boot: an idle
    /// loop the scheduler can always dispatch. The shell and the rest
    /// of user space arrive from disk through exec.
    const INIT_CODE: &[u8] = &[0xEB, 0xFE]; // jmp $
    const INIT_ENTRY: u32 = 0x0804_8000;

    #[no_mangle]
    pub extern "C" fn _start() -> ! {
        arch::x86::init();
        klog::init(log::LevelFilter::Info);
        log::info!("HematiteOS {} booting", env!("CARGO_PKG_VERSION"));

        // Identity view: valid while paging is off, and for the low
        // 4 MiB afterwards.
        let boot_window = unsafe { PhysWindow::identity(u32::MAX) };

        let mut regions =
            [MemoryRegion::new(0, 0, RegionKind::Reserved); MAX_ENTRIES];
        let count = memory_map::read_boot_map(&boot_window, &mut regions);
        let mut kernel = match Kernel::new(boot_window, &regions[..count]) {
            Ok(kernel) => kernel,
            Err(err) => {
                log::error!("boot failed: {err}");
                arch::idle_forever();
            }
        };
        log::info!(
            "pfa: {} frames, {} free",
            kernel.frames.total_frames(),
            kernel.frames.free_frames()
        );

        // Paging is on now; retarget physical access through the
        // physmap the kernel space just built.
        let (_, mem_end) = kernel.frames.managed_range();
        kernel.window = unsafe {
            PhysWindow::new(
                hematite_kernel::mm::PhysAddr::new(0),
                mem_end.as_usize(),
                PHYSMAP_BASE as *mut u8,
            )
        };

        mount_heap(&mut kernel);
        heap::set_grow_hook(bootstrap::heap_grow_hook);

        // The on-disk filesystem plugs in through the VFS boundary.
        kernel.vfs.register_filesystem("simplefs");

        timer::init();
        spawn_init(&mut kernel);

        bootstrap::install(kernel);
        log::info!("entering scheduler");
        arch::interrupts_enable();

        // The first timer tick dispatches init; this boot context is
        // never resumed.
        loop {
            // SAFETY: hlt waits for the next interrupt.
            unsafe { core::arch::asm!("hlt", options(nostack, nomem)) };
        }
    }

    /// Map the initial heap and hand it to the allocator.
    fn mount_heap(kernel: &mut Kernel) {
        let pages = heap::KERNEL_HEAP_INITIAL / PAGE_SIZE;
        for page in 0..pages {
            let virt = VirtAddr::new(KERNEL_HEAP_BASE + (page * PAGE_SIZE) as u32);
            if kernel
                .vmm
                .kernel_space_mut()
                .alloc_page(&mut kernel.frames, &kernel.window, virt, PageFlags::KERNEL_RW)
                .is_err()
            {
                log::error!("no frames for the kernel heap");
                arch::idle_forever();
            }
        }
        // SAFETY: the region was just mapped read-write and is used by
        // nothing else.
        unsafe {
            heap::ALLOCATOR.init(KERNEL_HEAP_BASE as *mut u8, heap::KERNEL_HEAP_INITIAL)
        };
    }

    /// Create the first process around the embedded idle program.
    fn spawn_init(kernel: &mut Kernel) {
        let pid = match lifecycle::create(kernel, "init", INIT_ENTRY, 0) {
            Ok(pid) => pid,
            Err(err) => {
                log::error!("cannot create init: {err}");
                arch::idle_forever();
            }
        };
        let Kernel {
            frames,
            window,
            processes,
            ..
        } = kernel;
        let proc = processes.get_mut(pid).expect("init exists");
        match proc
            .space
            .alloc_page(frames, window, VirtAddr::new(INIT_ENTRY), PageFlags::USER_RW)
        {
            Ok(frame) => {
                window.zero(frame, PAGE_SIZE);
                // SAFETY: freshly mapped user frame owned by init.
                unsafe { window.bytes_mut(frame, INIT_CODE.len()) }
                    .copy_from_slice(INIT_CODE);
            }
            Err(err) => {
                log::error!("cannot map init text: {err}");
                arch::idle_forever();
            }
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        log::error!("KERNEL PANIC: {info}");
        arch::x86::serial::write_fmt(format_args!("\nKERNEL PANIC: {info}\n"));
        arch::idle_forever();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The kernel binary only makes sense on a bare-metal i686 target;
    // build the library (and its tests) on the host instead.
    eprintln!("hematite-kernel is a bare-metal image; build for an i686-none target");
}
