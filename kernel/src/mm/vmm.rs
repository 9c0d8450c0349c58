//! Virtual memory manager
//!
//! Two-level paging over [`PageTable`] frames allocated from the
//! [`FrameBitmap`]. An [`AddressSpace`] owns its root directory frame and
//! every page-table frame reachable from the user half; the kernel half
//! of every space points at the same shared kernel page tables.
//!
//! The kernel half is fixed at init time: directory slot 0 (the identity
//! mapping of the low 4 MiB, which also covers the video buffer), the
//! physmap slots, and the preallocated heap directory slots. Fixing the
//! set keeps the kernel half identical across all address spaces even as
//! the heap grows after processes exist.

use super::{
    frame_allocator::FrameBitmap, page_table::PAGE_TABLE_ENTRIES, PageFlags,
    PhysAddr, PhysWindow, VirtAddr, PAGE_SIZE,
};
use crate::error::{KernelError, KernelResult};

/// End of the boot identity mapping (and of kernel low memory).
pub const KERNEL_IDENTITY_END: u32 = 0x40_0000;

/// Base of the kernel's map of all physical memory. With paging on, the
/// kernel reaches arbitrary frames (page tables, fork copies, user
/// buffers) through this region; the boot identity window only covers
/// the low 4 MiB.
pub const PHYSMAP_BASE: u32 = 0xC000_0000;

/// Most physical memory the physmap can carry (512 MiB).
pub const PHYSMAP_MAX: u32 = 0x2000_0000;

/// Base of the kernel heap region.
pub const KERNEL_HEAP_BASE: u32 = 0xE000_0000;

/// Upper bound on kernel heap growth (16 MiB).
pub const KERNEL_HEAP_MAX: u32 = 16 * 1024 * 1024;

const PHYSMAP_DIR_FIRST: usize = (PHYSMAP_BASE >> 22) as usize;
const PHYSMAP_DIR_COUNT: usize = (PHYSMAP_MAX >> 22) as usize;
const HEAP_DIR_FIRST: usize = (KERNEL_HEAP_BASE >> 22) as usize;
const HEAP_DIR_COUNT: usize = (KERNEL_HEAP_MAX >> 22) as usize;

/// Directory slots shared by every address space: the low identity
/// mapping, the physmap, and the (preallocated) heap tables.
pub fn is_kernel_directory_index(index: usize) -> bool {
    index == 0
        || (PHYSMAP_DIR_FIRST..PHYSMAP_DIR_FIRST + PHYSMAP_DIR_COUNT).contains(&index)
        || (HEAP_DIR_FIRST..HEAP_DIR_FIRST + HEAP_DIR_COUNT).contains(&index)
}

/// One two-level page-table tree, identified by its root directory frame.
pub struct AddressSpace {
    root: PhysAddr,
}

impl AddressSpace {
    /// Allocate and zero a fresh root directory.
    pub fn new(frames: &mut FrameBitmap, window: &PhysWindow) -> KernelResult<Self> {
        let root = frames.allocate()?;
        window.zero(root, PAGE_SIZE);
        Ok(Self { root })
    }

    /// Build the kernel address space: identity-map the low 4 MiB
    /// (kernel image, frame bitmap, video buffer), map all managed
    /// physical memory at [`PHYSMAP_BASE`], and preallocate the heap
    /// page tables so the kernel half never changes shape.
    pub fn new_kernel(frames: &mut FrameBitmap, window: &PhysWindow) -> KernelResult<Self> {
        let space = Self::new(frames, window)?;

        // Identity table for 0..4 MiB.
        let table_frame = frames.allocate()?;
        // SAFETY: freshly allocated frame, exclusively ours.
        let table = unsafe { window.table_mut(table_frame) };
        table.zero();
        for (i, entry) in table.iter_mut().enumerate() {
            entry.set(
                PhysAddr::new((i * PAGE_SIZE) as u32),
                PageFlags::KERNEL_RW,
            );
        }
        // SAFETY: root was allocated and zeroed by `new`.
        let dir = unsafe { window.table_mut(space.root) };
        dir[0].set(table_frame, PageFlags::KERNEL_RW);

        // Physmap: every managed frame, offset-mapped from physical 0
        // so device regions below the managed range stay reachable too.
        let (_, mem_end) = frames.managed_range();
        let span = mem_end.as_u32().min(PHYSMAP_MAX);
        let mut chunk = 0u32;
        while chunk < span {
            let physmap_table = frames.allocate()?;
            // SAFETY: freshly allocated frame, exclusively ours.
            let table = unsafe { window.table_mut(physmap_table) };
            table.zero();
            for (i, entry) in table.iter_mut().enumerate() {
                entry.set(
                    PhysAddr::new(chunk + (i * PAGE_SIZE) as u32),
                    PageFlags::KERNEL_RW,
                );
            }
            dir[PHYSMAP_DIR_FIRST + (chunk >> 22) as usize]
                .set(physmap_table, PageFlags::KERNEL_RW);
            chunk += 1 << 22;
        }

        // Preallocated (empty) heap tables.
        for slot in HEAP_DIR_FIRST..HEAP_DIR_FIRST + HEAP_DIR_COUNT {
            let heap_table = frames.allocate()?;
            window.zero(heap_table, PAGE_SIZE);
            dir[slot].set(heap_table, PageFlags::KERNEL_RW);
        }
        Ok(space)
    }

    /// Physical address of the root directory (the CR3 value).
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// Copy the shared kernel-half directory entries from `src`.
    pub fn share_kernel_half(&mut self, window: &PhysWindow, src: &AddressSpace) {
        // SAFETY: both roots are live directory frames; the borrows are
        // disjoint because the two spaces own distinct roots.
        let dir = unsafe { window.table_mut(self.root) };
        let src_dir = unsafe { window.table_mut(src.root) };
        for index in 0..PAGE_TABLE_ENTRIES {
            if is_kernel_directory_index(index) {
                dir[index] = src_dir[index];
            }
        }
    }

    /// Map `virt` to `phys` with `flags`, allocating a page table if the
    /// directory slot is empty. Low bits of both addresses are masked.
    pub fn map(
        &mut self,
        frames: &mut FrameBitmap,
        window: &PhysWindow,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> KernelResult<()> {
        let virt = virt.align_down();
        // SAFETY: the root is a live directory frame owned by this space.
        let dir = unsafe { window.table_mut(self.root) };
        let dir_entry = &mut dir[virt.directory_index()];

        let table_frame = match dir_entry.frame() {
            Some(frame) => {
                // A user leaf needs the user bit at both levels.
                if flags.contains(PageFlags::USER) {
                    dir_entry.add_flags(PageFlags::USER);
                }
                frame
            }
            None => {
                let frame = frames.allocate()?;
                window.zero(frame, PAGE_SIZE);
                let mut dir_flags = PageFlags::KERNEL_RW;
                if flags.contains(PageFlags::USER) {
                    dir_flags |= PageFlags::USER;
                }
                dir_entry.set(frame, dir_flags);
                frame
            }
        };

        // SAFETY: `table_frame` holds a page table owned by this space.
        let table = unsafe { window.table_mut(table_frame) };
        table[virt.table_index()].set(phys.align_down(), flags | PageFlags::PRESENT);
        crate::arch::invlpg(virt);
        Ok(())
    }

    /// Clear the leaf entry for `virt`. The page-table frame is not
    /// reclaimed. Unmapping an unmapped page is a no-op.
    pub fn unmap(&mut self, window: &PhysWindow, virt: VirtAddr) {
        let virt = virt.align_down();
        // SAFETY: live directory frame owned by this space.
        let dir = unsafe { window.table_mut(self.root) };
        let Some(table_frame) = dir[virt.directory_index()].frame() else {
            return;
        };
        // SAFETY: present directory entries reference page-table frames.
        let table = unsafe { window.table_mut(table_frame) };
        table[virt.table_index()].clear();
        crate::arch::invlpg(virt);
    }

    /// Resolve `virt` to its physical address and leaf flags, or `None`
    /// if no present mapping exists.
    pub fn translate(&self, window: &PhysWindow, virt: VirtAddr) -> Option<(PhysAddr, PageFlags)> {
        // SAFETY: live directory frame owned by this space.
        let dir = unsafe { window.table_mut(self.root) };
        let table_frame = dir[virt.directory_index()].frame()?;
        // SAFETY: present directory entries reference page-table frames.
        let table = unsafe { window.table_mut(table_frame) };
        let entry = table[virt.table_index()];
        let frame = entry.frame()?;
        Some((
            PhysAddr::new(frame.as_u32() | virt.page_offset()),
            entry.flags(),
        ))
    }

    /// Map `size` bytes from `virt`/`phys` page by page.
    ///
    /// On allocation failure the entries installed so far remain in
    /// place; the caller is responsible for unwinding them.
    pub fn map_range(
        &mut self,
        frames: &mut FrameBitmap,
        window: &PhysWindow,
        virt: VirtAddr,
        phys: PhysAddr,
        size: usize,
        flags: PageFlags,
    ) -> KernelResult<()> {
        let start = virt.align_down();
        let end = VirtAddr::new(virt.as_u32().wrapping_add(size as u32)).align_up();
        let mut offset = 0u32;
        while start.as_u32() + offset < end.as_u32() {
            self.map(
                frames,
                window,
                start.offset(offset),
                phys.align_down().offset(offset),
                flags,
            )?;
            offset += PAGE_SIZE as u32;
        }
        Ok(())
    }

    /// Allocate a fresh frame and map it at `virt`. The frame is freed
    /// again if the mapping itself fails.
    pub fn alloc_page(
        &mut self,
        frames: &mut FrameBitmap,
        window: &PhysWindow,
        virt: VirtAddr,
        flags: PageFlags,
    ) -> KernelResult<PhysAddr> {
        let frame = frames.allocate()?;
        if let Err(err) = self.map(frames, window, virt, frame, flags) {
            frames.free(frame);
            return Err(err);
        }
        Ok(frame)
    }

    /// Deep-copy `parent` into a new space: kernel half shared, every
    /// present user-half page duplicated into a fresh frame at the same
    /// virtual address. Partially built state is torn down on failure.
    pub fn fork_from(
        frames: &mut FrameBitmap,
        window: &PhysWindow,
        parent: &AddressSpace,
    ) -> KernelResult<AddressSpace> {
        let mut child = AddressSpace::new(frames, window)?;
        child.share_kernel_half(window, parent);

        match child.copy_user_half(frames, window, parent) {
            Ok(()) => Ok(child),
            Err(err) => {
                child.destroy_user_half(frames, window, |_| false);
                frames.free(child.root);
                Err(err)
            }
        }
    }

    fn copy_user_half(
        &mut self,
        frames: &mut FrameBitmap,
        window: &PhysWindow,
        parent: &AddressSpace,
    ) -> KernelResult<()> {
        for dir_index in 0..PAGE_TABLE_ENTRIES {
            if is_kernel_directory_index(dir_index) {
                continue;
            }
            // SAFETY: parent root is a live directory frame.
            let parent_dir = unsafe { window.table_mut(parent.root) };
            let Some(parent_table_frame) = parent_dir[dir_index].frame() else {
                continue;
            };
            for table_index in 0..PAGE_TABLE_ENTRIES {
                // SAFETY: present directory entries reference tables.
                let parent_table = unsafe { window.table_mut(parent_table_frame) };
                let entry = parent_table[table_index];
                let Some(src_frame) = entry.frame() else {
                    continue;
                };
                let dst_frame = frames.allocate().map_err(KernelError::from)?;
                window.copy(dst_frame, src_frame, PAGE_SIZE);
                let virt = VirtAddr::new(((dir_index << 22) | (table_index << 12)) as u32);
                if let Err(err) = self.map(frames, window, virt, dst_frame, entry.flags()) {
                    frames.free(dst_frame);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Free every user-half leaf frame (except those `keep` claims, e.g.
    /// jointly-owned shared-memory pages) and every user-half page-table
    /// frame, clearing the directory entries.
    pub fn destroy_user_half(
        &mut self,
        frames: &mut FrameBitmap,
        window: &PhysWindow,
        keep: impl Fn(VirtAddr) -> bool,
    ) {
        for dir_index in 0..PAGE_TABLE_ENTRIES {
            if is_kernel_directory_index(dir_index) {
                continue;
            }
            // SAFETY: live directory frame owned by this space.
            let dir = unsafe { window.table_mut(self.root) };
            let Some(table_frame) = dir[dir_index].frame() else {
                continue;
            };
            // SAFETY: present directory entries reference tables.
            let table = unsafe { window.table_mut(table_frame) };
            for table_index in 0..PAGE_TABLE_ENTRIES {
                let Some(leaf) = table[table_index].frame() else {
                    continue;
                };
                let virt = VirtAddr::new(((dir_index << 22) | (table_index << 12)) as u32);
                if !keep(virt) {
                    frames.free(leaf);
                }
                table[table_index].clear();
            }
            frames.free(table_frame);
            dir[dir_index].clear();
        }
    }

    /// Tear down the whole space, returning its frames to the allocator.
    /// Kernel-half tables are shared and stay alive.
    pub fn destroy(mut self, frames: &mut FrameBitmap, window: &PhysWindow) {
        self.destroy_user_half(frames, window, |_| false);
        frames.free(self.root);
    }
}

/// Tracks the active address space and the shared kernel space.
pub struct Vmm {
    kernel_space: AddressSpace,
    current_root: PhysAddr,
}

impl Vmm {
    /// Build the kernel space and make it current. On bare metal this
    /// loads the paging root and enables translation.
    pub fn init(frames: &mut FrameBitmap, window: &PhysWindow) -> KernelResult<Self> {
        let kernel_space = AddressSpace::new_kernel(frames, window)?;
        let root = kernel_space.root();
        crate::arch::load_page_directory(root);
        crate::arch::enable_paging();
        Ok(Self {
            kernel_space,
            current_root: root,
        })
    }

    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    pub fn kernel_space_mut(&mut self) -> &mut AddressSpace {
        &mut self.kernel_space
    }

    /// Make `root` the active translation root.
    pub fn switch(&mut self, root: PhysAddr) {
        self.current_root = root;
        crate::arch::load_page_directory(root);
    }

    pub fn current_root(&self) -> PhysAddr {
        self.current_root
    }
}
