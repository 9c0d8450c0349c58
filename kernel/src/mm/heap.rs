//! Kernel heap
//!
//! First-fit allocator over an implicit list of block headers tiling a
//! contiguous virtual region. The region starts at
//! [`vmm::KERNEL_HEAP_BASE`](super::vmm::KERNEL_HEAP_BASE) and grows by
//! whole pages: the caller maps fresh frames at the top and appends them
//! with [`Heap::extend`]. Coalescing is eager: after every free, no two
//! adjacent blocks are both free.
//!
//! The same allocator backs `#[global_allocator]` on bare metal through
//! [`LockedHeap`]; host builds use the system allocator instead (see
//! `lib.rs`).

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

/// Initial heap size mapped at boot (1 MiB).
pub const KERNEL_HEAP_INITIAL: usize = 1024 * 1024;

/// Growth step when the heap runs dry (1 MiB).
pub const KERNEL_HEAP_GROW: usize = 1024 * 1024;

/// Minimum body size handed out.
const MIN_BLOCK: usize = 16;

/// Allocation alignment guarantee.
const ALIGNMENT: usize = 8;

/// Block header preceding every allocation.
///
/// `align(8)` keeps the header size a multiple of the alignment on both
/// 32- and 64-bit targets, so data pointers inherit the alignment of the
/// region base.
#[repr(C, align(8))]
struct BlockHeader {
    size: usize,
    used: bool,
    next: *mut BlockHeader,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

fn align_size(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// The heap proper. Not thread-safe on its own; wrap in [`LockedHeap`].
pub struct Heap {
    start: *mut u8,
    size: usize,
    used: usize,
}

// The heap owns its region exclusively; raw pointers never escape except
// as allocations.
unsafe impl Send for Heap {}

impl Heap {
    /// Take ownership of `[start, start + size)` and format it as a
    /// single free block.
    ///
    /// # Safety
    ///
    /// The region must be mapped, writable, 8-byte aligned, at least one
    /// header plus [`MIN_BLOCK`] long, and owned by the heap from now on.
    pub unsafe fn new(start: *mut u8, size: usize) -> Self {
        debug_assert_eq!(start as usize % ALIGNMENT, 0);
        debug_assert!(size > HEADER_SIZE + MIN_BLOCK);
        let first = start as *mut BlockHeader;
        // SAFETY: caller guarantees the region is mapped and owned.
        unsafe {
            (*first).size = size - HEADER_SIZE;
            (*first).used = false;
            (*first).next = ptr::null_mut();
        }
        Self {
            start,
            size,
            used: 0,
        }
    }

    /// Append `bytes` of freshly mapped memory at the current top as one
    /// free block, then coalesce it into a free tail.
    ///
    /// # Safety
    ///
    /// `[start + size, start + size + bytes)` must be mapped, writable,
    /// and contiguous with the existing region.
    pub unsafe fn extend(&mut self, bytes: usize) {
        debug_assert!(bytes > HEADER_SIZE + MIN_BLOCK);
        let block = unsafe { self.start.add(self.size) } as *mut BlockHeader;
        // SAFETY: caller guarantees the new range is mapped and ours.
        unsafe {
            (*block).size = bytes - HEADER_SIZE;
            (*block).used = false;
            (*block).next = ptr::null_mut();
        }
        if let Some(last) = self.last_block() {
            // SAFETY: `last` is a live header inside the old region.
            unsafe { (*last).next = block };
        }
        self.size += bytes;
        self.coalesce();
    }

    /// First-fit allocation. Returns `None` when no block fits.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = align_size(size).max(MIN_BLOCK);

        let mut current = self.first_block()?;
        loop {
            // SAFETY: traversal only visits headers created by this heap.
            let header = unsafe { &mut *current };
            if !header.used && header.size >= size {
                self.split(current, size);
                // Reborrow after the split updated the header.
                let header = unsafe { &mut *current };
                header.used = true;
                self.used += header.size + HEADER_SIZE;
                let data = unsafe { (current as *mut u8).add(HEADER_SIZE) };
                return NonNull::new(data);
            }
            if header.next.is_null() {
                return None;
            }
            current = header.next;
        }
    }

    /// Return a block to the heap. Foreign pointers and double frees are
    /// silently ignored.
    pub fn free(&mut self, data: *mut u8) {
        let Some(header) = self.header_of(data) else {
            return;
        };
        // SAFETY: `header_of` validated that this is one of our blocks.
        let block = unsafe { &mut *header };
        if !block.used {
            return;
        }
        block.used = false;
        self.used -= block.size + HEADER_SIZE;
        self.coalesce();
    }

    /// Resize in place when the block already suffices; otherwise
    /// allocate, copy `min(old, new)` bytes, and free the original.
    pub fn reallocate(&mut self, data: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        if data.is_null() {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            self.free(data);
            return None;
        }
        let header = self.header_of(data)?;
        // SAFETY: validated header.
        let old_size = unsafe { (*header).size };
        if align_size(new_size) <= old_size {
            return NonNull::new(data);
        }
        let fresh = self.allocate(new_size)?;
        // SAFETY: both regions are live and distinct; copy the smaller.
        unsafe {
            ptr::copy_nonoverlapping(data, fresh.as_ptr(), old_size.min(new_size));
        }
        self.free(data);
        Some(fresh)
    }

    pub fn total_size(&self) -> usize {
        self.size
    }

    pub fn used_size(&self) -> usize {
        self.used
    }

    pub fn free_size(&self) -> usize {
        self.size - self.used
    }

    /// Split `block` so that it holds exactly `size` bytes, creating a
    /// free successor from the remainder when it can host a header plus
    /// the minimum body.
    fn split(&mut self, block: *mut BlockHeader, size: usize) {
        // SAFETY: `block` is a live header.
        let header = unsafe { &mut *block };
        let remainder = header.size - size;
        if remainder < HEADER_SIZE + MIN_BLOCK {
            return;
        }
        let tail = unsafe { (block as *mut u8).add(HEADER_SIZE + size) } as *mut BlockHeader;
        // SAFETY: the tail lies inside the block being split.
        unsafe {
            (*tail).size = remainder - HEADER_SIZE;
            (*tail).used = false;
            (*tail).next = header.next;
        }
        header.size = size;
        header.next = tail;
    }

    /// Merge adjacent free blocks until no pair remains.
    fn coalesce(&mut self) {
        let Some(mut current) = self.first_block() else {
            return;
        };
        loop {
            // SAFETY: traversal over our own headers.
            let header = unsafe { &mut *current };
            let next = header.next;
            if next.is_null() {
                break;
            }
            let next_header = unsafe { &mut *next };
            if !header.used && !next_header.used {
                header.size += HEADER_SIZE + next_header.size;
                header.next = next_header.next;
                // Stay on `current`: it may now touch another free block.
                continue;
            }
            current = next;
        }
    }

    fn first_block(&self) -> Option<*mut BlockHeader> {
        if self.size == 0 {
            None
        } else {
            Some(self.start as *mut BlockHeader)
        }
    }

    fn last_block(&self) -> Option<*mut BlockHeader> {
        let mut current = self.first_block()?;
        loop {
            // SAFETY: traversal over our own headers.
            let next = unsafe { (*current).next };
            if next.is_null() {
                return Some(current);
            }
            current = next;
        }
    }

    /// Header for `data`, or `None` for null/foreign pointers.
    fn header_of(&self, data: *mut u8) -> Option<*mut BlockHeader> {
        if data.is_null() {
            return None;
        }
        let addr = data as usize;
        let start = self.start as usize;
        if addr < start + HEADER_SIZE || addr >= start + self.size {
            return None;
        }
        Some((addr - HEADER_SIZE) as *mut BlockHeader)
    }

    #[cfg(test)]
    fn blocks(&self) -> alloc::vec::Vec<(usize, bool)> {
        let mut out = alloc::vec::Vec::new();
        let Some(mut current) = self.first_block() else {
            return out;
        };
        loop {
            let header = unsafe { &*current };
            out.push((header.size, header.used));
            if header.next.is_null() {
                break;
            }
            current = header.next;
        }
        out
    }
}

/// Grow callback installed by the bootstrap code: maps `bytes` more heap
/// and extends the allocator. Returns false when out of frames or when
/// the kernel state is busy (growth from inside a kernel critical
/// section is refused rather than deadlocked).
pub type GrowHook = fn(usize) -> bool;

static GROW_HOOK: AtomicUsize = AtomicUsize::new(0);

pub fn set_grow_hook(hook: GrowHook) {
    GROW_HOOK.store(hook as usize, Ordering::Release);
}

fn try_grow(bytes: usize) -> bool {
    let raw = GROW_HOOK.load(Ordering::Acquire);
    if raw == 0 {
        return false;
    }
    // SAFETY: only `set_grow_hook` stores here, always a valid fn.
    let hook: GrowHook = unsafe { core::mem::transmute(raw) };
    hook(bytes)
}

/// Spin-locked heap suitable for `#[global_allocator]`.
pub struct LockedHeap {
    inner: Mutex<Option<Heap>>,
}

impl LockedHeap {
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Mount the heap over an already-mapped region.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::new`]; must be called exactly once.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        // SAFETY: forwarded contract.
        *self.inner.lock() = Some(unsafe { Heap::new(start, size) });
    }

    /// Append mapped memory to the top of the region.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::extend`].
    pub unsafe fn extend(&self, bytes: usize) {
        if let Some(heap) = self.inner.lock().as_mut() {
            // SAFETY: forwarded contract.
            unsafe { heap.extend(bytes) };
        }
    }

    pub fn stats(&self) -> (usize, usize, usize) {
        match self.inner.lock().as_ref() {
            Some(heap) => (heap.total_size(), heap.used_size(), heap.free_size()),
            None => (0, 0, 0),
        }
    }

    fn try_allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().as_mut()?.allocate(size)
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let (size, needs_fixup) = effective_size(layout);
        let raw = match self.try_allocate(size) {
            Some(ptr) => ptr.as_ptr(),
            None => {
                if !try_grow(size.max(KERNEL_HEAP_GROW)) {
                    return ptr::null_mut();
                }
                match self.try_allocate(size) {
                    Some(ptr) => ptr.as_ptr(),
                    None => return ptr::null_mut(),
                }
            }
        };
        if !needs_fixup {
            return raw;
        }
        // Over-aligned request: place the payload at the next aligned
        // address past one stashed word and remember where the real
        // allocation starts.
        let aligned = (raw as usize + ALIGNMENT + layout.align() - 1) & !(layout.align() - 1);
        // SAFETY: `effective_size` reserved room for the shift + stash.
        unsafe { *((aligned - ALIGNMENT) as *mut usize) = raw as usize };
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let raw = if layout.align() > ALIGNMENT {
            // SAFETY: `alloc` stashed the original pointer one word below.
            unsafe { *((ptr as usize - ALIGNMENT) as *const usize) as *mut u8 }
        } else {
            ptr
        };
        if let Some(heap) = self.inner.lock().as_mut() {
            heap.free(raw);
        }
    }
}

fn effective_size(layout: Layout) -> (usize, bool) {
    if layout.align() <= ALIGNMENT {
        (layout.size().max(1), false)
    } else {
        (layout.size() + layout.align() + ALIGNMENT, true)
    }
}

/// The kernel's global allocator instance. Registered as the Rust global
/// allocator on bare metal only; host builds use the system allocator
/// (see `lib.rs`) and never mount this one.
#[cfg_attr(all(target_arch = "x86", target_os = "none"), global_allocator)]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();
