//! Buddy-system kernel heap allocator.
//!
//! Requests are rounded up to a power-of-two size class. Each class owns a
//! free list of blocks, kept in ascending address order, and a lock. An empty
//! class refills by splitting a block from the next non-empty class above it;
//! when every class is empty a fresh page is obtained from the page source
//! and installed as one maximal free block. Freeing walks the other way:
//! the block rejoins its class and merges with its buddy repeatedly until a
//! buddy is missing or the top class is reached, at which point a fully free
//! page is handed back to the page source.
//!
//! Requests too large for the top class bypass the class machinery entirely
//! and are served from a dedicated run of contiguous pages.

use core::alloc::{GlobalAlloc, Layout};
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::{Mutex, Once};

use super::list::{Link, LinkedList};
use super::page_source::PageSource;

// =============================================================================
// Constants and Configuration
// =============================================================================

/// Page size of the underlying page source.
pub const PGSIZE: usize = 4096;

/// Magic number for detecting arena corruption.
pub const ARENA_MAGIC: u32 = 0x9a54_8eed;

/// Fill pattern written over merged payloads in debug builds to surface
/// use-after-free bugs.
pub const POISON_BYTE: u8 = 0xCC;

/// Number of block size classes.
pub const CLASS_COUNT: usize = 7;

/// Block size classes: powers of two from the smallest block able to hold
/// free-list bookkeeping up to the largest block that fits a page beside the
/// arena header.
pub const CLASS_SIZES: [usize; CLASS_COUNT] = [32, 64, 128, 256, 512, 1024, 2048];

const BLOCK_HDR: usize = mem::size_of::<BlockHeader>();
const ARENA_HDR: usize = mem::size_of::<ArenaHeader>();
const TOP_CLASS: usize = CLASS_COUNT - 1;

const _: () = assert!(PGSIZE.is_power_of_two());
const _: () = assert!(CLASS_SIZES[0] >= 16);
const _: () = assert!(CLASS_SIZES[0] >= mem::size_of::<FreeBlock>());
const _: () = assert!(CLASS_SIZES[TOP_CLASS] <= PGSIZE - ARENA_HDR);
const _: () = assert!(CLASS_SIZES[TOP_CLASS] * 2 > PGSIZE - ARENA_HDR);
const _: () = {
    let mut class = 1;
    while class < CLASS_COUNT {
        assert!(CLASS_SIZES[class] == CLASS_SIZES[class - 1] * 2);
        class += 1;
    }
};
const _: () = assert!(mem::offset_of!(ArenaHeader, link) == 0);

// =============================================================================
// On-memory metadata
// =============================================================================

/// Permanent one-word prefix of every split-page block. The user pointer is
/// `block + BLOCK_HDR`; `free` walks back the same distance to recover the
/// block's class.
#[repr(C)]
struct BlockHeader {
    size: usize,
}

/// View of a block while it sits on a free list: the size word plus the
/// intrusive list linkage. The linkage overlaps what is user payload while
/// the block is allocated.
#[repr(C)]
struct FreeBlock {
    size: usize,
    link: Link,
}

/// First bytes of every page (or page run) owned by the heap.
///
/// `desc` points at the descriptor table base for split pages and is null for
/// huge arenas. `free_cnt` counts the arena's blocks currently on free lists
/// for split pages and the page count for huge arenas; it is atomic because
/// blocks of one arena move between classes under different class locks.
#[repr(C)]
struct ArenaHeader {
    link: Link,
    magic: u32,
    desc: *const Descriptor,
    free_cnt: AtomicUsize,
}

/// Per-class metadata. The mutex is the class lock; it guards the free list
/// and the `free_cnt` updates made while a block of this class is inserted
/// or removed.
struct Descriptor {
    block_size: usize,
    blocks_per_arena: usize,
    free_list: Mutex<LinkedList>,
}

impl Descriptor {
    const fn new(block_size: usize) -> Self {
        Descriptor {
            block_size,
            blocks_per_arena: (PGSIZE - ARENA_HDR) / block_size,
            free_list: Mutex::new(LinkedList::new()),
        }
    }
}

const FREE_LINK_OFFSET: usize = mem::offset_of!(FreeBlock, link);

fn link_of(block: NonNull<FreeBlock>) -> NonNull<Link> {
    unsafe { NonNull::new_unchecked((block.as_ptr() as *mut u8).add(FREE_LINK_OFFSET) as *mut Link) }
}

fn block_of(link: NonNull<Link>) -> NonNull<FreeBlock> {
    unsafe { NonNull::new_unchecked((link.as_ptr() as *mut u8).sub(FREE_LINK_OFFSET) as *mut FreeBlock) }
}

const fn page_base(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

/// Links `link` into `list` keeping strictly ascending address order.
fn insert_sorted(list: &mut LinkedList, link: NonNull<Link>) {
    let at = list
        .iter()
        .find(|candidate| candidate.as_ptr() as usize > link.as_ptr() as usize);
    list.insert_before(at, link);
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of the heap's counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapStats {
    pub allocations: u64,
    pub frees: u64,
    pub splits: u64,
    pub merges: u64,
    pub pages_acquired: u64,
    pub pages_released: u64,
    pub huge_allocations: u64,
    pub huge_frees: u64,
}

struct HeapCounters {
    allocations: AtomicU64,
    frees: AtomicU64,
    splits: AtomicU64,
    merges: AtomicU64,
    pages_acquired: AtomicU64,
    pages_released: AtomicU64,
    huge_allocations: AtomicU64,
    huge_frees: AtomicU64,
}

impl HeapCounters {
    const fn new() -> Self {
        HeapCounters {
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            splits: AtomicU64::new(0),
            merges: AtomicU64::new(0),
            pages_acquired: AtomicU64::new(0),
            pages_released: AtomicU64::new(0),
            huge_allocations: AtomicU64::new(0),
            huge_frees: AtomicU64::new(0),
        }
    }
}

// =============================================================================
// Kernel Heap
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CoalesceOutcome {
    ReachedTop,
    Stopped,
}

/// The buddy heap: descriptor table, arena registry and counters.
///
/// All state is behind per-class locks plus one registry lock, so every
/// operation takes `&self`. Lock discipline: the registry lock is acquired
/// before any class lock when both are needed, and no two class locks are
/// ever held together (splitting descends classes while coalescing ascends;
/// a block in transit between classes is off every list and thus invisible
/// to other threads).
pub struct KernelHeap<'s> {
    source: Once<&'s dyn PageSource>,
    descs: [Descriptor; CLASS_COUNT],
    arena_list: Mutex<LinkedList>,
    counters: HeapCounters,
}

// Safety: the raw pointers inside the lists are only dereferenced under the
// lock guarding the list that holds them.
unsafe impl Send for KernelHeap<'_> {}
unsafe impl Sync for KernelHeap<'_> {}

impl<'s> KernelHeap<'s> {
    pub const fn new() -> Self {
        KernelHeap {
            source: Once::new(),
            descs: [
                Descriptor::new(CLASS_SIZES[0]),
                Descriptor::new(CLASS_SIZES[1]),
                Descriptor::new(CLASS_SIZES[2]),
                Descriptor::new(CLASS_SIZES[3]),
                Descriptor::new(CLASS_SIZES[4]),
                Descriptor::new(CLASS_SIZES[5]),
                Descriptor::new(CLASS_SIZES[6]),
            ],
            arena_list: Mutex::new(LinkedList::new()),
            counters: HeapCounters::new(),
        }
    }

    /// Installs the page source. Must run before any allocation; requests
    /// made earlier fail as out-of-memory. A second call is ignored.
    pub fn init(&self, source: &'s dyn PageSource) {
        self.source.call_once(|| source);
        crate::kinfo!(
            "[heap] initialized: page {} bytes, classes {:?}",
            PGSIZE,
            CLASS_SIZES
        );
    }

    /// Obtains a block of at least `size` bytes, or `None` when the page
    /// source has nothing to give. A request of zero yields `None` without
    /// side effects.
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let needed = size.checked_add(BLOCK_HDR)?;
        let Some(class) = CLASS_SIZES.iter().position(|&s| s >= needed) else {
            return self.malloc_huge(needed);
        };

        loop {
            if let Some(block) = self.pop_free(class) {
                self.counters.allocations.fetch_add(1, Ordering::Relaxed);
                return Some(unsafe {
                    NonNull::new_unchecked((block.as_ptr() as *mut u8).add(BLOCK_HDR))
                });
            }
            self.refill(class)?;
        }
    }

    /// Obtains a zero-initialized region of `a * b` bytes. Multiplication
    /// overflow fails as out-of-memory.
    pub fn calloc(&self, a: usize, b: usize) -> Option<NonNull<u8>> {
        let size = a.checked_mul(b)?;
        let region = self.malloc(size)?;
        unsafe {
            ptr::write_bytes(region.as_ptr(), 0, size);
        }
        Some(region)
    }

    /// Resizes `old`, possibly moving it. Null `old` behaves like `malloc`;
    /// zero `new_size` behaves like `free` and returns `None`. On allocation
    /// failure `old` is left untouched.
    ///
    /// # Safety
    /// `old` must be null or a live pointer previously returned by this heap.
    pub unsafe fn realloc(&self, old: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            self.free(old);
            return None;
        }
        let region = self.malloc(new_size);
        if let (Some(old), Some(new)) = (NonNull::new(old), region) {
            let old_capacity = self.user_capacity(old);
            let preserved = new_size.min(old_capacity);
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), preserved);
            self.free(old.as_ptr());
        }
        region
    }

    /// Releases `ptr`. Null is a no-op.
    ///
    /// # Safety
    /// A non-null `ptr` must have been returned by this heap and not freed
    /// since.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(user) = NonNull::new(ptr) else {
            return;
        };
        let header_addr = user.as_ptr() as usize - BLOCK_HDR;
        let arena = page_base(header_addr) as *mut ArenaHeader;
        self.check_arena(arena);

        if (*arena).desc.is_null() {
            // Huge arena: the whole page run goes back at once.
            let offset = user.as_ptr() as usize - arena as usize;
            if offset != ARENA_HDR {
                crate::kerror!(
                    "[heap] huge free at {:#x}: offset {} is not the arena header size",
                    user.as_ptr() as usize,
                    offset
                );
                panic!("kheap: corrupt huge block at {:#x}", user.as_ptr() as usize);
            }
            let page_cnt = (*arena).free_cnt.load(Ordering::Relaxed);
            self.counters.huge_frees.fetch_add(1, Ordering::Relaxed);
            self.counters
                .pages_released
                .fetch_add(page_cnt as u64, Ordering::Relaxed);
            if let Some(source) = self.source.get() {
                source.release_pages(NonNull::new_unchecked(arena as *mut u8), page_cnt);
            }
            return;
        }

        let offset = header_addr - arena as usize;
        if offset < ARENA_HDR || (offset - ARENA_HDR) % CLASS_SIZES[0] != 0 {
            crate::kerror!("[heap] misaligned free of {:#x}", user.as_ptr() as usize);
            panic!("kheap: corrupt block at {:#x}", header_addr);
        }

        let block = NonNull::new_unchecked(header_addr as *mut FreeBlock);
        let size = (*block.as_ptr()).size;
        if !size.is_power_of_two() || size < CLASS_SIZES[0] || size > CLASS_SIZES[TOP_CLASS] {
            crate::kerror!(
                "[heap] block at {:#x} records illegal size {}",
                header_addr,
                size
            );
            panic!("kheap: corrupt block size at {:#x}", header_addr);
        }
        let class = (size / CLASS_SIZES[0]).trailing_zeros() as usize;

        self.counters.frees.fetch_add(1, Ordering::Relaxed);
        self.insert_free(class, block);
        if self.coalesce(block, class) == CoalesceOutcome::ReachedTop {
            self.release_idle_arena(arena);
        }
    }

    /// Point-in-time copy of the heap's counters.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            frees: self.counters.frees.load(Ordering::Relaxed),
            splits: self.counters.splits.load(Ordering::Relaxed),
            merges: self.counters.merges.load(Ordering::Relaxed),
            pages_acquired: self.counters.pages_acquired.load(Ordering::Relaxed),
            pages_released: self.counters.pages_released.load(Ordering::Relaxed),
            huge_allocations: self.counters.huge_allocations.load(Ordering::Relaxed),
            huge_frees: self.counters.huge_frees.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Allocation path
    // =========================================================================

    /// Pops the front block of `class`, adjusting its arena's free count.
    fn pop_free(&self, class: usize) -> Option<NonNull<FreeBlock>> {
        let mut list = self.descs[class].free_list.lock();
        let link = list.pop_front()?;
        let block = block_of(link);
        unsafe {
            let arena = page_base(block.as_ptr() as usize) as *mut ArenaHeader;
            (*arena).free_cnt.fetch_sub(1, Ordering::Relaxed);
        }
        Some(block)
    }

    /// Inserts `block` into `class`'s free list in address order, adjusting
    /// its arena's free count.
    fn insert_free(&self, class: usize, block: NonNull<FreeBlock>) {
        let mut list = self.descs[class].free_list.lock();
        insert_sorted(&mut list, link_of(block));
        unsafe {
            let arena = page_base(block.as_ptr() as usize) as *mut ArenaHeader;
            (*arena).free_cnt.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Inserts two sibling blocks under a single acquisition of `class`'s
    /// lock. Both must live in the same arena.
    fn insert_free_pair(&self, class: usize, lo: NonNull<FreeBlock>, hi: NonNull<FreeBlock>) {
        let mut list = self.descs[class].free_list.lock();
        insert_sorted(&mut list, link_of(lo));
        insert_sorted(&mut list, link_of(hi));
        unsafe {
            let arena = page_base(lo.as_ptr() as usize) as *mut ArenaHeader;
            (*arena).free_cnt.fetch_add(2, Ordering::Relaxed);
        }
    }

    /// Makes a block available at `class`, either by splitting a larger free
    /// block downward or by installing a fresh arena. `None` means the page
    /// source is exhausted; no free list is left mutated in that case.
    fn refill(&self, class: usize) -> Option<()> {
        for donor in class + 1..CLASS_COUNT {
            if self.split_down(donor, class) {
                return Some(());
            }
        }
        self.install_arena()?;
        self.split_down(TOP_CLASS, class);
        Some(())
    }

    /// Splits one block of `donor` down to `class`, one level at a time: pop
    /// a block, carve it into two half-sized buddies, insert both one class
    /// below, repeat. Returns false only when nothing could be popped at all
    /// (the donor was drained by a racing thread before the first split).
    fn split_down(&self, donor: usize, class: usize) -> bool {
        let mut level = donor;
        while level > class {
            let Some(block) = self.pop_free(level) else {
                return level != donor;
            };
            let child_size = CLASS_SIZES[level - 1];
            self.counters.splits.fetch_add(1, Ordering::Relaxed);
            unsafe {
                let lo = block.as_ptr();
                let hi = (lo as *mut u8).add(child_size) as *mut FreeBlock;
                (*lo).size = child_size;
                (*hi).size = child_size;
                self.insert_free_pair(level - 1, block, NonNull::new_unchecked(hi));
            }
            level -= 1;
        }
        true
    }

    /// Obtains one page from the page source and installs it as an arena
    /// holding a single maximal free block on the top class's list.
    fn install_arena(&self) -> Option<()> {
        let source = *self.source.get()?;
        let page = source.acquire_page()?;
        self.counters.pages_acquired.fetch_add(1, Ordering::Relaxed);
        unsafe {
            let arena = page.as_ptr() as *mut ArenaHeader;
            ptr::write(
                arena,
                ArenaHeader {
                    link: Link::new(),
                    magic: ARENA_MAGIC,
                    desc: self.descs.as_ptr(),
                    free_cnt: AtomicUsize::new(0),
                },
            );
            let block = page.as_ptr().add(ARENA_HDR) as *mut FreeBlock;
            (*block).size = CLASS_SIZES[TOP_CLASS];

            // Registry lock before the class lock, matching the release and
            // diagnostics paths.
            let mut arenas = self.arena_list.lock();
            insert_sorted(&mut arenas, NonNull::new_unchecked(arena as *mut Link));
            self.insert_free(TOP_CLASS, NonNull::new_unchecked(block));
            drop(arenas);
        }
        crate::kdebug!("[heap] new arena at {:#x}", page.as_ptr() as usize);
        Some(())
    }

    /// Serves a request too large for any class from a dedicated run of
    /// contiguous pages. The arena is not registered; its header records the
    /// page count for the release path.
    fn malloc_huge(&self, needed: usize) -> Option<NonNull<u8>> {
        let total = needed.checked_add(ARENA_HDR)?;
        let page_cnt = total.div_ceil(PGSIZE);
        let source = *self.source.get()?;
        let pages = source.acquire_pages(page_cnt)?;
        self.counters
            .pages_acquired
            .fetch_add(page_cnt as u64, Ordering::Relaxed);
        self.counters.huge_allocations.fetch_add(1, Ordering::Relaxed);
        unsafe {
            let arena = pages.as_ptr() as *mut ArenaHeader;
            ptr::write(
                arena,
                ArenaHeader {
                    link: Link::new(),
                    magic: ARENA_MAGIC,
                    desc: ptr::null(),
                    free_cnt: AtomicUsize::new(page_cnt),
                },
            );
            Some(NonNull::new_unchecked(pages.as_ptr().add(ARENA_HDR)))
        }
    }

    // =========================================================================
    // Free path
    // =========================================================================

    /// Merges `block` with its buddy repeatedly, ascending one class per
    /// merge. `block` must already be on `class`'s free list (though a racing
    /// thread may claim it before the class lock is re-acquired, which stops
    /// the walk). Returns whether the merged block reached the top class.
    fn coalesce(&self, block: NonNull<FreeBlock>, class: usize) -> CoalesceOutcome {
        let mut block = block;
        let mut class = class;
        loop {
            if class == TOP_CLASS {
                return CoalesceOutcome::ReachedTop;
            }
            let block_size = CLASS_SIZES[class];
            let link = link_of(block);
            let mut list = self.descs[class].free_list.lock();

            // The lock was dropped since the block went onto the list, so
            // re-search instead of trusting a cached position.
            if !list.contains(link) {
                return CoalesceOutcome::Stopped;
            }

            let block_addr = block.as_ptr() as usize;
            let index = (block_addr - page_base(block_addr) - ARENA_HDR) / block_size;
            let buddy_link = if index % 2 == 1 {
                list.prev(link)
            } else {
                list.next(link)
            };
            let Some(buddy_link) = buddy_link else {
                return CoalesceOutcome::Stopped;
            };

            // The neighbor is the buddy only if it sits exactly one block
            // away on the right side; a same-class neighbor from another
            // parent (or another page) never does.
            let buddy = block_of(buddy_link);
            let buddy_addr = buddy.as_ptr() as usize;
            let (lo, lo_addr, hi_addr) = if index % 2 == 1 {
                (buddy, buddy_addr, block_addr)
            } else {
                (block, block_addr, buddy_addr)
            };
            if hi_addr - lo_addr != block_size || page_base(lo_addr) != page_base(hi_addr) {
                return CoalesceOutcome::Stopped;
            }

            list.remove(link);
            list.remove(buddy_link);
            drop(list);
            self.counters.merges.fetch_add(1, Ordering::Relaxed);
            unsafe {
                let arena = page_base(lo_addr) as *mut ArenaHeader;
                (*arena).free_cnt.fetch_sub(2, Ordering::Relaxed);

                // Both halves are off every list now, so the parent can be
                // formed without holding any lock.
                (*lo.as_ptr()).size = block_size * 2;
                #[cfg(debug_assertions)]
                ptr::write_bytes(
                    (lo.as_ptr() as *mut u8).add(BLOCK_HDR),
                    POISON_BYTE,
                    block_size * 2 - BLOCK_HDR,
                );
            }

            class += 1;
            self.insert_free(class, lo);
            block = lo;
        }
    }

    /// Returns `arena`'s page to the page source if it is entirely free:
    /// coalescing reached the top class, so a fully free arena has exactly
    /// its one maximal block left on the top free list.
    fn release_idle_arena(&self, arena: *mut ArenaHeader) {
        let mut arenas = self.arena_list.lock();
        // Only address comparisons until the arena is proven registered; a
        // racing release may already have returned the page.
        let arena_link = unsafe { NonNull::new_unchecked(arena as *mut Link) };
        if !arenas.contains(arena_link) {
            return;
        }
        unsafe {
            let blocks_per_arena = self.descs[TOP_CLASS].blocks_per_arena;
            if (*arena).free_cnt.load(Ordering::Relaxed) != blocks_per_arena {
                return;
            }
            let mut list = self.descs[TOP_CLASS].free_list.lock();
            let base = arena as usize;
            let Some(link) = list
                .iter()
                .find(|link| page_base(block_of(*link).as_ptr() as usize) == base)
            else {
                // A racing malloc claimed the maximal block first.
                return;
            };
            list.remove(link);
            (*arena).free_cnt.fetch_sub(1, Ordering::Relaxed);
            drop(list);
            arenas.remove(arena_link);
            drop(arenas);

            self.counters.pages_released.fetch_add(1, Ordering::Relaxed);
            if let Some(source) = self.source.get() {
                source.release_page(NonNull::new_unchecked(arena as *mut u8));
            }
        }
        crate::kdebug!("[heap] released arena at {:#x}", arena as usize);
    }

    // =========================================================================
    // Validation and diagnostics
    // =========================================================================

    /// Asserts the arena header behind a user pointer is intact.
    unsafe fn check_arena(&self, arena: *const ArenaHeader) {
        let magic = (*arena).magic;
        if magic != ARENA_MAGIC {
            crate::kerror!(
                "[heap] bad arena magic {:#x} at {:#x}",
                magic,
                arena as usize
            );
            panic!("kheap: corrupt arena at {:#x}", arena as usize);
        }
    }

    /// User bytes available behind a live pointer; feeds the `realloc` copy.
    unsafe fn user_capacity(&self, user: NonNull<u8>) -> usize {
        let header_addr = user.as_ptr() as usize - BLOCK_HDR;
        let arena = page_base(header_addr) as *mut ArenaHeader;
        self.check_arena(arena);
        if (*arena).desc.is_null() {
            (*arena).free_cnt.load(Ordering::Relaxed) * PGSIZE - ARENA_HDR
        } else {
            (*(header_addr as *const BlockHeader)).size - BLOCK_HDR
        }
    }

    /// Walks every free list and registered arena asserting the structural
    /// invariants: ascending address order, exact class sizes, page-interior
    /// alignment, and per-arena free counts matching the lists. Intended for
    /// quiesced heaps (tests, debug dumps); concurrent mutation makes the
    /// counts momentarily stale.
    pub fn assert_invariants(&self) {
        for (class, desc) in self.descs.iter().enumerate() {
            let list = desc.free_list.lock();
            let mut last = 0usize;
            for link in list.iter() {
                let block = block_of(link);
                let addr = block.as_ptr() as usize;
                assert!(addr > last, "class {} free list out of address order", class);
                last = addr;
                let offset = addr - page_base(addr);
                assert!(
                    offset >= ARENA_HDR && offset + desc.block_size <= PGSIZE,
                    "free block {:#x} escapes its page",
                    addr
                );
                assert_eq!(
                    (offset - ARENA_HDR) % CLASS_SIZES[0],
                    0,
                    "free block {:#x} misaligned",
                    addr
                );
                unsafe {
                    assert_eq!(
                        (*block.as_ptr()).size,
                        desc.block_size,
                        "free block {:#x} recorded size does not match class {}",
                        addr,
                        class
                    );
                }
            }
        }

        let arenas = self.arena_list.lock();
        for arena_link in arenas.iter() {
            let base = arena_link.as_ptr() as usize;
            let mut on_lists = 0usize;
            for desc in &self.descs {
                let list = desc.free_list.lock();
                on_lists += list
                    .iter()
                    .filter(|link| page_base(block_of(*link).as_ptr() as usize) == base)
                    .count();
            }
            unsafe {
                let arena = base as *const ArenaHeader;
                assert_eq!((*arena).magic, ARENA_MAGIC, "arena {:#x} corrupted", base);
                assert_eq!(
                    (*arena).free_cnt.load(Ordering::Relaxed),
                    on_lists,
                    "arena {:#x} free count does not match its listed blocks",
                    base
                );
            }
        }
    }

    /// Logs every free block of every registered arena, grouped by arena:
    /// `(address, recorded size)` pairs per class. Observational only.
    pub fn log_free_blocks(&self) {
        let arenas = self.arena_list.lock();
        crate::kinfo!("[heap] {} arenas registered", arenas.len());
        for (index, arena_link) in arenas.iter().enumerate() {
            let base = arena_link.as_ptr() as usize;
            crate::kinfo!("[heap] arena {} at {:#x}:", index, base);
            for desc in &self.descs {
                let list = desc.free_list.lock();
                for link in list.iter() {
                    let block = block_of(link);
                    let addr = block.as_ptr() as usize;
                    if page_base(addr) == base {
                        unsafe {
                            crate::kinfo!(
                                "[heap]   {:#x} ({} bytes)",
                                addr,
                                (*block.as_ptr()).size
                            );
                        }
                    }
                }
            }
        }
    }

    /// Logs a counter summary.
    pub fn log_stats(&self) {
        let stats = self.stats();
        crate::kinfo!("[heap] allocations: {}", stats.allocations);
        crate::kinfo!("[heap] frees: {}", stats.frees);
        crate::kinfo!("[heap] splits: {}", stats.splits);
        crate::kinfo!("[heap] merges: {}", stats.merges);
        crate::kinfo!(
            "[heap] pages acquired/released: {}/{}",
            stats.pages_acquired,
            stats.pages_released
        );
        crate::kinfo!(
            "[heap] huge allocations/frees: {}/{}",
            stats.huge_allocations,
            stats.huge_frees
        );
    }
}

// =============================================================================
// Global Heap Instance
// =============================================================================

pub static KERNEL_HEAP: KernelHeap<'static> = KernelHeap::new();

/// Installs the page source backing the global kernel heap. Must run before
/// any allocation.
pub fn init_kernel_heap(source: &'static dyn PageSource) {
    KERNEL_HEAP.init(source);
}

/// Allocates `size` bytes from the global kernel heap.
pub fn kalloc(size: usize) -> Option<*mut u8> {
    KERNEL_HEAP.malloc(size).map(NonNull::as_ptr)
}

/// Allocates a zero-initialized `a * b` byte region from the global kernel
/// heap.
pub fn kcalloc(a: usize, b: usize) -> Option<*mut u8> {
    KERNEL_HEAP.calloc(a, b).map(NonNull::as_ptr)
}

/// Resizes a global-heap allocation; see [`KernelHeap::realloc`].
///
/// # Safety
/// `old` must be null or a live pointer previously returned by the global
/// kernel heap.
pub unsafe fn krealloc(old: *mut u8, new_size: usize) -> Option<*mut u8> {
    KERNEL_HEAP.realloc(old, new_size).map(NonNull::as_ptr)
}

/// Frees a global-heap allocation. Null is a no-op.
///
/// # Safety
/// A non-null `ptr` must have been returned by the global kernel heap and not
/// freed since.
pub unsafe fn kfree(ptr: *mut u8) {
    KERNEL_HEAP.free(ptr);
}

/// Counter snapshot of the global kernel heap.
pub fn heap_stats() -> HeapStats {
    KERNEL_HEAP.stats()
}

/// Logs the global kernel heap's counter summary.
pub fn log_heap_stats() {
    KERNEL_HEAP.log_stats();
}

/// `core::alloc::GlobalAlloc` facade over the global kernel heap, for the
/// embedding kernel to register as its `#[global_allocator]`.
pub struct GlobalKernelAllocator;

unsafe impl GlobalAlloc for GlobalKernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Size-class placement guarantees word alignment only; stricter
        // layouts are refused rather than silently misaligned.
        if layout.align() > mem::size_of::<usize>() {
            return ptr::null_mut();
        }
        kalloc(layout.size()).unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        kfree(ptr);
    }
}

// =============================================================================
// Tests
// =============================================================================
