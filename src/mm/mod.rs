//! Memory management: the buddy heap and its supporting pieces.
//!
//! - `allocator`: size-class descriptors, arenas, split/coalesce, the global
//!   kernel heap and its `kalloc`-family wrappers
//! - `list`: the intrusive doubly-linked list threading free blocks and the
//!   arena registry
//! - `page_source`: the trait seam to the page allocator underneath

pub mod allocator;
pub mod list;
pub mod page_source;

// Re-export commonly used items from allocator
pub use allocator::{
    heap_stats, init_kernel_heap, kalloc, kcalloc, kfree, krealloc, log_heap_stats,
    GlobalKernelAllocator, HeapStats, KernelHeap, ARENA_MAGIC, CLASS_COUNT, CLASS_SIZES,
    KERNEL_HEAP, PGSIZE, POISON_BYTE,
};

// Re-export from page_source
pub use page_source::PageSource;
