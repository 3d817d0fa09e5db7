//! kheap: a buddy-system heap allocator for kernel code.
//!
//! Byte-granular allocation on top of a page allocator: pages are carved into
//! power-of-two blocks tracked per size class, split on demand and coalesced
//! with their buddies on free. See [`mm::KernelHeap`] for the allocator
//! object and [`mm::kalloc`]/[`mm::kfree`] for the global surface.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod logger;
pub mod mm;

pub use mm::{
    heap_stats, init_kernel_heap, kalloc, kcalloc, kfree, krealloc, log_heap_stats,
    GlobalKernelAllocator, HeapStats, KernelHeap, PageSource, ARENA_MAGIC, CLASS_COUNT,
    CLASS_SIZES, KERNEL_HEAP, PGSIZE, POISON_BYTE,
};

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::Fatal, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::Trace, $($arg)*);
    }};
}
