//! Page provider seam between the heap and the physical page allocator.

use core::ptr::NonNull;

/// Supplier of `PGSIZE`-aligned pages backing the heap's arenas.
///
/// Implementations must be thread-safe (the heap calls them with no lock of
/// its own held) and must not allocate from the heap they back: the heap is
/// not re-entrant through its page source. Returned pages become owned by the
/// heap until handed back through the release methods.
pub trait PageSource: Sync {
    /// Obtains one page, or `None` when no page is available.
    fn acquire_page(&self) -> Option<NonNull<u8>> {
        self.acquire_pages(1)
    }

    /// Obtains `count` contiguous pages, or `None` when no such run is
    /// available.
    fn acquire_pages(&self, count: usize) -> Option<NonNull<u8>>;

    /// Returns one page previously obtained from this source.
    ///
    /// # Safety
    /// `page` must have come from `acquire_page` (or a one-page
    /// `acquire_pages`) on this source and must not be used afterwards.
    unsafe fn release_page(&self, page: NonNull<u8>) {
        self.release_pages(page, 1);
    }

    /// Returns a run of `count` contiguous pages previously obtained from
    /// this source.
    ///
    /// # Safety
    /// `pages` and `count` must match an earlier `acquire_pages` call on this
    /// source, and the run must not be used afterwards.
    unsafe fn release_pages(&self, pages: NonNull<u8>, count: usize);
}
