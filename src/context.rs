//! The seam through which pools obtain pages and report corruption.

use core::ptr::NonNull;
use std::collections::HashMap;

use log::error;

use crate::{
    base::BasePtr, buddy::PageRun, AllocInitError, BuddyPageAllocator, Corruption, RecordTypeId,
    PAGE_SIZE,
};

/// The capabilities a pool needs from its environment.
///
/// Every pool operation that may touch pages takes a `PageContext`. Pages are
/// named by their number within the context's region; a pool turns a page
/// number into an address with [`page_ptr`](Self::page_ptr).
pub trait PageContext {
    /// Allocates between `min` and `wanted` contiguous pages on behalf of
    /// `type_id`. Returns `None` if fewer than `min` pages can be supplied.
    fn alloc_pages(&mut self, type_id: RecordTypeId, wanted: u32, min: u32) -> Option<PageRun>;

    /// Returns pages obtained from [`alloc_pages`](Self::alloc_pages).
    fn release_pages(&mut self, type_id: RecordTypeId, run: PageRun);

    /// Allocates a single page on behalf of `type_id`.
    fn alloc_page(&mut self, type_id: RecordTypeId) -> Option<u32> {
        self.alloc_pages(type_id, 1, 1).map(|run| run.start)
    }

    /// Returns a single page obtained from [`alloc_page`](Self::alloc_page).
    fn release_page(&mut self, type_id: RecordTypeId, page: u32) {
        self.release_pages(
            type_id,
            PageRun {
                start: page,
                count: 1,
            },
        );
    }

    /// Returns the address of page zero.
    fn base(&self) -> NonNull<u8>;

    /// Returns the number of pages in the region.
    fn num_pages(&self) -> u32;

    /// Returns the address of page `page`.
    ///
    /// # Panics
    ///
    /// Panics if `page` is outside the region.
    fn page_ptr(&self, page: u32) -> NonNull<u8> {
        assert!(page < self.num_pages(), "page {page} outside region");

        // SAFETY: the page lies inside the region, so the offset is in bounds.
        unsafe { self.base().add(page as usize * PAGE_SIZE) }
    }

    /// Handles detected corruption. Does not return.
    fn handle_abort(&self, corruption: &Corruption) -> !;
}

/// A [`PageContext`] backed by a [`BuddyPageAllocator`].
///
/// Corruption is logged and the process is aborted.
#[derive(Debug)]
pub struct AllocContext<'a> {
    pages: &'a mut BuddyPageAllocator,
}

impl<'a> AllocContext<'a> {
    /// Wraps `pages`.
    pub fn new(pages: &'a mut BuddyPageAllocator) -> AllocContext<'a> {
        AllocContext { pages }
    }

    /// Returns the underlying page allocator.
    pub fn pages(&self) -> &BuddyPageAllocator {
        self.pages
    }
}

impl PageContext for AllocContext<'_> {
    fn alloc_pages(&mut self, type_id: RecordTypeId, wanted: u32, min: u32) -> Option<PageRun> {
        self.pages.alloc_pages(type_id, wanted, min)
    }

    fn release_pages(&mut self, type_id: RecordTypeId, run: PageRun) {
        self.pages.release_pages(type_id, run)
    }

    fn base(&self) -> NonNull<u8> {
        self.pages.base().ptr()
    }

    fn num_pages(&self) -> u32 {
        self.pages.num_pages()
    }

    fn page_ptr(&self, page: u32) -> NonNull<u8> {
        self.pages.base().page_ptr(page)
    }

    fn handle_abort(&self, corruption: &Corruption) -> ! {
        error!("slot corruption: {corruption}");
        std::process::abort()
    }
}

/// A simple page store for exercising pools in isolation.
///
/// Pages are handed out first-fit from one zeroed region with no quotas and
/// no coalescing structure. An optional limit caps the number of pages in use.
/// Corruption panics instead of aborting, so it can be observed by tests.
#[derive(Debug)]
pub struct FlatPageStore {
    base: BasePtr,
    used: Vec<bool>,
    in_use: u32,
    limit: Option<u32>,
    by_type: HashMap<RecordTypeId, u32>,
}

impl FlatPageStore {
    /// Creates a store of `num_pages` pages.
    ///
    /// # Errors
    ///
    /// See [`BasePtr::alloc_zeroed`].
    pub fn new(num_pages: u32) -> Result<FlatPageStore, AllocInitError> {
        Ok(FlatPageStore {
            base: BasePtr::alloc_zeroed(num_pages)?,
            used: vec![false; num_pages as usize],
            in_use: 0,
            limit: None,
            by_type: HashMap::new(),
        })
    }

    /// Caps the number of pages that may be in use at once.
    pub fn with_page_limit(mut self, limit: u32) -> FlatPageStore {
        self.limit = Some(limit);
        self
    }

    /// Returns the number of pages in use.
    pub fn pages_in_use(&self) -> u32 {
        self.in_use
    }

    /// Returns the number of pages in use on behalf of `type_id`.
    pub fn pages_in_use_by(&self, type_id: RecordTypeId) -> u32 {
        self.by_type.get(&type_id).copied().unwrap_or(0)
    }

    /// Finds the first free run of at least `len` pages.
    fn find_run(&self, len: u32) -> Option<(u32, u32)> {
        let mut start = 0;
        while start < self.used.len() {
            if self.used[start] {
                start += 1;
                continue;
            }

            let run_len = self.used[start..].iter().take_while(|&&u| !u).count();
            if run_len >= len as usize {
                return Some((start as u32, run_len as u32));
            }

            start += run_len;
        }

        None
    }
}

impl PageContext for FlatPageStore {
    fn alloc_pages(&mut self, type_id: RecordTypeId, wanted: u32, min: u32) -> Option<PageRun> {
        let min = min.clamp(1, wanted.max(1));
        let allowed = match self.limit {
            Some(limit) => limit.saturating_sub(self.in_use).min(wanted),
            None => wanted,
        };

        if allowed < min {
            return None;
        }

        let (start, len) = self.find_run(allowed).or_else(|| self.find_run(min))?;
        let count = len.min(allowed);

        for used in &mut self.used[start as usize..(start + count) as usize] {
            *used = true;
        }

        self.in_use += count;
        *self.by_type.entry(type_id).or_default() += count;

        Some(PageRun { start, count })
    }

    fn release_pages(&mut self, type_id: RecordTypeId, run: PageRun) {
        for page in run.start..run.end() {
            let used = &mut self.used[page as usize];
            assert!(*used, "double release of page {page}");
            *used = false;
        }

        self.in_use -= run.count;

        let by_type = self
            .by_type
            .get_mut(&type_id)
            .filter(|n| **n >= run.count)
            .unwrap_or_else(|| panic!("{type_id} released pages it does not hold"));
        *by_type -= run.count;
    }

    fn base(&self) -> NonNull<u8> {
        self.base.ptr()
    }

    fn num_pages(&self) -> u32 {
        self.base.num_pages()
    }

    fn handle_abort(&self, corruption: &Corruption) -> ! {
        panic!("slot corruption: {corruption}");
    }
}

impl Drop for FlatPageStore {
    fn drop(&mut self) {
        // SAFETY: the region was allocated by `BasePtr::alloc_zeroed`.
        unsafe { self.base.dealloc() };
    }
}
