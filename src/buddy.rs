//! A page allocator with size-classed free lists and boundary-tag coalescing.
//!
//! The allocator owns one contiguous arena of [`PAGE_SIZE`](crate::PAGE_SIZE)-byte pages and
//! hands out contiguous runs of pages. Free runs are kept on sixteen lists,
//! bucketed by `floor(log2(size))`; the last bucket holds every run of
//! `2^15` pages or more.
//!
//! Free-run bookkeeping lives inside the free pages themselves: the first
//! page of a free run holds its size, bucket and list links, and the last
//! page repeats its size. A boundary bitmap marks the first and last page of
//! every free run, so a released range can find its free neighbours in
//! constant time by testing the bits just outside it. A second bitmap marks
//! every free page, and a release touching any of them aborts.
//!
//! ## Performance
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case                |
//! |--------------------------|-----------|---------------------------|
//! | Allocate                 | O(1)      | O(runs in the last bucket)|
//! | Release                  | O(1)      | O(1)                      |
//!
//! Most allocations touch only list heads; only requests of `2^15` pages or
//! more scan a list. Both operations also update the free-page bitmap, one
//! `u64` per 64 pages of the runs involved.
//!
//! #### Fragmentation
//!
//! Runs are carved from the front of a free run and the remainder is
//! reinserted, so no space is lost to rounding. Adjacent free runs are always
//! coalesced on release; two free runs are never physically adjacent.

use log::{debug, trace};

use crate::{
    base::BasePtr,
    bitmap::Bitmap,
    config::MemoryConfig,
    resource::{ResourceLimit, ResourceLimits},
    AllocInitError, RecordTypeId,
};

/// The number of free-list buckets.
pub const NUM_BUCKETS: usize = 16;

const LAST_BUCKET: usize = NUM_BUCKETS - 1;

const FREE_RUN_MAGIC: u32 = 0xF4EE_2B1D;

/// A run of contiguous pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageRun {
    /// The first page of the run.
    pub start: u32,
    /// The number of pages in the run.
    pub count: u32,
}

impl PageRun {
    /// Returns one past the last page of the run.
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.count
    }
}

/// Free-run record stored at the start of the first page of a free run.
///
/// The last page of a run longer than one page holds only the `magic` and
/// `size` prefix.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct FreeRun {
    magic: u32,
    size: u32,
    bucket: u32,
    prev: Option<u32>,
    next: Option<u32>,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct RunTail {
    magic: u32,
    size: u32,
}

#[inline]
fn bucket_of(size: u32) -> usize {
    debug_assert!(size > 0);

    (size.ilog2() as usize).min(LAST_BUCKET)
}

#[inline]
fn ceil_log2(n: u32) -> usize {
    match n {
        0 | 1 => 0,
        n => (u32::BITS - (n - 1).leading_zeros()) as usize,
    }
}

/// A page allocator over one contiguous arena.
///
/// ```
/// use slot_pool::BuddyPageAllocator;
///
/// let mut pages = BuddyPageAllocator::try_with_pages(64).unwrap();
///
/// let a = pages.alloc(10, 10).unwrap();
/// let b = pages.alloc(20, 20).unwrap();
/// assert_eq!(pages.free_pages(), 34);
///
/// pages.release(a.start, a.count);
/// pages.release(b.start, b.count);
///
/// // The released runs have coalesced with the rest of the arena.
/// assert_eq!(pages.alloc(64, 64).unwrap().count, 64);
/// ```
#[derive(Debug)]
pub struct BuddyPageAllocator {
    base: BasePtr,
    free_pages: u32,
    buckets: [Option<u32>; NUM_BUCKETS],
    boundaries: Bitmap,
    free_map: Bitmap,
    resources: ResourceLimits,
}

impl BuddyPageAllocator {
    /// Constructs an allocator over a fresh arena described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `config` fails
    /// [`validate`](MemoryConfig::validate), or
    /// [`AllocInitError::AllocFailed`] if the arena cannot be allocated.
    pub fn try_new(config: &MemoryConfig) -> Result<BuddyPageAllocator, AllocInitError> {
        config.validate()?;

        let base = BasePtr::alloc_zeroed(config.num_pages)?;

        let mut pages = BuddyPageAllocator {
            base,
            free_pages: 0,
            buckets: [None; NUM_BUCKETS],
            boundaries: Bitmap::new(config.num_pages as usize),
            free_map: Bitmap::new(config.num_pages as usize),
            resources: ResourceLimits::new(config.resource_limits),
        };

        pages.insert_free_run(0, config.num_pages);

        debug!(
            "page arena of {} pages at {:p}",
            config.num_pages,
            base.ptr()
        );

        Ok(pages)
    }

    /// Constructs an allocator of `num_pages` pages with no quotas.
    ///
    /// # Errors
    ///
    /// See [`try_new`](Self::try_new).
    pub fn try_with_pages(num_pages: u32) -> Result<BuddyPageAllocator, AllocInitError> {
        Self::try_new(&MemoryConfig::new(num_pages))
    }

    /// Returns the number of pages in the arena.
    #[inline]
    pub fn num_pages(&self) -> u32 {
        self.base.num_pages()
    }

    /// Returns the number of unallocated pages.
    #[inline]
    pub fn free_pages(&self) -> u32 {
        self.free_pages
    }

    /// Returns the quota and usage of resource group `group`.
    ///
    /// # Panics
    ///
    /// Panics if `group` is not a valid resource group.
    pub fn resource_limit(&self, group: u32) -> ResourceLimit {
        *self.resources.get(group)
    }

    #[inline]
    pub(crate) fn base(&self) -> BasePtr {
        self.base
    }

    fn read_run(&self, page: u32) -> FreeRun {
        // SAFETY: page pointers are page-aligned and in bounds, and every free
        // run's first page holds a `FreeRun` written by `insert_free_run`.
        let run = unsafe { self.base.page_ptr(page).cast::<FreeRun>().as_ptr().read() };
        assert_eq!(run.magic, FREE_RUN_MAGIC, "free run at page {page} is corrupt");

        run
    }

    fn write_run(&mut self, page: u32, run: FreeRun) {
        // SAFETY: the page is in bounds, aligned and owned by the allocator.
        unsafe { self.base.page_ptr(page).cast::<FreeRun>().as_ptr().write(run) };
    }

    /// Reads the size of the free run whose last page is `page`.
    fn read_tail(&self, page: u32) -> u32 {
        // SAFETY: `RunTail` is a prefix of `FreeRun`, so this is valid both
        // for the tail page of a longer run and the sole page of a
        // single-page run.
        let tail = unsafe { self.base.page_ptr(page).cast::<RunTail>().as_ptr().read() };
        assert_eq!(tail.magic, FREE_RUN_MAGIC, "free run ending at page {page} is corrupt");

        tail.size
    }

    fn write_tail(&mut self, page: u32, tail: RunTail) {
        // SAFETY: the page is in bounds, aligned and owned by the allocator.
        unsafe { self.base.page_ptr(page).cast::<RunTail>().as_ptr().write(tail) };
    }

    /// Links a free run into its bucket and marks its boundaries.
    fn insert_free_run(&mut self, start: u32, size: u32) {
        let bucket = bucket_of(size);
        let old_head = self.buckets[bucket];

        self.write_run(
            start,
            FreeRun {
                magic: FREE_RUN_MAGIC,
                size,
                bucket: bucket as u32,
                prev: None,
                next: old_head,
            },
        );

        if let Some(h) = old_head {
            let mut head = self.read_run(h);
            head.prev = Some(start);
            self.write_run(h, head);
        }

        self.buckets[bucket] = Some(start);

        let last = start + size - 1;
        if size > 1 {
            self.write_tail(
                last,
                RunTail {
                    magic: FREE_RUN_MAGIC,
                    size,
                },
            );
        }

        self.boundaries.set(start as usize, true);
        self.boundaries.set(last as usize, true);
        self.free_map.set_range(start as usize..(last + 1) as usize, true);
        self.free_pages += size;
    }

    /// Unlinks the free run starting at `start` and returns its size.
    fn remove_free_run(&mut self, start: u32) -> u32 {
        let run = self.read_run(start);

        match run.prev {
            Some(p) => {
                let mut prev = self.read_run(p);
                prev.next = run.next;
                self.write_run(p, prev);
            }

            None => self.buckets[run.bucket as usize] = run.next,
        }

        if let Some(n) = run.next {
            let mut next = self.read_run(n);
            next.prev = run.prev;
            self.write_run(n, next);
        }

        let last = start + run.size - 1;
        self.boundaries.set(start as usize, false);
        self.boundaries.set(last as usize, false);
        self.free_map.set_range(start as usize..(last + 1) as usize, false);

        // Scrub the markers so a stale read is caught.
        self.write_tail(start, RunTail { magic: 0, size: 0 });
        if run.size > 1 {
            self.write_tail(last, RunTail { magic: 0, size: 0 });
        }

        self.free_pages -= run.size;
        run.size
    }

    /// Removes up to `wanted` pages from the front of the free run at `start`.
    fn take(&mut self, start: u32, wanted: u32) -> PageRun {
        let size = self.remove_free_run(start);
        let count = size.min(wanted);

        if size > count {
            trace!("split free run {start}+{size} at {count}");
            self.insert_free_run(start + count, size - count);
        }

        PageRun { start, count }
    }

    /// Allocates a run of between `min` and `wanted` contiguous pages.
    ///
    /// A run of the full `wanted` pages is preferred. If none is available,
    /// the head of each smaller bucket is tried, from bucket
    /// `ceil(log2(wanted))` down to bucket `floor(log2(min))`, and the first
    /// head of at least `min` pages is returned. Runs behind a bucket's head
    /// are not examined, so a short enough run may be missed. A `min` of zero
    /// is treated as one.
    ///
    /// Returns `None` if no run of at least `min` pages is free.
    ///
    /// # Panics
    ///
    /// Panics if `wanted` is zero.
    pub fn alloc(&mut self, wanted: u32, min: u32) -> Option<PageRun> {
        assert!(wanted > 0, "zero-page allocation");
        let min = min.clamp(1, wanted);

        let exact = ceil_log2(wanted).min(LAST_BUCKET);

        // Any run in bucket `ceil(log2(wanted))` or above covers the full
        // request, except in the last bucket, which is unbounded.
        for bucket in exact..LAST_BUCKET {
            if let Some(head) = self.buckets[bucket] {
                return Some(self.take(head, wanted));
            }
        }

        let mut cursor = self.buckets[LAST_BUCKET];
        while let Some(page) = cursor {
            let run = self.read_run(page);
            if run.size >= wanted {
                return Some(self.take(page, wanted));
            }

            cursor = run.next;
        }

        for bucket in (bucket_of(min)..=exact).rev() {
            if let Some(head) = self.buckets[bucket] {
                if self.read_run(head).size >= min {
                    return Some(self.take(head, wanted));
                }
            }
        }

        trace!("no run of {min}..={wanted} pages ({} free)", self.free_pages);
        None
    }

    /// Returns a run of pages to the arena, coalescing it with any adjacent
    /// free runs.
    ///
    /// # Panics
    ///
    /// Panics if the run is empty, extends past the arena, or contains a page
    /// that is already free.
    pub fn release(&mut self, start: u32, count: u32) {
        assert!(count > 0, "zero-page release");

        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.num_pages())
            .unwrap_or_else(|| panic!("release of {start}+{count} outside arena"));
        assert!(
            !self.free_map.any_in(start as usize..end as usize),
            "double release of pages {start}+{count}"
        );

        let mut first = start;
        let mut size = count;

        if start > 0 && self.boundaries.get(start as usize - 1) {
            let prev_size = self.read_tail(start - 1);
            let prev_start = start - prev_size;
            self.remove_free_run(prev_start);

            trace!("coalesce {prev_start}+{prev_size} with {start}+{count}");
            first = prev_start;
            size += prev_size;
        }

        if end < self.num_pages() && self.boundaries.get(end as usize) {
            let next_size = self.remove_free_run(end);

            trace!("coalesce {first}+{size} with {end}+{next_size}");
            size += next_size;
        }

        self.insert_free_run(first, size);
    }

    /// Allocates between `min` and `wanted` pages on behalf of `type_id`,
    /// charging them to its resource group.
    ///
    /// Returns `None` if the group's quota or the arena cannot supply `min`
    /// pages.
    pub fn alloc_pages(&mut self, type_id: RecordTypeId, wanted: u32, min: u32) -> Option<PageRun> {
        let group = type_id.resource_group();
        let min = min.clamp(1, wanted.max(1));

        let granted = self.resources.grant(group, wanted, self.free_pages);
        if granted < min {
            debug!(
                "refused {min}..={wanted} pages to {type_id}: group {group} may take {granted}"
            );
            return None;
        }

        let run = self.alloc(granted, min)?;
        self.resources.charge(group, run.count);

        trace!("{type_id} acquired pages {}+{}", run.start, run.count);
        Some(run)
    }

    /// Returns pages allocated by [`alloc_pages`](Self::alloc_pages).
    pub fn release_pages(&mut self, type_id: RecordTypeId, run: PageRun) {
        self.release(run.start, run.count);
        self.resources.credit(type_id.resource_group(), run.count);

        trace!("{type_id} returned pages {}+{}", run.start, run.count);
    }

    /// Allocates a single page on behalf of `type_id`.
    pub fn alloc_page(&mut self, type_id: RecordTypeId) -> Option<u32> {
        self.alloc_pages(type_id, 1, 1).map(|run| run.start)
    }

    /// Returns a single page allocated by [`alloc_page`](Self::alloc_page).
    pub fn release_page(&mut self, type_id: RecordTypeId, page: u32) {
        self.release_pages(
            type_id,
            PageRun {
                start: page,
                count: 1,
            },
        );
    }

    /// Walks every free list and checks that the bookkeeping is consistent.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut total = 0;
        let mut runs = Vec::new();

        for (bucket, head) in self.buckets.iter().enumerate() {
            let mut prev = None;
            let mut cursor = *head;

            while let Some(page) = cursor {
                let run = self.read_run(page);
                assert_eq!(run.bucket as usize, bucket);
                assert_eq!(bucket_of(run.size), bucket);
                assert_eq!(run.prev, prev);
                assert!(self.boundaries.get(page as usize));
                assert!(self.boundaries.get((page + run.size - 1) as usize));
                assert_eq!(self.read_tail(page + run.size - 1), run.size);

                total += run.size;
                runs.push((page, run.size));
                prev = Some(page);
                cursor = run.next;
            }
        }

        assert_eq!(total, self.free_pages);

        runs.sort_unstable();
        for pair in runs.windows(2) {
            let (a, a_size) = pair[0];
            let (b, _) = pair[1];
            assert!(a + a_size < b, "free runs at {a} and {b} not coalesced");
        }

        assert_eq!(self.free_map.count_ones(), self.free_pages as usize);

        let bits = self.boundaries.count_ones();
        let expected: usize = runs.iter().map(|&(_, s)| if s == 1 { 1 } else { 2 }).sum();
        assert_eq!(bits, expected);
    }
}

impl Drop for BuddyPageAllocator {
    fn drop(&mut self) {
        // SAFETY: the arena was allocated by `BasePtr::alloc_zeroed`, and no
        // page pointer outlives the allocator that issued it.
        unsafe { self.base.dealloc() };
    }
}
