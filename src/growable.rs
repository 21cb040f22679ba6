//! Elastic slot pool over a [`GrowablePageMap`].
//!
//! A `GrowablePool` grows one page at a time and shrinks only from its top
//! logical page. Slot indices are `(logical_page << SLOT_BITS) | slot_no`, so a
//! record keeps its index no matter which physical page backs it.
//!
//! Free slots sit on one counted, two-ended free list. Seizing pops the head.
//! Releasing a slot on the top page queues it at the tail and any other slot
//! at the head, so reuse drifts toward low pages while the top page drains.
//! New pages are formatted one slot at a time, as seizes reach them.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                         | Best-case | Worst-case             |
//! |-----------------------------------|-----------|------------------------|
//! | Seize                             | O(1)      | O(1)                   |
//! | Release                           | O(1)      | O(1)                   |
//! | Shrink                            | O(1)      | O(slots per page)      |
//! | Rearrange and shrink              | O(1)      | O(slots per page × k)  |
//!
//! where k is the caller's shrink budget.

use core::{marker::PhantomData, ptr::NonNull};

use log::{debug, trace};

use crate::{
    join_index,
    list::{CountedFifoHead, DList},
    slot::{self, FreeList, Generations, Ptr, RawStore, Slot},
    split_index, AllocInitError, GrowablePageMap, PageContext, Record, SlotLayout, SlotPool,
    MAX_PAGES,
};

#[repr(C)]
#[derive(Debug)]
struct GrowablePage {
    use_count: u32,
    formatted: u32,
}

type FreeSlots = DList<FreeList, CountedFifoHead>;

/// An elastic pool of `T` records.
#[derive(Debug)]
pub struct GrowablePool<T> {
    layout: SlotLayout,
    map: GrowablePageMap,
    free: FreeSlots,
    generations: Generations,
    _records: PhantomData<T>,
}

#[inline]
fn header_ptr<C: PageContext + ?Sized>(ctx: &C, physical: u32) -> NonNull<GrowablePage> {
    ctx.page_ptr(physical).cast()
}

fn slot_at<T, C: PageContext>(
    map: &GrowablePageMap,
    ctx: &C,
    layout: &SlotLayout,
    index: u32,
) -> Option<NonNull<Slot<T>>> {
    let (logical, slot_no) = split_index(index);
    let physical = map.physical(ctx, logical)?;
    Some(slot::slot_in_page(ctx, layout, physical, slot_no))
}

/// Returns the free list's view of the pool's slots.
fn free_store<'a, T, C: PageContext>(
    map: &'a GrowablePageMap,
    ctx: &'a C,
    layout: SlotLayout,
) -> RawStore<Slot<T>, impl Fn(u32) -> NonNull<Slot<T>> + 'a> {
    let resolve = move |index| {
        slot_at(map, ctx, &layout, index).unwrap_or_else(|| {
            panic!("free list names slot {index} on an unmapped page")
        })
    };

    // SAFETY: only formatted free slots of mapped pages are ever linked.
    unsafe { RawStore::new(resolve) }
}

impl<T: Record> GrowablePool<T> {
    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if a `T` does not fit on a
    /// page.
    pub fn new() -> Result<GrowablePool<T>, AllocInitError> {
        Self::with_max_pages(MAX_PAGES)
    }

    /// Creates an empty pool that grows to at most `max_pages` pages.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_max_pages(max_pages: u32) -> Result<GrowablePool<T>, AllocInitError> {
        Ok(GrowablePool {
            layout: SlotLayout::for_page::<T, GrowablePage>()?,
            map: GrowablePageMap::with_max_pages(T::TYPE_ID, max_pages.min(MAX_PAGES)),
            free: FreeSlots::new(),
            generations: Generations::default(),
            _records: PhantomData,
        })
    }

    /// Returns the slot geometry of the pool.
    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    /// Returns the number of data pages the pool holds.
    pub fn pages(&self) -> u32 {
        self.map.len()
    }

    /// Returns the page map backing the pool.
    pub fn page_map(&self) -> &GrowablePageMap {
        &self.map
    }

    /// Returns the number of formatted slots on the free list.
    pub fn free_count(&self) -> u32 {
        self.free.count()
    }

    fn header<C: PageContext>(&self, ctx: &C, logical: u32) -> NonNull<GrowablePage> {
        match self.map.physical(ctx, logical) {
            Some(physical) => header_ptr(ctx, physical),
            None => panic!("logical page {logical} is not mapped"),
        }
    }

    /// Formats the next slot of the top page directly into `value`.
    fn seize_fresh<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>> {
        let top_has_room = self.map.top().is_some_and(|top| {
            // SAFETY: the top page is held by this pool.
            unsafe { (*self.header(ctx, top).as_ptr()).formatted < self.layout.slots_per_page }
        });

        let logical = match self.map.top() {
            Some(top) if top_has_room => top,
            _ => {
                let mapped = self.map.seize(ctx)?;

                // SAFETY: the page was just handed to this pool.
                unsafe {
                    header_ptr(ctx, mapped.physical).as_ptr().write(GrowablePage {
                        use_count: 0,
                        formatted: 0,
                    })
                };

                trace!(
                    "{}: grew to logical page {} at {}",
                    T::TYPE_ID,
                    mapped.logical,
                    mapped.physical
                );
                mapped.logical
            }
        };

        // SAFETY: the page is held by this pool.
        let slot_no = unsafe {
            let h = &mut *self.header(ctx, logical).as_ptr();
            h.formatted += 1;
            h.use_count += 1;
            h.formatted - 1
        };

        let index = join_index(logical, slot_no);
        let p = slot_at(&self.map, ctx, &self.layout, index)?;

        let generation = self.generations.next();
        // SAFETY: the slot has not been formatted since its page was mapped.
        unsafe { slot::occupy_fresh(p, generation, value) };
        Some(Ptr::new(index, generation, p))
    }

    /// Returns the top page to the context if no record lives on it.
    ///
    /// Returns `true` if a page was released.
    pub fn shrink<C: PageContext>(&mut self, ctx: &mut C) -> bool {
        let Some(top) = self.map.top() else {
            return false;
        };

        // SAFETY: the top page is held by this pool.
        let GrowablePage {
            use_count,
            formatted,
        } = unsafe { self.header(ctx, top).as_ptr().read() };

        if use_count != 0 {
            return false;
        }

        {
            let c: &C = ctx;
            let mut store = free_store::<T, C>(&self.map, c, self.layout);
            for slot_no in 0..formatted {
                self.free.remove(&mut store, join_index(top, slot_no));
            }
        }

        if let Err(e) = self.map.release(ctx, top) {
            panic!("{}: shrinking the top page failed: {e}", T::TYPE_ID);
        }

        trace!("{}: shrank logical page {top}", T::TYPE_ID);
        true
    }

    /// Moves free slots of the top page toward the tail of the free list,
    /// then releases up to `max_shrinks` empty top pages.
    ///
    /// At most two pages' worth of free slots are examined per call. Returns
    /// `true` if calling again might release more pages.
    pub fn rearrange_free_list_and_shrink<C: PageContext>(
        &mut self,
        ctx: &mut C,
        max_shrinks: u32,
    ) -> bool {
        let budget = 2 * self.layout.slots_per_page;
        let top = self.map.top();

        let covered = {
            let c: &C = ctx;
            let mut store = free_store::<T, C>(&self.map, c, self.layout);

            let mut low = FreeSlots::new();
            let mut high = FreeSlots::new();

            for _ in 0..budget {
                let Some(index) = self.free.pop_front(&mut store) else {
                    break;
                };

                if Some(split_index(index).0) == top {
                    high.push_back(&mut store, index);
                } else {
                    low.push_back(&mut store, index);
                }
            }

            let covered = self.free.is_empty();
            low.append(&mut store, &mut self.free);
            low.append(&mut store, &mut high);
            self.free = low;
            covered
        };

        let mut shrunk = 0;
        while shrunk < max_shrinks && self.shrink(ctx) {
            shrunk += 1;
        }

        let top_empty = shrunk == max_shrinks
            && self.map.top().is_some_and(|top| {
                // SAFETY: the top page is held by this pool.
                unsafe { (*self.header(ctx, top).as_ptr()).use_count == 0 }
            });

        let more = !covered || top_empty;
        debug!(
            "{}: released {shrunk} pages, {} remain, more: {more}",
            T::TYPE_ID,
            self.map.len()
        );

        more
    }
}

impl<T: Record> SlotPool<T> for GrowablePool<T> {
    fn seize<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>> {
        let popped = {
            let c: &C = ctx;
            let mut store = free_store::<T, C>(&self.map, c, self.layout);
            self.free.pop_front(&mut store)
        };

        let Some(index) = popped else {
            return self.seize_fresh(ctx, value);
        };

        let p = slot_at(&self.map, ctx, &self.layout, index)?;

        let generation = self.generations.next();
        // SAFETY: the slot was just unlinked from the free list, and its page
        // is held by this pool.
        unsafe {
            (*self.header(ctx, split_index(index).0).as_ptr()).use_count += 1;
            slot::occupy(p, generation, value);
        }

        Some(Ptr::new(index, generation, p))
    }

    fn release<C: PageContext>(&mut self, ctx: &mut C, ptr: Ptr<T>) -> T {
        self.check_live(&*ctx, &ptr);

        // SAFETY: the handle is live, so nothing else refers to the slot.
        let value = unsafe { slot::vacate(ptr.slot()) };

        let logical = split_index(ptr.index()).0;
        // SAFETY: a live record's page is held by this pool.
        unsafe { (*self.header(ctx, logical).as_ptr()).use_count -= 1 };

        let c: &C = ctx;
        let mut store = free_store::<T, C>(&self.map, c, self.layout);
        if self.map.top() == Some(logical) {
            self.free.push_back(&mut store, ptr.index());
        } else {
            self.free.push_front(&mut store, ptr.index());
        }

        value
    }

    fn locate<C: PageContext>(&self, ctx: &C, index: u32) -> Option<NonNull<Slot<T>>> {
        let (logical, slot_no) = split_index(index);
        let physical = self.map.physical(ctx, logical)?;

        // SAFETY: the page is held by this pool.
        let formatted = unsafe { (*header_ptr(ctx, physical).as_ptr()).formatted };
        (slot_no < formatted).then(|| slot::slot_in_page(ctx, &self.layout, physical, slot_no))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlatPageStore, RecordTypeId};

    #[derive(Debug)]
    struct Big([u64; 1000]);

    impl Record for Big {
        const TYPE_ID: RecordTypeId = RecordTypeId::new(8, 1);
    }

    fn big(n: u64) -> Big {
        Big([n; 1000])
    }

    #[test]
    fn reuses_freed_slots_before_growing() {
        let mut ctx = FlatPageStore::new(8).unwrap();
        let mut pool = GrowablePool::<Big>::new().unwrap();
        assert_eq!(pool.layout().slots_per_page, 4);

        let held: Vec<_> = (0..4).map(|i| pool.seize(&mut ctx, big(i)).unwrap()).collect();
        assert_eq!(pool.pages(), 1);

        let _ = pool.release(&mut ctx, held[2]);
        let _ = pool.release(&mut ctx, held[3]);

        let next = pool.seize(&mut ctx, big(9)).unwrap();
        assert!([2, 3].contains(&next.index()), "got slot {}", next.index());
        assert_eq!(pool.pages(), 1);
    }

    #[test]
    fn grows_one_page_at_a_time() {
        let mut ctx = FlatPageStore::new(8).unwrap();
        let mut pool = GrowablePool::<Big>::new().unwrap();

        let held: Vec<_> = (0..9).map(|i| pool.seize(&mut ctx, big(i)).unwrap()).collect();
        assert_eq!(pool.pages(), 3);
        assert_eq!(held[4].index(), join_index(1, 0));
        assert_eq!(held[8].index(), join_index(2, 0));

        for (i, p) in held.iter().enumerate() {
            assert_eq!(pool.get(&ctx, p).0[999], i as u64);
        }
    }

    #[test]
    fn shrink_only_releases_empty_top() {
        let mut ctx = FlatPageStore::new(8).unwrap();
        let mut pool = GrowablePool::<Big>::new().unwrap();

        let held: Vec<_> = (0..5).map(|i| pool.seize(&mut ctx, big(i)).unwrap()).collect();
        assert_eq!(pool.pages(), 2);
        assert!(!pool.shrink(&mut ctx));

        let _ = pool.release(&mut ctx, held[0]);
        assert!(!pool.shrink(&mut ctx));

        let _ = pool.release(&mut ctx, held[4]);
        assert!(pool.shrink(&mut ctx));
        assert_eq!(pool.pages(), 1);
        assert_eq!(pool.free_count(), 1);

        // Page zero still holds three records.
        assert!(!pool.shrink(&mut ctx));
        for p in &held[1..4] {
            let _ = pool.release(&mut ctx, *p);
        }
        assert!(pool.shrink(&mut ctx));
        assert_eq!(pool.pages(), 0);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(ctx.pages_in_use(), 0);
    }

    #[test]
    fn rearrange_surfaces_top_page() {
        let mut ctx = FlatPageStore::new(16).unwrap();
        let mut pool = GrowablePool::<Big>::new().unwrap();

        let held: Vec<_> = (0..12).map(|i| pool.seize(&mut ctx, big(i)).unwrap()).collect();
        assert_eq!(pool.pages(), 3);

        // Free the whole top page while it is not the top.
        let extra = pool.seize(&mut ctx, big(12)).unwrap();
        for p in &held[8..12] {
            let _ = pool.release(&mut ctx, *p);
        }
        let _ = pool.release(&mut ctx, extra);

        assert!(pool.shrink(&mut ctx));
        assert_eq!(pool.pages(), 3);

        // Cycle one slot of the new top page through the free list.
        let again = pool.seize(&mut ctx, big(13)).unwrap();
        let _ = pool.release(&mut ctx, again);

        assert!(!pool.rearrange_free_list_and_shrink(&mut ctx, 4));
        assert_eq!(pool.pages(), 2);
        assert_eq!(pool.free_count(), 0);

        for p in &held[..8] {
            let _ = pool.release(&mut ctx, *p);
        }
        assert!(pool.rearrange_free_list_and_shrink(&mut ctx, 1));
        assert_eq!(pool.pages(), 1);
        assert!(!pool.rearrange_free_list_and_shrink(&mut ctx, 1));
        assert_eq!(pool.pages(), 0);
        assert_eq!(ctx.pages_in_use(), 0);
    }

    #[test]
    #[should_panic(expected = "handle generation")]
    fn stale_handle_after_reuse() {
        let mut ctx = FlatPageStore::new(4).unwrap();
        let mut pool = GrowablePool::<Big>::new().unwrap();

        let a = pool.seize(&mut ctx, big(1)).unwrap();
        let _ = pool.release(&mut ctx, a);
        let b = pool.seize(&mut ctx, big(2)).unwrap();
        assert_eq!(a.index(), b.index());

        let _ = pool.get(&ctx, &a);
    }

    #[test]
    #[should_panic(expected = "handle generation")]
    fn stale_handle_after_shrink_and_regrow() {
        let mut ctx = FlatPageStore::new(4).unwrap();
        let mut pool = GrowablePool::<Big>::new().unwrap();

        let a = pool.seize(&mut ctx, big(1)).unwrap();
        let _ = pool.release(&mut ctx, a);
        let b = pool.seize(&mut ctx, big(2)).unwrap();
        let _ = pool.release(&mut ctx, b);
        assert!(pool.shrink(&mut ctx));

        // The regrown page is formatted afresh, but its slots never repeat a
        // generation handed out before.
        let c = pool.seize(&mut ctx, big(3)).unwrap();
        assert_eq!(c.index(), b.index());
        assert!(c.generation() > b.generation());
        assert_eq!(pool.get_valid_ptr(&ctx, b.index()), Some(c));

        let _ = pool.get(&ctx, &b);
    }
}
