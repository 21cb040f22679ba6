//! Recycling slot pool.
//!
//! A `FixedPagePool` serves records from one *current* page: first from the
//! page's own list of freed slots, then by bumping into never-used slots.
//! When the current page is exhausted it switches to a page from the stack of
//! partially free pages, and only when that stack is empty does it ask the
//! context for a fresh page.
//!
//! A slot released on a page other than the current one goes onto that page's
//! free list, and the page is pushed onto the partially free stack. A
//! non-current page whose last record is released is returned to the context
//! immediately.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation                | Best-case | Worst-case |
//! |--------------------------|-----------|------------|
//! | Seize                    | O(1)      | O(1)       |
//! | Release                  | O(1)      | O(1)       |
//!
//! Freed slots are reused LIFO within a page; there is no ordering among
//! pages beyond the stack.

use core::{marker::PhantomData, ptr::NonNull};

use log::trace;

use crate::{
    join_index,
    list::{DlList, Link, SlList},
    slot::{self, FreeList, Generations, Ptr, RawStore, Slot},
    split_index, AllocInitError, PageContext, Record, SlotLayout, SlotPool,
};

/// Header at the start of every page of a [`FixedPagePool`].
#[repr(C)]
#[derive(Debug)]
struct FixedPage {
    type_id: u32,
    ref_count: u32,
    bump: u32,
    on_partial: bool,
    free: SlList<FreeList>,
    partial: Link,
}

enum PartialPages {}

crate::impl_links!(FixedPage, PartialPages, partial);

/// A recycling pool of `T` records.
///
/// Dropping the pool does not return its pages; release every record first.
#[derive(Debug)]
pub struct FixedPagePool<T> {
    layout: SlotLayout,
    current: Option<u32>,
    partial: DlList<PartialPages>,
    pages: u32,
    generations: Generations,
    _records: PhantomData<T>,
}

impl<T: Record> FixedPagePool<T> {
    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if a `T` does not fit on a
    /// page.
    pub fn new() -> Result<FixedPagePool<T>, AllocInitError> {
        Ok(FixedPagePool {
            layout: SlotLayout::for_page::<T, FixedPage>()?,
            current: None,
            partial: DlList::new(),
            pages: 0,
            generations: Generations::default(),
            _records: PhantomData,
        })
    }

    /// Returns the slot geometry of the pool.
    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    /// Returns the number of pages the pool holds.
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Returns the number of pages on the partially free stack.
    pub fn partial_pages<C: PageContext>(&self, ctx: &C) -> usize {
        // SAFETY: every page on the stack is held by this pool and has a
        // header.
        let store = unsafe { RawStore::new(|page| header_ptr(ctx, page)) };
        self.partial.iter(&store).count()
    }

    /// Returns the number of live records on the current page.
    pub fn current_page_records<C: PageContext>(&self, ctx: &C) -> u32 {
        self.current
            // SAFETY: the current page is held by this pool.
            .map(|page| unsafe { (*header_ptr(ctx, page).as_ptr()).ref_count })
            .unwrap_or(0)
    }

    /// Finds a free slot, acquiring a page if necessary, and returns its index
    /// and whether it has never been formatted.
    fn find_slot<C: PageContext>(&mut self, ctx: &mut C) -> Option<(u32, bool)> {
        let layout = self.layout;

        loop {
            if let Some(page) = self.current {
                let hp = header_ptr(ctx, page);

                // SAFETY: the current page is held by this pool; the header is
                // disjoint from every slot.
                let mut free = unsafe { (*hp.as_ptr()).free };
                if !free.is_empty() {
                    let c: &C = ctx;
                    let mut slots = unsafe { RawStore::new(|i| slot_ptr::<T, C>(c, &layout, i)) };
                    let index = free.pop_front(&mut slots)?;

                    unsafe {
                        let h = &mut *hp.as_ptr();
                        h.free = free;
                        h.ref_count += 1;
                    }

                    return Some((index, false));
                }

                let h = unsafe { &mut *hp.as_ptr() };
                if h.bump < layout.slots_per_page {
                    let slot_no = h.bump;
                    h.bump += 1;
                    h.ref_count += 1;

                    return Some((join_index(page, slot_no), true));
                }
            }

            if let Some(page) = self.pop_partial(ctx) {
                trace!("{}: page {page} from partial stack", T::TYPE_ID);
                self.current = Some(page);
                continue;
            }

            let page = ctx.alloc_page(T::TYPE_ID)?;
            trace!("{}: acquired page {page}", T::TYPE_ID);

            // SAFETY: the page was just handed to this pool.
            unsafe {
                header_ptr(ctx, page).as_ptr().write(FixedPage {
                    type_id: T::TYPE_ID.get(),
                    ref_count: 0,
                    bump: 0,
                    on_partial: false,
                    free: SlList::new(),
                    partial: Link::default(),
                })
            };

            self.pages += 1;
            self.current = Some(page);
        }
    }

    fn pop_partial<C: PageContext>(&mut self, ctx: &C) -> Option<u32> {
        // SAFETY: every page on the stack is held by this pool.
        let mut store = unsafe { RawStore::new(|page| header_ptr(ctx, page)) };
        let page = self.partial.pop_front(&mut store)?;

        unsafe { (*header_ptr(ctx, page).as_ptr()).on_partial = false };
        Some(page)
    }
}

#[inline]
fn header_ptr<C: PageContext + ?Sized>(ctx: &C, page: u32) -> NonNull<FixedPage> {
    ctx.page_ptr(page).cast()
}

#[inline]
fn slot_ptr<T, C: PageContext + ?Sized>(ctx: &C, layout: &SlotLayout, index: u32) -> NonNull<Slot<T>> {
    let (page, slot_no) = split_index(index);
    slot::slot_in_page(ctx, layout, page, slot_no)
}

impl<T: Record> SlotPool<T> for FixedPagePool<T> {
    fn seize<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>> {
        let (index, fresh) = self.find_slot(ctx)?;
        let p = slot_ptr::<T, C>(ctx, &self.layout, index);

        let generation = self.generations.next();
        // SAFETY: `find_slot` returned a slot that is free and unlinked.
        unsafe {
            if fresh {
                slot::occupy_fresh(p, generation, value);
            } else {
                slot::occupy(p, generation, value);
            }
        }

        Some(Ptr::new(index, generation, p))
    }

    fn release<C: PageContext>(&mut self, ctx: &mut C, ptr: Ptr<T>) -> T {
        self.check_live(&*ctx, &ptr);

        let index = ptr.index();
        let (page, _) = split_index(index);
        let layout = self.layout;

        // SAFETY: the handle is live, so the slot belongs to a page of this
        // pool and nothing else refers to it.
        let value = unsafe { slot::vacate(ptr.slot()) };

        let hp = header_ptr(ctx, page);
        let (ref_count, on_partial) = {
            let c: &C = ctx;
            let mut slots = unsafe { RawStore::new(|i| slot_ptr::<T, C>(c, &layout, i)) };

            unsafe {
                let mut free = (*hp.as_ptr()).free;
                free.push_front(&mut slots, index);

                let h = &mut *hp.as_ptr();
                h.free = free;
                h.ref_count -= 1;
                (h.ref_count, h.on_partial)
            }
        };

        if self.current == Some(page) {
            return value;
        }

        if ref_count == 0 {
            if on_partial {
                let c: &C = ctx;
                let mut store = unsafe { RawStore::new(|page| header_ptr(c, page)) };
                self.partial.remove(&mut store, page);
            }

            unsafe { (*hp.as_ptr()).type_id = 0 };
            ctx.release_page(T::TYPE_ID, page);
            self.pages -= 1;

            trace!("{}: returned empty page {page}", T::TYPE_ID);
        } else if !on_partial {
            let c: &C = ctx;
            let mut store = unsafe { RawStore::new(|page| header_ptr(c, page)) };
            self.partial.push_front(&mut store, page);

            unsafe { (*hp.as_ptr()).on_partial = true };
        }

        value
    }

    fn locate<C: PageContext>(&self, ctx: &C, index: u32) -> Option<NonNull<Slot<T>>> {
        let (page, slot_no) = split_index(index);
        if page >= ctx.num_pages() || slot_no >= self.layout.slots_per_page {
            return None;
        }

        let hp = header_ptr(ctx, page);

        // SAFETY: the page is inside the region; the bump cursor is only read
        // once the type id shows the page belongs to a pool of `T`.
        unsafe {
            if core::ptr::addr_of!((*hp.as_ptr()).type_id).read() != T::TYPE_ID.get()
                || slot_no >= core::ptr::addr_of!((*hp.as_ptr()).bump).read()
            {
                return None;
            }
        }

        Some(slot_ptr(ctx, &self.layout, index))
    }
}
