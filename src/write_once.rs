//! Write-once slot pool.
//!
//! Slots are bump-allocated within the current page and never individually
//! reused. A page is returned to the context once every slot seized on it has
//! been released, which suits records that are created and retired in
//! page-sized batches.

use core::{marker::PhantomData, ptr::NonNull};

use log::trace;

use crate::{
    join_index,
    slot::{self, Generations, Ptr, Slot},
    split_index, AllocInitError, PageContext, Record, SlotLayout, SlotPool,
};

#[repr(C)]
#[derive(Debug)]
struct WriteOncePage {
    type_id: u32,
    ref_count: u32,
    bump: u32,
}

/// A write-once pool of `T` records.
#[derive(Debug)]
pub struct WriteOncePool<T> {
    layout: SlotLayout,
    current: Option<u32>,
    pages: u32,
    generations: Generations,
    _records: PhantomData<T>,
}

#[inline]
fn header_ptr<C: PageContext + ?Sized>(ctx: &C, page: u32) -> NonNull<WriteOncePage> {
    ctx.page_ptr(page).cast()
}

impl<T: Record> WriteOncePool<T> {
    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if a `T` does not fit on a
    /// page.
    pub fn new() -> Result<WriteOncePool<T>, AllocInitError> {
        Ok(WriteOncePool {
            layout: SlotLayout::for_page::<T, WriteOncePage>()?,
            current: None,
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

    fn new_page<C: PageContext>(&mut self, ctx: &mut C) -> Option<u32> {
        let page = ctx.alloc_page(T::TYPE_ID)?;

        // SAFETY: the page was just handed to this pool.
        unsafe {
            header_ptr(ctx, page).as_ptr().write(WriteOncePage {
                type_id: T::TYPE_ID.get(),
                ref_count: 0,
                bump: 0,
            })
        };

        if let Some(old) = self.current.replace(page) {
            // An emptied current page starts over instead of being replaced.
            // SAFETY: the old current page is still held by this pool.
            debug_assert_ne!(unsafe { (*header_ptr(ctx, old).as_ptr()).ref_count }, 0);
        }

        self.pages += 1;
        trace!("{}: acquired page {page}", T::TYPE_ID);

        Some(page)
    }

    fn return_page<C: PageContext>(&mut self, ctx: &mut C, page: u32) {
        // SAFETY: the page is held by this pool.
        unsafe { (*header_ptr(ctx, page).as_ptr()).type_id = 0 };
        ctx.release_page(T::TYPE_ID, page);
        self.pages -= 1;

        trace!("{}: returned page {page}", T::TYPE_ID);
    }
}

impl<T: Record> SlotPool<T> for WriteOncePool<T> {
    fn seize<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>> {
        let has_room = self.current.is_some_and(|page| {
            // SAFETY: the current page is held by this pool.
            unsafe { (*header_ptr(ctx, page).as_ptr()).bump < self.layout.slots_per_page }
        });

        let page = match (has_room, self.current) {
            (true, Some(page)) => page,
            _ => self.new_page(ctx)?,
        };

        // SAFETY: as above.
        let slot_no = unsafe {
            let h = &mut *header_ptr(ctx, page).as_ptr();
            h.bump += 1;
            h.ref_count += 1;
            h.bump - 1
        };

        let index = join_index(page, slot_no);
        let p = slot::slot_in_page(ctx, &self.layout, page, slot_no);

        let generation = self.generations.next();
        // SAFETY: bumped slots hold no record until the page starts over.
        unsafe { slot::occupy_fresh(p, generation, value) };

        Some(Ptr::new(index, generation, p))
    }

    fn release<C: PageContext>(&mut self, ctx: &mut C, ptr: Ptr<T>) -> T {
        self.check_live(&*ctx, &ptr);

        // SAFETY: the handle is live, so nothing else refers to the slot.
        let value = unsafe { slot::vacate(ptr.slot()) };

        let (page, _) = split_index(ptr.index());
        let ref_count = unsafe {
            let h = &mut *header_ptr(ctx, page).as_ptr();
            h.ref_count -= 1;
            h.ref_count
        };

        if ref_count == 0 {
            if self.current == Some(page) {
                // Start the page over; handles into it are already stale.
                unsafe { (*header_ptr(ctx, page).as_ptr()).bump = 0 };
            } else {
                self.return_page(ctx, page);
            }
        }

        value
    }

    fn locate<C: PageContext>(&self, ctx: &C, index: u32) -> Option<NonNull<Slot<T>>> {
        let (page, slot_no) = split_index(index);
        if page >= ctx.num_pages() || slot_no >= self.layout.slots_per_page {
            return None;
        }

        let hp = header_ptr(ctx, page);

        // SAFETY: the page is inside the region.
        unsafe {
            if core::ptr::addr_of!((*hp.as_ptr()).type_id).read() != T::TYPE_ID.get()
                || slot_no >= core::ptr::addr_of!((*hp.as_ptr()).bump).read()
            {
                return None;
            }
        }

        Some(slot::slot_in_page(ctx, &self.layout, page, slot_no))
    }
}
