//! Fixed-capacity slot pool.
//!
//! A `StaticPool` claims one contiguous run of pages when it is created and
//! keeps it for its whole life. Slots are numbered densely from zero and laid
//! out back to back across the run.
//!
//! Linking every slot onto the free list at creation would cost time
//! proportional to the capacity, so slots are formatted lazily instead:
//! [`StaticPool::startup`] formats one page's worth of slots per call, and
//! [`seize`](SlotPool::seize) formats the next unformatted slot itself when the
//! free list runs dry before start-up has finished.

use core::{marker::PhantomData, ptr::NonNull};

use log::{debug, trace};

use crate::{
    buddy::PageRun,
    list::{CountedFifoHead, SList},
    slot::{self, FreeList, Generations, Ptr, RawStore, Slot},
    AllocInitError, PageContext, Record, SlotLayout, SlotPool, PAGE_SIZE,
};

/// A pool of at most `capacity` records of `T`.
#[derive(Debug)]
pub struct StaticPool<T> {
    run: PageRun,
    slot_size: usize,
    capacity: u32,
    formatted: u32,
    free: SList<FreeList, CountedFifoHead>,
    generations: Generations,
    _records: PhantomData<T>,
}

impl<T: Record> StaticPool<T> {
    /// Creates a pool with room for exactly `capacity` records, taking the
    /// pages it needs from `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `capacity` is zero, or
    /// [`AllocInitError::OutOfPages`] if the page run cannot be obtained.
    pub fn init<C: PageContext>(ctx: &mut C, capacity: u32) -> Result<StaticPool<T>, AllocInitError> {
        if capacity == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        let slot_size = SlotLayout::slot_size::<T>();
        let bytes = capacity as u64 * slot_size as u64;
        let wanted = u32::try_from(bytes.div_ceil(PAGE_SIZE as u64))
            .map_err(|_| AllocInitError::InvalidConfig)?;

        let run = ctx
            .alloc_pages(T::TYPE_ID, wanted, wanted)
            .ok_or(AllocInitError::OutOfPages { wanted })?;

        debug!(
            "{}: static pool of {capacity} slots on pages {}+{}",
            T::TYPE_ID,
            run.start,
            run.count
        );

        Ok(StaticPool {
            run,
            slot_size,
            capacity,
            formatted: 0,
            free: SList::new(),
            generations: Generations::default(),
            _records: PhantomData,
        })
    }

    /// Returns the number of records the pool can hold.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the number of records that can currently be seized.
    #[inline]
    pub fn free_count(&self) -> u32 {
        self.free.count() + (self.capacity - self.formatted)
    }

    /// Returns `true` if every slot holds a record.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_count() == 0
    }

    /// Returns the page run backing the pool.
    pub fn pages(&self) -> PageRun {
        self.run
    }

    /// Returns `true` once every slot has been formatted.
    pub fn is_started(&self) -> bool {
        self.formatted == self.capacity
    }

    /// Formats up to one page's worth of slots and links them onto the free
    /// list.
    ///
    /// Returns `false` if there was nothing left to format.
    pub fn startup<C: PageContext>(&mut self, ctx: &C) -> bool {
        if self.is_started() {
            return false;
        }

        let batch = (PAGE_SIZE / self.slot_size).max(1) as u32;
        let end = self.formatted.saturating_add(batch).min(self.capacity);

        let (start, slot_size) = (self.run.start, self.slot_size);
        // SAFETY: every index below `end` is a slot of this pool, formatted
        // just before it is linked.
        let mut store = unsafe { RawStore::new(|i| slot_ptr::<T, C>(ctx, start, slot_size, i)) };

        for index in self.formatted..end {
            unsafe { slot::format_free(slot_ptr::<T, C>(ctx, start, slot_size, index)) };
            self.free.push_back(&mut store, index);
        }

        trace!("{}: formatted slots {}..{end}", T::TYPE_ID, self.formatted);
        self.formatted = end;
        true
    }

    /// Returns the pool's pages to `ctx`.
    ///
    /// Any records still in the pool are leaked.
    pub fn release_all_pages<C: PageContext>(self, ctx: &mut C) {
        ctx.release_pages(T::TYPE_ID, self.run);
    }
}

#[inline]
fn slot_ptr<T, C: PageContext + ?Sized>(
    ctx: &C,
    start: u32,
    slot_size: usize,
    index: u32,
) -> NonNull<Slot<T>> {
    // SAFETY: dense slots lie within the pool's page run.
    unsafe { ctx.page_ptr(start).add(index as usize * slot_size).cast() }
}

impl<T: Record> SlotPool<T> for StaticPool<T> {
    fn seize<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>> {
        let (start, slot_size) = (self.run.start, self.slot_size);
        let c: &C = ctx;

        // SAFETY: free-list entries are formatted slots of this pool.
        let mut store = unsafe { RawStore::new(|i| slot_ptr::<T, C>(c, start, slot_size, i)) };

        if let Some(index) = self.free.pop_front(&mut store) {
            let p = slot_ptr(c, start, slot_size, index);

            let generation = self.generations.next();
            // SAFETY: the slot was just unlinked from the free list.
            unsafe { slot::occupy(p, generation, value) };
            return Some(Ptr::new(index, generation, p));
        }

        if self.formatted < self.capacity {
            let index = self.formatted;
            self.formatted += 1;

            let p = slot_ptr(c, start, slot_size, index);
            let generation = self.generations.next();
            // SAFETY: the slot has never been formatted.
            unsafe { slot::occupy_fresh(p, generation, value) };
            return Some(Ptr::new(index, generation, p));
        }

        None
    }

    fn release<C: PageContext>(&mut self, ctx: &mut C, ptr: Ptr<T>) -> T {
        self.check_live(&*ctx, &ptr);

        // SAFETY: the handle is live, so nothing else refers to the slot.
        let value = unsafe { slot::vacate(ptr.slot()) };

        let (start, slot_size) = (self.run.start, self.slot_size);
        let c: &C = ctx;
        let mut store = unsafe { RawStore::new(|i| slot_ptr::<T, C>(c, start, slot_size, i)) };
        self.free.push_front(&mut store, ptr.index());

        value
    }

    fn locate<C: PageContext>(&self, ctx: &C, index: u32) -> Option<NonNull<Slot<T>>> {
        (index < self.formatted).then(|| slot_ptr(ctx, self.run.start, self.slot_size, index))
    }
}
