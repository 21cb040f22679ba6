//! A fixed tier in front of an elastic one.
//!
//! A `LayeredPool` serves records from a [`StaticPool`] until it is full and
//! overflows into a [`GrowablePool`]. Both tiers share one index space: the
//! static tier owns `0..capacity` and growable indices are shifted up by
//! `capacity`, so releasing a record routes on its index alone.

use core::ptr::NonNull;

use log::debug;

use crate::{
    slot::{Ptr, Slot},
    AllocInitError, GrowablePool, PageContext, Record, SlotPool, StaticPool, SLOT_BITS,
};

/// A slot pool with a reserved capacity and elastic overflow.
///
/// ```
/// use slot_pool::{FlatPageStore, LayeredPool, Record, RecordTypeId, SlotPool};
///
/// struct Session(u64);
///
/// impl Record for Session {
///     const TYPE_ID: RecordTypeId = RecordTypeId::new(3, 0);
/// }
///
/// let mut ctx = FlatPageStore::new(8).unwrap();
/// let mut sessions = LayeredPool::<Session>::init(&mut ctx, 2).unwrap();
///
/// let a = sessions.seize(&mut ctx, Session(1)).unwrap();
/// let b = sessions.seize(&mut ctx, Session(2)).unwrap();
/// let c = sessions.seize(&mut ctx, Session(3)).unwrap();
/// assert_eq!((a.index(), b.index()), (0, 1));
/// assert!(c.index() >= 2);
///
/// assert_eq!(sessions.release(&mut ctx, c).0, 3);
/// ```
#[derive(Debug)]
pub struct LayeredPool<T> {
    fixed: StaticPool<T>,
    elastic: GrowablePool<T>,
}

impl<T: Record> LayeredPool<T> {
    /// Creates a pool whose static tier holds `capacity` records.
    ///
    /// # Errors
    ///
    /// Propagates [`StaticPool::init`] and [`GrowablePool::new`] errors.
    pub fn init<C: PageContext>(ctx: &mut C, capacity: u32) -> Result<LayeredPool<T>, AllocInitError> {
        // Shifted growable indices must still fit in a `u32`.
        let room = (1_u64 << u32::BITS) - u64::from(capacity);
        let max_pages = u32::try_from(room >> SLOT_BITS).unwrap_or(u32::MAX);
        let elastic = GrowablePool::with_max_pages(max_pages)?;

        let fixed = StaticPool::init(ctx, capacity)?;
        debug!(
            "{}: layered pool, {capacity} static slots, up to {} growable pages",
            T::TYPE_ID,
            elastic.page_map().max_pages()
        );

        Ok(LayeredPool { fixed, elastic })
    }

    /// Returns the static tier.
    pub fn static_tier(&self) -> &StaticPool<T> {
        &self.fixed
    }

    /// Returns the growable tier.
    pub fn growable_tier(&self) -> &GrowablePool<T> {
        &self.elastic
    }

    /// Returns the capacity of the static tier, which is also the first index
    /// of the growable tier.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.fixed.capacity()
    }

    /// Runs one step of static-tier start-up. See [`StaticPool::startup`].
    pub fn startup<C: PageContext>(&mut self, ctx: &C) -> bool {
        self.fixed.startup(ctx)
    }

    /// Shrinks the growable tier. See [`GrowablePool::shrink`].
    pub fn shrink<C: PageContext>(&mut self, ctx: &mut C) -> bool {
        self.elastic.shrink(ctx)
    }

    /// See [`GrowablePool::rearrange_free_list_and_shrink`].
    pub fn rearrange_free_list_and_shrink<C: PageContext>(
        &mut self,
        ctx: &mut C,
        max_shrinks: u32,
    ) -> bool {
        self.elastic.rearrange_free_list_and_shrink(ctx, max_shrinks)
    }

    /// Returns the static tier's pages and the growable tier's pages to `ctx`.
    ///
    /// Every growable record must have been released; static records still in
    /// the pool are leaked.
    pub fn release_all_pages<C: PageContext>(mut self, ctx: &mut C) {
        while self.elastic.shrink(ctx) {}
        assert_eq!(self.elastic.pages(), 0, "growable tier still holds records");

        self.fixed.release_all_pages(ctx);
    }
}

impl<T: Record> SlotPool<T> for LayeredPool<T> {
    fn seize<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>> {
        if !self.fixed.is_full() {
            return self.fixed.seize(ctx, value);
        }

        let ptr = self.elastic.seize(ctx, value)?;
        Some(ptr.with_index(ptr.index() + self.capacity()))
    }

    fn release<C: PageContext>(&mut self, ctx: &mut C, ptr: Ptr<T>) -> T {
        let capacity = self.capacity();
        match ptr.index().checked_sub(capacity) {
            None => self.fixed.release(ctx, ptr),
            Some(index) => self.elastic.release(ctx, ptr.with_index(index)),
        }
    }

    fn locate<C: PageContext>(&self, ctx: &C, index: u32) -> Option<NonNull<Slot<T>>> {
        match index.checked_sub(self.capacity()) {
            None => self.fixed.locate(ctx, index),
            Some(index) => self.elastic.locate(ctx, index),
        }
    }
}
