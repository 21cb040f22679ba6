//! The interface shared by every slot pool.

use core::{fmt, marker::PhantomData, ptr::NonNull};

use crate::{
    list::{DList, DoubleLinked, FifoHead, ListHead, ListStore, Tailed},
    slot::{self, Ptr, Slot},
    Corruption, PageContext, Record,
};

/// A pool of fixed-size slots holding records of type `T`.
///
/// Every operation takes the [`PageContext`] the pool draws its pages from;
/// a pool must always be used with the same context.
pub trait SlotPool<T: Record> {
    /// Moves `value` into a free slot and returns a handle to it.
    ///
    /// Returns `None`, handing `value` back to nobody, if the pool is at
    /// capacity or no page can be obtained.
    fn seize<C: PageContext>(&mut self, ctx: &mut C, value: T) -> Option<Ptr<T>>;

    /// Moves the record out of the slot named by `ptr` and frees the slot.
    ///
    /// A stale or corrupted handle is passed to the context's abort hook.
    fn release<C: PageContext>(&mut self, ctx: &mut C, ptr: Ptr<T>) -> T;

    /// Returns the slot named by `index`, or `None` if the index does not name
    /// a slot of this pool.
    fn locate<C: PageContext>(&self, ctx: &C, index: u32) -> Option<NonNull<Slot<T>>>;

    /// Returns a handle for `index`.
    ///
    /// The handle carries the slot's current generation; whether a record is
    /// live there is checked when the handle is used.
    fn get_ptr<C: PageContext>(&self, ctx: &C, index: u32) -> Ptr<T> {
        let Some(p) = self.locate(ctx, index) else {
            ctx.handle_abort(&Corruption::OutOfRange {
                index,
                type_id: T::TYPE_ID,
            });
        };

        // SAFETY: `locate` only returns slots inside the context's region.
        let generation = unsafe { slot::generation_of(p) };
        Ptr::new(index, generation, p)
    }

    /// Returns a handle for `index` if it names a live record of this pool.
    fn get_valid_ptr<C: PageContext>(&self, ctx: &C, index: u32) -> Option<Ptr<T>> {
        let p = self.locate(ctx, index)?;

        // SAFETY: `locate` only returns slots inside the context's region.
        let (magic, generation) = unsafe { (slot::magic_of(p), slot::generation_of(p)) };
        (magic == T::TYPE_ID.tag()).then(|| Ptr::new(index, generation, p))
    }

    /// Checks that `ptr` still names the record it was issued for, aborting
    /// through `ctx` otherwise.
    ///
    /// The slot address is resolved again from the handle's index; a handle
    /// whose cached address disagrees is treated as out of range.
    fn check_live<C: PageContext>(&self, ctx: &C, ptr: &Ptr<T>) {
        match self.locate(ctx, ptr.index()) {
            // SAFETY: the cached address is the one this pool resolves the
            // index to in `ctx`.
            Some(p) if p == ptr.slot() => unsafe { slot::check_tag(ctx, ptr) },
            _ => ctx.handle_abort(&Corruption::OutOfRange {
                index: ptr.index(),
                type_id: T::TYPE_ID,
            }),
        }
    }

    /// Returns the record named by `ptr`.
    fn get<'a, C: PageContext>(&'a self, ctx: &'a C, ptr: &Ptr<T>) -> &'a T {
        self.check_live(ctx, ptr);

        // SAFETY: the slot is live, and the shared borrow of the pool keeps
        // it from being released or mutated.
        unsafe { slot::live_ref(ptr.slot()) }
    }

    /// Returns the record named by `ptr` mutably.
    fn get_mut<'a, C: PageContext>(&'a mut self, ctx: &'a C, ptr: &Ptr<T>) -> &'a mut T {
        self.check_live(ctx, ptr);

        // SAFETY: the slot is live, and the exclusive borrow of the pool keeps
        // any other reference to it from being created.
        unsafe { slot::live_mut(ptr.slot()) }
    }
}

/// The live records of a pool, addressable as a [`ListStore`].
///
/// Lets records that carry their own link fields be strung on intrusive lists
/// by index.
#[derive(Debug)]
pub struct PoolRecords<'a, T, P, C> {
    pool: &'a mut P,
    ctx: &'a C,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T: Record, P: SlotPool<T>, C: PageContext> PoolRecords<'a, T, P, C> {
    /// Borrows the records of `pool`.
    pub fn new(pool: &'a mut P, ctx: &'a C) -> PoolRecords<'a, T, P, C> {
        PoolRecords {
            pool,
            ctx,
            _record: PhantomData,
        }
    }
}

impl<T: Record, P: SlotPool<T>, C: PageContext> ListStore for PoolRecords<'_, T, P, C> {
    type Item = T;

    fn item(&self, index: u32) -> &T {
        let ptr = self.pool.get_ptr(self.ctx, index);
        self.pool.get(self.ctx, &ptr)
    }

    fn item_mut(&mut self, index: u32) -> &mut T {
        let ptr = self.pool.get_ptr(self.ctx, index);
        self.pool.get_mut(self.ctx, &ptr)
    }
}

/// A doubly linked list of records bound to the pool they live in.
///
/// Records join the list as they are seized and leave it as they are
/// released, so the list never names a free slot.
pub struct LocalList<Role, H = FifoHead> {
    list: DList<Role, H>,
}

impl<Role, H: ListHead> fmt::Debug for LocalList<Role, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalList").field("list", &self.list).finish()
    }
}

impl<Role, H: ListHead> Default for LocalList<Role, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Role, H: ListHead> LocalList<Role, H> {
    /// Returns an empty list.
    pub fn new() -> Self {
        LocalList { list: DList::new() }
    }

    /// Returns the underlying list head.
    pub fn list(&self) -> &DList<Role, H> {
        &self.list
    }

    /// Returns `true` if the list has no records.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Seizes a record and links it at the front.
    pub fn seize_front<T, P, C>(&mut self, pool: &mut P, ctx: &mut C, value: T) -> Option<Ptr<T>>
    where
        T: Record + DoubleLinked<Role>,
        P: SlotPool<T>,
        C: PageContext,
    {
        let ptr = pool.seize(ctx, value)?;
        self.list
            .push_front(&mut PoolRecords::new(pool, &*ctx), ptr.index());
        Some(ptr)
    }

    /// Unlinks the front record and releases it.
    pub fn release_front<T, P, C>(&mut self, pool: &mut P, ctx: &mut C) -> Option<T>
    where
        T: Record + DoubleLinked<Role>,
        P: SlotPool<T>,
        C: PageContext,
    {
        let index = self.list.pop_front(&mut PoolRecords::new(pool, &*ctx))?;
        let ptr = pool.get_ptr(ctx, index);
        Some(pool.release(ctx, ptr))
    }

    /// Unlinks the record named by `ptr`, which must be on this list, and
    /// releases it.
    pub fn release<T, P, C>(&mut self, pool: &mut P, ctx: &mut C, ptr: Ptr<T>) -> T
    where
        T: Record + DoubleLinked<Role>,
        P: SlotPool<T>,
        C: PageContext,
    {
        pool.check_live(&*ctx, &ptr);
        self.list
            .remove(&mut PoolRecords::new(pool, &*ctx), ptr.index());
        pool.release(ctx, ptr)
    }

    /// Releases every record on the list and returns how many there were.
    pub fn release_all<T, P, C>(&mut self, pool: &mut P, ctx: &mut C) -> usize
    where
        T: Record + DoubleLinked<Role>,
        P: SlotPool<T>,
        C: PageContext,
    {
        let mut released = 0;
        while self.release_front(pool, ctx).is_some() {
            released += 1;
        }

        released
    }
}

impl<Role, H: Tailed> LocalList<Role, H> {
    /// Seizes a record and links it at the back.
    pub fn seize_back<T, P, C>(&mut self, pool: &mut P, ctx: &mut C, value: T) -> Option<Ptr<T>>
    where
        T: Record + DoubleLinked<Role>,
        P: SlotPool<T>,
        C: PageContext,
    {
        let ptr = pool.seize(ctx, value)?;
        self.list
            .push_back(&mut PoolRecords::new(pool, &*ctx), ptr.index());
        Some(ptr)
    }
}
