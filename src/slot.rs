//! Slots and the handles that name them.
//!
//! A slot is either free, in which case its body holds free-list links, or
//! occupied by exactly one record. The first word of every slot is its tag:
//! `!type_id` while a record is live and zero while the slot is free. The
//! second word is the generation stamped on the slot when its record was
//! seized. Each pool draws generations from one monotonic counter, so a handle
//! issued for an earlier occupant of a slot is recognized as stale even after
//! the slot, or the page it lives on, has been reused by a record of the same
//! type.

use core::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ptr::{self, NonNull},
};

use crate::{
    list::{DoubleLinked, ListStore, SingleLinked},
    Corruption, PageContext, Record, SlotLayout,
};

/// The storage of one record.
///
/// Pools never hand out `Slot` values; the type is public only so that slot
/// pointers can be named.
#[repr(C)]
pub struct Slot<T> {
    magic: u32,
    generation: u32,
    body: SlotBody<T>,
}

enum SlotBody<T> {
    Free(FreeLink),
    Occupied(T),
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("magic", &format_args!("{:#010x}", self.magic))
            .field("generation", &self.generation)
            .field("occupied", &matches!(self.body, SlotBody::Occupied(_)))
            .finish()
    }
}

/// Free-list links of a free slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FreeLink {
    pub next: Option<u32>,
    pub prev: Option<u32>,
}

/// List role of the free list threaded through free slots.
#[derive(Debug)]
pub enum FreeList {}

impl<T> Slot<T> {
    fn link(&self) -> &FreeLink {
        match &self.body {
            SlotBody::Free(link) => link,
            SlotBody::Occupied(_) => panic!("free-list link read from a live slot"),
        }
    }

    fn link_mut(&mut self) -> &mut FreeLink {
        match &mut self.body {
            SlotBody::Free(link) => link,
            SlotBody::Occupied(_) => panic!("free-list link written to a live slot"),
        }
    }
}

impl<T> SingleLinked<FreeList> for Slot<T> {
    #[inline]
    fn next(&self) -> Option<u32> {
        self.link().next
    }

    #[inline]
    fn set_next(&mut self, next: Option<u32>) {
        self.link_mut().next = next;
    }
}

impl<T> DoubleLinked<FreeList> for Slot<T> {
    #[inline]
    fn prev(&self) -> Option<u32> {
        self.link().prev
    }

    #[inline]
    fn set_prev(&mut self, prev: Option<u32>) {
        self.link_mut().prev = prev;
    }
}

/// Reads the tag word of the slot at `slot`.
///
/// # Safety
///
/// `slot` must be properly aligned and valid for reads of two `u32`s.
#[inline]
pub(crate) unsafe fn magic_of<T>(slot: NonNull<Slot<T>>) -> u32 {
    unsafe { ptr::addr_of!((*slot.as_ptr()).magic).read() }
}

/// Reads the generation of the slot at `slot`.
///
/// # Safety
///
/// See [`magic_of`].
#[inline]
pub(crate) unsafe fn generation_of<T>(slot: NonNull<Slot<T>>) -> u32 {
    unsafe { ptr::addr_of!((*slot.as_ptr()).generation).read() }
}

/// Issues the generations of one pool's slots.
#[derive(Debug, Default)]
pub(crate) struct Generations(u32);

impl Generations {
    /// Returns a generation no earlier call has returned, until the counter
    /// wraps.
    #[inline]
    pub fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
}

/// Writes a free slot.
///
/// # Safety
///
/// `slot` must be properly aligned, valid for writes of a `Slot<T>`, and must
/// not hold a live record.
#[inline]
pub(crate) unsafe fn format_free<T>(slot: NonNull<Slot<T>>) {
    unsafe {
        slot.as_ptr().write(Slot {
            magic: 0,
            generation: 0,
            body: SlotBody::Free(FreeLink::default()),
        })
    };
}

/// Moves `value` into a formatted free slot and tags it live under
/// `generation`.
///
/// # Safety
///
/// `slot` must point to a free slot written by [`format_free`] or
/// [`vacate`], and no reference to it may exist.
#[inline]
pub(crate) unsafe fn occupy<T: Record>(slot: NonNull<Slot<T>>, generation: u32, value: T) {
    let s = unsafe { &mut *slot.as_ptr() };
    debug_assert_eq!(s.magic, 0);

    // The free link is `Copy`, so nothing needs dropping.
    s.body = SlotBody::Occupied(value);
    s.magic = T::TYPE_ID.tag();
    s.generation = generation;
}

/// Moves `value` into a slot that has never been formatted.
///
/// # Safety
///
/// `slot` must be properly aligned, valid for writes of a `Slot<T>`, and hold
/// no live record.
#[inline]
pub(crate) unsafe fn occupy_fresh<T: Record>(slot: NonNull<Slot<T>>, generation: u32, value: T) {
    unsafe {
        slot.as_ptr().write(Slot {
            magic: T::TYPE_ID.tag(),
            generation,
            body: SlotBody::Occupied(value),
        })
    };
}

/// Moves the record out of a live slot, leaving it free and unlinked.
///
/// # Safety
///
/// `slot` must point to a live slot checked by [`SlotPool::check_live`], and
/// no reference to it may exist.
///
/// [`SlotPool::check_live`]: crate::SlotPool::check_live
pub(crate) unsafe fn vacate<T>(slot: NonNull<Slot<T>>) -> T {
    let s = unsafe { &mut *slot.as_ptr() };

    let body = mem::replace(&mut s.body, SlotBody::Free(FreeLink::default()));
    s.magic = 0;

    match body {
        SlotBody::Occupied(value) => value,
        SlotBody::Free(_) => panic!("vacated a free slot"),
    }
}

/// Checks the tag and generation of the slot `ptr` caches against the handle,
/// aborting through `ctx` on a mismatch.
///
/// # Safety
///
/// `ptr.p` must be the address the owning pool resolves `ptr.i` to in `ctx`.
pub(crate) unsafe fn check_tag<T: Record, C: PageContext + ?Sized>(ctx: &C, ptr: &Ptr<T>) {
    let (magic, generation) = unsafe { (magic_of(ptr.p), generation_of(ptr.p)) };
    let type_id = T::TYPE_ID;

    if magic != type_id.tag() {
        ctx.handle_abort(&Corruption::BadTag {
            index: ptr.i,
            type_id,
            expected: type_id.tag(),
            found: magic,
        });
    }

    if generation != ptr.generation {
        ctx.handle_abort(&Corruption::StaleHandle {
            index: ptr.i,
            type_id,
            expected: ptr.generation,
            found: generation,
        });
    }
}

/// Returns a reference to the record in a live slot.
///
/// # Safety
///
/// The slot must have passed [`check_tag`], and no mutable reference to it
/// may exist for `'a`.
#[inline]
pub(crate) unsafe fn live_ref<'a, T>(slot: NonNull<Slot<T>>) -> &'a T {
    match unsafe { &(*slot.as_ptr()).body } {
        SlotBody::Occupied(value) => value,
        SlotBody::Free(_) => panic!("live slot holds no record"),
    }
}

/// Returns a mutable reference to the record in a live slot.
///
/// # Safety
///
/// The slot must have passed [`check_tag`], and no other reference to it may
/// exist for `'a`.
#[inline]
pub(crate) unsafe fn live_mut<'a, T>(slot: NonNull<Slot<T>>) -> &'a mut T {
    match unsafe { &mut (*slot.as_ptr()).body } {
        SlotBody::Occupied(value) => value,
        SlotBody::Free(_) => panic!("live slot holds no record"),
    }
}

/// A handle to a live record.
///
/// Carries the record's index, which is its durable identity, the generation
/// of the slot when the record was seized, and a cached slot address.
pub struct Ptr<T> {
    i: u32,
    generation: u32,
    p: NonNull<Slot<T>>,
}

impl<T> Ptr<T> {
    #[inline]
    pub(crate) fn new(i: u32, generation: u32, p: NonNull<Slot<T>>) -> Ptr<T> {
        Ptr { i, generation, p }
    }

    /// Returns the same handle under a different index.
    #[inline]
    pub(crate) fn with_index(self, i: u32) -> Ptr<T> {
        Ptr { i, ..self }
    }

    #[inline]
    pub(crate) fn slot(&self) -> NonNull<Slot<T>> {
        self.p
    }

    /// Returns the index of the record.
    #[inline]
    pub fn index(&self) -> u32 {
        self.i
    }

    /// Returns the slot generation the handle was issued for.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        (self.i, self.generation) == (other.i, other.generation)
    }
}

impl<T> Eq for Ptr<T> {}

impl<T> Hash for Ptr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.i.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptr")
            .field("i", &self.i)
            .field("generation", &self.generation)
            .field("p", &self.p)
            .finish()
    }
}

/// Returns the address of slot `slot_no` on page `page`.
#[inline]
pub(crate) fn slot_in_page<T, C: PageContext + ?Sized>(
    ctx: &C,
    layout: &SlotLayout,
    page: u32,
    slot_no: u32,
) -> NonNull<Slot<T>> {
    debug_assert!(slot_no < layout.slots_per_page);

    // SAFETY: the slot lies within the page, which lies within the region.
    unsafe { ctx.page_ptr(page).add(layout.offset_of(slot_no)).cast() }
}

/// A [`ListStore`] that resolves indices to items through a function.
pub(crate) struct RawStore<I, F> {
    resolve: F,
    _item: PhantomData<fn() -> I>,
}

impl<I, F: Fn(u32) -> NonNull<I>> RawStore<I, F> {
    /// # Safety
    ///
    /// For every index the list operations touch, `resolve` must return a
    /// pointer to an initialized, properly aligned `I` that is not otherwise
    /// borrowed while the store is in use.
    pub unsafe fn new(resolve: F) -> RawStore<I, F> {
        RawStore {
            resolve,
            _item: PhantomData,
        }
    }
}

impl<I, F: Fn(u32) -> NonNull<I>> ListStore for RawStore<I, F> {
    type Item = I;

    #[inline]
    fn item(&self, index: u32) -> &I {
        // SAFETY: guaranteed by the contract of `RawStore::new`.
        unsafe { (self.resolve)(index).as_ref() }
    }

    #[inline]
    fn item_mut(&mut self, index: u32) -> &mut I {
        // SAFETY: guaranteed by the contract of `RawStore::new`.
        unsafe { (self.resolve)(index).as_mut() }
    }
}
