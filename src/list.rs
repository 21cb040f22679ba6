//! Intrusive linked lists over indexed storage.
//!
//! Elements are named by `u32` indices and their link fields live inside the
//! elements themselves. A list value holds only its head; every operation
//! takes the [`ListStore`] that resolves indices to elements.
//!
//! Lists vary along three independent axes:
//!
//! - linkage: [`SList`] (singly linked) or [`DList`] (doubly linked);
//! - head: first-only, or first and last (a *tailed*, FIFO-capable list);
//! - counting: whether the head keeps an O(1) element count.
//!
//! The head type picks the last two:
//!
//! | Head               | Tailed | Counted |
//! |--------------------|--------|---------|
//! | [`FirstHead`]      |        |         |
//! | [`FifoHead`]       | ✓      |         |
//! | [`CountedHead`]    |        | ✓       |
//! | [`CountedFifoHead`]| ✓      | ✓       |
//!
//! Which fields form the links is decided per *role*: an element type
//! implements [`SingleLinked<Role>`] (and [`DoubleLinked<Role>`]) once for each
//! list it can be a member of, so one element can sit on several unrelated
//! lists at once. [`impl_links!`](crate::impl_links) writes these impls for a
//! [`Link`] field.
//!
//! ```
//! use slot_pool::{impl_links, list::{DlcFifoList, Link}};
//!
//! #[derive(Default)]
//! struct Job {
//!     queue: Link,
//! }
//!
//! enum RunQueue {}
//!
//! impl_links!(Job, RunQueue, queue);
//!
//! let mut jobs: Vec<Job> = (0..4).map(|_| Job::default()).collect();
//! let mut queue = DlcFifoList::<RunQueue>::new();
//!
//! queue.push_back(&mut jobs, 2);
//! queue.push_back(&mut jobs, 0);
//! queue.push_front(&mut jobs, 3);
//! queue.remove(&mut jobs, 0);
//!
//! assert_eq!(queue.iter(&jobs).collect::<Vec<_>>(), [3, 2]);
//! assert_eq!(queue.count(), 2);
//! ```

use core::{fmt, marker::PhantomData};

/// Access to the forward link of an element in lists of role `Role`.
pub trait SingleLinked<Role> {
    /// Returns the index of the next element.
    fn next(&self) -> Option<u32>;
    /// Sets the index of the next element.
    fn set_next(&mut self, next: Option<u32>);
}

/// Access to both links of an element in lists of role `Role`.
pub trait DoubleLinked<Role>: SingleLinked<Role> {
    /// Returns the index of the previous element.
    fn prev(&self) -> Option<u32>;
    /// Sets the index of the previous element.
    fn set_prev(&mut self, prev: Option<u32>);
}

/// Storage that resolves element indices.
pub trait ListStore {
    /// The element type.
    type Item;

    /// Returns the element at `index`.
    fn item(&self, index: u32) -> &Self::Item;

    /// Returns the element at `index` mutably.
    fn item_mut(&mut self, index: u32) -> &mut Self::Item;
}

impl<T> ListStore for [T] {
    type Item = T;

    #[inline]
    fn item(&self, index: u32) -> &T {
        &self[index as usize]
    }

    #[inline]
    fn item_mut(&mut self, index: u32) -> &mut T {
        &mut self[index as usize]
    }
}

impl<T> ListStore for Vec<T> {
    type Item = T;

    #[inline]
    fn item(&self, index: u32) -> &T {
        &self[index as usize]
    }

    #[inline]
    fn item_mut(&mut self, index: u32) -> &mut T {
        &mut self[index as usize]
    }
}

/// A pair of link fields that can be embedded in an element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Link {
    /// The next element.
    pub next: Option<u32>,
    /// The previous element. Unused by singly linked lists.
    pub prev: Option<u32>,
}

/// Implements [`SingleLinked`] and [`DoubleLinked`] for a role using a
/// [`Link`] field.
///
/// `impl_links!(Type, Role, field)` links elements of `Type` through
/// `self.field` in lists of role `Role`.
///
/// [`SingleLinked`]: crate::list::SingleLinked
/// [`DoubleLinked`]: crate::list::DoubleLinked
/// [`Link`]: crate::list::Link
#[macro_export]
macro_rules! impl_links {
    ($ty:ty, $role:ty, $field:ident) => {
        impl $crate::list::SingleLinked<$role> for $ty {
            #[inline]
            fn next(&self) -> ::core::option::Option<u32> {
                self.$field.next
            }

            #[inline]
            fn set_next(&mut self, next: ::core::option::Option<u32>) {
                self.$field.next = next;
            }
        }

        impl $crate::list::DoubleLinked<$role> for $ty {
            #[inline]
            fn prev(&self) -> ::core::option::Option<u32> {
                self.$field.prev
            }

            #[inline]
            fn set_prev(&mut self, prev: ::core::option::Option<u32>) {
                self.$field.prev = prev;
            }
        }
    };
}

/// The head of a list.
pub trait ListHead: Copy + Default + fmt::Debug {
    /// Returns the first element.
    fn first(&self) -> Option<u32>;
    /// Sets the first element.
    fn set_first(&mut self, first: Option<u32>);

    /// Returns the last element, if the head tracks it.
    #[inline]
    fn last(&self) -> Option<u32> {
        None
    }

    /// Sets the last element, if the head tracks it.
    #[inline]
    fn set_last(&mut self, _last: Option<u32>) {}

    /// Returns the element count, if the head tracks it.
    #[inline]
    fn count(&self) -> u32 {
        0
    }

    /// Sets the element count, if the head tracks it.
    #[inline]
    fn set_count(&mut self, _count: u32) {}
}

/// A head that tracks the last element.
pub trait Tailed: ListHead {}

/// A head that tracks the element count.
pub trait Counted: ListHead {}

/// A head with only a first element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FirstHead {
    first: Option<u32>,
}

impl ListHead for FirstHead {
    #[inline]
    fn first(&self) -> Option<u32> {
        self.first
    }

    #[inline]
    fn set_first(&mut self, first: Option<u32>) {
        self.first = first;
    }
}

/// A head with first and last elements.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FifoHead {
    first: Option<u32>,
    last: Option<u32>,
}

impl ListHead for FifoHead {
    #[inline]
    fn first(&self) -> Option<u32> {
        self.first
    }

    #[inline]
    fn set_first(&mut self, first: Option<u32>) {
        self.first = first;
    }

    #[inline]
    fn last(&self) -> Option<u32> {
        self.last
    }

    #[inline]
    fn set_last(&mut self, last: Option<u32>) {
        self.last = last;
    }
}

impl Tailed for FifoHead {}

/// A head with a first element and an element count.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CountedHead {
    first: Option<u32>,
    count: u32,
}

impl ListHead for CountedHead {
    #[inline]
    fn first(&self) -> Option<u32> {
        self.first
    }

    #[inline]
    fn set_first(&mut self, first: Option<u32>) {
        self.first = first;
    }

    #[inline]
    fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    fn set_count(&mut self, count: u32) {
        self.count = count;
    }
}

impl Counted for CountedHead {}

/// A head with first and last elements and an element count.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CountedFifoHead {
    first: Option<u32>,
    last: Option<u32>,
    count: u32,
}

impl ListHead for CountedFifoHead {
    #[inline]
    fn first(&self) -> Option<u32> {
        self.first
    }

    #[inline]
    fn set_first(&mut self, first: Option<u32>) {
        self.first = first;
    }

    #[inline]
    fn last(&self) -> Option<u32> {
        self.last
    }

    #[inline]
    fn set_last(&mut self, last: Option<u32>) {
        self.last = last;
    }

    #[inline]
    fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    fn set_count(&mut self, count: u32) {
        self.count = count;
    }
}

impl Tailed for CountedFifoHead {}
impl Counted for CountedFifoHead {}

#[inline]
fn inc<H: ListHead>(head: &mut H) {
    head.set_count(head.count() + 1);
}

#[inline]
fn dec<H: ListHead>(head: &mut H) {
    head.set_count(head.count().saturating_sub(1));
}

/// An iterator over the indices of a list's elements.
pub struct Iter<'a, Role, S: ?Sized> {
    store: &'a S,
    cursor: Option<u32>,
    _role: PhantomData<fn() -> Role>,
}

impl<Role, S: ?Sized> fmt::Debug for Iter<'_, Role, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").field("cursor", &self.cursor).finish()
    }
}

impl<Role, S> Iterator for Iter<'_, Role, S>
where
    S: ListStore + ?Sized,
    S::Item: SingleLinked<Role>,
{
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let cur = self.cursor?;
        self.cursor = self.store.item(cur).next();
        Some(cur)
    }
}

/// A singly linked intrusive list.
pub struct SList<Role, H = FirstHead> {
    head: H,
    _role: PhantomData<fn() -> Role>,
}

/// A doubly linked intrusive list.
pub struct DList<Role, H = FirstHead> {
    head: H,
    _role: PhantomData<fn() -> Role>,
}

macro_rules! common_list_impls {
    ($list:ident) => {
        impl<Role, H: ListHead> $list<Role, H> {
            /// Returns an empty list.
            pub fn new() -> Self {
                $list {
                    head: H::default(),
                    _role: PhantomData,
                }
            }

            /// Returns `true` if the list has no elements.
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.head.first().is_none()
            }

            /// Returns the first element.
            #[inline]
            pub fn first(&self) -> Option<u32> {
                self.head.first()
            }

            /// Returns an iterator over the list's elements, front to back.
            pub fn iter<'a, S>(&self, store: &'a S) -> Iter<'a, Role, S>
            where
                S: ListStore + ?Sized,
                S::Item: SingleLinked<Role>,
            {
                Iter {
                    store,
                    cursor: self.head.first(),
                    _role: PhantomData,
                }
            }
        }

        impl<Role, H: Tailed> $list<Role, H> {
            /// Returns the last element.
            #[inline]
            pub fn last(&self) -> Option<u32> {
                self.head.last()
            }
        }

        impl<Role, H: Counted> $list<Role, H> {
            /// Returns the number of elements.
            #[inline]
            pub fn count(&self) -> u32 {
                self.head.count()
            }
        }

        impl<Role, H: ListHead> Default for $list<Role, H> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<Role, H: ListHead> Clone for $list<Role, H> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<Role, H: ListHead> Copy for $list<Role, H> {}

        impl<Role, H: ListHead> fmt::Debug for $list<Role, H> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($list))
                    .field("head", &self.head)
                    .finish()
            }
        }
    };
}

common_list_impls!(SList);
common_list_impls!(DList);

impl<Role, H: ListHead> SList<Role, H> {
    /// Inserts `index` at the front of the list.
    pub fn push_front<S>(&mut self, store: &mut S, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: SingleLinked<Role>,
    {
        let old_first = self.head.first();
        store.item_mut(index).set_next(old_first);

        if old_first.is_none() {
            self.head.set_last(Some(index));
        }

        self.head.set_first(Some(index));
        inc(&mut self.head);
    }

    /// Removes and returns the first element.
    pub fn pop_front<S>(&mut self, store: &mut S) -> Option<u32>
    where
        S: ListStore + ?Sized,
        S::Item: SingleLinked<Role>,
    {
        let first = self.head.first()?;
        let item = store.item_mut(first);
        let next = item.next();
        item.set_next(None);

        self.head.set_first(next);
        if next.is_none() {
            self.head.set_last(None);
        }

        dec(&mut self.head);
        Some(first)
    }

    /// Inserts `index` immediately after the element `after`.
    pub fn insert_after<S>(&mut self, store: &mut S, after: u32, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: SingleLinked<Role>,
    {
        let next = store.item(after).next();
        store.item_mut(index).set_next(next);
        store.item_mut(after).set_next(Some(index));

        if next.is_none() {
            self.head.set_last(Some(index));
        }

        inc(&mut self.head);
    }
}

impl<Role, H: Tailed> SList<Role, H> {
    /// Inserts `index` at the back of the list.
    pub fn push_back<S>(&mut self, store: &mut S, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: SingleLinked<Role>,
    {
        store.item_mut(index).set_next(None);

        match self.head.last() {
            Some(last) => store.item_mut(last).set_next(Some(index)),
            None => self.head.set_first(Some(index)),
        }

        self.head.set_last(Some(index));
        inc(&mut self.head);
    }

    /// Moves every element of `other` to the back of `self`, leaving `other`
    /// empty.
    pub fn append<S>(&mut self, store: &mut S, other: &mut Self)
    where
        S: ListStore + ?Sized,
        S::Item: SingleLinked<Role>,
    {
        let Some(other_first) = other.head.first() else {
            return;
        };

        match self.head.last() {
            Some(last) => store.item_mut(last).set_next(Some(other_first)),
            None => self.head.set_first(Some(other_first)),
        }

        self.head.set_last(other.head.last());
        self.head
            .set_count(self.head.count() + other.head.count());
        *other = Self::new();
    }
}

impl<Role, H: ListHead> DList<Role, H> {
    /// Inserts `index` at the front of the list.
    pub fn push_front<S>(&mut self, store: &mut S, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let old_first = self.head.first();

        let item = store.item_mut(index);
        item.set_prev(None);
        item.set_next(old_first);

        match old_first {
            Some(f) => store.item_mut(f).set_prev(Some(index)),
            None => self.head.set_last(Some(index)),
        }

        self.head.set_first(Some(index));
        inc(&mut self.head);
    }

    /// Removes and returns the first element.
    pub fn pop_front<S>(&mut self, store: &mut S) -> Option<u32>
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let first = self.head.first()?;
        self.remove(store, first);
        Some(first)
    }

    /// Unlinks `index`, which must be an element of this list.
    pub fn remove<S>(&mut self, store: &mut S, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let item = store.item_mut(index);
        let prev = item.prev();
        let next = item.next();
        item.set_prev(None);
        item.set_next(None);

        match prev {
            Some(p) => store.item_mut(p).set_next(next),
            None => {
                debug_assert_eq!(self.head.first(), Some(index));
                self.head.set_first(next);
            }
        }

        match next {
            Some(n) => store.item_mut(n).set_prev(prev),
            None => self.head.set_last(prev),
        }

        dec(&mut self.head);
    }

    /// Inserts `index` immediately before the element `before`.
    pub fn insert_before<S>(&mut self, store: &mut S, before: u32, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let prev = store.item(before).prev();

        let item = store.item_mut(index);
        item.set_prev(prev);
        item.set_next(Some(before));
        store.item_mut(before).set_prev(Some(index));

        match prev {
            Some(p) => store.item_mut(p).set_next(Some(index)),
            None => self.head.set_first(Some(index)),
        }

        inc(&mut self.head);
    }

    /// Inserts `index` immediately after the element `after`.
    pub fn insert_after<S>(&mut self, store: &mut S, after: u32, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let next = store.item(after).next();

        let item = store.item_mut(index);
        item.set_prev(Some(after));
        item.set_next(next);
        store.item_mut(after).set_next(Some(index));

        match next {
            Some(n) => store.item_mut(n).set_prev(Some(index)),
            None => self.head.set_last(Some(index)),
        }

        inc(&mut self.head);
    }
}

impl<Role, H: Tailed> DList<Role, H> {
    /// Inserts `index` at the back of the list.
    pub fn push_back<S>(&mut self, store: &mut S, index: u32)
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let old_last = self.head.last();

        let item = store.item_mut(index);
        item.set_prev(old_last);
        item.set_next(None);

        match old_last {
            Some(l) => store.item_mut(l).set_next(Some(index)),
            None => self.head.set_first(Some(index)),
        }

        self.head.set_last(Some(index));
        inc(&mut self.head);
    }

    /// Removes and returns the last element.
    pub fn pop_back<S>(&mut self, store: &mut S) -> Option<u32>
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let last = self.head.last()?;
        self.remove(store, last);
        Some(last)
    }

    /// Moves every element of `other` to the back of `self`, leaving `other`
    /// empty.
    pub fn append<S>(&mut self, store: &mut S, other: &mut Self)
    where
        S: ListStore + ?Sized,
        S::Item: DoubleLinked<Role>,
    {
        let Some(other_first) = other.head.first() else {
            return;
        };

        let last = self.head.last();
        store.item_mut(other_first).set_prev(last);

        match last {
            Some(l) => store.item_mut(l).set_next(Some(other_first)),
            None => self.head.set_first(Some(other_first)),
        }

        self.head.set_last(other.head.last());
        self.head
            .set_count(self.head.count() + other.head.count());
        *other = Self::new();
    }
}

/// Singly linked list with a first-only head.
pub type SlList<Role> = SList<Role, FirstHead>;
/// Singly linked list with first and last.
pub type SlFifoList<Role> = SList<Role, FifoHead>;
/// Counted singly linked list.
pub type SlcList<Role> = SList<Role, CountedHead>;
/// Counted singly linked list with first and last.
pub type SlcFifoList<Role> = SList<Role, CountedFifoHead>;
/// Doubly linked list with a first-only head.
pub type DlList<Role> = DList<Role, FirstHead>;
/// Doubly linked list with first and last.
pub type DlFifoList<Role> = DList<Role, FifoHead>;
/// Counted doubly linked list.
pub type DlcList<Role> = DList<Role, CountedHead>;
/// Counted doubly linked list with first and last.
pub type DlcFifoList<Role> = DList<Role, CountedFifoHead>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug)]
    struct Node {
        a: Link,
        b: Link,
    }

    enum RoleA {}
    enum RoleB {}

    crate::impl_links!(Node, RoleA, a);
    crate::impl_links!(Node, RoleB, b);

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|_| Node::default()).collect()
    }

    fn collect<Role, H: ListHead>(list: &DList<Role, H>, store: &Vec<Node>) -> Vec<u32>
    where
        Node: SingleLinked<Role>,
    {
        list.iter(store).collect()
    }

    #[test]
    fn slist_stack() {
        let mut store = nodes(5);
        let mut list = SlList::<RoleA>::new();

        for i in 0..4 {
            list.push_front(&mut store, i);
        }
        list.insert_after(&mut store, 2, 4);

        assert_eq!(list.iter(&store).collect::<Vec<_>>(), [3, 2, 4, 1, 0]);
        assert_eq!(list.pop_front(&mut store), Some(3));
        assert_eq!(list.first(), Some(2));
    }

    #[test]
    fn slist_fifo_append() {
        let mut store = nodes(6);
        let mut a = SlcFifoList::<RoleA>::new();
        let mut b = SlcFifoList::<RoleA>::new();

        a.push_back(&mut store, 0);
        a.push_back(&mut store, 1);
        b.push_back(&mut store, 4);
        b.push_front(&mut store, 5);

        a.append(&mut store, &mut b);
        assert!(b.is_empty());
        assert_eq!(b.count(), 0);
        assert_eq!(a.count(), 4);
        assert_eq!(a.last(), Some(4));
        assert_eq!(a.iter(&store).collect::<Vec<_>>(), [0, 1, 5, 4]);

        a.push_back(&mut store, 2);
        assert_eq!(a.iter(&store).count() as u32, a.count());
    }

    #[test]
    fn dlist_insert_remove() {
        let mut store = nodes(5);
        let mut list = DlcFifoList::<RoleA>::new();

        list.push_back(&mut store, 1);
        list.push_back(&mut store, 3);
        list.insert_before(&mut store, 3, 2);
        list.insert_after(&mut store, 3, 4);
        list.push_front(&mut store, 0);
        assert_eq!(collect(&list, &store), [0, 1, 2, 3, 4]);
        assert_eq!(list.count(), 5);

        list.remove(&mut store, 2);
        list.remove(&mut store, 0);
        assert_eq!(list.pop_back(&mut store), Some(4));
        assert_eq!(collect(&list, &store), [1, 3]);
        assert_eq!(list.last(), Some(3));
        assert_eq!(store[3].a.prev, Some(1));
        assert_eq!(list.count(), 2);

        list.remove(&mut store, 3);
        list.remove(&mut store, 1);
        assert!(list.is_empty());
        assert_eq!(list.last(), None);
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn dlist_append() {
        let mut store = nodes(4);
        let mut a = DlcFifoList::<RoleA>::new();
        let mut b = DlcFifoList::<RoleA>::new();

        b.push_back(&mut store, 2);
        b.push_back(&mut store, 3);
        a.append(&mut store, &mut b);
        assert_eq!(collect(&a, &store), [2, 3]);

        b.push_back(&mut store, 0);
        b.push_back(&mut store, 1);
        a.append(&mut store, &mut b);
        assert_eq!(collect(&a, &store), [2, 3, 0, 1]);
        assert_eq!(store[0].a.prev, Some(3));
        assert_eq!(a.count(), 4);

        while a.pop_back(&mut store).is_some() {}
        assert!(a.is_empty());
    }

    #[test]
    fn roles_are_independent() {
        let mut store = nodes(3);
        let mut by_a = DlList::<RoleA>::new();
        let mut by_b = DlFifoList::<RoleB>::new();

        for i in 0..3 {
            by_a.push_front(&mut store, i);
            by_b.push_back(&mut store, i);
        }

        by_a.remove(&mut store, 1);
        assert_eq!(collect(&by_a, &store), [2, 0]);
        assert_eq!(collect(&by_b, &store), [0, 1, 2]);
    }
}
