//! Logical-to-physical page map for elastic pools.
//!
//! A `GrowablePageMap` issues logical page numbers `0, 1, 2, ...` in order and
//! maps each to a physical page obtained from the context. The mapping lives
//! in a two-level radix index built from pages of the same arena: a root index
//! page points to leaf index pages, each of which holds the physical page ids
//! of [`ENTRIES_PER_INDEX_PAGE`] consecutive logical pages. Leaves are created
//! the first time a logical page that falls on them is issued.
//!
//! Only the most recently issued logical page, the *top*, may be released.
//! This keeps the map dense and every operation O(1), at the price of only
//! being able to shrink from the high end.

use core::ptr::{self, NonNull};

use log::trace;

use crate::{PageContext, PageMapError, RecordTypeId};

/// Number of mapping entries in one index page.
pub const ENTRIES_PER_INDEX_PAGE: u32 = 8190;

/// The number of logical pages a map can address.
pub const MAX_LOGICAL_PAGES: u32 = ENTRIES_PER_INDEX_PAGE * ENTRIES_PER_INDEX_PAGE;

const UNMAPPED: u32 = u32::MAX;

#[repr(C)]
struct IndexPage {
    used: u32,
    _pad: u32,
    entries: [u32; ENTRIES_PER_INDEX_PAGE as usize],
}

const _: () = assert!(core::mem::size_of::<IndexPage>() == crate::PAGE_SIZE);

/// A logical page and the physical page it maps to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MappedPage {
    /// The logical page number.
    pub logical: u32,
    /// The physical page number in the context's region.
    pub physical: u32,
}

/// A two-level map from logical to physical pages with top-only release.
///
/// ```
/// use slot_pool::{FlatPageStore, GrowablePageMap, PageMapError, RecordTypeId};
///
/// let mut ctx = FlatPageStore::new(8).unwrap();
/// let mut map = GrowablePageMap::new(RecordTypeId::new(1, 0));
///
/// let a = map.seize(&mut ctx).unwrap();
/// let b = map.seize(&mut ctx).unwrap();
/// assert_eq!((a.logical, b.logical), (0, 1));
///
/// assert_eq!(
///     map.release(&mut ctx, 0),
///     Err(PageMapError::NotTop { requested: 0, top: Some(1) })
/// );
/// map.release(&mut ctx, 1).unwrap();
/// assert_eq!(map.top(), Some(0));
/// ```
#[derive(Debug)]
pub struct GrowablePageMap {
    type_id: RecordTypeId,
    root: Option<u32>,
    top: Option<u32>,
    max_pages: u32,
    index_pages: u32,
}

#[inline]
fn index_ptr<C: PageContext + ?Sized>(ctx: &C, page: u32) -> NonNull<IndexPage> {
    ctx.page_ptr(page).cast()
}

/// Returns the index page at `page`.
///
/// # Safety
///
/// `page` must be an index page of the calling map, and no other reference to
/// it may exist for `'a`.
#[inline]
unsafe fn index_mut<'a, C: PageContext + ?Sized>(ctx: &C, page: u32) -> &'a mut IndexPage {
    unsafe { &mut *index_ptr(ctx, page).as_ptr() }
}

#[inline]
fn split_logical(logical: u32) -> (u32, u32) {
    (logical / ENTRIES_PER_INDEX_PAGE, logical % ENTRIES_PER_INDEX_PAGE)
}

impl GrowablePageMap {
    /// Creates an empty map whose pages are charged to `type_id`.
    pub fn new(type_id: RecordTypeId) -> GrowablePageMap {
        Self::with_max_pages(type_id, MAX_LOGICAL_PAGES)
    }

    /// Creates an empty map that issues at most `max_pages` logical pages.
    pub fn with_max_pages(type_id: RecordTypeId, max_pages: u32) -> GrowablePageMap {
        GrowablePageMap {
            type_id,
            root: None,
            top: None,
            max_pages: max_pages.min(MAX_LOGICAL_PAGES),
            index_pages: 0,
        }
    }

    /// Returns the top logical page, if any page is mapped.
    #[inline]
    pub fn top(&self) -> Option<u32> {
        self.top
    }

    /// Returns the number of mapped logical pages.
    #[inline]
    pub fn len(&self) -> u32 {
        self.top.map_or(0, |t| t + 1)
    }

    /// Returns `true` if no page is mapped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Returns the number of index pages the map currently holds.
    #[inline]
    pub fn index_page_count(&self) -> u32 {
        self.index_pages
    }

    /// Returns the most logical pages the map will issue.
    #[inline]
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Returns the physical page mapped at `logical`.
    pub fn physical<C: PageContext>(&self, ctx: &C, logical: u32) -> Option<u32> {
        if logical >= self.len() {
            return None;
        }

        let root = self.root?;
        let (leaf_no, entry) = split_logical(logical);

        // SAFETY: the root and every leaf below the top are index pages of
        // this map.
        unsafe {
            let leaf = index_mut(ctx, root).entries[leaf_no as usize];
            debug_assert_ne!(leaf, UNMAPPED);

            let physical = index_mut(ctx, leaf).entries[entry as usize];
            (physical != UNMAPPED).then_some(physical)
        }
    }

    fn new_index_page<C: PageContext>(&mut self, ctx: &mut C) -> Option<u32> {
        let page = ctx.alloc_page(self.type_id)?;
        let p = index_ptr(ctx, page).as_ptr();

        // SAFETY: the page was just handed to this map. `UNMAPPED` is all ones.
        unsafe {
            ptr::addr_of_mut!((*p).used).write(0);
            ptr::addr_of_mut!((*p)._pad).write(0);
            ptr::addr_of_mut!((*p).entries)
                .cast::<u32>()
                .write_bytes(0xFF, ENTRIES_PER_INDEX_PAGE as usize);
        }

        self.index_pages += 1;
        Some(page)
    }

    fn free_index_page<C: PageContext>(&mut self, ctx: &mut C, page: u32) {
        ctx.release_page(self.type_id, page);
        self.index_pages -= 1;
    }

    /// Maps the next logical page after the top to a fresh physical page.
    ///
    /// Returns `None`, leaving the map unchanged, if the map is full or the
    /// context cannot supply the pages needed.
    pub fn seize<C: PageContext>(&mut self, ctx: &mut C) -> Option<MappedPage> {
        let logical = self.len();
        if logical >= self.max_pages {
            return None;
        }

        let (leaf_no, entry) = split_logical(logical);

        let (root, new_root) = match self.root {
            Some(root) => (root, false),
            None => {
                let root = self.new_index_page(ctx)?;
                trace!("{}: page map root at {root}", self.type_id);
                (root, true)
            }
        };

        // SAFETY: `root` is this map's root index page.
        let existing_leaf = unsafe { index_mut(ctx, root).entries[leaf_no as usize] };

        let (leaf, new_leaf) = if existing_leaf != UNMAPPED {
            (existing_leaf, false)
        } else {
            match self.new_index_page(ctx) {
                Some(leaf) => {
                    trace!("{}: page map leaf {leaf_no} at {leaf}", self.type_id);
                    (leaf, true)
                }
                None => {
                    if new_root {
                        self.free_index_page(ctx, root);
                    }
                    return None;
                }
            }
        };

        let Some(physical) = ctx.alloc_page(self.type_id) else {
            if new_leaf {
                self.free_index_page(ctx, leaf);
            }
            if new_root {
                self.free_index_page(ctx, root);
            }
            return None;
        };

        // SAFETY: `root` and `leaf` are index pages of this map, and distinct.
        unsafe {
            if new_leaf {
                let r = index_mut(ctx, root);
                r.entries[leaf_no as usize] = leaf;
                r.used += 1;
            }

            let l = index_mut(ctx, leaf);
            debug_assert_eq!(l.entries[entry as usize], UNMAPPED);
            l.entries[entry as usize] = physical;
            l.used += 1;
        }

        self.root = Some(root);
        self.top = Some(logical);

        Some(MappedPage { logical, physical })
    }

    /// Unmaps the top logical page and returns its physical page to the
    /// context.
    ///
    /// A leaf index page left empty is reclaimed along with it, and the root
    /// once the map is empty.
    ///
    /// # Errors
    ///
    /// Returns [`PageMapError::NotTop`], leaving the map unchanged, if
    /// `logical` is not the top page.
    pub fn release<C: PageContext>(&mut self, ctx: &mut C, logical: u32) -> Result<(), PageMapError> {
        let (Some(top), Some(root)) = (self.top, self.root) else {
            return Err(PageMapError::NotTop {
                requested: logical,
                top: self.top,
            });
        };

        if logical != top {
            return Err(PageMapError::NotTop {
                requested: logical,
                top: self.top,
            });
        }

        let (leaf_no, entry) = split_logical(logical);

        // SAFETY: the root and the top's leaf are index pages of this map.
        let (leaf, physical, leaf_used) = unsafe {
            let leaf = index_mut(ctx, root).entries[leaf_no as usize];
            let l = index_mut(ctx, leaf);
            let physical = l.entries[entry as usize];
            l.entries[entry as usize] = UNMAPPED;
            l.used -= 1;
            (leaf, physical, l.used)
        };

        ctx.release_page(self.type_id, physical);

        let new_top = logical.checked_sub(1);
        self.top = new_top;

        let holds_new_top = new_top.is_some_and(|t| split_logical(t).0 == leaf_no);
        if leaf_used == 0 && !holds_new_top {
            // SAFETY: `root` is this map's root index page.
            let root_used = unsafe {
                let r = index_mut(ctx, root);
                r.entries[leaf_no as usize] = UNMAPPED;
                r.used -= 1;
                r.used
            };

            self.free_index_page(ctx, leaf);
            trace!("{}: reclaimed page map leaf {leaf_no}", self.type_id);

            if root_used == 0 {
                debug_assert!(self.top.is_none());
                self.free_index_page(ctx, root);
                self.root = None;
                trace!("{}: reclaimed page map root", self.type_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlatPageStore;

    const ID: RecordTypeId = RecordTypeId::new(6, 4);

    #[test]
    fn index_pages_are_created_lazily() {
        let mut ctx = FlatPageStore::new(8).unwrap();
        let mut map = GrowablePageMap::new(ID);
        assert_eq!(map.index_page_count(), 0);

        let a = map.seize(&mut ctx).unwrap();
        assert_eq!(a.logical, 0);
        assert_eq!(map.index_page_count(), 2);
        assert_eq!(ctx.pages_in_use(), 3);

        let b = map.seize(&mut ctx).unwrap();
        assert_eq!(map.index_page_count(), 2);
        assert_eq!(map.physical(&ctx, 1), Some(b.physical));
        assert_eq!(map.physical(&ctx, 0), Some(a.physical));
        assert_eq!(map.physical(&ctx, 2), None);
    }

    #[test]
    fn release_is_top_only() {
        let mut ctx = FlatPageStore::new(16).unwrap();
        let mut map = GrowablePageMap::new(ID);

        for _ in 0..4 {
            map.seize(&mut ctx).unwrap();
        }

        for logical in 0..3 {
            assert_eq!(
                map.release(&mut ctx, logical),
                Err(PageMapError::NotTop {
                    requested: logical,
                    top: Some(3)
                })
            );
        }
        assert_eq!(map.len(), 4);

        map.release(&mut ctx, 3).unwrap();
        assert_eq!(map.top(), Some(2));
        map.release(&mut ctx, 2).unwrap();
        map.release(&mut ctx, 1).unwrap();
        map.release(&mut ctx, 0).unwrap();

        assert!(map.is_empty());
        assert_eq!(map.index_page_count(), 0);
        assert_eq!(ctx.pages_in_use(), 0);
        assert_eq!(
            map.release(&mut ctx, 0),
            Err(PageMapError::NotTop {
                requested: 0,
                top: None
            })
        );
    }

    #[test]
    fn failed_seize_rolls_back() {
        let mut ctx = FlatPageStore::new(8).unwrap().with_page_limit(2);
        let mut map = GrowablePageMap::new(ID);

        assert!(map.seize(&mut ctx).is_none());
        assert_eq!(map.index_page_count(), 0);
        assert_eq!(ctx.pages_in_use(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn max_pages_caps_growth() {
        let mut ctx = FlatPageStore::new(8).unwrap();
        let mut map = GrowablePageMap::with_max_pages(ID, 2);
        assert_eq!(map.max_pages(), 2);

        map.seize(&mut ctx).unwrap();
        map.seize(&mut ctx).unwrap();
        assert!(map.seize(&mut ctx).is_none());
        assert_eq!(ctx.pages_in_use(), 4);

        map.release(&mut ctx, 1).unwrap();
        assert_eq!(map.seize(&mut ctx).map(|m| m.logical), Some(1));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn leaf_reclaimed_below_root() {
        let mut ctx = FlatPageStore::new(8200).unwrap();
        let mut map = GrowablePageMap::new(ID);

        let leaf_size = ENTRIES_PER_INDEX_PAGE;
        for _ in 0..leaf_size {
            map.seize(&mut ctx).unwrap();
        }
        assert_eq!(map.index_page_count(), 2);

        let first_of_second_leaf = map.seize(&mut ctx).unwrap();
        assert_eq!(first_of_second_leaf.logical, leaf_size);
        assert_eq!(map.index_page_count(), 3);

        // Emptying the second leaf frees it; the root and first leaf stay.
        map.release(&mut ctx, leaf_size).unwrap();
        assert_eq!(map.index_page_count(), 2);
        assert_eq!(map.top(), Some(leaf_size - 1));
        assert_eq!(ctx.pages_in_use(), leaf_size + 2);

        let again = map.seize(&mut ctx).unwrap();
        assert_eq!(again.logical, leaf_size);
        assert_eq!(map.index_page_count(), 3);
        assert_eq!(map.physical(&ctx, leaf_size), Some(again.physical));
    }
}
