//! Page-backed slot allocators for single-owner storage kernels.
//!
//! Every record a storage kernel hands out lives in a fixed-size [`Slot`]
//! carved from a [`PAGE_SIZE`]-byte page, and every page comes from one arena
//! managed by a [`BuddyPageAllocator`]. Pools never touch the arena directly:
//! they go through a [`PageContext`], which is passed explicitly to every
//! operation. In production the context is an [`AllocContext`] over the buddy
//! allocator; in tests it may be a [`FlatPageStore`].
//!
//! The pools differ in how they recycle slots:
//!
//! - [`FixedPagePool`] reuses freed slots page by page and returns a page once
//!   it is empty.
//! - [`WriteOncePool`] never reuses a slot while its page has live records.
//! - [`ArenaPool`] hands out untyped allocations that are all released at once.
//! - [`StaticPool`] has a capacity fixed at start-up.
//! - [`GrowablePool`] grows a page at a time and shrinks from the top.
//! - [`LayeredPool`] puts a static tier in front of a growable one.
//!
//! Records are named by [`Ptr`] handles. A handle carries the record's `u32`
//! index, which is its durable identity, plus the slot generation it was
//! issued for. Using a handle whose record has been released is detected and
//! handed to [`PageContext::handle_abort`].
//!
//! ```
//! use slot_pool::{
//!     AllocContext, BuddyPageAllocator, FixedPagePool, Record, RecordTypeId, SlotPool,
//! };
//!
//! struct ScanRecord {
//!     table: u32,
//! }
//!
//! impl Record for ScanRecord {
//!     const TYPE_ID: RecordTypeId = RecordTypeId::new(1, 0);
//! }
//!
//! let mut pages = BuddyPageAllocator::try_with_pages(16).unwrap();
//! let mut ctx = AllocContext::new(&mut pages);
//! let mut scans = FixedPagePool::<ScanRecord>::new().unwrap();
//!
//! let scan = scans.seize(&mut ctx, ScanRecord { table: 7 }).unwrap();
//! assert_eq!(scans.get(&ctx, &scan).table, 7);
//!
//! let ScanRecord { table } = scans.release(&mut ctx, scan);
//! assert_eq!(table, 7);
//! ```

#![doc(html_root_url = "https://docs.rs/slot_pool/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod base;
mod bitmap;
mod config;
mod context;
mod error;
mod record;
mod resource;

pub mod arena;
pub mod buddy;
pub mod fixed;
pub mod growable;
pub mod layered;
pub mod list;
pub mod page_map;
pub mod pool;
pub mod slot;
pub mod static_pool;
pub mod write_once;

#[cfg(test)]
mod tests;

pub use crate::{
    arena::{Arena, ArenaPool},
    buddy::{BuddyPageAllocator, PageRun},
    config::MemoryConfig,
    context::{AllocContext, FlatPageStore, PageContext},
    error::{AllocInitError, Corruption, PageMapError},
    fixed::FixedPagePool,
    growable::GrowablePool,
    layered::LayeredPool,
    page_map::{GrowablePageMap, MappedPage},
    pool::{LocalList, PoolRecords, SlotPool},
    record::{Record, RecordTypeId, SlotLayout, MAX_RESOURCE_GROUPS, RESOURCE_GROUP_BITS},
    resource::ResourceLimit,
    slot::{Ptr, Slot},
    static_pool::StaticPool,
    write_once::WriteOncePool,
};

/// The number of 32-bit words in a page.
pub const PAGE_WORDS: usize = 8192;

/// The size of a page in bytes.
pub const PAGE_SIZE: usize = PAGE_WORDS * 4;

/// Number of low bits of a paged index that hold the slot number within the
/// page.
pub const SLOT_BITS: u32 = 13;

/// Mask extracting the slot number from a paged index.
pub const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;

/// The largest number of pages an arena may have; every page number must fit
/// in the high bits of a paged index.
pub const MAX_PAGES: u32 = 1 << (u32::BITS - SLOT_BITS);

/// Packs a page number and slot number into a paged index.
#[inline]
pub(crate) fn join_index(page: u32, slot_no: u32) -> u32 {
    debug_assert!(page < MAX_PAGES);
    debug_assert!(slot_no <= SLOT_MASK);

    (page << SLOT_BITS) | slot_no
}

/// Splits a paged index into its page number and slot number.
#[inline]
pub(crate) fn split_index(index: u32) -> (u32, u32) {
    (index >> SLOT_BITS, index & SLOT_MASK)
}
