use core::alloc::Layout;

use thiserror::Error;

use crate::RecordTypeId;

/// The error type for allocator and pool constructors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AllocInitError {
    /// A necessary allocation failed.
    ///
    /// This variant is returned when a constructor attempts to allocate the
    /// managed region from the global allocator and fails. It contains the
    /// [`Layout`] that could not be allocated.
    #[error("failed to allocate region of {} bytes", .0.size())]
    AllocFailed(Layout),

    /// The configuration is impossible to satisfy.
    #[error("invalid allocator configuration")]
    InvalidConfig,

    /// The page run a fixed-capacity pool needs could not be obtained.
    #[error("could not obtain a run of {wanted} pages")]
    OutOfPages {
        /// The number of contiguous pages requested.
        wanted: u32,
    },
}

/// Evidence that a slot handle no longer refers to the record it was issued
/// for.
///
/// A stale handle, a double release or a wild write into a slot all surface
/// as one of these. They are never returned to callers: pools pass them to
/// [`PageContext::handle_abort`], which does not return.
///
/// [`PageContext::handle_abort`]: crate::PageContext::handle_abort
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Corruption {
    /// The slot's tag word does not mark a live record of the expected type.
    #[error("slot {index} of type {type_id}: expected tag {expected:#010x}, found {found:#010x}")]
    BadTag {
        /// Index of the slot.
        index: u32,
        /// The type the pool stores.
        type_id: RecordTypeId,
        /// The tag of a live record of `type_id`.
        expected: u32,
        /// The tag word read from the slot.
        found: u32,
    },

    /// The slot holds a live record, but not the one the handle was issued
    /// for.
    #[error("slot {index} of type {type_id}: handle generation {expected}, slot generation {found}")]
    StaleHandle {
        /// Index of the slot.
        index: u32,
        /// The type the pool stores.
        type_id: RecordTypeId,
        /// Generation carried by the handle.
        expected: u32,
        /// Generation read from the slot.
        found: u32,
    },

    /// The index does not name a slot of the pool.
    #[error("index {index} does not name a slot of type {type_id}")]
    OutOfRange {
        /// The offending index.
        index: u32,
        /// The type the pool stores.
        type_id: RecordTypeId,
    },
}

/// Errors returned by [`GrowablePageMap`](crate::GrowablePageMap).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PageMapError {
    /// Only the most recently mapped logical page may be released.
    #[error("logical page {requested} is not the top page (top is {top:?})")]
    NotTop {
        /// The logical page the caller tried to release.
        requested: u32,
        /// The current top logical page.
        top: Option<u32>,
    },
}
