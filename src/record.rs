//! Record types and their slot geometry.

use core::{fmt, mem};

use crate::{slot::Slot, AllocInitError, PAGE_SIZE, SLOT_BITS};

/// Number of bits of a [`RecordTypeId`] that encode the resource group.
pub const RESOURCE_GROUP_BITS: u32 = 5;

/// The number of distinct resource groups.
pub const MAX_RESOURCE_GROUPS: usize = 1 << RESOURCE_GROUP_BITS;

const RESOURCE_GROUP_MASK: u32 = (1 << RESOURCE_GROUP_BITS) - 1;

/// A 32-bit record type identifier.
///
/// Packs a per-type ordinal together with the resource group whose page quota
/// the type is charged against. The bitwise complement of the identifier is
/// the tag word carried by every live slot of the type.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordTypeId(u32);

impl RecordTypeId {
    /// Packs `ordinal` and `resource_group` into a type identifier.
    ///
    /// # Panics
    ///
    /// Panics if `resource_group` does not fit in [`RESOURCE_GROUP_BITS`] bits
    /// or if `ordinal` does not fit in the remaining bits.
    pub const fn new(ordinal: u32, resource_group: u32) -> RecordTypeId {
        assert!(
            resource_group <= RESOURCE_GROUP_MASK,
            "resource group out of range"
        );
        assert!(
            ordinal < (1 << (u32::BITS - RESOURCE_GROUP_BITS)),
            "type ordinal out of range"
        );

        RecordTypeId((ordinal << RESOURCE_GROUP_BITS) | resource_group)
    }

    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the per-type ordinal.
    #[inline]
    pub const fn ordinal(self) -> u32 {
        self.0 >> RESOURCE_GROUP_BITS
    }

    /// Returns the resource group the type is accounted against.
    #[inline]
    pub const fn resource_group(self) -> u32 {
        self.0 & RESOURCE_GROUP_MASK
    }

    /// Returns the tag word of a live slot of this type.
    #[inline]
    pub const fn tag(self) -> u32 {
        !self.0
    }
}

impl fmt::Debug for RecordTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordTypeId")
            .field("ordinal", &self.ordinal())
            .field("resource_group", &self.resource_group())
            .finish()
    }
}

impl fmt::Display for RecordTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/rg{}", self.ordinal(), self.resource_group())
    }
}

/// A type whose values are stored in pool slots.
///
/// ```
/// use slot_pool::{Record, RecordTypeId};
///
/// struct ScanRecord {
///     table: u32,
///     cursor: u64,
/// }
///
/// impl Record for ScanRecord {
///     const TYPE_ID: RecordTypeId = RecordTypeId::new(7, 2);
/// }
/// ```
pub trait Record: Sized {
    /// The identifier of this record type.
    const TYPE_ID: RecordTypeId;
}

/// Slot geometry for one record type within one kind of page.
///
/// Computed once when a pool is set up for a type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotLayout {
    /// Byte stride between consecutive slots.
    pub slot_size: usize,
    /// Byte offset of the first slot within a page.
    pub first_slot: usize,
    /// Number of slots that fit on one page.
    pub slots_per_page: u32,
}

impl SlotLayout {
    /// Computes the layout of slots of `T` on a page that begins with a header
    /// of type `H`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if not even one slot fits
    /// after the header, or if the slot alignment exceeds the page alignment.
    pub fn for_page<T, H>() -> Result<SlotLayout, AllocInitError> {
        let slot_size = Self::slot_size::<T>();
        let align = mem::align_of::<Slot<T>>();

        if align > PAGE_SIZE {
            return Err(AllocInitError::InvalidConfig);
        }

        let first_slot = round_up(mem::size_of::<H>(), align);
        let room = PAGE_SIZE
            .checked_sub(first_slot)
            .ok_or(AllocInitError::InvalidConfig)?;

        let slots_per_page = (room / slot_size).min(1 << SLOT_BITS);
        if slots_per_page == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        Ok(SlotLayout {
            slot_size,
            first_slot,
            slots_per_page: slots_per_page as u32,
        })
    }

    /// Returns the slot stride of `T`, rounded up to machine-word alignment.
    pub fn slot_size<T>() -> usize {
        let align = mem::align_of::<Slot<T>>().max(mem::size_of::<usize>());
        round_up(mem::size_of::<Slot<T>>(), align)
    }

    /// Returns the byte offset of slot `slot_no` from the start of its page.
    #[inline]
    pub fn offset_of(&self, slot_no: u32) -> usize {
        self.first_slot + slot_no as usize * self.slot_size
    }
}

#[inline]
pub(crate) const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_packs_group_and_ordinal() {
        let id = RecordTypeId::new(1234, 17);
        assert_eq!(id.ordinal(), 1234);
        assert_eq!(id.resource_group(), 17);
        assert_eq!(id.tag(), !id.get());
        assert_ne!(id.tag(), 0);
    }

    #[test]
    #[should_panic]
    fn resource_group_out_of_range() {
        let _ = RecordTypeId::new(1, MAX_RESOURCE_GROUPS as u32);
    }

    #[test]
    fn slots_are_word_aligned() {
        struct Header {
            _a: u32,
        }

        let layout = SlotLayout::for_page::<[u8; 3], Header>().unwrap();
        assert_eq!(layout.slot_size % mem::size_of::<usize>(), 0);
        assert_eq!(layout.first_slot % mem::align_of::<Slot<[u8; 3]>>(), 0);
        assert!(layout.offset_of(layout.slots_per_page - 1) + layout.slot_size <= PAGE_SIZE);
    }

    #[test]
    fn oversized_record_is_rejected() {
        SlotLayout::for_page::<[u8; PAGE_SIZE], ()>().unwrap_err();
    }
}
