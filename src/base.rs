use core::{alloc::Layout, ptr::NonNull};

use crate::{AllocInitError, PAGE_SIZE};

/// A pointer to the base of a region of pages.
///
/// Page numbers are offsets from the base in units of [`PAGE_SIZE`]; every
/// pointer into the region is derived from the base so that it carries the
/// base's provenance.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    num_pages: u32,
}

impl BasePtr {
    /// Allocates a zeroed, page-aligned region of `num_pages` pages from the
    /// global allocator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the region size cannot be represented as a
    /// [`Layout`], or `AllocFailed` if the global allocator fails.
    pub fn alloc_zeroed(num_pages: u32) -> Result<BasePtr, AllocInitError> {
        let layout = Self::region_layout(num_pages)?;

        // SAFETY: `region_layout` rejects zero-sized regions.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?;

        Ok(BasePtr { ptr, num_pages })
    }

    /// Returns the layout of a region of `num_pages` pages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `num_pages` is zero or the region size
    /// overflows.
    pub fn region_layout(num_pages: u32) -> Result<Layout, AllocInitError> {
        if num_pages == 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        let size = (num_pages as usize)
            .checked_mul(PAGE_SIZE)
            .ok_or(AllocInitError::InvalidConfig)?;

        Layout::from_size_align(size, PAGE_SIZE).map_err(|_| AllocInitError::InvalidConfig)
    }

    /// Returns the region to the global allocator.
    ///
    /// # Safety
    ///
    /// `self` must have been returned by [`BasePtr::alloc_zeroed`], and no
    /// pointer derived from it may be used afterwards.
    pub unsafe fn dealloc(self) {
        // Safe unwrap: this layout was checked when the region was allocated.
        let layout = Self::region_layout(self.num_pages).unwrap();

        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), layout) };
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the number of pages in the region.
    #[inline]
    pub fn num_pages(self) -> u32 {
        self.num_pages
    }

    /// Returns a pointer to the start of page `page`.
    ///
    /// # Panics
    ///
    /// Panics if `page` lies outside the region.
    #[inline]
    pub fn page_ptr(self, page: u32) -> NonNull<u8> {
        assert!(
            page < self.num_pages,
            "page {page} outside region of {} pages",
            self.num_pages
        );

        // SAFETY: the offset stays within the allocated region, so the result
        // is in bounds and non-null.
        unsafe { self.ptr.add(page as usize * PAGE_SIZE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pages_is_invalid() {
        assert_eq!(
            BasePtr::region_layout(0).unwrap_err(),
            AllocInitError::InvalidConfig
        );
    }

    #[test]
    fn pages_are_addressable() {
        let base = BasePtr::alloc_zeroed(3).unwrap();

        let addr = base.ptr().as_ptr() as usize;
        assert_eq!(addr % PAGE_SIZE, 0);
        for page in 0..3 {
            let p = base.page_ptr(page).as_ptr() as usize;
            assert_eq!(p - addr, page as usize * PAGE_SIZE);
        }

        unsafe { base.dealloc() };
    }
}
