//! Arena configuration.

use crate::{
    base::BasePtr,
    record::MAX_RESOURCE_GROUPS,
    resource::ResourceLimit,
    AllocInitError, MAX_PAGES,
};

/// Configuration of a [`BuddyPageAllocator`](crate::BuddyPageAllocator).
///
/// ```
/// use slot_pool::{BuddyPageAllocator, MemoryConfig};
///
/// let config = MemoryConfig::new(64)
///     .with_resource_limit(1, 16, Some(32))
///     .with_resource_limit(2, 0, Some(8));
///
/// let pages = BuddyPageAllocator::try_new(&config).unwrap();
/// assert_eq!(pages.free_pages(), 64);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Number of pages in the arena.
    pub num_pages: u32,
    /// Quota of each resource group, indexed by group id.
    pub resource_limits: [ResourceLimit; MAX_RESOURCE_GROUPS],
    bad_group: Option<u32>,
}

impl MemoryConfig {
    /// Returns a configuration of `num_pages` pages with no quotas.
    pub fn new(num_pages: u32) -> MemoryConfig {
        MemoryConfig {
            num_pages,
            resource_limits: [ResourceLimit::default(); MAX_RESOURCE_GROUPS],
            bad_group: None,
        }
    }

    /// Sets the quota of resource group `group`.
    ///
    /// Out-of-range groups are accepted here and rejected by
    /// [`validate`](Self::validate).
    pub fn with_resource_limit(mut self, group: u32, min: u32, max: Option<u32>) -> MemoryConfig {
        if let Some(limit) = self.resource_limits.get_mut(group as usize) {
            *limit = ResourceLimit { min, max, curr: 0 };
        } else {
            self.bad_group = Some(group);
        }

        self
    }

    /// Checks that the configuration can be satisfied.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if the page count is zero,
    /// too large to be indexed or too large to allocate, if any group's
    /// minimum exceeds its maximum, or if the minimums add up to more than the
    /// arena.
    pub fn validate(&self) -> Result<(), AllocInitError> {
        if self.num_pages == 0 || self.num_pages > MAX_PAGES || self.bad_group.is_some() {
            return Err(AllocInitError::InvalidConfig);
        }

        BasePtr::region_layout(self.num_pages)?;

        let mut reserved: u64 = 0;
        for limit in &self.resource_limits {
            if limit.curr != 0 || limit.max.is_some_and(|max| limit.min > max) {
                return Err(AllocInitError::InvalidConfig);
            }

            reserved += u64::from(limit.min);
        }

        if reserved > u64::from(self.num_pages) {
            return Err(AllocInitError::InvalidConfig);
        }

        Ok(())
    }
}
