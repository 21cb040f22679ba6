//! Per-resource-group page quotas.

use crate::record::MAX_RESOURCE_GROUPS;

/// Page quota of one resource group.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceLimit {
    /// Pages reserved for the group. Other groups may not eat into the unused
    /// part of this reservation.
    pub min: u32,
    /// Upper bound on the pages the group may hold, or `None` for no bound.
    pub max: Option<u32>,
    /// Pages the group currently holds.
    pub curr: u32,
}

impl ResourceLimit {
    /// Returns the part of the group's reservation it has not yet used.
    #[inline]
    pub fn unused_reservation(&self) -> u32 {
        self.min.saturating_sub(self.curr)
    }

    /// Returns how many more pages the group may take before hitting `max`.
    #[inline]
    pub fn headroom(&self) -> u32 {
        match self.max {
            Some(max) => max.saturating_sub(self.curr),
            None => u32::MAX,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ResourceLimits {
    limits: [ResourceLimit; MAX_RESOURCE_GROUPS],
}

impl ResourceLimits {
    pub fn new(limits: [ResourceLimit; MAX_RESOURCE_GROUPS]) -> ResourceLimits {
        ResourceLimits { limits }
    }

    #[inline]
    pub fn get(&self, group: u32) -> &ResourceLimit {
        &self.limits[group as usize]
    }

    /// Returns the number of pages `group` may take right now, at most
    /// `wanted`, given `free_pages` unallocated pages in the arena.
    pub fn grant(&self, group: u32, wanted: u32, free_pages: u32) -> u32 {
        let own = &self.limits[group as usize];

        let reserved_by_others: u32 = self
            .limits
            .iter()
            .enumerate()
            .filter(|&(g, _)| g != group as usize)
            .map(|(_, l)| l.unused_reservation())
            .sum();

        let mut available = free_pages.saturating_sub(reserved_by_others);

        // A group's own reservation is always honored.
        available = available.max(own.unused_reservation().min(free_pages));

        wanted.min(own.headroom()).min(available)
    }

    pub fn charge(&mut self, group: u32, pages: u32) {
        let l = &mut self.limits[group as usize];
        l.curr = l.curr.checked_add(pages).expect("resource usage overflow");
    }

    pub fn credit(&mut self, group: u32, pages: u32) {
        let l = &mut self.limits[group as usize];
        l.curr = l
            .curr
            .checked_sub(pages)
            .expect("resource group released more pages than it held");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        let mut l = [ResourceLimit::default(); MAX_RESOURCE_GROUPS];
        l[1] = ResourceLimit {
            min: 10,
            max: Some(20),
            curr: 0,
        };
        l[2] = ResourceLimit {
            min: 0,
            max: Some(5),
            curr: 0,
        };
        ResourceLimits::new(l)
    }

    #[test]
    fn max_caps_grant() {
        let l = limits();
        assert_eq!(l.grant(2, 8, 100), 5);
        assert_eq!(l.grant(1, 50, 100), 20);
    }

    #[test]
    fn other_groups_reservation_is_protected() {
        let mut l = limits();
        // 12 pages free, 10 reserved for group 1.
        assert_eq!(l.grant(0, 12, 12), 2);
        assert_eq!(l.grant(1, 12, 12), 12);

        l.charge(1, 10);
        assert_eq!(l.grant(0, 12, 2), 2);

        l.credit(1, 4);
        assert_eq!(l.grant(0, 12, 6), 2);
    }
}
