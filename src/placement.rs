use crate::address;
use crate::mem_req::AccessClass;
use crate::tag_array::{Set, Way};

/// Line-granularity placement (AlloyCache): decide whether a miss should
/// displace the direct-mapped way.
pub trait LinePlacement: Send {
    fn handle_cache_miss(&mut self, victim: &Way) -> bool;
}

/// Page-granularity placement (UnisonCache, HybridCache, BasicCache,
/// Trimma).
///
/// `handle_cache_miss` returns the way to fill, or `set.ways.len()` to
/// bypass. Policies flag `counter_access` when they consulted in-DRAM
/// frequency counters so the handler can charge the traffic.
pub trait PagePlacement: Send {
    fn handle_cache_miss(
        &mut self,
        tag: address,
        class: AccessClass,
        set_idx: u64,
        set: &mut Set,
        counter_access: &mut bool,
    ) -> u32;

    fn handle_cache_hit(
        &mut self,
        tag: address,
        class: AccessClass,
        set_idx: u64,
        set: &mut Set,
        counter_access: &mut bool,
        hit_way: u32,
    );

    /// Forget any per-set state when BW-balance disables `set_idx`.
    fn flush_chunk(&mut self, set_idx: u64);
}

/// OS-driven placement (HMA).
pub trait OsPlacement: Send {
    fn handle_cache_access(&mut self, tag: address, class: AccessClass);

    /// Run one remap quantum; returns the number of migrated pages.
    fn remap_pages(&mut self) -> u64;
}

/// Install every missing line.
#[derive(Debug, Default)]
pub struct AlwaysInstall;

impl LinePlacement for AlwaysInstall {
    fn handle_cache_miss(&mut self, _victim: &Way) -> bool {
        true
    }
}

/// Plain LRU page placement over the set's age counters.
#[derive(Debug, Default)]
pub struct LruPagePolicy;

impl PagePlacement for LruPagePolicy {
    fn handle_cache_miss(
        &mut self,
        _tag: address,
        _class: AccessClass,
        _set_idx: u64,
        set: &mut Set,
        _counter_access: &mut bool,
    ) -> u32 {
        let way = set.find_lru_victim() as u32;
        set.update_lru(way as usize);
        way
    }

    fn handle_cache_hit(
        &mut self,
        _tag: address,
        _class: AccessClass,
        _set_idx: u64,
        set: &mut Set,
        _counter_access: &mut bool,
        hit_way: u32,
    ) {
        set.update_lru(hit_way as usize);
    }

    fn flush_chunk(&mut self, _set_idx: u64) {}
}

/// An OS policy that observes accesses but never migrates.
#[derive(Debug, Default)]
pub struct NullOsPolicy {
    accesses: u64,
}

impl OsPlacement for NullOsPolicy {
    fn handle_cache_access(&mut self, _tag: address, _class: AccessClass) {
        self.accesses += 1;
    }

    fn remap_pages(&mut self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::{LruPagePolicy, PagePlacement};
    use crate::mem_req::AccessClass;
    use crate::tag_array::TagArray;

    #[test]
    fn lru_policy_fills_empty_ways_first() {
        let mut tags = TagArray::new(1, 2, 64);
        let mut policy = LruPagePolicy;
        let mut counter = false;
        let way =
            policy.handle_cache_miss(10, AccessClass::Load, 0, tags.set_mut(0), &mut counter);
        assert_eq!(way, 0);
        tags.install(0, 0, 10, false);
        let way =
            policy.handle_cache_miss(11, AccessClass::Load, 0, tags.set_mut(0), &mut counter);
        assert_eq!(way, 1);
        assert!(!counter);
    }

    #[test]
    fn lru_policy_recycles_the_coldest_way() {
        let mut tags = TagArray::new(1, 2, 64);
        let mut policy = LruPagePolicy;
        let mut counter = false;
        tags.install(0, 0, 10, false);
        tags.install(0, 1, 11, false);
        policy.handle_cache_hit(11, AccessClass::Load, 0, tags.set_mut(0), &mut counter, 1);
        let way =
            policy.handle_cache_miss(12, AccessClass::Load, 0, tags.set_mut(0), &mut counter);
        assert_eq!(way, 0);
    }
}
