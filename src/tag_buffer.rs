use crate::address;

/// Number of ways per tag buffer set.
const TB_WAYS: u32 = 8;

#[derive(Debug, Clone, Copy)]
struct TagBufferEntry {
    tag: address,
    /// Remapped entries are pinned until the buffer is flushed; reference
    /// entries are ordinary LRU victims.
    remap: bool,
    lru: u32,
}

/// Small set-associative buffer tracking recently remapped pages
/// (HybridCache).
#[derive(Debug)]
pub struct TagBuffer {
    sets: Vec<Vec<TagBufferEntry>>,
    num_ways: u32,
    num_sets: u32,
    entry_occupied: u32,
    last_clear_time: u64,
}

impl TagBuffer {
    #[must_use]
    pub fn new(size: u32) -> Self {
        let num_ways = TB_WAYS;
        let num_sets = size / num_ways;
        let sets = (0..num_sets)
            .map(|_| {
                (0..num_ways)
                    .map(|way| TagBufferEntry {
                        tag: 0,
                        remap: false,
                        lru: way,
                    })
                    .collect()
            })
            .collect();
        Self {
            sets,
            num_ways,
            num_sets,
            entry_occupied: 0,
            last_clear_time: 0,
        }
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    fn set_of(&self, tag: address) -> usize {
        (tag % u64::from(self.num_sets)) as usize
    }

    /// Way holding `tag`, or `num_ways` when absent.
    #[must_use]
    pub fn exist_in_tb(&self, tag: address) -> u32 {
        let set = &self.sets[self.set_of(tag)];
        set.iter()
            .position(|entry| entry.tag == tag)
            .map_or(self.num_ways, |way| way as u32)
    }

    /// Whether `tag` can be inserted without displacing a pinned entry.
    #[must_use]
    pub fn can_insert(&self, tag: address) -> bool {
        #[cfg(debug_assertions)]
        self.audit_occupancy();

        let set = &self.sets[self.set_of(tag)];
        set.iter().any(|entry| !entry.remap || entry.tag == tag)
    }

    /// Whether both tags can coexist in their set(s).
    #[must_use]
    pub fn can_insert_pair(&self, tag1: address, tag2: address) -> bool {
        if self.set_of(tag1) != self.set_of(tag2) {
            return self.can_insert(tag1) && self.can_insert(tag2);
        }
        let set = &self.sets[self.set_of(tag1)];
        let slots = set
            .iter()
            .filter(|entry| !entry.remap || entry.tag == tag1 || entry.tag == tag2)
            .count();
        slots >= 2
    }

    /// Insert `tag`, pinning it when `remap` is set. The caller must have
    /// checked `can_insert` first; running out of victims is fatal.
    pub fn insert(&mut self, tag: address, remap: bool) {
        let set_idx = self.set_of(tag);
        let exist_way = self.exist_in_tb(tag);

        #[cfg(debug_assertions)]
        {
            let set = &self.sets[set_idx];
            for i in 0..self.num_ways as usize {
                for j in i + 1..self.num_ways as usize {
                    debug_assert!(
                        set[i].tag != set[j].tag || set[i].tag == 0,
                        "duplicate tag {:#x} in tag buffer set {set_idx}",
                        set[i].tag
                    );
                }
            }
        }

        if exist_way < self.num_ways {
            let was_pinned = self.sets[set_idx][exist_way as usize].remap;
            if remap {
                if !was_pinned {
                    self.entry_occupied += 1;
                }
                self.sets[set_idx][exist_way as usize].remap = true;
            } else if !was_pinned {
                self.update_lru(set_idx, exist_way as usize);
            }
            return;
        }

        let mut max_lru = 0;
        let mut replace_way = self.num_ways;
        for (way, entry) in self.sets[set_idx].iter().enumerate() {
            if !entry.remap && entry.lru >= max_lru {
                max_lru = entry.lru;
                replace_way = way as u32;
            }
        }
        assert!(
            replace_way != self.num_ways,
            "tag buffer set {set_idx} has no insertable way"
        );
        let entry = &mut self.sets[set_idx][replace_way as usize];
        entry.tag = tag;
        entry.remap = remap;
        if remap {
            self.entry_occupied += 1;
        } else {
            self.update_lru(set_idx, replace_way as usize);
        }
    }

    fn update_lru(&mut self, set_idx: usize, way: usize) {
        debug_assert!(!self.sets[set_idx][way].remap);
        let pivot = self.sets[set_idx][way].lru;
        for (idx, entry) in self.sets[set_idx].iter_mut().enumerate() {
            if idx != way && !entry.remap && entry.lru < pivot {
                entry.lru += 1;
            }
        }
        self.sets[set_idx][way].lru = 0;
    }

    /// Fraction of entries holding pinned remaps.
    #[must_use]
    pub fn occupancy(&self) -> f64 {
        f64::from(self.entry_occupied) / f64::from(self.num_ways) / f64::from(self.num_sets)
    }

    pub fn clear(&mut self) {
        self.entry_occupied = 0;
        for set in &mut self.sets {
            for (way, entry) in set.iter_mut().enumerate() {
                entry.tag = 0;
                entry.remap = false;
                entry.lru = way as u32;
            }
        }
    }

    pub fn set_clear_time(&mut self, time: u64) {
        self.last_clear_time = time;
    }

    #[must_use]
    pub fn clear_time(&self) -> u64 {
        self.last_clear_time
    }

    #[cfg(debug_assertions)]
    fn audit_occupancy(&self) {
        let pinned: u32 = self
            .sets
            .iter()
            .flatten()
            .filter(|entry| entry.remap)
            .count() as u32;
        debug_assert_eq!(pinned, self.entry_occupied, "tag buffer occupancy drifted");
    }
}

/// One-entry `(set, tag, way)` slot short-circuiting the BasicCache tag
/// fetch for the most recently used page.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecentTag {
    entry: Option<(u64, address, u32)>,
}

impl RecentTag {
    #[must_use]
    pub fn lookup(&self, set: u64, tag: address) -> Option<u32> {
        match self.entry {
            Some((s, t, way)) if s == set && t == tag => Some(way),
            _ => None,
        }
    }

    pub fn update(&mut self, set: u64, tag: address, way: u32) {
        self.entry = Some((set, tag, way));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::TagBuffer;

    #[test]
    fn occupancy_counts_pinned_entries_only() {
        let mut tb = TagBuffer::new(128);
        // 16 sets x 8 ways
        tb.insert(3, true);
        tb.insert(19, true);
        tb.insert(4, false);
        assert!((tb.occupancy() - 2.0 / 128.0).abs() < 1e-12);
    }

    #[test]
    fn reinserting_as_remap_pins_existing_entry() {
        let mut tb = TagBuffer::new(128);
        tb.insert(7, false);
        assert!((tb.occupancy() - 0.0).abs() < 1e-12);
        tb.insert(7, true);
        assert!((tb.occupancy() - 1.0 / 128.0).abs() < 1e-12);
        // pinning is idempotent
        tb.insert(7, true);
        assert!((tb.occupancy() - 1.0 / 128.0).abs() < 1e-12);
    }

    #[test]
    fn pinned_entries_survive_reference_churn() {
        let mut tb = TagBuffer::new(128);
        let pinned = 5;
        tb.insert(pinned, true);
        // 16 sets: tags congruent to 5 mod 16 land in the same set
        for i in 1..=32u64 {
            tb.insert(5 + 16 * i, false);
        }
        assert!(tb.exist_in_tb(pinned) < tb.num_ways());
    }

    #[test]
    fn can_insert_pair_in_one_set_needs_two_slots() {
        let mut tb = TagBuffer::new(128);
        // fill 7 of 8 ways of set 1 with pinned remaps
        for i in 0..7u64 {
            tb.insert(1 + 16 * i, true);
        }
        assert!(tb.can_insert(1 + 16 * 7));
        assert!(!tb.can_insert_pair(1 + 16 * 7, 1 + 16 * 8));
        // in different sets a single free way each suffices
        assert!(tb.can_insert_pair(1 + 16 * 7, 2));
    }

    #[test]
    fn clear_unpins_everything() {
        let mut tb = TagBuffer::new(128);
        for i in 0..8u64 {
            tb.insert(i, true);
        }
        tb.clear();
        tb.set_clear_time(77);
        assert!((tb.occupancy() - 0.0).abs() < 1e-12);
        assert_eq!(tb.clear_time(), 77);
        assert!(tb.can_insert_pair(1, 17));
    }

    #[test]
    fn recent_tag_slot() {
        let mut slot = super::RecentTag::default();
        assert_eq!(slot.lookup(0, 1), None);
        slot.update(0, 1, 3);
        assert_eq!(slot.lookup(0, 1), Some(3));
        assert_eq!(slot.lookup(1, 1), None);
        slot.update(2, 9, 0);
        assert_eq!(slot.lookup(0, 1), None);
    }
}
