use crate::address;
use bitvec::vec::BitVec;

/// One way of a cache set.
///
/// The per-line masks are only consumed by the sub-line-tracking schemes
/// (BasicCache, Trimma); page-level schemes leave them untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Way {
    pub tag: address,
    pub valid: bool,
    pub dirty: bool,
    /// Age counter: higher means colder. The resident way is zeroed on
    /// every touch, everything else valid in the set ages by one.
    pub lru_value: u64,
    pub valid_lines: BitVec,
    pub dirty_lines: BitVec,
}

impl Way {
    #[must_use]
    fn new(lines_per_page: usize) -> Self {
        Self {
            tag: 0,
            valid: false,
            dirty: false,
            lru_value: 0,
            valid_lines: BitVec::repeat(false, lines_per_page),
            dirty_lines: BitVec::repeat(false, lines_per_page),
        }
    }

    pub fn clear_lines(&mut self) {
        self.valid_lines.fill(false);
        self.dirty_lines.fill(false);
    }

    #[must_use]
    pub fn dirty_line_count(&self) -> usize {
        self.dirty_lines.count_ones()
    }
}

/// A contiguous group of ways sharing one index.
#[derive(Debug, Clone)]
pub struct Set {
    pub ways: Vec<Way>,
}

impl Set {
    #[must_use]
    pub fn find_empty_way(&self) -> Option<usize> {
        self.ways.iter().position(|way| !way.valid)
    }

    /// Victim selection: an empty way if any, otherwise the coldest way.
    #[must_use]
    pub fn find_lru_victim(&self) -> usize {
        if let Some(empty) = self.find_empty_way() {
            return empty;
        }
        let mut victim = 0;
        let mut max_value = 0;
        for (idx, way) in self.ways.iter().enumerate() {
            if way.lru_value > max_value {
                max_value = way.lru_value;
                victim = idx;
            }
        }
        victim
    }

    pub fn update_lru(&mut self, way_idx: usize) {
        for (idx, way) in self.ways.iter_mut().enumerate() {
            if idx != way_idx && way.valid {
                way.lru_value += 1;
            }
        }
        self.ways[way_idx].lru_value = 0;
    }

    /// Index of the valid way holding `tag`, if resident.
    #[must_use]
    pub fn lookup(&self, tag: address) -> Option<usize> {
        self.ways.iter().position(|way| way.valid && way.tag == tag)
    }

    /// Invariant: at most one valid way per tag.
    pub fn assert_tag_absent(&self, tag: address) {
        for (idx, way) in self.ways.iter().enumerate() {
            assert!(
                !way.valid || way.tag != tag,
                "tag {tag:#x} unexpectedly resident in way {idx}"
            );
        }
    }
}

/// The controller's functional tag state: `num_sets x num_ways` ways.
#[derive(Debug)]
pub struct TagArray {
    sets: Vec<Set>,
    num_ways: u32,
}

impl TagArray {
    #[must_use]
    pub fn new(num_sets: u64, num_ways: u32, lines_per_page: u64) -> Self {
        let sets = (0..num_sets)
            .map(|_| Set {
                ways: (0..num_ways)
                    .map(|_| Way::new(lines_per_page as usize))
                    .collect(),
            })
            .collect();
        Self { sets, num_ways }
    }

    #[must_use]
    pub fn num_sets(&self) -> u64 {
        self.sets.len() as u64
    }

    #[must_use]
    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    #[must_use]
    pub fn set(&self, idx: u64) -> &Set {
        &self.sets[idx as usize]
    }

    #[must_use]
    pub fn set_mut(&mut self, idx: u64) -> &mut Set {
        &mut self.sets[idx as usize]
    }

    /// Overwrite a way with a freshly filled page/line.
    ///
    /// The line masks are cleared; sub-line schemes re-mark the fetched
    /// lines themselves.
    pub fn install(&mut self, set_idx: u64, way_idx: usize, tag: address, dirty: bool) {
        let way = &mut self.sets[set_idx as usize].ways[way_idx];
        way.valid = true;
        way.tag = tag;
        way.dirty = dirty;
        way.clear_lines();
    }
}

#[cfg(test)]
mod tests {
    use super::TagArray;

    #[test]
    fn install_and_lookup() {
        let mut tags = TagArray::new(4, 2, 64);
        tags.install(1, 0, 0x41, false);
        assert_eq!(tags.set(1).lookup(0x41), Some(0));
        assert_eq!(tags.set(1).lookup(0x42), None);
        assert_eq!(tags.set(0).lookup(0x41), None);
    }

    #[test]
    fn empty_way_preferred_over_lru_victim() {
        let mut tags = TagArray::new(1, 4, 64);
        tags.install(0, 0, 1, false);
        tags.install(0, 1, 2, false);
        assert_eq!(tags.set(0).find_empty_way(), Some(2));
        assert_eq!(tags.set(0).find_lru_victim(), 2);
    }

    #[test]
    fn coldest_way_is_evicted() {
        let mut tags = TagArray::new(1, 3, 64);
        for way in 0..3 {
            tags.install(0, way, way as u64, false);
        }
        // touch ways 1 and 2; way 0 goes cold
        tags.set_mut(0).update_lru(1);
        tags.set_mut(0).update_lru(2);
        assert_eq!(tags.set(0).find_lru_victim(), 0);
    }

    #[test]
    #[should_panic(expected = "unexpectedly resident")]
    fn duplicate_tags_are_fatal() {
        let mut tags = TagArray::new(1, 2, 64);
        tags.install(0, 0, 7, false);
        tags.set(0).assert_tag_absent(7);
    }

    #[test]
    fn dirty_line_masks() {
        let mut tags = TagArray::new(1, 1, 64);
        tags.install(0, 0, 3, true);
        let way = &mut tags.set_mut(0).ways[0];
        way.valid_lines.set(5, true);
        way.dirty_lines.set(5, true);
        way.dirty_lines.set(9, true);
        assert_eq!(way.dirty_line_count(), 2);
        way.clear_lines();
        assert_eq!(way.dirty_line_count(), 0);
    }
}
