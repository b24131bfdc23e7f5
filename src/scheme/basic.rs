use super::{decompose, set_tag_burst, set_tag_bytes, AddrParts};
use crate::address;
use crate::mc::Ctrl;
use crate::mem_req::{AccessClass, Request};
use crate::timing::{Priority, TimingRequest};

/// Page-granularity cache without tag amortisation: every lookup reads
/// the whole set's tags, and pages fill at page size while individual
/// lines inside a resident page are fetched on demand.
///
/// A one-entry `(set, tag, way)` slot short-circuits the tag fetch for
/// back-to-back accesses. With `ideal` set, the tag fetch and the LRU
/// metadata write-back disappear but every counter still moves.
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let p = decompose(ctrl, req.line_addr);
    run(ctrl, req, p, p.channel, p.near_addr)
}

/// Device address of a `(set, way)` page slot in the near tier.
fn page_slot_addr(ctrl: &Ctrl, set: u64, way: u32) -> address {
    (u64::from(ctrl.num_ways) * set + u64::from(way)) * ctrl.lines_per_page
}

/// The data path shared with Trimma, which routes near-tier traffic
/// through remapped device addresses and keeps the remap index current.
pub(super) fn run(
    ctrl: &mut Ctrl,
    req: &mut Request,
    p: AddrParts,
    channel: usize,
    near_addr: address,
) -> u64 {
    let class = req.kind.access_class();
    let store = class == AccessClass::Store;
    let enabled = p.set >= ctrl.ds_index;
    let line_offset = (req.line_addr - p.tag * ctrl.lines_per_page) as usize;

    ctrl.footprints.entry(p.tag);
    let hit_way = ctrl.footprints.resident_way(p.tag);
    match hit_way {
        Some(way) => {
            let resident = &ctrl.tags.set(p.set).ways[way as usize];
            assert!(
                resident.valid && resident.tag == p.tag,
                "footprint points at way {way} but tag {:#x} is not there",
                p.tag
            );
        }
        None => ctrl.tags.set(p.set).assert_tag_absent(p.tag),
    }

    // the one-entry slot spares re-reading the set's tags back to back
    let slot_fresh = ctrl
        .recent_tag
        .lookup(p.set, p.tag)
        .is_some_and(|way| Some(way) == hit_way);
    log::trace!(
        "{}: page-cache {:?} tag={:#x} set={} way={hit_way:?} slot_fresh={slot_fresh}",
        ctrl.name,
        req.kind,
        p.tag,
        p.set
    );
    if !slot_fresh {
        if !ctrl.ideal {
            req.cycle = ctrl.mc_access(
                channel,
                TimingRequest::read(near_addr, req.cycle),
                Priority::Critical,
                set_tag_burst(ctrl.num_ways),
            );
        }
        ctrl.stats.total_invalid.add(set_tag_bytes(ctrl.num_ways));
    }

    let mut counter_access = false;
    let data_ready;
    let mut used_way = ctrl.num_ways;

    if let Some(hit_way) = hit_way {
        ctrl.stats.total_hit.inc();
        assert!(enabled, "hit in a bypassed set {}", p.set);
        used_way = hit_way;

        let line_valid = ctrl.tags.set(p.set).ways[hit_way as usize].valid_lines[line_offset];
        if line_valid {
            let treq = TimingRequest {
                addr: near_addr,
                is_write: req.kind.is_writeback(),
                cycle: req.cycle,
            };
            req.cycle = ctrl.mc_access(channel, treq, Priority::Pipelined, 4);
        } else {
            // resident page, but this line was never brought in
            req.cycle = ctrl.ext_cxl_access(
                TimingRequest::read(req.line_addr, req.cycle),
                Priority::Pipelined,
                4,
            );
            ctrl.mc_access(
                channel,
                TimingRequest::write(near_addr, req.cycle),
                Priority::Background,
                4,
            );
        }
        data_ready = req.cycle;
        ctrl.hits_per_step += 1;

        {
            let way = &mut ctrl.tags.set_mut(p.set).ways[hit_way as usize];
            way.valid_lines.set(line_offset, true);
            if store {
                way.dirty_lines.set(line_offset, true);
            }
        }
        ctrl.page_policy_hit(p.tag, class, p.set, &mut counter_access, hit_way);
        if req.kind.is_writeback() {
            ctrl.stats.store_hit.inc();
            ctrl.tags.set_mut(p.set).ways[hit_way as usize].dirty = true;
        } else {
            ctrl.stats.load_hit.inc();
        }

        // push the LRU position back into the in-DRAM metadata line
        if !ctrl.ideal {
            ctrl.mc_access(
                channel,
                TimingRequest::write(near_addr, req.cycle),
                Priority::Background,
                4,
            );
        }
        ctrl.stats.total_invalid.add(64);
        ctrl.stats.tag_store.inc();
    } else {
        let cur_cycle = req.cycle;
        ctrl.stats.total_miss.inc();
        ctrl.misses_per_step += 1;
        match class {
            AccessClass::Load => ctrl.stats.load_miss.inc(),
            AccessClass::Store => ctrl.stats.store_miss.inc(),
        }

        let replace_way = if enabled {
            ctrl.page_policy_miss(p.tag, class, p.set, &mut counter_access)
        } else {
            ctrl.num_ways
        };

        if class == AccessClass::Load || replace_way >= ctrl.num_ways {
            let treq = TimingRequest {
                addr: req.line_addr,
                is_write: req.kind.is_writeback(),
                cycle: req.cycle,
            };
            req.cycle = ctrl.ext_cxl_access(treq, Priority::Pipelined, 4);
        }
        data_ready = req.cycle;

        if replace_way < ctrl.num_ways {
            used_way = replace_way;
            let fill_burst = (ctrl.lines_per_page * 4) as u32;
            let page_base = p.tag * ctrl.lines_per_page;
            ctrl.ext_cxl_access(
                TimingRequest::read(page_base, req.cycle),
                Priority::Background,
                fill_burst,
            );
            ctrl.mc_access(
                channel,
                TimingRequest::write(near_addr, req.cycle),
                Priority::Background,
                fill_burst,
            );
            if !ctrl.ideal {
                // tag store is a 64 B read-modify-write
                ctrl.mc_access(
                    channel,
                    TimingRequest::write(near_addr, req.cycle),
                    Priority::Background,
                    4,
                );
            }
            ctrl.stats.total_invalid.add(64);
            ctrl.stats.tag_store.inc();
            ctrl.stats.placement.inc();

            let (was_valid, was_dirty, old_tag, dirty_line_count) = {
                let way = &ctrl.tags.set(p.set).ways[replace_way as usize];
                (way.valid, way.dirty, way.tag, way.dirty_line_count() as u32)
            };
            if was_valid {
                ctrl.footprints.evict(old_tag);
                ctrl.recent_tag.invalidate();
                if let Some(remap) = ctrl.remap.as_mut() {
                    // the displaced page maps back onto itself
                    let old_base = old_tag * ctrl.lines_per_page;
                    remap.update(old_base, old_base);
                }
                if was_dirty {
                    ctrl.stats.dirty_evict.inc();
                    assert!(dirty_line_count > 0, "dirty page with clean line mask");
                    ctrl.mc_access(
                        channel,
                        TimingRequest::read(near_addr, cur_cycle),
                        Priority::Background,
                        dirty_line_count * 4,
                    );
                    ctrl.ext_cxl_access(
                        TimingRequest::write(old_tag * ctrl.lines_per_page, cur_cycle),
                        Priority::Background,
                        dirty_line_count * 4,
                    );
                } else {
                    ctrl.stats.clean_evict.inc();
                }
            }
            ctrl.tags
                .install(p.set, replace_way as usize, p.tag, req.kind.is_writeback());
            {
                let way = &mut ctrl.tags.set_mut(p.set).ways[replace_way as usize];
                way.valid_lines.set(line_offset, true);
                if store {
                    way.dirty_lines.set(line_offset, true);
                }
            }
            ctrl.footprints.entry(p.tag).way = Some(replace_way);
            if ctrl.remap.is_some() {
                let slot = page_slot_addr(ctrl, p.set, replace_way);
                ctrl.remap
                    .as_mut()
                    .expect("remap index")
                    .update(page_base, slot);
            }
        }
    }

    if used_way < ctrl.num_ways {
        ctrl.recent_tag.update(p.set, p.tag, used_way);
    }
    data_ready
}
