use super::decompose;
use crate::mc::Ctrl;
use crate::mem_req::{AccessClass, Request};
use crate::timing::{Priority, TimingRequest};

/// Page cache whose metadata traffic is filtered by the TagBuffer: a
/// store whose page is tracked there skips the in-DRAM tag probe.
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let p = decompose(ctrl, req.line_addr);
    let class = req.kind.access_class();
    let enabled = p.set >= ctrl.ds_index;

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

    // an untracked dirty eviction must probe the physical tags first
    let mut tag_probe_needed = false;
    if class == AccessClass::Store {
        let tb = ctrl.tag_buffer.as_ref().expect("tag buffer");
        if tb.exist_in_tb(p.tag) == tb.num_ways() && enabled {
            ctrl.stats.tb_dirty_miss.inc();
            if !ctrl.sram_tag {
                tag_probe_needed = true;
            }
        } else {
            ctrl.stats.tb_dirty_hit.inc();
        }
    }
    if ctrl.sram_tag {
        req.cycle += ctrl.llc_latency;
    }

    let mut counter_access = false;
    let data_ready;

    if let Some(hit_way) = hit_way {
        assert!(enabled, "hit in a bypassed set {}", p.set);
        ctrl.hits_per_step += 1;
        ctrl.page_policy_hit(p.tag, class, p.set, &mut counter_access, hit_way);
        if req.kind.is_writeback() {
            ctrl.stats.store_hit.inc();
            ctrl.tags.set_mut(p.set).ways[hit_way as usize].dirty = true;
        } else {
            ctrl.stats.load_hit.inc();
        }

        if tag_probe_needed {
            assert!(!ctrl.sram_tag);
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::read(p.near_addr, req.cycle),
                Priority::Critical,
                2,
            );
            ctrl.stats.tag_load.inc();
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::write(p.near_addr, req.cycle),
                Priority::Pipelined,
                4,
            );
            data_ready = req.cycle;
        } else {
            let treq = TimingRequest {
                addr: p.near_addr,
                is_write: req.kind.is_writeback(),
                cycle: req.cycle,
            };
            req.cycle = ctrl.mc_access(p.channel, treq, Priority::Critical, 4);
            data_ready = req.cycle;
            if class == AccessClass::Load
                && ctrl.tag_buffer.as_ref().expect("tag buffer").can_insert(p.tag)
            {
                ctrl.tag_buffer
                    .as_mut()
                    .expect("tag buffer")
                    .insert(p.tag, false);
            }
        }
    } else {
        let cur_cycle = req.cycle;
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

        if tag_probe_needed {
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::read(p.near_addr, req.cycle),
                Priority::Critical,
                2,
            );
            ctrl.stats.tag_load.inc();
            let treq = TimingRequest {
                addr: req.line_addr,
                is_write: req.kind.is_writeback(),
                cycle: req.cycle,
            };
            req.cycle = ctrl.ext_access(treq, Priority::Pipelined, 4);
        } else {
            let treq = TimingRequest {
                addr: req.line_addr,
                is_write: req.kind.is_writeback(),
                cycle: req.cycle,
            };
            req.cycle = ctrl.ext_access(treq, Priority::Critical, 4);
        }
        data_ready = req.cycle;

        if replace_way < ctrl.num_ways {
            let fill_burst = (ctrl.lines_per_page * 4) as u32;
            let page_base = p.tag * ctrl.lines_per_page;
            ctrl.ext_access(
                TimingRequest::read(page_base, req.cycle),
                Priority::Background,
                fill_burst,
            );
            ctrl.mc_access(
                p.channel,
                TimingRequest::write(p.near_addr, req.cycle),
                Priority::Background,
                fill_burst,
            );
            if !ctrl.sram_tag {
                // store the tag alongside the page
                ctrl.mc_access(
                    p.channel,
                    TimingRequest::write(p.near_addr, req.cycle),
                    Priority::Background,
                    2,
                );
            }
            ctrl.stats.tag_store.inc();
            ctrl.stats.placement.inc();

            let (was_valid, was_dirty, old_tag) = {
                let way = &ctrl.tags.set(p.set).ways[replace_way as usize];
                (way.valid, way.dirty, way.tag)
            };
            if was_valid {
                // both the incoming and the displaced page become remapped
                let tb = ctrl.tag_buffer.as_mut().expect("tag buffer");
                assert!(
                    tb.can_insert_pair(p.tag, old_tag),
                    "tag buffer cannot track remap pair {:#x}/{old_tag:#x}",
                    p.tag
                );
                tb.insert(p.tag, true);
                tb.insert(old_tag, true);

                ctrl.footprints.evict(old_tag);
                if was_dirty {
                    ctrl.stats.dirty_evict.inc();
                    ctrl.mc_access(
                        p.channel,
                        TimingRequest::read(p.near_addr, cur_cycle),
                        Priority::Background,
                        fill_burst,
                    );
                    ctrl.ext_access(
                        TimingRequest::write(old_tag * ctrl.lines_per_page, cur_cycle),
                        Priority::Background,
                        fill_burst,
                    );
                } else {
                    ctrl.stats.clean_evict.inc();
                }
            }
            ctrl.tags
                .install(p.set, replace_way as usize, p.tag, req.kind.is_writeback());
            ctrl.footprints.entry(p.tag).way = Some(replace_way);
        } else if class == AccessClass::Load
            && ctrl.tag_buffer.as_ref().expect("tag buffer").can_insert(p.tag)
        {
            // bypassed, but remember the page for later stores
            ctrl.tag_buffer
                .as_mut()
                .expect("tag buffer")
                .insert(p.tag, false);
        }
    }

    if counter_access && !ctrl.sram_tag {
        assert!(enabled, "counter access in a bypassed set {}", p.set);
        ctrl.charge_counter_access(p.channel, p.near_addr, req.cycle);
    }
    data_ready
}
