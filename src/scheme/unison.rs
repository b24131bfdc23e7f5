use super::decompose;
use crate::mc::Ctrl;
use crate::mem_req::{AccessClass, Request};
use crate::timing::{Priority, TimingRequest};

/// Set-associative page cache with tags embedded in the near tier.
///
/// Tags ride along with the data, so every lookup pays a TAD or probe
/// access up front; only the footprint lines of a page move on fill, and
/// only its dirty lines move on eviction. The far tier sits behind the
/// CXL latency path.
///
/// With `ideal` set, the tag probe and the LRU write-back are suppressed
/// to expose the metadata overhead, but every counter still moves.
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let p = decompose(ctrl, req.line_addr);
    let class = req.kind.access_class();
    let store = class == AccessClass::Store;
    let enabled = p.set >= ctrl.ds_index;

    ctrl.footprints.entry(p.tag);
    let hit_way = ctrl.footprints.resident_way(p.tag);
    log::trace!(
        "{}: unison {:?} tag={:#x} set={} way={hit_way:?}",
        ctrl.name,
        req.kind,
        p.tag,
        p.set
    );
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

    // tag and data travel together: loads pull a 96 B TAD, stores only
    // probe a 32 B tag slice
    let probe_burst = if store { 2 } else { 6 };
    if !ctrl.ideal {
        req.cycle = ctrl.mc_access(
            p.channel,
            TimingRequest::read(p.near_addr, req.cycle),
            Priority::Critical,
            probe_burst,
        );
    }
    ctrl.stats.tag_load.inc();
    // the critical value is only the tag, so the rest is overhead
    ctrl.stats.total_invalid.add(if store { 32 } else { 64 });

    let mut counter_access = false;
    let data_ready;

    if let Some(hit_way) = hit_way {
        ctrl.stats.total_hit.inc();
        // the matching tag itself is pure overhead
        ctrl.stats.total_invalid.add(4);
        assert!(enabled, "hit in a bypassed set {}", p.set);

        if store {
            // LLC dirty eviction hit
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::write(p.near_addr, req.cycle),
                Priority::Pipelined,
                4,
            );
        }
        data_ready = req.cycle;
        ctrl.hits_per_step += 1;
        ctrl.page_policy_hit(p.tag, class, p.set, &mut counter_access, hit_way);
        ctrl.stats.total_valid.add(64);

        if req.kind.is_writeback() {
            ctrl.stats.store_hit.inc();
            ctrl.tags.set_mut(p.set).ways[hit_way as usize].dirty = true;
        } else {
            ctrl.stats.load_hit.inc();
        }

        // push the page's LRU position back into the in-DRAM tags
        if ctrl.ideal {
            ctrl.mc_bw_per_step += 2;
        } else {
            ctrl.mc_access(
                p.channel,
                TimingRequest::write(p.near_addr, req.cycle),
                Priority::Background,
                2,
            );
        }
        ctrl.stats.tag_store.inc();
        ctrl.footprints.touch(p.tag, req.line_addr, store);
        ctrl.stats.total_policy.add(4);
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

        if class == AccessClass::Load {
            req.cycle = ctrl.ext_cxl_access(
                TimingRequest::read(req.line_addr, req.cycle),
                Priority::Pipelined,
                4,
            );
        } else if replace_way >= ctrl.num_ways {
            req.cycle = ctrl.ext_cxl_access(
                TimingRequest::write(req.line_addr, req.cycle),
                Priority::Pipelined,
                4,
            );
        }
        data_ready = req.cycle;

        if replace_way < ctrl.num_ways {
            let fill_burst = ctrl.footprint_size * 4;
            let page_base = p.tag * ctrl.lines_per_page;
            // pull the footprint from the far tier and stream it into the
            // near tier
            ctrl.ext_cxl_access(
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
            if !ctrl.sram_tag && !ctrl.ideal {
                // tag store is a 64 B read-modify-write
                ctrl.mc_access(
                    p.channel,
                    TimingRequest::write(p.near_addr, req.cycle),
                    Priority::Background,
                    4,
                );
                ctrl.stats.total_invalid.add(64);
            }
            ctrl.stats.tag_store.inc();
            ctrl.stats.placement.inc();
            ctrl.stats.total_migrate.add(ctrl.granularity - 64);

            let (was_valid, was_dirty, old_tag) = {
                let way = &ctrl.tags.set(p.set).ways[replace_way as usize];
                (way.valid, way.dirty, way.tag)
            };
            if was_valid {
                let (touched_lines, dirty_lines) = ctrl.footprints.evict(old_tag);
                assert!(
                    touched_lines > 0 && touched_lines <= 64 && dirty_lines <= 64,
                    "footprint corrupt for evicted tag {old_tag:#x}"
                );
                ctrl.stats.total_touch_lines.add(u64::from(touched_lines));
                ctrl.stats.total_evict_lines.add(u64::from(dirty_lines));

                if was_dirty {
                    ctrl.stats.dirty_evict.inc();
                    assert!(dirty_lines > 0, "dirty page with clean footprint");
                    ctrl.mc_access(
                        p.channel,
                        TimingRequest::read(p.near_addr, cur_cycle),
                        Priority::Background,
                        dirty_lines * 4,
                    );
                    ctrl.ext_cxl_access(
                        TimingRequest::write(old_tag * ctrl.lines_per_page, cur_cycle),
                        Priority::Background,
                        dirty_lines * 4,
                    );
                    ctrl.stats.total_migrate.add(u64::from(dirty_lines) * 64);
                } else {
                    ctrl.stats.clean_evict.inc();
                    assert!(dirty_lines == 0, "clean page with dirty footprint");
                }
            }
            ctrl.tags
                .install(p.set, replace_way as usize, p.tag, req.kind.is_writeback());
            ctrl.footprints
                .note_fill(p.tag, replace_way, req.line_addr, store);
        } else {
            panic!("UnisonCache miss without a replacement candidate");
        }
    }

    if counter_access && !ctrl.sram_tag {
        assert!(enabled, "counter access in a bypassed set {}", p.set);
        ctrl.charge_counter_access(p.channel, p.near_addr, req.cycle);
    }
    data_ready
}
