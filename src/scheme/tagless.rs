use super::decompose;
use crate::mc::Ctrl;
use crate::mem_req::{AccessClass, Request};
use crate::timing::{Priority, TimingRequest};

/// Single-set fully-associative page cache with FIFO replacement.
///
/// Page locations are tracked by the host's page tables instead of an
/// in-DRAM tag array, so lookups are free; every replacement pays two
/// far-tier touches to keep the global inverted page table current.
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let p = decompose(ctrl, req.line_addr);
    let class = req.kind.access_class();
    let store = class == AccessClass::Store;

    ctrl.footprints.entry(p.tag);
    let hit_way = ctrl.footprints.resident_way(p.tag);
    if let Some(way) = hit_way {
        let resident = &ctrl.tags.set(p.set).ways[way as usize];
        assert!(
            resident.valid && resident.tag == p.tag,
            "footprint points at way {way} but tag {:#x} is not there",
            p.tag
        );
    }
    // no absence scan: with one set and thousands of ways it would
    // dominate simulation time

    let data_ready;
    if let Some(hit_way) = hit_way {
        ctrl.hits_per_step += 1;
        let treq = TimingRequest {
            addr: p.near_addr,
            is_write: req.kind.is_writeback(),
            cycle: req.cycle,
        };
        req.cycle = ctrl.mc_access(p.channel, treq, Priority::Critical, 4);
        data_ready = req.cycle;

        ctrl.footprints.touch(p.tag, req.line_addr, store);
        if req.kind.is_writeback() {
            ctrl.stats.store_hit.inc();
            ctrl.tags.set_mut(p.set).ways[hit_way as usize].dirty = true;
        } else {
            ctrl.stats.load_hit.inc();
        }
    } else {
        let cur_cycle = req.cycle;
        ctrl.misses_per_step += 1;
        match class {
            AccessClass::Load => ctrl.stats.load_miss.inc(),
            AccessClass::Store => ctrl.stats.store_miss.inc(),
        }

        // FIFO cursor; every miss installs
        let replace_way = ctrl.next_evict;
        ctrl.next_evict = (ctrl.next_evict + 1) % ctrl.num_ways;

        let treq = TimingRequest {
            addr: req.line_addr,
            is_write: req.kind.is_writeback(),
            cycle: req.cycle,
        };
        req.cycle = ctrl.ext_access(treq, Priority::Critical, 4);
        data_ready = req.cycle;

        let fill_burst = ctrl.footprint_size * 4;
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
        // update the global inverted page table in the far tier
        ctrl.ext_access(
            TimingRequest::read(page_base, req.cycle),
            Priority::Background,
            2,
        );
        ctrl.ext_access(
            TimingRequest::write(page_base, req.cycle),
            Priority::Background,
            2,
        );
        ctrl.stats.tag_store.inc();
        ctrl.stats.placement.inc();

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
                ctrl.ext_access(
                    TimingRequest::write(old_tag * ctrl.lines_per_page, cur_cycle),
                    Priority::Background,
                    dirty_lines * 4,
                );
                // the displaced page's inverted-page-table entry moves too
                ctrl.ext_access(
                    TimingRequest::read(page_base, req.cycle),
                    Priority::Background,
                    2,
                );
                ctrl.ext_access(
                    TimingRequest::write(page_base, req.cycle),
                    Priority::Background,
                    2,
                );
            } else {
                ctrl.stats.clean_evict.inc();
                assert!(dirty_lines == 0, "clean page with dirty footprint");
            }
        }
        ctrl.tags
            .install(p.set, replace_way as usize, p.tag, req.kind.is_writeback());
        ctrl.footprints
            .note_fill(p.tag, replace_way, req.line_addr, store);
    }
    data_ready
}
