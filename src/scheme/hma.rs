use super::decompose;
use crate::mc::Ctrl;
use crate::mem_req::{AccessClass, Request};
use crate::timing::{Priority, TimingRequest};

/// OS-driven placement: the controller only observes accesses and charges
/// the data movement; migration happens in `remap_pages` quanta.
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let p = decompose(ctrl, req.line_addr);
    let class = req.kind.access_class();

    let entry = ctrl.footprints.entry(p.tag);
    entry.count += 1;
    let hit_way = entry.way;
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

    ctrl.os_policy_access(p.tag, class);

    let data_ready;
    if let Some(hit_way) = hit_way {
        ctrl.hits_per_step += 1;
        if req.kind.is_writeback() {
            ctrl.stats.store_hit.inc();
            ctrl.tags.set_mut(p.set).ways[hit_way as usize].dirty = true;
        } else {
            ctrl.stats.load_hit.inc();
        }
        let treq = TimingRequest {
            addr: p.near_addr,
            is_write: req.kind.is_writeback(),
            cycle: req.cycle,
        };
        req.cycle = ctrl.mc_access(p.channel, treq, Priority::Critical, 4);
        data_ready = req.cycle;
    } else {
        ctrl.misses_per_step += 1;
        match class {
            AccessClass::Load => ctrl.stats.load_miss.inc(),
            AccessClass::Store => ctrl.stats.store_miss.inc(),
        }
        let treq = TimingRequest {
            addr: req.line_addr,
            is_write: req.kind.is_writeback(),
            cycle: req.cycle,
        };
        req.cycle = ctrl.ext_access(treq, Priority::Critical, 4);
        data_ready = req.cycle;
    }
    data_ready
}
