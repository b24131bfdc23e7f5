use super::decompose;
use crate::mc::Ctrl;
use crate::mem_req::{AccessClass, Request};
use crate::timing::{Priority, TimingRequest};

/// Direct-mapped cache at line granularity. Tag and data travel together
/// as one 96 B TAD unit, so a load pays for six burst units up front and
/// learns hit/miss only when they arrive.
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let p = decompose(ctrl, req.line_addr);
    let class = req.kind.access_class();
    let enabled = p.set >= ctrl.ds_index;

    let hit = {
        let way = &ctrl.tags.set(p.set).ways[0];
        enabled && way.valid && way.tag == p.tag
    };
    log::trace!(
        "{}: alloy {:?} addr={:#x} set={} hit={hit}",
        ctrl.name,
        req.kind,
        req.line_addr,
        p.set
    );

    if class == AccessClass::Load && enabled {
        if ctrl.sram_tag {
            // tag check against the SRAM copy
            req.cycle += ctrl.llc_latency;
        } else {
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::read(p.near_addr, req.cycle),
                Priority::Critical,
                6,
            );
            ctrl.stats.tag_load.inc();
        }
    }

    let mut data_ready = req.cycle;
    if !hit {
        let cur_cycle = req.cycle;
        ctrl.misses_per_step += 1;
        match class {
            AccessClass::Load => ctrl.stats.load_miss.inc(),
            AccessClass::Store => ctrl.stats.store_miss.inc(),
        }

        let install = enabled && ctrl.line_policy_miss(p.set);

        if class == AccessClass::Load {
            // the TAD probe already covers the tag check, so the line read
            // pipelines behind it
            let prio = if !ctrl.sram_tag && enabled {
                Priority::Pipelined
            } else {
                Priority::Critical
            };
            req.cycle = ctrl.ext_access(TimingRequest::read(req.line_addr, req.cycle), prio, 4);
        } else if !install {
            req.cycle = ctrl.ext_access(
                TimingRequest::write(req.line_addr, req.cycle),
                Priority::Critical,
                4,
            );
        } else {
            // fetch-on-write: read the line before overwriting it in place
            req.cycle = ctrl.ext_access(
                TimingRequest::read(req.line_addr, req.cycle),
                Priority::Critical,
                4,
            );
        }
        data_ready = req.cycle;

        if install {
            let burst = if ctrl.sram_tag { 4 } else { 6 };
            ctrl.mc_access(
                p.channel,
                TimingRequest::write(p.near_addr, req.cycle),
                Priority::Background,
                burst,
            );
            ctrl.stats.tag_store.inc();
            ctrl.stats.placement.inc();

            let (was_valid, was_dirty, old_tag) = {
                let way = &ctrl.tags.set(p.set).ways[0];
                (way.valid, way.dirty, way.tag)
            };
            if was_valid {
                if was_dirty {
                    ctrl.stats.dirty_evict.inc();
                    if class == AccessClass::Store && ctrl.sram_tag {
                        // the victim line must be fetched before it can be
                        // written back
                        ctrl.mc_access(
                            p.channel,
                            TimingRequest::read(p.near_addr, cur_cycle),
                            Priority::Background,
                            4,
                        );
                    }
                    // at 64 B granularity the tag is the line address
                    ctrl.ext_access(
                        TimingRequest::write(old_tag, cur_cycle),
                        Priority::Background,
                        4,
                    );
                } else {
                    ctrl.stats.clean_evict.inc();
                }
            }
            ctrl.tags.install(p.set, 0, p.tag, req.kind.is_writeback());
        }
    } else {
        assert!(enabled, "hit in a bypassed set {}", p.set);
        if class == AccessClass::Load && ctrl.sram_tag {
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::read(p.near_addr, req.cycle),
                Priority::Critical,
                4,
            );
        }
        if class == AccessClass::Store {
            req.cycle = ctrl.mc_access(
                p.channel,
                TimingRequest::write(p.near_addr, req.cycle),
                Priority::Critical,
                4,
            );
        }
        data_ready = req.cycle;
        ctrl.hits_per_step += 1;
        if req.kind.is_writeback() {
            ctrl.stats.store_hit.inc();
            ctrl.tags.set_mut(p.set).ways[0].dirty = true;
        } else {
            ctrl.stats.load_hit.inc();
        }
    }
    data_ready
}
