use super::{basic, decompose};
use crate::mc::Ctrl;
use crate::mem_req::Request;
use crate::remap::Resolution;
use crate::timing::{Priority, TimingRequest};

/// Cache-mode remapping: the near tier is addressed through a multi-level
/// remapping index instead of classical tags.
///
/// Both SRAM caches are probed in parallel (so an SRAM hit costs nothing
/// on top of the data path); only a double miss pays for the serial
/// off-chip walk of the tree. Installation keeps the index and the
/// NonIdCache current through [`crate::remap::RemapIndex::update`].
pub(crate) fn access(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let pa = req.line_addr;
    let resolution = ctrl.remap.as_mut().expect("remap index").resolve(pa);
    let da = resolution.device_addr(pa);

    if let Resolution::Walk { reads, .. } = resolution {
        // worst-case L+1 reads, serially dependent
        let meta = decompose(ctrl, da);
        for _ in 0..reads {
            req.cycle = ctrl.mc_access(
                meta.channel,
                TimingRequest::read(meta.near_addr, req.cycle),
                Priority::Critical,
                2,
            );
            ctrl.stats.tag_load.inc();
        }
    }

    // tag/set are derived from the physical address; the near tier sees
    // the remapped device address
    let p = decompose(ctrl, pa);
    let d = decompose(ctrl, da);
    basic::run(ctrl, req, p, d.channel, d.near_addr)
}
