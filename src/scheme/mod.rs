pub(crate) mod alloy;
pub(crate) mod basic;
pub(crate) mod hma;
pub(crate) mod hybrid;
pub(crate) mod tagless;
pub(crate) mod trimma;
pub(crate) mod unison;

use crate::address;
use crate::mc::Ctrl;
use crate::mem_req::Request;
use crate::timing::{Priority, TimingRequest};

/// Quantities every handler derives from the line address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AddrParts {
    /// Near-tier channel responsible for the block.
    pub channel: usize,
    /// Channel-interleaved address seen by the near tier.
    pub near_addr: address,
    /// Page identifier.
    pub tag: address,
    pub set: u64,
}

pub(crate) fn decompose(ctrl: &Ctrl, addr: address) -> AddrParts {
    let chunk = addr / 64;
    let channel = (chunk % ctrl.mcdram_per_mc) as usize;
    let near_addr = (chunk / ctrl.mcdram_per_mc * 64) | (addr % 64);
    let tag = addr / ctrl.lines_per_page;
    let set = tag % ctrl.num_sets;
    AddrParts {
        channel,
        near_addr,
        tag,
        set,
    }
}

/// Burst units needed to read a whole set's tags (4 B each, 64 B minimum).
pub(crate) fn set_tag_burst(num_ways: u32) -> u32 {
    (num_ways * 4 / 16).max(4)
}

/// Bytes of a set-tag fetch that carry no payload.
pub(crate) fn set_tag_bytes(num_ways: u32) -> u64 {
    u64::from(num_ways * 4).max(64)
}

/// Forward everything to the far tier.
pub(crate) fn no_cache(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let treq = TimingRequest {
        addr: req.line_addr,
        is_write: req.kind.is_writeback(),
        cycle: req.cycle,
    };
    let cycle = ctrl.ext_access(treq, Priority::Critical, 4);
    // a hit in memory
    ctrl.stats.load_hit.inc();
    cycle
}

/// Forward everything to the near tier.
pub(crate) fn cache_only(ctrl: &mut Ctrl, req: &mut Request) -> u64 {
    let parts = decompose(ctrl, req.line_addr);
    let treq = TimingRequest {
        addr: parts.near_addr,
        is_write: req.kind.is_writeback(),
        cycle: req.cycle,
    };
    let cycle = ctrl.mc_access(parts.channel, treq, Priority::Critical, 4);
    ctrl.stats.load_hit.inc();
    cycle
}

#[cfg(test)]
mod tests {
    use super::{set_tag_burst, set_tag_bytes};

    #[test]
    fn set_tag_fetch_is_at_least_one_line() {
        assert_eq!(set_tag_burst(1), 4);
        assert_eq!(set_tag_burst(16), 4);
        assert_eq!(set_tag_burst(32), 8);
        assert_eq!(set_tag_bytes(4), 64);
        assert_eq!(set_tag_bytes(32), 128);
    }
}
