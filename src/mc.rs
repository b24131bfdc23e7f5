use crate::config::{self, Scheme};
use crate::footprint::FootprintTable;
use crate::mem_req::{AccessClass, CoherenceState, Kind, Request};
use crate::placement::{
    AlwaysInstall, LinePlacement, LruPagePolicy, NullOsPolicy, OsPlacement, PagePlacement,
};
use crate::remap::RemapIndex;
use crate::scheme;
use crate::sync::Mutex;
use crate::tag_array::TagArray;
use crate::tag_buffer::{RecentTag, TagBuffer};
use crate::timing::{self, Priority, TimingModel, TimingRequest};
use crate::trace::TraceSink;
use crate::address;
use color_eyre::eyre;

/// One memory controller per simulated channel.
///
/// A single mutex guards the whole mutable state for the duration of a
/// scheme-handler call; real controllers serialise at their queue, so
/// finer locking would only model parallelism that does not exist.
pub struct MemoryController {
    name: String,
    scheme: Scheme,
    state: Mutex<Ctrl>,
}

/// Everything behind the controller lock.
pub(crate) struct Ctrl {
    pub(crate) name: String,
    pub(crate) scheme: Scheme,

    pub(crate) granularity: u64,
    pub(crate) lines_per_page: u64,
    pub(crate) num_ways: u32,
    pub(crate) num_sets: u64,
    pub(crate) footprint_size: u32,
    pub(crate) mcdram_per_mc: u64,
    pub(crate) sram_tag: bool,
    pub(crate) llc_latency: u64,
    pub(crate) ideal: bool,
    bw_balance: bool,
    os_quantum: u64,
    step_length: u64,

    pub(crate) ext: Box<dyn TimingModel>,
    pub(crate) near: Vec<Box<dyn TimingModel>>,

    pub(crate) tags: TagArray,
    pub(crate) footprints: FootprintTable,
    pub(crate) tag_buffer: Option<TagBuffer>,
    pub(crate) recent_tag: RecentTag,
    pub(crate) remap: Option<RemapIndex>,

    line_policy: Option<Box<dyn LinePlacement>>,
    page_policy: Option<Box<dyn PagePlacement>>,
    os_policy: Option<Box<dyn OsPlacement>>,

    /// FIFO replacement cursor (Tagless).
    pub(crate) next_evict: u32,
    /// Sets below this index bypass the cache (BW-balance).
    pub(crate) ds_index: u64,

    pub(crate) num_requests: u64,
    pub(crate) hits_per_step: u64,
    pub(crate) misses_per_step: u64,
    pub(crate) mc_bw_per_step: u64,
    pub(crate) ext_bw_per_step: u64,

    pub(crate) stats: stats::MemoryController,
    trace: Option<TraceSink>,
}

impl MemoryController {
    /// Build a controller with the in-crate timing back-ends.
    ///
    /// `trace_identity` names the channel allowed to write the line trace;
    /// pass the controller's own name to make it the tracing channel.
    pub fn new(
        name: impl Into<String>,
        cfg: &config::MemCtrl,
        trace_identity: Option<&str>,
    ) -> eyre::Result<Self> {
        let name = name.into();
        let ext = timing::build(&cfg.ext_dram, &format!("{name}-ext"), cfg.dram_timing_scale)?;
        let near = (0..cfg.mcdram_per_mc)
            .map(|i| {
                timing::build(
                    &cfg.mcdram,
                    &format!("{name}-mc-{i}"),
                    cfg.dram_timing_scale,
                )
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        Self::with_backends(name, cfg, trace_identity, ext, near)
    }

    /// Build a controller around externally supplied timing back-ends
    /// (DDR, DRAMSim, or instrumented models).
    pub fn with_backends(
        name: impl Into<String>,
        cfg: &config::MemCtrl,
        trace_identity: Option<&str>,
        ext: Box<dyn TimingModel>,
        near: Vec<Box<dyn TimingModel>>,
    ) -> eyre::Result<Self> {
        let name = name.into();
        cfg.validate()?;
        eyre::ensure!(
            near.len() == cfg.mcdram_per_mc as usize,
            "expected {} near-tier channels, got {}",
            cfg.mcdram_per_mc,
            near.len()
        );

        let scheme = cfg.cache_scheme;
        let trace = if cfg.enable_trace && trace_identity == Some(name.as_str()) {
            Some(TraceSink::create(&cfg.trace_dir, &name)?)
        } else {
            None
        };

        let line_policy: Option<Box<dyn LinePlacement>> = match scheme {
            Scheme::AlloyCache => Some(Box::new(AlwaysInstall)),
            _ => None,
        };
        let page_policy: Option<Box<dyn PagePlacement>> = match scheme {
            Scheme::UnisonCache
            | Scheme::HybridCache
            | Scheme::BasicCache
            | Scheme::Trimma => Some(Box::<LruPagePolicy>::default()),
            _ => None,
        };
        let os_policy: Option<Box<dyn OsPlacement>> = match scheme {
            Scheme::HMA => Some(Box::<NullOsPolicy>::default()),
            _ => None,
        };

        let ctrl = Ctrl {
            name: name.clone(),
            scheme,
            granularity: cfg.cache_granularity,
            lines_per_page: cfg.lines_per_page(),
            num_ways: cfg.num_ways,
            num_sets: cfg.num_sets(),
            footprint_size: cfg.footprint_size,
            mcdram_per_mc: u64::from(cfg.mcdram_per_mc),
            sram_tag: cfg.sram_tag,
            llc_latency: cfg.llc_latency,
            ideal: cfg.ideal,
            bw_balance: cfg.bw_balance,
            os_quantum: cfg.os_quantum,
            step_length: cfg.step_length(),
            ext,
            near,
            tags: TagArray::new(cfg.num_sets(), cfg.num_ways, cfg.lines_per_page()),
            footprints: FootprintTable::new(cfg.lines_per_page()),
            tag_buffer: (scheme == Scheme::HybridCache)
                .then(|| TagBuffer::new(cfg.tag_buffer_size)),
            recent_tag: RecentTag::default(),
            remap: (scheme == Scheme::Trimma).then(RemapIndex::default),
            line_policy,
            page_policy,
            os_policy,
            next_evict: 0,
            ds_index: 0,
            num_requests: 0,
            hits_per_step: 0,
            misses_per_step: 0,
            mc_bw_per_step: 0,
            ext_bw_per_step: 0,
            stats: stats::MemoryController::default(),
            trace,
        };
        Ok(Self {
            name,
            scheme,
            state: Mutex::new(ctrl),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Swap in an external line-placement policy (AlloyCache).
    pub fn set_line_policy(&self, policy: Box<dyn LinePlacement>) {
        self.state.lock().line_policy = Some(policy);
    }

    /// Swap in an external page-placement policy.
    pub fn set_page_policy(&self, policy: Box<dyn PagePlacement>) {
        self.state.lock().page_policy = Some(policy);
    }

    /// Swap in an external OS placement policy (HMA).
    pub fn set_os_policy(&self, policy: Box<dyn OsPlacement>) {
        self.state.lock().os_policy = Some(policy);
    }

    #[must_use]
    pub fn num_requests(&self) -> u64 {
        self.state.lock().num_requests
    }

    /// Recent miss rate over the current EWMA window.
    #[must_use]
    pub fn recent_miss_rate(&self) -> f64 {
        let ctrl = self.state.lock();
        let total = ctrl.hits_per_step + ctrl.misses_per_step;
        if total == 0 {
            return 0.0;
        }
        ctrl.misses_per_step as f64 / total as f64
    }

    /// Snapshot of the controller's counters.
    #[must_use]
    pub fn stats(&self) -> stats::MemoryController {
        self.state.lock().stats.clone()
    }

    /// Process one LLC miss and return its completion cycle.
    ///
    /// The coherence state is set on return: evictions invalidate, shared
    /// loads honour the no-exclusive hint, exclusive loads take ownership.
    pub fn access(&self, req: &mut Request) -> u64 {
        req.state = match req.kind {
            Kind::SilentEvict | Kind::WriteBack => CoherenceState::Invalid,
            Kind::LoadShared => {
                if req.no_exclusive {
                    CoherenceState::Shared
                } else {
                    CoherenceState::Exclusive
                }
            }
            Kind::LoadExclusive => CoherenceState::Modified,
        };
        // clean downgrades never reach the memory
        if req.kind == Kind::SilentEvict {
            return req.cycle;
        }

        let arrival = req.cycle;
        let mut ctrl = self.state.lock();
        if let Some(sink) = ctrl.trace.as_mut() {
            sink.record(req.line_addr, req.kind.is_writeback());
        }
        ctrl.num_requests += 1;

        let completion = match ctrl.scheme {
            Scheme::NoCache => scheme::no_cache(&mut ctrl, req),
            Scheme::CacheOnly => scheme::cache_only(&mut ctrl, req),
            Scheme::AlloyCache => scheme::alloy::access(&mut ctrl, req),
            Scheme::UnisonCache => scheme::unison::access(&mut ctrl, req),
            Scheme::HMA => scheme::hma::access(&mut ctrl, req),
            Scheme::HybridCache => scheme::hybrid::access(&mut ctrl, req),
            Scheme::Tagless => scheme::tagless::access(&mut ctrl, req),
            Scheme::BasicCache => scheme::basic::access(&mut ctrl, req),
            Scheme::Trimma => scheme::trimma::access(&mut ctrl, req),
        };
        debug_assert!(completion >= arrival);
        ctrl.post_request(completion);
        completion
    }
}

impl Ctrl {
    /// Near-tier access on `channel`, accumulating the BW-balance window.
    pub(crate) fn mc_access(
        &mut self,
        channel: usize,
        req: TimingRequest,
        prio: Priority,
        burst_units: u32,
    ) -> u64 {
        self.mc_bw_per_step += u64::from(burst_units);
        self.near[channel].access(req, prio, burst_units)
    }

    /// Far-tier access, accumulating the BW-balance window.
    pub(crate) fn ext_access(
        &mut self,
        req: TimingRequest,
        prio: Priority,
        burst_units: u32,
    ) -> u64 {
        self.ext_bw_per_step += u64::from(burst_units);
        self.ext.access(req, prio, burst_units)
    }

    /// Far-tier access through the CXL latency path.
    pub(crate) fn ext_cxl_access(
        &mut self,
        req: TimingRequest,
        prio: Priority,
        burst_units: u32,
    ) -> u64 {
        self.ext_bw_per_step += u64::from(burst_units);
        self.ext.cxl_access(req, prio, burst_units)
    }

    pub(crate) fn page_policy_miss(
        &mut self,
        tag: address,
        class: AccessClass,
        set_idx: u64,
        counter_access: &mut bool,
    ) -> u32 {
        let mut policy = self.page_policy.take().expect("page placement policy");
        let way = policy.handle_cache_miss(
            tag,
            class,
            set_idx,
            self.tags.set_mut(set_idx),
            counter_access,
        );
        self.page_policy = Some(policy);
        way
    }

    pub(crate) fn page_policy_hit(
        &mut self,
        tag: address,
        class: AccessClass,
        set_idx: u64,
        counter_access: &mut bool,
        hit_way: u32,
    ) {
        let mut policy = self.page_policy.take().expect("page placement policy");
        policy.handle_cache_hit(
            tag,
            class,
            set_idx,
            self.tags.set_mut(set_idx),
            counter_access,
            hit_way,
        );
        self.page_policy = Some(policy);
    }

    pub(crate) fn line_policy_miss(&mut self, set_idx: u64) -> bool {
        let mut policy = self.line_policy.take().expect("line placement policy");
        let place = policy.handle_cache_miss(&self.tags.set(set_idx).ways[0]);
        self.line_policy = Some(policy);
        place
    }

    pub(crate) fn os_policy_access(&mut self, tag: address, class: AccessClass) {
        if let Some(policy) = self.os_policy.as_mut() {
            policy.handle_cache_access(tag, class);
        }
    }

    /// One frequency-counter read plus write in the near tier on behalf of
    /// the placement policy.
    pub(crate) fn charge_counter_access(&mut self, channel: usize, near_addr: address, cycle: u64) {
        self.stats.counter_access.inc();
        self.mc_access(
            channel,
            TimingRequest::read(near_addr, cycle),
            Priority::Background,
            2,
        );
        self.mc_access(
            channel,
            TimingRequest::write(near_addr, cycle),
            Priority::Background,
            2,
        );
    }

    fn flush_tag_buffer(&mut self, cycle: u64, why: &str) {
        let tb = self.tag_buffer.as_mut().expect("tag buffer");
        log::warn!(
            "{}: tag buffer flush ({why}), occupancy = {:.3}",
            self.name,
            tb.occupancy()
        );
        tb.clear();
        tb.set_clear_time(cycle);
        self.stats.tag_buffer_flush.inc();
    }

    /// Bookkeeping shared by every scheme after the handler returns.
    fn post_request(&mut self, completion: u64) {
        if self.scheme == Scheme::HybridCache {
            let over = self
                .tag_buffer
                .as_ref()
                .is_some_and(|tb| tb.occupancy() > 0.7);
            if over {
                self.flush_tag_buffer(completion, "occupancy");
            }
        }

        if self.scheme == Scheme::HMA && self.num_requests % self.os_quantum == 0 {
            if let Some(policy) = self.os_policy.as_mut() {
                let moved = policy.remap_pages();
                // each migration costs a read plus a write at page size
                self.stats.placement.add(moved * 2);
            }
        }

        if self.num_requests % self.step_length == 0 {
            self.hits_per_step /= 2;
            self.misses_per_step /= 2;
            self.mc_bw_per_step /= 2;
            self.ext_bw_per_step /= 2;
            if self.bw_balance && self.mc_bw_per_step + self.ext_bw_per_step > 0 {
                self.rebalance(completion);
            }
        }
    }

    /// Adjust the disabled-set window so the near/far traffic ratio tracks
    /// the target, flushing dirty content out of newly-disabled sets.
    fn rebalance(&mut self, cycle: u64) {
        let ratio =
            self.mc_bw_per_step as f64 / (self.mc_bw_per_step + self.ext_bw_per_step) as f64;
        // the near tier runs at 4x the far tier's bandwidth
        let target = 0.8;
        let diff = ratio - target;
        let index_step = self.num_sets / 1000;
        let delta = if diff.abs() < 0.02 {
            0
        } else {
            (index_step as f64 * diff / 0.01) as i64
        };
        log::debug!(
            "{}: bw ratio = {ratio:.3}, ds_index {} -> delta {delta}",
            self.name,
            self.ds_index
        );

        if delta > 0 {
            let last = (self.ds_index + delta as u64).min(self.num_sets);
            for set_idx in self.ds_index..last {
                for way_idx in 0..self.num_ways as usize {
                    let (valid, dirty, tag) = {
                        let way = &self.tags.set(set_idx).ways[way_idx];
                        (way.valid, way.dirty, way.tag)
                    };
                    if valid && dirty {
                        let page_base = tag * self.lines_per_page;
                        let burst = (self.lines_per_page * 4) as u32;
                        let parts = scheme::decompose(self, page_base);
                        self.mc_access(
                            parts.channel,
                            TimingRequest::read(parts.near_addr, cycle),
                            Priority::Background,
                            burst,
                        );
                        self.ext_access(
                            TimingRequest::write(page_base, cycle),
                            Priority::Background,
                            burst,
                        );
                    }
                    if self.scheme == Scheme::HybridCache && valid {
                        self.footprints.evict(tag);
                        let refused = !self.tag_buffer.as_ref().expect("tag buffer").can_insert(tag);
                        if refused {
                            self.flush_tag_buffer(cycle, "rebalance");
                        }
                        let tb = self.tag_buffer.as_mut().expect("tag buffer");
                        assert!(tb.can_insert(tag), "tag buffer refused {tag:#x} after flush");
                        tb.insert(tag, true);
                    }
                    let way = &mut self.tags.set_mut(set_idx).ways[way_idx];
                    way.valid = false;
                    way.dirty = false;
                }
                if self.scheme == Scheme::HybridCache {
                    if let Some(policy) = self.page_policy.as_mut() {
                        policy.flush_chunk(set_idx);
                    }
                }
            }
        }
        self.ds_index = if self.ds_index as i64 + delta <= 0 {
            0
        } else {
            (self.ds_index as i64 + delta) as u64
        };
        log::debug!("{}: ds_index = {}/{}", self.name, self.ds_index, self.num_sets);
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryController;
    use crate::address;
    use crate::config::{self, Scheme};
    use crate::mem_req::{CoherenceState, Kind, Request};
    use crate::timing::{Priority, TimingModel, TimingRequest};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Issued {
        addr: address,
        is_write: bool,
        prio: Priority,
        burst: u32,
        cycle: u64,
    }

    #[derive(Clone, Default)]
    struct AccessLog(Arc<Mutex<Vec<Issued>>>);

    impl AccessLog {
        fn take(&self) -> Vec<Issued> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    /// Fixed-latency back-end that records every access it sees.
    struct Probe {
        latency: u64,
        log: AccessLog,
    }

    impl Probe {
        fn boxed(latency: u64, log: &AccessLog) -> Box<dyn TimingModel> {
            Box::new(Self {
                latency,
                log: log.clone(),
            })
        }
    }

    impl TimingModel for Probe {
        fn access(&mut self, req: TimingRequest, prio: Priority, burst_units: u32) -> u64 {
            self.log.0.lock().unwrap().push(Issued {
                addr: req.addr,
                is_write: req.is_write,
                prio,
                burst: burst_units,
                cycle: req.cycle,
            });
            req.cycle + self.latency
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    fn controller(
        cfg: &config::MemCtrl,
        ext_latency: u64,
        mc_latency: u64,
    ) -> (MemoryController, AccessLog, AccessLog) {
        let ext_log = AccessLog::default();
        let mc_log = AccessLog::default();
        let ext = Probe::boxed(ext_latency, &ext_log);
        let near = (0..cfg.mcdram_per_mc)
            .map(|_| Probe::boxed(mc_latency, &mc_log))
            .collect();
        let mc = MemoryController::with_backends("mem-0", cfg, None, ext, near).unwrap();
        (mc, ext_log, mc_log)
    }

    fn alloy_cfg() -> config::MemCtrl {
        config::MemCtrl {
            cache_scheme: Scheme::AlloyCache,
            cache_granularity: 64,
            num_ways: 1,
            // 1 MiB of 64 B lines, direct mapped
            size: 1,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        }
    }

    fn unison_cfg() -> config::MemCtrl {
        config::MemCtrl {
            cache_scheme: Scheme::UnisonCache,
            cache_granularity: 4096,
            num_ways: 4,
            size: 128,
            footprint_size: 64,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        }
    }

    #[test]
    fn alloy_end_to_end_scenario() {
        let cfg = alloy_cfg();
        let num_sets = cfg.num_sets();
        let (mc, ext_log, mc_log) = controller(&cfg, 100, 50);

        // cold load miss: TAD probe, then the far-tier line read
        let mut req = Request::new(0, Kind::LoadShared, 0);
        assert_eq!(mc.access(&mut req), 150);
        assert_eq!(req.state, CoherenceState::Exclusive);
        {
            let ctrl = mc.state.lock();
            let way = &ctrl.tags.set(0).ways[0];
            assert!(way.valid && way.tag == 0 && !way.dirty);
            assert_eq!(ctrl.stats.load_miss.get(), 1);
        }
        let ext = ext_log.take();
        assert_eq!(ext.len(), 1);
        assert_eq!(
            (ext[0].prio, ext[0].burst, ext[0].is_write),
            (Priority::Pipelined, 4, false)
        );
        let near = mc_log.take();
        // the TAD probe plus the background TAD fill
        assert_eq!(near.len(), 2);
        assert_eq!((near[0].prio, near[0].burst), (Priority::Critical, 6));
        assert_eq!(
            (near[1].prio, near[1].burst, near[1].is_write),
            (Priority::Background, 6, true)
        );

        // load hit: the TAD probe is the only traffic
        let mut req = Request::new(0, Kind::LoadShared, 200);
        assert_eq!(mc.access(&mut req), 250);
        assert_eq!(mc.stats().load_hit.get(), 1);
        assert!(ext_log.take().is_empty());
        assert_eq!(mc_log.take().len(), 1);

        // store hit: one 64 B near-tier write, line goes dirty
        let mut req = Request::new(0, Kind::WriteBack, 300);
        assert_eq!(mc.access(&mut req), 350);
        assert_eq!(req.state, CoherenceState::Invalid);
        assert_eq!(mc.stats().store_hit.get(), 1);
        assert!(mc.state.lock().tags.set(0).ways[0].dirty);
        let near = mc_log.take();
        assert_eq!(near.len(), 1);
        assert!(near[0].is_write);

        // conflicting load evicts the dirty line: far-tier read plus an
        // off-critical-path victim writeback
        let mut req = Request::new(num_sets, Kind::LoadShared, 400);
        assert_eq!(mc.access(&mut req), 550);
        let stats = mc.stats();
        assert_eq!(stats.dirty_evict.get(), 1);
        assert_eq!(stats.load_miss.get(), 2);
        let ext = ext_log.take();
        assert_eq!(ext.len(), 2);
        assert!(ext
            .iter()
            .any(|access| access.is_write && access.prio == Priority::Background));
        {
            let ctrl = mc.state.lock();
            let way = &ctrl.tags.set(0).ways[0];
            assert!(way.valid && way.tag == num_sets && !way.dirty);
        }

        // silent evictions return immediately and touch nothing
        let mut req = Request::new(num_sets, Kind::SilentEvict, 500);
        assert_eq!(mc.access(&mut req), 500);
        assert_eq!(req.state, CoherenceState::Invalid);
        assert_eq!(mc.num_requests(), 4);
        assert!(ext_log.take().is_empty());
        assert!(mc_log.take().is_empty());
    }

    #[test]
    fn loads_respect_the_no_exclusive_hint() {
        let (mc, _ext_log, _mc_log) = controller(&alloy_cfg(), 100, 50);
        let mut shared = Request::new(0, Kind::LoadShared, 0).with_no_exclusive();
        mc.access(&mut shared);
        assert_eq!(shared.state, CoherenceState::Shared);
        let mut exclusive = Request::new(64, Kind::LoadExclusive, 0);
        mc.access(&mut exclusive);
        assert_eq!(exclusive.state, CoherenceState::Modified);
    }

    #[test]
    fn alloy_sram_tag_hit_skips_the_tad_probe() {
        let cfg = config::MemCtrl {
            sram_tag: true,
            llc_latency: 45,
            ..alloy_cfg()
        };
        let (mc, _ext_log, mc_log) = controller(&cfg, 100, 50);
        let mut req = Request::new(0, Kind::LoadShared, 0);
        mc.access(&mut req);
        mc_log.take();

        // tag check costs llc_latency, then a single 64 B data read
        let mut req = Request::new(0, Kind::LoadShared, 1000);
        assert_eq!(mc.access(&mut req), 1000 + 45 + 50);
        let near = mc_log.take();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].burst, 4);
    }

    #[test]
    fn unison_cold_miss_fills_exactly_one_footprint() {
        let (mc, ext_log, mc_log) = controller(&unison_cfg(), 100, 50);
        let mut req = Request::new(0, Kind::LoadShared, 0);
        mc.access(&mut req);

        let ext = ext_log.take();
        // the demand read plus one footprint-sized page pull
        assert_eq!(ext.len(), 2);
        assert_eq!(ext[1].burst, 64 * 4);
        assert!(!ext[1].is_write);
        let near = mc_log.take();
        // set-tag fetch, page fill, tag store
        assert_eq!(near.len(), 3);
        assert_eq!(near[1].burst, 64 * 4);
        assert!(near[1].is_write);

        let stats = mc.stats();
        assert_eq!(stats.load_miss.get(), 1);
        assert_eq!(stats.placement.get(), 1);
        assert_eq!(stats.total_migrate.get(), 4096 - 64);
    }

    #[test]
    fn ideal_unison_suppresses_tag_traffic_but_keeps_counters() {
        let cfg = config::MemCtrl {
            ideal: true,
            ..unison_cfg()
        };
        let (mc, ext_log, mc_log) = controller(&cfg, 100, 50);
        let mut req = Request::new(0, Kind::LoadShared, 0);
        mc.access(&mut req);
        // no set-tag fetch, no tag read-modify-write: just the page fill
        assert_eq!(mc_log.take().len(), 1);
        assert_eq!(ext_log.take().len(), 2);

        let mut req = Request::new(1, Kind::LoadShared, 1000);
        let done = mc.access(&mut req);
        // a load hit is free of near-tier traffic in the ideal model
        assert_eq!(done, 1000);
        assert!(mc_log.take().is_empty());
        let stats = mc.stats();
        assert_eq!(stats.tag_store.get(), 2);
        assert_eq!(stats.total_hit.get(), 1);
        assert_eq!(stats.total_policy.get(), 4);
    }

    #[test]
    fn unison_footprint_and_tags_stay_coherent() {
        let cfg = config::MemCtrl {
            size: 1,
            ..unison_cfg()
        };
        let (mc, _ext_log, _mc_log) = controller(&cfg, 100, 50);
        let mut cycle = 0;
        for i in 0..5000u64 {
            let addr = (i * 97) % (1 << 18);
            let kind = if i % 3 == 0 {
                Kind::WriteBack
            } else {
                Kind::LoadShared
            };
            let mut req = Request::new(addr, kind, cycle);
            cycle = mc.access(&mut req).max(cycle) + 1;
        }
        // every valid way is backed by a footprint entry pointing at it
        let ctrl = mc.state.lock();
        for set_idx in 0..ctrl.tags.num_sets() {
            for (way_idx, way) in ctrl.tags.set(set_idx).ways.iter().enumerate() {
                if way.valid {
                    assert_eq!(ctrl.footprints.resident_way(way.tag), Some(way_idx as u32));
                }
            }
        }
        let stats = ctrl.stats.clone();
        assert!(stats.total_evict_lines.get() <= stats.total_touch_lines.get());
    }

    #[test]
    fn tagless_fifo_evicts_in_insertion_order() {
        let ways = 256u32;
        let cfg = config::MemCtrl {
            cache_scheme: Scheme::Tagless,
            cache_granularity: 4096,
            num_ways: ways,
            size: 1,
            footprint_size: 4,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        };
        let (mc, _ext_log, _mc_log) = controller(&cfg, 100, 50);
        for i in 0..=u64::from(ways) {
            let mut req = Request::new(i * 64, Kind::LoadShared, i * 1000);
            mc.access(&mut req);
        }
        let ctrl = mc.state.lock();
        // the W+1-th cold miss displaced the first-installed page
        assert_eq!(ctrl.footprints.resident_way(0), None);
        assert!(ctrl.tags.set(0).ways[0].valid);
        assert_eq!(ctrl.tags.set(0).ways[0].tag, u64::from(ways));
        assert_eq!(ctrl.stats.clean_evict.get(), 1);
        assert_eq!(ctrl.stats.total_touch_lines.get(), 4);
    }

    #[test]
    fn hybrid_tag_buffer_flushes_at_high_occupancy() {
        let cfg = config::MemCtrl {
            cache_scheme: Scheme::HybridCache,
            cache_granularity: 4096,
            num_ways: 1,
            size: 1,
            mcdram_per_mc: 1,
            tag_buffer_size: 1024,
            ..config::MemCtrl::default()
        };
        let sets = cfg.num_sets();
        let (mc, _ext_log, _mc_log) = controller(&cfg, 100, 50);
        for round in 0..4u64 {
            for set in 0..sets {
                let tag = round * sets + set;
                let mut req = Request::new(tag * 64, Kind::LoadShared, 0);
                mc.access(&mut req);
            }
        }
        let stats = mc.stats();
        assert!(stats.tag_buffer_flush.get() >= 1);
        let ctrl = mc.state.lock();
        assert!(ctrl.tag_buffer.as_ref().unwrap().occupancy() <= 0.7);
    }

    #[test]
    fn hybrid_store_probe_is_filtered_by_the_tag_buffer() {
        let cfg = config::MemCtrl {
            cache_scheme: Scheme::HybridCache,
            cache_granularity: 4096,
            num_ways: 4,
            size: 128,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        };
        let (mc, _ext_log, mc_log) = controller(&cfg, 100, 50);
        // untracked store miss probes the physical tags (burst 2) first
        let addr = 5 * 64;
        let mut req = Request::new(addr, Kind::WriteBack, 0);
        mc.access(&mut req);
        let near = mc_log.take();
        assert_eq!(near[0].burst, 2);
        assert_eq!(mc.stats().tb_dirty_miss.get(), 1);

        // a load hit leaves a reference entry behind ...
        let mut req = Request::new(addr, Kind::LoadShared, 1000);
        mc.access(&mut req);
        mc_log.take();
        // ... so the next store skips the probe
        let mut req = Request::new(addr + 1, Kind::WriteBack, 2000);
        mc.access(&mut req);
        let near = mc_log.take();
        assert!(near[0].burst != 2);
        assert_eq!(mc.stats().tb_dirty_hit.get(), 1);
    }

    #[test]
    fn basic_cache_fetches_missing_lines_within_a_resident_page() {
        let cfg = config::MemCtrl {
            cache_scheme: Scheme::BasicCache,
            cache_granularity: 4096,
            num_ways: 4,
            size: 128,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        };
        let (mc, ext_log, _mc_log) = controller(&cfg, 100, 50);
        let mut req = Request::new(0, Kind::LoadShared, 0);
        mc.access(&mut req);
        ext_log.take();

        // page hit, line miss: exactly one far-tier line fetch
        let mut req = Request::new(1, Kind::LoadShared, 1000);
        mc.access(&mut req);
        let ext = ext_log.take();
        assert_eq!(ext.len(), 1);
        assert_eq!((ext[0].burst, ext[0].is_write), (4, false));

        // line hit: the far tier stays idle
        let mut req = Request::new(1, Kind::LoadShared, 2000);
        mc.access(&mut req);
        assert!(ext_log.take().is_empty());
        let stats = mc.stats();
        assert_eq!(stats.total_hit.get(), 2);
        assert_eq!(stats.total_miss.get(), 1);
    }

    #[test]
    fn trimma_walks_once_then_hits_the_sram_caches() {
        let cfg = config::MemCtrl {
            cache_scheme: Scheme::Trimma,
            cache_granularity: 4096,
            num_ways: 4,
            size: 128,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        };
        let (mc, _ext_log, mc_log) = controller(&cfg, 100, 50);

        // double SRAM miss: the tree walk costs L+1 serial reads
        let mut req = Request::new(0x1234_0040, Kind::LoadShared, 0);
        mc.access(&mut req);
        let near = mc_log.take();
        let walk_reads: Vec<_> = near
            .iter()
            .filter(|access| access.burst == 2 && !access.is_write)
            .collect();
        assert_eq!(walk_reads.len(), 3);
        assert_eq!(mc.stats().tag_load.get(), 3);

        // the install seeded the NonIdCache: no more metadata reads
        let mut req = Request::new(0x1234_0040, Kind::LoadShared, 100_000);
        mc.access(&mut req);
        let near = mc_log.take();
        assert!(near.iter().all(|access| access.burst != 2));
    }

    #[test]
    fn hma_misses_forward_to_the_far_tier() {
        let cfg = config::MemCtrl {
            cache_scheme: Scheme::HMA,
            cache_granularity: 4096,
            num_ways: 256,
            size: 1,
            os_quantum: 10,
            mcdram_per_mc: 1,
            ..config::MemCtrl::default()
        };
        let (mc, ext_log, mc_log) = controller(&cfg, 100, 50);
        for i in 0..10u64 {
            let mut req = Request::new(i * 64, Kind::LoadShared, i * 500);
            mc.access(&mut req);
        }
        assert_eq!(mc.stats().load_miss.get(), 10);
        assert_eq!(ext_log.take().len(), 10);
        assert!(mc_log.take().is_empty());
        // the null OS policy migrates nothing at the quantum
        assert_eq!(mc.stats().placement.get(), 0);
    }

    #[test]
    fn passthrough_schemes_use_a_single_tier() {
        let no_cache = config::MemCtrl::default();
        let (mc, ext_log, mc_log) = controller(&no_cache, 100, 50);
        let mut req = Request::new(0x80, Kind::LoadShared, 7);
        assert_eq!(mc.access(&mut req), 107);
        assert_eq!(ext_log.take().len(), 1);
        assert!(mc_log.take().is_empty());

        let cache_only = config::MemCtrl {
            cache_scheme: Scheme::CacheOnly,
            ..config::MemCtrl::default()
        };
        let (mc, ext_log, mc_log) = controller(&cache_only, 100, 50);
        let mut req = Request::new(0x80, Kind::LoadShared, 7);
        assert_eq!(mc.access(&mut req), 57);
        assert!(ext_log.take().is_empty());
        assert_eq!(mc_log.take().len(), 1);
    }

    #[test]
    fn bw_balance_disables_sets_and_flushes_dirty_ways() {
        let cfg = config::MemCtrl {
            bw_balance: true,
            ..alloy_cfg()
        };
        let step = cfg.step_length();
        let (mc, _ext_log, _mc_log) = controller(&cfg, 100, 50);

        // one dirty install, then enough hits to skew the ratio near-side
        let mut req = Request::new(0, Kind::WriteBack, 0);
        mc.access(&mut req);
        for i in 1..step {
            let mut req = Request::new(0, Kind::LoadShared, i);
            mc.access(&mut req);
        }
        {
            let ctrl = mc.state.lock();
            assert!(ctrl.ds_index > 0, "window never moved");
            assert!(!ctrl.tags.set(0).ways[0].valid, "dirty way not flushed");
        }
        // the disabled set now bypasses the cache entirely
        let before = mc.stats().load_miss.get();
        let mut req = Request::new(0, Kind::LoadShared, 10_000_000);
        mc.access(&mut req);
        assert_eq!(mc.stats().load_miss.get(), before + 1);
        assert!(!mc.state.lock().tags.set(0).ways[0].valid);
    }

    #[test]
    fn only_the_designated_channel_writes_a_trace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config::MemCtrl {
            enable_trace: true,
            trace_dir: dir.path().to_path_buf(),
            ..alloy_cfg()
        };
        let ext_log = AccessLog::default();
        let mc_log = AccessLog::default();
        let mc0 = MemoryController::with_backends(
            "mem-0",
            &cfg,
            Some("mem-0"),
            Probe::boxed(100, &ext_log),
            vec![Probe::boxed(50, &mc_log)],
        )
        .unwrap();
        let mc1 = MemoryController::with_backends(
            "mem-1",
            &cfg,
            Some("mem-0"),
            Probe::boxed(100, &ext_log),
            vec![Probe::boxed(50, &mc_log)],
        )
        .unwrap();
        let mut req = Request::new(0, Kind::LoadShared, 0);
        mc0.access(&mut req);
        let mut req = Request::new(0, Kind::LoadShared, 0);
        mc1.access(&mut req);
        assert!(dir.path().join("mem-0trace.bin").exists());
        assert!(!dir.path().join("mem-1trace.bin").exists());
    }
}
