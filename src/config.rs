use crate::{LINE_SIZE, MB};
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Caching scheme run by a memory controller.
///
/// Fixed at construction; the dispatcher routes every request to the
/// matching handler.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum Scheme {
    AlloyCache,
    UnisonCache,
    HMA,
    HybridCache,
    NoCache,
    CacheOnly,
    Tagless,
    BasicCache,
    Trimma,
}

impl Scheme {
    /// Schemes that manage the near tier at page granularity and keep a
    /// footprint entry per tag.
    #[must_use]
    pub fn is_page_granular(self) -> bool {
        matches!(
            self,
            Scheme::UnisonCache
                | Scheme::HMA
                | Scheme::HybridCache
                | Scheme::Tagless
                | Scheme::BasicCache
                | Scheme::Trimma
        )
    }
}

/// Timing back-end selector for one tier.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum TimingKind {
    Simple,
    DDR,
    MD1,
    DRAMSim,
}

/// Timing configuration for one memory tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier {
    #[serde(rename = "type")]
    pub kind: TimingKind,
    /// Zero-load latency in cycles.
    pub latency: u64,
    /// Peak bandwidth in MB/s (MD1 only).
    pub bandwidth: u32,
    /// Core frequency in MHz the latency/bandwidth are quoted against.
    pub frequency: u32,
}

impl Default for Tier {
    fn default() -> Self {
        Self {
            kind: TimingKind::Simple,
            latency: 100,
            bandwidth: 6400,
            frequency: 1000,
        }
    }
}

impl Tier {
    /// Defaults for the near tier: half the latency, twice the bandwidth.
    #[must_use]
    pub fn near_default() -> Self {
        Self {
            latency: 50,
            bandwidth: 12800,
            ..Self::default()
        }
    }
}

/// Configuration of one memory controller (channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemCtrl {
    pub cache_scheme: Scheme,
    /// Caching granularity in bytes: 64, 4096 or 2 MiB.
    pub cache_granularity: u64,
    pub num_ways: u32,
    /// Near-tier capacity in MiB.
    pub size: u64,
    /// Lines fetched per page fill (UnisonCache/Tagless).
    pub footprint_size: u32,
    /// Near-tier channels behind this controller.
    #[serde(rename = "mcdramPerMC")]
    pub mcdram_per_mc: u32,
    pub ext_dram: Tier,
    pub mcdram: Tier,
    /// Model the tag array in SRAM instead of in the near tier.
    pub sram_tag: bool,
    #[serde(rename = "bwBalance")]
    pub bw_balance: bool,
    /// Suppress metadata traffic to measure its overhead.
    pub ideal: bool,
    pub dram_timing_scale: f64,
    pub tag_buffer_size: u32,
    #[serde(rename = "enableTrace")]
    pub enable_trace: bool,
    #[serde(rename = "traceDir")]
    pub trace_dir: PathBuf,
    /// SRAM tag check latency, borrowed from the LLC.
    pub llc_latency: u64,
    /// Requests between OS placement invocations (HMA).
    pub os_quantum: u64,
}

impl Default for MemCtrl {
    fn default() -> Self {
        Self {
            cache_scheme: Scheme::NoCache,
            cache_granularity: 64,
            num_ways: 1,
            size: 128,
            footprint_size: 64,
            mcdram_per_mc: 4,
            ext_dram: Tier::default(),
            mcdram: Tier::near_default(),
            sram_tag: false,
            bw_balance: false,
            ideal: false,
            dram_timing_scale: 1.0,
            tag_buffer_size: 1024,
            enable_trace: false,
            trace_dir: PathBuf::from("."),
            llc_latency: 45,
            os_quantum: 1000,
        }
    }
}

impl MemCtrl {
    #[must_use]
    pub fn cache_bytes(&self) -> u64 {
        self.size * MB
    }

    #[must_use]
    pub fn lines_per_page(&self) -> u64 {
        self.cache_granularity / LINE_SIZE
    }

    #[must_use]
    pub fn num_sets(&self) -> u64 {
        self.cache_bytes() / u64::from(self.num_ways) / self.cache_granularity
    }

    /// Requests per EWMA step: roughly one cache fill of traffic.
    #[must_use]
    pub fn step_length(&self) -> u64 {
        self.cache_bytes() / 640
    }

    /// Reject structurally invalid configurations up front; everything
    /// that passes here is treated as an invariant by the handlers.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.size == 0 {
            eyre::bail!("near tier needs a non-zero capacity");
        }
        match self.cache_granularity {
            64 | 4096 => {}
            g if g == 2 * MB => {}
            g => eyre::bail!("unsupported cache granularity {g}"),
        }
        match self.cache_scheme {
            Scheme::AlloyCache => {
                if self.cache_granularity != 64 || self.num_ways != 1 {
                    eyre::bail!("AlloyCache is direct-mapped at 64 B granularity");
                }
            }
            Scheme::UnisonCache => {
                if self.cache_granularity != 4096 {
                    eyre::bail!("UnisonCache requires 4 KiB pages");
                }
            }
            Scheme::HMA => {
                if self.cache_granularity != 4096 {
                    eyre::bail!("HMA requires 4 KiB pages");
                }
                if u64::from(self.num_ways) != self.cache_bytes() / self.cache_granularity {
                    eyre::bail!("HMA must be fully associative");
                }
            }
            Scheme::HybridCache => {
                if self.cache_granularity != 4096 && self.cache_granularity != 2 * MB {
                    eyre::bail!("HybridCache requires 4 KiB or 2 MiB pages");
                }
            }
            Scheme::Tagless => {
                if self.num_sets() != 1 {
                    eyre::bail!(
                        "Tagless is fully associative: expected 1 set, got {}",
                        self.num_sets()
                    );
                }
            }
            Scheme::BasicCache | Scheme::Trimma => {
                if self.cache_granularity < 4096 {
                    eyre::bail!("{} manages the near tier in pages", self.cache_scheme);
                }
            }
            Scheme::NoCache | Scheme::CacheOnly => {}
        }
        if self.bw_balance
            && !matches!(self.cache_scheme, Scheme::AlloyCache | Scheme::HybridCache)
        {
            eyre::bail!("bwBalance is only modelled for AlloyCache and HybridCache");
        }
        if self.mcdram_per_mc == 0 {
            eyre::bail!("need at least one near-tier channel");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemCtrl, Scheme};
    use std::str::FromStr;

    #[test]
    fn scheme_names_parse() {
        assert_eq!(Scheme::from_str("AlloyCache").unwrap(), Scheme::AlloyCache);
        assert_eq!(Scheme::from_str("Trimma").unwrap(), Scheme::Trimma);
        assert!(Scheme::from_str("FancyCache").is_err());
    }

    #[test]
    fn derived_geometry() {
        let cfg = MemCtrl {
            cache_scheme: Scheme::UnisonCache,
            cache_granularity: 4096,
            num_ways: 4,
            size: 128,
            ..MemCtrl::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.num_sets(), 128 * 1024 * 1024 / 4 / 4096);
        assert_eq!(cfg.lines_per_page(), 64);
    }

    #[test]
    fn alloy_must_be_direct_mapped() {
        let cfg = MemCtrl {
            cache_scheme: Scheme::AlloyCache,
            cache_granularity: 64,
            num_ways: 2,
            ..MemCtrl::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tagless_needs_one_set() {
        let mut cfg = MemCtrl {
            cache_scheme: Scheme::Tagless,
            cache_granularity: 4096,
            num_ways: 4,
            size: 128,
            ..MemCtrl::default()
        };
        assert!(cfg.validate().is_err());
        cfg.num_ways = (cfg.cache_bytes() / cfg.cache_granularity) as u32;
        cfg.validate().unwrap();
    }

    #[test]
    fn external_keys_deserialize() {
        let cfg: MemCtrl = serde_json::from_str(
            r#"{
                "cache_scheme": "HybridCache",
                "cache_granularity": 4096,
                "mcdramPerMC": 2,
                "bwBalance": true,
                "enableTrace": true,
                "traceDir": "/tmp"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.cache_scheme, Scheme::HybridCache);
        assert_eq!(cfg.mcdram_per_mc, 2);
        assert!(cfg.bw_balance);
        assert!(cfg.enable_trace);
    }
}
