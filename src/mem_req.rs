use crate::address;
use serde::{Deserialize, Serialize};

/// Request kinds as seen from the last-level cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// A read miss that tolerates a shared copy (GETS).
    LoadShared,
    /// A read-for-ownership miss (GETX).
    LoadExclusive,
    /// A dirty eviction from the LLC (PUTX).
    WriteBack,
    /// A clean downgrade from the LLC (PUTS); the controller ignores it.
    SilentEvict,
}

impl Kind {
    /// Loads and stores diverge in the timing models: a store is only ever
    /// an LLC writeback, everything else reads.
    #[must_use]
    pub fn access_class(self) -> AccessClass {
        match self {
            Kind::LoadShared | Kind::LoadExclusive => AccessClass::Load,
            Kind::WriteBack | Kind::SilentEvict => AccessClass::Store,
        }
    }

    #[must_use]
    pub fn is_writeback(self) -> bool {
        self == Kind::WriteBack
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessClass {
    Load,
    Store,
}

/// MESI state handed back to the requesting cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoherenceState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

/// One LLC-miss request into the controller.
#[derive(Debug, Clone)]
pub struct Request {
    pub line_addr: address,
    pub kind: Kind,
    /// Arrival cycle on entry; handlers thread completion cycles through it.
    pub cycle: u64,
    /// Coherence state granted on return.
    pub state: CoherenceState,
    /// Hint that a `LoadShared` must not be upgraded to `Exclusive`.
    pub no_exclusive: bool,
}

impl Request {
    #[must_use]
    pub fn new(line_addr: address, kind: Kind, cycle: u64) -> Self {
        Self {
            line_addr,
            kind,
            cycle,
            state: CoherenceState::Invalid,
            no_exclusive: false,
        }
    }

    #[must_use]
    pub fn with_no_exclusive(mut self) -> Self {
        self.no_exclusive = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessClass, Kind};

    #[test]
    fn writebacks_are_stores() {
        assert_eq!(Kind::WriteBack.access_class(), AccessClass::Store);
        assert_eq!(Kind::LoadShared.access_class(), AccessClass::Load);
        assert_eq!(Kind::LoadExclusive.access_class(), AccessClass::Load);
        assert!(!Kind::LoadExclusive.is_writeback());
    }
}
