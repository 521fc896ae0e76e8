//! Two-tier memory for CarePilot agents.
//!
//! - [`ShortTermStore`]: per-session working memory, bounded.
//! - [`LongTermMemory`]: per-patient assessment history, append-only.

pub mod long_term;
pub mod short_term;

pub use long_term::{AssessmentContext, LongTermMemory, RecurringCategory, RiskPattern, ScoreTrend};
pub use short_term::{MemoryLimits, ReasoningEntry, ShortTermMemory, ShortTermStore, Turn, TurnRole};

/// Both memory tiers, shared across sessions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub short_term: ShortTermStore,
    pub long_term: LongTermMemory,
}

impl MemoryStore {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            short_term: ShortTermStore::new(limits),
            long_term: LongTermMemory::new(),
        }
    }

    pub fn with_long_term(mut self, long_term: LongTermMemory) -> Self {
        self.long_term = long_term;
        self
    }
}
