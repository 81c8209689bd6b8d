//! Progress of the tiered initial load.
//!
//! The loader runs three tiers in order. Each tier's operations are
//! independent; a tier is complete once every operation has finished, no
//! matter how. This module only accumulates what the loader reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load tier, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Direct messages and top community metadata.
    Critical,
    /// Channel and space definitions.
    High,
    /// Default channel messages of the top community.
    Medium,
}

impl Tier {
    /// All tiers in execution order.
    pub const ALL: [Tier; 3] = [Tier::Critical, Tier::High, Tier::Medium];

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "tier1",
            Self::High => "tier2",
            Self::Medium => "tier3",
        }
    }
}

/// How one operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpOutcome {
    /// Query returned.
    Succeeded {
        /// Events returned.
        events: usize,
    },
    /// Query errored.
    Failed,
    /// Query exceeded its timeout.
    TimedOut,
}

/// Aggregated per-tier numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMetrics {
    /// Events returned by successful operations.
    pub event_count: usize,
    /// Wall time of the tier.
    pub elapsed_ms: u64,
    /// Operations that succeeded.
    pub succeeded: u32,
    /// Operations that failed.
    pub failed: u32,
    /// Operations that timed out.
    pub timed_out: u32,
}

/// State of one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStatus {
    /// The tier has started.
    pub started: bool,
    /// Every operation has finished.
    pub complete: bool,
    /// Aggregated numbers.
    pub metrics: TierMetrics,
    /// Outcome per named operation.
    pub operations: BTreeMap<String, OpOutcome>,
}

/// Loader progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierEvent {
    /// A tier began.
    Started(Tier),
    /// One operation finished.
    OperationFinished {
        /// Owning tier.
        tier: Tier,
        /// Operation name, e.g. `"1A"`.
        operation: String,
        /// How it ended.
        outcome: OpOutcome,
    },
    /// Every operation of a tier finished.
    Completed {
        /// Finished tier.
        tier: Tier,
        /// Wall time of the tier.
        elapsed_ms: u64,
    },
    /// Forget all progress (new session).
    Reset,
}

/// Status of all tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierProgress {
    tiers: BTreeMap<Tier, TierStatus>,
}

impl TierProgress {
    /// No tier started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a progress report. Pure.
    pub fn apply(self, event: TierEvent) -> Self {
        let mut progress = self;
        match event {
            TierEvent::Started(tier) => {
                progress.tiers.insert(
                    tier,
                    TierStatus {
                        started: true,
                        ..TierStatus::default()
                    },
                );
            }
            TierEvent::OperationFinished {
                tier,
                operation,
                outcome,
            } => {
                let status = progress.tiers.entry(tier).or_default();
                let metrics = &mut status.metrics;
                match outcome {
                    OpOutcome::Succeeded { events } => {
                        metrics.succeeded += 1;
                        metrics.event_count += events;
                    }
                    OpOutcome::Failed => metrics.failed += 1,
                    OpOutcome::TimedOut => metrics.timed_out += 1,
                }
                status.operations.insert(operation, outcome);
            }
            TierEvent::Completed { tier, elapsed_ms } => {
                let status = progress.tiers.entry(tier).or_default();
                status.complete = true;
                status.metrics.elapsed_ms = elapsed_ms;
            }
            TierEvent::Reset => progress.tiers.clear(),
        }
        progress
    }

    /// Status of one tier (default if not started).
    pub fn status(&self, tier: Tier) -> TierStatus {
        self.tiers.get(&tier).cloned().unwrap_or_default()
    }

    /// Check if `tier` is complete.
    pub fn is_complete(&self, tier: Tier) -> bool {
        self.tiers.get(&tier).is_some_and(|s| s.complete)
    }

    /// Check if every tier is complete.
    pub fn all_complete(&self) -> bool {
        Tier::ALL.iter().all(|t| self.is_complete(*t))
    }
}
