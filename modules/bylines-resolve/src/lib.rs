//! Author identity resolution: rule-based candidate scoring and human-gated
//! merge application. Nothing in this crate merges anything on its own —
//! every candidate, whatever its score, waits for a reviewed decision.

pub mod apply;
pub mod scoring;

pub use apply::{ApplyReport, Decision, MergeApplier, ReviewDecision};
pub use scoring::{
    score_candidates, score_pair, Band, MatchRule, MergeCandidate, PartySummary, RuleHit,
};
