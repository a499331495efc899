//! Human-gated merge application. Consumes reviewed decisions against a
//! candidate set and applies only the explicit accepts; everything else is
//! logged and counted, never acted on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use bylines_store::{MergeRequest, Result, Store};

use crate::scoring::MergeCandidate;

/// A reviewer's verdict on one candidate. There is deliberately no
/// "auto" variant and no score threshold that implies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub candidate_id: String,
    pub decision: Decision,
    pub reviewer: Option<String>,
    pub evidence_ids: Vec<String>,
}

/// Counters for one apply pass. `duplicates` are accepts whose decision id
/// was already applied; `invalid` are decisions naming no known candidate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub held: u64,
    pub invalid: u64,
}

pub struct MergeApplier {
    store: Store,
}

impl MergeApplier {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Apply a batch of reviewed decisions under `run_id`. Accepts merge the
    /// losing profile into the winner (the side with more articles; ties go
    /// to the lexically smaller id). Re-running the same batch changes
    /// nothing: already-applied accepts count as duplicates.
    pub async fn apply_decisions(
        &self,
        candidates: &[MergeCandidate],
        decisions: &[ReviewDecision],
        run_id: Uuid,
    ) -> Result<ApplyReport> {
        let by_id: HashMap<&str, &MergeCandidate> = candidates
            .iter()
            .map(|c| (c.id.as_str(), c))
            .collect();

        let mut report = ApplyReport::default();
        for decision in decisions {
            let Some(candidate) = by_id.get(decision.candidate_id.as_str()) else {
                warn!(candidate_id = %decision.candidate_id, "decision for unknown candidate");
                report.invalid += 1;
                continue;
            };

            match decision.decision {
                Decision::Reject => {
                    info!(candidate_id = %candidate.id, "candidate rejected");
                    report.rejected += 1;
                }
                Decision::Hold => {
                    info!(candidate_id = %candidate.id, "candidate held for later review");
                    report.held += 1;
                }
                Decision::Accept => {
                    let request = merge_request(candidate, decision);
                    let applied = self.store.apply_merge(&request, run_id).await?;
                    if applied.inserted {
                        report.accepted += 1;
                    } else {
                        report.duplicates += 1;
                    }
                }
            }
        }

        info!(
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            held = report.held,
            invalid = report.invalid,
            "review decisions applied"
        );
        Ok(report)
    }
}

/// The winner keeps its author row; the other side's accounts move over.
fn merge_request(candidate: &MergeCandidate, decision: &ReviewDecision) -> MergeRequest {
    let left_wins = match candidate.left.article_count.cmp(&candidate.right.article_count) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.left.author_id.to_string() <= candidate.right.author_id.to_string()
        }
    };
    let (winner, loser) = if left_wins {
        (&candidate.left, &candidate.right)
    } else {
        (&candidate.right, &candidate.left)
    };

    let criteria = candidate
        .rules
        .iter()
        .map(|hit| hit.rule.as_str())
        .collect::<Vec<_>>()
        .join("+");

    MergeRequest {
        decision_id: candidate.id.clone(),
        from_author_id: loser.author_id,
        from_name: loser.name.clone(),
        to_author_id: winner.author_id,
        to_name: winner.name.clone(),
        evidence_ids: decision.evidence_ids.clone(),
        decision_criteria: Some(criteria),
        created_by: decision.reviewer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{Band, MatchRule, PartySummary, RuleHit};

    fn candidate(left_count: i64, right_count: i64) -> MergeCandidate {
        MergeCandidate {
            id: "candidate-1".to_string(),
            left: PartySummary {
                author_id: Uuid::new_v4(),
                name: "Jane Doe".to_string(),
                source_id: "rss:x.com".to_string(),
                article_count: left_count,
            },
            right: PartySummary {
                author_id: Uuid::new_v4(),
                name: "Jane Do".to_string(),
                source_id: "rss:x.com".to_string(),
                article_count: right_count,
            },
            score: 0.6,
            band: Band::Medium,
            rules: vec![RuleHit {
                rule: MatchRule::SimilarNameSharedDomain,
                weight: 0.6,
                evidence: "names within edit distance on x.com".to_string(),
            }],
        }
    }

    #[test]
    fn test_winner_is_the_side_with_more_articles() {
        let c = candidate(5, 2);
        let request = merge_request(
            &c,
            &ReviewDecision {
                candidate_id: c.id.clone(),
                decision: Decision::Accept,
                reviewer: None,
                evidence_ids: vec![],
            },
        );
        assert_eq!(request.to_author_id, c.left.author_id);
        assert_eq!(request.from_author_id, c.right.author_id);
        assert_eq!(
            request.decision_criteria.as_deref(),
            Some("similar_name_shared_domain")
        );
    }

    #[test]
    fn test_ties_break_on_author_id() {
        let c = candidate(3, 3);
        let request = merge_request(
            &c,
            &ReviewDecision {
                candidate_id: c.id.clone(),
                decision: Decision::Accept,
                reviewer: None,
                evidence_ids: vec![],
            },
        );
        let expected_winner =
            if c.left.author_id.to_string() <= c.right.author_id.to_string() {
                c.left.author_id
            } else {
                c.right.author_id
            };
        assert_eq!(request.to_author_id, expected_winner);
    }
}
