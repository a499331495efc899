//! Rule-based merge candidate scoring over derived author profiles.
//!
//! Scores are additive over satisfied rules, capped at 1.0, with the
//! contributing evidence attached per rule. The output is advisory only:
//! a 1.0 candidate still goes to review like any other.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bylines_common::AuthorProfile;

const DISCARD_BELOW: f64 = 0.5;
const HIGH_BAND_AT: f64 = 0.75;
const MAX_NAME_DISTANCE: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    ExactAccount,
    SharedProfileLink,
    ExactNameSharedDomain,
    SimilarNameSharedDomain,
    SharedDomainOnly,
}

impl MatchRule {
    fn weight(self) -> f64 {
        match self {
            MatchRule::ExactAccount => 1.0,
            MatchRule::SharedProfileLink => 0.9,
            MatchRule::ExactNameSharedDomain => 0.8,
            MatchRule::SimilarNameSharedDomain => 0.6,
            MatchRule::SharedDomainOnly => 0.3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchRule::ExactAccount => "exact_account",
            MatchRule::SharedProfileLink => "shared_profile_link",
            MatchRule::ExactNameSharedDomain => "exact_name_shared_domain",
            MatchRule::SimilarNameSharedDomain => "similar_name_shared_domain",
            MatchRule::SharedDomainOnly => "shared_domain_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Band {
    High,
    Medium,
}

/// One satisfied rule with the concrete signal that satisfied it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule: MatchRule,
    pub weight: f64,
    pub evidence: String,
}

/// A scored pair surfaced for review. `id` is deterministic over the two
/// profile ids, so re-scoring the same corpus yields the same candidate ids
/// and replayed decisions stay idempotent downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub id: String,
    pub left: PartySummary,
    pub right: PartySummary,
    pub score: f64,
    pub band: Band,
    pub rules: Vec<RuleHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySummary {
    pub author_id: Uuid,
    pub name: String,
    pub source_id: String,
    pub article_count: i64,
}

impl From<&AuthorProfile> for PartySummary {
    fn from(profile: &AuthorProfile) -> Self {
        Self {
            author_id: profile.id,
            name: profile.canonical_name.clone(),
            source_id: profile.source_id.clone(),
            article_count: profile.article_count,
        }
    }
}

/// Score one unordered pair. Symmetric: the result does not depend on
/// argument order beyond the left/right labels, which follow sorted ids.
pub fn score_pair(a: &AuthorProfile, b: &AuthorProfile) -> Option<MergeCandidate> {
    let (left, right) = if a.id.to_string() <= b.id.to_string() {
        (a, b)
    } else {
        (b, a)
    };

    let mut rules = Vec::new();

    if let Some(handle) = shared_value(&left.account_hints, &right.account_hints) {
        rules.push(RuleHit {
            rule: MatchRule::ExactAccount,
            weight: MatchRule::ExactAccount.weight(),
            evidence: format!("both profiles carry account identifier {handle}"),
        });
    }

    let shared_domain = shared_value(&left.domains, &right.domains);

    if let Some(domain) = &shared_domain {
        if let Some(link) = shared_profile_link(left, right, domain) {
            rules.push(RuleHit {
                rule: MatchRule::SharedProfileLink,
                weight: MatchRule::SharedProfileLink.weight(),
                evidence: format!("profile links on {domain}: {link}"),
            });
        }
    }

    let left_name = normalize_name(&left.canonical_name);
    let right_name = normalize_name(&right.canonical_name);
    let mut name_rule_fired = false;
    if let Some(domain) = &shared_domain {
        if left_name == right_name {
            name_rule_fired = true;
            rules.push(RuleHit {
                rule: MatchRule::ExactNameSharedDomain,
                weight: MatchRule::ExactNameSharedDomain.weight(),
                evidence: format!("exact name \"{left_name}\" on {domain}"),
            });
        } else {
            let distance = normalized_distance(&left_name, &right_name);
            if distance <= MAX_NAME_DISTANCE {
                name_rule_fired = true;
                rules.push(RuleHit {
                    rule: MatchRule::SimilarNameSharedDomain,
                    weight: MatchRule::SimilarNameSharedDomain.weight(),
                    evidence: format!(
                        "names \"{left_name}\" / \"{right_name}\" within edit distance \
                         {distance:.3} on {domain}"
                    ),
                });
            }
        }
    }

    // The bare shared-domain signal only counts when no name rule already
    // priced the domain in.
    if let Some(domain) = &shared_domain {
        if !name_rule_fired {
            rules.push(RuleHit {
                rule: MatchRule::SharedDomainOnly,
                weight: MatchRule::SharedDomainOnly.weight(),
                evidence: format!("both publish on {domain}"),
            });
        }
    }

    if rules.is_empty() {
        return None;
    }

    let score = rules.iter().map(|r| r.weight).sum::<f64>().min(1.0);
    if score < DISCARD_BELOW {
        return None;
    }

    let band = if score >= HIGH_BAND_AT {
        Band::High
    } else {
        Band::Medium
    };

    Some(MergeCandidate {
        id: candidate_id(left.id, right.id),
        left: PartySummary::from(left),
        right: PartySummary::from(right),
        score,
        band,
        rules,
    })
}

/// Score every unordered pair of distinct profiles. Candidates come back
/// highest score first, with the deterministic id as tie-breaker.
pub fn score_candidates(profiles: &[AuthorProfile]) -> Vec<MergeCandidate> {
    let mut candidates = Vec::new();
    for (i, a) in profiles.iter().enumerate() {
        for b in &profiles[i + 1..] {
            if a.id == b.id {
                continue;
            }
            if let Some(candidate) = score_pair(a, b) {
                candidates.push(candidate);
            }
        }
    }
    candidates.sort_by(|x, y| {
        y.score
            .partial_cmp(&x.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.id.cmp(&y.id))
    });
    candidates
}

fn candidate_id(a: Uuid, b: Uuid) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("candidate|{a}|{b}").as_bytes(),
    )
    .to_string()
}

fn shared_value(left: &[String], right: &[String]) -> Option<String> {
    left.iter().find(|v| right.contains(v)).cloned()
}

fn shared_profile_link(
    left: &AuthorProfile,
    right: &AuthorProfile,
    domain: &str,
) -> Option<String> {
    let on_domain = |urls: &[String]| {
        urls.iter()
            .find(|u| u.to_lowercase().contains(domain))
            .cloned()
    };
    match (on_domain(&left.profile_urls), on_domain(&right.profile_urls)) {
        (Some(l), Some(_)) => Some(l),
        _ => None,
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Levenshtein distance divided by the longer length; 0.0 for two empty
/// strings.
fn normalized_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, domain: &str) -> AuthorProfile {
        AuthorProfile {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("test|{name}").as_bytes()),
            canonical_name: name.to_string(),
            source_id: format!("rss:{domain}"),
            domains: vec![domain.to_string()],
            account_hints: Vec::new(),
            profile_urls: Vec::new(),
            article_count: 1,
        }
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("jane doe", "jane do"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similar_name_same_domain_lands_medium() {
        // distance 1 over length 8 = 0.125, inside the 0.15 tolerance
        let candidate = score_pair(
            &profile("Jane Doe", "x.com"),
            &profile("Jane Do", "x.com"),
        )
        .expect("candidate surfaced");
        assert!((candidate.score - 0.6).abs() < f64::EPSILON);
        assert_eq!(candidate.band, Band::Medium);
        assert_eq!(candidate.rules.len(), 1);
        assert_eq!(candidate.rules[0].rule, MatchRule::SimilarNameSharedDomain);
    }

    #[test]
    fn test_exact_name_same_domain_lands_high() {
        let candidate = score_pair(
            &profile("Jane Doe", "x.com"),
            &profile("jane  doe", "x.com"),
        )
        .expect("candidate surfaced");
        assert!((candidate.score - 0.8).abs() < f64::EPSILON);
        assert_eq!(candidate.band, Band::High);
    }

    #[test]
    fn test_shared_account_caps_at_one_and_never_pre_decides() {
        let mut a = profile("Jane Doe", "x.com");
        let mut b = profile("jane doe", "y.com");
        a.account_hints.push("@janedoe".to_string());
        b.account_hints.push("@janedoe".to_string());
        b.domains.push("x.com".to_string());

        let candidate = score_pair(&a, &b).expect("candidate surfaced");
        assert!((candidate.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(candidate.band, Band::High);
        // A perfect score is still just a candidate; there is no decided
        // field to even set.
    }

    #[test]
    fn test_domain_only_is_discarded_below_threshold() {
        let candidate = score_pair(
            &profile("Jane Doe", "x.com"),
            &profile("Sam Roe", "x.com"),
        );
        assert!(candidate.is_none());
    }

    #[test]
    fn test_dissimilar_names_far_apart_discarded() {
        // distance 6 over 8 = 0.75, far outside tolerance; domain-only 0.3
        // stays under the surfacing threshold
        assert!(score_pair(&profile("Jane Doe", "x.com"), &profile("Xq Zw", "x.com")).is_none());
    }

    #[test]
    fn test_score_is_symmetric_with_stable_id() {
        let a = profile("Jane Doe", "x.com");
        let b = profile("Jane Do", "x.com");
        let one = score_pair(&a, &b).unwrap();
        let two = score_pair(&b, &a).unwrap();
        assert_eq!(one.id, two.id);
        assert_eq!(one.score, two.score);
        assert_eq!(one.left.author_id, two.left.author_id);
    }

    #[test]
    fn test_score_candidates_orders_by_score() {
        let a = profile("Jane Doe", "x.com");
        let b = profile("jane doe", "x.com");
        let c = profile("Jane Do", "x.com");
        let candidates = score_candidates(&[a, b, c]);
        assert!(!candidates.is_empty());
        for window in candidates.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }
}
