//! Robots policy cache — a per-domain state machine over robots.txt
//! fetch outcomes, with failure-mode-aware TTLs.
//!
//! Unavailability degrades to permissive (never to silence): 404 allows for
//! 4h, 5xx allows with a doubled per-domain delay for 15m, timeouts and
//! redirect loops allow for 1h. The check itself cannot be switched off.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use bylines_common::ComplianceConfig;

/// TTL classification of a cached policy, keyed by how the robots.txt
/// fetch went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Success,
    NotFound,
    ServerError,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyMode {
    /// 200 — rules parsed for our agent.
    Parsed,
    /// Missing or unreachable robots.txt — everything allowed.
    AllowAll,
    /// Server error — allowed, but at reduced rate until a good refresh.
    AllowWithCaution,
}

/// Cached policy for one domain. Replaced wholesale on refresh; never
/// mutated in place.
#[derive(Debug, Clone)]
struct CacheEntry {
    mode: PolicyMode,
    rules: Option<RobotsRules>,
    ttl_class: TtlClass,
    effective_until: Instant,
    delay_multiplier: f64,
    status_code: Option<u16>,
}

/// Decision payload for one URL check.
#[derive(Debug, Clone)]
pub struct RobotsDecision {
    pub allowed: bool,
    /// Per-domain delay stretch the Politeness Gate should apply.
    pub delay_multiplier: f64,
    pub cache_hit: bool,
    pub ttl_class: TtlClass,
    pub status_code: Option<u16>,
}

/// Outcome of fetching a robots.txt document. Modeled as data so the cache
/// logic is testable without a network.
#[derive(Debug, Clone)]
pub enum RobotsFetchResult {
    Status { code: u16, body: String },
    Timeout,
    RedirectLoop,
    TransportError(String),
}

/// Transport seam for robots.txt retrieval.
#[async_trait]
pub trait RobotsTransport: Send + Sync {
    async fn fetch_robots(&self, robots_url: &str) -> RobotsFetchResult;
}

/// Production transport backed by reqwest with a bounded redirect budget.
pub struct ReqwestRobotsTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestRobotsTransport {
    pub fn new(config: &ComplianceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .timeout(config.robots_timeout)
            .build()?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl RobotsTransport for ReqwestRobotsTransport {
    async fn fetch_robots(&self, robots_url: &str) -> RobotsFetchResult {
        let response = self
            .client
            .get(robots_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                RobotsFetchResult::Status { code, body }
            }
            Err(e) if e.is_timeout() => RobotsFetchResult::Timeout,
            Err(e) if e.is_redirect() => RobotsFetchResult::RedirectLoop,
            Err(e) => RobotsFetchResult::TransportError(e.to_string()),
        }
    }
}

/// Per-domain robots policy cache with atomic replace-on-refresh.
pub struct RobotsPolicyCache {
    transport: Arc<dyn RobotsTransport>,
    user_agent: String,
    ttl_success: Duration,
    ttl_not_found: Duration,
    ttl_server_error: Duration,
    ttl_timeout: Duration,
    cache: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl RobotsPolicyCache {
    pub fn new(config: &ComplianceConfig, transport: Arc<dyn RobotsTransport>) -> Self {
        Self {
            transport,
            user_agent: config.user_agent.clone(),
            ttl_success: config.robots_ttl_success,
            ttl_not_found: config.robots_ttl_not_found,
            ttl_server_error: config.robots_ttl_server_error,
            ttl_timeout: config.robots_ttl_timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate robots policy for one URL, refreshing the domain entry if
    /// its TTL has lapsed. A refresh swaps the whole entry under the write
    /// lock, so no reader ever observes a half-updated policy.
    pub async fn evaluate(&self, url: &str) -> RobotsDecision {
        let Ok(parsed) = url::Url::parse(url) else {
            return RobotsDecision {
                allowed: false,
                delay_multiplier: 1.0,
                cache_hit: false,
                ttl_class: TtlClass::Timeout,
                status_code: None,
            };
        };
        let Some(host) = parsed.host_str() else {
            return RobotsDecision {
                allowed: false,
                delay_multiplier: 1.0,
                cache_hit: false,
                ttl_class: TtlClass::Timeout,
                status_code: None,
            };
        };

        let authority = match parsed.port() {
            Some(port) => format!("{}:{port}", host.to_ascii_lowercase()),
            None => host.to_ascii_lowercase(),
        };

        let cached = {
            let cache = self.cache.read().await;
            cache.get(&authority).cloned()
        };

        let (entry, cache_hit) = match cached {
            Some(entry) if Instant::now() < entry.effective_until => (entry, true),
            _ => {
                let entry = Arc::new(self.refresh(parsed.scheme(), &authority).await);
                let mut cache = self.cache.write().await;
                cache.insert(authority.clone(), Arc::clone(&entry));
                (entry, false)
            }
        };

        let path = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };

        let allowed = match entry.mode {
            PolicyMode::AllowAll | PolicyMode::AllowWithCaution => true,
            PolicyMode::Parsed => entry
                .rules
                .as_ref()
                .map(|rules| rules.allows(&path))
                .unwrap_or(true),
        };

        RobotsDecision {
            allowed,
            delay_multiplier: entry.delay_multiplier,
            cache_hit,
            ttl_class: entry.ttl_class,
            status_code: entry.status_code,
        }
    }

    async fn refresh(&self, scheme: &str, authority: &str) -> CacheEntry {
        let robots_url = format!("{scheme}://{authority}/robots.txt");
        let now = Instant::now();

        match self.transport.fetch_robots(&robots_url).await {
            RobotsFetchResult::Status { code: 200, body } => {
                debug!(domain = authority, "robots.txt parsed");
                CacheEntry {
                    mode: PolicyMode::Parsed,
                    rules: Some(RobotsRules::parse(&body, &self.user_agent)),
                    ttl_class: TtlClass::Success,
                    effective_until: now + self.ttl_success,
                    delay_multiplier: 1.0,
                    status_code: Some(200),
                }
            }
            RobotsFetchResult::Status { code: 404, .. } => {
                warn!(domain = authority, robots_url, "robots.txt not found; degrading to allow-all");
                CacheEntry {
                    mode: PolicyMode::AllowAll,
                    rules: None,
                    ttl_class: TtlClass::NotFound,
                    effective_until: now + self.ttl_not_found,
                    delay_multiplier: 1.0,
                    status_code: Some(404),
                }
            }
            RobotsFetchResult::Status { code, .. } if (500..=599).contains(&code) => {
                warn!(
                    domain = authority,
                    status = code,
                    "robots.txt server error; allowing at half rate until refresh"
                );
                CacheEntry {
                    mode: PolicyMode::AllowWithCaution,
                    rules: None,
                    ttl_class: TtlClass::ServerError,
                    effective_until: now + self.ttl_server_error,
                    delay_multiplier: 2.0,
                    status_code: Some(code),
                }
            }
            RobotsFetchResult::Status { code, .. } => {
                warn!(domain = authority, status = code, "unexpected robots.txt status; allowing");
                CacheEntry {
                    mode: PolicyMode::AllowAll,
                    rules: None,
                    ttl_class: TtlClass::Timeout,
                    effective_until: now + self.ttl_timeout,
                    delay_multiplier: 1.0,
                    status_code: Some(code),
                }
            }
            RobotsFetchResult::Timeout | RobotsFetchResult::RedirectLoop => {
                warn!(domain = authority, "robots.txt unreachable; allowing");
                CacheEntry {
                    mode: PolicyMode::AllowAll,
                    rules: None,
                    ttl_class: TtlClass::Timeout,
                    effective_until: now + self.ttl_timeout,
                    delay_multiplier: 1.0,
                    status_code: None,
                }
            }
            RobotsFetchResult::TransportError(reason) => {
                warn!(domain = authority, reason, "robots.txt request error; allowing at half rate");
                CacheEntry {
                    mode: PolicyMode::AllowWithCaution,
                    rules: None,
                    ttl_class: TtlClass::ServerError,
                    effective_until: now + self.ttl_server_error,
                    delay_multiplier: 2.0,
                    status_code: None,
                }
            }
        }
    }
}

/// Parsed robots rules for one agent: the most specific matching
/// `User-agent` group, falling back to the wildcard group.
#[derive(Debug, Clone)]
pub struct RobotsRules {
    /// `(allow, path_prefix)` in file order.
    rules: Vec<(bool, String)>,
}

impl RobotsRules {
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let agent_lower = user_agent.to_ascii_lowercase();

        // Collect groups: each group is (agent tokens, rules).
        let mut groups: Vec<(Vec<String>, Vec<(bool, String)>)> = Vec::new();
        let mut in_agent_block = false;

        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();

            match key.as_str() {
                "user-agent" => {
                    if in_agent_block {
                        if let Some(last) = groups.last_mut() {
                            last.0.push(value.to_ascii_lowercase());
                        }
                    } else {
                        groups.push((vec![value.to_ascii_lowercase()], Vec::new()));
                        in_agent_block = true;
                    }
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    if let Some(last) = groups.last_mut() {
                        last.1.push((key == "allow", value));
                    }
                }
                _ => {
                    in_agent_block = false;
                }
            }
        }

        // Prefer a group naming our agent; otherwise the wildcard group.
        let specific = groups.iter().find(|(agents, _)| {
            agents
                .iter()
                .any(|token| token != "*" && agent_lower.contains(token.as_str()))
        });
        let wildcard = groups.iter().find(|(agents, _)| agents.iter().any(|t| t == "*"));

        let rules = specific
            .or(wildcard)
            .map(|(_, rules)| rules.clone())
            .unwrap_or_default();

        Self { rules }
    }

    /// Longest-matching rule wins; ties go to Allow; an empty Disallow
    /// value allows everything.
    pub fn allows(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for (allow, prefix) in &self.rules {
            if prefix.is_empty() {
                continue;
            }
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                match best {
                    Some((best_len, best_allow)) => {
                        if len > best_len || (len == best_len && *allow && !best_allow) {
                            best = Some((len, *allow));
                        }
                    }
                    None => best = Some((len, *allow)),
                }
            }
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}
