//! Compliance configuration.
//!
//! Everything here defaults to safe-and-slow. There is deliberately no field
//! that turns robots enforcement or the SSRF checks off; the only knobs are
//! how conservative the limits are.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Fetch-layer compliance settings shared by the gate, the robots cache and
/// the executor.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    /// User-Agent sent with every request, including robots.txt fetches.
    pub user_agent: String,
    /// Minimum gap between two requests to the same domain.
    pub per_domain_delay: Duration,
    /// Global in-flight fetch ceiling. Reference configuration: 1 (serial).
    pub max_global_concurrency: usize,
    /// Per-request timeout, covering the whole redirect chain.
    pub fetch_timeout: Duration,
    /// Timeout for robots.txt fetches.
    pub robots_timeout: Duration,
    /// Redirect hop budget per fetch.
    pub max_redirects: u32,
    /// Byte ceiling for content types not listed in `max_body_bytes_by_type`.
    /// Required explicitly; there is no implicit fallback.
    pub max_body_bytes_default: u64,
    /// Per-content-type byte ceilings. A value of 0 refuses the type before
    /// the first body byte is read.
    pub max_body_bytes_by_type: HashMap<String, u64>,
    /// Robots policy TTLs per failure mode.
    pub robots_ttl_success: Duration,
    pub robots_ttl_not_found: Duration,
    pub robots_ttl_server_error: Duration,
    pub robots_ttl_timeout: Duration,
}

impl ComplianceConfig {
    /// Reference configuration: serial fetching, 5s per-domain gap, 30s
    /// timeouts, 5 redirect hops. `max_body_bytes_default` has no safe
    /// universal value, so it must be supplied.
    pub fn new(max_body_bytes_default: u64) -> Self {
        Self {
            user_agent: "bylines-collector/0.1 (+https://github.com/fourthplaces/bylines)"
                .to_string(),
            per_domain_delay: Duration::from_secs(5),
            max_global_concurrency: 1,
            fetch_timeout: Duration::from_secs(30),
            robots_timeout: Duration::from_secs(30),
            max_redirects: 5,
            max_body_bytes_default,
            max_body_bytes_by_type: HashMap::new(),
            robots_ttl_success: Duration::from_secs(3600),
            robots_ttl_not_found: Duration::from_secs(4 * 3600),
            robots_ttl_server_error: Duration::from_secs(15 * 60),
            robots_ttl_timeout: Duration::from_secs(3600),
        }
    }

    /// Load overrides from environment variables. `BYLINES_MAX_BODY_BYTES`
    /// is required; the rest fall back to the reference values.
    pub fn from_env() -> Result<Self> {
        let default_limit: u64 = env::var("BYLINES_MAX_BODY_BYTES")
            .context("BYLINES_MAX_BODY_BYTES is required (no implicit body-size fallback)")?
            .parse()
            .context("BYLINES_MAX_BODY_BYTES must be an integer byte count")?;

        let mut config = Self::new(default_limit);

        if let Ok(value) = env::var("BYLINES_USER_AGENT") {
            config.user_agent = value;
        }
        if let Ok(value) = env::var("BYLINES_PER_DOMAIN_DELAY_MS") {
            config.per_domain_delay = Duration::from_millis(
                value.parse().context("BYLINES_PER_DOMAIN_DELAY_MS must be milliseconds")?,
            );
        }
        if let Ok(value) = env::var("BYLINES_MAX_GLOBAL_CONCURRENCY") {
            config.max_global_concurrency = value
                .parse()
                .context("BYLINES_MAX_GLOBAL_CONCURRENCY must be an integer")?;
        }
        if let Ok(value) = env::var("BYLINES_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(
                value.parse().context("BYLINES_FETCH_TIMEOUT_SECS must be seconds")?,
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Byte ceiling for a Content-Type header value. Parameters after `;`
    /// are ignored for the lookup.
    pub fn body_limit_for(&self, content_type: Option<&str>) -> u64 {
        let Some(raw) = content_type else {
            return self.max_body_bytes_default;
        };
        let normalized = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        self.max_body_bytes_by_type
            .get(&normalized)
            .copied()
            .unwrap_or(self.max_body_bytes_default)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_global_concurrency >= 1,
            "max_global_concurrency must be >= 1"
        );
        anyhow::ensure!(self.max_redirects >= 1, "max_redirects must be >= 1");
        anyhow::ensure!(
            !self.user_agent.trim().is_empty(),
            "user_agent must identify the collector"
        );
        Ok(())
    }
}
