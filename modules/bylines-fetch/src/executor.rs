//! Compliant fetch executor — composes the SSRF validator, the robots
//! policy cache and the politeness gate, and records exactly one
//! `FetchOutcome` per call.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use bylines_common::{ComplianceConfig, FetchErrorKind, FetchOutcome, FetchedDoc};

use crate::error::SecurityError;
use crate::politeness::PolitenessGate;
use crate::robots::{ReqwestRobotsTransport, RobotsPolicyCache};
use crate::security::UrlValidator;

pub struct CompliantFetcher {
    config: ComplianceConfig,
    validator: UrlValidator,
    robots: Arc<RobotsPolicyCache>,
    gate: Arc<PolitenessGate>,
    client: reqwest::Client,
}

impl CompliantFetcher {
    /// Production wiring: reqwest-backed robots transport, default
    /// validator, gate sized from config.
    pub fn new(config: ComplianceConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let transport = Arc::new(ReqwestRobotsTransport::new(&config)?);
        let robots = Arc::new(RobotsPolicyCache::new(&config, transport));
        let gate = Arc::new(PolitenessGate::new(
            config.per_domain_delay,
            config.max_global_concurrency,
        ));
        Self::with_parts(config, UrlValidator::new(), robots, gate)
    }

    /// Injectable wiring. Tests pass a validator with a fixture-host bypass
    /// and a stub robots transport.
    pub fn with_parts(
        config: ComplianceConfig,
        validator: UrlValidator,
        robots: Arc<RobotsPolicyCache>,
        gate: Arc<PolitenessGate>,
    ) -> anyhow::Result<Self> {
        // Redirects are followed manually so every hop is re-validated.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            config,
            validator,
            robots,
            gate,
            client,
        })
    }

    /// Fetch one URL under full compliance checks. Never errors outward:
    /// every call yields exactly one run-tagged `FetchOutcome`, plus the
    /// document when the fetch succeeded.
    pub async fn fetch(&self, url: &str, run_id: Uuid) -> (Option<FetchedDoc>, FetchOutcome) {
        let start = Instant::now();
        let result = self.fetch_inner(url).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(mut doc) => {
                doc.latency_ms = latency_ms;
                let outcome = FetchOutcome {
                    id: Uuid::new_v4(),
                    url: url.to_string(),
                    status_code: Some(doc.status_code as i64),
                    latency_ms: Some(latency_ms),
                    bytes_received: Some(doc.body.len() as i64),
                    error_kind: None,
                    created_at: chrono::Utc::now(),
                    run_id,
                };
                info!(
                    url,
                    status = doc.status_code,
                    bytes = doc.body.len(),
                    latency_ms,
                    "Fetched"
                );
                (Some(doc), outcome)
            }
            Err(kind) => {
                warn!(url, error_kind = ?kind, latency_ms, "Fetch rejected");
                (None, FetchOutcome::error(url, kind, latency_ms, run_id))
            }
        }
    }

    async fn fetch_inner(&self, url: &str) -> Result<FetchedDoc, FetchErrorKind> {
        // Steps 1-2: protocol allowlist and resolved-address check. No
        // network request is issued for a blocked target.
        self.validator
            .validate_resolved(url)
            .await
            .map_err(map_security)?;

        // Step 3: robots policy.
        let decision = self.robots.evaluate(url).await;
        if !decision.allowed {
            return Err(FetchErrorKind::BlockedByRobots);
        }

        let parsed = url::Url::parse(url).map_err(|_| FetchErrorKind::FetchError)?;
        let domain = parsed
            .host_str()
            .ok_or(FetchErrorKind::FetchError)?
            .to_ascii_lowercase();

        // Step 4: politeness admission, stretched if robots signalled a
        // degraded origin.
        let _permit = self
            .gate
            .acquire(&domain, decision.delay_multiplier)
            .await
            .map_err(|_| FetchErrorKind::FetchError)?;

        // Step 5: manual redirect chain, re-validating each hop.
        let mut current = url.to_string();
        let mut hops = 0u32;
        let response = loop {
            let resp = self
                .client
                .get(&current)
                .header(USER_AGENT, &self.config.user_agent)
                .timeout(self.config.fetch_timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchErrorKind::Timeout
                    } else {
                        FetchErrorKind::FetchError
                    }
                })?;

            if !resp.status().is_redirection() {
                break resp;
            }
            let Some(location) = resp
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
            else {
                break resp;
            };

            if hops >= self.config.max_redirects {
                return Err(FetchErrorKind::RedirectLimit);
            }
            hops += 1;

            let next = url::Url::parse(&current)
                .ok()
                .and_then(|base| base.join(&location).ok())
                .ok_or(FetchErrorKind::FetchError)?;

            // No downgrade via redirect: the hop target passes the same
            // scheme and address checks as the original URL.
            self.validator
                .validate_resolved(next.as_str())
                .await
                .map_err(map_security)?;

            current = next.to_string();
        };

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // 304: nothing new; succeed with an empty body.
        if status_code == 304 {
            return Ok(FetchedDoc {
                status_code,
                final_url: current,
                content_type,
                body: Vec::new(),
                body_sha256: None,
                latency_ms: 0,
            });
        }

        // Step 6: content-type-aware byte ceiling, enforced while streaming.
        let limit = self.config.body_limit_for(content_type.as_deref());
        if limit == 0 {
            warn!(url = current, content_type, "Content type disabled by policy");
            return Err(FetchErrorKind::BodyTooLarge);
        }

        let mut response = response;
        let mut body: Vec<u8> = Vec::new();
        loop {
            let chunk = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    FetchErrorKind::Timeout
                } else {
                    FetchErrorKind::FetchError
                }
            })?;
            let Some(chunk) = chunk else { break };
            if (body.len() + chunk.len()) as u64 > limit {
                warn!(url = current, limit, "Body exceeds configured ceiling");
                return Err(FetchErrorKind::BodyTooLarge);
            }
            body.extend_from_slice(&chunk);
        }

        let body_sha256 = if body.is_empty() {
            None
        } else {
            Some(hex::encode(Sha256::digest(&body)))
        };

        Ok(FetchedDoc {
            status_code,
            final_url: current,
            content_type,
            body,
            body_sha256,
            latency_ms: 0,
        })
    }
}

fn map_security(error: SecurityError) -> FetchErrorKind {
    match error {
        SecurityError::DisallowedScheme(_)
        | SecurityError::BlockedHost(_)
        | SecurityError::BlockedCidr(_) => FetchErrorKind::SecurityBlocked,
        SecurityError::NoHost | SecurityError::UrlParse(_) | SecurityError::DnsResolution(_) => {
            FetchErrorKind::FetchError
        }
    }
}
