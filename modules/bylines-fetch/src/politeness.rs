//! Politeness controls: global admission tokens plus per-domain spacing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How often a caller re-checks a domain that is currently in flight.
const IN_FLIGHT_RECHECK: Duration = Duration::from_millis(5);

/// Admission control for outbound fetches.
///
/// `acquire` blocks until a global token is free and the domain's spacing
/// window has elapsed, counted from the previous attempt's *completion*.
/// The domain is claimed at admission, so two callers never hold it in
/// flight at once even when spare global tokens exist. Tokens are handed
/// out FIFO (the tokio semaphore is fair), so blocked callers never
/// starve. The global ceiling is a policy value — raising it changes no
/// other contract.
pub struct PolitenessGate {
    per_domain_delay: Duration,
    semaphore: Arc<Semaphore>,
    domains: Arc<Mutex<DomainTable>>,
}

#[derive(Default)]
struct DomainTable {
    next_allowed: HashMap<String, Instant>,
    in_flight: HashSet<String>,
}

impl PolitenessGate {
    pub fn new(per_domain_delay: Duration, max_global_concurrency: usize) -> Self {
        Self {
            per_domain_delay,
            semaphore: Arc::new(Semaphore::new(max_global_concurrency.max(1))),
            domains: Arc::new(Mutex::new(DomainTable::default())),
        }
    }

    /// Block until this domain may issue its next request. The returned
    /// permit holds the global token and the domain claim; dropping it
    /// records the completion time that starts the next spacing window.
    ///
    /// `delay_multiplier` stretches the domain's window (robots 5xx signals
    /// 2.0 until a successful refresh).
    pub async fn acquire(&self, domain: &str, delay_multiplier: f64) -> Result<PolitenessPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("politeness semaphore closed"))?;

        loop {
            let wait = {
                let mut table = self.domains.lock().expect("politeness lock poisoned");
                if table.in_flight.contains(domain) {
                    Some(IN_FLIGHT_RECHECK)
                } else {
                    let wait = table
                        .next_allowed
                        .get(domain)
                        .map(|next| next.saturating_duration_since(Instant::now()))
                        .unwrap_or(Duration::ZERO);
                    if wait.is_zero() {
                        table.in_flight.insert(domain.to_string());
                        None
                    } else {
                        Some(wait)
                    }
                }
            };
            let Some(wait) = wait else { break };
            tokio::time::sleep(wait).await;
        }

        let effective = self.per_domain_delay.as_secs_f64() * delay_multiplier.max(0.0);
        Ok(PolitenessPermit {
            _permit: permit,
            domains: Arc::clone(&self.domains),
            domain: domain.to_string(),
            delay: Duration::from_secs_f64(effective),
        })
    }
}

/// RAII admission token. Dropping it releases the global slot and the
/// domain claim, and records when the domain's next request becomes
/// eligible.
pub struct PolitenessPermit {
    _permit: OwnedSemaphorePermit,
    domains: Arc<Mutex<DomainTable>>,
    domain: String,
    delay: Duration,
}

impl Drop for PolitenessPermit {
    fn drop(&mut self) {
        if let Ok(mut table) = self.domains.lock() {
            table.in_flight.remove(&self.domain);
            table
                .next_allowed
                .insert(self.domain.clone(), Instant::now() + self.delay);
        }
    }
}
