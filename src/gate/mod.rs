//! Market-state gate.
//!
//! Scheduled jobs that only make sense while the exchange is trading ask
//! the gate first. The gate is fail-closed: any failure to determine the
//! state counts as "not live".

use crate::browser;
use crate::config::{BrowserConfig, GateConfig, RetryPolicy};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

/// One attempt at answering "is the market live right now?".
#[async_trait]
pub trait MarketProbe: Send + Sync {
    async fn market_is_live(&self) -> anyhow::Result<bool>;
}

/// Bounded-retry wrapper around a probe. Never errors, never exceeds
/// `policy.attempts` probe calls; exhaustion means `false`.
pub struct MarketGate<P> {
    probe: P,
    policy: RetryPolicy,
}

impl<P: MarketProbe> MarketGate<P> {
    pub fn new(probe: P, policy: RetryPolicy) -> Self {
        Self { probe, policy }
    }

    pub async fn is_live(&self) -> bool {
        for attempt in 1..=self.policy.attempts {
            match self.probe.market_is_live().await {
                Ok(live) => {
                    info!("market live status: {}", live);
                    return live;
                }
                Err(e) => {
                    warn!(
                        "market status check failed (attempt {}/{}): {:#}",
                        attempt, self.policy.attempts, e
                    );
                    if attempt < self.policy.attempts {
                        sleep(self.policy.delay()).await;
                    }
                }
            }
        }
        false
    }
}

/// Probe backed by the exchange's status page. Every call acquires and
/// releases its own browser session; nothing leaks across probes.
pub struct StatusPageProbe {
    browser: BrowserConfig,
    url: String,
    marker: String,
}

impl StatusPageProbe {
    pub fn new(browser: BrowserConfig, gate: &GateConfig) -> Self {
        Self {
            browser,
            url: gate.status_url.clone(),
            marker: gate.live_marker.clone(),
        }
    }
}

/// Status badge on the exchange dashboard.
const STATUS_SELECTOR: &str = "div.market-depth div.market-status span:nth-of-type(2)";

#[async_trait]
impl MarketProbe for StatusPageProbe {
    async fn market_is_live(&self) -> anyhow::Result<bool> {
        let session = browser::acquire(&self.browser).await?;

        let result = async {
            let page = session.open_page(&self.url).await?;
            let element = session.wait_for_element(&page, STATUS_SELECTOR).await?;
            let text = element
                .inner_text()
                .await?
                .unwrap_or_default()
                .to_lowercase();
            info!("market status text: {}", text);
            Ok::<bool, anyhow::Error>(text.contains(&self.marker))
        }
        .await;

        session.release().await;
        result
    }
}

/// Construct the production gate from configuration.
pub fn status_gate(browser: BrowserConfig, gate: &GateConfig) -> MarketGate<StatusPageProbe> {
    MarketGate::new(StatusPageProbe::new(browser, gate), gate.probe)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketProbe for FailingProbe {
        async fn market_is_live(&self) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("status page unreachable")
        }
    }

    struct LiveProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketProbe for LiveProbe {
        async fn market_is_live(&self) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn fails_closed_after_exact_retry_budget() {
        let gate = MarketGate::new(
            FailingProbe {
                calls: AtomicUsize::new(0),
            },
            RetryPolicy::new(3, 0),
        );
        assert!(!gate.is_live().await);
        assert_eq!(gate.probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_on_first_success() {
        let gate = MarketGate::new(
            LiveProbe {
                calls: AtomicUsize::new(0),
            },
            RetryPolicy::new(3, 0),
        );
        assert!(gate.is_live().await);
        assert_eq!(gate.probe.calls.load(Ordering::SeqCst), 1);
    }
}
