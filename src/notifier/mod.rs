//! Announcement notification sink.
//!
//! One POST per newly observed announcement. Failures are logged and never
//! surface to the load that preceded them.

use crate::config::NotifierConfig;
use reqwest::Client;
use tracing::{error, info, warn};
use url::Url;

pub struct Notifier {
    client: Client,
    endpoint: Option<Url>,
}

impl Notifier {
    pub fn new(cfg: &NotifierConfig) -> Self {
        let endpoint = if cfg.enabled {
            match Url::parse(&cfg.endpoint) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("invalid notification endpoint {:?}: {}", cfg.endpoint, e);
                    None
                }
            }
        } else {
            None
        };

        // The upstream endpoint serves a self-signed certificate.
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();

        Self { client, endpoint }
    }

    pub async fn announce(&self, symbol: &str) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        match self.client.post(endpoint.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("notification sent for {} ({})", symbol, resp.status());
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!(
                    "notification for {} failed with status {}: {}",
                    symbol, status, body
                );
            }
            Err(e) => {
                error!("error calling notification endpoint for {}: {}", symbol, e);
            }
        }
    }
}
