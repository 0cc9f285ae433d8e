use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for a single scrape-and-load cycle.
///
/// None of these are fatal to the scheduler: a job that returns one is
/// logged and retried at its next trigger.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The browser process could not be started or never reached a ready
    /// state (missing binary, early exit, no DevTools endpoint).
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// A page or element did not appear within its bounded wait.
    #[error("timed out after {waited:?} waiting for {what}")]
    NavigationTimeout { what: String, waited: Duration },

    /// A transactional write failed; the whole batch was rolled back.
    #[error("load failed: {0}")]
    Load(#[from] sqlx::Error),
}

impl HarvestError {
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        Self::NavigationTimeout {
            what: what.into(),
            waited,
        }
    }
}
