pub mod chukul;
pub mod cleaner;
pub mod merolagani;
pub mod nepalstock;
pub mod parsers;
pub mod sharesansar;

use crate::browser::Session;
use crate::models::RawRecord;
use anyhow::Result;
use async_trait::async_trait;

// ── Adapter seam ──────────────────────────────────────────────────────────────

/// Site-specific extraction logic.
///
/// An adapter drives pages opened from the caller's session and returns the
/// rows it found; it never acquires or releases the session itself.
#[async_trait]
pub trait ScrapeAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>>;
}
