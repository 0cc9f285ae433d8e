//! Browser session lifecycle.
//!
//! One `Session` owns one Chromium process, its control connection, and the
//! watchdog tracking every pid the launch produced. Sessions are created per
//! scrape, owned by exactly one job, and must be released through
//! [`Session::release`], which walks an ordered sequence of independent
//! best-effort teardown steps and ends with per-pid verification.

pub mod watchdog;

use crate::config::BrowserConfig;
use crate::error::HarvestError;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::{Element, Page};
use futures::io::{AsyncBufReadExt, BufReader};
use futures::StreamExt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use self::watchdog::{ProcessWatchdog, TeardownReport};

const ELEMENT_POLL: Duration = Duration::from_millis(500);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Some of the source sites serve a degraded page to headless defaults.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closing,
    Closed,
}

/// One live browser instance plus everything needed to tear it down.
pub struct Session {
    browser: Browser,
    child: Child,
    handler_task: JoinHandle<()>,
    watchdog: ProcessWatchdog,
    pages: Mutex<Vec<Page>>,
    state: SessionState,
    nav_timeout: Duration,
    element_timeout: Duration,
}

/// Launch a browser and return an Active session.
///
/// Fails with [`HarvestError::Launch`] when the binary is missing or the
/// process exits before exposing its DevTools endpoint.
pub async fn acquire(cfg: &BrowserConfig) -> Result<Session, HarvestError> {
    let chrome_cfg = build_chrome_config(cfg)?;

    let mut child = chrome_cfg
        .launch()
        .map_err(|e| HarvestError::Launch(format!("failed to spawn browser: {e}")))?;

    let launch_timeout = Duration::from_secs(cfg.launch_timeout_secs);
    let ws_url = match extract_ws_url(&mut child, launch_timeout).await {
        Ok(url) => url,
        Err(e) => {
            let _ = child.kill().await;
            return Err(HarvestError::Launch(e.to_string()));
        }
    };

    let (browser, mut handler) = Browser::connect(&ws_url)
        .await
        .map_err(|e| HarvestError::Launch(format!("devtools connect: {e}")))?;

    // The handler must be drained for the connection to make progress.
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("browser handler event error: {e}");
            }
        }
    });

    let watchdog = ProcessWatchdog::track(child.inner.id().expect("browser child pid"));

    let mut session = Session {
        browser,
        child,
        handler_task,
        watchdog,
        pages: Mutex::new(Vec::new()),
        state: SessionState::Created,
        nav_timeout: Duration::from_secs(cfg.nav_timeout_secs),
        element_timeout: Duration::from_secs(cfg.element_timeout_secs),
    };
    session.state = SessionState::Active;
    Ok(session)
}

fn build_chrome_config(cfg: &BrowserConfig) -> Result<ChromeConfig, HarvestError> {
    let mut builder = ChromeConfig::builder()
        .no_sandbox()
        .launch_timeout(Duration::from_secs(cfg.launch_timeout_secs))
        .args(vec![
            "--disable-setuid-sandbox",
            "--disable-infobars",
            "--window-position=0,0",
            "--ignore-certificate-errors",
            "--ignore-certificate-errors-spki-list",
            "--disable-dev-shm-usage",
            "--no-first-run",
            "--no-default-browser-check",
            "--mute-audio",
        ]);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }

    builder
        .build()
        .map_err(|e| HarvestError::Launch(format!("browser config: {e}")))
}

/// Read the DevTools websocket URL from Chromium's stderr.
async fn extract_ws_url(child: &mut Child, wait: Duration) -> anyhow::Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("browser process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some((_, ws)) = line.rsplit_once("listening on ") {
                let ws = ws.trim();
                if ws.starts_with("ws") && ws.contains("devtools/browser") {
                    return Ok(ws.to_string());
                }
            }
        }
        Err(anyhow::anyhow!(
            "browser exited before exposing its devtools endpoint"
        ))
    };

    timeout(wait, reader)
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for devtools endpoint"))?
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tracked_pids(&self) -> &[u32] {
        self.watchdog.pids()
    }

    /// Open a tab and navigate it, bounded by the configured timeout. The
    /// page is recorded so release can close it.
    pub async fn open_page(&self, url: &str) -> Result<Page, HarvestError> {
        let page = timeout(self.nav_timeout, self.browser.new_page(url))
            .await
            .map_err(|_| HarvestError::timeout(url.to_string(), self.nav_timeout))?
            .map_err(|e| HarvestError::timeout(format!("{url}: {e}"), self.nav_timeout))?;

        if let Err(e) = page.set_user_agent(USER_AGENT).await {
            debug!("user agent override failed: {e}");
        }

        self.pages
            .lock()
            .expect("pages lock poisoned")
            .push(page.clone());
        Ok(page)
    }

    /// Bounded wait for a selector to render.
    pub async fn wait_for_element(
        &self,
        page: &Page,
        css: &str,
    ) -> Result<Element, HarvestError> {
        wait_for_element(page, css, self.element_timeout).await
    }

    /// Ordered best-effort teardown: close pages, close the browser, drop
    /// the control channel, then force-terminate whatever graceful close
    /// left behind. Every step's failure is logged and the sequence
    /// continues. The tracked pid set is cleared unconditionally.
    pub async fn release(mut self) -> TeardownReport {
        self.state = SessionState::Closing;

        let pages: Vec<Page> = self
            .pages
            .lock()
            .expect("pages lock poisoned")
            .drain(..)
            .collect();
        for page in pages {
            match page.close().await {
                Ok(_) => info!("page closed"),
                Err(e) => warn!("error closing page: {e}"),
            }
        }

        let graceful = match self.browser.close().await {
            Ok(_) => {
                info!("browser closed gracefully");
                true
            }
            Err(e) => {
                warn!("error closing browser gracefully: {e}");
                false
            }
        };

        // Residual control channel.
        self.handler_task.abort();

        let mut watchdog = std::mem::take(&mut self.watchdog);
        let report = tokio::task::spawn_blocking(move || {
            let report = if graceful {
                watchdog.liveness_report()
            } else {
                info!("attempting to close browser forcefully");
                watchdog.force_terminate(TERMINATE_GRACE)
            };
            let survivors = watchdog.verify();
            if !survivors.is_empty() {
                warn!("teardown incomplete, still alive: {:?}", survivors);
            }
            watchdog.clear();
            report
        })
        .await
        .unwrap_or_default();

        // Reap the root child so it cannot linger as a zombie; harmless if
        // it already exited.
        if let Err(e) = self.child.kill().await {
            debug!("browser child reap: {e}");
        }

        self.state = SessionState::Closed;
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            warn!("session dropped without release; aborting control channel");
            self.handler_task.abort();
        }
    }
}

/// Poll for a selector until it renders or the bound elapses.
pub async fn wait_for_element(
    page: &Page,
    css: &str,
    wait: Duration,
) -> Result<Element, HarvestError> {
    let deadline = Instant::now() + wait;
    loop {
        if let Ok(element) = page.find_element(css).await {
            return Ok(element);
        }
        if Instant::now() >= deadline {
            return Err(HarvestError::timeout(css.to_string(), wait));
        }
        sleep(ELEMENT_POLL).await;
    }
}
