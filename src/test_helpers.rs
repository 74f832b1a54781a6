use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{Config, Credentials, LoginTarget, DEFAULT_BASE_URL, DEFAULT_EXPIRY_MARKER};
use crate::error::{AutomationError, TransportError};
use crate::remote::PageTransport;
use crate::session::{BrowserAutomation, BrowserSession};

/// A page as served to a visitor without a valid session.
pub const EXPIRED_PAGE: &str =
    "<html><body><div class=\"notice\">To see trades in realtime, please log in</div></body></html>";

/// Config rooted at `root` with short timeouts and test credentials.
/// Built directly so the local environment cannot leak in.
pub fn test_config(root: &Path) -> Config {
    Config {
        signal_id: "201845".to_string(),
        base_url: DEFAULT_BASE_URL.to_string(),
        expiry_marker: DEFAULT_EXPIRY_MARKER.to_string(),
        credentials: Credentials::new("trader", "secret"),
        login: LoginTarget::default(),
        login_timeout_secs: 5,
        webdriver_url: "http://localhost:9515".to_string(),
        browser_headless: true,
        signal_dir: root.join("signals"),
        archive_dir: root.join("pages"),
        history_cap: 100,
        check_minutes: vec![14, 29, 44, 59],
        check_offset_secs: 1,
        check_interval_mins: 15,
        timezone: "UTC".to_string(),
        poll_interval_secs: 2,
        poll_timeout_secs: 60,
        shutdown_grace_secs: 60,
        log_level: "debug".to_string(),
    }
}

/// A trade table row with every canonical column.
pub fn trade_row(
    symbol: &str,
    time: &str,
    trade_type: &str,
    volume: &str,
    price: &str,
    stop_loss: &str,
    take_profit: &str,
) -> String {
    format!(
        "<tr class=\"trade\">\
         <td data-label=\"Symbol\">{}</td>\
         <td data-label=\"Time\">{}</td>\
         <td data-label=\"Type\">{}</td>\
         <td data-label=\"Volume\">{}</td>\
         <td data-label=\"Price\">{}</td>\
         <td data-label=\"S/L\">{}</td>\
         <td data-label=\"T/P\">{}</td>\
         </tr>",
        symbol, time, trade_type, volume, price, stop_loss, take_profit
    )
}

pub fn signal_page(rows: &[String]) -> String {
    format!(
        "<html><body><h1>Signal</h1><table class=\"trades\"><thead><tr><th>Symbol</th></tr></thead>\
         <tbody>{}</tbody></table></body></html>",
        rows.join("\n")
    )
}

// ── Browser ─────────────────────────────────────────────────

/// How the scripted browser behaves.
#[derive(Debug, Clone)]
pub struct BrowserScript {
    pub form_present: bool,
    pub accept_login: bool,
    pub cookies: String,
    pub fail_open: bool,
    pub fail_navigate: bool,
    /// Time each visit to the login page takes.
    pub navigate_delay: Duration,
}

impl Default for BrowserScript {
    fn default() -> Self {
        Self {
            form_present: true,
            accept_login: true,
            cookies: "sid=abc123; lang=en".to_string(),
            fail_open: false,
            fail_navigate: false,
            navigate_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
pub struct BrowserStats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub submits: AtomicUsize,
    pub releases: AtomicUsize,
    pub filled: Mutex<Vec<(String, String)>>,
}

#[derive(Clone)]
pub struct ScriptedBrowser {
    script: BrowserScript,
    stats: Arc<BrowserStats>,
}

impl ScriptedBrowser {
    pub fn new(script: BrowserScript) -> Self {
        Self {
            script,
            stats: Arc::new(BrowserStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<BrowserStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl BrowserAutomation for ScriptedBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, AutomationError> {
        if self.script.fail_open {
            return Err(AutomationError::Protocol("driver unavailable".to_string()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            stats: self.stats.clone(),
            url: "about:blank".to_string(),
        }))
    }

    async fn release_all(&self) -> Result<(), AutomationError> {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedSession {
    script: BrowserScript,
    stats: Arc<BrowserStats>,
    url: String,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError> {
        if self.script.fail_navigate {
            return Err(AutomationError::Protocol("navigation failed".to_string()));
        }
        if !self.script.navigate_delay.is_zero() {
            tokio::time::sleep(self.script.navigate_delay).await;
        }
        self.url = url.to_string();
        Ok(())
    }

    async fn is_present(&mut self, _css_selector: &str) -> Result<bool, AutomationError> {
        Ok(self.script.form_present)
    }

    async fn fill(&mut self, css_selector: &str, text: &str) -> Result<(), AutomationError> {
        if !self.script.form_present {
            return Err(AutomationError::Protocol(format!("no element {}", css_selector)));
        }
        self.stats
            .filled
            .lock()
            .await
            .push((css_selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn click(&mut self, _css_selector: &str) -> Result<(), AutomationError> {
        self.stats.submits.fetch_add(1, Ordering::SeqCst);
        if self.script.accept_login {
            self.url = "https://www.mql5.com/en".to_string();
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, AutomationError> {
        Ok(self.url.clone())
    }

    async fn cookie_header(&mut self) -> Result<String, AutomationError> {
        Ok(self.script.cookies.clone())
    }

    async fn close(&mut self) -> Result<(), AutomationError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Transport ───────────────────────────────────────────────

/// Serves queued responses in order, then `fallback` forever if set.
/// `Err(status)` answers with that HTTP status.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    queue: Arc<Mutex<VecDeque<Result<String, u16>>>>,
    fallback: Option<Result<String, u16>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<String, u16>>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    pub fn always(response: Result<String, u16>) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(url, cookie)` of every request so far.
    pub async fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PageTransport for ScriptedTransport {
    async fn get_page(&self, url: &str, cookie: &str) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .await
            .push((url.to_string(), cookie.to_string()));

        let next = self.queue.lock().await.pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(Ok(page)) => Ok(page),
            Some(Err(status)) => Err(TransportError::Status { status }),
            None => Err(TransportError::Status { status: 404 }),
        }
    }
}
