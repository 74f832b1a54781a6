use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use signal_mirror::config::{Config, Credentials, LoginTarget};
use signal_mirror::error::{AutomationError, TransportError};
use signal_mirror::remote::PageTransport;
use signal_mirror::session::{BrowserAutomation, BrowserSession};

pub fn test_config(root: &Path) -> Config {
    Config {
        signal_id: "201845".to_string(),
        base_url: "https://www.mql5.com/en/signals".to_string(),
        expiry_marker: "To see trades in realtime, please log in".to_string(),
        credentials: Credentials::new("trader", "secret"),
        login: LoginTarget::default(),
        login_timeout_secs: 10,
        webdriver_url: "http://localhost:9515".to_string(),
        browser_headless: true,
        signal_dir: root.join("signals"),
        archive_dir: root.join("pages"),
        history_cap: 3,
        check_minutes: vec![14, 29, 44, 59],
        check_offset_secs: 1,
        check_interval_mins: 15,
        timezone: "UTC".to_string(),
        poll_interval_secs: 2,
        poll_timeout_secs: 60,
        shutdown_grace_secs: 60,
        log_level: "info".to_string(),
    }
}

pub fn page(rows: &[(&str, &str, &str)]) -> String {
    let body: Vec<String> = rows
        .iter()
        .map(|(symbol, kind, price)| {
            format!(
                "<tr><td class=\"s\" data-label=\"Symbol\"><a href=\"#\">{}</a></td>\
                 <td data-label=\"Time\">2024.03.12&nbsp;10:14</td>\
                 <td data-label=\"Type\">{}</td>\
                 <td data-label=\"Volume\">0.10</td>\
                 <td data-label=\"Price\">{}</td>\
                 <td data-label=\"S/L\"></td>\
                 <td data-label=\"T/P\"></td></tr>",
                symbol, kind, price
            )
        })
        .collect();
    format!(
        "<html><body><table><tbody>{}</tbody></table></body></html>",
        body.join("")
    )
}

pub const LOGGED_OUT: &str = "<html><p>To see trades in realtime, please log in</p></html>";

/// A browser whose login always succeeds unless `cookies` is empty.
#[derive(Clone, Default)]
pub struct MockBrowser {
    pub cookies: String,
    pub logins: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl MockBrowser {
    pub fn new(cookies: &str) -> Self {
        Self {
            cookies: cookies.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl BrowserAutomation for MockBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, AutomationError> {
        Ok(Box::new(MockTab {
            cookies: self.cookies.clone(),
            logins: self.logins.clone(),
            url: String::new(),
        }))
    }

    async fn release_all(&self) -> Result<(), AutomationError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockTab {
    cookies: String,
    logins: Arc<AtomicUsize>,
    url: String,
}

#[async_trait]
impl BrowserSession for MockTab {
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError> {
        self.url = url.to_string();
        Ok(())
    }

    async fn is_present(&mut self, _css_selector: &str) -> Result<bool, AutomationError> {
        Ok(true)
    }

    async fn fill(&mut self, _css_selector: &str, _text: &str) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn click(&mut self, _css_selector: &str) -> Result<(), AutomationError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.url = "https://www.mql5.com/en/signals".to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, AutomationError> {
        Ok(self.url.clone())
    }

    async fn cookie_header(&mut self) -> Result<String, AutomationError> {
        Ok(self.cookies.clone())
    }

    async fn close(&mut self) -> Result<(), AutomationError> {
        Ok(())
    }
}

/// Serves pages in order and repeats the last one once the list runs out.
#[derive(Clone)]
pub struct MockSite {
    pages: Arc<Mutex<VecDeque<String>>>,
    last: Arc<Mutex<String>>,
    pub hits: Arc<AtomicUsize>,
}

impl MockSite {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages.into())),
            last: Arc::new(Mutex::new(String::new())),
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageTransport for MockSite {
    async fn get_page(&self, _url: &str, cookie: &str) -> Result<String, TransportError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if cookie.is_empty() {
            return Err(TransportError::Status { status: 403 });
        }
        let next = self.pages.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(page) = next {
            *last = page;
        }
        Ok(last.clone())
    }
}
