use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AutomationError;
use crate::session::browser::{BrowserAutomation, BrowserSession};

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireCookie {
    name: String,
    value: String,
}

/// Drives a chromedriver (or any W3C WebDriver endpoint) over HTTP.
#[derive(Clone)]
pub struct WebDriverAutomation {
    client: Client,
    base_url: String,
    headless: bool,
    open_sessions: Arc<Mutex<Vec<String>>>,
}

impl WebDriverAutomation {
    pub fn new(base_url: &str, headless: bool) -> Result<Self, AutomationError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headless,
            open_sessions: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, AutomationError> {
        Self::new(&cfg.webdriver_url, cfg.browser_headless)
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--window-size=1920,1080".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            format!("--user-agent={}", USER_AGENT),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserAutomation for WebDriverAutomation {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, AutomationError> {
        let url = format!("{}/session", self.base_url);
        let value = send(&self.client, Method::POST, &url, Some(self.capabilities())).await?;
        let created: NewSession = serde_json::from_value(value)
            .map_err(|e| AutomationError::Protocol(format!("new session: {}", e)))?;

        debug!("WebDriver session {} opened", created.session_id);
        self.open_sessions
            .lock()
            .await
            .push(created.session_id.clone());

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, created.session_id),
            id: created.session_id,
            registry: self.open_sessions.clone(),
            closed: false,
        }))
    }

    async fn release_all(&self) -> Result<(), AutomationError> {
        let ids: Vec<String> = self.open_sessions.lock().await.drain(..).collect();
        let mut last_err = None;
        for id in ids {
            info!("Closing leftover browser session {}", id);
            let url = format!("{}/session/{}", self.base_url, id);
            if let Err(e) = send(&self.client, Method::DELETE, &url, None).await {
                warn!("Failed to close browser session {}: {}", id, e);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct WebDriverSession {
    client: Client,
    session_url: String,
    id: String,
    registry: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

impl WebDriverSession {
    async fn find_element(&self, css_selector: &str) -> Result<Option<String>, AutomationError> {
        let url = format!("{}/element", self.session_url);
        let body = json!({ "using": "css selector", "value": css_selector });
        match send(&self.client, Method::POST, &url, Some(body)).await {
            Ok(value) => element_id(&value).map(Some),
            Err(AutomationError::WebDriver { error, .. }) if error == "no such element" => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn require_element(&self, css_selector: &str) -> Result<String, AutomationError> {
        self.find_element(css_selector)
            .await?
            .ok_or_else(|| AutomationError::WebDriver {
                error: "no such element".to_string(),
                message: css_selector.to_string(),
            })
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError> {
        let endpoint = format!("{}/url", self.session_url);
        send(&self.client, Method::POST, &endpoint, Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn is_present(&mut self, css_selector: &str) -> Result<bool, AutomationError> {
        Ok(self.find_element(css_selector).await?.is_some())
    }

    async fn fill(&mut self, css_selector: &str, text: &str) -> Result<(), AutomationError> {
        let element = self.require_element(css_selector).await?;
        let url = format!("{}/element/{}/value", self.session_url, element);
        send(&self.client, Method::POST, &url, Some(json!({ "text": text }))).await?;
        Ok(())
    }

    async fn click(&mut self, css_selector: &str) -> Result<(), AutomationError> {
        let element = self.require_element(css_selector).await?;
        let url = format!("{}/element/{}/click", self.session_url, element);
        send(&self.client, Method::POST, &url, Some(json!({}))).await?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, AutomationError> {
        let endpoint = format!("{}/url", self.session_url);
        let value = send(&self.client, Method::GET, &endpoint, None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AutomationError::Protocol(format!("current url: {}", value)))
    }

    async fn cookie_header(&mut self) -> Result<String, AutomationError> {
        let endpoint = format!("{}/cookie", self.session_url);
        let value = send(&self.client, Method::GET, &endpoint, None).await?;
        let cookies: Vec<WireCookie> = serde_json::from_value(value)
            .map_err(|e| AutomationError::Protocol(format!("cookies: {}", e)))?;
        Ok(format_cookies(&cookies))
    }

    async fn close(&mut self) -> Result<(), AutomationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.registry.lock().await.retain(|id| id != &self.id);
        send(&self.client, Method::DELETE, &self.session_url, None).await?;
        debug!("WebDriver session {} closed", self.id);
        Ok(())
    }
}

/// Sends one WebDriver command and unwraps the `value` envelope.
async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, AutomationError> {
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let envelope: Value = resp.json().await?;
    let value = envelope.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let err: WireError = serde_json::from_value(value.clone()).unwrap_or(WireError {
            error: status.to_string(),
            message: value.to_string(),
        });
        return Err(AutomationError::WebDriver {
            error: err.error,
            message: err.message,
        });
    }
    Ok(value)
}

fn element_id(value: &Value) -> Result<String, AutomationError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AutomationError::Protocol(format!("element reference: {}", value)))
}

fn format_cookies(cookies: &[WireCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
