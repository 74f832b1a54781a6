use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, COOKIE, PRAGMA, USER_AGENT,
};
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;
use crate::remote::PageTransport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Fetches the signal page over HTTP, reusing the browser's cookies.
#[derive(Clone)]
pub struct HttpPageClient {
    client: Client,
}

impl HttpPageClient {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageTransport for HttpPageClient {
    async fn get_page(&self, url: &str, cookie: &str) -> Result<String, TransportError> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .header(COOKIE, cookie)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }
}
