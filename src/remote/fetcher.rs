use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::output::PageArchive;
use crate::remote::PageTransport;
use crate::session::SessionManager;

/// Re-logins allowed per `fetch` call when the page reports an expired
/// session.
const MAX_RELOGINS: usize = 1;

/// Retrieves the provider page with the current session and keeps a raw
/// copy of every page it returns.
pub struct Fetcher {
    transport: Arc<dyn PageTransport>,
    session: SessionManager,
    archive: PageArchive,
    signal_url: String,
    expiry_marker: String,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn PageTransport>,
        session: SessionManager,
        archive: PageArchive,
        signal_url: impl Into<String>,
        expiry_marker: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session,
            archive,
            signal_url: signal_url.into(),
            expiry_marker: expiry_marker.into(),
        }
    }

    pub fn from_config(
        cfg: &Config,
        transport: Arc<dyn PageTransport>,
        session: SessionManager,
        archive: PageArchive,
    ) -> Self {
        Self::new(
            transport,
            session,
            archive,
            cfg.signal_url(),
            cfg.expiry_marker.clone(),
        )
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    /// Page URL with a cache-busting parameter.
    pub fn request_url(&self, epoch_millis: i64) -> String {
        let sep = if self.signal_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}source=Site+Signals+Subscriptions&nocache={}",
            self.signal_url, sep, epoch_millis
        )
    }

    /// Fetches the page, logging in first if needed. An expired session is
    /// renewed at most once per call; a page that still reports expiry
    /// afterwards is an error rather than another round.
    pub async fn fetch(&mut self) -> Result<String, FetchError> {
        if !self.session.is_authenticated() {
            self.session.login().await?;
        }

        let mut content = self.get().await?;
        let mut relogins = 0;
        while self.is_expired(&content) {
            self.session.invalidate();
            if relogins == MAX_RELOGINS {
                warn!("Page still reports an expired session after re-login");
                return Err(FetchError::SessionExpired);
            }
            relogins += 1;
            info!("Session expired, performing new login");
            self.session.login().await?;
            content = self.get().await?;
        }

        match self.archive.store(&content) {
            Ok(path) => debug!("Page saved to {}", path.display()),
            Err(e) => warn!("Could not archive page: {}", e),
        }
        Ok(content)
    }

    fn is_expired(&self, content: &str) -> bool {
        !self.expiry_marker.is_empty() && content.contains(&self.expiry_marker)
    }

    async fn get(&mut self) -> Result<String, FetchError> {
        let url = self.request_url(Utc::now().timestamp_millis());
        let cookie = self.session.token().unwrap_or_default().to_string();
        info!("Fetching page: {}", url);

        match self.transport.get_page(&url, &cookie).await {
            Ok(content) => Ok(content),
            Err(e) => {
                error!("Error fetching page via HTTP: {}", e);
                self.session.invalidate();
                Err(e.into())
            }
        }
    }
}
