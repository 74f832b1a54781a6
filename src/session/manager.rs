use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Credentials, LoginTarget};
use crate::error::{AuthenticationError, AutomationError};
use crate::session::browser::{BrowserAutomation, BrowserSession};

const WAIT_POLL_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Expired => write!(f, "expired"),
        }
    }
}

/// Cookie header obtained from the last successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: String,
    valid: bool,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Owns the login state of the monitor.
///
/// Logins go through a real browser because the provider's login form is
/// script driven; the resulting cookies are then reused by plain HTTP
/// fetches until the page reports the session as expired.
pub struct SessionManager {
    automation: Arc<dyn BrowserAutomation>,
    credentials: Credentials,
    target: LoginTarget,
    timeout: Duration,
    state: SessionState,
    session: Session,
    logins: u64,
}

impl SessionManager {
    pub fn new(automation: Arc<dyn BrowserAutomation>, cfg: &Config) -> Self {
        Self::with_parts(
            automation,
            cfg.credentials.clone(),
            cfg.login.clone(),
            cfg.login_timeout(),
        )
    }

    pub fn with_parts(
        automation: Arc<dyn BrowserAutomation>,
        credentials: Credentials,
        target: LoginTarget,
        timeout: Duration,
    ) -> Self {
        Self {
            automation,
            credentials,
            target,
            timeout,
            state: SessionState::Unauthenticated,
            session: Session::default(),
            logins: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The cookie header, only while the session is usable.
    pub fn token(&self) -> Option<&str> {
        (self.state == SessionState::Authenticated && self.session.valid)
            .then(|| self.session.token.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Number of successful logins so far.
    pub fn login_count(&self) -> u64 {
        self.logins
    }

    /// Runs the browser login and stores the resulting cookie header.
    ///
    /// Exactly one browser session is opened per call and it is closed on
    /// every exit path, including when the returned future is dropped
    /// mid-login. An abandoned login leaves the manager `Unauthenticated`.
    pub async fn login(&mut self) -> Result<(), AuthenticationError> {
        if !self.credentials.is_complete() {
            self.reset();
            return Err(AuthenticationError::MissingCredentials);
        }

        info!("Starting browser login as {}", self.credentials.username);
        let attempt = LoginAttempt::begin(&mut self.state, &mut self.session);

        let mut browser = match self.automation.open().await {
            Ok(b) => OpenBrowser::new(b),
            Err(e) => {
                error!("Could not start browser: {}", e);
                return Err(e.into());
            }
        };

        let result = match browser.session() {
            Ok(session) => {
                drive_login(session, &self.target, &self.credentials, self.timeout).await
            }
            Err(e) => Err(e.into()),
        };
        browser.close().await;

        match result {
            Ok(token) => {
                attempt.complete(token);
                self.logins += 1;
                info!("Login successful, session cookie extracted");
                Ok(())
            }
            Err(e) => {
                error!("Login failed: {}", e);
                Err(e)
            }
        }
    }

    /// Marks the session as expired. Calling it again changes nothing.
    pub fn invalidate(&mut self) {
        self.session.valid = false;
        if self.state == SessionState::Authenticated {
            info!("Session marked as expired");
            self.state = SessionState::Expired;
        }
    }

    /// Closes any browser still held by the automation backend.
    pub async fn release(&self) {
        match self.automation.release_all().await {
            Ok(()) => debug!("Browser automation released"),
            Err(e) => warn!("Failed to release browser automation: {}", e),
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Unauthenticated;
        self.session = Session::default();
    }
}

/// Fills and submits the login form, returning the cookie header.
async fn drive_login(
    browser: &mut dyn BrowserSession,
    target: &LoginTarget,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<String, AuthenticationError> {
    let timeout_secs = timeout.as_secs();

    debug!("Opening login page {}", target.url);
    browser.navigate(&target.url).await?;

    if !wait_for_element(browser, &target.username_selector, timeout).await? {
        return Err(AuthenticationError::FormNotFound { timeout_secs });
    }

    debug!("Login form found, entering credentials");
    browser
        .fill(&target.username_selector, &credentials.username)
        .await?;
    browser
        .fill(&target.password_selector, &credentials.password)
        .await?;
    browser.click(&target.submit_selector).await?;

    if !wait_for_navigation(browser, &target.url, timeout).await? {
        return Err(AuthenticationError::MarkerTimeout { timeout_secs });
    }

    let token = browser.cookie_header().await?.trim().to_string();
    if token.is_empty() {
        return Err(AuthenticationError::EmptyToken);
    }
    Ok(token)
}

/// State change of one login. Unless `complete` is reached, dropping it
/// puts the manager back to `Unauthenticated` with no token.
struct LoginAttempt<'a> {
    state: &'a mut SessionState,
    session: &'a mut Session,
    done: bool,
}

impl<'a> LoginAttempt<'a> {
    fn begin(state: &'a mut SessionState, session: &'a mut Session) -> Self {
        *state = SessionState::Authenticating;
        session.valid = false;
        Self {
            state,
            session,
            done: false,
        }
    }

    fn complete(mut self, token: String) {
        *self.session = Session { token, valid: true };
        *self.state = SessionState::Authenticated;
        self.done = true;
    }
}

impl Drop for LoginAttempt<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.state = SessionState::Unauthenticated;
            *self.session = Session::default();
        }
    }
}

/// Browser opened for a login. If it is dropped before `close` ran, the
/// close is finished on a background task.
struct OpenBrowser {
    inner: Option<Box<dyn BrowserSession>>,
}

impl OpenBrowser {
    fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            inner: Some(session),
        }
    }

    fn session(&mut self) -> Result<&mut dyn BrowserSession, AutomationError> {
        match self.inner.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(AutomationError::Protocol("browser already closed".to_string())),
        }
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.inner.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close browser after login: {}", e);
            }
        }
    }
}

impl Drop for OpenBrowser {
    fn drop(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        warn!("Login abandoned, closing its browser in the background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("Failed to close abandoned browser: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime left to close abandoned browser"),
        }
    }
}

async fn wait_for_element(
    browser: &mut dyn BrowserSession,
    selector: &str,
    timeout: Duration,
) -> Result<bool, AutomationError> {
    let deadline = Instant::now() + timeout;
    loop {
        if browser.is_present(selector).await? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(WAIT_POLL_STEP.min(deadline - now)).await;
    }
}

/// Waits until the browser has left `login_url`, which is the only reliable
/// sign the form was accepted.
async fn wait_for_navigation(
    browser: &mut dyn BrowserSession,
    login_url: &str,
    timeout: Duration,
) -> Result<bool, AutomationError> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = browser.current_url().await?;
        if !same_page(&current, login_url) {
            debug!("Post-login navigation to {}", current);
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(WAIT_POLL_STEP.min(deadline - now)).await;
    }
}

fn same_page(a: &str, b: &str) -> bool {
    fn strip(url: &str) -> &str {
        let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
        url[..end].trim_end_matches('/')
    }
    strip(a).eq_ignore_ascii_case(strip(b))
}
