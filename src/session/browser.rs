use async_trait::async_trait;

use crate::error::AutomationError;

/// Something that can start an automated browser.
///
/// The monitor never depends on a concrete toolkit; anything that can drive
/// a login form and hand back cookies satisfies it.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, AutomationError>;

    /// Tear down any browser sessions still held, e.g. after a login was
    /// abandoned at shutdown.
    async fn release_all(&self) -> Result<(), AutomationError>;
}

/// One live browser. Must be closed by whoever opened it.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError>;
    async fn is_present(&mut self, css_selector: &str) -> Result<bool, AutomationError>;
    async fn fill(&mut self, css_selector: &str, text: &str) -> Result<(), AutomationError>;
    async fn click(&mut self, css_selector: &str) -> Result<(), AutomationError>;
    async fn current_url(&mut self) -> Result<String, AutomationError>;

    /// All cookies of the current page formatted as a `Cookie` header value.
    async fn cookie_header(&mut self) -> Result<String, AutomationError>;

    async fn close(&mut self) -> Result<(), AutomationError>;
}
