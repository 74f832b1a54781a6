pub mod browser;
pub mod manager;
pub mod webdriver;

pub use browser::{BrowserAutomation, BrowserSession};
pub use manager::{Session, SessionManager, SessionState};
pub use webdriver::WebDriverAutomation;
