pub mod fetcher;
pub mod http;

pub use fetcher::Fetcher;
pub use http::HttpPageClient;

use async_trait::async_trait;

use crate::error::TransportError;

/// Plain page retrieval with a session cookie.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get_page(&self, url: &str, cookie: &str) -> Result<String, TransportError>;
}
