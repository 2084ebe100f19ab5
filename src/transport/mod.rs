//! The wire under [`ApiClient`](crate::api::ApiClient).

mod http;
#[cfg(any(test, feature = "testing"))]
mod memory;

use async_trait::async_trait;

use crate::api::{ApiResponse, LocalizedRequest};
use crate::Result;

pub use http::HttpTransport;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryTransport;

/// Sends a decorated request and hands back the raw reply. Non-2xx
/// statuses are replies, not errors; `Err` means the backend could not
/// be reached at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &LocalizedRequest) -> Result<ApiResponse>;
}
