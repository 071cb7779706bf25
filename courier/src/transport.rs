use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::item::QueueItem;

/// Outcome reported by the remote endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: UploadStatus,
    /// Identifier assigned by the server on success.
    pub server_id: Option<String>,
}

impl UploadResponse {
    pub fn ok(server_id: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Ok,
            server_id: Some(server_id.into()),
        }
    }

    pub fn error() -> Self {
        Self {
            status: UploadStatus::Error,
            server_id: None,
        }
    }

    /// Server id of a usable success. An `Ok` status without an id is not
    /// one.
    pub fn accepted_server_id(&self) -> Option<&str> {
        match self.status {
            UploadStatus::Ok => self.server_id.as_deref(),
            UploadStatus::Error => None,
        }
    }
}

/// Sends one item to the remote store.
///
/// Implementations enforce their own timeouts; the queue manager never
/// cancels an in-flight call. Returning `Err` and returning a non-ok
/// [`UploadResponse`] are handled identically.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, item: &QueueItem) -> anyhow::Result<UploadResponse>;
}
