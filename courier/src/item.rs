use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Stable local primary key of a queue item.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Which family of captured records an item belongs to.
///
/// Photos and imported documents share one queue shape; the kind scopes a
/// store so that each family is claimed and counted independently.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Asset,
    File,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Asset => "asset",
            ItemKind::File => "file",
        }
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(ItemKind::Asset),
            "file" => Ok(ItemKind::File),
            other => Err(anyhow::anyhow!("unknown item kind: {other}")),
        }
    }
}

/// Lifecycle state of a queue item.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Uploaded => "uploaded",
            ItemStatus::Failed => "failed",
        }
    }

    /// `uploaded` and `failed` only leave their state through an external
    /// reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Uploaded | ItemStatus::Failed)
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "uploading" => Ok(ItemStatus::Uploading),
            "uploaded" => Ok(ItemStatus::Uploaded),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(anyhow::anyhow!("unknown item status: {other}")),
        }
    }
}

/// Bytes to upload: either held inline or referenced on disk.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Inline { bytes: Vec<u8> },
    Path { path: PathBuf },
}

/// User who captured the record. Display only; never consulted when
/// scheduling.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: i64,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A durable record awaiting (or done with) upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub filename: String,
    pub status: ItemStatus,
    pub retries: u32,
    pub server_id: Option<String>,
    pub payload: Payload,
    pub mime_type: String,
    pub file_size_bytes: Option<u64>,
    pub created_at_ms: i64,
    pub owner: Option<Owner>,
    pub location: Option<GeoPoint>,
}

/// Producer-side description of a record to insert.
///
/// Stores always create the row as `pending` with zero retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub filename: String,
    pub payload: Payload,
    pub mime_type: String,
    pub file_size_bytes: Option<u64>,
    pub created_at_ms: i64,
    pub owner: Option<Owner>,
    pub location: Option<GeoPoint>,
}

impl NewItem {
    /// Describe a record stamped with the current time.
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        let file_size_bytes = match &payload {
            Payload::Inline { bytes } => Some(bytes.len() as u64),
            Payload::Path { .. } => None,
        };
        Self {
            filename: filename.into(),
            payload,
            mime_type: mime_type.into(),
            file_size_bytes,
            created_at_ms: Utc::now().timestamp_millis(),
            owner: None,
            location: None,
        }
    }

    pub fn with_owner(mut self, user_id: i64, display_name: impl Into<String>) -> Self {
        self.owner = Some(Owner {
            user_id,
            display_name: display_name.into(),
        });
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint {
            latitude,
            longitude,
        });
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = Some(bytes);
        self
    }

    pub fn with_created_at_ms(mut self, created_at_ms: i64) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }

    /// Materialize the stored row for a freshly assigned id.
    pub fn into_item(self, id: ItemId, kind: ItemKind) -> QueueItem {
        QueueItem {
            id,
            kind,
            filename: self.filename,
            status: ItemStatus::Pending,
            retries: 0,
            server_id: None,
            payload: self.payload,
            mime_type: self.mime_type,
            file_size_bytes: self.file_size_bytes,
            created_at_ms: self.created_at_ms,
            owner: self.owner,
            location: self.location,
        }
    }
}

/// Per-status row totals for one store scope.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub uploading: u64,
    pub uploaded: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.uploading + self.uploaded + self.failed
    }

    pub fn add(&mut self, status: ItemStatus, count: u64) {
        match status {
            ItemStatus::Pending => self.pending += count,
            ItemStatus::Uploading => self.uploading += count,
            ItemStatus::Uploaded => self.uploaded += count,
            ItemStatus::Failed => self.failed += count,
        }
    }
}
