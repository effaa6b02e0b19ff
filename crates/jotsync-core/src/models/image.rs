//! Image blob model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Name of an image blob in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    /// Create a new unique image key using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ImageKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ImageKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Image key cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Image bytes attached to a note for rendering or upload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("Image data cannot be empty".to_string()));
        }
        let content_type = content_type
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self {
            bytes,
            content_type,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content type to send to storage, falling back to a generic binary type.
    #[must_use]
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ImageData")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Progress of a blob transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `[0, 1]`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes.filter(|total| *total > 0)?;
        Some((self.transferred_bytes.min(total) as f64) / (total as f64))
    }
}
