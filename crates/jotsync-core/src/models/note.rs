//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

use super::image::{ImageData, ImageKey};

/// Opaque note identifier.
///
/// Locally created notes get a UUID v7; ids coming back from the remote API
/// are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Note ID cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A note as held in the local collection and sent to the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Display name
    pub name: String,
    /// Optional free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Optional reference to an image blob
    #[serde(default)]
    pub image: Option<ImageKey>,
}

impl Note {
    /// Create a note with a fresh identifier.
    ///
    /// The name is trimmed and must not be empty; an empty description is
    /// stored as `None`.
    pub fn new(name: impl Into<String>, description: Option<String>) -> Result<Self> {
        Ok(Self {
            id: NoteId::new(),
            name: normalize_name(name.into())?,
            description: normalize_text_option(description),
            image: None,
        })
    }

    /// Apply an edit in place, returning the record as it was before.
    pub fn apply(&mut self, edit: &NoteEdit) -> Result<Self> {
        let previous = self.clone();
        if let Some(name) = &edit.name {
            self.name = normalize_name(name.clone())?;
        }
        if let Some(description) = &edit.description {
            self.description = normalize_text_option(description.clone());
        }
        Ok(previous)
    }

    /// Whether this note references an image blob.
    #[must_use]
    pub const fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Partial update of a note.
///
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteEdit {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

impl NoteEdit {
    #[must_use]
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
        }
    }

    #[must_use]
    pub fn describe(description: Option<String>) -> Self {
        Self {
            name: None,
            description: Some(description),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}

/// Input for creating a note, optionally with an image to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNote {
    pub name: String,
    pub description: Option<String>,
    pub image: Option<ImageData>,
}

impl NewNote {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            image: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: ImageData) -> Self {
        self.image = Some(image);
        self
    }
}

fn normalize_name(name: String) -> Result<String> {
    normalize_text_option(Some(name))
        .ok_or_else(|| Error::InvalidInput("Note name cannot be empty".to_string()))
}
