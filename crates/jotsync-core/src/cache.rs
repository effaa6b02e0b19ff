//! In-memory note collection.
//!
//! Plain ordered storage with no synchronisation of its own; `NotesClient`
//! owns the lock and the revision channel around it.

use crate::models::{ImageData, ImageKey, Note, NoteEdit, NoteId};
use crate::Result;

/// Sync state of a cached note relative to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Matches what the remote store last returned or confirmed.
    Synced,
    /// A local change is waiting for remote confirmation.
    Pending,
    /// A remote mutation failed and the local record was kept.
    Desynchronized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNote {
    pub note: Note,
    pub image: Option<ImageData>,
    pub status: SyncStatus,
}

impl CachedNote {
    #[must_use]
    pub const fn new(note: Note, status: SyncStatus) -> Self {
        Self {
            note,
            image: None,
            status,
        }
    }
}

/// A note removed from the cache, with the position it occupied.
#[derive(Debug, Clone)]
pub struct RemovedNote {
    pub index: usize,
    pub entry: CachedNote,
}

#[derive(Debug, Default)]
pub struct NoteCache {
    entries: Vec<CachedNote>,
}

impl NoteCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection, keeping the given order.
    pub fn replace_all(&mut self, notes: Vec<Note>) {
        self.entries = notes
            .into_iter()
            .map(|note| CachedNote::new(note, SyncStatus::Synced))
            .collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn push(&mut self, entry: CachedNote) {
        self.entries.push(entry);
    }

    /// Reinsert a previously removed note at its old position (or the end).
    pub fn restore(&mut self, removed: RemovedNote) {
        if self.position(&removed.entry.note.id).is_some() {
            return;
        }
        let index = removed.index.min(self.entries.len());
        self.entries.insert(index, removed.entry);
    }

    pub fn remove(&mut self, id: &NoteId) -> Option<RemovedNote> {
        let index = self.position(id)?;
        let entry = self.entries.remove(index);
        Some(RemovedNote { index, entry })
    }

    /// Apply an edit and mark the entry pending. Returns the previous record.
    pub fn edit(&mut self, id: &NoteId, edit: &NoteEdit) -> Option<Result<Note>> {
        let entry = self.get_mut(id)?;
        let result = entry.note.apply(edit);
        if result.is_ok() {
            entry.status = SyncStatus::Pending;
        }
        Some(result)
    }

    /// Overwrite the record of an existing entry. Returns false when absent.
    pub fn replace_note(&mut self, note: Note, status: SyncStatus) -> bool {
        let Some(entry) = self.get_mut(&note.id) else {
            return false;
        };
        if entry.note.image != note.image {
            entry.image = None;
        }
        entry.note = note;
        entry.status = status;
        true
    }

    pub fn set_status(&mut self, id: &NoteId, status: SyncStatus) -> bool {
        self.get_mut(id).map(|entry| entry.status = status).is_some()
    }

    /// Attach downloaded image bytes if the note still references `key`.
    pub fn attach_image(&mut self, id: &NoteId, key: &ImageKey, image: ImageData) -> bool {
        match self.get_mut(id) {
            Some(entry) if entry.note.image.as_ref() == Some(key) => {
                entry.image = Some(image);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: &NoteId) -> Option<&CachedNote> {
        self.entries.iter().find(|entry| &entry.note.id == id)
    }

    fn get_mut(&mut self, id: &NoteId) -> Option<&mut CachedNote> {
        self.entries.iter_mut().find(|entry| &entry.note.id == id)
    }

    fn position(&self, id: &NoteId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.note.id == id)
    }

    #[must_use]
    pub fn entries(&self) -> &[CachedNote] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
