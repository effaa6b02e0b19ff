//! Structured-data API for note records.

mod graphql;

use async_trait::async_trait;

use crate::models::{Note, NoteId};
use crate::Result;

pub use graphql::GraphqlNoteApi;

/// Remote CRUD over note records.
///
/// Every call either returns the fetched/mutated record(s) or a descriptive
/// error. Implementations do not retry.
#[async_trait]
pub trait NoteApi: Send + Sync {
    /// All notes, in the order the backend returns them.
    async fn list_notes(&self) -> Result<Vec<Note>>;

    async fn create_note(&self, note: &Note) -> Result<Note>;

    /// Replace the stored record with `note`.
    async fn update_note(&self, note: &Note) -> Result<Note>;

    async fn delete_note(&self, id: &NoteId) -> Result<NoteId>;
}
