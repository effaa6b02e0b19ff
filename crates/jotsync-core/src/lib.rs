//! jotsync-core - Core library for jotsync
//!
//! This crate holds the session-gated note relay used by jotsync front ends:
//! the in-memory note collection, the optimistic CRUD relay that mirrors it
//! to a remote structured-data API, the image relay over object storage, and
//! the HTTP adapters for the identity provider, GraphQL API and media API.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod images;
pub mod models;
pub mod relay;
pub mod remote;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use models::{ImageData, ImageKey, NewNote, Note, NoteEdit, NoteId};
pub use relay::NotesClient;
