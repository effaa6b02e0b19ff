//! Data models for jotsync

mod image;
mod note;

pub use image::{ImageData, ImageKey, TransferProgress};
pub use note::{NewNote, Note, NoteEdit, NoteId};
