use std::io;

use jotsync_core::auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] jotsync_core::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error("Note {0} has no image")]
    NoImage(String),
    #[error("Nothing to edit; pass --name, --description or --clear-description")]
    EmptyEdit,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Backend is not configured for profile '{0}'. Run `jot config init` or set JOTSYNC_* environment variables."
    )]
    BackendNotConfigured(String),
    #[error("Profile '{0}' is not signed in. Run `jot auth login --email <email> --password <password>`.")]
    NotSignedIn(String),
    #[error("{0} remote mutation(s) failed")]
    MutationsFailed(usize),
}
