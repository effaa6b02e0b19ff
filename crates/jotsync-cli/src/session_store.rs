//! File-backed session persistence for CLI profiles.

use std::io;
use std::path::{Path, PathBuf};

use jotsync_core::auth::{AuthError, AuthResult, AuthSession, SessionPersistence};

/// Stores one profile's session as JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn store_error(action: &str, path: &Path, error: impl std::fmt::Display) -> AuthError {
    AuthError::SessionStore(format!("Failed to {action} {}: {error}", path.display()))
}

impl SessionPersistence for FileSessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(store_error("read session at", &self.path, error)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|error| store_error("parse session at", &self.path, error))
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| store_error("create session directory", parent, error))?;
        }
        let raw = serde_json::to_string_pretty(session)
            .map_err(|error| store_error("serialize session for", &self.path, error))?;
        std::fs::write(&self.path, raw)
            .map_err(|error| store_error("write session at", &self.path, error))?;
        restrict_permissions(&self.path)
    }

    fn clear_session(&self) -> AuthResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(store_error("remove session at", &self.path, error)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> AuthResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|error| store_error("restrict permissions on", path, error))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> AuthResult<()> {
    Ok(())
}
