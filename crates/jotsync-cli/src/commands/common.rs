use std::path::Path;
use std::sync::Arc;

use jotsync_core::auth::{AuthEvent, IdentityProvider, SupabaseIdentityProvider};
use jotsync_core::cache::{CachedNote, SyncStatus};
use jotsync_core::config::{resolve_backend_config, BackendConfig, BackendEndpoints};
use jotsync_core::remote::GraphqlNoteApi;
use jotsync_core::storage::PresignedImageStore;
use jotsync_core::tracker::{MutationRecord, MutationState};
use jotsync_core::{ImageData, NoteId, NotesClient};
use serde::Serialize;

use crate::config_profiles::{session_path, CliProfile, CliProfilesConfig};
use crate::error::CliError;
use crate::session_store::FileSessionStore;

pub type ProfileIdentity = SupabaseIdentityProvider<FileSessionStore>;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub status: String,
}

/// A profile as selected by flag, environment or config.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub profile: CliProfile,
}

pub fn load_profile(explicit: Option<&str>) -> Result<ResolvedProfile, CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let name = config.resolve_profile_name(explicit);
    let profile = config.profile(&name).cloned().unwrap_or_default();
    Ok(ResolvedProfile { name, profile })
}

/// Backend endpoints for a profile. `JOTSYNC_*` variables take precedence
/// over the stored profile; a manifest URL replaces both.
pub async fn resolve_endpoints(profile: &ResolvedProfile) -> Result<BackendEndpoints, CliError> {
    let merged = BackendConfig::from_env().or(profile.profile.backend.clone());
    let resolved = resolve_backend_config(merged)
        .await
        .map_err(CliError::Config)?;
    resolved
        .resolve()
        .map_err(CliError::Config)?
        .ok_or_else(|| CliError::BackendNotConfigured(profile.name.clone()))
}

pub fn session_store_for(profile_name: &str) -> Result<FileSessionStore, CliError> {
    session_path(profile_name)
        .map(FileSessionStore::new)
        .map_err(CliError::Config)
}

pub fn identity_for(
    profile_name: &str,
    endpoints: &BackendEndpoints,
) -> Result<ProfileIdentity, CliError> {
    Ok(SupabaseIdentityProvider::new(
        &endpoints.auth_url,
        endpoints.api_key.clone(),
        session_store_for(profile_name)?,
    )?)
}

/// Build a signed-in client for the profile and load its notes.
pub async fn connect(global_profile: Option<&str>) -> Result<NotesClient, CliError> {
    let profile = load_profile(global_profile)?;
    let endpoints = resolve_endpoints(&profile).await?;
    let identity = identity_for(&profile.name, &endpoints)?;
    let session = identity
        .restore_session()
        .await?
        .ok_or_else(|| CliError::NotSignedIn(profile.name.clone()))?;

    let identity: Arc<dyn IdentityProvider> = Arc::new(identity);
    let api = GraphqlNoteApi::new(
        &endpoints.graphql_url,
        endpoints.api_key.clone(),
        Arc::clone(&identity),
    )?;
    let images = PresignedImageStore::new(
        &endpoints.storage_url,
        &profile.profile.options.storage_prefix,
        Arc::clone(&identity),
    )?;

    let client = NotesClient::new(
        identity,
        Arc::new(api),
        Arc::new(images),
        profile.profile.options.clone(),
    );
    client
        .handle_auth_event(AuthEvent::SignedIn(session.user))
        .await?;
    tracing::debug!(profile = %profile.name, "Connected");
    Ok(client)
}

/// Wait for remote mutations and report any that failed.
pub async fn finish(client: &NotesClient) -> Result<(), CliError> {
    client.settle_mutations().await;
    let failures = client.failed_mutations();
    for line in format_failure_lines(&failures) {
        eprintln!("{line}");
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(CliError::MutationsFailed(failures.len()))
    }
}

pub fn format_failure_lines(failures: &[MutationRecord]) -> Vec<String> {
    failures
        .iter()
        .filter_map(|record| match &record.state {
            MutationState::Failed(reason) => Some(format!(
                "Failed to {} {}: {}",
                record.kind,
                short_id(record.note_id.as_str()),
                reason
            )),
            _ => None,
        })
        .collect()
}

pub async fn resolve_note_id(client: &NotesClient, query: &str) -> Result<NoteId, CliError> {
    let query = normalize_note_identifier(query)?;
    let ids = client
        .notes()
        .await
        .into_iter()
        .map(|entry| entry.note.id)
        .collect::<Vec<_>>();
    match_note_id(&ids, &query)
}

/// Exact id match first, then a unique prefix.
pub fn match_note_id(ids: &[NoteId], query: &str) -> Result<NoteId, CliError> {
    if let Some(id) = ids.iter().find(|id| id.as_str() == query) {
        return Ok(id.clone());
    }

    let matching = ids
        .iter()
        .filter(|id| id.as_str().starts_with(query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::NoteNotFound(query.to_string())),
        [id] => Ok((*id).clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn format_note_lines(notes: &[CachedNote]) -> Vec<String> {
    notes
        .iter()
        .map(|entry| {
            let short_id = short_id(entry.note.id.as_str());
            let preview = note_preview(&entry.note.name, 40);
            let status = status_label(&entry.status);
            let marker = if entry.note.has_image() { "[img]" } else { "" };

            match entry.note.description.as_deref() {
                Some(description) => format!(
                    "{short_id:<13}  {preview:<40}  {marker:<5}  {status:<8}  {}",
                    note_preview(description, 40)
                ),
                None => format!("{short_id:<13}  {preview:<40}  {marker:<5}  {status}"),
            }
        })
        .collect()
}

pub fn note_to_list_item(entry: &CachedNote) -> NoteListItem {
    NoteListItem {
        id: entry.note.id.to_string(),
        name: entry.note.name.clone(),
        description: entry.note.description.clone(),
        image: entry.note.image.as_ref().map(ToString::to_string),
        status: status_label(&entry.status),
    }
}

pub fn status_label(status: &SyncStatus) -> String {
    match status {
        SyncStatus::Synced => "synced".to_string(),
        SyncStatus::Pending => "pending".to_string(),
        SyncStatus::Desynchronized(reason) => format!("desynced ({reason})"),
    }
}

pub fn note_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn read_image_file(path: &Path) -> Result<ImageData, CliError> {
    let bytes = std::fs::read(path)?;
    Ok(ImageData::new(
        bytes,
        content_type_for_path(path).map(ToString::to_string),
    )?)
}

pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}
