//! Session-gated note relay.
//!
//! [`NotesClient`] owns the in-memory note collection and mirrors every local
//! change to the remote services. Local changes apply immediately; the remote
//! calls run as spawned tasks whose outcomes land in the [`MutationTracker`]
//! and, per [`FailurePolicy`], in the affected entry's [`SyncStatus`].
//!
//! Every piece of background work captures the session epoch it started
//! under. Once the epoch moves on (sign-out, or a fresh sign-in) its results
//! are dropped instead of being written into the new session's collection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::auth::{AuthEvent, AuthUser, IdentityProvider};
use crate::cache::{CachedNote, NoteCache, RemovedNote, SyncStatus};
use crate::config::{ClientOptions, FailurePolicy};
use crate::images::ImagePool;
use crate::models::{ImageData, ImageKey, NewNote, Note, NoteEdit, NoteId};
use crate::remote::NoteApi;
use crate::session::{SessionSnapshot, SessionState};
use crate::storage::ImageStore;
use crate::tracker::{MutationKind, MutationRecord, MutationTracker, OpId};
use crate::{Error, Result};

/// Handle to the note relay. Cheap to clone; all clones share state.
///
/// Each local mutation is dispatched to the backend as its own task. Two
/// mutations of the same note are not chained, so the backend may receive
/// them out of order; callers that need ordering should await
/// [`NotesClient::settle_mutations`] between them.
#[derive(Clone)]
pub struct NotesClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    identity: Arc<dyn IdentityProvider>,
    api: Arc<dyn NoteApi>,
    images: Arc<dyn ImageStore>,
    options: ClientOptions,
    session: SessionState,
    cache: Mutex<NoteCache>,
    revision: watch::Sender<u64>,
    tracker: MutationTracker,
    pool: ImagePool,
    image_failures: AtomicUsize,
}

/// Local change to undo or flag when its remote mutation fails.
enum Rollback {
    Create(NoteId),
    Update { previous: Note },
    Delete(RemovedNote),
    Upload(NoteId),
}

impl NotesClient {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        api: Arc<dyn NoteApi>,
        images: Arc<dyn ImageStore>,
        options: ClientOptions,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ClientInner {
                identity,
                api,
                images,
                pool: ImagePool::new(options.image_workers),
                options,
                session: SessionState::new(),
                cache: Mutex::new(NoteCache::new()),
                revision,
                tracker: MutationTracker::new(),
                image_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Follow the identity provider's session events in a background task.
    ///
    /// The provider's current session is applied first. Sign-in reloads run
    /// in their own tasks so a sign-out arriving mid-reload is applied
    /// immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let client = self.clone();
        let mut events = self.inner.identity.subscribe();
        tokio::spawn(async move {
            if let Some(session) = client.inner.identity.current_session().await {
                client.spawn_sign_in(session.user);
            }
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn(user)) => client.spawn_sign_in(user),
                    Ok(AuthEvent::SignedOut | AuthEvent::SessionExpired) => {
                        client.signed_out().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed auth events; resynchronising session");
                        match client.inner.identity.current_session().await {
                            Some(session) => client.spawn_sign_in(session.user),
                            None => client.signed_out().await,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Auth event stream closed");
        })
    }

    /// Apply a session event and wait for the reload it triggers, if any.
    ///
    /// A failed reload leaves the session signed in with the previous
    /// (possibly empty) collection and returns the fetch error.
    pub async fn handle_auth_event(&self, event: AuthEvent) -> Result<()> {
        match event {
            AuthEvent::SignedIn(user) => {
                let epoch = self.signed_in(user);
                self.reload_for(epoch).await?;
            }
            AuthEvent::SignedOut | AuthEvent::SessionExpired => self.signed_out().await,
        }
        Ok(())
    }

    /// Sign in through the identity provider.
    ///
    /// The session transition itself follows from the provider's
    /// `SignedIn` event (see [`NotesClient::start`]).
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let session = self.inner.identity.sign_in(email, password).await?;
        Ok(session.user)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.inner.identity.sign_out().await?;
        Ok(())
    }

    fn spawn_sign_in(&self, user: AuthUser) {
        let epoch = self.signed_in(user);
        let client = self.clone();
        tokio::spawn(async move { client.reload_logged(epoch).await });
    }

    fn signed_in(&self, user: AuthUser) -> u64 {
        let user_id = user.id.clone();
        let epoch = self.inner.session.sign_in(user);
        tracing::info!(%user_id, epoch, "Session started");
        epoch
    }

    async fn signed_out(&self) {
        let epoch = self.inner.session.sign_out();
        self.inner.pool.cancel_all();
        self.inner.cache.lock().await.clear();
        self.bump();
        tracing::info!(epoch, "Session ended; cleared notes");
    }

    /// Refetch the whole collection for the current session.
    ///
    /// Returns `false` when the result was discarded because the session
    /// changed while the fetch was in flight.
    pub async fn reload(&self) -> Result<bool> {
        let epoch = self.current_epoch()?;
        self.reload_for(epoch).await
    }

    async fn reload_logged(&self, epoch: u64) {
        if let Err(error) = self.reload_for(epoch).await {
            tracing::warn!("Failed to load notes: {}", error);
        }
    }

    async fn reload_for(&self, epoch: u64) -> Result<bool> {
        let notes = self.inner.api.list_notes().await?;
        let with_images = notes
            .iter()
            .filter_map(|note| note.image.clone().map(|key| (note.id.clone(), key)))
            .collect::<Vec<_>>();
        let count = notes.len();

        if self
            .mutate_current(epoch, |cache| cache.replace_all(notes))
            .await
            .is_err()
        {
            tracing::info!(epoch, "Discarding notes fetched for a previous session");
            return Ok(false);
        }
        tracing::info!(count, "Loaded notes");

        for (id, key) in with_images {
            self.spawn_image_fetch(epoch, id, key);
        }
        Ok(true)
    }

    /// Create a note locally and push it to the remote API.
    ///
    /// An attached image gets a fresh key, is shown locally right away, and
    /// is uploaded alongside the record.
    pub async fn create_note(&self, new_note: NewNote) -> Result<NoteId> {
        let epoch = self.current_epoch()?;
        let NewNote {
            name,
            description,
            image,
        } = new_note;

        let mut note = Note::new(name, description)?;
        let upload = image.map(|image| {
            let key = ImageKey::new();
            note.image = Some(key.clone());
            (key, image)
        });

        let mut entry = CachedNote::new(note.clone(), SyncStatus::Pending);
        entry.image = upload.as_ref().map(|(_, image)| image.clone());
        self.mutate_current(epoch, |cache| cache.push(entry)).await?;
        tracing::debug!(note_id = %note.id, "Created note locally");

        let id = note.id.clone();
        if let Some((key, image)) = upload {
            self.spawn_upload(epoch, id.clone(), key, image);
        }
        self.spawn_create(epoch, note);
        Ok(id)
    }

    /// Edit a cached note and push the full updated record.
    pub async fn edit_note(&self, id: &NoteId, edit: NoteEdit) -> Result<Note> {
        let epoch = self.current_epoch()?;
        if edit.is_empty() {
            return self
                .note(id)
                .await
                .map(|entry| entry.note)
                .ok_or_else(|| Error::NotFound(id.to_string()));
        }

        let (previous, updated) = self
            .mutate_current(epoch, |cache| {
                let previous = cache
                    .edit(id, &edit)
                    .ok_or_else(|| Error::NotFound(id.to_string()))??;
                let updated = cache
                    .get(id)
                    .map(|entry| entry.note.clone())
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                Ok::<_, Error>((previous, updated))
            })
            .await??;
        tracing::debug!(note_id = %id, "Edited note locally");

        self.spawn_update(epoch, updated.clone(), previous);
        Ok(updated)
    }

    /// Remove a note locally and delete it remotely, along with its image.
    pub async fn delete_note(&self, id: &NoteId) -> Result<Note> {
        let epoch = self.current_epoch()?;
        let removed = self
            .mutate_current(epoch, |cache| cache.remove(id))
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.inner.pool.cancel_owner(id);
        tracing::debug!(note_id = %id, "Deleted note locally");

        let note = removed.entry.note.clone();
        self.spawn_delete(epoch, removed);
        Ok(note)
    }

    /// The note's image, downloading it through the pool when not yet attached.
    ///
    /// `Ok(None)` when the note has no image reference.
    pub async fn fetch_image(&self, id: &NoteId) -> Result<Option<ImageData>> {
        let epoch = self.current_epoch()?;
        let key = {
            let cache = self.inner.cache.lock().await;
            let entry = cache
                .get(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if let Some(image) = &entry.image {
                return Ok(Some(image.clone()));
            }
            match &entry.note.image {
                Some(key) => key.clone(),
                None => return Ok(None),
            }
        };

        self.spawn_image_fetch(epoch, id.clone(), key.clone());
        self.inner.pool.wait_for(&key).await;

        let cache = self.inner.cache.lock().await;
        let entry = cache
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        entry
            .image
            .clone()
            .map(Some)
            .ok_or_else(|| Error::Storage(format!("Image '{key}' could not be downloaded")))
    }

    fn spawn_create(&self, epoch: u64, note: Note) {
        let op = self
            .inner
            .tracker
            .begin(MutationKind::CreateNote, note.id.clone());
        let client = self.clone();
        tokio::spawn(async move {
            match client.inner.api.create_note(&note).await {
                Ok(_) => client.confirmed(epoch, op, &note.id).await,
                Err(error) => {
                    client
                        .failed(epoch, op, Rollback::Create(note.id), &error)
                        .await;
                }
            }
        });
    }

    fn spawn_update(&self, epoch: u64, note: Note, previous: Note) {
        let op = self
            .inner
            .tracker
            .begin(MutationKind::UpdateNote, note.id.clone());
        let client = self.clone();
        tokio::spawn(async move {
            match client.inner.api.update_note(&note).await {
                Ok(_) => client.confirmed(epoch, op, &note.id).await,
                Err(error) => {
                    client
                        .failed(epoch, op, Rollback::Update { previous }, &error)
                        .await;
                }
            }
        });
    }

    /// The image blob is deleted only once the record delete succeeded.
    fn spawn_delete(&self, epoch: u64, removed: RemovedNote) {
        let id = removed.entry.note.id.clone();
        let op = self.inner.tracker.begin(MutationKind::DeleteNote, id.clone());
        let client = self.clone();
        tokio::spawn(async move {
            match client.inner.api.delete_note(&id).await {
                Ok(_) => {
                    if let Some(key) = removed.entry.note.image.clone() {
                        client.spawn_image_delete(id.clone(), key);
                    }
                    client.inner.tracker.confirm(op);
                    tracing::debug!(%op, note_id = %id, "Remote delete confirmed");
                }
                Err(error) => {
                    client
                        .failed(epoch, op, Rollback::Delete(removed), &error)
                        .await;
                }
            }
        });
    }

    fn spawn_upload(&self, epoch: u64, id: NoteId, key: ImageKey, image: ImageData) {
        let op = self.inner.tracker.begin(MutationKind::UploadImage, id.clone());
        let client = self.clone();
        tokio::spawn(async move {
            match client.inner.images.upload(&key, &image, None).await {
                Ok(()) => client.confirmed(epoch, op, &id).await,
                Err(error) => client.failed(epoch, op, Rollback::Upload(id), &error).await,
            }
        });
    }

    fn spawn_image_delete(&self, id: NoteId, key: ImageKey) {
        let op = self.inner.tracker.begin(MutationKind::DeleteImage, id);
        let tracker = self.inner.tracker.clone();
        let images = Arc::clone(&self.inner.images);
        tokio::spawn(async move {
            match images.delete(&key).await {
                Ok(()) => tracker.confirm(op),
                Err(error) => {
                    tracing::warn!(%op, %key, "Image delete failed: {}", error);
                    tracker.fail(op, error.to_string());
                }
            }
        });
    }

    fn spawn_image_fetch(&self, epoch: u64, id: NoteId, key: ImageKey) {
        let images = Arc::clone(&self.inner.images);
        let fetch_key = key.clone();
        let client = self.clone();
        let job_key = key.clone();
        self.inner.pool.submit(
            id,
            key,
            async move { images.download(&fetch_key, None).await },
            move |owners, downloaded| async move {
                let image = match downloaded {
                    Ok(image) => image,
                    Err(error) => {
                        client.inner.image_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(key = %job_key, "Image download failed: {}", error);
                        return;
                    }
                };
                for owner in owners {
                    let attached = client
                        .mutate_current(epoch, |cache| {
                            cache.attach_image(&owner, &job_key, image.clone())
                        })
                        .await;
                    if !matches!(attached, Ok(true)) {
                        tracing::debug!(note_id = %owner, key = %job_key, "Dropped image for a changed note");
                    }
                }
            },
        );
    }

    async fn confirmed(&self, epoch: u64, op: OpId, id: &NoteId) {
        let tracker = &self.inner.tracker;
        let applied = self
            .mutate_current(epoch, |cache| {
                let settled = cache
                    .get(id)
                    .is_some_and(|entry| entry.status == SyncStatus::Pending)
                    && !tracker.has_other_pending(id, op);
                if settled {
                    cache.set_status(id, SyncStatus::Synced);
                }
            })
            .await;
        if applied.is_err() {
            tracing::debug!(%op, "Ignoring confirmation from a previous session");
        }
        tracker.confirm(op);
        tracing::debug!(%op, note_id = %id, "Remote mutation confirmed");
    }

    async fn failed(&self, epoch: u64, op: OpId, rollback: Rollback, error: &Error) {
        let reason = error.to_string();
        tracing::warn!(%op, "Remote mutation failed: {}", reason);

        let policy = self.inner.options.failure_policy;
        let desynced = SyncStatus::Desynchronized(reason.clone());
        let tracker = &self.inner.tracker;
        let applied = self
            .mutate_current(epoch, |cache| match (policy, rollback) {
                (FailurePolicy::Revert, Rollback::Create(id)) => {
                    cache.remove(&id);
                }
                (FailurePolicy::Revert, Rollback::Update { previous }) => {
                    // A later edit was built on top of this one; keep it and flag the note.
                    let overlapped = tracker.has_other_pending(&previous.id, op)
                        || cache.get(&previous.id).is_some_and(|entry| {
                            matches!(entry.status, SyncStatus::Desynchronized(_))
                        });
                    if overlapped {
                        cache.set_status(&previous.id, desynced);
                    } else {
                        cache.replace_note(previous, SyncStatus::Synced);
                    }
                }
                (policy, Rollback::Delete(mut removed)) => {
                    removed.entry.status = match policy {
                        FailurePolicy::Revert => SyncStatus::Synced,
                        FailurePolicy::MarkDesynced => desynced,
                    };
                    cache.restore(removed);
                }
                (
                    FailurePolicy::MarkDesynced,
                    Rollback::Create(id) | Rollback::Update { previous: Note { id, .. } },
                )
                | (_, Rollback::Upload(id)) => {
                    cache.set_status(&id, desynced);
                }
            })
            .await;
        if applied.is_err() {
            tracing::debug!(%op, "Ignoring failure from a previous session");
        }
        tracker.fail(op, reason);
    }

    /// Run `apply` against the cache if `epoch` is still the signed-in session.
    async fn mutate_current<T>(
        &self,
        epoch: u64,
        apply: impl FnOnce(&mut NoteCache) -> T,
    ) -> Result<T> {
        let value = {
            let mut cache = self.inner.cache.lock().await;
            if !self.inner.session.is_current(epoch) {
                return Err(Error::NotSignedIn);
            }
            apply(&mut cache)
        };
        self.bump();
        Ok(value)
    }

    fn current_epoch(&self) -> Result<u64> {
        let snapshot = self.inner.session.snapshot();
        if snapshot.signed_in {
            Ok(snapshot.epoch)
        } else {
            Err(Error::NotSignedIn)
        }
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    /// Snapshot of the collection in display order.
    pub async fn notes(&self) -> Vec<CachedNote> {
        self.inner.cache.lock().await.entries().to_vec()
    }

    pub async fn note(&self, id: &NoteId) -> Option<CachedNote> {
        self.inner.cache.lock().await.get(id).cloned()
    }

    /// Revision counter, bumped on every change to the collection.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    #[must_use]
    pub fn session(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.session.subscribe()
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.inner.session.is_signed_in()
    }

    #[must_use]
    pub fn pending_mutations(&self) -> Vec<MutationRecord> {
        self.inner.tracker.pending()
    }

    #[must_use]
    pub fn failed_mutations(&self) -> Vec<MutationRecord> {
        self.inner.tracker.failures()
    }

    /// Number of image downloads that failed since the client was created.
    #[must_use]
    pub fn image_failures(&self) -> usize {
        self.inner.image_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Wait until no remote mutation is in flight. Image downloads may still run.
    pub async fn settle_mutations(&self) {
        self.inner.tracker.wait_idle().await;
    }

    /// Wait until no remote mutation or image download is in flight.
    pub async fn settle(&self) {
        loop {
            self.inner.tracker.wait_idle().await;
            self.inner.pool.wait_idle().await;
            if self.inner.tracker.pending_count() == 0 && self.inner.pool.active() == 0 {
                break;
            }
        }
    }
}
