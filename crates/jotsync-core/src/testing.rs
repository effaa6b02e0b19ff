//! In-memory fakes of the remote services for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::auth::{AuthError, AuthEvent, AuthResult, AuthSession, AuthUser, IdentityProvider};
use crate::models::{ImageData, ImageKey, Note, NoteId};
use crate::remote::NoteApi;
use crate::storage::{ImageStore, ProgressCallback};
use crate::{Error, Result};

/// A latch that tasks can wait on until a test opens it.
#[derive(Debug, Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn opened() -> Self {
        Self(Arc::new(watch::channel(true).0))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    pub fn close(&self) {
        self.0.send_replace(false);
    }

    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

pub fn user(id: &str) -> AuthUser {
    AuthUser {
        id: id.to_string(),
        email: Some(format!("{id}@example.com")),
    }
}

fn session_for(user_id: &str) -> AuthSession {
    AuthSession {
        access_token: format!("token-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        expires_at: i64::MAX / 2,
        user: user(user_id),
    }
}

pub struct FakeIdentity {
    session: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl FakeIdentity {
    pub fn signed_in(user_id: &str) -> Self {
        let identity = Self::signed_out();
        *identity.session.lock().unwrap() = Some(session_for(user_id));
        identity
    }

    pub fn signed_out() -> Self {
        Self {
            session: Mutex::new(None),
            events: broadcast::channel(16).0,
        }
    }

    /// Update the held session to match `event` and publish it.
    pub fn emit(&self, event: AuthEvent) {
        {
            let mut session = self.session.lock().unwrap();
            match &event {
                AuthEvent::SignedIn(user) => *session = Some(session_for(&user.id)),
                AuthEvent::SignedOut | AuthEvent::SessionExpired => *session = None,
            }
        }
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_in(&self, email: &str, _password: &str) -> AuthResult<AuthSession> {
        let user_id = email.split('@').next().unwrap_or(email);
        let session = session_for(user_id);
        self.emit(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.session.lock().unwrap().clone()
    }

    async fn access_token(&self) -> AuthResult<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|session| session.access_token.clone())
            .ok_or(AuthError::NotSignedIn)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    List,
    Create(NoteId),
    Update(NoteId),
    Delete(NoteId),
}

pub struct FakeNoteApi {
    notes: Mutex<Vec<Note>>,
    calls: Mutex<Vec<ApiCall>>,
    failing: AtomicBool,
    pub list_gate: Gate,
    pub mutation_gate: Gate,
}

impl FakeNoteApi {
    pub fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            notes: Mutex::new(notes),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            list_gate: Gate::opened(),
            mutation_gate: Gate::opened(),
        }
    }

    pub fn empty() -> Self {
        Self::with_notes(Vec::new())
    }

    /// Make every subsequent mutation fail.
    pub fn fail_mutations(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_notes(&self, notes: Vec<Note>) {
        *self.notes.lock().unwrap() = notes;
    }

    pub fn stored(&self) -> Vec<Note> {
        self.notes.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn mutation(&self, operation: &str) -> Result<()> {
        self.mutation_gate.wait().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Api(format!("{operation} failed: backend unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl NoteApi for FakeNoteApi {
    async fn list_notes(&self) -> Result<Vec<Note>> {
        self.record(ApiCall::List);
        self.list_gate.wait().await;
        Ok(self.stored())
    }

    async fn create_note(&self, note: &Note) -> Result<Note> {
        self.record(ApiCall::Create(note.id.clone()));
        self.mutation("createNote").await?;
        self.notes.lock().unwrap().push(note.clone());
        Ok(note.clone())
    }

    async fn update_note(&self, note: &Note) -> Result<Note> {
        self.record(ApiCall::Update(note.id.clone()));
        self.mutation("updateNote").await?;
        let mut notes = self.notes.lock().unwrap();
        match notes.iter_mut().find(|stored| stored.id == note.id) {
            Some(stored) => *stored = note.clone(),
            None => notes.push(note.clone()),
        }
        Ok(note.clone())
    }

    async fn delete_note(&self, id: &NoteId) -> Result<NoteId> {
        self.record(ApiCall::Delete(id.clone()));
        self.mutation("deleteNote").await?;
        self.notes.lock().unwrap().retain(|stored| &stored.id != id);
        Ok(id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Upload(ImageKey),
    Download(ImageKey),
    Delete(ImageKey),
}

pub struct FakeImageStore {
    blobs: Mutex<HashMap<ImageKey, ImageData>>,
    calls: Mutex<Vec<StoreCall>>,
    failing: AtomicBool,
    running: AtomicUsize,
    peak: AtomicUsize,
    pub download_gate: Gate,
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeImageStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            download_gate: Gate::opened(),
        }
    }

    pub fn insert(&self, key: &ImageKey, image: ImageData) {
        self.blobs.lock().unwrap().insert(key.clone(), image);
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of downloads observed running at the same time.
    pub fn peak_downloads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("bucket unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn upload(
        &self,
        key: &ImageKey,
        image: &ImageData,
        _progress: Option<ProgressCallback>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(StoreCall::Upload(key.clone()));
        self.check()?;
        self.insert(key, image.clone());
        Ok(())
    }

    async fn download(
        &self,
        key: &ImageKey,
        _progress: Option<ProgressCallback>,
    ) -> Result<ImageData> {
        self.calls.lock().unwrap().push(StoreCall::Download(key.clone()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = Running(&self.running);
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.download_gate.wait().await;
        tokio::task::yield_now().await;
        self.check()?;
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("No object named {key}")))
    }

    async fn delete(&self, key: &ImageKey) -> Result<()> {
        self.calls.lock().unwrap().push(StoreCall::Delete(key.clone()));
        self.check()?;
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}
