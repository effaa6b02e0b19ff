//! Bookkeeping for remote mutations fired by the relay.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::models::NoteId;

/// Identifier of a tracked remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    CreateNote,
    UpdateNote,
    DeleteNote,
    UploadImage,
    DeleteImage,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateNote => "create note",
            Self::UpdateNote => "update note",
            Self::DeleteNote => "delete note",
            Self::UploadImage => "upload image",
            Self::DeleteImage => "delete image",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub id: OpId,
    pub kind: MutationKind,
    pub note_id: NoteId,
    pub state: MutationState,
}

#[derive(Debug, Default)]
struct TrackerInner {
    next_id: u64,
    records: BTreeMap<OpId, MutationRecord>,
}

/// Shared registry of pending/confirmed/failed mutations.
#[derive(Debug, Clone)]
pub struct MutationTracker {
    inner: Arc<Mutex<TrackerInner>>,
    pending: Arc<watch::Sender<usize>>,
}

impl Default for MutationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationTracker {
    #[must_use]
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(TrackerInner::default())),
            pending: Arc::new(pending),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        // Records are plain data; a panic elsewhere cannot leave them half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, kind: MutationKind, note_id: NoteId) -> OpId {
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = OpId(inner.next_id);
            inner.records.insert(
                id,
                MutationRecord {
                    id,
                    kind,
                    note_id,
                    state: MutationState::Pending,
                },
            );
            id
        };
        self.pending.send_modify(|count| *count += 1);
        id
    }

    pub fn confirm(&self, id: OpId) {
        self.settle(id, MutationState::Confirmed);
    }

    pub fn fail(&self, id: OpId, reason: impl Into<String>) {
        self.settle(id, MutationState::Failed(reason.into()));
    }

    fn settle(&self, id: OpId, state: MutationState) {
        let was_pending = {
            let mut inner = self.lock();
            match inner.records.get_mut(&id) {
                Some(record) if record.state == MutationState::Pending => {
                    record.state = state;
                    true
                }
                _ => false,
            }
        };
        if was_pending {
            self.pending
                .send_modify(|count| *count = count.saturating_sub(1));
        }
    }

    #[must_use]
    pub fn get(&self, id: OpId) -> Option<MutationRecord> {
        self.lock().records.get(&id).cloned()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<MutationRecord> {
        self.filtered(|state| *state == MutationState::Pending)
    }

    #[must_use]
    pub fn failures(&self) -> Vec<MutationRecord> {
        self.filtered(|state| matches!(state, MutationState::Failed(_)))
    }

    fn filtered(&self, keep: impl Fn(&MutationState) -> bool) -> Vec<MutationRecord> {
        self.lock()
            .records
            .values()
            .filter(|record| keep(&record.state))
            .cloned()
            .collect()
    }

    /// Whether a mutation for `note_id` other than `op` is still pending.
    #[must_use]
    pub fn has_other_pending(&self, note_id: &NoteId, op: OpId) -> bool {
        self.lock().records.values().any(|record| {
            record.id != op && &record.note_id == note_id && record.state == MutationState::Pending
        })
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Forget confirmed records; pending and failed ones are kept.
    pub fn prune_confirmed(&self) {
        self.lock()
            .records
            .retain(|_, record| record.state != MutationState::Confirmed);
    }

    /// Wait until no mutation is pending.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}
