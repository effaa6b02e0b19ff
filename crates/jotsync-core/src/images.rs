//! Bounded pool for image downloads.
//!
//! Jobs are keyed by image key: a key that is already in flight is not
//! fetched twice. Every note that asks for a key while it is in flight joins
//! the job as an owner and receives its result; the job is cancelled once its
//! last owner goes away.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Semaphore};
use tokio::task::AbortHandle;

use crate::models::{ImageKey, NoteId};

#[derive(Debug)]
struct Job {
    id: u64,
    owners: BTreeSet<NoteId>,
    /// Cleared once the fetch finished and its owners were handed out.
    accepting: bool,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    jobs: HashMap<ImageKey, Job>,
}

impl Registry {
    /// Stop `key`'s job from taking new owners and return the ones it has.
    fn close(&mut self, key: &ImageKey, id: u64) -> Vec<NoteId> {
        match self.jobs.get_mut(key) {
            Some(job) if job.id == id => {
                job.accepting = false;
                job.owners.iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImagePool {
    permits: Arc<Semaphore>,
    registry: Arc<Mutex<Registry>>,
    active: Arc<watch::Sender<usize>>,
}

/// Removes a job from the registry when its task finishes or is aborted.
struct JobGuard {
    registry: Arc<Mutex<Registry>>,
    active: Arc<watch::Sender<usize>>,
    key: ImageKey,
    id: u64,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        {
            let mut registry = lock(&self.registry);
            if registry.jobs.get(&self.key).is_some_and(|job| job.id == self.id) {
                registry.jobs.remove(&self.key);
            }
        }
        self.active
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ImagePool {
    /// A pool running at most `workers` jobs at once (minimum one).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            registry: Arc::new(Mutex::new(Registry::default())),
            active: Arc::new(active),
        }
    }

    /// Run `fetch` for `key` on behalf of `owner`, then hand its output to
    /// `deliver` together with every owner the job has collected.
    ///
    /// Returns false when `owner` joined a job already in flight for `key`;
    /// `fetch` and `deliver` are dropped in that case.
    /// Must be called from within a tokio runtime.
    pub fn submit<T, F, D, R>(&self, owner: NoteId, key: ImageKey, fetch: F, deliver: D) -> bool
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
        D: FnOnce(Vec<NoteId>, T) -> R + Send + 'static,
        R: Future<Output = ()> + Send + 'static,
    {
        let mut registry = lock(&self.registry);
        if let Some(job) = registry.jobs.get_mut(&key) {
            if job.accepting {
                tracing::debug!(%key, note_id = %owner, "Joined image fetch already in flight");
                job.owners.insert(owner);
                return false;
            }
        }

        registry.next_id += 1;
        let id = registry.next_id;
        self.active.send_modify(|count| *count += 1);

        let guard = JobGuard {
            registry: Arc::clone(&self.registry),
            active: Arc::clone(&self.active),
            key: key.clone(),
            id,
        };
        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let output = fetch.await;
            let owners = lock(&guard.registry).close(&guard.key, guard.id);
            deliver(owners, output).await;
        });

        registry.jobs.insert(
            key,
            Job {
                id,
                owners: BTreeSet::from([owner]),
                accepting: true,
                abort: handle.abort_handle(),
            },
        );
        true
    }

    /// Withdraw `owner` from every job; jobs left without owners are
    /// cancelled. Returns how many were cancelled.
    pub fn cancel_owner(&self, owner: &NoteId) -> usize {
        let handles = {
            let mut registry = lock(&self.registry);
            let mut orphaned = Vec::new();
            for (key, job) in &mut registry.jobs {
                if job.owners.remove(owner) && job.owners.is_empty() {
                    orphaned.push(key.clone());
                }
            }
            orphaned
                .iter()
                .filter_map(|key| registry.jobs.remove(key))
                .map(|job| job.abort)
                .collect::<Vec<_>>()
        };
        abort_all(&handles)
    }

    pub fn cancel_all(&self) -> usize {
        let handles = lock(&self.registry)
            .jobs
            .drain()
            .map(|(_, job)| job.abort)
            .collect::<Vec<_>>();
        abort_all(&handles)
    }

    #[must_use]
    pub(crate) fn is_in_flight(&self, key: &ImageKey) -> bool {
        lock(&self.registry).jobs.contains_key(key)
    }

    /// Number of jobs queued or running, including cancelled ones still unwinding.
    #[must_use]
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    pub async fn wait_for(&self, key: &ImageKey) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|_| !self.is_in_flight(key)).await;
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

fn abort_all(handles: &[AbortHandle]) -> usize {
    for handle in handles {
        handle.abort();
    }
    if !handles.is_empty() {
        tracing::debug!(cancelled = handles.len(), "Cancelled image fetches");
    }
    handles.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::testing::Gate;

    fn key(value: &str) -> ImageKey {
        value.parse().unwrap()
    }

    fn owner(value: &str) -> NoteId {
        value.parse().unwrap()
    }

    async fn discard(_owners: Vec<NoteId>, (): ()) {}

    async fn idle(pool: &ImagePool) {
        tokio::time::timeout(Duration::from_secs(5), pool.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_keys_join_the_job_in_flight() {
        let pool = ImagePool::new(2);
        let gate = Gate::closed();
        let fetches = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));

        for note in ["a", "b"] {
            let waiter = gate.clone();
            let fetches = Arc::clone(&fetches);
            let delivered = Arc::clone(&delivered);
            pool.submit(
                owner(note),
                key("img"),
                async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    waiter.wait().await;
                },
                move |owners, ()| async move { delivered.lock().unwrap().extend(owners) },
            );
        }
        assert!(pool.is_in_flight(&key("img")));

        gate.open();
        idle(&pool).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(*delivered.lock().unwrap(), vec![owner("a"), owner("b")]);
        assert!(!pool.is_in_flight(&key("img")));
        assert!(pool.submit(owner("b"), key("img"), async {}, discard));
        idle(&pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_worker_count() {
        let pool = ImagePool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for index in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let fetch = async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            };
            pool.submit(owner("a"), key(&format!("img-{index}")), fetch, discard);
        }

        idle(&pool).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cancel_owner_aborts_only_that_owners_jobs() {
        let pool = ImagePool::new(4);
        let gate = Gate::closed();
        let finished = Arc::new(AtomicUsize::new(0));

        for (note, image) in [("a", "img-a1"), ("a", "img-a2"), ("b", "img-b")] {
            let gate = gate.clone();
            let finished = Arc::clone(&finished);
            let fetch = async move {
                gate.wait().await;
                finished.fetch_add(1, Ordering::SeqCst);
            };
            pool.submit(owner(note), key(image), fetch, discard);
        }

        assert_eq!(pool.cancel_owner(&owner("a")), 2);
        assert!(!pool.is_in_flight(&key("img-a1")));
        assert!(pool.is_in_flight(&key("img-b")));

        gate.open();
        idle(&pool).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shared_job_survives_until_its_last_owner_is_cancelled() {
        let pool = ImagePool::new(4);
        let gate = Gate::closed();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        for note in ["a", "b", "c"] {
            let waiter = gate.clone();
            let delivered = Arc::clone(&delivered);
            pool.submit(
                owner(note),
                key("shared"),
                async move { waiter.wait().await },
                move |owners, ()| async move { delivered.lock().unwrap().extend(owners) },
            );
        }

        assert_eq!(pool.cancel_owner(&owner("a")), 0);
        assert!(pool.is_in_flight(&key("shared")));
        assert_eq!(pool.cancel_owner(&owner("b")), 0);

        gate.open();
        idle(&pool).await;
        assert_eq!(*delivered.lock().unwrap(), vec![owner("c")]);

        let gate = Gate::closed();
        let waiter = gate.clone();
        pool.submit(owner("a"), key("shared"), async move { waiter.wait().await }, discard);
        pool.submit(owner("b"), key("shared"), async {}, discard);
        assert_eq!(pool.cancel_owner(&owner("a")), 0);
        assert_eq!(pool.cancel_owner(&owner("b")), 1);
        assert!(!pool.is_in_flight(&key("shared")));
        idle(&pool).await;
    }

    #[tokio::test]
    async fn cancel_all_empties_the_registry() {
        let pool = ImagePool::new(1);
        let gate = Gate::closed();
        for image in ["x", "y"] {
            let gate = gate.clone();
            pool.submit(owner("a"), key(image), async move { gate.wait().await }, discard);
        }

        assert_eq!(pool.cancel_all(), 2);
        idle(&pool).await;
        assert_eq!(pool.active(), 0);
    }
}
