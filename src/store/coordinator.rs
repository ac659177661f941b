//! Mutation Coordinator
//!
//! Applies a mutation to the local cache immediately, issues the remote
//! call, and reconciles on success or failure. The inverse applied on
//! failure restores the exact pre-mutation item, value and position.
//! Mutations on the same id are serialized through per-id locks held from
//! the optimistic update until reconciliation; different ids may be in
//! flight concurrently. Remote calls are at-most-once: no automatic retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::{validate_title, AuthUser, DomainError, DomainResult, TodoId, TodoItem};
use crate::repository::{RemoteTodos, TodoPatch};

use super::cache::LocalCache;
use super::feed::FeedState;
use super::{MutationKind, StoreEvent};

/// Per-id serialization locks
#[derive(Default)]
struct MutationLocks {
    locks: Mutex<HashMap<TodoId, Arc<AsyncMutex<()>>>>,
}

impl MutationLocks {
    fn entry(&self, id: &TodoId) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Acquire the lock for `id` without waiting, if free
    fn try_acquire(&self, id: &TodoId) -> Option<OwnedMutexGuard<()>> {
        self.entry(id).try_lock_owned().ok()
    }

    /// Wait for the lock for `id`
    async fn acquire(&self, id: &TodoId) -> OwnedMutexGuard<()> {
        self.entry(id).lock_owned().await
    }

    /// Drop the registry entry for `id` once nothing holds it
    fn release(&self, id: &TodoId) {
        let mut locks = self.locks.lock().unwrap();
        let unused = locks
            .get(id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if unused {
            locks.remove(id);
        }
    }
}

/// Shared state behind the `TodoStore` facade
pub(crate) struct Coordinator {
    pub(crate) cache: Mutex<LocalCache>,
    pub(crate) remote: Arc<dyn RemoteTodos>,
    pub(crate) session: AuthUser,
    locks: MutationLocks,
    // Bumped on close; in-flight tasks re-check it under the cache lock,
    // so a discarded reconciliation can never touch a torn-down cache
    epoch: AtomicU64,
    closed: AtomicBool,
    events: mpsc::UnboundedSender<StoreEvent>,
    next_provisional: AtomicU64,
    feed_state: Mutex<FeedState>,
}

impl Coordinator {
    pub(crate) fn new(
        remote: Arc<dyn RemoteTodos>,
        session: AuthUser,
        events: mpsc::UnboundedSender<StoreEvent>,
    ) -> Self {
        Coordinator {
            cache: Mutex::new(LocalCache::new()),
            remote,
            session,
            locks: MutationLocks::default(),
            epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            events,
            next_provisional: AtomicU64::new(1),
            feed_state: Mutex::new(FeedState::Disconnected),
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// The cache, if the session that issued `epoch` is still alive
    pub(crate) fn live_cache(&self, epoch: u64) -> Option<MutexGuard<'_, LocalCache>> {
        let cache = self.cache.lock().unwrap();
        (self.epoch.load(Ordering::SeqCst) == epoch).then_some(cache)
    }

    /// The cache plus the current epoch; fails once the store is closed
    fn live_mut(&self) -> DomainResult<(MutexGuard<'_, LocalCache>, u64)> {
        let cache = self.cache.lock().unwrap();
        if self.closed.load(Ordering::SeqCst) {
            return Err(DomainError::Authorization(
                "session has ended".to_string(),
            ));
        }
        Ok((cache, self.epoch.load(Ordering::SeqCst)))
    }

    pub(crate) fn notify(&self, event: StoreEvent) {
        // The presentation layer may have dropped its receiver
        let _ = self.events.send(event);
    }

    pub(crate) fn feed_state(&self) -> FeedState {
        *self.feed_state.lock().unwrap()
    }

    pub(crate) fn set_feed_state(&self, state: FeedState) {
        let mut current = self.feed_state.lock().unwrap();
        if *current == state {
            return;
        }
        *current = state;
        drop(current);
        log::debug!("change feed {:?}", state);
        self.notify(StoreEvent::Feed(state));
    }

    /// Look up the mutation target and check it belongs to the session
    /// owner, before any remote contact
    fn precheck(&self, cache: &LocalCache, id: &TodoId) -> DomainResult<TodoItem> {
        let item = cache
            .get(id)
            .ok_or_else(|| DomainError::NotFound(format!("no todo with id {}", id)))?;
        if item.owner != self.session.id {
            return Err(DomainError::Authorization(format!(
                "todo {} belongs to another user",
                id
            )));
        }
        Ok(item.clone())
    }

    pub(crate) fn submit_add(self: Arc<Self>, title: &str) -> DomainResult<TodoId> {
        let title = validate_title(title)?;
        let token = self.next_provisional.fetch_add(1, Ordering::Relaxed);
        let item = TodoItem::provisional(token, self.session.id.clone(), title.clone());
        let id = item.id.clone();

        let epoch = {
            let (mut cache, epoch) = self.live_mut()?;
            cache.upsert(item);
            epoch
        };

        let this = Arc::clone(&self);
        let provisional = id.clone();
        tokio::spawn(async move {
            match this.remote.insert(&this.session.id, &title).await {
                Ok(confirmed) => {
                    let confirmed_id = confirmed.id.clone();
                    if let Some(mut cache) = this.live_cache(epoch) {
                        // Matched by the request's provisional id, not by
                        // content; a feed echo may already have landed the
                        // confirmed row, in which case it stays as-is
                        cache.remove(&provisional);
                        if cache.get(&confirmed_id).is_none() {
                            cache.upsert(confirmed);
                        }
                    }
                    log::debug!("add {} confirmed as {}", provisional, confirmed_id);
                    this.notify(StoreEvent::Confirmed {
                        kind: MutationKind::Add,
                        id: confirmed_id,
                    });
                }
                Err(error) => {
                    if let Some(mut cache) = this.live_cache(epoch) {
                        cache.remove(&provisional);
                    }
                    log::warn!("add {} failed: {}", provisional, error);
                    this.notify(StoreEvent::Failed {
                        kind: MutationKind::Add,
                        id: provisional,
                        error,
                    });
                }
            }
        });
        Ok(id)
    }

    pub(crate) fn submit_toggle(self: Arc<Self>, id: &TodoId) -> DomainResult<()> {
        if id.is_provisional() {
            return Err(DomainError::NotFound(format!(
                "todo {} is not confirmed yet",
                id
            )));
        }
        match self.locks.try_acquire(id) {
            Some(guard) => {
                let (prior, epoch) = {
                    let (mut cache, epoch) = match self.live_mut() {
                        Ok(live) => live,
                        Err(e) => {
                            drop(guard);
                            self.locks.release(id);
                            return Err(e);
                        }
                    };
                    let prior = match self.precheck(&cache, id) {
                        Ok(prior) => prior,
                        Err(e) => {
                            drop(cache);
                            drop(guard);
                            self.locks.release(id);
                            return Err(e);
                        }
                    };
                    let mut flipped = prior.clone();
                    flipped.completed = !prior.completed;
                    cache.upsert(flipped);
                    (prior, epoch)
                };
                let this = Arc::clone(&self);
                let id = id.clone();
                tokio::spawn(async move {
                    this.finish_toggle(id, prior, guard, epoch).await;
                });
                Ok(())
            }
            None => {
                // A mutation on this id is still reconciling; queue behind
                // it, errors from the deferred precheck arrive as events
                let this = Arc::clone(&self);
                let id = id.clone();
                tokio::spawn(async move {
                    let guard = this.locks.acquire(&id).await;
                    let applied = {
                        match this.live_mut() {
                            Ok((mut cache, epoch)) => match this.precheck(&cache, &id) {
                                Ok(prior) => {
                                    let mut flipped = prior.clone();
                                    flipped.completed = !prior.completed;
                                    cache.upsert(flipped);
                                    Ok((prior, epoch))
                                }
                                Err(e) => Err(Some(e)),
                            },
                            Err(_) => Err(None),
                        }
                    };
                    match applied {
                        Ok((prior, epoch)) => this.finish_toggle(id, prior, guard, epoch).await,
                        Err(error) => {
                            if let Some(error) = error {
                                this.notify(StoreEvent::Failed {
                                    kind: MutationKind::Toggle,
                                    id: id.clone(),
                                    error,
                                });
                            }
                            drop(guard);
                            this.locks.release(&id);
                        }
                    }
                });
                Ok(())
            }
        }
    }

    async fn finish_toggle(
        self: Arc<Self>,
        id: TodoId,
        prior: TodoItem,
        guard: OwnedMutexGuard<()>,
        epoch: u64,
    ) {
        let raw = match id.confirmed() {
            Some(raw) => raw.to_string(),
            None => {
                drop(guard);
                self.locks.release(&id);
                return;
            }
        };
        let patch = TodoPatch::completed(!prior.completed);
        match self.remote.update(&raw, &self.session.id, patch).await {
            Ok(()) => {
                self.notify(StoreEvent::Confirmed {
                    kind: MutationKind::Toggle,
                    id: id.clone(),
                });
            }
            Err(error) => {
                if let Some(mut cache) = self.live_cache(epoch) {
                    cache.upsert(prior);
                }
                log::warn!("toggle of {} failed: {}", id, error);
                self.notify(StoreEvent::Failed {
                    kind: MutationKind::Toggle,
                    id: id.clone(),
                    error,
                });
            }
        }
        drop(guard);
        self.locks.release(&id);
    }

    pub(crate) fn submit_delete(self: Arc<Self>, id: &TodoId) -> DomainResult<()> {
        if id.is_provisional() {
            return Err(DomainError::NotFound(format!(
                "todo {} is not confirmed yet",
                id
            )));
        }
        match self.locks.try_acquire(id) {
            Some(guard) => {
                let (snapshot, epoch) = {
                    let (mut cache, epoch) = match self.live_mut() {
                        Ok(live) => live,
                        Err(e) => {
                            drop(guard);
                            self.locks.release(id);
                            return Err(e);
                        }
                    };
                    let snapshot = match self.precheck(&cache, id) {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            drop(cache);
                            drop(guard);
                            self.locks.release(id);
                            return Err(e);
                        }
                    };
                    cache.remove(id);
                    (snapshot, epoch)
                };
                let this = Arc::clone(&self);
                let id = id.clone();
                tokio::spawn(async move {
                    this.finish_delete(id, snapshot, guard, epoch).await;
                });
                Ok(())
            }
            None => {
                let this = Arc::clone(&self);
                let id = id.clone();
                tokio::spawn(async move {
                    let guard = this.locks.acquire(&id).await;
                    let applied = {
                        match this.live_mut() {
                            Ok((mut cache, epoch)) => match this.precheck(&cache, &id) {
                                Ok(snapshot) => {
                                    cache.remove(&id);
                                    Ok((snapshot, epoch))
                                }
                                Err(e) => Err(Some(e)),
                            },
                            Err(_) => Err(None),
                        }
                    };
                    match applied {
                        Ok((snapshot, epoch)) => {
                            this.finish_delete(id, snapshot, guard, epoch).await
                        }
                        Err(error) => {
                            if let Some(error) = error {
                                this.notify(StoreEvent::Failed {
                                    kind: MutationKind::Delete,
                                    id: id.clone(),
                                    error,
                                });
                            }
                            drop(guard);
                            this.locks.release(&id);
                        }
                    }
                });
                Ok(())
            }
        }
    }

    async fn finish_delete(
        self: Arc<Self>,
        id: TodoId,
        snapshot: TodoItem,
        guard: OwnedMutexGuard<()>,
        epoch: u64,
    ) {
        let raw = match id.confirmed() {
            Some(raw) => raw.to_string(),
            None => {
                drop(guard);
                self.locks.release(&id);
                return;
            }
        };
        match self.remote.delete(&raw, &self.session.id).await {
            Ok(()) => {
                self.notify(StoreEvent::Confirmed {
                    kind: MutationKind::Delete,
                    id: id.clone(),
                });
            }
            Err(error) => {
                // The sort key puts the snapshot back at its old position
                if let Some(mut cache) = self.live_cache(epoch) {
                    cache.upsert(snapshot);
                }
                log::warn!("delete of {} failed: {}", id, error);
                self.notify(StoreEvent::Failed {
                    kind: MutationKind::Delete,
                    id: id.clone(),
                    error,
                });
            }
        }
        drop(guard);
        self.locks.release(&id);
    }

    /// Tear the session down: pending reconciliations are discarded, the
    /// cache is emptied, intents are rejected from here on
    pub(crate) fn close(&self) {
        let mut cache = self.cache.lock().unwrap();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        cache.clear();
        drop(cache);
        self.set_feed_state(FeedState::Disconnected);
        log::info!("todo store for {} closed", self.session.id);
    }
}
