//! Store Layer
//!
//! Client-side state for one authenticated session: the local cache, the
//! mutation coordinator, and the change feed listener, behind a single
//! facade. The cache lives for one session; it is discarded on close and
//! rebuilt from a fresh remote fetch on the next sign-in.

mod cache;
mod coordinator;
mod feed;

#[cfg(test)]
mod tests;

pub use cache::LocalCache;
pub use feed::FeedState;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{AuthUser, DomainError, DomainResult, TodoId, TodoItem};
use crate::repository::RemoteTodos;

use coordinator::Coordinator;

/// Kind of a locally initiated mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Add,
    Toggle,
    Delete,
}

/// Notifications surfaced to the presentation layer
///
/// Intents return immediately; whatever is only known after the remote
/// call resolves arrives here. Failures always mean the cache has already
/// been restored to its pre-mutation state.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A mutation was confirmed by the remote store
    Confirmed { kind: MutationKind, id: TodoId },
    /// A mutation failed after its optimistic update was reverted
    Failed {
        kind: MutationKind,
        id: TodoId,
        error: DomainError,
    },
    /// The change feed listener changed state
    Feed(FeedState),
}

/// Per-session facade over the local cache and the remote store
pub struct TodoStore {
    inner: Arc<Coordinator>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl TodoStore {
    /// Establish a session store: fetch the current list, subscribe to the
    /// change feed, and hand back the store plus its event receiver
    ///
    /// A signed-in user is a precondition; the surrounding routing layer
    /// enforces it.
    pub async fn connect(
        remote: Arc<dyn RemoteTodos>,
        user: AuthUser,
    ) -> DomainResult<(Self, mpsc::UnboundedReceiver<StoreEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Coordinator::new(remote, user, events_tx));

        let items = inner.remote.list(&inner.session.id).await?;
        {
            let mut cache = inner.cache.lock().unwrap();
            for item in items {
                cache.upsert(item);
            }
        }

        let store = TodoStore {
            inner,
            feed_task: Mutex::new(None),
        };
        store.start_feed().await?;
        log::info!("todo store connected for {}", store.inner.session.id);
        Ok((store, events_rx))
    }

    async fn start_feed(&self) -> DomainResult<()> {
        let inner = Arc::clone(&self.inner);
        inner.set_feed_state(FeedState::Subscribing);
        let mut subscription = match inner.remote.subscribe(&inner.session.id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                inner.set_feed_state(FeedState::Disconnected);
                return Err(e);
            }
        };
        inner.set_feed_state(FeedState::Active);

        let epoch = inner.epoch();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(mut cache) = inner.live_cache(epoch) else {
                    break;
                };
                feed::merge_event(&mut cache, &inner.session.id, event);
            }
            inner.set_feed_state(FeedState::Disconnected);
        });
        *self.feed_task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Queue a new todo; the provisional item is visible before the call
    /// returns
    pub fn submit_add(&self, title: &str) -> DomainResult<TodoId> {
        Arc::clone(&self.inner).submit_add(title)
    }

    /// Flip an item's completed state optimistically
    pub fn submit_toggle(&self, id: &TodoId) -> DomainResult<()> {
        Arc::clone(&self.inner).submit_toggle(id)
    }

    /// Remove an item optimistically
    pub fn submit_delete(&self, id: &TodoId) -> DomainResult<()> {
        Arc::clone(&self.inner).submit_delete(id)
    }

    /// Current list, newest first
    pub fn visible_items(&self) -> Vec<TodoItem> {
        self.inner.cache.lock().unwrap().snapshot()
    }

    /// Count of items still to do
    pub fn remaining_count(&self) -> usize {
        self.inner.cache.lock().unwrap().remaining()
    }

    pub fn feed_state(&self) -> FeedState {
        self.inner.feed_state()
    }

    pub fn user(&self) -> &AuthUser {
        &self.inner.session
    }

    /// Re-fetch the remote list and rebuild the confirmed entries, keeping
    /// provisional ones still awaiting confirmation
    pub async fn refresh(&self) -> DomainResult<()> {
        let epoch = self.inner.epoch();
        let items = self.inner.remote.list(&self.inner.session.id).await?;
        if let Some(mut cache) = self.inner.live_cache(epoch) {
            let provisional: Vec<TodoItem> = cache
                .snapshot()
                .into_iter()
                .filter(|item| item.id.is_provisional())
                .collect();
            cache.clear();
            for item in items {
                cache.upsert(item);
            }
            for item in provisional {
                cache.upsert(item);
            }
        }
        Ok(())
    }

    /// Tear the session down; pending reconciliations are discarded and
    /// the change feed subscription is dropped
    pub fn close(&self) {
        if let Some(task) = self.feed_task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.close();
    }
}

impl Drop for TodoStore {
    fn drop(&mut self) {
        if let Some(task) = self.feed_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
