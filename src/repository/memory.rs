//! In-Memory Remote Store
//!
//! Vec-backed implementation used by the crate's own tests and for offline
//! sessions. Mutations broadcast change events to every subscriber, so a
//! session sees echoes of its own writes the way it would with a real feed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};

use crate::domain::{DomainError, DomainResult, TodoId, TodoItem, UserId};

use super::traits::{ChangeEvent, ChangeKind, RemoteTodos, Subscription, TodoPatch};

/// Operations a test can tell to fail, for exercising rollback paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    List,
    Insert,
    Update,
    Delete,
}

/// In-memory `RemoteTodos` backend
pub struct MemoryTodos {
    rows: Mutex<Vec<TodoItem>>,
    subscribers: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    next_id: AtomicU64,
    mutation_calls: AtomicUsize,
    faults: Mutex<Vec<FaultOp>>,
}

impl MemoryTodos {
    pub fn new() -> Self {
        MemoryTodos {
            rows: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            mutation_calls: AtomicUsize::new(0),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-shot failure for the next matching operation
    pub async fn fail_next(&self, op: FaultOp) {
        self.faults.lock().await.push(op);
    }

    /// Number of mutating calls (insert/update/delete) that reached this
    /// backend
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    /// Insert a confirmed row directly, without broadcasting an event
    pub async fn seed(
        &self,
        owner: &UserId,
        id: &str,
        title: &str,
        completed: bool,
        inserted_at: DateTime<Utc>,
    ) -> TodoItem {
        let item = TodoItem {
            id: TodoId::Confirmed(id.to_string()),
            owner: owner.clone(),
            title: title.to_string(),
            completed,
            inserted_at,
        };
        self.rows.lock().await.push(item.clone());
        item
    }

    async fn take_fault(&self, op: FaultOp) -> bool {
        let mut faults = self.faults.lock().await;
        if let Some(pos) = faults.iter().position(|f| *f == op) {
            faults.remove(pos);
            true
        } else {
            false
        }
    }

    async fn broadcast(&self, kind: ChangeKind, item: TodoItem) {
        let event = ChangeEvent { kind, item };
        let mut subscribers = self.subscribers.lock().await;
        let mut alive = Vec::with_capacity(subscribers.len());
        for tx in subscribers.drain(..) {
            if tx.send(event.clone()).await.is_ok() {
                alive.push(tx);
            }
        }
        *subscribers = alive;
    }
}

impl Default for MemoryTodos {
    fn default() -> Self {
        MemoryTodos::new()
    }
}

#[async_trait]
impl RemoteTodos for MemoryTodos {
    async fn list(&self, owner: &UserId) -> DomainResult<Vec<TodoItem>> {
        if self.take_fault(FaultOp::List).await {
            return Err(DomainError::Remote("injected list failure".to_string()));
        }
        let mut items: Vec<TodoItem> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|item| &item.owner == owner)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    async fn insert(&self, owner: &UserId, title: &str) -> DomainResult<TodoItem> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(FaultOp::Insert).await {
            return Err(DomainError::Remote("injected insert failure".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let item = TodoItem {
            id: TodoId::Confirmed(id.to_string()),
            owner: owner.clone(),
            title: title.to_string(),
            completed: false,
            inserted_at: Utc::now(),
        };
        self.rows.lock().await.push(item.clone());
        self.broadcast(ChangeKind::Insert, item.clone()).await;
        Ok(item)
    }

    async fn update(&self, id: &str, owner: &UserId, patch: TodoPatch) -> DomainResult<()> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(FaultOp::Update).await {
            return Err(DomainError::Remote("injected update failure".to_string()));
        }
        let updated = {
            let mut rows = self.rows.lock().await;
            rows.iter_mut()
                .find(|row| row.id.confirmed() == Some(id) && &row.owner == owner)
                .map(|row| {
                    if let Some(title) = patch.title {
                        row.title = title;
                    }
                    if let Some(completed) = patch.completed {
                        row.completed = completed;
                    }
                    row.clone()
                })
        };
        // Like a REST table endpoint, a filter that matches nothing succeeds
        if let Some(item) = updated {
            self.broadcast(ChangeKind::Update, item).await;
        }
        Ok(())
    }

    async fn delete(&self, id: &str, owner: &UserId) -> DomainResult<()> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_fault(FaultOp::Delete).await {
            return Err(DomainError::Remote("injected delete failure".to_string()));
        }
        let removed = {
            let mut rows = self.rows.lock().await;
            let pos = rows
                .iter()
                .position(|row| row.id.confirmed() == Some(id) && &row.owner == owner);
            pos.map(|pos| rows.remove(pos))
        };
        if let Some(item) = removed {
            self.broadcast(ChangeKind::Delete, item).await;
        }
        Ok(())
    }

    async fn subscribe(&self, _owner: &UserId) -> DomainResult<Subscription> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().await.push(tx);
        Ok(Subscription::new(rx))
    }
}
