//! Repository Layer - Core Traits
//!
//! Defines the contract the client core depends on for the hosted todos
//! table. Implementations can use REST, in-memory, etc.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::{DomainResult, TodoItem, UserId};

/// Field-level patch for a remote update
///
/// Only set fields are written; the remote row keeps its other columns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TodoPatch {
    pub fn completed(value: bool) -> Self {
        TodoPatch {
            completed: Some(value),
            ..TodoPatch::default()
        }
    }
}

/// Kind of a change-feed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single change-feed notification from the remote store
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub item: TodoItem,
}

/// A live change-feed subscription
///
/// Events stop when the subscription is dropped; a backend-owned producer
/// task, if any, is aborted on drop.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>) -> Self {
        Subscription { events, task: None }
    }

    pub fn with_task(events: mpsc::Receiver<ChangeEvent>, task: tokio::task::JoinHandle<()>) -> Self {
        Subscription {
            events,
            task: Some(task),
        }
    }

    /// Next change event, or `None` once the feed has ended
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Contract for the hosted todos table
///
/// All operations are async to support various backends. Update and delete
/// must only affect rows matching both `id` and `owner`.
#[async_trait]
pub trait RemoteTodos: Send + Sync {
    /// Fetch all items belonging to `owner`, newest first
    async fn list(&self, owner: &UserId) -> DomainResult<Vec<TodoItem>>;

    /// Insert a new row; the store assigns the id
    async fn insert(&self, owner: &UserId, title: &str) -> DomainResult<TodoItem>;

    /// Update the row matching both `id` and `owner`
    async fn update(&self, id: &str, owner: &UserId, patch: TodoPatch) -> DomainResult<()>;

    /// Delete the row matching both `id` and `owner`
    async fn delete(&self, id: &str, owner: &UserId) -> DomainResult<()>;

    /// Subscribe to change notifications; the feed may be unscoped, callers
    /// filter to their own owner
    async fn subscribe(&self, owner: &UserId) -> DomainResult<Subscription>;
}
