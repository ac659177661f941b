//! REST Remote Store
//!
//! PostgREST-style client for the hosted todos table. Update and delete
//! filter on both id and owner, so a request can never touch another
//! user's rows. The change feed is realized by polling: a background task
//! diffs successive list snapshots into insert/update/delete events.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{DomainError, DomainResult, TodoId, TodoItem, UserId};

use super::config::RemoteConfig;
use super::traits::{ChangeEvent, ChangeKind, RemoteTodos, Subscription, TodoPatch};

/// Wire row as returned by the table endpoint
#[derive(Debug, Clone, Deserialize)]
struct TodoRow {
    id: String,
    user_id: String,
    title: String,
    completed: bool,
    inserted_at: DateTime<Utc>,
}

impl TodoRow {
    fn into_item(self) -> TodoItem {
        TodoItem {
            id: TodoId::Confirmed(self.id),
            owner: UserId(self.user_id),
            title: self.title,
            completed: self.completed,
            inserted_at: self.inserted_at,
        }
    }
}

#[derive(Serialize)]
struct InsertBody<'a> {
    title: &'a str,
    user_id: &'a str,
}

/// REST `RemoteTodos` backend
#[derive(Clone)]
pub struct RestTodos {
    http: reqwest::Client,
    config: RemoteConfig,
    access_token: String,
}

impl RestTodos {
    /// `access_token` is the bearer token of the signed-in session
    pub fn new(config: RemoteConfig, access_token: impl Into<String>) -> Self {
        RestTodos {
            http: reqwest::Client::new(),
            config,
            access_token: access_token.into(),
        }
    }

    fn table_url(&self, query: &str) -> String {
        format!(
            "{}/rest/v1/{}?{}",
            self.config.url.trim_end_matches('/'),
            self.config.table,
            query
        )
    }

    fn eq_filter(column: &str, value: &str) -> String {
        format!(
            "{}=eq.{}",
            column,
            utf8_percent_encode(value, NON_ALPHANUMERIC)
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.access_token)
    }

    async fn check(response: reqwest::Response, what: &str) -> DomainResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DomainError::Remote(format!(
                "{} failed: {} {}",
                what, status, body
            )))
        }
    }

    async fn fetch_rows(&self, owner: &UserId) -> DomainResult<Vec<TodoRow>> {
        let query = format!(
            "select=*&{}&order=inserted_at.desc",
            Self::eq_filter("user_id", owner.as_str())
        );
        let response = self
            .request(reqwest::Method::GET, &self.table_url(&query))
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("list failed: {}", e)))?;
        Self::check(response, "list")
            .await?
            .json::<Vec<TodoRow>>()
            .await
            .map_err(|e| DomainError::Remote(format!("list decode failed: {}", e)))
    }
}

/// Diff two list snapshots into change events
///
/// The previous snapshot is keyed by confirmed id; an event's item is the
/// current row for inserts/updates and the last known row for deletes.
fn diff_snapshots(previous: &HashMap<String, TodoItem>, current: &[TodoItem]) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for item in current {
        let Some(id) = item.id.confirmed() else {
            continue;
        };
        match previous.get(id) {
            None => events.push(ChangeEvent {
                kind: ChangeKind::Insert,
                item: item.clone(),
            }),
            Some(old) if old != item => events.push(ChangeEvent {
                kind: ChangeKind::Update,
                item: item.clone(),
            }),
            Some(_) => {}
        }
    }
    for (id, old) in previous {
        if !current.iter().any(|item| item.id.confirmed() == Some(id)) {
            events.push(ChangeEvent {
                kind: ChangeKind::Delete,
                item: old.clone(),
            });
        }
    }
    events
}

fn snapshot_map(items: &[TodoItem]) -> HashMap<String, TodoItem> {
    items
        .iter()
        .filter_map(|item| {
            item.id
                .confirmed()
                .map(|id| (id.to_string(), item.clone()))
        })
        .collect()
}

#[async_trait]
impl RemoteTodos for RestTodos {
    async fn list(&self, owner: &UserId) -> DomainResult<Vec<TodoItem>> {
        let rows = self.fetch_rows(owner).await?;
        Ok(rows.into_iter().map(TodoRow::into_item).collect())
    }

    async fn insert(&self, owner: &UserId, title: &str) -> DomainResult<TodoItem> {
        let body = [InsertBody {
            title,
            user_id: owner.as_str(),
        }];
        let response = self
            .request(reqwest::Method::POST, &self.table_url("select=*"))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("insert failed: {}", e)))?;
        let rows = Self::check(response, "insert")
            .await?
            .json::<Vec<TodoRow>>()
            .await
            .map_err(|e| DomainError::Remote(format!("insert decode failed: {}", e)))?;
        rows.into_iter()
            .next()
            .map(TodoRow::into_item)
            .ok_or_else(|| DomainError::Remote("insert returned no row".to_string()))
    }

    async fn update(&self, id: &str, owner: &UserId, patch: TodoPatch) -> DomainResult<()> {
        let query = format!(
            "{}&{}",
            Self::eq_filter("id", id),
            Self::eq_filter("user_id", owner.as_str())
        );
        let response = self
            .request(reqwest::Method::PATCH, &self.table_url(&query))
            .json(&patch)
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("update failed: {}", e)))?;
        Self::check(response, "update").await?;
        Ok(())
    }

    async fn delete(&self, id: &str, owner: &UserId) -> DomainResult<()> {
        let query = format!(
            "{}&{}",
            Self::eq_filter("id", id),
            Self::eq_filter("user_id", owner.as_str())
        );
        let response = self
            .request(reqwest::Method::DELETE, &self.table_url(&query))
            .send()
            .await
            .map_err(|e| DomainError::Remote(format!("delete failed: {}", e)))?;
        Self::check(response, "delete").await?;
        Ok(())
    }

    async fn subscribe(&self, owner: &UserId) -> DomainResult<Subscription> {
        let initial = self.list(owner).await?;
        let mut previous = snapshot_map(&initial);

        let (tx, rx) = mpsc::channel(64);
        let client = self.clone();
        let owner = owner.clone();
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let current = match client.list(&owner).await {
                    Ok(items) => items,
                    Err(e) => {
                        log::warn!("change feed poll failed: {}", e);
                        continue;
                    }
                };
                for event in diff_snapshots(&previous, &current) {
                    if tx.send(event).await.is_err() {
                        // Subscriber is gone, stop polling
                        return;
                    }
                }
                previous = snapshot_map(&current);
            }
        });

        Ok(Subscription::with_task(rx, task))
    }
}
