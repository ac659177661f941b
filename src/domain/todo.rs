//! Todo Entity
//!
//! A single todo item plus its identifier. Items created locally carry a
//! provisional id until the remote store confirms them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{DomainError, DomainResult};
use super::user::UserId;

/// Maximum title length in characters, counted after trimming
pub const MAX_TITLE_CHARS: usize = 500;

/// Identifier of a todo item
///
/// `Provisional` tokens are generated client-side for not-yet-confirmed
/// items and never leave the client; `Confirmed` ids come from the remote
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TodoId {
    Provisional(u64),
    Confirmed(String),
}

impl TodoId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, TodoId::Provisional(_))
    }

    /// The server-assigned id, if this item has one
    pub fn confirmed(&self) -> Option<&str> {
        match self {
            TodoId::Provisional(_) => None,
            TodoId::Confirmed(id) => Some(id),
        }
    }
}

impl std::fmt::Display for TodoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TodoId::Provisional(token) => write!(f, "temp-{}", token),
            TodoId::Confirmed(id) => f.write_str(id),
        }
    }
}

/// A single todo item as held by the local cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: TodoId,
    /// Every item belongs to exactly one owner
    pub owner: UserId,
    pub title: String,
    pub completed: bool,
    /// Server column `inserted_at`; orders the list newest-first
    pub inserted_at: DateTime<Utc>,
}

impl TodoItem {
    /// Create a fresh provisional item for an optimistic add
    pub fn provisional(token: u64, owner: UserId, title: String) -> Self {
        Self {
            id: TodoId::Provisional(token),
            owner,
            title,
            completed: false,
            inserted_at: Utc::now(),
        }
    }

    /// Sort key for the cache: newest first, id as a deterministic tie-break
    pub(crate) fn sorts_before(&self, other: &TodoItem) -> bool {
        match self.inserted_at.cmp(&other.inserted_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.id > other.id,
        }
    }
}

/// Validate and normalize a title before it reaches the cache or the wire
pub fn validate_title(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(
            "todo title cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(DomainError::Validation(format!(
            "todo title is too long (max {} characters)",
            MAX_TITLE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_title_trims() {
        let title = validate_title("  Buy milk  ").expect("valid title");
        assert_eq!(title, "Buy milk");
    }

    #[test]
    fn test_validate_title_rejects_blank() {
        assert!(matches!(
            validate_title("   "),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_title_rejects_too_long() {
        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        assert!(matches!(
            validate_title(&long),
            Err(DomainError::Validation(_))
        ));
        // Exactly at the limit is fine
        let max = "x".repeat(MAX_TITLE_CHARS);
        assert!(validate_title(&max).is_ok());
    }

    #[test]
    fn test_provisional_id_display() {
        assert_eq!(TodoId::Provisional(3).to_string(), "temp-3");
        assert_eq!(TodoId::Confirmed("42".to_string()).to_string(), "42");
    }

    #[test]
    fn test_sorts_newest_first() {
        let owner = UserId::from("u1");
        let older = TodoItem {
            id: TodoId::Confirmed("1".to_string()),
            owner: owner.clone(),
            title: "older".to_string(),
            completed: false,
            inserted_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        };
        let newer = TodoItem {
            id: TodoId::Confirmed("2".to_string()),
            owner,
            title: "newer".to_string(),
            completed: false,
            inserted_at: Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
        };
        assert!(newer.sorts_before(&older));
        assert!(!older.sorts_before(&newer));
    }
}
