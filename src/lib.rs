//! dk-todo client core
//!
//! Layered architecture:
//! - domain: Core entities and business rules
//! - repository: Remote data access abstractions and implementations
//! - store: Local cache, optimistic mutations, change feed merging
//! - auth: Credential validation and session flows

pub mod auth;
pub mod domain;
pub mod repository;
pub mod store;

pub use auth::{AuthGateway, AuthService, RestAuth, Session};
pub use domain::{AuthUser, DomainError, DomainResult, TodoId, TodoItem, UserId};
pub use repository::{MemoryTodos, RemoteConfig, RemoteTodos, RestTodos};
pub use store::{FeedState, MutationKind, StoreEvent, TodoStore};
