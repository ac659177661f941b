//! Change Feed Listener
//!
//! Merges asynchronous insert/update/delete notifications from the remote
//! store into the local cache, independent of locally initiated mutations.
//! The merge makes no distinction between echoes of this session's own
//! writes and changes from other sessions, which is why it has to be
//! idempotent.

use crate::domain::UserId;
use crate::repository::{ChangeEvent, ChangeKind};

use super::cache::LocalCache;

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Subscribing,
    Active,
}

/// Merge a single change-feed event into the cache
///
/// Idempotent and tolerant of out-of-order delivery for unrelated ids.
/// Events for other owners are dropped; the feed may be unscoped.
pub(crate) fn merge_event(cache: &mut LocalCache, owner: &UserId, event: ChangeEvent) {
    if &event.item.owner != owner {
        return;
    }
    match event.kind {
        ChangeKind::Insert => {
            // An id that already landed via reconciliation stays untouched
            if cache.get(&event.item.id).is_none() {
                cache.upsert(event.item);
            }
        }
        ChangeKind::Update => cache.upsert(event.item),
        ChangeKind::Delete => {
            cache.remove(&event.item.id);
        }
    }
}
