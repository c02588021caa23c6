//! Store transport capability used by the IMAP adapter.
//!
//! The adapter only talks to these traits, so tests can drive it with an
//! in-memory store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use mailbot_oauth::Credential;

use super::query::ImapQuery;
use crate::config::ImapSettings;
use crate::error::Result;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Exclusive claim on one folder of a session.
///
/// Not `Clone`: the handle is given back by value to release it, so a lock
/// can be released at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct FolderLock {
    id: u64,
    folder: String,
}

impl FolderLock {
    /// Creates a lock handle for `folder` with a fresh id.
    #[must_use]
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            folder: folder.into(),
        }
    }

    /// Locked folder.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Process-unique handle id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Opens authenticated store sessions.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Connects and authenticates.
    async fn connect(
        &self,
        settings: &ImapSettings,
        credential: &Credential,
    ) -> Result<Box<dyn StoreSession>>;
}

/// An authenticated store session.
#[async_trait]
pub trait StoreSession: Send {
    /// Selects `folder` and returns its lock.
    async fn lock_folder(&mut self, folder: &str) -> Result<FolderLock>;

    /// Releases a lock obtained from this session.
    async fn release_folder(&mut self, lock: FolderLock) -> Result<()>;

    /// Searches the locked folder; `None` when the server rejects the query.
    async fn search(&mut self, query: &ImapQuery) -> Result<Option<Vec<u32>>>;

    /// Raw message bytes; `None` when the server returns no payload.
    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>>;

    /// Moves a message of the locked folder.
    async fn move_message(&mut self, uid: u32, folder: &str) -> Result<()>;

    /// Ends the session.
    async fn logout(&mut self) -> Result<()>;
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_ids_are_unique() {
        let a = FolderLock::new("INBOX");
        let b = FolderLock::new("INBOX");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.folder(), b.folder());
    }
}
