//! Backend adapters behind the mailbox interface.
//!
//! - [`imap`]: stateful folder store with a single folder lock
//! - [`graph`]: stateless Microsoft Graph query service

pub mod graph;
pub mod imap;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::criteria::SearchCriteria;
use crate::error::Result;
use crate::message::Message;

/// Backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// IMAP store.
    Imap,
    /// Microsoft Graph.
    Graph,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap => f.write_str("imap"),
            Self::Graph => f.write_str("msgraph"),
        }
    }
}

/// Connection state summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Backend type.
    pub backend: BackendKind,
    /// Whether a session or token is held.
    pub authenticated: bool,
    /// Mailbox user.
    pub user: Option<String>,
    /// Selected folder.
    pub folder: Option<String>,
    /// When the session was opened or the token acquired.
    pub connected_at: Option<DateTime<Utc>>,
}

/// One mailbox backend.
///
/// Calls on one instance are sequential; instances share no state.
#[async_trait]
pub trait MailboxBackend: Send {
    /// Backend type.
    fn kind(&self) -> BackendKind;

    /// Authenticates and optionally selects `folder`.
    async fn connect(&mut self, folder: Option<&str>) -> Result<()>;

    /// Makes `folder` the search target.
    async fn select_folder(&mut self, folder: &str) -> Result<()>;

    /// Drops the search target. Idempotent.
    async fn release_folder(&mut self) -> Result<()>;

    /// Searches the selected folder; `None` uses the configured criteria.
    async fn search_messages(&mut self, criteria: Option<&SearchCriteria>) -> Result<Vec<Message>>;

    /// Releases everything. Safe to call repeatedly.
    async fn disconnect(&mut self) -> Result<()>;

    /// Current connection state.
    fn connection_info(&self) -> ConnectionInfo;
}
