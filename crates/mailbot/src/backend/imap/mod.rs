//! Stateful IMAP adapter.
//!
//! `Disconnected → Connected → FolderLocked → Disconnected`. At most one
//! [`FolderLock`] is held; selecting another folder releases the current
//! lock first, and every search requires a lock.
//!
//! Messages carry a UID only. Fetching or moving one after another folder
//! has been selected addresses that folder instead.

pub mod query;
pub mod session;
pub mod stream;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailbot_mime::ParsedMail;
use mailbot_oauth::Resolver;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use query::{ImapQuery, SearchKey};
pub use session::{AsyncImapConnector, AsyncImapSession};
pub use stream::ImapStream;
pub use transport::{FolderLock, StoreConnector, StoreSession};

use super::{BackendKind, ConnectionInfo, MailboxBackend};
use crate::config::ImapSettings;
use crate::criteria::SearchCriteria;
use crate::error::{Error, Result};
use crate::message::{Message, MessageContext, MessageId, MessageMeta, MessageSource};

type SharedSession = Arc<Mutex<Box<dyn StoreSession>>>;

/// IMAP mailbox adapter.
pub struct ImapBackend {
    settings: ImapSettings,
    default_criteria: Option<SearchCriteria>,
    context: Arc<MessageContext>,
    connector: Arc<dyn StoreConnector>,
    resolver: Resolver,
    session: Option<SharedSession>,
    lock: Option<FolderLock>,
    user: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ImapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapBackend")
            .field("host", &self.settings.host)
            .field("connected", &self.session.is_some())
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl ImapBackend {
    /// Creates an adapter using the async-imap transport.
    #[must_use]
    pub fn new(
        settings: ImapSettings,
        default_criteria: Option<SearchCriteria>,
        context: Arc<MessageContext>,
    ) -> Self {
        Self {
            settings,
            default_criteria,
            context,
            connector: Arc::new(AsyncImapConnector),
            resolver: Resolver::new(),
            session: None,
            lock: None,
            user: None,
            connected_at: None,
        }
    }

    /// Uses a different store transport.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Uses a different credential resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Currently locked folder.
    #[must_use]
    pub fn locked_folder(&self) -> Option<&str> {
        self.lock.as_ref().map(FolderLock::folder)
    }

    fn session(&self) -> Result<&SharedSession> {
        self.session.as_ref().ok_or(Error::NotConnected)
    }

    async fn take_lock(&mut self, session: &SharedSession) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            session.lock().await.release_folder(lock).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxBackend for ImapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Imap
    }

    async fn connect(&mut self, folder: Option<&str>) -> Result<()> {
        if self.session.is_some() {
            self.disconnect().await?;
        }
        let credential = self.resolver.resolve(&self.settings.auth_descriptor()).await?;
        let session = self.connector.connect(&self.settings, &credential).await?;

        self.session = Some(Arc::new(Mutex::new(session)));
        self.user = Some(credential.identity);
        self.connected_at = Some(Utc::now());
        info!(host = %self.settings.host, "connected");

        if let Some(folder) = folder {
            self.select_folder(folder).await?;
        }
        Ok(())
    }

    async fn select_folder(&mut self, folder: &str) -> Result<()> {
        let session = Arc::clone(self.session()?);
        if self.locked_folder() == Some(folder) {
            debug!(%folder, "folder already locked");
            return Ok(());
        }

        self.take_lock(&session).await?;
        let lock = session.lock().await.lock_folder(folder).await?;
        info!(%folder, lock = lock.id(), "folder locked");
        self.lock = Some(lock);
        Ok(())
    }

    async fn release_folder(&mut self) -> Result<()> {
        let Some(session) = self.session.clone() else {
            self.lock = None;
            return Ok(());
        };
        self.take_lock(&session).await
    }

    /// Searches the locked folder.
    ///
    /// Without a session this fails with [`Error::NotConnected`] before the
    /// lock is checked; with a session but no lock it fails with
    /// [`Error::NoFolderSelected`].
    async fn search_messages(&mut self, criteria: Option<&SearchCriteria>) -> Result<Vec<Message>> {
        let session = Arc::clone(self.session()?);
        if self.lock.is_none() {
            return Err(Error::NoFolderSelected);
        }

        let criteria = criteria.or(self.default_criteria.as_ref());
        let query = criteria.map_or_else(ImapQuery::default, |c| {
            ImapQuery::build(c, &self.context.flags)
        });

        let Some(uids) = session.lock().await.search(&query).await? else {
            error!(%query, "error searching");
            return Err(Error::Search(query.to_string()));
        };
        info!(count = uids.len(), "messages with the selected criteria");

        let source: Arc<dyn MessageSource> = Arc::new(ImapMessageSource { session });
        Ok(uids
            .into_iter()
            .map(|uid| {
                Message::new(
                    MessageId::Uid(uid),
                    MessageMeta::default(),
                    Arc::clone(&source),
                    Arc::clone(&self.context),
                )
            })
            .collect())
    }

    /// Releases the lock and logs out.
    ///
    /// Logout is attempted and the session dropped even when releasing the
    /// lock fails; the first error is returned.
    async fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            self.lock = None;
            return Ok(());
        };
        let released = self.take_lock(&session).await;
        if let Err(e) = &released {
            warn!(error = %e, "error releasing folder before logout");
        }
        let logged_out = session.lock().await.logout().await;
        self.connected_at = None;
        info!(host = %self.settings.host, "disconnected");
        released.and(logged_out)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            backend: BackendKind::Imap,
            authenticated: self.session.is_some(),
            user: self.user.clone(),
            folder: self.locked_folder().map(ToString::to_string),
            connected_at: self.connected_at,
        }
    }
}

/// Fetches and moves messages through the shared session.
///
/// UIDs are resolved against whichever folder the session has selected at
/// fetch time, so messages must be processed before selecting another folder.
struct ImapMessageSource {
    session: SharedSession,
}

impl ImapMessageSource {
    fn uid(id: &MessageId) -> Result<u32> {
        match id {
            MessageId::Uid(uid) => Ok(*uid),
            MessageId::Id(id) => Err(Error::Config(format!("{id} is not an IMAP UID"))),
        }
    }
}

#[async_trait]
impl MessageSource for ImapMessageSource {
    async fn fetch_content(&self, id: &MessageId) -> Result<ParsedMail> {
        let uid = Self::uid(id)?;
        let raw = self
            .session
            .lock()
            .await
            .fetch_raw(uid)
            .await?
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| Error::EmptyContent(id.to_string()))?;
        Ok(ParsedMail::parse(&raw)?)
    }

    async fn move_message(&self, id: &MessageId, folder: &str) -> Result<()> {
        let uid = Self::uid(id)?;
        self.session.lock().await.move_message(uid, folder).await
    }
}
