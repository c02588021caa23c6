//! Backend-independent mailbox facade.

use std::sync::Arc;

use tracing::debug;

use crate::backend::graph::GraphBackend;
use crate::backend::imap::ImapBackend;
use crate::backend::{BackendKind, ConnectionInfo, MailboxBackend};
use crate::config::{BackendSettings, FeatureFlags, MailboxConfig};
use crate::criteria::SearchCriteria;
use crate::error::Result;
use crate::message::{Message, MessageContext};

/// A mailbox backed by exactly one adapter.
///
/// ```ignore
/// let config = MailboxConfig::from_file("mailbot.json")?;
/// let mut mailbox = Mailbox::from_config(&config, FeatureFlags::from_env())?;
/// mailbox.connect(Some("INBOX")).await?;
/// for message in mailbox.search_messages(None).await? {
///     let attachments = message.search_attachments(None).await?;
///     message.move_to(None).await?;
/// }
/// mailbox.disconnect().await?;
/// ```
pub struct Mailbox {
    backend: Box<dyn MailboxBackend>,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("backend", &self.backend.kind())
            .field("info", &self.backend.connection_info())
            .finish()
    }
}

impl Mailbox {
    /// Builds the adapter selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] unless exactly one backend is
    /// configured or when the default criteria are malformed, and
    /// [`crate::Error::ProxyConfig`] for an unusable Graph proxy.
    pub fn from_config(config: &MailboxConfig, flags: FeatureFlags) -> Result<Self> {
        let default_criteria = config.default_criteria()?;
        let context = Arc::new(MessageContext::from_config(config, flags));

        let backend: Box<dyn MailboxBackend> = match config.backend()? {
            BackendSettings::Imap(settings) => Box::new(ImapBackend::new(
                settings.clone(),
                default_criteria,
                context,
            )),
            BackendSettings::Graph(settings) => Box::new(GraphBackend::new(
                settings.clone(),
                default_criteria,
                context,
            )?),
        };
        debug!(backend = %backend.kind(), "mailbox created");
        Ok(Self { backend })
    }

    /// Wraps a custom adapter.
    #[must_use]
    pub fn with_backend(backend: Box<dyn MailboxBackend>) -> Self {
        Self { backend }
    }

    /// Backend type.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Authenticates and optionally selects `folder`.
    ///
    /// # Errors
    ///
    /// Returns the adapter's authentication or transport error.
    pub async fn connect(&mut self, folder: Option<&str>) -> Result<()> {
        self.backend.connect(folder).await
    }

    /// Makes `folder` the search target.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotConnected`] for IMAP without a session.
    pub async fn select_folder(&mut self, folder: &str) -> Result<()> {
        self.backend.select_folder(folder).await
    }

    /// Drops the search target.
    ///
    /// # Errors
    ///
    /// Returns the adapter's transport error.
    pub async fn release_folder(&mut self) -> Result<()> {
        self.backend.release_folder().await
    }

    /// Searches the selected folder; `None` uses the configured criteria.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotConnected`], [`crate::Error::NoFolderSelected`]
    /// or [`crate::Error::Search`].
    pub async fn search_messages(
        &mut self,
        criteria: Option<&SearchCriteria>,
    ) -> Result<Vec<Message>> {
        self.backend.search_messages(criteria).await
    }

    /// Releases the session or token.
    ///
    /// # Errors
    ///
    /// Returns the adapter's transport error.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.backend.disconnect().await
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_info(&self) -> ConnectionInfo {
        self.backend.connection_info()
    }
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
    use crate::error::Error;

    #[test]
    fn test_backend_selection() {
        let imap = MailboxConfig::from_json_str(
            r#"{ "imap": { "host": "imap.example.com", "user": "bot", "password": "pw" } }"#,
        )
        .unwrap();
        let mailbox = Mailbox::from_config(&imap, FeatureFlags::default()).unwrap();
        assert_eq!(mailbox.backend(), BackendKind::Imap);
        assert!(!mailbox.connection_info().authenticated);

        let graph = MailboxConfig::from_json_str(
            r#"{ "msGraph": { "auth": { "tenantId": "t", "clientId": "c",
                 "clientSecret": "s", "user": "bot@x.com" } } }"#,
        )
        .unwrap();
        let mailbox = Mailbox::from_config(&graph, FeatureFlags::default()).unwrap();
        assert_eq!(mailbox.backend(), BackendKind::Graph);
    }

    #[test]
    fn test_missing_backend() {
        let config = MailboxConfig::from_json_str("{}").unwrap();
        assert!(matches!(
            Mailbox::from_config(&config, FeatureFlags::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_bad_proxy_fails_construction() {
        let config = MailboxConfig::from_json_str(
            r#"{ "msGraph": { "auth": { "tenantId": "t", "clientId": "c",
                 "clientSecret": "s", "user": "bot@x.com" },
                 "proxy": { "enabled": true, "port": 8080 } } }"#,
        )
        .unwrap();
        assert!(matches!(
            Mailbox::from_config(&config, FeatureFlags::default()),
            Err(Error::ProxyConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_calls_before_connect() {
        let config = MailboxConfig::from_json_str(
            r#"{ "imap": { "host": "imap.example.com", "user": "bot", "password": "pw" } }"#,
        )
        .unwrap();
        let mut mailbox = Mailbox::from_config(&config, FeatureFlags::default()).unwrap();
        assert!(matches!(mailbox.select_folder("INBOX").await, Err(Error::NotConnected)));
        assert!(matches!(mailbox.search_messages(None).await, Err(Error::NotConnected)));
        mailbox.release_folder().await.unwrap();
        mailbox.disconnect().await.unwrap();
    }
}
