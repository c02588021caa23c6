//! Production store transport over async-imap.

use async_imap::{Authenticator, Client, Session};
use async_trait::async_trait;
use futures::StreamExt;
use mailbot_oauth::{Credential, Secret, sasl};
use tracing::{debug, info};

use super::query::ImapQuery;
use super::stream::ImapStream;
use super::transport::{FolderLock, StoreConnector, StoreSession};
use crate::config::ImapSettings;
use crate::error::{Error, Result};

/// XOAUTH2 authenticator; answers the first challenge only.
struct XOAuth2 {
    response: Vec<u8>,
}

impl Authenticator for XOAuth2 {
    type Response = Vec<u8>;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

/// Connects with async-imap over tokio-rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncImapConnector;

#[async_trait]
impl StoreConnector for AsyncImapConnector {
    async fn connect(
        &self,
        settings: &ImapSettings,
        credential: &Credential,
    ) -> Result<Box<dyn StoreSession>> {
        let stream = ImapStream::connect(&settings.host, settings.port, settings.secure).await?;
        debug!(host = %settings.host, port = settings.port, tls = stream.is_tls(), "IMAP socket open");

        let mut client = Client::new(stream);
        client
            .read_response()
            .await
            .ok_or_else(|| {
                Error::Transport("failed to read server greeting: connection closed".to_string())
            })?
            .map_err(|e| Error::Transport(format!("failed to read server greeting: {e}")))?;

        let session = match &credential.secret {
            Secret::Password(password) => client
                .login(&credential.identity, password)
                .await
                .map_err(|(e, _)| Error::Authentication(format!("LOGIN failed: {e}")))?,
            Secret::Bearer(token) => {
                let auth = XOAuth2 {
                    response: sasl::xoauth2_raw(&credential.identity, token).into_bytes(),
                };
                client
                    .authenticate("XOAUTH2", auth)
                    .await
                    .map_err(|(e, _)| Error::Authentication(format!("XOAUTH2 failed: {e}")))?
            }
        };

        info!(host = %settings.host, user = %credential.identity, "IMAP session authenticated");
        Ok(Box::new(AsyncImapSession { session }))
    }
}

/// One authenticated async-imap session.
pub struct AsyncImapSession {
    session: Session<ImapStream>,
}

#[async_trait]
impl StoreSession for AsyncImapSession {
    async fn lock_folder(&mut self, folder: &str) -> Result<FolderLock> {
        let mailbox = self.session.select(folder).await?;
        debug!(%folder, exists = mailbox.exists, "folder selected");
        Ok(FolderLock::new(folder))
    }

    async fn release_folder(&mut self, lock: FolderLock) -> Result<()> {
        debug!(folder = %lock.folder(), lock = lock.id(), "folder released");
        Ok(())
    }

    async fn search(&mut self, query: &ImapQuery) -> Result<Option<Vec<u32>>> {
        match self.session.uid_search(query.to_string()).await {
            Ok(uids) => {
                let mut uids: Vec<u32> = uids.into_iter().collect();
                uids.sort_unstable();
                Ok(Some(uids))
            }
            Err(async_imap::error::Error::No(reason) | async_imap::error::Error::Bad(reason)) => {
                debug!(%query, %reason, "server rejected search");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let fetches: Vec<_> = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .await?
            .collect()
            .await;

        for fetch in fetches {
            if let Some(body) = fetch?.body() {
                return Ok(Some(body.to_vec()));
            }
        }
        Ok(None)
    }

    async fn move_message(&mut self, uid: u32, folder: &str) -> Result<()> {
        self.session.uid_mv(uid.to_string(), folder).await?;
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session.logout().await?;
        Ok(())
    }
}
