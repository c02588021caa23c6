//! In-memory transports shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use mailbot::backend::graph::{CachedToken, GraphApi, GraphAttachment, GraphMessage, MailFolder};
use mailbot::backend::imap::{FolderLock, ImapQuery, StoreConnector, StoreSession};
use mailbot::{Error, ImapSettings, Result};
use mailbot_oauth::Credential;

/// Recorded store traffic.
#[derive(Debug, Default)]
pub struct StoreLog {
    pub events: Vec<String>,
    pub released: Vec<u64>,
}

/// Fake IMAP server: one mailbox shared by every session it opens.
#[derive(Clone, Default)]
pub struct FakeStore {
    pub log: Arc<Mutex<StoreLog>>,
    pub messages: Arc<HashMap<u32, Vec<u8>>>,
    pub reject_search: bool,
    pub fail_release: bool,
}

impl FakeStore {
    pub fn with_messages(messages: impl IntoIterator<Item = (u32, Vec<u8>)>) -> Self {
        Self {
            messages: Arc::new(messages.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().events.clone()
    }

    pub fn released(&self) -> Vec<u64> {
        self.log.lock().unwrap().released.clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.log.lock().unwrap().events.push(event.into());
    }
}

#[async_trait]
impl StoreConnector for FakeStore {
    async fn connect(
        &self,
        _settings: &ImapSettings,
        credential: &Credential,
    ) -> Result<Box<dyn StoreSession>> {
        self.record(format!("connect {}", credential.identity));
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl StoreSession for FakeStore {
    async fn lock_folder(&mut self, folder: &str) -> Result<FolderLock> {
        self.record(format!("lock {folder}"));
        Ok(FolderLock::new(folder))
    }

    async fn release_folder(&mut self, lock: FolderLock) -> Result<()> {
        self.record(format!("release {}", lock.folder()));
        if self.fail_release {
            return Err(Error::Transport("CLOSE failed".into()));
        }
        self.log.lock().unwrap().released.push(lock.id());
        Ok(())
    }

    async fn search(&mut self, query: &ImapQuery) -> Result<Option<Vec<u32>>> {
        self.record(format!("search {query}"));
        if self.reject_search {
            return Ok(None);
        }
        let mut uids: Vec<u32> = self.messages.keys().copied().collect();
        uids.sort_unstable();
        Ok(Some(uids))
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        self.record(format!("fetch {uid}"));
        Ok(self.messages.get(&uid).cloned())
    }

    async fn move_message(&mut self, uid: u32, folder: &str) -> Result<()> {
        self.record(format!("move {uid} {folder}"));
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.record("logout");
        Ok(())
    }
}

/// Unsigned JWT whose `exp` claim is `exp`.
pub fn jwt(exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp.timestamp()));
    format!("{header}.{payload}.sig")
}

/// Fake Graph service that counts token acquisitions.
pub struct FakeGraph {
    pub acquired: AtomicUsize,
    pub token_lifetime: chrono::Duration,
    pub urls: Mutex<Vec<String>>,
    pub messages: Vec<GraphMessage>,
    pub fail_auth: bool,
}

impl Default for FakeGraph {
    fn default() -> Self {
        Self {
            acquired: AtomicUsize::new(0),
            token_lifetime: chrono::Duration::hours(1),
            urls: Mutex::new(Vec::new()),
            messages: Vec::new(),
            fail_auth: false,
        }
    }
}

impl FakeGraph {
    pub fn with_messages(messages: Vec<serde_json::Value>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .map(|m| serde_json::from_value(m).unwrap())
                .collect(),
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// `$filter` of the `n`th listing, decoded.
    pub fn filter(&self, n: usize) -> Option<String> {
        let url = url::Url::parse(&self.urls()[n]).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "$filter")
            .map(|(_, v)| v.into_owned())
    }
}

#[async_trait]
impl GraphApi for FakeGraph {
    async fn acquire_token(&self) -> Result<CachedToken> {
        if self.fail_auth {
            return Err(Error::Transport("invalid_client".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(CachedToken::new(jwt(Utc::now() + self.token_lifetime)))
    }

    async fn list_messages(&self, _token: &str, url: &str) -> Result<Vec<GraphMessage>> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(self.messages.clone())
    }

    async fn list_attachments(
        &self,
        _token: &str,
        _user: &str,
        _message_id: &str,
    ) -> Result<Vec<GraphAttachment>> {
        Ok(Vec::new())
    }

    async fn list_folders(&self, _token: &str, _user: &str) -> Result<Vec<MailFolder>> {
        Ok(Vec::new())
    }

    async fn move_message(
        &self,
        _token: &str,
        _user: &str,
        _message_id: &str,
        _destination_id: &str,
    ) -> Result<()> {
        Ok(())
    }
}
