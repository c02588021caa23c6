//! Backend-agnostic message entity.
//!
//! A [`Message`] is created by a search with its identity and whatever
//! metadata the backend returned. Content is fetched on first use through
//! the backend's [`MessageSource`] and cached for the message's lifetime.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use mailbot_mime::{HeaderLine, ParsedMail, html_to_text};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::attachments::{self, AllowList, Attachment};
use crate::config::{FeatureFlags, MailboxConfig};
use crate::date::{DateOptions, DatePolicy, DateSource};
use crate::error::{Error, Result};
use crate::links::{LinkDownload, LinkHarvester, LinkRule};

/// Backend-scoped message identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// IMAP UID within the selected folder.
    Uid(u32),
    /// Graph message id.
    Id(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uid(uid) => write!(f, "{uid}"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// Envelope data known without fetching content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// Sender address.
    pub from: Option<String>,
    /// Subject.
    pub subject: Option<String>,
    /// Sent timestamp.
    pub sent: Option<DateTime<FixedOffset>>,
    /// Receipt timestamp.
    pub received: Option<DateTime<FixedOffset>>,
    /// Read state.
    pub seen: Option<bool>,
}

/// Per-backend message capabilities.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Downloads and parses the message.
    async fn fetch_content(&self, id: &MessageId) -> Result<ParsedMail>;

    /// Moves the message to `folder`.
    async fn move_message(&self, id: &MessageId, folder: &str) -> Result<()>;
}

/// Settings shared by every message of a mailbox.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// Feature flags.
    pub flags: FeatureFlags,
    /// Whether `move_to` actually moves.
    pub move_processed: bool,
    /// Default move target.
    pub processed_folder: Option<String>,
    /// Default attachment allow-list.
    pub allowed: AllowList,
    /// Link downloader.
    pub links: LinkHarvester,
}

impl MessageContext {
    /// Builds the context from a configuration.
    #[must_use]
    pub fn from_config(config: &MailboxConfig, flags: FeatureFlags) -> Self {
        Self {
            flags,
            move_processed: config.move_processed_messages,
            processed_folder: config.folders.processed.clone(),
            allowed: config.attachments.allowed.clone(),
            links: LinkHarvester::new(),
        }
    }
}

/// Body variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Plain text.
    #[default]
    Text,
    /// HTML.
    Html,
}

impl FromStr for BodyFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            other => Err(Error::Config(format!("unsupported body format {other}"))),
        }
    }
}

/// What [`Message::search_body`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyRule {
    /// Body variant.
    pub format: BodyFormat,
    /// Convert HTML to text.
    #[serde(default)]
    pub extract_text: bool,
}

/// Which headers [`Message::search_headers`] returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Lowercase header names; empty selects all.
    #[serde(default)]
    pub select: Vec<String>,
}

/// One message found by a search.
pub struct Message {
    id: MessageId,
    meta: MessageMeta,
    content: OnceCell<ParsedMail>,
    source: Arc<dyn MessageSource>,
    context: Arc<MessageContext>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .field("loaded", &self.content.initialized())
            .finish_non_exhaustive()
    }
}

impl Message {
    /// Creates a message stub.
    #[must_use]
    pub fn new(
        id: MessageId,
        meta: MessageMeta,
        source: Arc<dyn MessageSource>,
        context: Arc<MessageContext>,
    ) -> Self {
        Self {
            id,
            meta,
            content: OnceCell::new(),
            source,
            context,
        }
    }

    /// Message identity.
    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    /// Envelope metadata from the search.
    #[must_use]
    pub const fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    /// Cached content, if already fetched.
    #[must_use]
    pub fn content(&self) -> Option<&ParsedMail> {
        self.content.get()
    }

    /// Sender address from metadata or loaded content.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.meta
            .from
            .as_deref()
            .or_else(|| self.content().and_then(|c| c.from.as_deref()))
    }

    /// Subject from metadata or loaded content.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.meta
            .subject
            .as_deref()
            .or_else(|| self.content().and_then(|c| c.subject.as_deref()))
    }

    /// Fetches and caches the content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContent`] if the backend returns no payload, or
    /// any transport error.
    pub async fn get_content(&self) -> Result<&ParsedMail> {
        self.content
            .get_or_try_init(|| self.source.fetch_content(&self.id))
            .await
    }

    /// Attachments passing `allowed` (or the configured allow-list).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedMultiAttachment`] for a multi-file TNEF
    /// envelope, or any content fetch error.
    pub async fn search_attachments(&self, allowed: Option<&AllowList>) -> Result<Vec<Attachment>> {
        let allowed = allowed.unwrap_or(&self.context.allowed);
        let content = self.get_content().await?;
        attachments::extract(&content.attachments, allowed).await
    }

    /// Body text or HTML. Missing bodies yield an empty string.
    ///
    /// # Errors
    ///
    /// Returns any content fetch error.
    pub async fn search_body(&self, rule: &BodyRule) -> Result<String> {
        let content = self.get_content().await?;
        Ok(match rule.format {
            BodyFormat::Text => content.text.clone().unwrap_or_default(),
            BodyFormat::Html if rule.extract_text => {
                content.html.as_deref().map(html_to_text).unwrap_or_default()
            }
            BodyFormat::Html => content.html.clone().unwrap_or_default(),
        })
    }

    /// Header lines in original order, optionally restricted to `rule.select`.
    ///
    /// # Errors
    ///
    /// Returns any content fetch error.
    pub async fn search_headers(&self, rule: &HeaderRule) -> Result<Vec<HeaderLine>> {
        let content = self.get_content().await?;
        Ok(content
            .header_lines
            .iter()
            .filter(|h| {
                rule.select.is_empty() || rule.select.iter().any(|k| k.eq_ignore_ascii_case(&h.key))
            })
            .cloned()
            .collect())
    }

    /// Downloads links found in the selected body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unsupported body format or invalid
    /// pattern, or any content fetch error. Failed downloads are returned
    /// as [`LinkDownload::Failed`].
    pub async fn search_body_attachments(&self, rule: &LinkRule) -> Result<Vec<LinkDownload>> {
        if rule.url_patterns.is_empty() {
            return Ok(Vec::new());
        }
        let format = rule
            .body_format
            .as_deref()
            .map_or(Ok(BodyFormat::Text), str::parse)?;
        let body = self
            .search_body(&BodyRule {
                format,
                extract_text: false,
            })
            .await?;
        self.context.links.harvest(&body, &rule.url_patterns).await
    }

    /// Local literal body match, used when server-side body search is off.
    ///
    /// Always true when `expr` is empty or the manual body filter is
    /// disabled. Otherwise `expr` must occur verbatim in the
    /// whitespace-normalized text body.
    ///
    /// # Errors
    ///
    /// Returns any content fetch error.
    pub async fn satisfy_body_filter(&self, expr: Option<&str>) -> Result<bool> {
        let Some(expr) = expr.map(str::trim).filter(|e| !e.is_empty()) else {
            return Ok(true);
        };
        if !self.context.flags.manual_body_filter {
            return Ok(true);
        }

        let content = self.get_content().await?;
        let body = normalize_whitespace(content.text.as_deref().unwrap_or_default());
        let matched = body.contains(&normalize_whitespace(expr));
        if !matched {
            debug!(message = %self.id, %body, search = %expr, "body not matched");
        }
        Ok(matched)
    }

    /// Effective timestamp under the date policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDate`] when the chosen source is absent.
    pub async fn parsed_date(&self, options: &DateOptions) -> Result<DateTime<Tz>> {
        let policy = DatePolicy::resolve(options, &self.context.flags);
        debug!(source = policy.source.as_str(), "resolving message date");

        let from_meta = match policy.source {
            DateSource::Sent => self.meta.sent,
            DateSource::Received => self.meta.received,
        };
        let date = match from_meta {
            Some(date) => date,
            None => {
                let content = self.get_content().await?;
                match policy.source {
                    DateSource::Sent => content.date,
                    DateSource::Received => content.received_date,
                }
                .ok_or(Error::MissingDate(policy.source.as_str()))?
            }
        };
        Ok(policy.apply(date))
    }

    /// Moves the message to `folder` or the configured processed folder.
    ///
    /// Returns `false` without moving when moving processed messages is
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingTargetFolder`] when no folder is known, or
    /// [`Error::FolderNotFound`] / transport errors from the backend.
    pub async fn move_to(&self, folder: Option<&str>) -> Result<bool> {
        if !self.context.move_processed {
            info!(message = %self.id, "message won't be moved, moveProcessedMessages is disabled");
            return Ok(false);
        }
        let folder = folder
            .or(self.context.processed_folder.as_deref())
            .ok_or(Error::MissingTargetFolder)?;

        info!(message = %self.id, %folder, "moving message");
        self.source.move_message(&self.id, folder).await?;
        info!(message = %self.id, %folder, "message moved");
        Ok(true)
    }

    /// Logs the message at debug level.
    pub fn dump(&self) {
        let body = self.content().and_then(|c| c.text.as_deref()).unwrap_or_default();
        debug!(
            id = %self.id,
            from = ?self.from(),
            subject = ?self.subject(),
            sent = ?self.meta.sent,
            received = ?self.meta.received,
            %body,
            "message dump"
        );
    }
}

/// Collapses whitespace runs to single spaces.
#[must_use]
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
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
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RAW: &str = "Received: from relay by mx; Tue, 02 Jan 2024 10:00:05 +0000\r\n\
        Received: from origin by relay; Tue, 02 Jan 2024 09:59:58 +0000\r\n\
        From: billing@example.org\r\n\
        Subject: Invoice 42\r\n\
        Date: Tue, 02 Jan 2024 11:59:00 +0200\r\n\
        X-Tag: one\r\n\
        X-Other: x\r\n\
        X-Tag: two\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        Your   invoice\r\n  number 42 is ready.\r\n";

    #[derive(Default)]
    struct FakeSource {
        fetches: AtomicUsize,
        moves: Mutex<Vec<(MessageId, String)>>,
        empty: bool,
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn fetch_content(&self, id: &MessageId) -> Result<ParsedMail> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.empty {
                return Err(Error::EmptyContent(id.to_string()));
            }
            Ok(ParsedMail::parse(RAW.as_bytes())?)
        }

        async fn move_message(&self, id: &MessageId, folder: &str) -> Result<()> {
            self.moves.lock().unwrap().push((id.clone(), folder.to_string()));
            Ok(())
        }
    }

    fn message(source: Arc<FakeSource>, context: MessageContext) -> Message {
        Message::new(MessageId::Uid(7), MessageMeta::default(), source, Arc::new(context))
    }

    #[tokio::test]
    async fn test_content_is_fetched_once() {
        let source = Arc::new(FakeSource::default());
        let msg = message(source.clone(), MessageContext::default());
        assert!(msg.content().is_none());

        msg.get_content().await.unwrap();
        msg.search_body(&BodyRule::default()).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(msg.subject(), Some("Invoice 42"));
    }

    #[tokio::test]
    async fn test_empty_content() {
        let source = Arc::new(FakeSource {
            empty: true,
            ..FakeSource::default()
        });
        let msg = message(source, MessageContext::default());
        assert!(matches!(msg.get_content().await, Err(Error::EmptyContent(id)) if id == "7"));
    }

    #[tokio::test]
    async fn test_search_headers_keeps_order_and_duplicates() {
        let msg = message(Arc::new(FakeSource::default()), MessageContext::default());
        let rule = HeaderRule {
            select: vec!["x-tag".into(), "x-other".into()],
        };
        let lines: Vec<_> = msg
            .search_headers(&rule)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.line)
            .collect();
        assert_eq!(lines, vec!["X-Tag: one", "X-Other: x", "X-Tag: two"]);

        let all = msg.search_headers(&HeaderRule::default()).await.unwrap();
        assert_eq!(all.len(), 9);
    }

    #[tokio::test]
    async fn test_satisfy_body_filter() {
        let msg = message(Arc::new(FakeSource::default()), MessageContext::default());
        assert!(msg.satisfy_body_filter(Some("absent")).await.unwrap());

        let context = MessageContext {
            flags: FeatureFlags::default().with_manual_body_filter(),
            ..MessageContext::default()
        };
        let msg = message(Arc::new(FakeSource::default()), context);
        assert!(msg.satisfy_body_filter(None).await.unwrap());
        assert!(msg.satisfy_body_filter(Some(" invoice number 42 ")).await.unwrap());
        assert!(msg.satisfy_body_filter(Some("number 4.")).await.is_ok_and(|m| !m));
        assert!(!msg.satisfy_body_filter(Some("INVOICE")).await.unwrap());
    }

    #[tokio::test]
    async fn test_parsed_date_sources() {
        let msg = message(Arc::new(FakeSource::default()), MessageContext::default());

        let sent = msg
            .parsed_date(&DateOptions::default().with_timezone(chrono_tz::UTC))
            .await
            .unwrap();
        assert_eq!(sent.to_rfc3339(), "2024-01-02T09:59:00+00:00");

        let received = msg
            .parsed_date(&DateOptions::received().with_timezone(chrono_tz::UTC))
            .await
            .unwrap();
        assert_eq!(received.to_rfc3339(), "2024-01-02T10:00:05+00:00");
    }

    #[tokio::test]
    async fn test_move_disabled_is_noop() {
        let source = Arc::new(FakeSource::default());
        let msg = message(source.clone(), MessageContext::default());
        assert!(!msg.move_to(Some("Archive")).await.unwrap());
        assert!(source.moves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_uses_processed_folder() {
        let source = Arc::new(FakeSource::default());
        let context = MessageContext {
            move_processed: true,
            processed_folder: Some("Processed".into()),
            ..MessageContext::default()
        };
        let msg = message(source.clone(), context);
        assert!(msg.move_to(None).await.unwrap());
        assert_eq!(
            source.moves.lock().unwrap().as_slice(),
            &[(MessageId::Uid(7), "Processed".to_string())]
        );
    }

    #[tokio::test]
    async fn test_move_without_target() {
        let context = MessageContext {
            move_processed: true,
            ..MessageContext::default()
        };
        let msg = message(Arc::new(FakeSource::default()), context);
        assert!(matches!(msg.move_to(None).await, Err(Error::MissingTargetFolder)));
    }

    #[tokio::test]
    async fn test_unsupported_body_format() {
        let msg = message(Arc::new(FakeSource::default()), MessageContext::default());
        let rule: LinkRule = serde_json::from_str(
            r#"{ "urlPatterns": [{ "pattern": "https://\\S+" }], "bodyFormat": "markdown" }"#,
        )
        .unwrap();
        assert!(matches!(msg.search_body_attachments(&rule).await, Err(Error::Config(_))));
    }
}
