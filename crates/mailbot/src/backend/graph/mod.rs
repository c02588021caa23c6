//! Stateless Microsoft Graph adapter.
//!
//! No server-side session exists: "connected" means a usable bearer token
//! is held and "selected" means a folder URL is remembered. Every search
//! is a fresh query whose results pass through the local [`PostFilter`].

pub mod api;
pub mod folders;
pub mod post_filter;
pub mod query;
pub mod token_cache;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use mailbot_mime::{HeaderLine, ParsedMail, content_type_for, html_to_text};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub use api::{GraphApi, GraphAttachment, GraphMessage, HttpGraphApi, MailFolder};
pub use folders::normalize_folder_name;
pub use post_filter::PostFilter;
pub use query::{FilterExpression, SINCE_WINDOW};
pub use token_cache::{CachedToken, SAFETY_MARGIN, TokenCache};

use super::{BackendKind, ConnectionInfo, MailboxBackend};
use crate::config::GraphSettings;
use crate::criteria::SearchCriteria;
use crate::error::{Error, Result};
use crate::message::{Message, MessageContext, MessageId, MessageMeta, MessageSource};

/// Fields requested for every listed message.
const MESSAGE_FIELDS: &str = "id,subject,from,body,receivedDateTime,sentDateTime,isRead,\
                              hasAttachments,internetMessageHeaders";

/// Placeholder for the mailbox user in `searchUrl`.
const USER_PLACEHOLDER: &str = "{userId}";

/// State shared between the adapter and the messages it produced.
struct GraphShared {
    api: Arc<dyn GraphApi>,
    cache: TokenCache,
    token: Mutex<Option<CachedToken>>,
    user: String,
}

impl GraphShared {
    /// Current bearer token, refreshed once when it is about to expire.
    async fn access_token(&self) -> Result<String> {
        let mut slot = self.token.lock().await;
        let Some(token) = slot.as_ref() else {
            return Err(Error::NotConnected);
        };
        if token.is_valid_at(Utc::now()) {
            return Ok(token.access_token.clone());
        }

        debug!("token expired or about to expire, refreshing");
        let fresh = acquire(self.api.as_ref()).await?;
        if let Err(e) = self.cache.store(&fresh).await {
            warn!(error = %e, "could not write token cache");
        }
        let access_token = fresh.access_token.clone();
        *slot = Some(fresh);
        Ok(access_token)
    }
}

async fn acquire(api: &dyn GraphApi) -> Result<CachedToken> {
    api.acquire_token().await.map_err(|e| match e {
        Error::AuthConfig(_) | Error::Authentication(_) => e,
        other => Error::Authentication(format!(
            "failed to authenticate with Microsoft Graph: {other}"
        )),
    })
}

/// Microsoft Graph mailbox adapter.
pub struct GraphBackend {
    settings: GraphSettings,
    default_criteria: Option<SearchCriteria>,
    context: Arc<MessageContext>,
    shared: Arc<GraphShared>,
    authenticated: bool,
    folder: Option<String>,
    folder_url: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for GraphBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBackend")
            .field("user", &self.shared.user)
            .field("authenticated", &self.authenticated)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

impl GraphBackend {
    /// Creates an adapter using the reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProxyConfig`] for an unusable proxy and
    /// [`Error::AuthConfig`] for an invalid tenant.
    pub fn new(
        settings: GraphSettings,
        default_criteria: Option<SearchCriteria>,
        context: Arc<MessageContext>,
    ) -> Result<Self> {
        let api = Arc::new(HttpGraphApi::new(&settings)?);
        Ok(Self::with_api(settings, default_criteria, context, api))
    }

    /// Creates an adapter over a custom [`GraphApi`].
    #[must_use]
    pub fn with_api(
        settings: GraphSettings,
        default_criteria: Option<SearchCriteria>,
        context: Arc<MessageContext>,
        api: Arc<dyn GraphApi>,
    ) -> Self {
        let shared = Arc::new(GraphShared {
            api,
            cache: TokenCache::new(settings.token_cache_path.clone()),
            token: Mutex::new(None),
            user: settings.auth.user.clone(),
        });
        Self {
            settings,
            default_criteria,
            context,
            shared,
            authenticated: false,
            folder: None,
            folder_url: None,
            connected_at: None,
        }
    }

    /// Selected folder id.
    #[must_use]
    pub fn selected_folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.api_base_url.trim_end_matches('/'))
    }

    /// Folder URL, else the static search URL.
    fn search_url(&self) -> Result<String> {
        if let Some(url) = &self.folder_url {
            return Ok(url.clone());
        }
        let Some(template) = &self.settings.search_url else {
            return Err(Error::NoFolderSelected);
        };
        let url = template.replace(USER_PLACEHOLDER, &self.shared.user);
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(url)
        } else {
            Ok(self.api_url(&url))
        }
    }

    fn message(&self, message: GraphMessage) -> Message {
        let meta = MessageMeta {
            from: message.from_address().map(ToString::to_string),
            subject: message.subject.clone(),
            sent: message.sent_date_time,
            received: message.received_date_time,
            seen: message.is_read,
        };
        let id = MessageId::Id(message.id.clone());
        let source = Arc::new(GraphMessageSource {
            shared: Arc::clone(&self.shared),
            message,
        });
        Message::new(id, meta, source, Arc::clone(&self.context))
    }
}

#[async_trait]
impl MailboxBackend for GraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graph
    }

    async fn connect(&mut self, folder: Option<&str>) -> Result<()> {
        let token = if let Some(token) = self.shared.cache.load().await {
            token
        } else {
            let token = acquire(self.shared.api.as_ref()).await?;
            if let Err(e) = self.shared.cache.store(&token).await {
                warn!(error = %e, "could not write token cache");
            }
            token
        };

        *self.shared.token.lock().await = Some(token);
        self.authenticated = true;
        self.connected_at = Some(Utc::now());
        info!(user = %self.shared.user, "connected to Microsoft Graph");

        if let Some(folder) = folder {
            self.select_folder(folder).await?;
        }
        Ok(())
    }

    async fn select_folder(&mut self, folder: &str) -> Result<()> {
        let id = normalize_folder_name(folder)?;
        let base = api::parse_base_url(&self.settings.api_base_url)?;
        let folder_segment = format!("mailFolders('{id}')");
        let url = api::join_path(
            &base,
            &["users", self.shared.user.as_str(), folder_segment.as_str(), "messages"],
        )
        .to_string();
        debug!(%folder, %id, "folder selected");
        self.folder = Some(id);
        self.folder_url = Some(url);
        Ok(())
    }

    async fn release_folder(&mut self) -> Result<()> {
        self.folder = None;
        self.folder_url = None;
        Ok(())
    }

    async fn search_messages(&mut self, criteria: Option<&SearchCriteria>) -> Result<Vec<Message>> {
        if !self.authenticated {
            return Err(Error::NotConnected);
        }
        let base = self.search_url()?;
        let token = self.shared.access_token().await?;

        let criteria = criteria.or(self.default_criteria.as_ref());
        let flags = &self.context.flags;
        let (filter, post_filter) = criteria.map_or_else(Default::default, |c| {
            (FilterExpression::build(c, flags), PostFilter::new(c, flags))
        });

        let mut url = Url::parse(&base)
            .map_err(|e| Error::Config(format!("invalid search url {base}: {e}")))?;
        let has_select = url.query_pairs().any(|(k, _)| k == "$select");
        {
            let mut pairs = url.query_pairs_mut();
            if !filter.is_empty() {
                pairs.append_pair("$filter", &filter.to_string());
            }
            if !has_select {
                pairs.append_pair("$select", MESSAGE_FIELDS);
            }
        }
        debug!(%filter, "searching");

        let found = self.shared.api.list_messages(&token, url.as_str()).await?;
        let total = found.len();
        let kept = post_filter.apply(found);
        info!(
            count = kept.len(),
            rejected = total - kept.len(),
            "messages with the selected criteria"
        );

        Ok(kept.into_iter().map(|m| self.message(m)).collect())
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.shared.token.lock().await = None;
        if self.authenticated {
            info!(user = %self.shared.user, "disconnected from Microsoft Graph");
        }
        self.authenticated = false;
        self.folder = None;
        self.folder_url = None;
        self.connected_at = None;
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            backend: BackendKind::Graph,
            authenticated: self.authenticated,
            user: Some(self.shared.user.clone()),
            folder: self.folder.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Content and moves for one Graph message.
struct GraphMessageSource {
    shared: Arc<GraphShared>,
    message: GraphMessage,
}

impl GraphMessageSource {
    async fn attachments(&self) -> Result<Vec<mailbot_mime::Attachment>> {
        if !self.message.has_attachments {
            return Ok(Vec::new());
        }
        let token = self.shared.access_token().await?;
        let listed = self
            .shared
            .api
            .list_attachments(&token, &self.shared.user, &self.message.id)
            .await?;

        let mut attachments = Vec::new();
        for attachment in listed {
            if !attachment.is_file() {
                debug!(name = ?attachment.name, "skipping non-file attachment");
                continue;
            }
            let content = STANDARD
                .decode(attachment.content_bytes.as_deref().unwrap_or_default())
                .map_err(|e| Error::Transport(format!("invalid attachment content: {e}")))?;
            let content_type = attachment.content_type.clone().unwrap_or_else(|| {
                content_type_for(attachment.name.as_deref().unwrap_or_default())
            });
            attachments.push(mailbot_mime::Attachment {
                filename: attachment.name,
                content_type: content_type.to_lowercase(),
                content_disposition: if attachment.is_inline { "inline" } else { "attachment" }
                    .to_string(),
                content,
            });
        }
        Ok(attachments)
    }
}

#[async_trait]
impl MessageSource for GraphMessageSource {
    async fn fetch_content(&self, id: &MessageId) -> Result<ParsedMail> {
        let message = &self.message;
        let Some(body) = &message.body else {
            return Err(Error::EmptyContent(id.to_string()));
        };
        let (text, html) = if body.is_html() {
            (Some(html_to_text(&body.content)), Some(body.content.clone()))
        } else {
            (Some(body.content.clone()), None)
        };

        let header_lines = message
            .internet_message_headers
            .iter()
            .flatten()
            .map(|h| HeaderLine {
                key: h.name.to_lowercase(),
                line: format!("{}: {}", h.name, h.value),
            })
            .collect();

        Ok(ParsedMail {
            text,
            html,
            header_lines,
            attachments: self.attachments().await?,
            from: message.from_address().map(ToString::to_string),
            subject: message.subject.clone(),
            date: message.sent_date_time,
            received_date: message.received_date_time,
        })
    }

    async fn move_message(&self, id: &MessageId, folder: &str) -> Result<()> {
        let token = self.shared.access_token().await?;
        let user = &self.shared.user;

        let well_known = normalize_folder_name(folder)?;
        let destination = if well_known == folder {
            let folders = self.shared.api.list_folders(&token, user).await?;
            folders
                .into_iter()
                .find(|f| f.display_name == folder)
                .map(|f| f.id)
                .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?
        } else {
            well_known
        };

        self.shared
            .api
            .move_message(&token, user, &self.message.id, &destination)
            .await?;
        debug!(message = %id, %destination, "move accepted");
        Ok(())
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
    use crate::config::MailboxConfig;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeApi {
        urls: StdMutex<Vec<String>>,
        moves: StdMutex<Vec<(String, String)>>,
        messages: Vec<GraphMessage>,
        attachments: Vec<GraphAttachment>,
    }

    #[async_trait]
    impl GraphApi for FakeApi {
        async fn acquire_token(&self) -> Result<CachedToken> {
            Ok(CachedToken {
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                ..CachedToken::new("token")
            })
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
            Ok(self.attachments.clone())
        }

        async fn list_folders(&self, _token: &str, _user: &str) -> Result<Vec<MailFolder>> {
            Ok(vec![MailFolder {
                id: "F1".into(),
                display_name: "Processed".into(),
            }])
        }

        async fn move_message(
            &self,
            _token: &str,
            _user: &str,
            message_id: &str,
            destination_id: &str,
        ) -> Result<()> {
            self.moves
                .lock()
                .unwrap()
                .push((message_id.to_string(), destination_id.to_string()));
            Ok(())
        }
    }

    fn settings(search_url: Option<&str>) -> GraphSettings {
        let config: MailboxConfig = serde_json::from_value(json!({
            "msGraph": {
                "auth": { "tenantId": "t", "clientId": "c", "clientSecret": "s", "user": "bot@x.com" },
                "searchUrl": search_url,
                "tokenCachePath": null
            }
        }))
        .unwrap();
        config.ms_graph.unwrap()
    }

    fn graph_message(value: serde_json::Value) -> GraphMessage {
        serde_json::from_value(value).unwrap()
    }

    fn backend(api: Arc<FakeApi>, search_url: Option<&str>) -> GraphBackend {
        GraphBackend::with_api(
            settings(search_url),
            None,
            Arc::new(MessageContext::default()),
            api,
        )
    }

    #[tokio::test]
    async fn test_select_builds_folder_url() {
        let api = Arc::new(FakeApi::default());
        let mut graph = backend(Arc::clone(&api), None);
        graph.connect(Some("Inbox")).await.unwrap();
        graph.search_messages(None).await.unwrap();

        let urls = api.urls.lock().unwrap();
        assert!(urls[0].starts_with(
            "https://graph.microsoft.com/v1.0/users/bot@x.com/mailFolders('inbox')/messages?"
        ));
        assert!(!urls[0].contains("%24filter"));
    }

    #[tokio::test]
    async fn test_static_search_url_is_the_fallback() {
        let api = Arc::new(FakeApi::default());
        let mut graph = backend(Arc::clone(&api), Some("/users/{userId}/messages"));
        graph.connect(None).await.unwrap();
        graph.search_messages(None).await.unwrap();
        assert!(
            api.urls.lock().unwrap()[0]
                .starts_with("https://graph.microsoft.com/v1.0/users/bot@x.com/messages?")
        );
    }

    #[tokio::test]
    async fn test_search_without_folder_or_connection() {
        let mut graph = backend(Arc::new(FakeApi::default()), None);
        assert!(matches!(graph.search_messages(None).await, Err(Error::NotConnected)));
        graph.connect(None).await.unwrap();
        assert!(matches!(graph.search_messages(None).await, Err(Error::NoFolderSelected)));
    }

    #[tokio::test]
    async fn test_release_and_disconnect_are_idempotent() {
        let mut graph = backend(Arc::new(FakeApi::default()), None);
        graph.connect(Some("sent")).await.unwrap();
        assert_eq!(graph.selected_folder(), Some("sentitems"));
        graph.release_folder().await.unwrap();
        graph.release_folder().await.unwrap();
        assert_eq!(graph.selected_folder(), None);
        graph.disconnect().await.unwrap();
        graph.disconnect().await.unwrap();
        assert!(!graph.connection_info().authenticated);
    }

    #[tokio::test]
    async fn test_content_from_graph_message() {
        let api = Arc::new(FakeApi {
            messages: vec![graph_message(json!({
                "id": "M1",
                "subject": "Invoice",
                "from": { "emailAddress": { "address": "a@x.com" } },
                "body": { "contentType": "html", "content": "<p>Total due</p>" },
                "sentDateTime": "2024-01-02T09:59:00Z",
                "hasAttachments": true,
                "internetMessageHeaders": [{ "name": "X-Tag", "value": "one" }]
            }))],
            attachments: vec![
                serde_json::from_value(json!({
                    "@odata.type": "#microsoft.graph.fileAttachment",
                    "name": "a.pdf",
                    "contentType": "application/pdf",
                    "isInline": false,
                    "contentBytes": "JVBERg=="
                }))
                .unwrap(),
                serde_json::from_value(json!({
                    "@odata.type": "#microsoft.graph.itemAttachment",
                    "name": "forwarded"
                }))
                .unwrap(),
            ],
            ..FakeApi::default()
        });
        let mut graph = backend(Arc::clone(&api), None);
        graph.connect(Some("inbox")).await.unwrap();
        let messages = graph.search_messages(None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].meta().from.as_deref(), Some("a@x.com"));

        let content = messages[0].get_content().await.unwrap();
        assert_eq!(content.html.as_deref(), Some("<p>Total due</p>"));
        assert!(content.text.as_deref().unwrap().contains("Total due"));
        assert_eq!(content.header_lines[0].line, "X-Tag: one");
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].content, b"%PDF");
        assert_eq!(content.attachments[0].content_disposition, "attachment");
    }

    #[tokio::test]
    async fn test_move_resolves_display_name() {
        let api = Arc::new(FakeApi {
            messages: vec![graph_message(json!({ "id": "M1", "body": { "content": "x" } }))],
            ..FakeApi::default()
        });
        let mut graph = backend(Arc::clone(&api), None);
        graph.connect(Some("inbox")).await.unwrap();
        let messages = graph.search_messages(None).await.unwrap();

        let source = GraphMessageSource {
            shared: Arc::clone(&graph.shared),
            message: graph_message(json!({ "id": "M1" })),
        };
        source.move_message(messages[0].id(), "Processed").await.unwrap();
        source.move_message(messages[0].id(), "Trash").await.unwrap();
        assert!(matches!(
            source.move_message(messages[0].id(), "processed").await,
            Err(Error::FolderNotFound(name)) if name == "processed"
        ));
        assert!(matches!(
            source.move_message(messages[0].id(), "Archive").await,
            Err(Error::FolderNotFound(_))
        ));

        let moves = api.moves.lock().unwrap();
        assert_eq!(
            *moves,
            vec![
                ("M1".to_string(), "F1".to_string()),
                ("M1".to_string(), "deleteditems".to_string())
            ]
        );
    }
}
