//! Microsoft Graph REST calls.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use mailbot_oauth::{OAuthClient, Provider};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::token_cache::CachedToken;
use crate::config::GraphSettings;
use crate::error::{Error, Result};

/// `@odata.type` of file attachments.
pub const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

/// Email address of a recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// SMTP address.
    #[serde(default)]
    pub address: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Sender or recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// Address.
    #[serde(default)]
    pub email_address: EmailAddress,
}

/// Message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    /// `text` or `html`.
    #[serde(default)]
    pub content_type: String,
    /// Body content.
    #[serde(default)]
    pub content: String,
}

impl ItemBody {
    /// Returns true for HTML bodies.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("html")
    }
}

/// One internet message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Graph `message` resource, restricted to the fields used here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    /// Message id.
    pub id: String,
    /// Subject.
    #[serde(default)]
    pub subject: Option<String>,
    /// Sender.
    #[serde(default)]
    pub from: Option<Recipient>,
    /// Body.
    #[serde(default)]
    pub body: Option<ItemBody>,
    /// Receipt timestamp.
    #[serde(default)]
    pub received_date_time: Option<DateTime<FixedOffset>>,
    /// Sent timestamp.
    #[serde(default)]
    pub sent_date_time: Option<DateTime<FixedOffset>>,
    /// Read state.
    #[serde(default)]
    pub is_read: Option<bool>,
    /// Whether the message has attachments.
    #[serde(default)]
    pub has_attachments: bool,
    /// Transport headers, when selected.
    #[serde(default)]
    pub internet_message_headers: Option<Vec<InternetHeader>>,
}

impl GraphMessage {
    /// Sender address.
    #[must_use]
    pub fn from_address(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|r| r.email_address.address.as_deref())
    }

    /// Body content, empty when absent.
    #[must_use]
    pub fn body_content(&self) -> &str {
        self.body.as_ref().map_or("", |b| b.content.as_str())
    }
}

/// Graph `attachment` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphAttachment {
    /// Resource type.
    #[serde(default, rename = "@odata.type")]
    pub odata_type: Option<String>,
    /// File name.
    #[serde(default)]
    pub name: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Inline part.
    #[serde(default)]
    pub is_inline: bool,
    /// Base64 file bytes.
    #[serde(default)]
    pub content_bytes: Option<String>,
}

impl GraphAttachment {
    /// Returns true for file attachments.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.odata_type.as_deref() == Some(FILE_ATTACHMENT_TYPE)
    }
}

/// Graph `mailFolder` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    /// Folder id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default, rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Graph operations used by the adapter.
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Obtains an application token.
    async fn acquire_token(&self) -> Result<CachedToken>;

    /// Lists messages at `url`, following pagination.
    async fn list_messages(&self, token: &str, url: &str) -> Result<Vec<GraphMessage>>;

    /// Lists the attachments of a message.
    async fn list_attachments(
        &self,
        token: &str,
        user: &str,
        message_id: &str,
    ) -> Result<Vec<GraphAttachment>>;

    /// Lists the user's mail folders.
    async fn list_folders(&self, token: &str, user: &str) -> Result<Vec<MailFolder>>;

    /// Moves a message into a folder.
    async fn move_message(
        &self,
        token: &str,
        user: &str,
        message_id: &str,
        destination_id: &str,
    ) -> Result<()>;
}

/// [`GraphApi`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpGraphApi {
    http_client: Client,
    oauth: OAuthClient,
    scope: String,
    api_base_url: Url,
}

impl HttpGraphApi {
    /// Builds the client; the proxy is validated here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProxyConfig`] for an incomplete or invalid proxy,
    /// [`Error::AuthConfig`] for an invalid tenant or authority and
    /// [`Error::Config`] for an unusable API base URL.
    pub fn new(settings: &GraphSettings) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(proxy_url) = settings.proxy.as_ref().map(|p| p.url()).transpose()?.flatten() {
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| Error::ProxyConfig(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
            debug!(proxy = %proxy_url, "graph calls use proxy");
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::ProxyConfig(format!("cannot build HTTP client: {e}")))?;

        let auth = &settings.auth;
        let provider = Provider::microsoft_tenant(&auth.options.authority_host, &auth.tenant_id)?;
        let oauth = OAuthClient::new(&auth.client_id, provider)
            .with_client_secret(&auth.client_secret)
            .with_http_client(http_client.clone());

        Ok(Self {
            http_client,
            oauth,
            scope: auth.scope_url.clone(),
            api_base_url: parse_base_url(&settings.api_base_url)?,
        })
    }

    fn resource_url(&self, segments: &[&str]) -> Url {
        join_path(&self.api_base_url, segments)
    }

    async fn get_all<T: DeserializeOwned>(&self, token: &str, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(url) = next {
            debug!(%url, "GET");
            let response = self.http_client.get(&url).bearer_auth(token).send().await?;
            let page: Page<T> = check(response).await?.json().await?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }
}

/// Parses the configured API base.
pub(super) fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid Graph API URL {raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(Error::Config(format!("invalid Graph API URL {raw}")));
    }
    Ok(url)
}

/// `segments` appended to `base`, each percent-encoded.
pub(super) fn join_path(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Turns a non-success response into [`Error::Transport`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Transport(format!("graph request failed ({status}): {body}")))
}

#[async_trait]
impl GraphApi for HttpGraphApi {
    async fn acquire_token(&self) -> Result<CachedToken> {
        let token = self.oauth.client_credentials(Some(&self.scope)).await?;
        debug!(expires_at = ?token.expires_at, "graph token acquired");
        Ok(token.into())
    }

    async fn list_messages(&self, token: &str, url: &str) -> Result<Vec<GraphMessage>> {
        self.get_all(token, url).await
    }

    async fn list_attachments(
        &self,
        token: &str,
        user: &str,
        message_id: &str,
    ) -> Result<Vec<GraphAttachment>> {
        let url = self.resource_url(&["users", user, "messages", message_id, "attachments"]);
        self.get_all(token, url.as_str()).await
    }

    async fn list_folders(&self, token: &str, user: &str) -> Result<Vec<MailFolder>> {
        let url = self.resource_url(&["users", user, "mailFolders"]);
        self.get_all(token, url.as_str()).await
    }

    async fn move_message(
        &self,
        token: &str,
        user: &str,
        message_id: &str,
        destination_id: &str,
    ) -> Result<()> {
        let url = self.resource_url(&["users", user, "messages", message_id, "move"]);
        let response = self
            .http_client
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "destinationId": destination_id }))
            .send()
            .await?;
        check(response).await?;
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

    fn settings(proxy: serde_json::Value) -> GraphSettings {
        let config: MailboxConfig = serde_json::from_value(json!({
            "msGraph": {
                "auth": { "tenantId": "t", "clientId": "c", "clientSecret": "s", "user": "u@x.com" },
                "proxy": proxy
            }
        }))
        .unwrap();
        config.ms_graph.unwrap()
    }

    #[test]
    fn test_message_shape() {
        let message: GraphMessage = serde_json::from_value(json!({
            "id": "AAMk1",
            "subject": "Invoice",
            "from": { "emailAddress": { "address": "a@x.com", "name": "A" } },
            "body": { "contentType": "html", "content": "<p>Hi</p>" },
            "receivedDateTime": "2024-01-02T10:00:00Z",
            "sentDateTime": "2024-01-02T09:59:00Z",
            "isRead": false,
            "hasAttachments": true
        }))
        .unwrap();

        assert_eq!(message.from_address(), Some("a@x.com"));
        assert!(message.body.as_ref().unwrap().is_html());
        assert_eq!(message.received_date_time.unwrap().to_rfc3339(), "2024-01-02T10:00:00+00:00");
        assert!(message.has_attachments);
    }

    #[test]
    fn test_attachment_shape() {
        let attachment: GraphAttachment = serde_json::from_value(json!({
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": "a.pdf",
            "contentType": "application/pdf",
            "isInline": false,
            "contentBytes": "JVBERg=="
        }))
        .unwrap();
        assert!(attachment.is_file());
        assert_eq!(attachment.name.as_deref(), Some("a.pdf"));
    }

    #[test]
    fn test_page_next_link() {
        let page: Page<MailFolder> = serde_json::from_value(json!({
            "value": [{ "id": "1", "displayName": "Processed" }],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next"
        }))
        .unwrap();
        assert_eq!(page.value[0].display_name, "Processed");
        assert!(page.next_link.is_some());
    }

    #[test]
    fn test_proxy_is_validated_eagerly() {
        let err = HttpGraphApi::new(&settings(json!({ "enabled": true, "host": "proxy.local" })))
            .unwrap_err();
        assert!(matches!(err, Error::ProxyConfig(_)));

        assert!(HttpGraphApi::new(&settings(json!({ "enabled": false }))).is_ok());
        assert!(
            HttpGraphApi::new(&settings(json!({ "host": "proxy.local", "port": 3128 }))).is_ok()
        );
    }

    #[test]
    fn test_resource_paths_are_encoded() {
        let mut graph = settings(serde_json::Value::Null);
        graph.api_base_url = "https://graph.example.com/v1.0/".into();
        let api = HttpGraphApi::new(&graph).unwrap();

        let url = api.resource_url(&["users", "bot@x.com", "messages", "AA/B C=", "move"]);
        assert_eq!(
            url.as_str(),
            "https://graph.example.com/v1.0/users/bot@x.com/messages/AA%2FB%20C=/move"
        );
        assert_eq!(
            api.resource_url(&["users", "a?b#c", "mailFolders"]).as_str(),
            "https://graph.example.com/v1.0/users/a%3Fb%23c/mailFolders"
        );

        graph.api_base_url = "not a url".into();
        assert!(matches!(HttpGraphApi::new(&graph), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_authentication_error() {
        let mut graph = settings(serde_json::Value::Null);
        graph.auth.options.authority_host = "http://127.0.0.1:9/".into();
        let api = HttpGraphApi::new(&graph).unwrap();
        assert!(matches!(api.acquire_token().await, Err(Error::Authentication(_))));
    }
}
