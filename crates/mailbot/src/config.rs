//! Mailbox configuration and feature flags.
//!
//! The JSON shape follows the mailbot configuration file: exactly one of
//! `imap` or `msGraph` selects the backend.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use mailbot_oauth::{AuthDescriptor, GRAPH_DEFAULT_SCOPE, MICROSOFT_AUTHORITY};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::attachments::AllowList;
use crate::criteria::SearchCriteria;
use crate::date::DateSource;
use crate::error::{Error, Result};

/// Default Graph API root.
pub const GRAPH_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Default Graph token cache location.
pub const DEFAULT_TOKEN_CACHE: &str = "./token.json";

/// Top-level mailbox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxConfig {
    /// IMAP backend settings.
    #[serde(default)]
    pub imap: Option<ImapSettings>,
    /// Microsoft Graph backend settings.
    #[serde(default)]
    pub ms_graph: Option<GraphSettings>,
    /// Well-known folders.
    #[serde(default)]
    pub folders: FolderMap,
    /// Attachment extraction rules.
    #[serde(default)]
    pub attachments: AttachmentSettings,
    /// Whether `Message::move_to` actually moves.
    #[serde(default)]
    pub move_processed_messages: bool,
    /// Criteria used when a search is called without any.
    #[serde(default)]
    pub search_criteria: Option<serde_json::Value>,
}

/// Backend selected by a configuration.
#[derive(Debug, Clone, Copy)]
pub enum BackendSettings<'a> {
    /// Stateful IMAP store.
    Imap(&'a ImapSettings),
    /// Stateless Graph query service.
    Graph(&'a GraphSettings),
}

impl MailboxConfig {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the configuration shape.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Returns the backend this configuration selects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] unless exactly one backend is configured.
    pub fn backend(&self) -> Result<BackendSettings<'_>> {
        match (&self.imap, &self.ms_graph) {
            (Some(imap), None) => Ok(BackendSettings::Imap(imap)),
            (None, Some(graph)) => Ok(BackendSettings::Graph(graph)),
            (Some(_), Some(_)) => Err(Error::Config(
                "both imap and msGraph are configured; choose one".into(),
            )),
            (None, None) => Err(Error::Config("invalid mail client configuration".into())),
        }
    }

    /// Parses the default search criteria.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a criterion has the wrong type.
    pub fn default_criteria(&self) -> Result<Option<SearchCriteria>> {
        self.search_criteria
            .clone()
            .map(SearchCriteria::from_value)
            .transpose()
    }
}

/// Well-known folder names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderMap {
    /// Folder searched by default.
    #[serde(default, rename = "INBOX")]
    pub inbox: Option<String>,
    /// Destination for processed messages.
    #[serde(default)]
    pub processed: Option<String>,
}

/// Attachment extraction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentSettings {
    /// Default allow-list.
    #[serde(default)]
    pub allowed: AllowList,
}

/// IMAP connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Implicit TLS.
    #[serde(default = "default_true", alias = "tls")]
    pub secure: bool,
    /// Login user.
    #[serde(default)]
    pub user: Option<String>,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
    /// Static bearer token.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Auth block; its fields override the flat ones.
    #[serde(default)]
    pub auth: Option<AuthDescriptor>,
    /// Verbose protocol logging.
    #[serde(default)]
    pub debug: bool,
}

const fn default_imap_port() -> u16 {
    993
}

const fn default_true() -> bool {
    true
}

impl ImapSettings {
    /// Merges the flat credential fields with the `auth` block.
    #[must_use]
    pub fn auth_descriptor(&self) -> AuthDescriptor {
        let mut merged = AuthDescriptor {
            user: self.user.clone(),
            password: self.password.clone(),
            access_token: self.access_token.clone(),
            ..AuthDescriptor::default()
        };
        if let Some(auth) = &self.auth {
            if auth.user.is_some() {
                merged.user.clone_from(&auth.user);
            }
            if auth.password.is_some() {
                merged.password.clone_from(&auth.password);
            }
            if auth.access_token.is_some() {
                merged.access_token.clone_from(&auth.access_token);
            }
            merged.msxoauth.clone_from(&auth.msxoauth);
            merged.googlexoauth.clone_from(&auth.googlexoauth);
        }
        merged
    }
}

/// Microsoft Graph settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSettings {
    /// Application credentials.
    pub auth: GraphAuth,
    /// API root, e.g. `https://graph.microsoft.com/v1.0`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Static search path with a `{userId}` placeholder.
    #[serde(default)]
    pub search_url: Option<String>,
    /// Forward proxy.
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    /// Token cache file; `None` disables persistence.
    #[serde(default = "default_token_cache")]
    pub token_cache_path: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    GRAPH_API_BASE_URL.to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_token_cache() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_TOKEN_CACHE))
}

/// Graph application credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphAuth {
    /// Directory (tenant) ID.
    pub tenant_id: String,
    /// Application ID.
    pub client_id: String,
    /// Application secret.
    pub client_secret: String,
    /// Mailbox user (UPN or id).
    pub user: String,
    /// Requested scope.
    #[serde(default = "default_graph_scope")]
    pub scope_url: String,
    /// Authority options.
    #[serde(default)]
    pub options: GraphAuthOptions,
}

fn default_graph_scope() -> String {
    GRAPH_DEFAULT_SCOPE.to_string()
}

/// Authority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphAuthOptions {
    /// Token authority host.
    #[serde(default = "default_authority")]
    pub authority_host: String,
}

impl Default for GraphAuthOptions {
    fn default() -> Self {
        Self {
            authority_host: default_authority(),
        }
    }
}

fn default_authority() -> String {
    MICROSOFT_AUTHORITY.to_string()
}

/// Forward proxy for Graph calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Whether the proxy is used.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Proxy host.
    #[serde(default)]
    pub host: Option<String>,
    /// Proxy port (number or numeric string).
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    /// Proxy scheme.
    #[serde(default = "default_proxy_protocol")]
    pub protocol: String,
}

fn default_proxy_protocol() -> String {
    "http".to_string()
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(port)) => Ok(Some(port)),
        Some(Port::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Port::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl ProxySettings {
    /// Proxy URL, or `None` when disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProxyConfig`] when enabled without host or port.
    pub fn url(&self) -> Result<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        match (self.host.as_deref().filter(|h| !h.is_empty()), self.port) {
            (Some(host), Some(port)) => Ok(Some(format!("{}://{host}:{port}", self.protocol))),
            _ => Err(Error::ProxyConfig(
                "proxy configuration is missing host or port".into(),
            )),
        }
    }
}

/// Process-wide switches that change filtering and date behaviour.
///
/// Built explicitly and handed to the backend, so each switch can be
/// exercised without touching the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct FeatureFlags {
    /// Apply the `from` criterion.
    pub from_filter: bool,
    /// Apply the `subject` criterion.
    pub subject_filter: bool,
    /// Apply the `body` criterion.
    pub body_filter: bool,
    /// Apply the `seen` criterion.
    pub seen_filter: bool,
    /// Apply the `since` criterion.
    pub since_filter: bool,
    /// Enable `Message::satisfy_body_filter` local matching.
    pub manual_body_filter: bool,
    /// Forced date source.
    pub date_source: Option<DateSource>,
    /// Forced timezone handling.
    pub ignore_timezone: Option<bool>,
    /// Target timezone.
    pub timezone: Option<Tz>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            from_filter: true,
            subject_filter: true,
            body_filter: true,
            seen_filter: true,
            since_filter: true,
            manual_body_filter: false,
            date_source: None,
            ignore_timezone: None,
            timezone: None,
        }
    }
}

impl FeatureFlags {
    /// Reads flags from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads flags through `lookup`, using the environment variable names.
    ///
    /// Filters are disabled only by the literal value `false`. Date switches
    /// are enabled only by the literal value `true`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is = |key: &str, expected: &str| lookup(key).is_some_and(|v| v.trim() == expected);

        let date_source = if is("USE_SERVER_SEND_DATE", "true") {
            Some(DateSource::Sent)
        } else if is("USE_SERVER_RECEIVED_DATE", "true") {
            Some(DateSource::Received)
        } else {
            None
        };

        let timezone = lookup("MAILBOT_TIMEZONE").and_then(|name| {
            name.trim()
                .parse::<Tz>()
                .map_err(|e| warn!(timezone = %name, error = %e, "ignoring unknown timezone"))
                .ok()
        });

        Self {
            from_filter: !is("USE_MAIL_FROM_FILTER", "false"),
            body_filter: !is("USE_MAIL_BODY_FILTER", "false"),
            manual_body_filter: is("USE_IMAP_BODY_FILTER", "false"),
            date_source,
            ignore_timezone: is("IGNORE_MESSAGES_TIMEZONE", "true").then_some(true),
            timezone,
            ..Self::default()
        }
    }

    /// Disables the `from` filter.
    #[must_use]
    pub const fn without_from_filter(mut self) -> Self {
        self.from_filter = false;
        self
    }

    /// Disables the `body` filter.
    #[must_use]
    pub const fn without_body_filter(mut self) -> Self {
        self.body_filter = false;
        self
    }

    /// Enables local body matching.
    #[must_use]
    pub const fn with_manual_body_filter(mut self) -> Self {
        self.manual_body_filter = true;
        self
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
    use std::collections::HashMap;

    const IMAP_CONFIG: &str = r#"{
        "imap": {
            "host": "imap.example.com",
            "user": "bot@example.com",
            "password": "pw",
            "auth": { "accessToken": "tok" }
        },
        "folders": { "INBOX": "INBOX", "processed": "Processed" },
        "attachments": { "allowed": { "dispositions": ["attachment"], "extensions": ["pdf"] } },
        "moveProcessedMessages": true,
        "searchCriteria": { "from": "billing@example.org", "seen": false }
    }"#;

    #[test]
    fn test_imap_config() {
        let config = MailboxConfig::from_json_str(IMAP_CONFIG).unwrap();
        let BackendSettings::Imap(imap) = config.backend().unwrap() else {
            panic!("expected imap backend");
        };
        assert_eq!(imap.port, 993);
        assert!(imap.secure);
        assert_eq!(config.folders.processed.as_deref(), Some("Processed"));
        assert!(config.move_processed_messages);
        assert_eq!(config.attachments.allowed.extensions, vec!["pdf"]);

        let criteria = config.default_criteria().unwrap().unwrap();
        assert_eq!(criteria.from.as_deref(), Some("billing@example.org"));
        assert_eq!(criteria.seen, Some(false));
    }

    #[test]
    fn test_auth_block_overrides_flat_fields() {
        let config = MailboxConfig::from_json_str(IMAP_CONFIG).unwrap();
        let descriptor = config.imap.unwrap().auth_descriptor();
        assert_eq!(descriptor.user.as_deref(), Some("bot@example.com"));
        assert_eq!(descriptor.password.as_deref(), Some("pw"));
        assert_eq!(descriptor.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_graph_config_defaults() {
        let config = MailboxConfig::from_json_str(
            r#"{ "msGraph": { "auth": {
                "tenantId": "t", "clientId": "c", "clientSecret": "s", "user": "bot@example.com"
            } } }"#,
        )
        .unwrap();
        let BackendSettings::Graph(graph) = config.backend().unwrap() else {
            panic!("expected graph backend");
        };
        assert_eq!(graph.api_base_url, GRAPH_API_BASE_URL);
        assert_eq!(graph.auth.scope_url, GRAPH_DEFAULT_SCOPE);
        assert_eq!(graph.auth.options.authority_host, MICROSOFT_AUTHORITY);
        assert_eq!(
            graph.token_cache_path.as_deref(),
            Some(Path::new(DEFAULT_TOKEN_CACHE))
        );
        assert!(!config.move_processed_messages);
    }

    #[test]
    fn test_no_backend_is_config_error() {
        let config = MailboxConfig::from_json_str("{}").unwrap();
        assert!(matches!(config.backend(), Err(Error::Config(_))));
    }

    #[test]
    fn test_proxy_url() {
        let proxy: ProxySettings =
            serde_json::from_str(r#"{ "enabled": true, "host": "proxy.local", "port": "3128" }"#)
                .unwrap();
        assert_eq!(proxy.url().unwrap().as_deref(), Some("http://proxy.local:3128"));

        let disabled: ProxySettings = serde_json::from_str(r#"{ "enabled": false }"#).unwrap();
        assert_eq!(disabled.url().unwrap(), None);

        let broken: ProxySettings = serde_json::from_str(r#"{ "host": "proxy.local" }"#).unwrap();
        assert!(matches!(broken.url(), Err(Error::ProxyConfig(_))));
    }

    #[test]
    fn test_flags_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("USE_MAIL_BODY_FILTER", "false"),
            ("USE_IMAP_BODY_FILTER", "false"),
            ("USE_SERVER_RECEIVED_DATE", "true"),
            ("IGNORE_MESSAGES_TIMEZONE", "true"),
            ("MAILBOT_TIMEZONE", "Europe/Madrid"),
        ]);
        let flags = FeatureFlags::from_lookup(|k| env.get(k).map(ToString::to_string));

        assert!(!flags.body_filter);
        assert!(flags.from_filter);
        assert!(flags.manual_body_filter);
        assert_eq!(flags.date_source, Some(DateSource::Received));
        assert_eq!(flags.ignore_timezone, Some(true));
        assert_eq!(flags.timezone, Some(chrono_tz::Europe::Madrid));
    }

    #[test]
    fn test_flags_default_when_unset() {
        let flags = FeatureFlags::from_lookup(|_| None);
        assert_eq!(flags, FeatureFlags::default());
    }
}
