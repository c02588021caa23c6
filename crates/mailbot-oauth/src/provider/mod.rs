//! Token endpoint configurations.

use crate::error::{Error, Result};
use url::Url;

/// Default Microsoft identity platform authority.
pub const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com/";

/// Default scope for Outlook IMAP client-credentials tokens.
pub const OUTLOOK_DEFAULT_SCOPE: &str = "https://outlook.office.com/.default";

/// Default scope for Microsoft Graph client-credentials tokens.
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// `OAuth2` token endpoint configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Microsoft").
    pub name: String,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Default scopes.
    pub default_scopes: Vec<String>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token URL is invalid.
    pub fn new(name: impl Into<String>, token_url: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            token_url: Url::parse(token_url.as_ref())?,
            default_scopes: Vec::new(),
        })
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Microsoft identity platform v2 endpoint for a single tenant.
    ///
    /// The token URL is `{authority}{tenant}/oauth2/v2.0/token`. A missing
    /// trailing slash on `authority` is tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is empty or the URL is invalid.
    pub fn microsoft_tenant(authority: &str, tenant_id: &str) -> Result<Self> {
        if tenant_id.trim().is_empty() {
            return Err(Error::InvalidConfig("tenant id is empty".into()));
        }
        let authority = authority.trim_end_matches('/');
        Ok(Self::new(
            "Microsoft",
            format!("{authority}/{tenant_id}/oauth2/v2.0/token"),
        )?
        .with_default_scopes(vec![OUTLOOK_DEFAULT_SCOPE.to_string()]))
    }

    /// Google `OAuth2` token endpoint.
    ///
    /// Scopes:
    /// - `https://mail.google.com/` - Full Gmail access (IMAP/SMTP)
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Ok(Self::new("Google", "https://oauth2.googleapis.com/token")?
            .with_default_scopes(vec!["https://mail.google.com/".to_string()]))
    }

    /// Scopes joined the way token endpoints expect them.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.default_scopes.join(" ")
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

    #[test]
    fn test_microsoft_tenant_provider() {
        let provider = Provider::microsoft_tenant(MICROSOFT_AUTHORITY, "contoso").unwrap();
        assert_eq!(provider.name, "Microsoft");
        assert_eq!(
            provider.token_url.as_str(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(provider.scope_string(), OUTLOOK_DEFAULT_SCOPE);
    }

    #[test]
    fn test_microsoft_tenant_authority_without_slash() {
        let provider =
            Provider::microsoft_tenant("https://login.example.test", "tenant-1").unwrap();
        assert_eq!(
            provider.token_url.as_str(),
            "https://login.example.test/tenant-1/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_microsoft_tenant_requires_tenant() {
        let err = Provider::microsoft_tenant(MICROSOFT_AUTHORITY, " ").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_google_provider() {
        let provider = Provider::google().unwrap();
        assert_eq!(provider.name, "Google");
        assert_eq!(provider.default_scopes.len(), 1);
    }

    #[test]
    fn test_invalid_url() {
        assert!(Provider::new("Broken", "not a url").is_err());
    }
}
