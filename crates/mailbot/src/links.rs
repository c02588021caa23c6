//! Body-link harvesting.
//!
//! URLs are found in a message body with configured patterns, rewritten by
//! optional string filters and downloaded. A failed download is returned as
//! [`LinkDownload::Failed`] so a batch can continue past bad links.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attachments::checksum;
use crate::error::{Error, Result};

/// Kind tag carried by every downloaded link.
pub const BODY_LINK_KIND: &str = "body_link";

/// Harvesting rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRule {
    /// Patterns applied in order.
    #[serde(default)]
    pub url_patterns: Vec<UrlPattern>,
    /// Body searched: `text` (default) or `html`.
    #[serde(default)]
    pub body_format: Option<String>,
}

/// A URL pattern with its post-match filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Regular expression.
    pub pattern: String,
    /// Flag letters: `i`, `m`, `s`. `g` is implied.
    #[serde(default)]
    pub flags: String,
    /// Filters applied to every match, in order.
    #[serde(default)]
    pub filters: Vec<StringFilter>,
}

impl UrlPattern {
    /// Creates a pattern without flags or filters.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    /// Sets the flag letters.
    #[must_use]
    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    /// Appends a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: StringFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Compiles the pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the expression is invalid.
    pub fn compile(&self) -> Result<Regex> {
        let mut builder = RegexBuilder::new(&self.pattern);
        for flag in self.flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'g' | 'u' => {}
                other => warn!(flag = %other, pattern = %self.pattern, "ignoring unknown pattern flag"),
            }
        }
        builder
            .build()
            .map_err(|e| Error::Config(format!("invalid url pattern {:?}: {e}", self.pattern)))
    }

    /// All non-overlapping matches in `body`, filtered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the expression is invalid.
    pub fn find_urls(&self, body: &str) -> Result<Vec<String>> {
        let regex = self.compile()?;
        Ok(regex
            .find_iter(body)
            .map(|m| {
                self.filters
                    .iter()
                    .fold(m.as_str().to_string(), |url, filter| filter.apply(&url))
            })
            .collect())
    }
}

/// Post-match string rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StringFilter {
    /// Literal substring replacement; every occurrence when `flags` has `g`.
    Replace {
        /// Literal text to find.
        pattern: String,
        /// Replacement text.
        #[serde(default)]
        replacement: String,
        /// Flag letters.
        #[serde(default)]
        flags: String,
    },
    /// Any other filter kind; passes the string through.
    #[serde(other)]
    Unsupported,
}

impl StringFilter {
    /// Applies the filter.
    #[must_use]
    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::Replace {
                pattern,
                replacement,
                flags,
            } => {
                if pattern.is_empty() {
                    input.to_string()
                } else if flags.contains('g') {
                    input.replace(pattern.as_str(), replacement)
                } else {
                    input.replacen(pattern.as_str(), replacement, 1)
                }
            }
            Self::Unsupported => {
                warn!("link filter not implemented");
                input.to_string()
            }
        }
    }
}

/// A successfully downloaded link.
#[derive(Clone, PartialEq, Eq)]
pub struct DownloadedLink {
    /// Response body.
    pub content: Vec<u8>,
    /// `Content-Type` response header.
    pub content_type: Option<String>,
    /// Name from `Content-Disposition`, else the URL path basename.
    pub filename: String,
    /// Lowercase hex SHA-256 of `content`.
    pub checksum: String,
    /// Always [`BODY_LINK_KIND`].
    pub kind: &'static str,
    /// Response headers.
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for DownloadedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedLink")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.content.len())
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// Outcome of downloading one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDownload {
    /// The body was fetched.
    Downloaded(DownloadedLink),
    /// The request failed or returned a non-success status.
    Failed {
        /// Requested URL.
        url: String,
        /// HTTP status, when a response arrived.
        status: Option<u16>,
        /// Failure description.
        reason: String,
    },
}

impl LinkDownload {
    /// The downloaded link, if any.
    #[must_use]
    pub const fn as_downloaded(&self) -> Option<&DownloadedLink> {
        match self {
            Self::Downloaded(link) => Some(link),
            Self::Failed { .. } => None,
        }
    }

    /// Returns true for [`LinkDownload::Failed`].
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Finds and downloads links.
#[derive(Debug, Clone, Default)]
pub struct LinkHarvester {
    http_client: reqwest::Client,
}

impl LinkHarvester {
    /// Creates a harvester with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    /// Matches every pattern against `body` and downloads each URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid pattern. Download failures
    /// are reported in the returned list.
    pub async fn harvest(&self, body: &str, patterns: &[UrlPattern]) -> Result<Vec<LinkDownload>> {
        let mut downloads = Vec::new();
        for pattern in patterns {
            for url in pattern.find_urls(body)? {
                downloads.push(self.download(&url).await);
            }
        }
        info!(count = downloads.len(), "harvested body links");
        Ok(downloads)
    }

    /// Downloads one URL.
    pub async fn download(&self, url: &str) -> LinkDownload {
        let parsed = match url::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return failed(url, None, e.to_string()),
        };

        debug!(%url, "downloading body link");
        let response = match self.http_client.get(parsed.clone()).send().await {
            Ok(response) => response,
            Err(e) => return failed(url, e.status().map(|s| s.as_u16()), e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return failed(
                url,
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("request failed").to_string(),
            );
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let content_type = header("content-type");
        let filename = header("content-disposition")
            .as_deref()
            .and_then(disposition_filename)
            .unwrap_or_else(|| url_basename(&parsed));

        let content = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return failed(url, Some(status.as_u16()), e.to_string()),
        };

        LinkDownload::Downloaded(DownloadedLink {
            checksum: checksum(&content),
            content,
            content_type,
            filename,
            kind: BODY_LINK_KIND,
            headers,
        })
    }
}

fn failed(url: &str, status: Option<u16>, reason: String) -> LinkDownload {
    warn!(%url, ?status, %reason, "body link download failed");
    LinkDownload::Failed {
        url: url.to_string(),
        status,
        reason,
    }
}

/// File name from a `Content-Disposition` value, with unsafe characters
/// replaced by `_`.
fn disposition_filename(value: &str) -> Option<String> {
    let parsed = mailbot_mime::HeaderValue::parse(value).ok()?;
    let name = parsed.filename()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(
        name.chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
    )
}

fn url_basename(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map_or_else(|| "download".to_string(), ToString::to_string)
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the base URL.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = Vec::new();
            while !read.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                read.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    fn harvester() -> LinkHarvester {
        LinkHarvester::new().with_http_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_find_urls_all_matches_with_filters() {
        let pattern = UrlPattern::new(r"https://files\.example\.org/\S+\.pdf")
            .with_filter(StringFilter::Replace {
                pattern: "http://".into(),
                replacement: "https://".into(),
                flags: String::new(),
            })
            .with_filter(StringFilter::Replace {
                pattern: "files.".into(),
                replacement: "cdn.".into(),
                flags: "g".into(),
            });
        let body = "a https://files.example.org/a.pdf b https://files.example.org/b.pdf";
        assert_eq!(
            pattern.find_urls(body).unwrap(),
            vec![
                "https://cdn.example.org/a.pdf".to_string(),
                "https://cdn.example.org/b.pdf".to_string()
            ]
        );
    }

    #[test]
    fn test_case_insensitive_flag() {
        let pattern = UrlPattern::new("HTTPS://X\\.ORG/\\w+").with_flags("gi");
        assert_eq!(pattern.find_urls("see https://x.org/doc").unwrap(), vec!["https://x.org/doc"]);
    }

    #[test]
    fn test_replace_first_only_without_g() {
        let filter = StringFilter::Replace {
            pattern: "a".into(),
            replacement: "b".into(),
            flags: String::new(),
        };
        assert_eq!(filter.apply("aaa"), "baa");
    }

    #[test]
    fn test_unknown_filter_passes_through() {
        let filter: StringFilter =
            serde_json::from_str(r#"{ "type": "uppercase", "pattern": "x" }"#).unwrap();
        assert_eq!(filter, StringFilter::Unsupported);
        assert_eq!(filter.apply("https://x.org"), "https://x.org");
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = UrlPattern::new("(unclosed").find_urls("body").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(
            disposition_filename("attachment; filename=\"my report.pdf\"").as_deref(),
            Some("my_report.pdf")
        );
        assert_eq!(disposition_filename("inline"), None);
    }

    #[tokio::test]
    async fn test_download_uses_disposition_name() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\n\
             Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
             Content-Length: 8\r\nConnection: close\r\n\r\n%PDF-1.4",
        )
        .await;

        let outcome = harvester().download(&format!("{base}/dl?id=1")).await;
        let link = outcome.as_downloaded().unwrap();
        assert_eq!(link.filename, "invoice.pdf");
        assert_eq!(link.content, b"%PDF-1.4");
        assert_eq!(link.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(link.checksum, checksum(b"%PDF-1.4"));
        assert_eq!(link.kind, BODY_LINK_KIND);
    }

    #[tokio::test]
    async fn test_download_falls_back_to_path_basename() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        )
        .await;

        let outcome = harvester().download(&format!("{base}/files/statement.csv")).await;
        assert_eq!(outcome.as_downloaded().unwrap().filename, "statement.csv");
    }

    #[tokio::test]
    async fn test_download_failure_is_a_value() {
        let base = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let outcome = harvester().download(&format!("{base}/missing.pdf")).await;
        assert!(matches!(outcome, LinkDownload::Failed { status: Some(404), .. }));

        let outcome = harvester().download("not a url").await;
        assert!(outcome.is_failed());
    }
}
