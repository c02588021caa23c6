//! Structured header values and content-type inference.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Content type used when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type of TNEF (`winmail.dat`) envelopes.
pub const TNEF_CONTENT_TYPE: &str = "application/ms-tnef";

/// Header value with parameters, such as `Content-Type` or
/// `Content-Disposition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderValue {
    /// Main value, lowercased (e.g., "attachment", "text/plain").
    pub value: String,
    /// Parameters keyed by lowercase name, quotes removed.
    pub parameters: HashMap<String, String>,
}

impl HeaderValue {
    /// Creates a value without parameters.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parameters: HashMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the `filename` parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters
            .get("filename")
            .or_else(|| self.parameters.get("name"))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Parses a header value.
    ///
    /// Format: `value; param1=value1; param2="quoted; value"`
    ///
    /// # Errors
    ///
    /// Returns an error if the main value is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = split_unquoted(s).into_iter();

        let value = parts
            .next()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::InvalidHeader(format!("empty header value: {s:?}")))?;

        let mut header = Self::new(value);
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                let key = key.trim().to_lowercase();
                let value = value.trim().trim_matches('"').to_string();
                header.parameters.insert(key, value);
            }
        }

        Ok(header)
    }
}

/// Splits on `;` outside double quotes.
fn split_unquoted(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;

        let mut keys: Vec<_> = self.parameters.keys().collect();
        keys.sort();
        for key in keys {
            let value = &self.parameters[key];
            // Quote value if it contains special characters
            if value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Infers a content type from a file name's extension.
#[must_use]
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Lowercased extension of a file name, without the dot.
#[must_use]
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_lowercase)
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
    use proptest::prelude::*;

    #[test]
    fn test_parse_disposition() {
        let hv = HeaderValue::parse("attachment; filename=\"report.pdf\"").unwrap();
        assert_eq!(hv.value, "attachment");
        assert_eq!(hv.filename(), Some("report.pdf"));
    }

    #[test]
    fn test_parse_quoted_semicolon() {
        let hv = HeaderValue::parse("Attachment; FileName=\"a;b.csv\"; size=12").unwrap();
        assert_eq!(hv.value, "attachment");
        assert_eq!(hv.filename(), Some("a;b.csv"));
        assert_eq!(hv.parameters.get("size").map(String::as_str), Some("12"));
    }

    #[test]
    fn test_parse_content_type_name() {
        let hv = HeaderValue::parse("application/pdf; name=invoice.pdf").unwrap();
        assert_eq!(hv.value, "application/pdf");
        assert_eq!(hv.filename(), Some("invoice.pdf"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(HeaderValue::parse("  ; filename=x").is_err());
    }

    #[test]
    fn test_display() {
        let hv = HeaderValue::new("attachment").with_parameter("filename", "my file.pdf");
        assert_eq!(hv.to_string(), "attachment; filename=\"my file.pdf\"");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("report.pdf"), "application/pdf");
        assert_eq!(content_type_for("IMAGE.PNG"), "image/png");
        assert_eq!(content_type_for("noextension"), OCTET_STREAM);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Report.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in "\\PC*") {
            let _ = HeaderValue::parse(&s);
        }
    }
}
