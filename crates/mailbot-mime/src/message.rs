//! Owned view of a parsed RFC 5322 message.

use crate::content_type::OCTET_STREAM;
use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset};
use mail_parser::{MessageParser, MimeHeaders};

/// One header line in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    /// Lowercase header name.
    pub key: String,
    /// Full unfolded-as-received line, `Name: value`.
    pub line: String,
}

/// Attachment part of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name, when the part carries one.
    pub filename: Option<String>,
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// `attachment` or `inline`.
    pub content_disposition: String,
    /// Decoded bytes.
    pub content: Vec<u8>,
}

/// Parsed message content.
#[derive(Debug, Clone, Default)]
pub struct ParsedMail {
    /// Plain-text body (derived from HTML when the message has none).
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Header lines in original order, duplicates kept.
    pub header_lines: Vec<HeaderLine>,
    /// Attachments in part order.
    pub attachments: Vec<Attachment>,
    /// First `From` address.
    pub from: Option<String>,
    /// Decoded subject.
    pub subject: Option<String>,
    /// `Date` header.
    pub date: Option<DateTime<FixedOffset>>,
    /// Date token of the most recently added `Received` header.
    pub received_date: Option<DateTime<FixedOffset>>,
}

impl ParsedMail {
    /// Parses raw message bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the bytes are not a message.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| Error::Parse("not an RFC 5322 message".into()))?;

        let source = message.raw_message();
        let mut header_lines = Vec::new();
        let mut received_date = None;
        for header in message.headers() {
            let key = header.name().to_lowercase();
            if let Some(line) = raw_slice(source, header.offset_field, header.offset_end) {
                header_lines.push(HeaderLine {
                    key: key.clone(),
                    line: line.trim_end_matches(['\r', '\n']).to_string(),
                });
            }
            if key == "received" && received_date.is_none() {
                received_date = raw_slice(source, header.offset_start, header.offset_end)
                    .and_then(received_timestamp);
            }
        }

        let attachments = message
            .attachments()
            .map(|part| Attachment {
                filename: part.attachment_name().map(ToString::to_string),
                content_type: part.content_type().map_or_else(
                    || OCTET_STREAM.to_string(),
                    |ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
                        None => ct.ctype().to_lowercase(),
                    },
                ),
                content_disposition: part
                    .content_disposition()
                    .map_or_else(|| "attachment".to_string(), |cd| cd.ctype().to_lowercase()),
                content: part.contents().to_vec(),
            })
            .collect();

        Ok(Self {
            text: message.body_text(0).map(|t| t.into_owned()),
            html: message.body_html(0).map(|h| h.into_owned()),
            header_lines,
            attachments,
            from: message
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
                .map(ToString::to_string),
            subject: message.subject().map(ToString::to_string),
            date: message
                .date()
                .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok()),
            received_date,
        })
    }

    /// Header lines whose name is `key` (case-insensitive), in order.
    pub fn headers_named<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a HeaderLine> + 'a {
        self.header_lines
            .iter()
            .filter(move |h| h.key.eq_ignore_ascii_case(key))
    }
}

fn raw_slice<I: TryInto<usize>>(source: &[u8], start: I, end: I) -> Option<&str> {
    let start = start.try_into().ok()?;
    let end = end.try_into().ok()?;
    source
        .get(start..end)
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
}

/// Parses the trailing date token of a `Received` header value.
///
/// The date follows the last `;`. Comments in parentheses are dropped.
#[must_use]
pub fn received_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let (_, date) = value.rsplit_once(';')?;

    let mut cleaned = String::with_capacity(date.len());
    let mut depth = 0usize;
    for c in date.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(c),
            _ => {}
        }
    }
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    DateTime::parse_from_rfc2822(&cleaned).ok()
}

/// Converts HTML to plain text.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    mail_parser::decoders::html::html_to_text(html)
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

    const RAW: &str = "Received: from relay.example.net (relay [10.0.0.2])\r\n\
        \tby mx.example.com; Tue, 02 Jan 2024 10:00:05 +0000 (UTC)\r\n\
        Received: from origin.example.org\r\n\
        \tby relay.example.net; Tue, 02 Jan 2024 09:59:58 +0000\r\n\
        From: Billing <billing@example.org>\r\n\
        To: bot@example.com\r\n\
        Subject: Invoice 42\r\n\
        Date: Tue, 02 Jan 2024 11:59:00 +0200\r\n\
        X-Tag: one\r\n\
        X-Tag: two\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
        \r\n\
        --XYZ\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <p>Download <a href=\"https://files.example.org/a.pdf\">here</a></p>\r\n\
        --XYZ\r\n\
        Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
        Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        JVBERi0xLjQ=\r\n\
        --XYZ--\r\n";

    #[test]
    fn test_parse_envelope_fields() {
        let mail = ParsedMail::parse(RAW.as_bytes()).unwrap();
        assert_eq!(mail.from.as_deref(), Some("billing@example.org"));
        assert_eq!(mail.subject.as_deref(), Some("Invoice 42"));
        assert_eq!(mail.date.unwrap().to_rfc3339(), "2024-01-02T11:59:00+02:00");
    }

    #[test]
    fn test_header_lines_keep_order_and_duplicates() {
        let mail = ParsedMail::parse(RAW.as_bytes()).unwrap();
        let tags: Vec<_> = mail.headers_named("x-tag").map(|h| h.line.as_str()).collect();
        assert_eq!(tags, vec!["X-Tag: one", "X-Tag: two"]);
        assert_eq!(mail.header_lines[0].key, "received");
    }

    #[test]
    fn test_received_date_uses_topmost_header() {
        let mail = ParsedMail::parse(RAW.as_bytes()).unwrap();
        assert_eq!(
            mail.received_date.unwrap().to_rfc3339(),
            "2024-01-02T10:00:05+00:00"
        );
    }

    #[test]
    fn test_attachments() {
        let mail = ParsedMail::parse(RAW.as_bytes()).unwrap();
        assert_eq!(mail.attachments.len(), 1);
        let attachment = &mail.attachments[0];
        assert_eq!(attachment.filename.as_deref(), Some("invoice.pdf"));
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.content_disposition, "attachment");
        assert_eq!(attachment.content, b"%PDF-1.4");
    }

    #[test]
    fn test_html_body() {
        let mail = ParsedMail::parse(RAW.as_bytes()).unwrap();
        assert!(mail.html.unwrap().contains("https://files.example.org/a.pdf"));
        assert!(mail.text.unwrap().contains("Download"));
    }

    #[test]
    fn test_received_timestamp() {
        let parsed = received_timestamp(
            "from a by b (Postfix) with ESMTP id 1; Mon, 1 Jan 2024 08:00:00 -0300 (ART)",
        )
        .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T08:00:00-03:00");
        assert!(received_timestamp("from a by b").is_none());
    }

    #[test]
    fn test_html_to_text() {
        let text = html_to_text("<p>Hello <b>world</b></p>");
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains('<'));
    }
}
