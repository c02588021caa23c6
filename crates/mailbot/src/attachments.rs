//! Attachment extraction pipeline.
//!
//! Parts are kept when both their disposition and their file extension are
//! allow-listed. TNEF envelopes (`winmail.dat`) are unwrapped into the single
//! file they carry. Every kept attachment gets a SHA-256 checksum.

use mailbot_mime::{TNEF_CONTENT_TYPE, content_type_for, extension_of, tnef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Dispositions × extensions an attachment must match to be extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowList {
    /// Allowed `Content-Disposition` types, e.g. `attachment`, matched
    /// case-insensitively.
    #[serde(default)]
    pub dispositions: Vec<String>,
    /// Allowed file extensions without the dot, matched case-insensitively.
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl AllowList {
    /// Creates an allow-list.
    #[must_use]
    pub fn new<D, E>(dispositions: D, extensions: E) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            dispositions: dispositions.into_iter().map(Into::into).collect(),
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `disposition` is listed, ignoring case.
    #[must_use]
    pub fn allows_disposition(&self, disposition: &str) -> bool {
        self.dispositions
            .iter()
            .any(|d| d.eq_ignore_ascii_case(disposition.trim()))
    }

    /// Returns true if `extension` is listed, ignoring case.
    #[must_use]
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}

/// An extracted attachment.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name (the inner name for unwrapped envelopes).
    pub filename: String,
    /// `type/subtype`.
    pub content_type: String,
    /// `attachment` or `inline`.
    pub content_disposition: String,
    /// File bytes.
    pub content: Vec<u8>,
    /// Lowercase hex SHA-256 of `content`.
    pub checksum: String,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("content_disposition", &self.content_disposition)
            .field("size", &self.content.len())
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Runs `parts` through the allow-list and envelope decoding.
///
/// Parts without a file name are skipped with a warning.
///
/// # Errors
///
/// Returns [`Error::UnsupportedMultiAttachment`] when a TNEF envelope carries
/// more than one file, and [`Error::Mime`] when an envelope is malformed.
pub async fn extract(
    parts: &[mailbot_mime::Attachment],
    allowed: &AllowList,
) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();

    for part in parts {
        if !allowed.allows_disposition(&part.content_disposition) {
            debug!(
                disposition = %part.content_disposition,
                filename = ?part.filename,
                "skipping attachment with disallowed disposition"
            );
            continue;
        }

        let Some(filename) = part.filename.as_deref() else {
            warn!("attachment has no filename");
            continue;
        };

        match extension_of(filename) {
            Some(extension) if allowed.allows_extension(&extension) => {}
            _ => {
                debug!(%filename, "skipping attachment with disallowed extension");
                continue;
            }
        }

        let attachment = if part.content_type.eq_ignore_ascii_case(TNEF_CONTENT_TYPE) {
            unwrap_envelope(filename, &part.content_disposition, part.content.clone()).await?
        } else {
            Attachment {
                filename: filename.to_string(),
                content_type: part.content_type.clone(),
                content_disposition: part.content_disposition.clone(),
                checksum: checksum(&part.content),
                content: part.content.clone(),
            }
        };
        attachments.push(attachment);
    }

    debug!(count = attachments.len(), "extracted attachments");
    Ok(attachments)
}

async fn unwrap_envelope(filename: &str, disposition: &str, data: Vec<u8>) -> Result<Attachment> {
    let decoded = tokio::task::spawn_blocking(move || {
        tnef::decode(&data).and_then(tnef::Envelope::into_single_file)
    })
    .await
    .map_err(std::io::Error::from)?;

    let file = match decoded {
        Ok(file) => file,
        Err(mailbot_mime::Error::MultipleEnvelopeFiles(count)) => {
            return Err(Error::UnsupportedMultiAttachment {
                filename: filename.to_string(),
                count,
            });
        }
        Err(e) => return Err(e.into()),
    };

    debug!(envelope = %filename, file = %file.title, "unwrapped TNEF attachment");
    Ok(Attachment {
        content_type: content_type_for(&file.title),
        content_disposition: disposition.to_string(),
        checksum: checksum(&file.data),
        filename: file.title,
        content: file.data,
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;

    fn part(
        filename: Option<&str>,
        content_type: &str,
        disposition: &str,
        content: &[u8],
    ) -> mailbot_mime::Attachment {
        mailbot_mime::Attachment {
            filename: filename.map(ToString::to_string),
            content_type: content_type.to_string(),
            content_disposition: disposition.to_string(),
            content: content.to_vec(),
        }
    }

    fn tnef_attribute(out: &mut Vec<u8>, id: u32, data: &[u8]) {
        out.push(2);
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        let sum = data.iter().fold(0u16, |s, b| s.wrapping_add(u16::from(*b)));
        out.extend_from_slice(&sum.to_le_bytes());
    }

    fn winmail(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = tnef::SIGNATURE.to_le_bytes().to_vec();
        out.extend_from_slice(&1u16.to_le_bytes());
        for (title, data) in files {
            tnef_attribute(&mut out, 0x0006_9002, &[0u8; 14]);
            tnef_attribute(&mut out, 0x0001_8010, format!("{title}\0").as_bytes());
            tnef_attribute(&mut out, 0x0006_800F, data);
        }
        out
    }

    #[test]
    fn test_checksum() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_allow_list_ignores_case() {
        let allowed = AllowList::new(["attachment"], ["PDF"]);
        assert!(allowed.allows_extension("pdf"));
        assert!(allowed.allows_disposition("Attachment"));
        assert!(AllowList::new(["ATTACHMENT"], ["pdf"]).allows_disposition("attachment"));
        assert!(!allowed.allows_disposition("inline"));
        assert!(!allowed.allows_disposition("Inline"));
    }

    #[tokio::test]
    async fn test_inline_pdf_and_attached_docx_yield_nothing() {
        let allowed = AllowList::new(["attachment"], ["pdf"]);
        let parts = [
            part(Some("scan.pdf"), "application/pdf", "inline", b"%PDF"),
            part(
                Some("letter.docx"),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "attachment",
                b"PK",
            ),
        ];
        assert!(extract(&parts, &allowed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keeps_allowed_and_skips_nameless() {
        let allowed = AllowList::new(["attachment"], ["pdf"]);
        let parts = [
            part(None, "application/pdf", "attachment", b"%PDF"),
            part(Some("Invoice.PDF"), "application/pdf", "attachment", b"%PDF-1.4"),
        ];
        let out = extract(&parts, &allowed).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].filename, "Invoice.PDF");
        assert_eq!(out[0].checksum, checksum(b"%PDF-1.4"));
    }

    #[tokio::test]
    async fn test_single_file_envelope_is_renamed_and_retyped() {
        let allowed = AllowList::new(["attachment"], ["dat"]);
        let data = winmail(&[("report.pdf", b"%PDF-1.7".as_slice())]);
        let parts = [part(Some("winmail.dat"), TNEF_CONTENT_TYPE, "attachment", &data)];

        let out = extract(&parts, &allowed).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].filename, "report.pdf");
        assert_eq!(out[0].content_type, "application/pdf");
        assert_eq!(out[0].content, b"%PDF-1.7");
        assert_eq!(out[0].content_disposition, "attachment");
    }

    #[tokio::test]
    async fn test_multi_file_envelope_is_unsupported() {
        let allowed = AllowList::new(["attachment"], ["dat"]);
        let data = winmail(&[("a.pdf", b"a".as_slice()), ("b.pdf", b"b".as_slice())]);
        let parts = [part(Some("winmail.dat"), TNEF_CONTENT_TYPE, "attachment", &data)];

        let err = extract(&parts, &allowed).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedMultiAttachment { ref filename, count: 2 } if filename == "winmail.dat"
        ));
    }
}
