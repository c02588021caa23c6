//! TNEF (`winmail.dat`) envelope decoding.
//!
//! Only the attachment attributes are interpreted. Message-level
//! attributes and MAPI property blocks are skipped.
//!
//! Stream layout (all integers little-endian):
//!
//! ```text
//! signature u32 = 0x223E9F78
//! key       u16
//! repeated:
//!   level    u8   (1 = message, 2 = attachment)
//!   id       u32  (low 16 bits = attribute, high 16 bits = type)
//!   length   u32
//!   data     [u8; length]
//!   checksum u16  (sum of data bytes mod 65536)
//! ```

use crate::content_type::content_type_for;
use crate::error::{Error, Result};
use tracing::debug;

/// TNEF stream signature.
pub const SIGNATURE: u32 = 0x223E_9F78;

const LEVEL_ATTACHMENT: u8 = 2;
const ATT_ATTACH_DATA: u16 = 0x800F;
const ATT_ATTACH_TITLE: u16 = 0x8010;
const ATT_ATTACH_REND_DATA: u16 = 0x9002;

/// One file carried inside an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeFile {
    /// File name from `attAttachTitle`.
    pub title: String,
    /// File bytes from `attAttachData`.
    pub data: Vec<u8>,
}

impl EnvelopeFile {
    /// Content type inferred from the title.
    #[must_use]
    pub fn content_type(&self) -> String {
        content_type_for(&self.title)
    }
}

/// Decoded envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Files in stream order.
    pub files: Vec<EnvelopeFile>,
}

impl Envelope {
    /// Returns the only file of the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MultipleEnvelopeFiles`] when there is more than one
    /// file and [`Error::EmptyEnvelope`] when there is none.
    pub fn into_single_file(self) -> Result<EnvelopeFile> {
        let count = self.files.len();
        let mut files = self.files.into_iter();
        match (files.next(), count) {
            (Some(file), 1) => Ok(file),
            (None, _) => Err(Error::EmptyEnvelope),
            _ => Err(Error::MultipleEnvelopeFiles(count)),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    const fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::InvalidEnvelope(format!("truncated at offset {} (need {n} bytes)", self.pos))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decodes a TNEF stream into its attached files.
///
/// # Errors
///
/// Returns [`Error::InvalidEnvelope`] on a bad signature or a truncated
/// attribute.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let mut reader = Reader::new(bytes);

    let signature = reader.u32()?;
    if signature != SIGNATURE {
        return Err(Error::InvalidEnvelope(format!(
            "bad signature 0x{signature:08X}"
        )));
    }
    let _key = reader.u16()?;

    let mut envelope = Envelope::default();
    let mut current: Option<EnvelopeFile> = None;

    while !reader.is_empty() {
        let level = reader.u8()?;
        let id = reader.u32()?;
        let length = usize::try_from(reader.u32()?)
            .map_err(|_| Error::InvalidEnvelope("attribute length overflow".into()))?;
        let data = reader.take(length)?;
        let checksum = reader.u16()?;

        let expected = data
            .iter()
            .fold(0u16, |sum, b| sum.wrapping_add(u16::from(*b)));
        if expected != checksum {
            debug!(id = format!("0x{id:08X}"), "TNEF attribute checksum mismatch");
        }

        if level != LEVEL_ATTACHMENT {
            continue;
        }

        #[allow(clippy::cast_possible_truncation)]
        let attribute = (id & 0xFFFF) as u16;
        match attribute {
            ATT_ATTACH_REND_DATA => {
                if let Some(file) = current.take() {
                    envelope.files.push(file);
                }
                current = Some(EnvelopeFile::default());
            }
            ATT_ATTACH_TITLE => {
                current.get_or_insert_with(EnvelopeFile::default).title = decode_title(data);
            }
            ATT_ATTACH_DATA => {
                current.get_or_insert_with(EnvelopeFile::default).data = data.to_vec();
            }
            _ => {}
        }
    }

    if let Some(file) = current {
        envelope.files.push(file);
    }

    debug!(files = envelope.files.len(), "decoded TNEF envelope");
    Ok(envelope)
}

fn decode_title(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
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

    fn attribute(out: &mut Vec<u8>, level: u8, id: u32, data: &[u8]) {
        out.push(level);
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        let checksum = data.iter().fold(0u16, |s, b| s.wrapping_add(u16::from(*b)));
        out.extend_from_slice(&checksum.to_le_bytes());
    }

    /// Builds a TNEF stream carrying the given `(title, data)` files.
    fn build(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0x0001u16.to_le_bytes());
        attribute(&mut out, 1, 0x0008_9006, b"IPM.Microsoft Mail.Note\0");
        for (title, data) in files {
            attribute(&mut out, 2, 0x0006_9002, &[0u8; 14]);
            let mut name = title.as_bytes().to_vec();
            name.push(0);
            attribute(&mut out, 2, 0x0001_8010, &name);
            attribute(&mut out, 2, 0x0006_800F, data);
        }
        out
    }

    #[test]
    fn test_decode_single_file() {
        let bytes = build(&[("invoice.pdf", b"%PDF-1.4 body".as_slice())]);
        let envelope = decode(&bytes).unwrap();
        assert_eq!(envelope.files.len(), 1);

        let file = envelope.into_single_file().unwrap();
        assert_eq!(file.title, "invoice.pdf");
        assert_eq!(file.data, b"%PDF-1.4 body");
        assert_eq!(file.content_type(), "application/pdf");
    }

    #[test]
    fn test_decode_multiple_files() {
        let bytes = build(&[("a.txt", b"a".as_slice()), ("b.txt", b"b".as_slice())]);
        let envelope = decode(&bytes).unwrap();
        assert_eq!(envelope.files[1].title, "b.txt");
        assert!(matches!(
            envelope.into_single_file(),
            Err(Error::MultipleEnvelopeFiles(2))
        ));
    }

    #[test]
    fn test_empty_envelope() {
        let envelope = decode(&build(&[])).unwrap();
        assert!(matches!(
            envelope.into_single_file(),
            Err(Error::EmptyEnvelope)
        ));
    }

    #[test]
    fn test_bad_signature() {
        let err = decode(b"PK\x03\x04not-tnef").unwrap_err();
        assert!(matches!(err, Error::InvalidEnvelope(_)));
    }

    #[test]
    fn test_truncated_attribute() {
        let mut bytes = build(&[("a.txt", b"hello world".as_slice())]);
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(decode(&bytes), Err(Error::InvalidEnvelope(_))));
    }
}
