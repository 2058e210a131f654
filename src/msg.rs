//! Outlook `.msg` reader.
//!
//! A `.msg` file is an OLE compound file. Each attachment is a storage named
//! `__attach_version1.0_#XXXXXXXX` holding MAPI property streams; we only read
//! the name and binary data properties.
use anyhow::{Context, Result};
use cfb::CompoundFile;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

pub const ATTACH_STORAGE_PREFIX: &str = "__attach_version1.0_#";

const PROP_SUBJECT: &str = "0037";
const PROP_ATTACH_LONG_FILENAME: &str = "3707";
const PROP_ATTACH_FILENAME: &str = "3704";
const PROP_DISPLAY_NAME: &str = "3001";
pub const ATTACH_DATA_STREAM: &str = "__substg1.0_37010102";

const TYPE_UNICODE: &str = "001F";
const TYPE_STRING8: &str = "001E";

#[derive(Debug, Clone)]
pub struct MailMessage {
    pub subject: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

/// Read and parse a `.msg` file from disk.
pub fn open(path: &Path) -> Result<MailMessage> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    parse(bytes).with_context(|| format!("parse message {}", path.display()))
}

/// Parse an in-memory `.msg` file.
pub fn parse(bytes: Vec<u8>) -> Result<MailMessage> {
    let mut comp = CompoundFile::open(Cursor::new(bytes)).context("open OLE compound file")?;
    read_message(&mut comp)
}

fn read_message<F: Read + Seek>(comp: &mut CompoundFile<F>) -> Result<MailMessage> {
    let mut storages: Vec<String> = comp
        .read_root_storage()
        .filter(|entry| entry.is_storage() && entry.name().starts_with(ATTACH_STORAGE_PREFIX))
        .map(|entry| entry.name().to_string())
        .collect();
    // Storage suffixes are fixed-width hex, so lexical order is index order.
    storages.sort();

    let root = PathBuf::from("/");
    let subject = read_string_prop(comp, &root, PROP_SUBJECT)?;

    let mut attachments = Vec::new();
    for storage in storages {
        let dir = root.join(&storage);
        match read_attachment(comp, &dir)? {
            Some(attachment) => attachments.push(attachment),
            None => tracing::debug!(storage = %storage, "skip attachment without name or data"),
        }
    }

    Ok(MailMessage {
        subject,
        attachments,
    })
}

fn read_attachment<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    dir: &Path,
) -> Result<Option<Attachment>> {
    let mut name = None;
    for prop in [
        PROP_ATTACH_LONG_FILENAME,
        PROP_ATTACH_FILENAME,
        PROP_DISPLAY_NAME,
    ] {
        name = read_string_prop(comp, dir, prop)?;
        if name.is_some() {
            break;
        }
    }
    let Some(name) = name else {
        return Ok(None);
    };

    let data_path = dir.join(ATTACH_DATA_STREAM);
    if !comp.is_stream(&data_path) {
        return Ok(None);
    }
    let data = read_stream(comp, &data_path)?;
    Ok(Some(Attachment { name, data }))
}

fn read_string_prop<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    dir: &Path,
    prop: &str,
) -> Result<Option<String>> {
    let unicode = dir.join(format!("__substg1.0_{prop}{TYPE_UNICODE}"));
    let text = if comp.is_stream(&unicode) {
        decode_utf16le(&read_stream(comp, &unicode)?)
    } else {
        let string8 = dir.join(format!("__substg1.0_{prop}{TYPE_STRING8}"));
        if !comp.is_stream(&string8) {
            return Ok(None);
        }
        String::from_utf8_lossy(&read_stream(comp, &string8)?).into_owned()
    };
    let text = text.trim_end_matches('\0').trim();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(text.to_string()))
}

fn read_stream<F: Read + Seek>(comp: &mut CompoundFile<F>, path: &Path) -> Result<Vec<u8>> {
    let mut stream = comp
        .open_stream(path)
        .with_context(|| format!("open stream {}", path.display()))?;
    let mut bytes = Vec::new();
    stream
        .read_to_end(&mut bytes)
        .with_context(|| format!("read stream {}", path.display()))?;
    Ok(bytes)
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixture::{attach_storage_name, build_msg, named, FixtureAttachment};
    use super::*;

    #[test]
    fn parses_subject_and_attachments_in_index_order() {
        let bytes = build_msg(
            Some("Q2 marine bordereaux"),
            &[
                named("Marine_Q2.pdf", b"%PDF-1.4 one"),
                named("cover.docx", b"docx"),
            ],
        );
        let message = parse(bytes).expect("parse msg");
        assert_eq!(message.subject.as_deref(), Some("Q2 marine bordereaux"));
        let names: Vec<&str> = message.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Marine_Q2.pdf", "cover.docx"]);
        assert_eq!(message.attachments[0].data, b"%PDF-1.4 one".to_vec());
    }

    #[test]
    fn falls_back_to_short_filename() {
        let bytes = build_msg(
            None,
            &[FixtureAttachment {
                long_name: None,
                short_name: Some("MARINE~1.PDF"),
                data: Some(b"pdf"),
            }],
        );
        let message = parse(bytes).expect("parse msg");
        assert_eq!(message.subject, None);
        assert_eq!(message.attachments[0].name, "MARINE~1.PDF");
    }

    #[test]
    fn skips_attachments_missing_name_or_data() {
        let bytes = build_msg(
            None,
            &[
                FixtureAttachment {
                    long_name: None,
                    short_name: None,
                    data: Some(b"orphan"),
                },
                FixtureAttachment {
                    long_name: Some("embedded.msg"),
                    short_name: None,
                    data: None,
                },
                named("marine.pdf", b"pdf"),
            ],
        );
        let message = parse(bytes).expect("parse msg");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].name, "marine.pdf");
    }

    #[test]
    fn rejects_non_compound_input() {
        let err = parse(b"not an ole file".to_vec()).unwrap_err();
        assert!(err.to_string().contains("compound file"));
    }

    #[test]
    fn storage_names_are_fixed_width_hex() {
        assert_eq!(
            attach_storage_name(26),
            "__attach_version1.0_#0000001A"
        );
    }
}
