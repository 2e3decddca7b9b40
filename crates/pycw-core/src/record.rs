//! Reading and writing `.dist-info/RECORD` files.

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{ConvertError, Result};

pub const HASH_ALGORITHM: &str = "sha256";

/// One installed file: destination path, `algorithm=digest` and byte length.
///
/// Rows order field by field, which is the order a rewritten RECORD is written in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRow {
    pub path: String,
    pub hash: String,
    pub size: String,
}

impl RecordRow {
    #[must_use]
    pub fn for_bytes(path: impl Into<String>, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            hash: record_hash(data),
            size: data.len().to_string(),
        }
    }
}

/// `sha256=<urlsafe base64 digest without padding>`.
#[must_use]
pub fn record_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("{HASH_ALGORITHM}={}", URL_SAFE_NO_PAD.encode(digest))
}

/// Parses RECORD text; `origin` only labels errors.
///
/// # Errors
/// Returns [`ConvertError::MalformedRecord`] for a row without exactly three fields.
pub fn parse_record(text: &str, origin: &Path) -> Result<Vec<RecordRow>> {
    let mut rows = Vec::new();
    for (index, line) in logical_lines(text).into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(&line);
        let [path, hash, size]: [String; 3] =
            fields
                .try_into()
                .map_err(|fields: Vec<String>| ConvertError::MalformedRecord {
                    path: origin.to_path_buf(),
                    line: index + 1,
                    found: fields.len(),
                })?;
        rows.push(RecordRow { path, hash, size });
    }
    Ok(rows)
}

/// Renders rows with minimal quoting, one `\n`-terminated line each.
#[must_use]
pub fn format_record<'a>(rows: impl IntoIterator<Item = &'a RecordRow>) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&quote_field(&row.path));
        out.push(',');
        out.push_str(&quote_field(&row.hash));
        out.push(',');
        out.push_str(&quote_field(&row.size));
        out.push('\n');
    }
    out
}

// Quoted fields may span line breaks, so lines are split outside quotes only.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '\r' if !in_quotes => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            '\n' if !in_quotes => lines.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    fields.push(field);
    fields
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
