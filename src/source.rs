//! Source file readers

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::table::{Table, Value};

/// Extensions read as comma-separated text
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "txt"];

/// Errors raised while reading a source file
#[derive(Error, Debug)]
pub enum SourceError {
    /// File could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File has no header or no data rows
    #[error("No data rows in {0}")]
    Empty(PathBuf),

    /// File type has no reader (e.g. spreadsheets)
    #[error("Unsupported file format '.{extension}': {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// Malformed delimited text
    #[error("Malformed CSV in {path}: {reason}")]
    Csv { path: PathBuf, reason: String },
}

/// Decode file bytes as UTF-8, falling back to Windows-1252.
///
/// Windows-1252 is a superset of the Latin-1 family older exports use, so the
/// fallback never fails; undecodable bytes are replaced.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, &'static str) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), "utf-8"),
        Err(_) => {
            let (text, had_errors) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
            if had_errors {
                warn!("Replaced undecodable bytes while reading as windows-1252");
            }
            (text, "windows-1252")
        }
    }
}

/// Read a comma-separated file into a raw batch of text cells.
///
/// Empty cells become nulls and header names are trimmed. Rows may be shorter
/// or longer than the header; they are padded or cut to fit.
pub fn read_csv(path: &Path) -> Result<Table, SourceError> {
    if let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) {
        if !DELIMITED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(SourceError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: ext,
            });
        }
    }

    let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, encoding) = decode_text(&bytes);
    debug!(path = %path.display(), encoding, bytes = bytes.len(), "Decoded source file");

    let csv_error = |e: csv::Error| SourceError::Csv {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(SourceError::Empty(path.to_path_buf()));
    }

    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        table.push_row(record.iter().map(Value::text).collect());
    }

    if table.is_empty() {
        return Err(SourceError::Empty(path.to_path_buf()));
    }
    Ok(table)
}
