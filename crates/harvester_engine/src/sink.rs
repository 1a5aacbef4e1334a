use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use engine_logging::engine_debug;
use harvester_core::Item;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{CapabilityError, CapabilityErrorKind, Product, ResultSink};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Writes `{dir}/{filename}` through a temp file and a rename, so readers
/// never observe a half-written file.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        if target.exists() {
            fs::remove_file(&target)?;
        }
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// File name used for an item's results: the id with path-hostile
/// characters replaced, plus `.json`.
pub fn result_filename(item_id: &str) -> String {
    let mut stem: String = item_id
        .trim()
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let trimmed_len = stem.trim_end_matches(['.', ' ']).len();
    stem.truncate(trimmed_len);
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        stem = "item".to_string();
    }
    if is_reserved_windows_name(&stem) {
        stem.insert(0, '_');
    }
    format!("{stem}.json")
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultDocument<'a> {
    item_id: &'a str,
    display_name: &'a str,
    source_url: &'a str,
    collected_at: DateTime<Utc>,
    product_count: usize,
    products: &'a [Product],
}

/// Local [`ResultSink`]: one pretty-printed JSON document per item.
pub struct FileResultSink {
    writer: Arc<AtomicFileWriter>,
}

impl FileResultSink {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            writer: Arc::new(AtomicFileWriter::new(dir)),
        }
    }
}

#[async_trait::async_trait]
impl ResultSink for FileResultSink {
    async fn upload(&self, item: &Item, products: &[Product]) -> Result<u64, CapabilityError> {
        let document = ResultDocument {
            item_id: item.id.as_str(),
            display_name: item.label(),
            source_url: &item.source_url,
            collected_at: Utc::now(),
            product_count: products.len(),
            products,
        };
        let body = serde_json::to_vec_pretty(&document).map_err(|err| {
            CapabilityError::new(CapabilityErrorKind::InvalidRequest, err.to_string())
        })?;
        let filename = result_filename(item.id.as_str());

        let writer = Arc::clone(&self.writer);
        let written = tokio::task::spawn_blocking(move || writer.write(&filename, &body))
            .await
            .map_err(|err| CapabilityError::new(CapabilityErrorKind::Unavailable, err.to_string()))?
            .map_err(|err| CapabilityError::new(CapabilityErrorKind::Rejected, err.to_string()))?;

        engine_debug!("wrote {} products to {}", products.len(), written.display());
        Ok(products.len() as u64)
    }
}
