use std::fs;
use std::path::Path;

use dac_core::error::{codes, AppError};

use super::{ChunkingConfig, DocumentStore, IngestInput, IngestSummary, MetaValue, Metadata};
use crate::embeddings::Embedder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Text,
    Csv,
}

impl FileKind {
    fn from_path(path: &Path) -> Result<Self, AppError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" | "markdown" => Ok(FileKind::Text),
            "csv" => Ok(FileKind::Csv),
            _ => Err(AppError::new(codes::STORE_UNSUPPORTED_FILE, "Unsupported file type")
                .with_details(format!("path={}; extension={}", path.display(), ext))),
        }
    }
}

/// One paragraph per row, one `header: value` line per cell.
fn csv_rows_as_text(path: &Path, raw: &str) -> Result<String, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(raw.as_bytes());
    let headers = rdr
        .headers()
        .map_err(|e| {
            AppError::new(codes::STORE_INVALID_DOCUMENT, "Failed to read CSV headers")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?
        .clone();

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| {
            AppError::new(codes::STORE_INVALID_DOCUMENT, "Failed to parse CSV row")
                .with_details(format!("path={}; row={}; err={}", path.display(), idx + 1, e))
        })?;
        let lines: Vec<String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{}: {}", h.trim(), v.trim()))
            .collect();
        rows.push(lines.join("\n"));
    }
    Ok(rows.join("\n\n"))
}

impl DocumentStore {
    /// Reads a `.txt`, `.md`/`.markdown` or `.csv` file and ingests it as one document keyed
    /// by its canonical path, so ingesting the same file again replaces it. Every chunk
    /// carries `source` (the path) and `filename` metadata on top of `metadata`.
    pub fn ingest_file(
        &self,
        embedder: &dyn Embedder,
        path: &Path,
        metadata: Metadata,
        chunking: ChunkingConfig,
    ) -> Result<IngestSummary, AppError> {
        let kind = FileKind::from_path(path)?;
        let canonical = fs::canonicalize(path).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to resolve file path")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let raw = fs::read_to_string(&canonical).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to read file")
                .with_details(format!("path={}; err={}", canonical.display(), e))
        })?;
        let text = match kind {
            FileKind::Text => raw,
            FileKind::Csv => csv_rows_as_text(&canonical, &raw)?,
        };

        let source = canonical.display().to_string();
        let filename = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut metadata = metadata;
        metadata.insert("source".to_string(), MetaValue::from(source.as_str()));
        metadata.insert("filename".to_string(), MetaValue::from(filename.as_str()));

        tracing::debug!(path = %source, kind = ?kind, "ingesting file");
        self.ingest(
            embedder,
            IngestInput {
                document_id: source.clone(),
                source_uri: format!("file://{source}"),
                text,
                metadata,
            },
            chunking,
        )
    }
}
