use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::PoisonError;

use dac_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::{documents_of, Document, DocumentStore, Metric};

pub const SNAPSHOT_FILE: &str = "store_snapshot.json";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    metric: Metric,
    dims: usize,
    generation: u64,
    ingest_counter: u64,
    documents: Vec<Document>,
}

impl DocumentStore {
    /// Writes the current snapshot to `<dir>/store_snapshot.json` (tmp file + rename).
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to create store directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;

        // Generation and documents come from one snapshot. The counter is read after it, so
        // it is never behind an ingestion number the snapshot contains.
        let snap = self.current();
        let file = StoreFile {
            version: SNAPSHOT_VERSION,
            metric: self.metric,
            dims: self.dims,
            generation: snap.generation,
            ingest_counter: self.ingest_counter.load(Ordering::SeqCst),
            documents: documents_of(&snap),
        };

        let path = dir.join(SNAPSHOT_FILE);
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string(&file).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to encode store snapshot")
                .with_details(e.to_string())
        })?;
        fs::write(&tmp, json.as_bytes()).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to write store snapshot")
                .with_details(format!("path={}; err={}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to finalize store snapshot write")
                .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            documents = file.documents.len(),
            generation = file.generation,
            "store snapshot persisted"
        );
        Ok(path)
    }

    /// Rebuilds a store from `<dir>/store_snapshot.json`. The file must have been written
    /// with the same metric and dimensionality.
    pub fn load(dir: &Path, metric: Metric, dims: usize) -> Result<DocumentStore, AppError> {
        let path = dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Err(AppError::new(codes::STORE_NOT_FOUND, "Store snapshot not found")
                .with_details(format!("path={}", path.display())));
        }
        let bytes = fs::read(&path).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to read store snapshot")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::new(codes::STORE_IO_FAILED, "Failed to decode store snapshot")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        if file.version != SNAPSHOT_VERSION {
            return Err(AppError::new(codes::STORE_IO_FAILED, "Unsupported store snapshot version")
                .with_details(format!("version={}", file.version)));
        }
        if file.metric != metric || file.dims != dims {
            return Err(AppError::new(
                codes::STORE_DIMS_MISMATCH,
                "Store snapshot was written with a different metric or dimensionality",
            )
            .with_details(format!(
                "file_metric={:?}; file_dims={}; metric={:?}; dims={}",
                file.metric, file.dims, metric, dims
            )));
        }

        let store = DocumentStore::new(metric, dims);
        for doc in file.documents {
            store.upsert(doc)?;
        }
        {
            let _writer = store.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let mut next = (*store.current()).clone();
            next.generation = file.generation;
            store.swap(next);
        }
        store.ingest_counter.store(file.ingest_counter, Ordering::SeqCst);
        Ok(store)
    }
}
