use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dac_core::canonical::sha256_hex;
use dac_core::error::{codes, AppError};

use crate::embeddings::Embedder;
use crate::retrieve::similarity;

pub mod chunking;
mod files;
pub mod model;
mod persist;

pub use chunking::{chunk_text, ChunkDraft, ChunkingConfig};
pub use model::{
    Chunk, Document, DocumentSummary, IngestSummary, MetaValue, Metadata, Metric, ScopeFilter,
    SearchHit,
};

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Arc<Chunk>,
    norm: f32,
}

#[derive(Debug, Clone)]
struct DocumentEntry {
    source_uri: String,
    chunk_ids: Vec<String>,
}

/// One immutable view of the store. Searches run against a snapshot they cloned the `Arc`
/// of; writers build a replacement and swap it in.
#[derive(Debug, Clone, Default)]
struct IndexSnapshot {
    generation: u64,
    documents: BTreeMap<String, DocumentEntry>,
    chunks: BTreeMap<String, IndexedChunk>,
}

/// Input for `DocumentStore::ingest`.
#[derive(Debug, Clone, Default)]
pub struct IngestInput {
    pub document_id: String,
    pub source_uri: String,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug)]
pub struct DocumentStore {
    metric: Metric,
    dims: usize,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    // Serializes writers so each builds from the latest snapshot.
    writer: Mutex<()>,
    ingest_counter: AtomicU64,
}

impl DocumentStore {
    pub fn new(metric: Metric, dims: usize) -> Self {
        Self {
            metric,
            dims,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(()),
            ingest_counter: AtomicU64::new(0),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, next: IndexSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    pub fn chunk_count(&self) -> usize {
        self.current().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_count() == 0
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<Arc<Chunk>> {
        self.current().chunks.get(chunk_id).map(|c| Arc::clone(&c.chunk))
    }

    pub fn source_uri(&self, document_id: &str) -> Option<String> {
        self.current()
            .documents
            .get(document_id)
            .map(|d| d.source_uri.clone())
    }

    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.current()
            .documents
            .iter()
            .map(|(id, d)| DocumentSummary {
                id: id.clone(),
                source_uri: d.source_uri.clone(),
                chunk_count: d.chunk_ids.len(),
            })
            .collect()
    }

    /// Full documents with their chunks in ordinal order.
    pub fn documents(&self) -> Vec<Document> {
        documents_of(&self.current())
    }

    fn validate_document(&self, doc: &Document, snap: &IndexSnapshot) -> Result<(), AppError> {
        if doc.id.trim().is_empty() {
            return Err(AppError::new(codes::STORE_INVALID_DOCUMENT, "Document id is required"));
        }
        if doc.chunks.is_empty() {
            return Err(AppError::new(codes::STORE_INVALID_DOCUMENT, "Document has no chunks")
                .with_details(format!("document_id={}", doc.id)));
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for c in &doc.chunks {
            if c.id.trim().is_empty() {
                return Err(AppError::new(codes::STORE_INVALID_DOCUMENT, "Chunk id is required")
                    .with_details(format!("document_id={}; ordinal={}", doc.id, c.ordinal)));
            }
            if c.document_id != doc.id {
                return Err(AppError::new(
                    codes::STORE_INVALID_DOCUMENT,
                    "Chunk belongs to a different document",
                )
                .with_details(format!(
                    "document_id={}; chunk_id={}; chunk_document_id={}",
                    doc.id, c.id, c.document_id
                )));
            }
            if !seen.insert(c.id.as_str()) {
                return Err(AppError::new(codes::STORE_CHUNK_ID_CONFLICT, "Duplicate chunk id in document")
                    .with_details(format!("document_id={}; chunk_id={}", doc.id, c.id)));
            }
            if c.embedding.len() != self.dims {
                return Err(AppError::new(
                    codes::STORE_DIMS_MISMATCH,
                    "Chunk embedding does not match store dimensionality",
                )
                .with_details(format!(
                    "chunk_id={}; expected={}; got={}",
                    c.id,
                    self.dims,
                    c.embedding.len()
                )));
            }
            if c.embedding.iter().any(|x| !x.is_finite()) {
                return Err(AppError::new(
                    codes::STORE_INVALID_DOCUMENT,
                    "Chunk embedding contains non-finite values",
                )
                .with_details(format!("chunk_id={}", c.id)));
            }
            if let Some(existing) = snap.chunks.get(&c.id) {
                if existing.chunk.document_id != doc.id {
                    return Err(AppError::new(
                        codes::STORE_CHUNK_ID_CONFLICT,
                        "Chunk id already belongs to another document",
                    )
                    .with_details(format!(
                        "chunk_id={}; owner={}",
                        c.id, existing.chunk.document_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Inserts or wholesale replaces a document. Readers see either the previous chunk set or
    /// the new one. Returns how many chunks were replaced.
    pub fn upsert(&self, doc: Document) -> Result<usize, AppError> {
        self.upsert_at_generation(doc).map(|(replaced, _)| replaced)
    }

    /// Like `upsert`, also returning the generation this write swapped in.
    fn upsert_at_generation(&self, doc: Document) -> Result<(usize, u64), AppError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.current();
        self.validate_document(&doc, &base)?;

        let mut next: IndexSnapshot = (*base).clone();
        let replaced = remove_document(&mut next, &doc.id);

        let chunk_ids: Vec<String> = doc.chunks.iter().map(|c| c.id.clone()).collect();
        for c in doc.chunks {
            let norm = similarity::l2_norm(&c.embedding);
            next.chunks.insert(
                c.id.clone(),
                IndexedChunk {
                    chunk: Arc::new(c),
                    norm,
                },
            );
        }
        next.documents.insert(
            doc.id.clone(),
            DocumentEntry {
                source_uri: doc.source_uri,
                chunk_ids,
            },
        );
        next.generation = base.generation + 1;
        let generation = next.generation;
        self.swap(next);

        tracing::info!(
            document_id = %doc.id,
            replaced_chunks = replaced,
            generation,
            "document upserted"
        );
        Ok((replaced, generation))
    }

    /// Removes a document and its chunks. Returns false when it was not present.
    pub fn delete(&self, document_id: &str) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.current();
        if !base.documents.contains_key(document_id) {
            return false;
        }
        let mut next: IndexSnapshot = (*base).clone();
        let removed = remove_document(&mut next, document_id);
        next.generation = base.generation + 1;
        self.swap(next);
        tracing::info!(document_id, removed_chunks = removed, "document deleted");
        true
    }

    /// Chunks, embeds (no lock held) and upserts raw text as one document.
    pub fn ingest(
        &self,
        embedder: &dyn Embedder,
        input: IngestInput,
        chunking: ChunkingConfig,
    ) -> Result<IngestSummary, AppError> {
        if input.document_id.trim().is_empty() {
            return Err(AppError::new(codes::STORE_INVALID_DOCUMENT, "Document id is required"));
        }
        if embedder.dims() != self.dims {
            return Err(AppError::new(
                codes::STORE_DIMS_MISMATCH,
                "Embedder dimensionality does not match store",
            )
            .with_details(format!("store={}; embedder={}", self.dims, embedder.dims())));
        }
        let drafts = chunk_text(&input.text, chunking);
        if drafts.is_empty() {
            return Err(AppError::new(codes::STORE_INVALID_DOCUMENT, "Document text is empty")
                .with_details(format!("document_id={}", input.document_id)));
        }

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != drafts.len() {
            return Err(AppError::new(
                codes::EMBEDDING_FAILED,
                "Embedder returned a different number of vectors than inputs",
            )
            .with_details(format!("inputs={}; vectors={}", drafts.len(), vectors.len())));
        }

        let ingest_no = self.ingest_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .zip(vectors)
            .map(|(d, embedding)| {
                let text_sha256 = sha256_hex(d.text.as_bytes());
                let id = chunk_id(&input.document_id, ingest_no, d.ordinal, &text_sha256);
                Chunk {
                    id,
                    document_id: input.document_id.clone(),
                    ordinal: d.ordinal,
                    text: d.text,
                    text_sha256,
                    embedding,
                    metadata: input.metadata.clone(),
                }
            })
            .collect();
        let chunk_count = chunks.len();

        let (replaced_chunks, generation) = self.upsert_at_generation(Document {
            id: input.document_id.clone(),
            source_uri: input.source_uri,
            chunks,
        })?;

        Ok(IngestSummary {
            document_id: input.document_id,
            chunk_count,
            replaced_chunks,
            generation,
        })
    }

    /// The `top_k` nearest chunks that satisfy `filter`, nearest first; equal distances are
    /// ordered by chunk id. The filter is applied while collecting candidates.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &ScopeFilter,
    ) -> Result<Vec<SearchHit>, AppError> {
        if query.len() != self.dims {
            return Err(AppError::new(
                codes::STORE_DIMS_MISMATCH,
                "Query vector does not match store dimensionality",
            )
            .with_details(format!("expected={}; got={}", self.dims, query.len())));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let snap = self.current();
        let qnorm = similarity::l2_norm(query);

        let mut scored: Vec<(&IndexedChunk, f32)> = Vec::new();
        for ic in snap.chunks.values() {
            if !filter.is_empty() && !filter.matches(&ic.chunk.metadata) {
                continue;
            }
            let distance = match self.metric {
                Metric::Cosine => {
                    if qnorm == 0.0 || ic.norm == 0.0 {
                        continue;
                    }
                    1.0 - similarity::cosine_similarity(query, &ic.chunk.embedding, qnorm, ic.norm)
                }
                Metric::InnerProduct => -similarity::dot(query, &ic.chunk.embedding),
            };
            scored.push((ic, distance));
        }

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.chunk.id.cmp(&b.0.chunk.id)));
        scored.truncate(top_k);

        let hits: Vec<SearchHit> = scored
            .into_iter()
            .map(|(ic, distance)| SearchHit {
                chunk: Arc::clone(&ic.chunk),
                source_uri: snap
                    .documents
                    .get(&ic.chunk.document_id)
                    .map(|d| d.source_uri.clone())
                    .unwrap_or_default(),
                distance,
            })
            .collect();

        tracing::debug!(
            top_k,
            hits = hits.len(),
            generation = snap.generation,
            "store search"
        );
        Ok(hits)
    }
}

fn documents_of(snap: &IndexSnapshot) -> Vec<Document> {
    snap.documents
        .iter()
        .map(|(id, d)| Document {
            id: id.clone(),
            source_uri: d.source_uri.clone(),
            chunks: d
                .chunk_ids
                .iter()
                .filter_map(|cid| snap.chunks.get(cid))
                .map(|c| (*c.chunk).clone())
                .collect(),
        })
        .collect()
}

fn remove_document(snap: &mut IndexSnapshot, document_id: &str) -> usize {
    match snap.documents.remove(document_id) {
        Some(entry) => {
            for cid in &entry.chunk_ids {
                snap.chunks.remove(cid);
            }
            entry.chunk_ids.len()
        }
        None => 0,
    }
}

/// Chunk ids are unique per ingestion: the same text ingested twice gets new ids.
pub fn chunk_id(document_id: &str, ingest_no: u64, ordinal: u32, text_sha256: &str) -> String {
    let input = format!("v1|{}|{}|{}|{}", document_id, ingest_no, ordinal, text_sha256);
    sha256_hex(input.as_bytes())
}
