use std::collections::BTreeMap;
use std::sync::Arc;

use dac_core::config::RetrievalConfig;
use dac_core::error::{codes, AppError};

use crate::embeddings::Embedder;
use crate::evidence::EvidenceItem;
use crate::store::{DocumentStore, ScopeFilter, SearchHit};

pub mod similarity;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<DocumentStore>,
    max_per_document: usize,
    candidate_multiplier: usize,
}

fn retrieval_error(message: &str, cause: AppError) -> AppError {
    AppError::new(codes::RETRIEVAL_FAILED, message)
        .with_details(format!(
            "cause={}; {}",
            cause.code,
            cause.details.clone().unwrap_or_else(|| cause.message.clone())
        ))
        .with_retryable(cause.retryable)
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<DocumentStore>, cfg: &RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            max_per_document: cfg.max_per_document.max(1),
            candidate_multiplier: cfg.candidate_multiplier.max(1),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Ranked chunk evidence for `query`, at most `max_per_document` per document and at most
    /// `top_k` overall. An empty store is an empty result, not an error.
    pub fn retrieve(&self, query: &str, top_k: usize, scope: &ScopeFilter) -> Result<Vec<EvidenceItem>, AppError> {
        let q = query.trim();
        if q.is_empty() {
            return Err(AppError::new(codes::RETRIEVAL_FAILED, "Query must not be empty"));
        }
        if top_k == 0 || self.store.is_empty() {
            return Ok(Vec::new());
        }

        let qv = self
            .embedder
            .embed(q)
            .map_err(|e| retrieval_error("Failed to embed query", e))?;
        if qv.len() != self.store.dims() {
            return Err(AppError::new(
                codes::RETRIEVAL_FAILED,
                "Query embedding dims do not match store dims",
            )
            .with_details(format!("store_dims={}; query_dims={}", self.store.dims(), qv.len())));
        }

        // Over-fetch so the per-document cap does not starve top_k; widen while the store
        // still had more candidates than were asked for.
        let mut fetch = top_k.saturating_mul(self.candidate_multiplier);
        let capped = loop {
            let hits = self
                .store
                .search(&qv, fetch, scope)
                .map_err(|e| retrieval_error("Store search failed", e))?;
            let exhausted = hits.len() < fetch;
            let capped = cap_per_document(hits, self.max_per_document, top_k);
            if capped.len() >= top_k || exhausted {
                break capped;
            }
            fetch = fetch.saturating_mul(2);
        };

        let metric = self.store.metric();
        let items: Vec<EvidenceItem> = capped
            .iter()
            .map(|h| EvidenceItem::from_chunk(&h.chunk, &h.source_uri, metric.relevance(h.distance)))
            .collect();

        tracing::info!(
            top_k,
            returned = items.len(),
            scoped = !scope.is_empty(),
            "retrieval complete"
        );
        Ok(items)
    }
}

fn cap_per_document(hits: Vec<SearchHit>, max_per_document: usize, top_k: usize) -> Vec<SearchHit> {
    let mut per_doc: BTreeMap<String, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(top_k);
    for h in hits {
        let n = per_doc.entry(h.chunk.document_id.clone()).or_insert(0);
        if *n >= max_per_document {
            continue;
        }
        *n += 1;
        out.push(h);
        if out.len() == top_k {
            break;
        }
    }
    out
}
