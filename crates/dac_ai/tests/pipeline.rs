use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dac_ai::embeddings::Embedder;
use dac_ai::evidence::{EvidenceBody, EvidenceKind};
use dac_ai::generate::{AnswerStatus, GenerationOrchestrator, RetryPolicy};
use dac_ai::llm::LlmClient;
use dac_ai::pipeline::{QueryPipeline, QueryRequest};
use dac_ai::prompt::PromptRequest;
use dac_ai::retrieve::Retriever;
use dac_ai::store::{ChunkingConfig, DocumentStore, IngestInput, Metadata, Metric};
use dac_core::analysis::{AnalysisEngine, AnalysisRequest, FixedClock};
use dac_core::config::AppConfig;
use dac_core::dataset::{DatasetRef, InMemoryDatasets, Table};
use dac_core::error::AppError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const SALES_CSV: &str = "\
month,region,sales
February,north,95
March,north,120
March,south,100
March,east,140
April,south,130
";

struct CountABEmbedder;

impl Embedder for CountABEmbedder {
    fn dims(&self) -> usize {
        3
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let a = input.chars().filter(|c| *c == 'a').count();
        let b = input.chars().filter(|c| *c == 'b').count();
        Ok(vec![a as f32, b as f32, 1.0])
    }
}

/// Embeds for ingestion, then fails every later call.
struct FlakyEmbedder {
    remaining: AtomicU32,
}

impl Embedder for FlakyEmbedder {
    fn dims(&self) -> usize {
        3
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(AppError::new("AI_EMBEDDING_FAILED", "Failed to call embeddings endpoint").with_retryable(true));
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        CountABEmbedder.embed(input)
    }
}

/// Cites every evidence id it was shown and records the request.
#[derive(Default)]
struct CitingLlm {
    calls: AtomicU32,
    seen: Mutex<Option<PromptRequest>>,
}

#[async_trait]
impl LlmClient for CitingLlm {
    fn name(&self) -> &str {
        "citing"
    }

    async fn complete(&self, request: &PromptRequest, _timeout: Duration) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = Some(request.clone());
        let markers: Vec<String> = request.evidence().iter().map(|e| format!("[[{}]]", e.id)).collect();
        Ok(format!("Average March sales were 120 {}.", markers.join(" ")))
    }
}

/// A backend whose runtime answers health checks with a server error.
struct DownLlm;

#[async_trait]
impl LlmClient for DownLlm {
    fn name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _request: &PromptRequest, _timeout: Duration) -> Result<String, AppError> {
        Err(AppError::new("AI_LLM_REQUEST_FAILED", "Failed to call generate endpoint").with_retryable(true))
    }

    async fn health(&self) -> Result<(), AppError> {
        Err(AppError::new("AI_OLLAMA_UNHEALTHY", "Ollama health check failed")
            .with_details("status=503")
            .with_retryable(true))
    }
}

struct Fixture {
    pipeline: QueryPipeline,
    llm: Arc<CitingLlm>,
}

fn fixture(embedder: Arc<dyn Embedder>, store: Arc<DocumentStore>, cfg: AppConfig) -> Fixture {
    let datasets = Arc::new(InMemoryDatasets::new());
    datasets.register(DatasetRef::new("sales"), Table::from_csv_str(SALES_CSV).expect("csv"));
    let engine = AnalysisEngine::new(datasets, &cfg.analysis)
        .with_clock(Arc::new(FixedClock("2026-03-31T12:00:00Z".to_string())));
    let retriever = Retriever::new(embedder, store, &cfg.retrieval);
    let llm = Arc::new(CitingLlm::default());
    let generator = GenerationOrchestrator::new(llm.clone(), RetryPolicy::from(&cfg.generation));
    Fixture {
        pipeline: QueryPipeline::new(Arc::new(retriever), Arc::new(engine), generator, &cfg),
        llm,
    }
}

fn store_with_notes(embedder: &dyn Embedder) -> Arc<DocumentStore> {
    let store = DocumentStore::new(Metric::Cosine, 3);
    store
        .ingest(
            embedder,
            IngestInput {
                document_id: "notes".to_string(),
                source_uri: "file:///notes.md".to_string(),
                text: "Sales are recorded per region and month.\n\nThe east region opened in March.".to_string(),
                metadata: Metadata::new(),
            },
            ChunkingConfig {
                max_chars: 50,
                overlap_chars: 0,
            },
        )
        .expect("ingest");
    Arc::new(store)
}

fn march_mean() -> AnalysisRequest {
    AnalysisRequest::new("summary_statistics")
        .param("column", json!("sales"))
        .param("where", json!({"month": "March"}))
}

#[tokio::test]
async fn average_sales_in_march_is_cited_from_analysis() {
    let store = store_with_notes(&CountABEmbedder);
    let f = fixture(Arc::new(CountABEmbedder), store, AppConfig::default());

    let answer = f
        .pipeline
        .answer(
            QueryRequest::new("average sales in March").with_analyses(DatasetRef::new("sales"), vec![march_mean()]),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(answer.status, AnswerStatus::Success);
    assert!(answer.grounded);

    let seen = f.llm.seen.lock().unwrap().clone().expect("request");
    let evidence = seen.evidence();
    assert_eq!(evidence[0].kind(), EvidenceKind::Analysis);
    assert!(evidence[1..].iter().all(|e| e.kind() == EvidenceKind::Chunk));
    match &evidence[0].body {
        EvidenceBody::Analysis { result } => {
            assert_eq!(result.operation_name, "summary_statistics");
            assert_eq!(result.value["mean"], json!(120.0));
        }
        other => panic!("unexpected body: {other:?}"),
    }
    assert!(answer.cited_evidence_ids.contains(&evidence[0].id));
    assert!(answer.used_evidence_ids.is_subset(&seen.evidence_ids()));
}

#[tokio::test]
async fn empty_store_still_answers_from_analysis() {
    let f = fixture(
        Arc::new(CountABEmbedder),
        Arc::new(DocumentStore::new(Metric::Cosine, 3)),
        AppConfig::default(),
    );
    let answer = f
        .pipeline
        .answer(
            QueryRequest::new("average sales in March").with_analyses(DatasetRef::new("sales"), vec![march_mean()]),
            &CancellationToken::new(),
        )
        .await;

    assert_ne!(answer.status, AnswerStatus::Failed);
    assert_eq!(answer.used_evidence_ids.len(), 1);
    assert!(answer.used_evidence_ids.iter().all(|id| id.starts_with("analysis:summary_statistics:")));
}

#[tokio::test]
async fn all_branches_failing_skips_the_model() {
    let embedder = FlakyEmbedder {
        remaining: AtomicU32::new(2),
    };
    let store = store_with_notes(&embedder);
    let f = fixture(Arc::new(embedder), store, AppConfig::default());

    let answer = f
        .pipeline
        .answer(
            QueryRequest::new("average sales in March")
                .with_analyses(DatasetRef::new("inventory"), vec![march_mean()]),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(answer.status, AnswerStatus::Failed);
    assert_eq!(answer.error.as_ref().map(|e| e.code.as_str()), Some("PIPELINE_ALL_BRANCHES_FAILED"));
    assert!(answer.has_note("RETRIEVAL_DEGRADED"));
    assert!(answer.has_note("ANALYSIS_DEGRADED"));
    assert_eq!(f.llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retrieval_failure_degrades_to_partial() {
    let embedder = FlakyEmbedder {
        remaining: AtomicU32::new(2),
    };
    let store = store_with_notes(&embedder);
    let f = fixture(Arc::new(embedder), store, AppConfig::default());

    let answer = f
        .pipeline
        .answer(
            QueryRequest::new("average sales in March").with_analyses(DatasetRef::new("sales"), vec![march_mean()]),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(answer.status, AnswerStatus::Partial);
    assert!(answer.has_note("RETRIEVAL_DEGRADED"));
    assert_eq!(answer.cited_evidence_ids.len(), 1);
    assert_eq!(f.llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_template_fails_before_any_work() {
    let f = fixture(
        Arc::new(CountABEmbedder),
        Arc::new(DocumentStore::new(Metric::Cosine, 3)),
        AppConfig::default(),
    );
    let answer = f
        .pipeline
        .answer(
            QueryRequest::new("average sales in March").with_template("chart_maker"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(answer.status, AnswerStatus::Failed);
    assert_eq!(answer.error.map(|e| e.code), Some("PROMPT_TEMPLATE_NOT_FOUND".to_string()));
    assert_eq!(f.llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn evidence_over_budget_is_noted() {
    let store = store_with_notes(&CountABEmbedder);
    let mut cfg = AppConfig::default();
    cfg.evidence.budget_chars = 1;
    let f = fixture(Arc::new(CountABEmbedder), store, cfg);

    let answer = f
        .pipeline
        .answer(QueryRequest::new("where are sales recorded"), &CancellationToken::new())
        .await;

    assert!(answer.has_note("EVIDENCE_BUDGET_DROPPED"));
    assert!(answer.used_evidence_ids.is_empty());
    assert!(answer.has_note("ANSWER_UNGROUNDED"));
    assert_eq!(answer.status, AnswerStatus::Partial);
}

#[tokio::test]
async fn readiness_reflects_model_backend_health() {
    let cfg = AppConfig::default();
    let f = fixture(
        Arc::new(CountABEmbedder),
        Arc::new(DocumentStore::new(Metric::Cosine, 3)),
        cfg.clone(),
    );
    assert!(f.pipeline.ready().await.is_ok());

    let datasets = Arc::new(InMemoryDatasets::new());
    let engine = AnalysisEngine::new(datasets, &cfg.analysis);
    let retriever = Retriever::new(
        Arc::new(CountABEmbedder),
        Arc::new(DocumentStore::new(Metric::Cosine, 3)),
        &cfg.retrieval,
    );
    let generator = GenerationOrchestrator::new(Arc::new(DownLlm), RetryPolicy::from(&cfg.generation));
    let down = QueryPipeline::new(Arc::new(retriever), Arc::new(engine), generator, &cfg);

    let err = down.ready().await.unwrap_err();
    assert_eq!(err.code, "AI_OLLAMA_UNHEALTHY");
    assert!(err.retryable);
}
