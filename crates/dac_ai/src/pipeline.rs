use std::sync::Arc;

use dac_core::analysis::{AnalysisEngine, AnalysisRequest, AnalysisResult};
use dac_core::config::AppConfig;
use dac_core::dataset::DatasetRef;
use dac_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::evidence::{EvidenceAssembler, EvidenceItem};
use crate::generate::{Answer, AnswerNote, GenerationOrchestrator};
use crate::prompt::{ConversationTurn, PromptComposer, TemplateName};
use crate::retrieve::Retriever;
use crate::store::ScopeFilter;

/// One user turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub dataset_ref: Option<DatasetRef>,
    #[serde(default)]
    pub analyses: Vec<AnalysisRequest>,
    #[serde(default)]
    pub scope: ScopeFilter,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_analyses(mut self, dataset_ref: DatasetRef, analyses: Vec<AnalysisRequest>) -> Self {
        self.dataset_ref = Some(dataset_ref);
        self.analyses = analyses;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_scope(mut self, scope: ScopeFilter) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

struct AnalysisBranch {
    results: Vec<AnalysisResult>,
    errors: Vec<AppError>,
}

fn run_analyses(engine: &AnalysisEngine, dataset_ref: Option<&DatasetRef>, analyses: &[AnalysisRequest]) -> AnalysisBranch {
    let mut branch = AnalysisBranch {
        results: Vec::new(),
        errors: Vec::new(),
    };
    let Some(dataset_ref) = dataset_ref else {
        if !analyses.is_empty() {
            branch.errors.push(
                AppError::new(codes::INVALID_PARAMETERS, "Analyses requested without a dataset")
                    .with_details(format!("analyses={}", analyses.len())),
            );
        }
        return branch;
    };
    for request in analyses {
        match engine.run_request(dataset_ref, request) {
            Ok(r) => branch.results.push(r),
            Err(e) => branch.errors.push(e),
        }
    }
    branch
}

fn join_error(branch: &str, e: tokio::task::JoinError) -> AppError {
    AppError::new(codes::INTERNAL_TASK_FAILED, "Pipeline task did not complete")
        .with_details(format!("branch={branch}; err={e}"))
}

fn summarize_errors(errors: &[AppError]) -> String {
    errors
        .iter()
        .map(|e| match &e.details {
            Some(d) => format!("{}: {}", e.code, d),
            None => format!("{}: {}", e.code, e.message),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Retrieval and analysis for one turn, joined into evidence and handed to generation.
pub struct QueryPipeline {
    retriever: Arc<Retriever>,
    engine: Arc<AnalysisEngine>,
    assembler: EvidenceAssembler,
    composer: PromptComposer,
    generator: GenerationOrchestrator,
    default_top_k: usize,
    evidence_budget: usize,
    default_template: String,
}

impl QueryPipeline {
    pub fn new(
        retriever: Arc<Retriever>,
        engine: Arc<AnalysisEngine>,
        generator: GenerationOrchestrator,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            retriever,
            engine,
            assembler: EvidenceAssembler::from_config(&cfg.evidence),
            composer: PromptComposer::from_config(&cfg.prompt),
            generator,
            default_top_k: cfg.retrieval.top_k,
            evidence_budget: cfg.evidence.budget_chars,
            default_template: cfg.prompt.default_template.clone(),
        }
    }

    /// Readiness of the model backend. Retrieval and analysis run in-process and need no
    /// check of their own.
    pub async fn ready(&self) -> Result<(), AppError> {
        self.generator.ready().await
    }

    pub async fn answer(&self, request: QueryRequest, cancel: &CancellationToken) -> Answer {
        let template_name = request
            .template
            .clone()
            .unwrap_or_else(|| self.default_template.clone());
        if let Err(e) = template_name.parse::<TemplateName>() {
            tracing::warn!(template = %template_name, "unknown prompt template");
            return Answer::failed(e, 0);
        }

        let retrieval = {
            let retriever = Arc::clone(&self.retriever);
            let query = request.query.clone();
            let scope = request.scope.clone();
            let top_k = request.top_k.unwrap_or(self.default_top_k);
            tokio::task::spawn_blocking(move || retriever.retrieve(&query, top_k, &scope))
        };
        let analysis = {
            let engine = Arc::clone(&self.engine);
            let dataset_ref = request.dataset_ref.clone();
            let analyses = request.analyses.clone();
            tokio::task::spawn_blocking(move || run_analyses(&engine, dataset_ref.as_ref(), &analyses))
        };

        let (retrieval, analysis) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Answer::failed(AppError::new(codes::GENERATION_CANCELLED, "Query was cancelled"), 0);
            }
            joined = async { tokio::join!(retrieval, analysis) } => joined,
        };

        let retrieval: Result<Vec<EvidenceItem>, AppError> =
            retrieval.unwrap_or_else(|e| Err(join_error("retrieval", e)));
        let analysis = analysis.unwrap_or_else(|e| AnalysisBranch {
            results: Vec::new(),
            errors: vec![join_error("analysis", e)],
        });

        let mut notes = Vec::new();
        let (retrieved, retrieval_failed) = match retrieval {
            Ok(items) => (items, false),
            Err(e) => {
                tracing::warn!(code = %e.code, "retrieval branch failed");
                notes.push(
                    AnswerNote::new(codes::RETRIEVAL_DEGRADED, "Document retrieval failed; answer uses analysis only")
                        .with_details(summarize_errors(std::slice::from_ref(&e))),
                );
                (Vec::new(), true)
            }
        };

        let analysis_requested = !request.analyses.is_empty();
        let analysis_failed = analysis_requested && analysis.results.is_empty();
        if !analysis.errors.is_empty() {
            tracing::warn!(failed = analysis.errors.len(), "analysis branch degraded");
            notes.push(
                AnswerNote::new(codes::ANALYSIS_DEGRADED, "One or more analyses failed")
                    .with_details(summarize_errors(&analysis.errors)),
            );
        }

        if retrieval_failed && (!analysis_requested || analysis_failed) {
            let mut answer = Answer::failed(
                AppError::new(codes::PIPELINE_ALL_BRANCHES_FAILED, "No evidence source succeeded")
                    .with_details(notes.iter().filter_map(|n| n.details.clone()).collect::<Vec<_>>().join(" | ")),
                0,
            );
            answer.notes = notes;
            return answer;
        }

        let assembled = self
            .assembler
            .assemble(retrieved, analysis.results, self.evidence_budget);
        if !assembled.dropped.is_empty() {
            let ids: Vec<&str> = assembled.dropped.iter().map(|d| d.id.as_str()).collect();
            notes.push(
                AnswerNote::new(codes::EVIDENCE_BUDGET_DROPPED, "Some evidence did not fit the budget")
                    .with_details(format!("ids={}", ids.join(","))),
            );
        }

        let prompt = match self
            .composer
            .compose(&template_name, assembled.items, &request.history, &request.query)
        {
            Ok(p) => p,
            Err(e) => {
                let mut answer = Answer::failed(e, 0);
                answer.notes = notes;
                return answer;
            }
        };

        let mut answer = self.generator.generate(&prompt, cancel).await;
        let degraded = retrieval_failed || !analysis.errors.is_empty();
        if degraded {
            answer.downgrade();
        }
        notes.append(&mut answer.notes);
        answer.notes = notes;

        tracing::info!(
            status = ?answer.status,
            evidence = answer.used_evidence_ids.len(),
            cited = answer.cited_evidence_ids.len(),
            degraded,
            "query answered"
        );
        answer
    }
}
