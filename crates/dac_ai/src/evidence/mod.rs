use dac_core::analysis::AnalysisResult;
use serde::{Deserialize, Serialize};

use crate::store::Chunk;

mod assemble;

pub use assemble::{AssembledEvidence, DroppedEvidence, EvidenceAssembler};

/// Separator placed between evidence blocks in a prompt; counted against the budget.
pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Chunk,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub kind: EvidenceKind,
    /// Chunk id, or the analysis result digest.
    pub origin_id: String,
    /// Document id, or the dataset ref.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceBody {
    Chunk {
        chunk_id: String,
        document_id: String,
        source_uri: String,
        ordinal: u32,
        text: String,
    },
    Analysis {
        result: AnalysisResult,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub relevance_score: f64,
    pub provenance: Provenance,
    pub body: EvidenceBody,
}

pub fn chunk_evidence_id(chunk_id: &str) -> String {
    format!("chunk:{chunk_id}")
}

pub fn analysis_evidence_id(result: &AnalysisResult) -> String {
    let digest = result.digest();
    format!("analysis:{}:{}", result.operation_name, &digest[..12])
}

fn normalize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

impl EvidenceItem {
    pub fn from_chunk(chunk: &Chunk, source_uri: &str, relevance_score: f64) -> Self {
        Self {
            id: chunk_evidence_id(&chunk.id),
            relevance_score: normalize_score(relevance_score),
            provenance: Provenance {
                kind: EvidenceKind::Chunk,
                origin_id: chunk.id.clone(),
                source: chunk.document_id.clone(),
            },
            body: EvidenceBody::Chunk {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                source_uri: source_uri.to_string(),
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
            },
        }
    }

    pub fn from_analysis(result: AnalysisResult, relevance_score: f64) -> Self {
        let digest = result.digest();
        Self {
            id: analysis_evidence_id(&result),
            relevance_score: normalize_score(relevance_score),
            provenance: Provenance {
                kind: EvidenceKind::Analysis,
                origin_id: digest,
                source: result.dataset_ref.to_string(),
            },
            body: EvidenceBody::Analysis { result },
        }
    }

    pub fn kind(&self) -> EvidenceKind {
        self.provenance.kind
    }

    /// The exact block placed in a prompt. The leading marker is what a model cites.
    pub fn render(&self) -> String {
        match &self.body {
            EvidenceBody::Chunk {
                source_uri,
                ordinal,
                text,
                ..
            } => format!(
                "[[{}]] source={} part={} relevance={:.3}\n{}",
                self.id,
                source_uri,
                ordinal,
                self.relevance_score,
                text.trim()
            ),
            EvidenceBody::Analysis { result } => {
                let params = serde_json::to_string(&result.parameters).unwrap_or_default();
                let value = serde_json::to_string(&result.value).unwrap_or_default();
                format!(
                    "[[{}]] analysis={} v{} dataset={} params={} truncated={} relevance={:.3}\n{}",
                    self.id,
                    result.operation_name,
                    result.operation_version,
                    result.dataset_ref,
                    params,
                    result.truncated,
                    self.relevance_score,
                    value
                )
            }
        }
    }

    /// Characters this item costs in the evidence section, separator included.
    pub fn rendered_size(&self) -> usize {
        self.render().chars().count() + BLOCK_SEPARATOR.chars().count()
    }
}

pub fn render_evidence_section(items: &[EvidenceItem]) -> String {
    items
        .iter()
        .map(EvidenceItem::render)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}
