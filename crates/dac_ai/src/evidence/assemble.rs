use std::cmp::Ordering;
use std::collections::BTreeSet;

use dac_core::analysis::AnalysisResult;
use dac_core::config::{AnalysisPriority, EvidenceConfig, TieBreak};
use serde::{Deserialize, Serialize};

use super::{EvidenceItem, EvidenceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedEvidence {
    pub id: String,
    pub kind: EvidenceKind,
    pub origin_id: String,
    pub relevance_score: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledEvidence {
    pub items: Vec<EvidenceItem>,
    pub total_size: usize,
    pub budget: usize,
    pub dropped: Vec<DroppedEvidence>,
}

impl AssembledEvidence {
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceAssembler {
    priority: AnalysisPriority,
    tie_break: TieBreak,
}

impl Default for EvidenceAssembler {
    fn default() -> Self {
        Self::new(AnalysisPriority::Pinned, TieBreak::AnalysisFirst)
    }
}

impl EvidenceAssembler {
    pub fn new(priority: AnalysisPriority, tie_break: TieBreak) -> Self {
        Self {
            priority,
            tie_break,
        }
    }

    pub fn from_config(cfg: &EvidenceConfig) -> Self {
        Self::new(cfg.analysis_priority, cfg.tie_break)
    }

    fn kind_rank(&self, kind: EvidenceKind) -> u8 {
        match (self.tie_break, kind) {
            (TieBreak::AnalysisFirst, EvidenceKind::Analysis) => 0,
            (TieBreak::AnalysisFirst, EvidenceKind::Chunk) => 1,
            (TieBreak::TextFirst, EvidenceKind::Chunk) => 0,
            (TieBreak::TextFirst, EvidenceKind::Analysis) => 1,
        }
    }

    /// Merges retrieved chunks (in retrieval order) and analysis results (in request order)
    /// into one list ordered by descending score, then tie policy, then insertion order.
    /// Items are taken greedily until the first one that would overflow `budget`; it and
    /// everything after it are dropped whole.
    pub fn assemble(
        &self,
        retrieved: Vec<EvidenceItem>,
        analyzed: Vec<AnalysisResult>,
        budget: usize,
    ) -> AssembledEvidence {
        let analysis_score = self.priority.score();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut ordered: Vec<(usize, EvidenceItem)> = retrieved
            .into_iter()
            .chain(
                analyzed
                    .into_iter()
                    .map(|r| EvidenceItem::from_analysis(r, analysis_score)),
            )
            .filter(|item| seen.insert(item.id.clone()))
            .enumerate()
            .collect();

        ordered.sort_by(|(ia, a), (ib, b)| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.kind_rank(a.kind()).cmp(&self.kind_rank(b.kind())))
                .then_with(|| ia.cmp(ib))
        });

        let mut items = Vec::new();
        let mut dropped = Vec::new();
        let mut total_size = 0usize;
        let mut overflowed = false;
        for (_, item) in ordered {
            let size = item.rendered_size();
            if !overflowed && total_size + size <= budget {
                total_size += size;
                items.push(item);
                continue;
            }
            overflowed = true;
            dropped.push(DroppedEvidence {
                id: item.id.clone(),
                kind: item.kind(),
                origin_id: item.provenance.origin_id.clone(),
                relevance_score: item.relevance_score,
                size,
            });
        }

        tracing::debug!(
            included = items.len(),
            dropped = dropped.len(),
            total_size,
            budget,
            "evidence assembled"
        );

        AssembledEvidence {
            items,
            total_size,
            budget,
            dropped,
        }
    }
}
