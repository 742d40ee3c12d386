use std::fmt;
use std::str::FromStr;

use dac_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateName {
    RagQa,
    DataAnalysis,
    DataSummary,
    DbAnalysis,
    DataVisualization,
}

pub const TEMPLATE_NAMES: &[&str] = &[
    "rag_qa",
    "data_analysis",
    "data_summary",
    "db_analysis",
    "data_visualization",
];

impl TemplateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateName::RagQa => "rag_qa",
            TemplateName::DataAnalysis => "data_analysis",
            TemplateName::DataSummary => "data_summary",
            TemplateName::DbAnalysis => "db_analysis",
            TemplateName::DataVisualization => "data_visualization",
        }
    }

    pub fn render(&self, evidence_count: usize) -> TemplateParts {
        let task_instructions = match self {
            TemplateName::RagQa => rag_qa_instructions(evidence_count),
            TemplateName::DataAnalysis => data_analysis_instructions(evidence_count),
            TemplateName::DataSummary => data_summary_instructions(evidence_count),
            TemplateName::DbAnalysis => db_analysis_instructions(evidence_count),
            TemplateName::DataVisualization => data_visualization_instructions(evidence_count),
        };
        TemplateParts {
            system_instructions: system_instructions(),
            task_instructions,
        }
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rag_qa" => Ok(TemplateName::RagQa),
            "data_analysis" => Ok(TemplateName::DataAnalysis),
            "data_summary" => Ok(TemplateName::DataSummary),
            "db_analysis" => Ok(TemplateName::DbAnalysis),
            "data_visualization" => Ok(TemplateName::DataVisualization),
            other => Err(AppError::new(codes::TEMPLATE_NOT_FOUND, "Unknown prompt template")
                .with_details(format!("template={}; available={}", other, TEMPLATE_NAMES.join(",")))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParts {
    pub system_instructions: String,
    pub task_instructions: String,
}

fn system_instructions() -> String {
    r#"You are a data analysis assistant. You help the user understand a dataset: statistics, patterns, trends and what the numbers do or do not support.
Answer only from the evidence provided in this prompt. Be clear and concise."#
        .to_string()
}

fn no_evidence_rule(evidence_count: usize) -> &'static str {
    if evidence_count == 0 {
        "No evidence was supplied for this turn. Say plainly that you cannot ground an answer, and do not guess."
    } else {
        "If the evidence is insufficient to answer fully, state what is unknown instead of guessing."
    }
}

fn rag_qa_instructions(evidence_count: usize) -> String {
    format!(
        r#"Answer the question using the retrieved information and computed results in the Evidence section.

Rules (non-negotiable):
1) Use ONLY the evidence blocks provided. Do not invent facts.
2) Every concrete claim MUST include an inline citation marker copied from the evidence block it relies on, e.g. [[chunk:<id>]] or [[analysis:<operation>:<digest>]].
3) Numbers from analysis blocks are already computed; quote them, do not recompute them.
4) {}

Output:
- Plain Markdown prose.
- Citations inline, on the same line as the claim."#,
        no_evidence_rule(evidence_count)
    )
}

fn data_analysis_instructions(evidence_count: usize) -> String {
    format!(
        r#"Analyze the data described by the evidence and answer the question with a detailed explanation of the findings.

Rules (non-negotiable):
1) Use ONLY the evidence blocks provided. Do not invent facts or statistics.
2) Every number you state MUST come from an analysis block and carry its citation marker, e.g. [[analysis:<operation>:<digest>]].
3) Context from documents MUST be cited with its [[chunk:<id>]] marker.
4) {}

Output:
- Findings first, then caveats.
- If useful, suggest one or two follow-up analyses or visualizations (do not claim their results)."#,
        no_evidence_rule(evidence_count)
    )
}

fn data_summary_instructions(evidence_count: usize) -> String {
    format!(
        r#"Summarize the analysis results in the evidence for a reader without a statistics background.

Rules (non-negotiable):
1) Use ONLY the evidence blocks provided. Do not invent facts.
2) Each bullet MUST include at least one citation marker copied from the evidence, on the same line.
3) {}

Output:
- Key findings as 3-5 bullets.
- Notable patterns or trends.
- Limitations of the analysis.
- Possible next steps."#,
        no_evidence_rule(evidence_count)
    )
}

fn db_analysis_instructions(evidence_count: usize) -> String {
    format!(
        r#"Interpret the query results in the analysis blocks of the Evidence section (tables loaded from a database or file).

Rules (non-negotiable):
1) Use ONLY the evidence blocks provided. Do not state any number that does not appear in an analysis block.
2) Every number MUST carry the citation marker of the analysis block it came from, e.g. [[analysis:<operation>:<digest>]].
3) Do not write or rerun SQL; describe follow-up queries in words only.
4) {}

Output:
- What the results mean.
- Key insights, patterns and anomalies.
- Suggested follow-up queries or analyses (do not claim their results)."#,
        no_evidence_rule(evidence_count)
    )
}

fn data_visualization_instructions(evidence_count: usize) -> String {
    format!(
        r#"Recommend charts that would help the user explore the data described by the evidence.

Rules (non-negotiable):
1) Use ONLY the evidence blocks provided to decide which columns and measures exist.
2) Describe each chart in words (type, axes, grouping, why it helps). Do not produce plotting code.
3) Do not claim what a chart would show; cite the evidence that motivates it, e.g. [[analysis:<operation>:<digest>]] or [[chunk:<id>]].
4) {}

Output:
- 2-4 chart suggestions as bullets, each with its citation marker."#,
        no_evidence_rule(evidence_count)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for name in TEMPLATE_NAMES {
            let t: TemplateName = name.parse().unwrap();
            assert_eq!(t.as_str(), *name);
        }
        assert_eq!("db_analysis".parse::<TemplateName>().unwrap(), TemplateName::DbAnalysis);
        assert_eq!(
            " data_visualization ".parse::<TemplateName>().unwrap(),
            TemplateName::DataVisualization
        );
        let err = "sql_writer".parse::<TemplateName>().unwrap_err();
        assert_eq!(err.code, "PROMPT_TEMPLATE_NOT_FOUND");
        assert!(err.details.unwrap_or_default().contains("data_visualization"));
    }

    #[test]
    fn every_template_demands_citations() {
        for name in TEMPLATE_NAMES {
            let t: TemplateName = name.parse().unwrap();
            let parts = t.render(1);
            assert!(parts.task_instructions.contains("[["), "{name} has no citation example");
            assert!(t.render(0).task_instructions.contains("No evidence was supplied"), "{name}");
        }
        assert!(TemplateName::DataVisualization
            .render(1)
            .task_instructions
            .contains("Do not produce plotting code"));
    }

    #[test]
    fn rendering_is_pure() {
        assert_eq!(TemplateName::RagQa.render(2), TemplateName::RagQa.render(2));
        assert!(TemplateName::DataSummary
            .render(0)
            .task_instructions
            .contains("No evidence was supplied"));
    }
}
