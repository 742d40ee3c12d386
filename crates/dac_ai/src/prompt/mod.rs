use std::collections::BTreeSet;

use dac_core::config::PromptConfig;
use dac_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::evidence::{render_evidence_section, EvidenceItem};

mod templates;

pub use templates::{TemplateName, TemplateParts, TEMPLATE_NAMES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    fn render(&self) -> String {
        format!("{}: {}", self.role.label(), self.content.trim())
    }
}

/// Everything sent to the model for one turn. Fields are private so a built request cannot
/// drift from what was composed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
    template: TemplateName,
    system_instructions: String,
    task_instructions: String,
    evidence: Vec<EvidenceItem>,
    conversation_history: Vec<ConversationTurn>,
    user_query: String,
    dropped_history_turns: usize,
}

impl PromptRequest {
    pub fn template(&self) -> TemplateName {
        self.template
    }

    pub fn system_instructions(&self) -> &str {
        &self.system_instructions
    }

    pub fn task_instructions(&self) -> &str {
        &self.task_instructions
    }

    pub fn evidence(&self) -> &[EvidenceItem] {
        &self.evidence
    }

    pub fn conversation_history(&self) -> &[ConversationTurn] {
        &self.conversation_history
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn dropped_history_turns(&self) -> usize {
        self.dropped_history_turns
    }

    pub fn evidence_ids(&self) -> BTreeSet<String> {
        self.evidence.iter().map(|e| e.id.clone()).collect()
    }

    /// Single text form for completion-style backends.
    pub fn render(&self) -> String {
        render_parts(
            &self.system_instructions,
            &self.evidence,
            &self.conversation_history,
            &self.task_instructions,
            &self.user_query,
        )
    }

    pub fn rendered_size(&self) -> usize {
        self.render().chars().count()
    }
}

fn history_section(turns: &[ConversationTurn]) -> String {
    if turns.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = turns.iter().map(ConversationTurn::render).collect();
    format!("## Conversation so far\n{}\n\n", lines.join("\n"))
}

fn render_parts(
    system: &str,
    evidence: &[EvidenceItem],
    history: &[ConversationTurn],
    task: &str,
    query: &str,
) -> String {
    let evidence_text = if evidence.is_empty() {
        "(no evidence supplied)".to_string()
    } else {
        render_evidence_section(evidence)
    };
    format!(
        "{system}\n\n## Evidence\n{evidence_text}\n\n{history}## Task\n{task}\n\n## Question\n{query}\n",
        system = system,
        evidence_text = evidence_text,
        history = history_section(history),
        task = task,
        query = query.trim(),
    )
}

#[derive(Debug, Clone)]
pub struct PromptComposer {
    max_chars: usize,
}

impl PromptComposer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn from_config(cfg: &PromptConfig) -> Self {
        Self::new(cfg.max_chars)
    }

    /// Builds the request for `template_name`. Instructions, evidence and query are placed
    /// first; whatever remains of `max_chars` goes to history, newest turns kept.
    pub fn compose(
        &self,
        template_name: &str,
        evidence: Vec<EvidenceItem>,
        history: &[ConversationTurn],
        query: &str,
    ) -> Result<PromptRequest, AppError> {
        let template: TemplateName = template_name.parse()?;
        let parts = template.render(evidence.len());

        let fixed = render_parts(
            &parts.system_instructions,
            &evidence,
            &[],
            &parts.task_instructions,
            query,
        )
        .chars()
        .count();
        let remaining = self.max_chars.saturating_sub(fixed);

        // Walk back from the newest turn while the history section still fits.
        let mut keep_from = history.len();
        while keep_from > 0 {
            let candidate = history_section(&history[keep_from - 1..]).chars().count();
            if candidate > remaining {
                break;
            }
            keep_from -= 1;
        }
        let kept = history[keep_from..].to_vec();
        let dropped = keep_from;

        if fixed > self.max_chars {
            tracing::warn!(
                fixed,
                max_chars = self.max_chars,
                "prompt exceeds budget before history; evidence kept"
            );
        }
        tracing::debug!(
            template = template.as_str(),
            evidence = evidence.len(),
            history_kept = kept.len(),
            history_dropped = dropped,
            "prompt composed"
        );

        Ok(PromptRequest {
            template,
            system_instructions: parts.system_instructions,
            task_instructions: parts.task_instructions,
            evidence,
            conversation_history: kept,
            user_query: query.trim().to_string(),
            dropped_history_turns: dropped,
        })
    }
}
