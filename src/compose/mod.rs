//! Natural-language reply generation.
//!
//! The three paths (success, error, clarification) share one shape: build a
//! prompt embedding the agent persona, style and goal guides, the
//! result/error context, and a language-matching instruction, then request a
//! single completion. When the model itself is down, each path falls back to
//! a deterministic sentence; the user is never left without a reply.

use crate::catalog::{Intention, SCHEDULE_MEETING_TOOL};
use crate::llm::LlmClient;
use crate::types::{ExecutionOutcome, FieldMap, HistoryEntry, MissingField};
use std::sync::Arc;
use tracing::warn;

/// Tenant-level settings the composer embeds in every prompt.
#[derive(Debug, Clone, Default)]
pub struct ComposerConfig {
    pub agent_name: String,
    pub persona: String,
    pub style_guide: String,
    pub goal_guide: String,
    pub model: String,
    pub split_responses: bool,
    pub split_delimiter: String,
}

pub struct ResponseComposer {
    llm: Arc<dyn LlmClient>,
    config: ComposerConfig,
}

impl ResponseComposer {
    pub fn new(llm: Arc<dyn LlmClient>, config: ComposerConfig) -> Self {
        Self { llm, config }
    }

    /// Confirm a completed intention.
    pub async fn success_reply(
        &self,
        intention: &Intention,
        outcome: &ExecutionOutcome,
        user_message: &str,
    ) -> String {
        let mut user = String::new();
        user.push_str(&format!(
            "The action \"{}\" just completed successfully.\n",
            intention.description_or_default()
        ));
        user.push_str(&format!(
            "Result data:\n{}\n\n",
            serde_json::to_string(&outcome.data).unwrap_or_else(|_| "{}".to_string())
        ));
        if intention.tool_name == SCHEDULE_MEETING_TOOL {
            user.push_str(
                "Include a Google Calendar \"add event\" link built as \
                 https://calendar.google.com/calendar/render?action=TEMPLATE with the \
                 event title, start, and end taken from the result's description, \
                 creator, start, and end fields; infer anything else as best you can. \
                 Never use the old event-view link from the result.\n",
            );
        }
        user.push_str(&format!("User's latest message: {}\n", user_message));
        user.push_str("Write a short confirmation for the user.");

        match self.llm.complete(&self.system_prompt(), &user, &self.config.model).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Success reply generation failed: {}", e);
                format!(
                    "All done: \"{}\" was completed successfully.",
                    intention.description_or_default()
                )
            }
        }
    }

    /// Explain a failed intention without surfacing technical detail.
    pub async fn error_reply(
        &self,
        intention: &Intention,
        error_text: &str,
        user_message: &str,
    ) -> String {
        let mut user = String::new();
        user.push_str(&format!(
            "The action \"{}\" could not be completed.\n",
            intention.description_or_default()
        ));
        user.push_str(&format!("Internal error context: {}\n\n", error_text));
        user.push_str(
            "Apologize briefly, explain in plain words (no technical jargon, no status \
             codes), and suggest trying again or an alternative.\n",
        );
        if intention.human_handoff {
            user.push_str(
                "The conversation is being transferred to a person asynchronously; do \
                 not name or promise any specific person.\n",
            );
        }
        user.push_str(&format!("User's latest message: {}\n", user_message));

        match self.llm.complete(&self.system_prompt(), &user, &self.config.model).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Error reply generation failed: {}", e);
                format!(
                    "Sorry, I couldn't complete \"{}\" right now ({}). Could you try \
                     again in a moment, or ask me for something else?",
                    intention.description_or_default(),
                    error_text
                )
            }
        }
    }

    /// Ask for the required fields the user has not supplied yet.
    pub async fn clarification_reply(
        &self,
        intention: &Intention,
        known: &FieldMap,
        missing: &[MissingField],
        user_message: &str,
    ) -> String {
        let mut user = String::new();
        user.push_str(&format!(
            "The user asked for \"{}\" but some required information is missing.\n",
            intention.description_or_default()
        ));
        if !known.is_empty() {
            user.push_str("Already known:\n");
            for (key, value) in known {
                user.push_str(&format!(
                    "- {}: {}\n",
                    key,
                    crate::template::value_to_string(value)
                ));
            }
        }
        user.push_str("Still needed:\n");
        for field in missing {
            user.push_str(&format!("- {}: {}\n", field.name, field.description));
        }
        user.push_str(&format!("\nUser's latest message: {}\n", user_message));
        user.push_str(
            "Confirm what you already have and ask for the missing items by name.",
        );

        match self.llm.complete(&self.system_prompt(), &user, &self.config.model).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Clarification reply generation failed: {}", e);
                let names: Vec<&str> = missing.iter().map(|f| f.name.as_str()).collect();
                format!(
                    "To continue with \"{}\" I still need: {}.",
                    intention.description_or_default(),
                    names.join(", ")
                )
            }
        }
    }

    /// Free-form reply when no intention matched and the model offered no
    /// fallback text of its own.
    pub async fn freeform_reply(&self, history: &[HistoryEntry], user_message: &str) -> String {
        let mut user = String::new();
        if !history.is_empty() {
            user.push_str("Conversation so far:\n");
            for entry in history {
                user.push_str(&format!("{}: {}\n", entry.role, entry.text));
            }
            user.push('\n');
        }
        user.push_str(&format!("User: {}\n", user_message));
        user.push_str("Answer the user directly.");

        match self.llm.complete(&self.system_prompt(), &user, &self.config.model).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Free-form reply generation failed: {}", e);
                "Sorry, I didn't quite catch that. Could you say it again?".to_string()
            }
        }
    }

    /// Split a reply into the tenant's delimiter-separated segments.
    pub fn split(&self, text: &str) -> Vec<String> {
        if !self.config.split_responses {
            return vec![text.to_string()];
        }
        let segments: Vec<String> = text
            .split(&self.config.split_delimiter)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            vec![text.to_string()]
        } else {
            segments
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::with_capacity(512);
        prompt.push_str(&format!("You are {}.\n", self.config.agent_name));
        if !self.config.persona.is_empty() {
            prompt.push_str(&self.config.persona);
            prompt.push('\n');
        }
        if !self.config.style_guide.is_empty() {
            prompt.push_str(&format!("Communication style: {}\n", self.config.style_guide));
        }
        if !self.config.goal_guide.is_empty() {
            prompt.push_str(&format!("Goal: {}\n", self.config.goal_guide));
        }
        prompt.push_str(
            "Always reply in the same language as the user's latest message.\n",
        );
        if self.config.split_responses {
            prompt.push_str(&format!(
                "Write short message segments separated by \"{}\".\n",
                self.config.split_delimiter
            ));
        }
        prompt
    }
}
