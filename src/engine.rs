//! Per-turn orchestration: detection → slot-filling → execution → reply.
//!
//! One inbound message is processed end-to-end as a single async task; all
//! I/O is awaited sequentially because each step feeds the next. The engine
//! holds no cross-turn state: history and pending fields come from the
//! caller, results go back to it.

use crate::catalog::IntentionCatalog;
use crate::compose::ResponseComposer;
use crate::intent::{detect, slots, DetectionContext, Executor};
use crate::llm::LlmClient;
use crate::speech::SpeechSynthesizer;
use crate::types::{
    Detection, EngineReply, ExecutedIntention, FieldMap, PendingIntention, TurnInput,
};
use anyhow::Result;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-tenant settings the engine needs every turn.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub agent_id: String,
    pub timezone_label: String,
    pub tz: Tz,
    pub audio_replies: bool,
}

/// The conversational engine for one tenant.
pub struct Engine {
    catalog: Arc<IntentionCatalog>,
    llm: Arc<dyn LlmClient>,
    executor: Executor,
    composer: ResponseComposer,
    speech: Arc<dyn SpeechSynthesizer>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        catalog: Arc<IntentionCatalog>,
        llm: Arc<dyn LlmClient>,
        executor: Executor,
        composer: ResponseComposer,
        speech: Arc<dyn SpeechSynthesizer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            catalog,
            llm,
            executor,
            composer,
            speech,
            settings,
        }
    }

    /// Process one inbound turn and produce the outbound reply.
    pub async fn handle_turn(&self, input: &TurnInput) -> Result<EngineReply> {
        let ctx = DetectionContext {
            intentions: self.catalog.all(),
            chat: &input.chat,
            history: &input.history,
            timezone_label: Some(&self.settings.timezone_label),
            model: &self.settings.model,
        };

        let detection = detect(self.llm.as_ref(), &input.message, &ctx).await?;

        let (text, pending, executed) = match detection {
            Detection::Fallback { message } => (message, None, None),
            Detection::NoMatch => {
                let text = self
                    .composer
                    .freeform_reply(&input.history, &input.message)
                    .await;
                (text, None, None)
            }
            Detection::Matched { tool_name, fields } => {
                self.run_intention(&tool_name, fields, input).await
            }
        };

        let segments = self.composer.split(&text);
        let audio = if self.settings.audio_replies {
            match self.speech.synthesize(&text).await {
                Ok(audio) => audio,
                Err(e) => {
                    warn!("Audio synthesis failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(EngineReply {
            text,
            segments,
            pending,
            executed,
            audio,
        })
    }

    async fn run_intention(
        &self,
        tool_name: &str,
        fields: FieldMap,
        input: &TurnInput,
    ) -> (String, Option<PendingIntention>, Option<ExecutedIntention>) {
        let Some(intention) = self.catalog.find(tool_name) else {
            // The detector only matches catalog entries; this covers
            // catalog swaps between detection and execution.
            warn!("Matched tool '{}' vanished from the catalog", tool_name);
            let text = self
                .composer
                .freeform_reply(&input.history, &input.message)
                .await;
            return (text, None, None);
        };

        let missing = slots::missing_fields(intention, &fields);
        if !missing.is_empty() {
            info!(
                "Intention '{}' is missing {} required fields, asking",
                tool_name,
                missing.len()
            );
            let known = slots::collected_fields(intention, &fields);
            let text = self
                .composer
                .clarification_reply(intention, &known, &missing, &input.message)
                .await;
            let pending = PendingIntention {
                tool_name: tool_name.to_string(),
                collected: known,
                missing,
            };
            return (text, Some(pending), None);
        }

        match self
            .executor
            .execute(intention, fields.clone(), &self.settings.agent_id, self.settings.tz)
            .await
        {
            Ok(outcome) => {
                info!("Intention '{}' executed successfully", tool_name);
                let text = self
                    .composer
                    .success_reply(intention, &outcome, &input.message)
                    .await;
                let executed = ExecutedIntention {
                    tool_name: tool_name.to_string(),
                    fields,
                    succeeded: true,
                };
                (text, None, Some(executed))
            }
            Err(err) => {
                warn!("Intention '{}' failed: {}", tool_name, err);
                let text = self
                    .composer
                    .error_reply(intention, &err.to_string(), &input.message)
                    .await;
                let executed = ExecutedIntention {
                    tool_name: tool_name.to_string(),
                    fields,
                    succeeded: false,
                };
                (text, None, Some(executed))
            }
        }
    }
}
