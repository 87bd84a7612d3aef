//! Intention detection: one tool-call round against the model.
//!
//! The composite prompt anchors relative date expressions on the latest
//! history timestamp, carries the chat metadata and recent history, and
//! closes with the agent timezone so the model never asks the user for
//! theirs. Detection failures are absorbed; the conversation falls back to
//! the free-form reply path instead of surfacing an error.

use crate::catalog::Intention;
use crate::intent::schema;
use crate::llm::LlmClient;
use crate::types::{ChatRecord, Detection, HistoryEntry};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

/// Per-turn inputs for detection.
pub struct DetectionContext<'a> {
    pub intentions: &'a [Intention],
    pub chat: &'a ChatRecord,
    pub history: &'a [HistoryEntry],
    pub timezone_label: Option<&'a str>,
    pub model: &'a str,
}

/// Run one detection round. Errors from the model call itself degrade to
/// [`Detection::NoMatch`]; malformed tool-call arguments propagate.
pub async fn detect(
    llm: &dyn LlmClient,
    message: &str,
    ctx: &DetectionContext<'_>,
) -> Result<Detection> {
    let tools = schema::build_tool_definitions(ctx.intentions);
    let prompt = build_detection_prompt(message, ctx);

    let outcome = match llm.chat_with_tools(&prompt, &tools, ctx.model).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Intention detection failed, falling back: {}", e);
            return Ok(Detection::NoMatch);
        }
    };

    let Some(call) = outcome.tool_call else {
        return Ok(match outcome.message {
            Some(text) if !text.trim().is_empty() => Detection::Fallback { message: text },
            _ => Detection::NoMatch,
        });
    };

    let Some(intention) = ctx.intentions.iter().find(|i| i.tool_name == call.name) else {
        warn!("Model called unknown tool '{}'", call.name);
        return Ok(Detection::NoMatch);
    };

    let arguments: Value = serde_json::from_str(&call.arguments)
        .with_context(|| format!("tool call '{}' returned malformed arguments", call.name))?;
    let fields = arguments.as_object().cloned().unwrap_or_default();

    debug!(
        "Matched intention '{}' with {} extracted fields",
        intention.tool_name,
        fields.len()
    );
    Ok(Detection::Matched {
        tool_name: intention.tool_name.clone(),
        fields,
    })
}

/// Build the composite detection prompt.
pub fn build_detection_prompt(message: &str, ctx: &DetectionContext<'_>) -> String {
    let latest_timestamp = ctx
        .history
        .last()
        .map(|entry| entry.timestamp)
        .unwrap_or_else(Utc::now);

    let mut prompt = String::with_capacity(2048);

    prompt.push_str(
        "Decide whether the user's newest message maps to one of the available actions. \
         If it does, call that function with every argument you can extract; \
         otherwise answer the user directly.\n\n",
    );
    prompt.push_str(&format!(
        "Interpret relative date and time expressions (\"tomorrow\", \"next friday\", \
         \"in two hours\") relative to {}.\n",
        latest_timestamp.to_rfc3339()
    ));
    prompt.push_str(
        "Infer contactName, contactPhone, and scheduling fields from the conversation \
         context when the user does not state them explicitly.\n",
    );
    if ctx.history.is_empty() {
        prompt.push_str(
            "There is no prior conversation: assume scheduling requests refer to today.\n",
        );
    }
    prompt.push_str(
        "Never ask the user for their timezone; always use the agent's timezone.\n\n",
    );

    prompt.push_str("Chat metadata:\n");
    prompt.push_str(
        &serde_json::to_string(&ctx.chat).unwrap_or_else(|_| "{}".to_string()),
    );
    prompt.push_str("\n\n");

    if !ctx.history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for entry in ctx.history {
            prompt.push_str(&format!("{}: {}\n", entry.role, entry.text));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "New message from {} ({}): {}\n",
        ctx.chat.contact_name, ctx.chat.contact_phone, message
    ));

    if let Some(label) = ctx.timezone_label {
        prompt.push_str(&format!("\nAgent timezone: {}.\n", label));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IntentionCatalog;
    use crate::llm::{ChatOutcome, MockLlmClient, ToolInvocation};
    use crate::types::ChatRole;
    use chrono::TimeZone;

    fn catalog() -> IntentionCatalog {
        IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: schedule_google_meeting
    description: Schedule a meeting.
    kind: webhook
    method: POST
    url: "https://calendar.test/events"
    fields:
      - name: Start
        json_name: startDateTime
        field_type: datetime
        required: true
"#,
        )
        .expect("parse")
    }

    fn chat() -> ChatRecord {
        ChatRecord {
            id: "chat-1".into(),
            contact_name: "Ana".into(),
            contact_phone: "+5511999999999".into(),
            metadata: serde_json::json!({"channel": "whatsapp"}),
            created_at: Utc::now(),
        }
    }

    fn ctx<'a>(
        catalog: &'a IntentionCatalog,
        chat: &'a ChatRecord,
        history: &'a [HistoryEntry],
    ) -> DetectionContext<'a> {
        DetectionContext {
            intentions: catalog.all(),
            chat,
            history,
            timezone_label: Some("Brasília (GMT-3)"),
            model: "gpt-4o",
        }
    }

    #[tokio::test]
    async fn tool_call_maps_to_matched_intention() {
        let llm = MockLlmClient::default();
        llm.push_outcome(ChatOutcome {
            tool_call: Some(ToolInvocation {
                name: "schedule_google_meeting".into(),
                arguments: r#"{"startDateTime": "2024-06-10T15:00:00"}"#.into(),
            }),
            message: None,
        });

        let catalog = catalog();
        let chat = chat();
        let detection = detect(&llm, "schedule a meeting", &ctx(&catalog, &chat, &[]))
            .await
            .expect("detect");

        match detection {
            Detection::Matched { tool_name, fields } => {
                assert_eq!(tool_name, "schedule_google_meeting");
                assert_eq!(fields["startDateTime"], "2024-06-10T15:00:00");
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn plain_text_becomes_fallback() {
        let llm = MockLlmClient::default();
        llm.push_outcome(ChatOutcome {
            tool_call: None,
            message: Some("Olá! Como posso ajudar?".into()),
        });

        let catalog = catalog();
        let chat = chat();
        let detection = detect(&llm, "oi", &ctx(&catalog, &chat, &[]))
            .await
            .expect("detect");
        match detection {
            Detection::Fallback { message } => assert!(message.contains("ajudar")),
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_tool_and_silence_yield_no_match() {
        let llm = MockLlmClient::default();
        llm.push_outcome(ChatOutcome {
            tool_call: Some(ToolInvocation {
                name: "does_not_exist".into(),
                arguments: "{}".into(),
            }),
            message: None,
        });
        llm.push_outcome(ChatOutcome::default());

        let catalog = catalog();
        let chat = chat();
        for _ in 0..2 {
            let detection = detect(&llm, "hm", &ctx(&catalog, &chat, &[]))
                .await
                .expect("detect");
            assert!(matches!(detection, Detection::NoMatch));
        }
    }

    #[tokio::test]
    async fn llm_errors_degrade_to_no_match() {
        let llm = MockLlmClient::default();
        // No scripted outcome: the mock call errors.
        let catalog = catalog();
        let chat = chat();
        let detection = detect(&llm, "hello", &ctx(&catalog, &chat, &[]))
            .await
            .expect("detect");
        assert!(matches!(detection, Detection::NoMatch));
    }

    #[tokio::test]
    async fn malformed_arguments_propagate() {
        let llm = MockLlmClient::default();
        llm.push_outcome(ChatOutcome {
            tool_call: Some(ToolInvocation {
                name: "schedule_google_meeting".into(),
                arguments: "{not json".into(),
            }),
            message: None,
        });

        let catalog = catalog();
        let chat = chat();
        let err = detect(&llm, "schedule", &ctx(&catalog, &chat, &[]))
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("malformed arguments"));
    }

    #[test]
    fn prompt_carries_anchor_history_and_timezone() {
        let catalog = catalog();
        let chat = chat();
        let anchor = Utc.with_ymd_and_hms(2024, 6, 9, 12, 0, 0).unwrap();
        let history = vec![HistoryEntry {
            role: ChatRole::User,
            text: "quero marcar uma reunião".into(),
            timestamp: anchor,
        }];

        let prompt =
            build_detection_prompt("amanhã às 15h", &ctx(&catalog, &chat, &history));

        assert!(prompt.contains(&anchor.to_rfc3339()));
        assert!(prompt.contains("user: quero marcar uma reunião"));
        assert!(prompt.contains("New message from Ana (+5511999999999): amanhã às 15h"));
        assert!(prompt.contains("Agent timezone: Brasília (GMT-3)."));
        assert!(!prompt.contains("no prior conversation"));
    }

    #[test]
    fn empty_history_adds_the_today_rule() {
        let catalog = catalog();
        let chat = chat();
        let prompt = build_detection_prompt("marca pra mim", &ctx(&catalog, &chat, &[]));
        assert!(prompt.contains("assume scheduling requests refer to today"));
    }
}
