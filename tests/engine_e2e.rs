//! End-to-end engine tests with scripted collaborators: no network, no real
//! model; the wiring from inbound message to outbound reply is what's under
//! test.

use async_trait::async_trait;
use chrono::{Datelike, Duration, Utc, Weekday};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use parley::auth::StaticTokenProvider;
use parley::catalog::IntentionCatalog;
use parley::compose::{ComposerConfig, ResponseComposer};
use parley::engine::{Engine, EngineSettings};
use parley::http::{HttpTransport, OutboundRequest, OutboundResponse, TransportError};
use parley::intent::Executor;
use parley::llm::{ChatOutcome, MockLlmClient, ToolInvocation};
use parley::speech::NoopSynthesizer;
use parley::types::*;

const CATALOG: &str = r#"
intentions:
  - tool_name: schedule_google_meeting
    description: Schedule a meeting on the tenant calendar.
    kind: webhook
    method: POST
    url: "https://cal.test/events"
    body: |
      {"summary": "Meeting with {{ contactName }}", "start": "{{ startDateTime }}", "end": "{{ endDateTime }}"}
    fields:
      - name: Start
        json_name: startDateTime
        field_type: datetime
        description: Meeting start, ISO-8601.
        required: true
      - name: End
        json_name: endDateTime
        field_type: datetime
        description: Meeting end, ISO-8601.
        required: true
      - name: Contact
        json_name: contactName
        field_type: text
        description: Who the meeting is with.
        required: true
"#;

#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<OutboundResponse>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    fn push_ok(&self, body: &str) {
        self.responses.lock().unwrap().push_back(OutboundResponse {
            status: 200,
            status_text: "OK".into(),
            body: body.into(),
        });
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Network("no scripted response".into()))
    }
}

fn build_engine(
    llm: Arc<MockLlmClient>,
    transport: Arc<ScriptedTransport>,
) -> Engine {
    let catalog = Arc::new(IntentionCatalog::from_yaml(CATALOG).expect("catalog"));
    let executor = Executor::new(
        transport,
        Arc::new(StaticTokenProvider::new("tok-1")),
        catalog.clone(),
        parley::config::AvailabilityConfig {
            max_days_ahead: 365,
            ..Default::default()
        },
    );
    let composer = ResponseComposer::new(
        llm.clone(),
        ComposerConfig {
            agent_name: "Clara".into(),
            persona: "A scheduling assistant.".into(),
            style_guide: "Brief.".into(),
            goal_guide: "Book meetings.".into(),
            model: "gpt-4o".into(),
            split_responses: false,
            split_delimiter: "||".into(),
        },
    );
    Engine::new(
        catalog,
        llm,
        executor,
        composer,
        Arc::new(NoopSynthesizer),
        EngineSettings {
            model: "gpt-4o".into(),
            agent_id: "agent-1".into(),
            timezone_label: "UTC".into(),
            tz: chrono_tz::UTC,
            audio_replies: false,
        },
    )
}

fn turn(message: &str) -> TurnInput {
    TurnInput {
        chat: ChatRecord {
            id: "chat-1".into(),
            contact_name: "Ana".into(),
            contact_phone: "+5511999999999".into(),
            metadata: json!({"channel": "whatsapp"}),
            created_at: Utc::now(),
        },
        history: Vec::new(),
        message: message.into(),
    }
}

/// A one-hour window on the next weekday, inside default availability.
fn next_weekday_window() -> (String, String) {
    let mut day = Utc::now() + Duration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day += Duration::days(1);
    }
    let date = day.date_naive();
    let fmt = |hour: u32| {
        date.and_hms_opt(hour, 0, 0)
            .unwrap()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    };
    (fmt(10), fmt(11))
}

#[tokio::test]
async fn full_extraction_executes_and_confirms() {
    let llm = Arc::new(MockLlmClient::default());
    let transport = Arc::new(ScriptedTransport::default());

    let (start, end) = next_weekday_window();
    llm.push_outcome(ChatOutcome {
        tool_call: Some(ToolInvocation {
            name: "schedule_google_meeting".into(),
            arguments: json!({
                "startDateTime": start,
                "endDateTime": end,
                "contactName": "Ana",
            })
            .to_string(),
        }),
        message: None,
    });
    llm.push_completion("Agendado! Te mando o link.");
    transport.push_ok(r#"{"id": "ev-1", "description": "Meeting with Ana"}"#);

    let engine = build_engine(llm.clone(), transport.clone());
    let reply = engine
        .handle_turn(&turn("schedule a meeting tomorrow at 10 with Ana"))
        .await
        .expect("turn");

    assert_eq!(reply.text, "Agendado! Te mando o link.");
    assert!(reply.pending.is_none());
    let executed = reply.executed.expect("executed");
    assert_eq!(executed.tool_name, "schedule_google_meeting");
    assert!(executed.succeeded);

    // Exactly one webhook call, with the rendered JSON body.
    assert_eq!(transport.request_count(), 1);
    let requests = transport.requests.lock().unwrap();
    let body = requests[0].body.as_ref().expect("body");
    assert_eq!(body["summary"], json!("Meeting with Ana"));
}

#[tokio::test]
async fn partial_extraction_asks_for_missing_fields_without_executing() {
    let llm = Arc::new(MockLlmClient::default());
    let transport = Arc::new(ScriptedTransport::default());

    llm.push_outcome(ChatOutcome {
        tool_call: Some(ToolInvocation {
            name: "schedule_google_meeting".into(),
            arguments: json!({"contactName": "Ana"}).to_string(),
        }),
        message: None,
    });
    llm.push_completion("Claro! Para quando seria a reunião com a Ana?");

    let engine = build_engine(llm.clone(), transport.clone());
    let reply = engine
        .handle_turn(&turn("schedule a meeting with Ana"))
        .await
        .expect("turn");

    let pending = reply.pending.expect("pending");
    let missing: Vec<&str> = pending.missing.iter().map(|f| f.json_name.as_str()).collect();
    assert_eq!(missing, vec!["startDateTime", "endDateTime"]);
    assert_eq!(pending.collected["contactName"], json!("Ana"));
    assert!(reply.executed.is_none());

    // The executor never ran.
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn fallback_text_is_passed_through_verbatim() {
    let llm = Arc::new(MockLlmClient::default());
    let transport = Arc::new(ScriptedTransport::default());

    llm.push_outcome(ChatOutcome {
        tool_call: None,
        message: Some("Posso ajudar com agendamentos!".into()),
    });

    let engine = build_engine(llm, transport.clone());
    let reply = engine
        .handle_turn(&turn("what can you do?"))
        .await
        .expect("turn");

    assert_eq!(reply.text, "Posso ajudar com agendamentos!");
    assert!(reply.pending.is_none());
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn failed_execution_becomes_an_apologetic_reply() {
    let llm = Arc::new(MockLlmClient::default());
    let transport = Arc::new(ScriptedTransport::default());

    let (start, end) = next_weekday_window();
    llm.push_outcome(ChatOutcome {
        tool_call: Some(ToolInvocation {
            name: "schedule_google_meeting".into(),
            arguments: json!({
                "startDateTime": start,
                "endDateTime": end,
                "contactName": "Ana",
            })
            .to_string(),
        }),
        message: None,
    });
    // No completion scripted: the composer's model call fails, so the
    // deterministic fallback sentence is used.
    transport.responses.lock().unwrap().push_back(OutboundResponse {
        status: 500,
        status_text: "Internal Server Error".into(),
        body: r#"{"error": {"message": "calendar exploded"}}"#.into(),
    });

    let engine = build_engine(llm, transport.clone());
    let reply = engine
        .handle_turn(&turn("schedule a meeting with Ana"))
        .await
        .expect("turn");

    assert!(reply.text.contains("Sorry"));
    let executed = reply.executed.expect("executed");
    assert!(!executed.succeeded);

    assert_eq!(reply.segments.len(), 1);
}
