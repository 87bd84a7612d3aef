//! Intention execution: precondition chains, templated webhook calls, and
//! local handlers.
//!
//! Preconditions run strictly in declaration order: later steps may
//! reference earlier captures, and a failure short-circuits everything that
//! follows. A scheduling conflict is the one recoverable failure: it is
//! redirected into the slot-suggestion intention so the user gets
//! alternatives instead of a dead end.

use crate::auth::TokenProvider;
use crate::catalog::{
    Intention, IntentionCatalog, IntentionKind, Precondition, WebhookSpec, SCHEDULE_MEETING_TOOL,
    SUGGEST_SLOTS_TOOL,
};
use crate::http::{HttpTransport, OutboundRequest, TransportError};
use crate::intent::expr::{self, Sandbox};
use crate::schedule;
use crate::template;
use crate::timezone;
use crate::types::{ExecutionOutcome, FieldMap};
use crate::config::AvailabilityConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use chrono_tz::Tz;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// In-process handler bound to a local intention.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn call(&self, fields: &FieldMap) -> Result<Value>;
}

/// Execution failures, classified for the composer and for retry policy
/// (none of these are retried; the conflict variant is redirected instead).
#[derive(Debug, Error)]
pub enum ExecError {
    /// Broken tenant configuration: bad body template, missing handler.
    #[error("intention configuration error: {0}")]
    Config(String),

    /// A field value the pipeline cannot work with (bad date, etc).
    #[error("invalid field value: {0}")]
    Field(String),

    /// Bearer-credential fetch failed.
    #[error("credential fetch failed: {0}")]
    Auth(String),

    /// A precondition aborted the chain.
    #[error("{message}")]
    Precondition { message: String },

    /// The main call returned a non-2xx status.
    #[error("upstream call failed ({status} {status_text}): {body}")]
    Upstream {
        status: u16,
        status_text: String,
        body: String,
    },

    /// Transport-level failure that is not a timeout.
    #[error("network failure: {0}")]
    Network(String),

    /// The per-call timeout elapsed.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// Availability validation rejected the proposed window.
    #[error("{0}")]
    Schedule(String),

    /// Scheduling conflict redirected into slot suggestions; the payload is
    /// the serialized suggestion result.
    #[error("{0}")]
    Unavailable(String),

    /// The bound local handler returned an error.
    #[error("handler '{name}' failed: {message}")]
    Handler { name: String, message: String },
}

/// Executes matched intentions against their configured shape.
pub struct Executor {
    http: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenProvider>,
    handlers: HashMap<String, Arc<dyn LocalHandler>>,
    catalog: Arc<IntentionCatalog>,
    availability: AvailabilityConfig,
}

impl Executor {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenProvider>,
        catalog: Arc<IntentionCatalog>,
        availability: AvailabilityConfig,
    ) -> Self {
        Self {
            http,
            tokens,
            handlers: HashMap::new(),
            catalog,
            availability,
        }
    }

    /// Bind an in-process handler for local intentions.
    pub fn register_handler(&mut self, name: &str, handler: Arc<dyn LocalHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Execute one intention with the extracted field map.
    pub async fn execute(
        &self,
        intention: &Intention,
        fields: FieldMap,
        agent_id: &str,
        tz: Tz,
    ) -> Result<ExecutionOutcome, ExecError> {
        let fields = normalize_fields(fields);

        if intention.tool_name == SCHEDULE_MEETING_TOOL {
            return self.execute_scheduling(intention, fields, agent_id, tz).await;
        }
        self.dispatch(intention, fields, agent_id, tz).await
    }

    /// Scheduling goes through availability validation first, and a slot
    /// conflict falls back to the suggestion intention.
    async fn execute_scheduling(
        &self,
        intention: &Intention,
        fields: FieldMap,
        agent_id: &str,
        tz: Tz,
    ) -> Result<ExecutionOutcome, ExecError> {
        let start = fields.get("startDateTime").and_then(|v| v.as_str());
        let end = fields.get("endDateTime").and_then(|v| v.as_str());
        if let (Some(start), Some(end)) = (start, end) {
            if let Some(reason) =
                schedule::validate_schedule(start, end, &self.availability, tz)
            {
                info!("Schedule validation rejected the window: {}", reason);
                return Err(ExecError::Schedule(reason));
            }
        }

        match self.dispatch(intention, fields.clone(), agent_id, tz).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.to_string().contains("unavailable") => {
                warn!("Slot conflict, suggesting alternatives: {}", err);
                self.suggest_alternatives(fields, agent_id, tz).await
            }
            Err(err) => Err(err),
        }
    }

    /// Invoke the designated suggestion intention with a 7-day default
    /// search window and re-throw its serialized result.
    async fn suggest_alternatives(
        &self,
        mut fields: FieldMap,
        agent_id: &str,
        tz: Tz,
    ) -> Result<ExecutionOutcome, ExecError> {
        let suggest = self.catalog.find(SUGGEST_SLOTS_TOOL).ok_or_else(|| {
            ExecError::Config(format!(
                "no '{}' intention configured for conflict fallback",
                SUGGEST_SLOTS_TOOL
            ))
        })?;

        let has_bounds =
            fields.contains_key("startSearch") || fields.contains_key("endSearch");
        if !has_bounds {
            let now = timezone::now_in(tz);
            let until = now + Duration::days(7);
            fields.insert(
                "startSearch".to_string(),
                Value::String(now.format("%Y-%m-%dT%H:%M:%S").to_string()),
            );
            fields.insert(
                "endSearch".to_string(),
                Value::String(until.format("%Y-%m-%dT%H:%M:%S").to_string()),
            );
        }
        fields.remove("startDateTime");
        fields.remove("endDateTime");

        let outcome = self.dispatch(suggest, fields, agent_id, tz).await?;
        let serialized = serde_json::to_string(&outcome)
            .map_err(|e| ExecError::Config(format!("suggestion result not serializable: {}", e)))?;
        Err(ExecError::Unavailable(serialized))
    }

    async fn dispatch(
        &self,
        intention: &Intention,
        fields: FieldMap,
        agent_id: &str,
        tz: Tz,
    ) -> Result<ExecutionOutcome, ExecError> {
        match &intention.kind {
            IntentionKind::Local { handler } => self.execute_local(intention, handler, fields).await,
            IntentionKind::Webhook(spec) => {
                self.execute_webhook(intention, spec, fields, agent_id, tz).await
            }
        }
    }

    async fn execute_local(
        &self,
        intention: &Intention,
        handler_name: &str,
        fields: FieldMap,
    ) -> Result<ExecutionOutcome, ExecError> {
        let handler = self.handlers.get(handler_name).ok_or_else(|| {
            ExecError::Config(format!(
                "intention '{}' has no registered handler '{}'",
                intention.tool_name, handler_name
            ))
        })?;

        debug!("Running local handler '{}'", handler_name);
        let data = handler.call(&fields).await.map_err(|e| ExecError::Handler {
            name: handler_name.to_string(),
            message: e.to_string(),
        })?;
        Ok(ExecutionOutcome::new(data, None))
    }

    async fn execute_webhook(
        &self,
        intention: &Intention,
        spec: &WebhookSpec,
        mut fields: FieldMap,
        agent_id: &str,
        tz: Tz,
    ) -> Result<ExecutionOutcome, ExecError> {
        let token = self
            .tokens
            .access_token(agent_id)
            .await
            .map_err(|e| ExecError::Auth(e.to_string()))?;

        timezone::normalize_datetime_fields(&mut fields, tz).map_err(ExecError::Field)?;

        let captures = self
            .run_preconditions(&spec.preconditions, &fields, &token)
            .await?;

        let url = self.build_main_url(spec, &fields, &captures);
        let headers: Vec<(String, String)> = spec
            .headers
            .iter()
            .map(|(name, tpl)| {
                (
                    name.clone(),
                    template::resolve_header(tpl, &token, &fields, &captures),
                )
            })
            .collect();

        let body = match &spec.body {
            Some(tpl) => Some(template::render_body(tpl, &fields, &captures).map_err(|e| {
                ExecError::Config(format!("intention '{}': {}", intention.tool_name, e))
            })?),
            None => None,
        };

        debug!("{} {}", spec.method, url);
        let resp = self
            .http
            .send(OutboundRequest {
                method: spec.method.clone(),
                url,
                headers,
                body,
            })
            .await
            .map_err(map_transport)?;

        if !resp.is_success() {
            return Err(ExecError::Upstream {
                status: resp.status,
                status_text: resp.status_text.clone(),
                body: resp.body.clone(),
            });
        }

        Ok(ExecutionOutcome::new(resp.json_or_empty(), Some(resp.status)))
    }

    /// Run precondition steps strictly in order, accumulating captures.
    async fn run_preconditions(
        &self,
        preconditions: &[Precondition],
        fields: &FieldMap,
        token: &str,
    ) -> Result<Vec<Value>, ExecError> {
        let mut captures: Vec<Value> = Vec::new();
        let fields_value = Value::Object(fields.clone());

        for pre in preconditions {
            let url = template::resolve_template(&pre.url, fields);
            let pairs: Vec<(String, String)> = pre
                .query
                .iter()
                .map(|(k, v)| (k.clone(), template::resolve_template(v, fields)))
                .collect();
            let url = template::append_query(&url, &pairs);

            let headers: Vec<(String, String)> = pre
                .headers
                .iter()
                .map(|(name, tpl)| {
                    (
                        name.clone(),
                        template::resolve_header(tpl, token, fields, &captures),
                    )
                })
                .collect();

            let body = match &pre.body {
                Some(tpl) => Some(template::render_body(tpl, fields, &captures).map_err(|e| {
                    ExecError::Config(format!("precondition '{}': {}", pre.name, e))
                })?),
                None => None,
            };

            debug!("Precondition '{}': {} {}", pre.name, pre.method, url);
            let resp = self
                .http
                .send(OutboundRequest {
                    method: pre.method.clone(),
                    url,
                    headers,
                    body,
                })
                .await
                .map_err(map_transport)?;

            let pre_json = resp.json_or_empty();

            if !resp.is_success() {
                let detail = resp
                    .error_message()
                    .unwrap_or_else(|| resp.status_text.clone());
                return Err(ExecError::Precondition {
                    message: format!(
                        "step '{}' returned {}: {}",
                        pre.name, resp.status, detail
                    ),
                });
            }

            if let Some(condition) = &pre.failure_condition {
                // Failure conditions evaluate against a single-empty-entry
                // placeholder, not the accumulated captures; only success
                // actions see the real list.
                let placeholder = json!([{}]);
                let sandbox = Sandbox {
                    pre_json: &pre_json,
                    fields: &fields_value,
                    preconditions: &placeholder,
                };
                if condition.eval_truthy(&sandbox) {
                    return Err(ExecError::Precondition {
                        message: pre.failure_message.clone().unwrap_or_else(|| {
                            format!("step '{}' reported a failure", pre.name)
                        }),
                    });
                }
            }

            let capture = match &pre.success_action {
                Some(actions) => {
                    let accumulated = Value::Array(captures.clone());
                    let sandbox = Sandbox {
                        pre_json: &pre_json,
                        fields: &fields_value,
                        preconditions: &accumulated,
                    };
                    expr::eval_captures(actions, &sandbox)
                }
                None => Value::Object(Default::default()),
            };
            captures.push(capture);
        }

        Ok(captures)
    }

    /// Main-call URL: capture references first, then URL-encoded fields,
    /// then declared query parameters; GET additionally carries every
    /// remaining field as a query parameter.
    fn build_main_url(&self, spec: &WebhookSpec, fields: &FieldMap, captures: &[Value]) -> String {
        let url = template::resolve_precondition_refs(&spec.url, captures, true);
        let url = template::resolve_template_encoded(&url, fields);

        let pairs: Vec<(String, String)> = spec
            .query
            .iter()
            .map(|(k, v)| {
                let value = template::resolve_precondition_refs(v, captures, false);
                let value = template::resolve_template(&value, fields);
                (k.clone(), urlencoding::encode(&value).into_owned())
            })
            .collect();
        let mut url = template::append_query(&url, &pairs);

        if spec.method.eq_ignore_ascii_case("get") {
            let extra: Vec<(String, String)> = fields
                .iter()
                .filter(|(key, _)| {
                    !spec.query.contains_key(*key) && !url.contains(&format!("{}=", key))
                })
                .map(|(key, value)| {
                    (
                        key.clone(),
                        urlencoding::encode(&template::value_to_string(value)).into_owned(),
                    )
                })
                .collect();
            url = template::append_query(&url, &extra);
        }

        url
    }
}

fn map_transport(err: TransportError) -> ExecError {
    match err {
        TransportError::Timeout { url } => ExecError::Timeout(url),
        TransportError::Network(message) => ExecError::Network(message),
    }
}

/// Heuristic type recovery for LLM-extracted values that arrive as strings:
/// trim, coerce boolean literals, split comma lists that do not look like
/// serialized JSON.
pub fn normalize_fields(fields: FieldMap) -> FieldMap {
    fields
        .into_iter()
        .map(|(key, value)| {
            let normalized = match value {
                Value::String(s) => {
                    let trimmed = s.trim();
                    if trimmed == "true" {
                        Value::Bool(true)
                    } else if trimmed == "false" {
                        Value::Bool(false)
                    } else if trimmed.contains(',')
                        && !trimmed.starts_with('[')
                        && !trimmed.starts_with('{')
                    {
                        Value::Array(
                            trimmed
                                .split(',')
                                .map(|part| Value::String(part.trim().to_string()))
                                .collect(),
                        )
                    } else {
                        Value::String(trimmed.to_string())
                    }
                }
                other => other,
            };
            (key, normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::http::OutboundResponse;
    use chrono::{Datelike, Duration, Weekday};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // -- scripted transport --------------------------------------------------

    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<OutboundResponse, TransportError>>>,
        requests: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedTransport {
        fn push_ok(&self, status: u16, body: &str) {
            self.responses.lock().unwrap().push_back(Ok(OutboundResponse {
                status,
                status_text: match status {
                    200 => "OK",
                    409 => "Conflict",
                    500 => "Internal Server Error",
                    _ => "Unknown Status",
                }
                .to_string(),
                body: body.to_string(),
            }));
        }

        fn push_timeout(&self, url: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(TransportError::Timeout {
                    url: url.to_string(),
                }));
        }

        fn request_urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(
            &self,
            request: OutboundRequest,
        ) -> Result<OutboundResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("no scripted response".into())))
        }
    }

    fn utc() -> Tz {
        "UTC".parse().unwrap()
    }

    fn executor(transport: Arc<ScriptedTransport>, catalog: IntentionCatalog) -> Executor {
        Executor::new(
            transport,
            Arc::new(StaticTokenProvider::new("tok-1")),
            Arc::new(catalog),
            AvailabilityConfig {
                max_days_ahead: 365,
                ..AvailabilityConfig::default()
            },
        )
    }

    /// Next weekday, at least one day out.
    fn next_weekday() -> chrono::NaiveDate {
        let mut day = timezone::now_in(utc()) + Duration::days(1);
        while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            day += Duration::days(1);
        }
        day.date_naive()
    }

    fn at_hour(day: chrono::NaiveDate, hour: u32) -> String {
        day.and_hms_opt(hour, 0, 0)
            .unwrap()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }

    // -- normalization -------------------------------------------------------

    #[test]
    fn normalization_recovers_types_and_leaves_json_alone() {
        let mut fields = FieldMap::new();
        fields.insert("a".into(), json!("true"));
        fields.insert("b".into(), json!("1,2,3"));
        fields.insert("c".into(), json!("[1,2]"));
        fields.insert("d".into(), json!("  padded  "));

        let out = normalize_fields(fields);
        assert_eq!(out["a"], json!(true));
        assert_eq!(out["b"], json!(["1", "2", "3"]));
        assert_eq!(out["c"], json!("[1,2]"));
        assert_eq!(out["d"], json!("padded"));
    }

    // -- precondition chain --------------------------------------------------

    fn three_step_catalog() -> IntentionCatalog {
        IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: enroll_contact
    kind: webhook
    method: POST
    url: "https://crm.test/contacts"
    fields: []
    preconditions:
      - name: lookup
        method: GET
        url: "https://crm.test/lookup"
      - name: verify
        method: GET
        url: "https://crm.test/verify"
        failure_condition:
          eq:
            - path: pre_json.status
            - value: "blocked"
        failure_message: "This contact is blocked."
      - name: enrich
        method: GET
        url: "https://crm.test/enrich"
"#,
        )
        .expect("parse")
    }

    #[tokio::test]
    async fn failing_precondition_short_circuits_the_chain() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(200, "{}");
        transport.push_ok(200, r#"{"status": "blocked"}"#);

        let catalog = three_step_catalog();
        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("enroll_contact").unwrap();

        let err = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect_err("must abort");

        assert_eq!(err.to_string(), "This contact is blocked.");
        // The third step (and the main call) never ran.
        assert_eq!(transport.request_urls().len(), 2);
    }

    #[tokio::test]
    async fn non_2xx_precondition_embeds_status_and_error_message() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(500, r#"{"error": {"message": "boom"}}"#);

        let catalog = three_step_catalog();
        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("enroll_contact").unwrap();

        let err = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect_err("must abort");
        let text = err.to_string();
        assert!(text.contains("lookup"));
        assert!(text.contains("500"));
        assert!(text.contains("boom"));
        assert_eq!(transport.request_urls().len(), 1);
    }

    #[tokio::test]
    async fn failure_condition_sees_the_placeholder_not_accumulated_captures() {
        // Step 1 captures flag=true; step 2's failure condition reads
        // preconditions[0].flag. Under the placeholder semantics that path
        // resolves to null, so the chain continues.
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(200, r#"{"flag": true}"#);
        transport.push_ok(200, "{}");
        transport.push_ok(200, "{}");

        let catalog = IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: guarded
    kind: webhook
    method: POST
    url: "https://x.test/go"
    fields: []
    preconditions:
      - name: first
        method: GET
        url: "https://x.test/one"
        success_action:
          flag:
            path: pre_json.flag
      - name: second
        method: GET
        url: "https://x.test/two"
        failure_condition:
          path: preconditions[0].flag
"#,
        )
        .expect("parse");

        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("guarded").unwrap();

        let outcome = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect("placeholder keeps the chain alive");
        assert!(outcome.success);
        assert_eq!(transport.request_urls().len(), 3);
    }

    #[tokio::test]
    async fn captures_feed_main_url_and_headers() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(200, r#"{"items": [{"id": "ev 42"}]}"#);
        transport.push_ok(200, r#"{"done": true}"#);

        let catalog = IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: update_event
    kind: webhook
    method: PATCH
    url: "https://cal.test/events/{{preconditions[0].event_id}}"
    headers:
      Authorization: "Bearer {{access_token}}"
      X-Contact: "{{contactName}}"
    fields:
      - name: Contact
        json_name: contactName
        field_type: text
        required: true
    preconditions:
      - name: find
        method: GET
        url: "https://cal.test/search?q={{contactName}}"
        success_action:
          event_id:
            path: pre_json.items[0].id
"#,
        )
        .expect("parse");

        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("update_event").unwrap();
        let mut fields = FieldMap::new();
        fields.insert("contactName".into(), json!("Ana"));

        let outcome = exec
            .execute(intention, fields, "agent-1", utc())
            .await
            .expect("execute");
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.data, json!({"done": true}));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].url, "https://cal.test/search?q=Ana");
        assert_eq!(requests[1].url, "https://cal.test/events/ev%2042");
        assert!(requests[1]
            .headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "Bearer tok-1"));
        assert!(requests[1]
            .headers
            .iter()
            .any(|(k, v)| k == "X-Contact" && v == "Ana"));
    }

    #[tokio::test]
    async fn get_requests_carry_remaining_fields_as_query() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(200, "{}");

        let catalog = IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: lookup_orders
    kind: webhook
    method: GET
    url: "https://shop.test/orders"
    query:
      limit: "10"
    fields:
      - name: Customer
        json_name: customerId
        field_type: text
        required: true
"#,
        )
        .expect("parse");

        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("lookup_orders").unwrap();
        let mut fields = FieldMap::new();
        fields.insert("customerId".into(), json!("c-7"));

        exec.execute(intention, fields, "agent-1", utc())
            .await
            .expect("execute");

        let url = &transport.request_urls()[0];
        assert!(url.starts_with("https://shop.test/orders?limit=10"));
        assert!(url.contains("customerId=c-7"));
        assert!(url.contains("timeZone=UTC"));
    }

    #[tokio::test]
    async fn invalid_body_template_is_a_configuration_error() {
        let transport = Arc::new(ScriptedTransport::default());
        let catalog = IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: broken_body
    kind: webhook
    method: POST
    url: "https://x.test/go"
    body: "{ this is not json"
    fields: []
"#,
        )
        .expect("parse");

        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("broken_body").unwrap();

        let err = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ExecError::Config(_)));
        assert!(transport.request_urls().is_empty());
    }

    #[tokio::test]
    async fn non_2xx_main_call_is_an_upstream_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(500, r#"{"error": {"message": "downstream exploded"}}"#);

        let catalog = IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: ping
    kind: webhook
    method: POST
    url: "https://x.test/ping"
    fields: []
"#,
        )
        .expect("parse");

        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("ping").unwrap();

        let err = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect_err("must fail");
        match &err {
            ExecError::Upstream { status, body, .. } => {
                assert_eq!(*status, 500);
                assert!(body.contains("downstream exploded"));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeouts_are_reported_distinctly() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_timeout("https://x.test/slow");

        let catalog = IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: slow_call
    kind: webhook
    method: POST
    url: "https://x.test/slow"
    fields: []
"#,
        )
        .expect("parse");

        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find("slow_call").unwrap();

        let err = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ExecError::Timeout(_)));
    }

    // -- local intentions ----------------------------------------------------

    struct EchoHandler;

    #[async_trait]
    impl LocalHandler for EchoHandler {
        async fn call(&self, fields: &FieldMap) -> Result<Value> {
            Ok(json!({"echo": Value::Object(fields.clone())}))
        }
    }

    fn local_catalog() -> IntentionCatalog {
        IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: transfer_to_human
    kind: local
    handler: human_handoff
    human_handoff: true
    fields: []
"#,
        )
        .expect("parse")
    }

    #[tokio::test]
    async fn local_handler_result_is_returned_verbatim() {
        let transport = Arc::new(ScriptedTransport::default());
        let catalog = local_catalog();
        let mut exec = executor(transport.clone(), catalog.clone());
        exec.register_handler("human_handoff", Arc::new(EchoHandler));

        let intention = catalog.find("transfer_to_human").unwrap();
        let mut fields = FieldMap::new();
        fields.insert("reason".into(), json!("billing question"));

        let outcome = exec
            .execute(intention, fields, "agent-1", utc())
            .await
            .expect("execute");
        assert_eq!(outcome.data["echo"]["reason"], json!("billing question"));
        assert!(transport.request_urls().is_empty());
    }

    #[tokio::test]
    async fn missing_local_handler_is_a_hard_error() {
        let transport = Arc::new(ScriptedTransport::default());
        let catalog = local_catalog();
        let exec = executor(transport, catalog.clone());
        let intention = catalog.find("transfer_to_human").unwrap();

        let err = exec
            .execute(intention, FieldMap::new(), "agent-1", utc())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ExecError::Config(_)));
    }

    // -- scheduling special case ---------------------------------------------

    fn scheduling_catalog() -> IntentionCatalog {
        IntentionCatalog::from_yaml(
            r#"
intentions:
  - tool_name: schedule_google_meeting
    kind: webhook
    method: POST
    url: "https://cal.test/events"
    fields:
      - name: Start
        json_name: startDateTime
        field_type: datetime
        required: true
      - name: End
        json_name: endDateTime
        field_type: datetime
        required: true
  - tool_name: suggest_available_google_meeting_slots
    kind: webhook
    method: GET
    url: "https://cal.test/slots"
    fields: []
"#,
        )
        .expect("parse")
    }

    #[tokio::test]
    async fn rejected_window_never_reaches_the_wire() {
        let transport = Arc::new(ScriptedTransport::default());
        let catalog = scheduling_catalog();
        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find(SCHEDULE_MEETING_TOOL).unwrap();

        let mut fields = FieldMap::new();
        fields.insert("startDateTime".into(), json!("2020-01-06T10:00:00"));
        fields.insert("endDateTime".into(), json!("2020-01-06T11:00:00"));

        let err = exec
            .execute(intention, fields, "agent-1", utc())
            .await
            .expect_err("must reject");
        assert!(matches!(err, ExecError::Schedule(_)));
        assert!(transport.request_urls().is_empty());
    }

    #[tokio::test]
    async fn slot_conflict_falls_back_to_suggestions() {
        let transport = Arc::new(ScriptedTransport::default());
        // Main scheduling call conflicts…
        transport.push_ok(409, r#"{"error": {"message": "Requested slot unavailable"}}"#);
        // …then the suggestion intention answers.
        transport.push_ok(200, r#"{"slots": ["2024-06-11T10:00:00Z"]}"#);

        let catalog = scheduling_catalog();
        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find(SCHEDULE_MEETING_TOOL).unwrap();

        let day = next_weekday();
        let mut fields = FieldMap::new();
        fields.insert("startDateTime".into(), json!(at_hour(day, 10)));
        fields.insert("endDateTime".into(), json!(at_hour(day, 11)));

        let err = exec
            .execute(intention, fields, "agent-1", utc())
            .await
            .expect_err("conflict becomes an error carrying suggestions");

        let urls = transport.request_urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[1].starts_with("https://cal.test/slots"));
        // Default 7-day window was synthesized.
        assert!(urls[1].contains("startSearch="));
        assert!(urls[1].contains("endSearch="));

        // The effective error is the serialized suggestion result.
        let payload: Value =
            serde_json::from_str(&err.to_string()).expect("error message is JSON");
        assert_eq!(payload["success"], json!(true));
        assert_eq!(payload["data"]["slots"][0], json!("2024-06-11T10:00:00Z"));
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_redirected() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_ok(500, r#"{"error": {"message": "auth expired"}}"#);

        let catalog = scheduling_catalog();
        let exec = executor(transport.clone(), catalog.clone());
        let intention = catalog.find(SCHEDULE_MEETING_TOOL).unwrap();

        let day = next_weekday();
        let mut fields = FieldMap::new();
        fields.insert("startDateTime".into(), json!(at_hour(day, 10)));
        fields.insert("endDateTime".into(), json!(at_hour(day, 11)));

        let err = exec
            .execute(intention, fields, "agent-1", utc())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ExecError::Upstream { .. }));
        assert_eq!(transport.request_urls().len(), 1);
    }
}
