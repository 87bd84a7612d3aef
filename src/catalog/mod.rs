//! Tenant intention catalog.
//!
//! Intentions are tenant-configured actions the agent can perform: either a
//! templated outbound HTTP call chain (webhook) or an in-process handler
//! (local). The catalog is loaded from a YAML file at startup and is
//! read-only during conversation processing.

use crate::intent::expr::Expr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Tool name of the meeting-scheduling intention that is routed through
/// availability validation before execution.
pub const SCHEDULE_MEETING_TOOL: &str = "schedule_google_meeting";

/// Tool name of the intention invoked automatically when scheduling hits a
/// slot conflict.
pub const SUGGEST_SLOTS_TOOL: &str = "suggest_available_google_meeting_slots";

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// A tenant-configured definition of an action the agent can perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intention {
    /// Non-empty trimmed string used as the LLM function name.
    pub tool_name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Arguments the intention accepts. `None` marks a catalog entry with no
    /// field list at all; such an entry is never exposed to the model.
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,

    /// Human-handoff intentions get asynchronous-transfer wording in error
    /// replies (no transferee name).
    #[serde(default)]
    pub human_handoff: bool,

    #[serde(flatten)]
    pub kind: IntentionKind,
}

impl Intention {
    /// Eligible for tool mapping: non-empty trimmed tool name and a field
    /// list (possibly empty).
    pub fn mappable(&self) -> bool {
        !self.tool_name.trim().is_empty() && self.fields.is_some()
    }

    /// The field list, empty when the entry carries none.
    pub fn field_specs(&self) -> &[FieldSpec] {
        self.fields.as_deref().unwrap_or(&[])
    }

    pub fn description_or_default(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or("No description provided.")
    }
}

/// Execution shape of an intention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentionKind {
    /// Bound in-process handler, referenced by registry name.
    Local { handler: String },
    /// Templated outbound HTTP call with optional precondition steps.
    Webhook(WebhookSpec),
}

/// Webhook call definition: URL/header/body templates plus preconditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSpec {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
}

/// One argument an intention accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Display name.
    pub name: String,

    /// Machine key; fields without one cannot be requested from the model
    /// and are skipped when building tool schemas.
    #[serde(default)]
    pub json_name: Option<String>,

    #[serde(default)]
    pub field_type: FieldType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,
}

/// Field value types, mapped to JSON-schema primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "&'static str")]
pub enum FieldType {
    #[default]
    Text,
    Url,
    Date,
    DateTime,
    Number,
    Boolean,
    /// Unrecognized labels degrade to string-typed.
    Other,
}

impl From<String> for FieldType {
    fn from(label: String) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            "url" => Self::Url,
            "date" => Self::Date,
            "datetime" | "date_time" => Self::DateTime,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            _ => Self::Other,
        }
    }
}

impl From<FieldType> for &'static str {
    fn from(ft: FieldType) -> Self {
        match ft {
            FieldType::Text => "text",
            FieldType::Url => "url",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Other => "other",
        }
    }
}

impl FieldType {
    /// JSON-schema type for this field type. Total: every label maps to one
    /// of `string` / `number` / `boolean`.
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            _ => "string",
        }
    }
}

/// One HTTP step executed before an intention's main call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,

    /// Evaluated against the sandboxed response context; truthy aborts the
    /// whole intention.
    #[serde(default)]
    pub failure_condition: Option<Expr>,

    #[serde(default)]
    pub failure_message: Option<String>,

    /// Derived values captured from the response, addressable in later
    /// templates as `preconditions[i].<key>`.
    #[serde(default)]
    pub success_action: Option<BTreeMap<String, Expr>>,
}

// ---------------------------------------------------------------------------
// Catalog loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    intentions: Vec<Intention>,
}

/// The loaded, read-only intention catalog for one tenant.
#[derive(Debug, Clone, Default)]
pub struct IntentionCatalog {
    intentions: Vec<Intention>,
}

impl IntentionCatalog {
    pub fn new(intentions: Vec<Intention>) -> Self {
        Self { intentions }
    }

    /// Load the catalog from a YAML file. A missing file yields an empty
    /// catalog (the agent still answers free-form).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No intention catalog at {:?}, starting empty", path);
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).context("Failed to read intention catalog")?;
        let catalog = Self::from_yaml(&contents)?;
        info!(
            "Loaded {} intentions from {:?}",
            catalog.intentions.len(),
            path
        );
        Ok(catalog)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_yaml::from_str(contents).context("Failed to parse intention catalog (YAML)")?;
        Ok(Self::new(file.intentions))
    }

    pub fn all(&self) -> &[Intention] {
        &self.intentions
    }

    /// Find the intention whose tool name equals the called function name.
    pub fn find(&self, tool_name: &str) -> Option<&Intention> {
        self.intentions.iter().find(|i| i.tool_name == tool_name)
    }

    pub fn is_empty(&self) -> bool {
        self.intentions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intentions.len()
    }

    /// Static checks over the catalog. Returns human-readable problems;
    /// an empty list means the catalog is well-formed.
    pub fn lint(&self, known_handlers: &[&str]) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for intention in &self.intentions {
            let name = intention.tool_name.trim();
            if name.is_empty() {
                problems.push("intention with empty tool_name".to_string());
                continue;
            }
            if !seen.insert(name.to_string()) {
                problems.push(format!("duplicate tool_name '{}'", name));
            }
            if intention.fields.is_none() {
                problems.push(format!(
                    "intention '{}' has no field list and will never be offered to the model",
                    name
                ));
            }
            for field in intention.field_specs() {
                if field.json_name.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    problems.push(format!(
                        "intention '{}' field '{}' lacks a json_name and cannot be requested",
                        name, field.name
                    ));
                }
            }
            match &intention.kind {
                IntentionKind::Local { handler } => {
                    if !known_handlers.contains(&handler.as_str()) {
                        problems.push(format!(
                            "intention '{}' references unknown local handler '{}'",
                            name, handler
                        ));
                    }
                }
                IntentionKind::Webhook(spec) => {
                    if spec.url.trim().is_empty() {
                        problems.push(format!("intention '{}' has an empty URL", name));
                    }
                    if spec.method.trim().is_empty() {
                        problems.push(format!("intention '{}' has an empty HTTP method", name));
                    }
                    for pre in &spec.preconditions {
                        if pre.url.trim().is_empty() {
                            problems.push(format!(
                                "intention '{}' precondition '{}' has an empty URL",
                                name, pre.name
                            ));
                        }
                    }
                }
            }
        }
        problems
    }
}
