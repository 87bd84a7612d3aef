//! Maps catalog intentions into tool definitions for the LLM.

use crate::catalog::Intention;
use crate::llm::ToolDefinition;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Build the tool definitions exposed to the model. Intentions without a
/// usable tool name or field list are skipped; fields without a machine key
/// are skipped, since the model could never fill them.
pub fn build_tool_definitions(intentions: &[Intention]) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();

    for intention in intentions {
        if !intention.mappable() {
            warn!(
                "Skipping intention '{}': no tool name or field list",
                intention.tool_name
            );
            continue;
        }

        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in intention.field_specs() {
            let json_name = match field.json_name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name,
                _ => {
                    warn!(
                        "Intention '{}': field '{}' has no json_name, skipped",
                        intention.tool_name, field.name
                    );
                    continue;
                }
            };

            properties.insert(
                json_name.to_string(),
                json!({
                    "type": field.field_type.json_type(),
                    "description": field.description,
                }),
            );
            if field.required {
                required.push(Value::String(json_name.to_string()));
            }
        }

        tools.push(ToolDefinition {
            name: intention.tool_name.trim().to_string(),
            description: intention.description_or_default().to_string(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        });
    }

    tools
}
