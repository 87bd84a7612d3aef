//! Slot-filling: which required fields is the user still missing?
//!
//! Evaluated fresh every turn from the model's current extraction; the chat
//! layer owns the multi-turn surface (the clarification exchange re-enters as
//! conversation history).

use crate::catalog::{FieldType, Intention};
use crate::intent::expr::truthy;
use crate::types::{FieldMap, MissingField};
use serde_json::Value;

/// Required fields not yet supplied in the extracted map. A field counts as
/// supplied when its key holds a non-empty, non-zero value; boolean-typed
/// fields only need the key present with a non-null value, so an extracted
/// `false` is not mistaken for absence.
pub fn missing_fields(intention: &Intention, extracted: &FieldMap) -> Vec<MissingField> {
    intention
        .field_specs()
        .iter()
        .filter_map(|field| {
            if !field.required {
                return None;
            }
            let json_name = field.json_name.as_deref()?.trim();
            if json_name.is_empty() {
                return None;
            }
            let supplied = extracted
                .get(json_name)
                .map(|value| is_supplied(field.field_type, value))
                .unwrap_or(false);
            if supplied {
                return None;
            }
            Some(MissingField {
                name: field.name.clone(),
                json_name: json_name.to_string(),
                description: field.description.clone(),
            })
        })
        .collect()
}

/// Known (supplied) fields, the complement used in clarification replies.
pub fn collected_fields(intention: &Intention, extracted: &FieldMap) -> FieldMap {
    let missing: Vec<String> = missing_fields(intention, extracted)
        .into_iter()
        .map(|f| f.json_name)
        .collect();
    extracted
        .iter()
        .filter(|(k, _)| !missing.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_supplied(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::Boolean => !value.is_null(),
        _ => truthy(value),
    }
}
