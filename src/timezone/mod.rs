//! Timezone label resolution and date/time field normalization.
//!
//! Tenant settings store a human-readable timezone label; webhook APIs want
//! IANA-zone-aware ISO-8601 values. Start/end instants are converted to UTC,
//! while free-busy range bounds keep local wall-clock time with a numeric
//! offset suffix, because downstream calendar APIs expect exactly that split.

use crate::types::FieldMap;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::HashMap;

/// Fields converted to UTC instants (second precision, no milliseconds).
const UTC_INSTANT_FIELDS: &[&str] = &["startDateTime", "endDateTime", "startSearch", "endSearch"];

/// Fields that keep local wall-clock time with a `±HH:MM` offset suffix.
const OFFSET_FIELDS: &[&str] = &["timeMin", "timeMax"];

/// Built-in display-label → IANA zone table. Tenant config may extend it.
const LABEL_TABLE: &[(&str, &str)] = &[
    ("Brasília (GMT-3)", "America/Sao_Paulo"),
    ("Fernando de Noronha (GMT-2)", "America/Noronha"),
    ("Manaus (GMT-4)", "America/Manaus"),
    ("Rio Branco (GMT-5)", "America/Rio_Branco"),
    ("Buenos Aires (GMT-3)", "America/Argentina/Buenos_Aires"),
    ("Santiago (GMT-4)", "America/Santiago"),
    ("Bogotá (GMT-5)", "America/Bogota"),
    ("Lima (GMT-5)", "America/Lima"),
    ("Cidade do México (GMT-6)", "America/Mexico_City"),
    ("Nova Iorque (GMT-5)", "America/New_York"),
    ("Lisboa (GMT+0)", "Europe/Lisbon"),
    ("Londres (GMT+0)", "Europe/London"),
    ("Madri (GMT+1)", "Europe/Madrid"),
    ("UTC", "UTC"),
];

/// Resolve a timezone display label to an IANA zone. Pure lookup: tenant
/// overrides first, then the built-in table, then a direct IANA parse.
pub fn zone_for_label(label: &str, overrides: &HashMap<String, String>) -> Option<Tz> {
    if let Some(zone) = overrides.get(label) {
        return zone.parse().ok();
    }
    if let Some((_, zone)) = LABEL_TABLE.iter().find(|(l, _)| *l == label) {
        return zone.parse().ok();
    }
    label.parse().ok()
}

/// Normalize every date/time field in place for the resolved zone and record
/// the zone name under `timeZone`.
pub fn normalize_datetime_fields(fields: &mut FieldMap, tz: Tz) -> Result<(), String> {
    for key in UTC_INSTANT_FIELDS {
        if let Some(raw) = field_str(fields, key) {
            let instant = to_utc_instant(&raw, tz)
                .ok_or_else(|| format!("field '{}' has unparseable date/time '{}'", key, raw))?;
            fields.insert(
                key.to_string(),
                Value::String(instant.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
    }

    for key in OFFSET_FIELDS {
        if let Some(raw) = field_str(fields, key) {
            let local = to_local(&raw, tz)
                .ok_or_else(|| format!("field '{}' has unparseable date/time '{}'", key, raw))?;
            fields.insert(
                key.to_string(),
                Value::String(local.format("%Y-%m-%dT%H:%M:%S%:z").to_string()),
            );
        }
    }

    fields.insert(
        "timeZone".to_string(),
        Value::String(tz.name().to_string()),
    );
    Ok(())
}

/// Current time in the given zone (used for default search windows).
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// Parse a caller-supplied stamp into zone-local time (naive values keep
/// their wall-clock reading).
pub fn local_datetime(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
    to_local(raw, tz)
}

fn field_str(fields: &FieldMap, key: &str) -> Option<String> {
    fields.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Parse a caller-supplied stamp and convert it to a UTC instant. Naive
/// values are interpreted in the resolved zone.
fn to_utc_instant(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = parse_naive(raw)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a caller-supplied stamp into zone-local time, preserving wall-clock
/// for naive values.
fn to_local(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&tz));
    }
    let naive = parse_naive(raw)?;
    tz.from_local_datetime(&naive).earliest()
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw.trim(), format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
