//! Request-body validation and PII rejection. The public contract
//! is a single function, [`validate_batch`], that either returns every
//! event in the batch, fully decoded, or every error found — there is no
//! partial acceptance.

use std::collections::HashSet;

use analytics_common::event::{AnalyticsLevel, CoreFields, DetailedFields, Event, StandardFields};
use analytics_common::time::is_hour_aligned;
use serde_json::Value;

pub const MAX_BATCH_LEN: usize = 100;
pub const MIN_BATCH_LEN: usize = 1;
pub const MAX_BODY_BYTES: usize = 100 * 1024;

/// Forbidden field names, checked case-insensitively at any nesting
/// depth, including inside `parameters`.
const PII_FIELDS: &[&str] = &[
    "latitude",
    "longitude",
    "lat",
    "lon",
    "location",
    "address",
    "city",
    "street",
    "zip",
    "zipcode",
    "postal_code",
    "user_id",
    "userid",
    "user",
    "username",
    "email",
    "phone",
    "ip",
    "ip_address",
    "ipaddress",
    "name",
    "first_name",
    "last_name",
    "firstname",
    "lastname",
    "ssn",
    "social_security",
];

const CORE_FIELD_NAMES: &[&str] = &["version", "tool", "status", "timestamp_hour", "analytics_level"];
const STANDARD_FIELD_NAMES: &[&str] = &[
    "response_time_ms",
    "service",
    "cache_hit",
    "retry_count",
    "country",
    "error_type",
];
const DETAILED_FIELD_NAMES: &[&str] = &["parameters", "session_id", "sequence_number"];

/// Parses and validates a raw request body against the level-discriminated
/// schema. On any failure, every error found is returned together; on
/// success, every event has already been fully decoded.
///
/// `max_batch_len` is the caller-configured per-request cap (§6.6
/// `maxBatchSize`); it is clamped to [`MAX_BATCH_LEN`], the protocol's hard
/// ceiling, so a misconfigured value can never admit a batch larger than
/// the wire format itself allows.
pub fn validate_batch(body: &[u8], max_batch_len: usize) -> Result<Vec<Event>, Vec<String>> {
    let max_batch_len = max_batch_len.min(MAX_BATCH_LEN);

    if body.len() > MAX_BODY_BYTES {
        return Err(vec![format!(
            "request body exceeds maximum size of {MAX_BODY_BYTES} bytes"
        )]);
    }

    let envelope: Value = serde_json::from_slice(body)
        .map_err(|e| vec![format!("request body is not valid JSON: {e}")])?;

    let Some(events) = envelope.get("events").and_then(Value::as_array) else {
        return Err(vec!["request body must have an \"events\" array".to_string()]);
    };

    if events.is_empty() || events.len() > max_batch_len {
        return Err(vec![format!(
            "events must contain between {MIN_BATCH_LEN} and {max_batch_len} entries, got {}",
            events.len()
        )]);
    }

    let mut errors = Vec::new();
    let mut decoded = Vec::with_capacity(events.len());

    for (index, raw) in events.iter().enumerate() {
        match validate_event(raw) {
            Ok(event) => decoded.push(event),
            Err(event_errors) => {
                for message in event_errors {
                    errors.push(format!("events[{index}]: {message}"));
                }
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(decoded)
}

fn validate_event(raw: &Value) -> Result<Event, Vec<String>> {
    let mut errors = Vec::new();

    if let Some(field) = find_pii_field(raw) {
        errors.push(format!("field '{field}' is not allowed (PII)"));
        return Err(errors);
    }

    let Some(object) = raw.as_object() else {
        return Err(vec!["event must be a JSON object".to_string()]);
    };

    let level = match object.get("analytics_level").and_then(Value::as_str) {
        Some(raw_level) => match raw_level.parse::<AnalyticsLevel>() {
            Ok(level) => level,
            Err(e) => {
                errors.push(e);
                return Err(errors);
            }
        },
        None => {
            errors.push("missing required field 'analytics_level'".to_string());
            return Err(errors);
        }
    };

    let allowed: HashSet<&str> = allowed_field_names(level).into_iter().collect();
    for key in object.keys() {
        if !allowed.contains(key.as_str()) {
            errors.push(format!("field '{key}' is not allowed at level '{level}'"));
        }
    }

    let core = match decode_core(object) {
        Ok(core) => Some(core),
        Err(mut e) => {
            errors.append(&mut e);
            None
        }
    };

    let standard = if level != AnalyticsLevel::Minimal {
        match decode_standard(object) {
            Ok(standard) => Some(standard),
            Err(mut e) => {
                errors.append(&mut e);
                None
            }
        }
    } else {
        None
    };

    let detailed = if level == AnalyticsLevel::Detailed {
        match decode_detailed(object) {
            Ok(detailed) => Some(detailed),
            Err(mut e) => {
                errors.append(&mut e);
                None
            }
        }
    } else {
        None
    };

    if let (Some(core), Some(standard)) = (&core, &standard) {
        if core.status == analytics_common::event::Status::Error {
            let has_error_type = standard
                .error_type
                .as_ref()
                .is_some_and(|s| !s.trim().is_empty());
            if !has_error_type {
                errors.push("'error_type' is required when status is 'error'".to_string());
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let core = core.expect("present when errors is empty");
    Ok(match level {
        AnalyticsLevel::Minimal => Event::Minimal { core },
        AnalyticsLevel::Standard => Event::Standard {
            core,
            standard: standard.expect("present when errors is empty"),
        },
        AnalyticsLevel::Detailed => Event::Detailed {
            core,
            standard: standard.expect("present when errors is empty"),
            detailed: detailed.expect("present when errors is empty"),
        },
    })
}

fn allowed_field_names(level: AnalyticsLevel) -> Vec<&'static str> {
    let mut fields = CORE_FIELD_NAMES.to_vec();
    if level != AnalyticsLevel::Minimal {
        fields.extend_from_slice(STANDARD_FIELD_NAMES);
    }
    if level == AnalyticsLevel::Detailed {
        fields.extend_from_slice(DETAILED_FIELD_NAMES);
    }
    fields
}

fn decode_core(object: &serde_json::Map<String, Value>) -> Result<CoreFields, Vec<String>> {
    let mut errors = Vec::new();

    let version = object.get("version").and_then(Value::as_str).map(str::to_string);
    if version.is_none() {
        errors.push("missing required field 'version'".to_string());
    }

    let tool = match object.get("tool").and_then(Value::as_str) {
        Some(s) => s.parse().map_err(|e| errors.push(e)).ok(),
        None => {
            errors.push("missing required field 'tool'".to_string());
            None
        }
    };

    let status = match object.get("status").and_then(Value::as_str) {
        Some(s) => s.parse().map_err(|e| errors.push(e)).ok(),
        None => {
            errors.push("missing required field 'status'".to_string());
            None
        }
    };

    let timestamp_hour = match object.get("timestamp_hour").and_then(Value::as_str) {
        Some(s) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(dt) => {
                let dt = dt.with_timezone(&chrono::Utc);
                if is_hour_aligned(dt) {
                    Some(dt)
                } else {
                    errors.push(
                        "'timestamp_hour' must have zero minutes, seconds and milliseconds"
                            .to_string(),
                    );
                    None
                }
            }
            Err(_) => {
                errors.push("'timestamp_hour' is not a valid RFC3339 instant".to_string());
                None
            }
        },
        None => {
            errors.push("missing required field 'timestamp_hour'".to_string());
            None
        }
    };

    let analytics_level = object
        .get("analytics_level")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(CoreFields {
        version: version.expect("checked above"),
        tool: tool.expect("checked above"),
        status: status.expect("checked above"),
        timestamp_hour: timestamp_hour.expect("checked above"),
        analytics_level: analytics_level.expect("checked above"),
    })
}

fn decode_standard(object: &serde_json::Map<String, Value>) -> Result<StandardFields, Vec<String>> {
    let mut errors = Vec::new();

    let response_time_ms = match object.get("response_time_ms") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if (0..=120_000).contains(&n) => Some(n as i32),
            _ => {
                errors.push("'response_time_ms' must be an integer in 0..=120000".to_string());
                None
            }
        },
    };

    let service = match object.get("service") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match s.parse() {
            Ok(service) => Some(service),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        Some(_) => {
            errors.push("'service' must be a string".to_string());
            None
        }
    };

    let cache_hit = match object.get("cache_hit") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            errors.push("'cache_hit' must be a boolean".to_string());
            None
        }
    };

    let retry_count = match object.get("retry_count") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if (0..=10).contains(&n) => Some(n as i16),
            _ => {
                errors.push("'retry_count' must be an integer in 0..=10".to_string());
                None
            }
        },
    };

    let country = match object.get("country") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let is_valid = s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic());
            if is_valid {
                Some(s.to_uppercase())
            } else {
                errors.push("'country' must be 2 ASCII letters".to_string());
                None
            }
        }
        Some(_) => {
            errors.push("'country' must be a string".to_string());
            None
        }
    };

    let error_type = match object.get("error_type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            if s.chars().count() > 100 {
                errors.push("'error_type' must be at most 100 characters".to_string());
                None
            } else {
                Some(s.clone())
            }
        }
        Some(_) => {
            errors.push("'error_type' must be a string".to_string());
            None
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(StandardFields {
        response_time_ms,
        service,
        cache_hit,
        retry_count,
        country,
        error_type,
    })
}

fn decode_detailed(object: &serde_json::Map<String, Value>) -> Result<DetailedFields, Vec<String>> {
    let mut errors = Vec::new();

    let parameters = match object.get("parameters") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(
            map.iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<std::collections::HashMap<_, _>>(),
        ),
        Some(_) => {
            errors.push("'parameters' must be an object".to_string());
            None
        }
    };

    let session_id = match object.get("session_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            if s.chars().count() == 16 {
                Some(s.clone())
            } else {
                errors.push("'session_id' must be exactly 16 characters".to_string());
                None
            }
        }
        Some(_) => {
            errors.push("'session_id' must be a string".to_string());
            None
        }
    };

    let sequence_number = match object.get("sequence_number") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Some(n),
            _ => {
                errors.push("'sequence_number' must be a non-negative integer".to_string());
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(DetailedFields {
        parameters,
        session_id,
        sequence_number,
    })
}

fn find_pii_field(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if PII_FIELDS.contains(&key.to_lowercase().as_str()) {
                    return Some(key.clone());
                }
                if let Some(found) = find_pii_field(nested) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(find_pii_field),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_event() -> Value {
        json!({
            "version": "1.0.0",
            "tool": "get_forecast",
            "status": "success",
            "timestamp_hour": "2025-11-12T20:00:00Z",
            "analytics_level": "minimal",
        })
    }

    #[test]
    fn accepts_minimal_happy_path() {
        let body = json!({"events": [minimal_event()]}).to_string();
        let events = validate_batch(body.as_bytes(), MAX_BATCH_LEN).expect("should validate");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Minimal { .. }));
    }

    #[test]
    fn rejects_pii_field() {
        let mut event = minimal_event();
        event["latitude"] = json!(40.7);
        let body = json!({"events": [event]}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("latitude"), "{err:?}");
    }

    #[test]
    fn rejects_nested_pii_in_parameters() {
        let mut event = minimal_event();
        event["analytics_level"] = json!("detailed");
        event["parameters"] = json!({"query": {"email": "a@b.com"}});
        let body = json!({"events": [event]}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("email"), "{err:?}");
    }

    #[test]
    fn rejects_unaligned_timestamp() {
        let mut event = minimal_event();
        event["timestamp_hour"] = json!("2025-11-12T20:34:12Z");
        let body = json!({"events": [event]}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("timestamp_hour"), "{err:?}");
    }

    #[test]
    fn rejects_unknown_field_at_level() {
        let mut event = minimal_event();
        event["response_time_ms"] = json!(120);
        let body = json!({"events": [event]}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("not allowed"), "{err:?}");
    }

    #[test]
    fn requires_error_type_for_error_status_above_minimal() {
        let mut event = minimal_event();
        event["analytics_level"] = json!("standard");
        event["status"] = json!("error");
        let body = json!({"events": [event]}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("error_type"), "{err:?}");
    }

    #[test]
    fn rejects_empty_batch() {
        let body = json!({"events": []}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("between"), "{err:?}");
    }

    #[test]
    fn rejects_oversized_batch() {
        let events: Vec<Value> = (0..101).map(|_| minimal_event()).collect();
        let body = json!({"events": events}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert!(err[0].contains("between"), "{err:?}");
    }

    #[test]
    fn honors_a_caller_configured_batch_cap_below_the_protocol_max() {
        let events: Vec<Value> = (0..10).map(|_| minimal_event()).collect();
        let body = json!({"events": events}).to_string();
        assert!(validate_batch(body.as_bytes(), 10).is_ok());
        let err = validate_batch(body.as_bytes(), 5).unwrap_err();
        assert!(err[0].contains("between"), "{err:?}");
    }

    #[test]
    fn clamps_a_caller_configured_cap_above_the_protocol_max() {
        let events: Vec<Value> = (0..101).map(|_| minimal_event()).collect();
        let body = json!({"events": events}).to_string();
        let err = validate_batch(body.as_bytes(), 1000).unwrap_err();
        assert!(err[0].contains("between"), "{err:?}");
    }

    #[test]
    fn no_partial_acceptance_all_errors_reported() {
        let mut bad = minimal_event();
        bad["timestamp_hour"] = json!("2025-11-12T20:34:12Z");
        let body = json!({"events": [minimal_event(), bad]}).to_string();
        let err = validate_batch(body.as_bytes(), MAX_BATCH_LEN).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].starts_with("events[1]"));
    }
}
