//! Audit trail.
//!
//! Every successful mutation appends one row to the activity log: who did
//! it, which procedure ran, which entity it touched, and a sanitized copy of
//! the request payload. Writing the audit row never fails the operation that
//! produced it.

use serde_json::Value;
use tracing::warn;

use crate::permissions::Caller;
use crate::storage::Storage;

const MAX_STRING_CHARS: usize = 100;
const MAX_ARRAY_ITEMS: usize = 10;

/// Append an activity entry for `action` performed by `caller`.
pub fn record(
    storage: &mut Storage,
    caller: &Caller,
    action: &str,
    entity_type: &str,
    entity_id: Option<i64>,
    details: &Value,
) {
    let details = sanitize(details);
    if let Err(e) = storage.insert_activity(caller.user_id, action, entity_type, entity_id, &details)
    {
        warn!(action, entity_type, ?entity_id, "failed to write activity log: {}", e);
    }
}

/// Sanitize a payload for the audit trail.
///
/// - Keys naming credentials are redacted
/// - Arrays longer than ten entries are summarized
/// - Strings longer than 100 characters are truncated
fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, value) in map {
                let key_lower = key.to_lowercase();
                if key_lower.contains("password")
                    || key_lower.contains("token")
                    || key_lower.contains("secret")
                {
                    sanitized.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    sanitized.insert(key.clone(), sanitize(value));
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => {
            if arr.len() > MAX_ARRAY_ITEMS {
                Value::String(format!("[Array with {} items]", arr.len()))
            } else {
                Value::Array(arr.iter().map(sanitize).collect())
            }
        }
        Value::String(s) => {
            let chars = s.chars().count();
            if chars > MAX_STRING_CHARS {
                let head: String = s.chars().take(MAX_STRING_CHARS - 3).collect();
                Value::String(format!("{}... ({} chars)", head, chars))
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::storage::notifications::ActivityFilter;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_redacts_credentials() {
        let sanitized = sanitize(&json!({
            "api_token": "abc",
            "Password": "hunter2",
            "title": "Crack in slab"
        }));
        assert_eq!(sanitized["api_token"], "[REDACTED]");
        assert_eq!(sanitized["Password"], "[REDACTED]");
        assert_eq!(sanitized["title"], "Crack in slab");
    }

    #[test]
    fn test_sanitize_keeps_urls_intact() {
        let sanitized = sanitize(&json!({"after_photos": ["https://cdn.site/a/b.jpg"]}));
        assert_eq!(sanitized["after_photos"][0], "https://cdn.site/a/b.jpg");
    }

    #[test]
    fn test_sanitize_summarizes_large_arrays() {
        let items: Vec<i32> = (0..25).collect();
        let sanitized = sanitize(&json!({ "results": items }));
        assert_eq!(sanitized["results"], "[Array with 25 items]");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundaries() {
        let long = "ก".repeat(150);
        let sanitized = sanitize(&json!(long));
        let s = sanitized.as_str().unwrap();
        assert!(s.ends_with("... (150 chars)"));
        assert_eq!(s.chars().filter(|c| *c == 'ก').count(), 97);
    }

    #[test]
    fn test_record_writes_activity() {
        let temp = TempDir::new().unwrap();
        let mut storage = Storage::init(temp.path()).unwrap();
        let caller = Caller::new(7, Role::QcInspector);

        record(
            &mut storage,
            &caller,
            "defect.update",
            "defect",
            Some(3),
            &json!({"status": "analysis", "secret_note": "x"}),
        );

        let entries = storage
            .list_activity(&ActivityFilter {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, 7);
        assert_eq!(entries[0].entity_id, Some(3));
        assert_eq!(entries[0].details["secret_note"], "[REDACTED]");
    }
}
