//! Field-level record diffs for audit entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Compare two serialized records top-level field by field.
///
/// Records that do not serialize to JSON objects are compared as a whole and
/// reported under the field name `"*"`.
pub fn record_diff<T: Serialize>(before: &T, after: &T) -> Vec<FieldChange> {
    let before = serde_json::to_value(before).unwrap_or(Value::Null);
    let after = serde_json::to_value(after).unwrap_or(Value::Null);

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
            keys.sort();
            keys.dedup();

            keys.into_iter()
                .filter_map(|key| {
                    let old_value = old.get(key).cloned().unwrap_or(Value::Null);
                    let new_value = new.get(key).cloned().unwrap_or(Value::Null);
                    (old_value != new_value).then(|| FieldChange {
                        field: key.clone(),
                        old: old_value,
                        new: new_value,
                    })
                })
                .collect()
        }
        (old, new) if old != new => vec![FieldChange {
            field: "*".to_string(),
            old,
            new,
        }],
        _ => Vec::new(),
    }
}

/// Render changes as `{"field": {"old": .., "new": ..}}`.
pub fn diff_notes(changes: &[FieldChange]) -> Value {
    let mut map = Map::new();
    for change in changes {
        let mut entry = Map::new();
        entry.insert("old".to_string(), change.old.clone());
        entry.insert("new".to_string(), change.new.clone());
        map.insert(change.field.clone(), Value::Object(entry));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: String,
        status: String,
        emulated: bool,
    }

    #[test]
    fn test_diff_reports_changed_fields_only() {
        let before = Sample {
            name: "zone-a".to_string(),
            status: "enable".to_string(),
            emulated: false,
        };
        let after = Sample {
            name: "zone-a2".to_string(),
            status: "enable".to_string(),
            emulated: true,
        };

        let changes = record_diff(&before, &after);
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["emulated", "name"]);

        let notes = diff_notes(&changes);
        assert_eq!(notes["name"]["old"], "zone-a");
        assert_eq!(notes["name"]["new"], "zone-a2");
    }

    #[test]
    fn test_identical_records_have_no_diff() {
        let a = Sample {
            name: "x".to_string(),
            status: "s".to_string(),
            emulated: false,
        };
        let b = Sample {
            name: "x".to_string(),
            status: "s".to_string(),
            emulated: false,
        };
        assert!(record_diff(&a, &b).is_empty());
    }

    #[test]
    fn test_scalar_values_compare_whole() {
        let changes = record_diff(&1, &2);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "*");
        assert!(record_diff(&"a", &"a").is_empty());
    }
}
