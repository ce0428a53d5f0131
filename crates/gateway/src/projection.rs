//! Response field projection.
//!
//! A `FieldMask` is an explicit allow/deny list of named attributes,
//! applied to the serialized record after it is materialized. Callers pass
//! `fields=` and `exclude=` as comma-separated lists; unknown names are
//! ignored rather than rejected.

use std::collections::HashSet;

/// An allow/deny list over the top-level fields of a serialized record.
#[derive(Debug, Clone, Default)]
pub struct FieldMask {
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
}

impl FieldMask {
    /// Parse from the `fields` / `exclude` query parameters.
    pub fn from_params(fields: Option<&str>, exclude: Option<&str>) -> Self {
        let parse = |raw: &str| -> HashSet<String> {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        Self {
            include: fields.map(parse).filter(|set| !set.is_empty()),
            exclude: exclude.map(parse).unwrap_or_default(),
        }
    }

    /// Whether applying this mask changes anything.
    pub fn is_noop(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty()
    }

    /// Apply the mask to a serialized record in place. Non-object values
    /// pass through untouched.
    pub fn apply(&self, value: &mut serde_json::Value) {
        let Some(map) = value.as_object_mut() else {
            return;
        };

        if let Some(allowed) = &self.include {
            map.retain(|key, _| allowed.contains(key));
        }

        for key in &self.exclude {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> serde_json::Value {
        json!({ "id": 1, "topic": "Topic1", "created_at": "2024-01-01T00:00:00Z", "turns": [] })
    }

    #[test]
    fn no_params_is_noop() {
        let mask = FieldMask::from_params(None, None);
        assert!(mask.is_noop());

        let mut value = record();
        mask.apply(&mut value);
        assert_eq!(value, record());
    }

    #[test]
    fn fields_keeps_only_named_keys() {
        let mask = FieldMask::from_params(Some("topic,id"), None);
        let mut value = record();
        mask.apply(&mut value);

        let map = value.as_object().unwrap();
        assert!(map.contains_key("topic"));
        assert!(map.contains_key("id"));
        assert!(!map.contains_key("created_at"));
        assert!(!map.contains_key("turns"));
    }

    #[test]
    fn exclude_removes_named_keys() {
        let mask = FieldMask::from_params(None, Some("topic"));
        let mut value = record();
        mask.apply(&mut value);

        let map = value.as_object().unwrap();
        assert!(!map.contains_key("topic"));
        assert!(map.contains_key("id"));
    }

    #[test]
    fn exclude_applies_after_fields() {
        let mask = FieldMask::from_params(Some("id,topic"), Some("topic"));
        let mut value = record();
        mask.apply(&mut value);

        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("id"));
    }

    #[test]
    fn whitespace_and_empties_tolerated() {
        let mask = FieldMask::from_params(Some(" id , ,topic "), None);
        let mut value = record();
        mask.apply(&mut value);
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn unknown_names_are_ignored() {
        let mask = FieldMask::from_params(None, Some("no_such_field"));
        let mut value = record();
        mask.apply(&mut value);
        assert_eq!(value, record());
    }
}
