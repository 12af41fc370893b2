//! Deep merge for option objects.
//!
//! Conflict policy, applied recursively:
//! - a value set in the override wins over the base;
//! - an unset (`None`) field in the override leaves the base untouched;
//! - nested objects (JSON objects, header maps, destinations) merge key by key;
//! - arrays and scalars replace, they never concatenate;
//! - an explicit JSON `null` in the override replaces the base value.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Types that can absorb a partial override of themselves.
pub trait Merge {
    /// Merge `other` into `self` following the module-level policy.
    fn merge_from(&mut self, other: &Self);

    /// Return a new value: `self` overlaid with `other`.
    fn merged_with(&self, other: &Self) -> Self
    where
        Self: Clone,
    {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }
}

impl<T: Clone> Merge for Option<T> {
    fn merge_from(&mut self, other: &Self) {
        if let Some(value) = other {
            *self = Some(value.clone());
        }
    }
}

impl Merge for BTreeMap<String, String> {
    fn merge_from(&mut self, other: &Self) {
        for (key, value) in other {
            self.insert(key.clone(), value.clone());
        }
    }
}

impl Merge for Map<String, Value> {
    fn merge_from(&mut self, other: &Self) {
        for (key, value) in other {
            match self.get_mut(key) {
                Some(existing) => deep_merge_value(existing, value),
                None => {
                    self.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Recursively merge `source` into `target`.
pub fn deep_merge_value(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            target_map.merge_from(source_map);
        }
        (target, source) => {
            *target = source.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_and_later_wins() {
        let mut base = json!({ "a": 1, "nested": { "x": 1, "y": 2 } });
        deep_merge_value(&mut base, &json!({ "nested": { "y": 3, "z": 4 }, "b": true }));
        assert_eq!(
            base,
            json!({ "a": 1, "b": true, "nested": { "x": 1, "y": 3, "z": 4 } })
        );
    }

    #[test]
    fn arrays_replace_instead_of_concatenating() {
        let mut base = json!({ "tags": ["a", "b", "c"] });
        deep_merge_value(&mut base, &json!({ "tags": ["d"] }));
        assert_eq!(base, json!({ "tags": ["d"] }));
    }

    #[test]
    fn explicit_null_replaces() {
        let mut base = json!({ "token": "abc" });
        deep_merge_value(&mut base, &json!({ "token": null }));
        assert_eq!(base, json!({ "token": null }));
    }

    #[test]
    fn none_leaves_base_untouched() {
        let mut base = Some(5);
        base.merge_from(&None);
        assert_eq!(base, Some(5));
        base.merge_from(&Some(7));
        assert_eq!(base, Some(7));
    }

    #[test]
    fn header_maps_merge_key_by_key() {
        let mut base = BTreeMap::from([
            ("accept".to_string(), "json".to_string()),
            ("x-a".to_string(), "1".to_string()),
        ]);
        let other = BTreeMap::from([("x-a".to_string(), "2".to_string())]);
        let merged = base.merged_with(&other);
        base.merge_from(&other);
        assert_eq!(merged, base);
        assert_eq!(base["x-a"], "2");
        assert_eq!(base["accept"], "json");
    }
}
