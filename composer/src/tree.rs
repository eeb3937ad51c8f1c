//! Helpers over the nested schema/defaults documents.

use serde_yaml::{Mapping, Value};

/// marks a dynamically populated collection
pub const LIST: &str = "list";
/// enumerable presets of a leaf
pub const VALUES: &str = "values";
/// template name -> template string, local to a node
pub const SUBSTITUTIONS: &str = "substitutions";
/// output only: static menu of a choice node
pub const CHOICES: &str = "choices";

pub fn is_reserved(key: &str) -> bool {
    matches!(key, LIST | VALUES | SUBSTITUTIONS | CHOICES)
}

pub fn empty() -> Value {
    Value::Mapping(Mapping::new())
}

pub fn has_key(value: &Value, key: &str) -> bool {
    value
        .as_mapping()
        .map_or(false, |mapping| mapping.contains_key(key))
}

/// mapping keys may be any yaml scalar
pub fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(string) => Some(string.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(boolean) => Some(boolean.to_string()),
        _ => None,
    }
}

/// textual form of a scalar, `None` for collections
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => scalar_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
        key => key_string(key),
    }
}

/// copy of `mapping` without `key`, keeping the order of the other entries
pub fn without_key(mapping: &Mapping, key: &str) -> Mapping {
    mapping
        .iter()
        .filter(|(entry, _)| entry.as_str() != Some(key))
        .map(|(entry, value)| (entry.clone(), value.clone()))
        .collect()
}

/// Merge values computed from a live system into a preset collection.
///
/// Preset order is kept and only computed entries not already present are
/// appended: by value for a sequence, by key for a mapping (which gains an
/// empty entry per new key). A missing preset behaves like an empty mapping.
pub fn merge_presets(preset: &Value, computed: &[String]) -> Value {
    match preset {
        Value::Sequence(items) => {
            let mut merged = items.clone();

            for entry in computed {
                let entry = Value::String(entry.clone());
                if !merged.contains(&entry) {
                    merged.push(entry);
                }
            }

            Value::Sequence(merged)
        }
        Value::Mapping(entries) => {
            let mut merged = entries.clone();

            for entry in computed {
                if !merged.contains_key(entry.as_str()) {
                    merged.insert(Value::String(entry.clone()), empty());
                }
            }

            Value::Mapping(merged)
        }
        Value::Null => merge_presets(&empty(), computed),
        other => other.clone(),
    }
}

/// Overlay `defaults` onto the `values` presets of a leaf.
pub(crate) fn overlay_values(values: &mut Value, defaults: &Value) {
    match defaults {
        Value::Mapping(entries) => {
            let entries = without_key(entries, SUBSTITUTIONS);

            match values {
                Value::Mapping(presets) => {
                    for (key, value) in entries {
                        presets.insert(key, value);
                    }
                }
                Value::Sequence(_) => {
                    let keys: Vec<String> = entries.keys().filter_map(key_string).collect();
                    *values = merge_presets(values, &keys);
                }
                _ => *values = Value::Mapping(entries),
            }
        }
        Value::Sequence(items) => {
            let items: Vec<String> = items.iter().filter_map(scalar_string).collect();
            *values = merge_presets(values, &items);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn merges_sequences_without_duplicates() {
        let merged = merge_presets(&yaml("[a, b]"), &strings(&["b", "c"]));

        assert_eq!(merged, yaml("[a, b, c]"));
    }

    #[test]
    fn merges_mappings_by_key() {
        let merged = merge_presets(&yaml("{gll_usr: {max: 4}}"), &strings(&["debug", "gll_usr"]));

        assert_eq!(merged, yaml("{gll_usr: {max: 4}, debug: {}}"));
    }

    #[test]
    fn missing_preset_becomes_a_mapping() {
        let merged = merge_presets(&Value::Null, &strings(&["debug"]));

        assert_eq!(merged, yaml("{debug: {}}"));
    }

    #[test]
    fn removes_a_key_in_place() {
        let mapping = yaml("{a: 1, list: {}, b: 2}");
        let stripped = without_key(mapping.as_mapping().unwrap(), LIST);

        assert_eq!(Value::Mapping(stripped), yaml("{a: 1, b: 2}"));
    }

    #[test]
    fn overlay_skips_substitutions() {
        let mut values = yaml("{X: 1}");
        overlay_values(&mut values, &yaml("{X: 2, substitutions: {A: b}}"));

        assert_eq!(values, yaml("{X: 2}"));
    }
}
