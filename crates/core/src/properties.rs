//! Typed accessors over the free-form resource properties mapping.
//!
//! The orchestrator stringifies most scalar values, so numeric and list
//! accessors accept both native JSON and string encodings.

use serde_json::{Map, Value};

use crate::error::Error;
use crate::result::Result;

/// Resource properties from a lifecycle event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub const fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Required non-empty string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperties` when absent, empty, or not a string.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.opt_str(key)
            .ok_or_else(|| Error::invalid_properties(format!("{key} is required")))
    }

    /// Optional string; empty strings count as absent.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A list of strings given either as a JSON array or a comma-separated string.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(joined)) => joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Required non-empty list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperties` when the list is absent or empty.
    pub fn require_list(&self, key: &str) -> Result<Vec<String>> {
        let list = self.string_list(key);
        if list.is_empty() {
            Err(Error::invalid_properties(format!(
                "{key} must contain at least one entry"
            )))
        } else {
            Ok(list)
        }
    }

    /// Optional unsigned integer from a number or numeric string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperties` when present but not a non-negative integer.
    pub fn opt_u32(&self, key: &str) -> Result<Option<u32>> {
        let invalid = || Error::invalid_properties(format!("{key} must be a non-negative integer"));
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(invalid),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    /// Required unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperties` when absent or malformed.
    pub fn require_u32(&self, key: &str) -> Result<u32> {
        self.opt_u32(key)?
            .ok_or_else(|| Error::invalid_properties(format!("{key} is required")))
    }

    /// Boolean from a JSON bool or the strings "true"/"false".
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// String-keyed tags given as an object, or a list of `{Key, Value}` pairs.
    pub fn tags(&self, key: &str) -> Map<String, Value> {
        match self.0.get(key) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    let k = item.get("Key")?.as_str()?;
                    let v = item.get("Value").cloned().unwrap_or(Value::Null);
                    Some((k.to_string(), v))
                })
                .collect(),
            _ => Map::new(),
        }
    }

    /// Fail with the names of every missing required string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperties` listing all missing keys at once.
    pub fn require_fields(&self, keys: &[&str]) -> Result<()> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|key| self.opt_str(key).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_properties(format!(
                "missing required properties: {}",
                missing.join(", ")
            )))
        }
    }
}

impl From<Map<String, Value>> for Properties {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => Properties::new(map),
            _ => Properties::default(),
        }
    }

    #[test]
    fn test_string_list_accepts_both_encodings() {
        let p = props(json!({"A": ["s-1", " s-2 ", ""], "B": "s-1, s-2,,"}));
        assert_eq!(p.string_list("A"), vec!["s-1", "s-2"]);
        assert_eq!(p.string_list("B"), vec!["s-1", "s-2"]);
        assert!(p.string_list("C").is_empty());
        assert!(p.require_list("C").is_err());
    }

    #[test]
    fn test_numbers_from_strings() {
        let p = props(json!({"Min": "1", "Max": 3, "Bad": "x", "Neg": -1}));
        assert_eq!(p.require_u32("Min").unwrap(), 1);
        assert_eq!(p.require_u32("Max").unwrap(), 3);
        assert!(p.require_u32("Bad").is_err());
        assert!(p.require_u32("Neg").is_err());
        assert_eq!(p.opt_u32("Absent").unwrap(), None);
    }

    #[test]
    fn test_require_fields_lists_all_missing() {
        let p = props(json!({"Name": "x", "Empty": ""}));
        let err = p.require_fields(&["Name", "Empty", "Other"]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Empty"));
        assert!(text.contains("Other"));
        assert!(!text.contains("Name,"));
    }

    #[test]
    fn test_tags_from_pairs() {
        let p = props(json!({"Tags": [{"Key": "env", "Value": "dev"}]}));
        assert_eq!(p.tags("Tags").get("env"), Some(&json!("dev")));
    }

    #[test]
    fn test_flag() {
        let p = props(json!({"A": "True", "B": true, "C": "no"}));
        assert!(p.flag("A"));
        assert!(p.flag("B"));
        assert!(!p.flag("C"));
    }
}
