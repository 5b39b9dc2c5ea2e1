//! Composite config normalizer.
//!
//! A pure transform applied to a remote configuration object before every
//! mutating write. Rules apply in order:
//!
//! 1. when both fields of an exclusive pair are present, the legacy one is dropped
//! 2. null-valued keys are removed
//! 3. empty-string keys are removed unless their path is on the preserve list
//! 4. counted collections get `count = len(items)`; empty `items` may be dropped
//!
//! Paths are dot-separated; `*` matches any key or list index.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// Rules for one family of composite configs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeRules {
    /// `(present, legacy)`: drop `legacy` from any object that also holds `present`.
    pub exclusive_pairs: Vec<(String, String)>,
    /// Paths whose empty-string value must survive.
    pub preserve_empty: Vec<String>,
    /// Paths of `{count, items}` objects.
    pub counted_collections: Vec<String>,
    pub count_field: String,
    pub items_field: String,
    pub drop_empty_items: bool,
}

impl Default for NormalizeRules {
    fn default() -> Self {
        Self {
            exclusive_pairs: Vec::new(),
            preserve_empty: Vec::new(),
            counted_collections: Vec::new(),
            count_field: "Quantity".to_string(),
            items_field: "Items".to_string(),
            drop_empty_items: true,
        }
    }
}

impl NormalizeRules {
    /// Rules for edge distribution configs.
    pub fn distribution() -> Self {
        Self {
            exclusive_pairs: vec![("CachePolicyId".to_string(), "ForwardedValues".to_string())],
            preserve_empty: to_strings(&[
                "Comment",
                "WebACLId",
                "DefaultRootObject",
                "Origins.Items.*.OriginPath",
                "Origins.Items.*.S3OriginConfig.OriginAccessIdentity",
                "DefaultCacheBehavior.FieldLevelEncryptionId",
                "CacheBehaviors.Items.*.FieldLevelEncryptionId",
            ]),
            counted_collections: to_strings(&[
                "Aliases",
                "Origins",
                "CacheBehaviors",
                "CustomErrorResponses",
                "OrderedCacheBehaviors",
                "DefaultCacheBehavior.LambdaFunctionAssociations",
                "DefaultCacheBehavior.FunctionAssociations",
                "CacheBehaviors.Items.*.LambdaFunctionAssociations",
                "CacheBehaviors.Items.*.FunctionAssociations",
            ]),
            ..Self::default()
        }
    }

    fn preserves(&self, path: &[String]) -> bool {
        self.preserve_empty
            .iter()
            .any(|pattern| path_matches(pattern, path))
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn path_matches(pattern: &str, path: &[String]) -> bool {
    let segments: Vec<&str> = pattern.split('.').collect();
    segments.len() == path.len()
        && segments
            .iter()
            .zip(path)
            .all(|(want, have)| *want == "*" || want == have)
}

/// Normalize `config` under `rules`, returning a new value.
pub fn normalize(config: &Value, rules: &NormalizeRules) -> Value {
    let mut path = Vec::new();
    let mut cleaned = clean(config, rules, &mut path);
    for pattern in &rules.counted_collections {
        let segments: Vec<&str> = pattern.split('.').collect();
        visit(&mut cleaned, &segments, &mut |collection| {
            fix_count(collection, rules);
        });
    }
    cleaned
}

fn clean(value: &Value, rules: &NormalizeRules, path: &mut Vec<String>) -> Value {
    match value {
        Value::Object(map) => {
            let dropped: HashSet<&str> = rules
                .exclusive_pairs
                .iter()
                .filter(|(present, legacy)| map.contains_key(present) && map.contains_key(legacy))
                .map(|(_, legacy)| legacy.as_str())
                .collect();

            let mut out = Map::new();
            for (key, child) in map {
                if child.is_null() || dropped.contains(key.as_str()) {
                    continue;
                }
                path.push(key.clone());
                let is_empty_string = child.as_str().is_some_and(str::is_empty);
                if !is_empty_string || rules.preserves(path) {
                    out.insert(key.clone(), clean(child, rules, path));
                }
                path.pop();
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    path.push(index.to_string());
                    let cleaned = clean(item, rules, path);
                    path.pop();
                    cleaned
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn visit(value: &mut Value, pattern: &[&str], apply: &mut dyn FnMut(&mut Map<String, Value>)) {
    let Some((head, rest)) = pattern.split_first() else {
        if let Value::Object(map) = value {
            apply(map);
        }
        return;
    };

    match value {
        Value::Object(map) if *head == "*" => {
            map.values_mut().for_each(|child| visit(child, rest, apply));
        }
        Value::Object(map) => {
            if let Some(child) = map.get_mut(*head) {
                visit(child, rest, apply);
            }
        }
        Value::Array(items) if *head == "*" => {
            items.iter_mut().for_each(|child| visit(child, rest, apply));
        }
        Value::Array(items) => {
            if let Some(child) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                visit(child, rest, apply);
            }
        }
        _ => {}
    }
}

fn fix_count(collection: &mut Map<String, Value>, rules: &NormalizeRules) {
    let Some(len) = collection
        .get(&rules.items_field)
        .and_then(Value::as_array)
        .map(Vec::len)
    else {
        return;
    };
    collection.insert(rules.count_field.clone(), Value::from(len));
    if len == 0 && rules.drop_empty_items {
        collection.remove(&rules.items_field);
    }
}
