//! The context: a typed key/value bag threaded through all stages.
//!
//! Keys use a flat dotted convention (`"stage.field"` is just a string,
//! there are no nested maps). The context is single-writer per thread of
//! control: only the engine mutates it between handler invocations, and
//! parallel branches each operate on a deep copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known key: last handler's status, lowercased.
pub const KEY_OUTCOME: &str = "outcome";
/// Well-known key: id of the last completed stage.
pub const KEY_LAST_STAGE: &str = "last_stage";
/// Well-known key: the pipeline's goal string.
pub const KEY_GOAL: &str = "goal";

/// Mutable key/value state for one run.
///
/// A `BTreeMap` keeps iteration deterministic, which the engine relies on
/// for reproducible runs and stable checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    values: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String accessor; returns the default on miss or type mismatch.
    /// Numbers and booleans render to their display form.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            _ => default.to_string(),
        }
    }

    /// Integer accessor; returns the default on miss or type mismatch.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(Value::Number(number)) => number.as_i64().unwrap_or(default),
            Some(Value::String(text)) => text.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Boolean accessor; returns the default on miss or type mismatch.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => text.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Deep copy for a parallel branch. `Value` clones are deep, so the
    /// branch cannot alias the parent's state.
    pub fn deep_copy(&self) -> Context {
        self.clone()
    }

    /// Merge a batch of updates, overwriting existing keys.
    pub fn apply_updates(&mut self, updates: &BTreeMap<String, Value>) {
        for (key, value) in updates {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge another context under `<prefix>.<key>`.
    pub fn merge_namespaced(&mut self, prefix: &str, other: &Context) {
        for (key, value) in &other.values {
            self.values.insert(format!("{prefix}.{key}"), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }

    pub fn from_snapshot(snapshot: BTreeMap<String, Value>) -> Self {
        Self { values: snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_accessors_default_on_miss_and_mismatch() {
        let mut context = Context::new();
        context.set("s", json!("text"));
        context.set("n", json!(42));
        context.set("b", json!(true));

        assert_eq!(context.get_string("s", "d"), "text");
        assert_eq!(context.get_string("missing", "d"), "d");
        assert_eq!(context.get_i64("n", 0), 42);
        assert_eq!(context.get_i64("s", 7), 7);
        assert!(context.get_bool("b", false));
        assert!(!context.get_bool("n", false));
    }

    #[test]
    fn deep_copy_does_not_alias() {
        let mut parent = Context::new();
        parent.set("k", json!("v"));
        let mut branch = parent.deep_copy();
        branch.set("k", json!("changed"));
        assert_eq!(parent.get_string("k", ""), "v");
    }

    #[test]
    fn namespaced_merge_prefixes_keys() {
        let mut child = Context::new();
        child.set("result", json!("ok"));
        let mut parent = Context::new();
        parent.merge_namespaced("sub", &child);
        assert_eq!(parent.get_string("sub.result", ""), "ok");
    }
}
