use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::models::{ScoutLogEntry, ScoutLogsGrouped};

/// How `group_by` derives the key of an element.
pub enum GroupKey<'a, T> {
    /// Named field of the element's serde representation. Only string values group.
    Field(&'a str),
    /// Key computed from the element.
    Derived(Box<dyn Fn(&T) -> String + 'a>),
}

impl<'a, T> GroupKey<'a, T> {
    pub fn field(name: &'a str) -> Self {
        GroupKey::Field(name)
    }

    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&T) -> String + 'a,
    {
        GroupKey::Derived(Box::new(f))
    }
}

/// Partition `items` by key, keeping input order inside every group.
///
/// Elements whose field key is not a JSON string (number, bool, null, object,
/// missing field, or a non-object element) are dropped without error. Payloads
/// come from the backend untyped, so this guard is kept at runtime rather than
/// folded into the type of `T`.
pub fn group_by<'a, T, I>(items: I, key: &GroupKey<'a, T>) -> HashMap<String, Vec<T>>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    match key {
        GroupKey::Field(name) => collect(items, |item| string_field(item, name)),
        GroupKey::Derived(f) => collect(items, |item| Some(f(item))),
    }
}

fn collect<T, I, F>(items: I, extract: F) -> HashMap<String, Vec<T>>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> Option<String>,
{
    let mut result: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        if let Some(k) = extract(&item) {
            result.entry(k).or_default().push(item);
        }
    }
    result
}

fn string_field<T: Serialize>(item: &T, name: &str) -> Option<String> {
    match serde_json::to_value(item).ok()? {
        Value::Object(mut map) => match map.remove(name) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

/// Scout logs grouped by `FROM->TO` pair.
pub fn group_scout_logs<I>(entries: I) -> ScoutLogsGrouped
where
    I: IntoIterator<Item = ScoutLogEntry>,
{
    group_by(entries, &GroupKey::derived(ScoutLogEntry::pair_key))
}
