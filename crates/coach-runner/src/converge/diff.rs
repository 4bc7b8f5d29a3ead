//! Structural comparison of desired and live option documents

use coach_types::{DesiredDocument, ListMerge};
use serde_json::{Map, Value};

/// Keys whose live value differs from the desired one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub changed_keys: Vec<String>,
    /// At least one material key differs
    pub material: bool,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.changed_keys.is_empty()
    }
}

/// Compare `desired` against the live options of the same service.
///
/// Every desired key must be present in live. Arrays that may hold operator
/// entries only need to contain the desired entries (and none that are
/// retired). Other material keys compare by exact equality; the rest compare
/// objects as subsets (keys the platform adds are ignored) and everything
/// else by equality.
pub fn diff(desired: &DesiredDocument, live: &Map<String, Value>) -> ConfigDiff {
    let material_keys = desired.material_keys();
    let mut result = ConfigDiff::default();

    for (key, want) in desired.render() {
        let is_material = material_keys.contains(&key.as_str());
        let matches = match (live.get(&key), desired.list_merge(&key)) {
            (None, _) => false,
            (Some(have), Some(rule)) => list_contains(rule, &want, have, desired.retired(&key)),
            (Some(have), None) if is_material => have == &want,
            (Some(have), None) => subset_eq(&want, have),
        };
        if !matches {
            result.material |= is_material;
            result.changed_keys.push(key);
        }
    }

    result
}

fn subset_eq(want: &Value, have: &Value) -> bool {
    match (want, have) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, w)| have.get(k).is_some_and(|h| subset_eq(w, h))),
        _ => want == have,
    }
}

fn identity<'a>(item: &'a Value, field: &str) -> Option<&'a Value> {
    item.get(field)
}

fn is_retired(item: &Value, field: &str, retired: &[String]) -> bool {
    identity(item, field)
        .and_then(Value::as_str)
        .is_some_and(|id| retired.iter().any(|r| r == id))
}

fn list_contains(rule: ListMerge, want: &Value, have: &Value, retired: &[String]) -> bool {
    let (Some(want), Some(have)) = (want.as_array(), have.as_array()) else {
        return false;
    };
    match rule {
        ListMerge::KeyedBy(field) => {
            have.iter().all(|item| !is_retired(item, field, retired))
                && want.iter().all(|w| {
                    have.iter().any(|h| {
                        identity(h, field) == identity(w, field) && subset_eq(w, h)
                    })
                })
        }
        ListMerge::Union => want.iter().all(|w| have.contains(w)),
    }
}

/// Live array with the desired entries merged in and retired ones removed
fn merge_list(rule: ListMerge, live: Option<&Value>, want: Vec<Value>, retired: &[String]) -> Value {
    let mut merged: Vec<Value> = live
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    match rule {
        ListMerge::KeyedBy(field) => {
            merged.retain(|item| !is_retired(item, field, retired));
            for item in want {
                match merged
                    .iter_mut()
                    .find(|h| identity(h, field) == identity(&item, field))
                {
                    Some(slot) => *slot = item,
                    None => merged.push(item),
                }
            }
        }
        ListMerge::Union => {
            for item in want {
                if !merged.contains(&item) {
                    merged.push(item);
                }
            }
        }
    }
    Value::Array(merged)
}

/// Desired keys written over the live document so platform-injected keys and
/// operator list entries survive
pub fn overlay(live: &Map<String, Value>, desired: &DesiredDocument) -> Map<String, Value> {
    let mut merged = live.clone();
    for (key, want) in desired.render() {
        let value = match (desired.list_merge(&key), want) {
            (Some(rule), Value::Array(items)) => {
                merge_list(rule, live.get(&key), items, desired.retired(&key))
            }
            (_, want) => want,
        };
        merged.insert(key, value);
    }
    merged
}
