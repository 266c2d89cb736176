//! State tree helpers: path lookup, deep merge, structural diff, and
//! canonical serialization.
//!
//! The state tree is a `serde_json::Value` with an object at the root. These
//! helpers are the only way the rest of the system touches tree structure, so
//! merge and diff semantics live in exactly one place.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::{Path, PathError, PathSegment};

/// A single observed difference between two state trees.
///
/// `old` is `None` for additions, `new` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Path to the changed location.
    pub path: Path,
    /// Value before the change, if any.
    pub old: Option<Value>,
    /// Value after the change, if any.
    pub new: Option<Value>,
}

/// Looks up a value by path. Returns `None` when any segment is missing or
/// addresses the wrong container kind.
pub fn get_path<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Sets a value at a path, creating intermediate objects as needed.
///
/// Key segments replace non-object intermediates with fresh objects. Index
/// segments require an existing array and may append at most one slot past
/// the end.
pub fn set_path(root: &mut Value, path: &Path, value: Value) -> Result<(), PathError> {
    let segments = path.segments();
    if segments.is_empty() {
        return Err(PathError::Empty);
    }

    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let map = current
                    .as_object_mut()
                    .ok_or(PathError::Empty)?;
                if last {
                    map.insert(key.clone(), value);
                    return Ok(());
                }
                current = map.entry(key.clone()).or_insert(Value::Object(Map::new()));
            }
            PathSegment::Index(index) => {
                let arr = match current.as_array_mut() {
                    Some(arr) => arr,
                    None => return Err(PathError::EmptySegment(path.to_string())),
                };
                if *index > arr.len() {
                    return Err(PathError::EmptySegment(path.to_string()));
                }
                if *index == arr.len() {
                    arr.push(Value::Null);
                }
                if last {
                    arr[*index] = value;
                    return Ok(());
                }
                current = &mut arr[*index];
            }
        }
    }

    Ok(())
}

/// Deep-merges `patch` into `base`.
///
/// Objects are merged recursively; any other value in the patch (scalars,
/// arrays, null) replaces what was there. Merging `{player: {jade: 50}}`
/// over `{player: {jade: 100, qi: 3}}` leaves `{player: {jade: 50, qi: 3}}`.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Computes the structural diff between two trees.
///
/// Objects are walked recursively so changes are reported at leaf
/// granularity; arrays and scalars are compared wholesale at their own path.
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_at(&Path::from_segments(Vec::new()), old, new, &mut changes);
    changes
}

fn diff_at(path: &Path, old: &Value, new: &Value, changes: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                match new_map.get(key) {
                    Some(new_value) => {
                        diff_at(&path.child_key(key), old_value, new_value, changes)
                    }
                    None => changes.push(Change {
                        path: path.child_key(key),
                        old: Some(old_value.clone()),
                        new: None,
                    }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    changes.push(Change {
                        path: path.child_key(key),
                        old: None,
                        new: Some(new_value.clone()),
                    });
                }
            }
        }
        (old, new) => {
            if old != new {
                changes.push(Change {
                    path: path.clone(),
                    old: Some(old.clone()),
                    new: Some(new.clone()),
                });
            }
        }
    }
}

/// Serializes a tree with recursively sorted object keys.
///
/// Canonical form makes checksums deterministic: the same tree always
/// produces the same bytes regardless of insertion order.
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&canonicalize(value))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(child) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(child));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
