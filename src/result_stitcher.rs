use serde_json::{Map, Value, json};

use crate::error::StitchError;
use crate::query_planner::{EntityRequirement, Selection};
use crate::response::{Path, PathElement};

/// Merges partial subgraph results into the single response tree. All
/// writes are addressed by path, so the final tree is independent of
/// the order in which fetches complete.
pub struct ResultStitcher;

impl ResultStitcher {
    pub fn new() -> Self {
        ResultStitcher
    }

    /// Writes `fragment`'s fields at `path`, deep-merging into whatever
    /// is already there. Used for root fetches (empty path).
    pub fn merge_fragment(
        &self,
        tree: &mut Value,
        path: &Path,
        fragment: Value,
    ) -> Result<(), StitchError> {
        let target = descend_mut(tree, path, true).ok_or_else(|| StitchError::InvalidPath {
            path: path.to_string(),
        })?;
        deep_merge(target, fragment, path)
    }

    /// Merges each entity in order into the placeholder object at the
    /// matching concrete path. The placeholder was written by the
    /// dependency fetch and holds at least `__typename` + key fields;
    /// the entity's fields join it so data from different subgraphs
    /// coexists on one object.
    pub fn merge_entities(
        &self,
        tree: &mut Value,
        targets: &[Path],
        entities: Vec<Value>,
    ) -> Result<(), StitchError> {
        for (path, entity) in targets.iter().zip(entities) {
            if entity.is_null() {
                continue;
            }
            let placeholder =
                descend_mut(tree, path, false).ok_or_else(|| StitchError::MissingPlaceholder {
                    path: path.to_string(),
                })?;
            if !placeholder.is_object() {
                return Err(StitchError::MissingPlaceholder {
                    path: path.to_string(),
                });
            }
            deep_merge(placeholder, entity, path)?;
        }
        Ok(())
    }

    /// Finds every object under `path` (fanning out over lists) that
    /// matches the requirement's parent type, returning its concrete
    /// path and the `{__typename, ...key}` representation to send to
    /// the resolving subgraph. Objects missing a key field (or null
    /// slots) are skipped.
    pub fn collect_representations(
        &self,
        tree: &Value,
        path: &Path,
        requirement: &EntityRequirement,
    ) -> Vec<(Path, Value)> {
        let mut found = Vec::new();
        collect(tree, path.iter().as_slice(), &Path::empty(), &mut |at, value| {
            let Some(object) = value.as_object() else {
                return;
            };
            if object.get("__typename").and_then(Value::as_str)
                != Some(requirement.parent_type.as_str())
            {
                return;
            }
            let mut representation = Map::new();
            representation.insert(
                "__typename".to_string(),
                Value::String(requirement.parent_type.clone()),
            );
            for key_field in requirement.key.fields() {
                match object.get(key_field) {
                    Some(v) if !v.is_null() => {
                        representation.insert(key_field.clone(), v.clone());
                    }
                    _ => return,
                }
            }
            found.push((at.clone(), Value::Object(representation)));
        });
        found
    }

    /// Nulls the value at `path`, fanning out over lists, creating the
    /// slot if an intermediate object exists but the leaf does not.
    pub fn null_at_path(&self, tree: &mut Value, path: &Path) {
        null_out(tree, path.iter().as_slice());
    }

    /// Rebuilds the data tree in the client's selection order and drops
    /// the `__typename`/key fields the planner injected for entity
    /// resolution. Fetches merge in completion order, so this pass is
    /// what makes response shape deterministic.
    pub fn reorder(&self, value: &Value, selections: &[Selection]) -> Value {
        match value {
            Value::Object(map) => {
                let mut ordered = Map::new();
                for selection in selections {
                    if selection.injected {
                        continue;
                    }
                    if let Some(condition) = &selection.type_condition {
                        match map.get("__typename").and_then(Value::as_str) {
                            Some(typename) if typename != condition => continue,
                            _ => {}
                        }
                    }
                    let key = selection.response_name();
                    match map.get(key) {
                        Some(child) => {
                            let rebuilt = if selection.children.is_empty() {
                                child.clone()
                            } else {
                                self.reorder(child, &selection.children)
                            };
                            ordered.insert(key.to_string(), rebuilt);
                        }
                        None if selection.type_condition.is_none() => {
                            ordered.insert(key.to_string(), Value::Null);
                        }
                        None => {}
                    }
                }
                Value::Object(ordered)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.reorder(item, selections))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Default for ResultStitcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict navigation, following exactly the given keys and indices.
/// With `create`, missing objects along a key path are created.
fn descend_mut<'a>(value: &'a mut Value, path: &Path, create: bool) -> Option<&'a mut Value> {
    let mut current = value;
    for element in path.iter() {
        match element {
            PathElement::Key(key) => {
                if current.is_null() && create {
                    *current = json!({});
                }
                let object = current.as_object_mut()?;
                if !object.contains_key(key) {
                    if !create {
                        return None;
                    }
                    object.insert(key.clone(), json!({}));
                }
                current = object.get_mut(key)?;
            }
            PathElement::Index(i) => {
                current = current.as_array_mut()?.get_mut(*i)?;
            }
        }
    }
    Some(current)
}

fn deep_merge(target: &mut Value, incoming: Value, at: &Path) -> Result<(), StitchError> {
    match (&mut *target, incoming) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (key, value) in fields {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value, &at.child(&key))?,
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (Value::Array(existing), Value::Array(items)) => {
            if existing.len() != items.len() {
                return Err(StitchError::ConflictingFieldValue {
                    path: at.to_string(),
                });
            }
            for (i, (slot, value)) in existing.iter_mut().zip(items).enumerate() {
                deep_merge(slot, value, &at.index(i))?;
            }
            Ok(())
        }
        // A null placeholder takes whatever arrives later.
        (Value::Null, incoming) => {
            *target = incoming;
            Ok(())
        }
        (existing, incoming) => {
            if *existing == incoming {
                Ok(())
            } else {
                Err(StitchError::ConflictingFieldValue {
                    path: at.to_string(),
                })
            }
        }
    }
}

/// Walks the key path, fanning out across arrays, and invokes `visit`
/// with each concrete (indexed) path and the value found there.
fn collect<'a>(
    value: &'a Value,
    remaining: &[PathElement],
    at: &Path,
    visit: &mut impl FnMut(&Path, &'a Value),
) {
    if let Value::Array(items) = value {
        for (i, item) in items.iter().enumerate() {
            collect(item, remaining, &at.index(i), visit);
        }
        return;
    }
    match remaining.split_first() {
        None => visit(at, value),
        Some((PathElement::Key(key), rest)) => {
            if let Some(child) = value.as_object().and_then(|o| o.get(key)) {
                collect(child, rest, &at.child(key), visit);
            }
        }
        Some((PathElement::Index(i), rest)) => {
            if let Some(child) = value.as_array().and_then(|a| a.get(*i)) {
                collect(child, rest, &at.index(*i), visit);
            }
        }
    }
}

fn null_out(value: &mut Value, remaining: &[PathElement]) {
    if let Value::Array(items) = value {
        for item in items.iter_mut() {
            null_out(item, remaining);
        }
        return;
    }
    match remaining.split_first() {
        None => *value = Value::Null,
        Some((PathElement::Key(key), rest)) => {
            if let Some(object) = value.as_object_mut() {
                if rest.is_empty() {
                    object.insert(key.clone(), Value::Null);
                } else if let Some(child) = object.get_mut(key) {
                    null_out(child, rest);
                }
            }
        }
        Some((PathElement::Index(i), rest)) => {
            if let Some(child) = value.as_array_mut().and_then(|a| a.get_mut(*i)) {
                null_out(child, rest);
            }
        }
    }
}
