//! JSON document operations shared by every backend.

use course_core::model::Progress;
use serde_json::{Map, Value};

use crate::repository::{FieldOp, FieldPath, FieldWrite, StorageError};

/// Decode a stored document, rebuilding derived caches.
///
/// # Errors
///
/// Returns `StorageError::Serialization` if the document does not have the progress shape.
pub fn decode(document: &Value) -> Result<Progress, StorageError> {
    let progress: Progress = if document.is_null() {
        Progress::default()
    } else {
        serde_json::from_value(document.clone())
            .map_err(|err| StorageError::Serialization(err.to_string()))?
    };
    Ok(progress.normalized())
}

/// # Errors
///
/// Returns `StorageError::Serialization` if `progress` cannot be serialized.
pub fn encode(progress: &Progress) -> Result<Value, StorageError> {
    serde_json::to_value(progress).map_err(|err| StorageError::Serialization(err.to_string()))
}

/// Recursive merge: objects merge key by key, anything else replaces.
pub fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge(existing, value);
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Merge an encoded `Progress` into a stored document.
///
/// Unlike `merge`, absent values (`null`) leave the stored field alone,
/// `completedModules` only grows and a module's `currentStep` never moves
/// backwards.
pub fn merge_progress(target: &mut Value, mut patch: Value) {
    drop_nulls(&mut patch);
    if let Some(patch) = patch.as_object_mut() {
        if let Some(incoming) = patch.remove(COMPLETED_MODULES) {
            let stored = target.get(COMPLETED_MODULES);
            patch.insert(COMPLETED_MODULES.into(), array_union(stored, incoming));
        }
        if let Some(Value::Object(modules)) = patch.get_mut(MODULE_PROGRESS) {
            for (id, module) in modules.iter_mut() {
                let Some(incoming) = module.get_mut(CURRENT_STEP) else {
                    continue;
                };
                let stored = target
                    .get(MODULE_PROGRESS)
                    .and_then(|modules| modules.get(id))
                    .and_then(|module| module.get(CURRENT_STEP));
                *incoming = max_number(stored, incoming.take());
            }
        }
    }
    merge(target, patch);
}

const COMPLETED_MODULES: &str = "completedModules";
const MODULE_PROGRESS: &str = "moduleProgress";
const CURRENT_STEP: &str = "currentStep";

fn drop_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, field| !field.is_null());
        map.values_mut().for_each(drop_nulls);
    }
}

/// Stored elements followed by the incoming ones not stored yet.
fn array_union(stored: Option<&Value>, incoming: Value) -> Value {
    match (stored, incoming) {
        (Some(Value::Array(stored)), Value::Array(incoming)) => {
            let mut merged = stored.clone();
            for element in incoming {
                if !merged.contains(&element) {
                    merged.push(element);
                }
            }
            Value::Array(merged)
        }
        (_, incoming) => incoming,
    }
}

fn max_number(stored: Option<&Value>, incoming: Value) -> Value {
    match (stored.and_then(Value::as_u64), incoming.as_u64()) {
        (Some(stored), Some(written)) if stored > written => Value::from(stored),
        _ => incoming,
    }
}

/// Apply `writes` in order. On error `document` may be partially written,
/// so callers work on a copy.
///
/// # Errors
///
/// Returns `StorageError::InvalidPath` when a path crosses a non-object value.
pub fn apply_writes(document: &mut Value, writes: &[FieldWrite]) -> Result<(), StorageError> {
    for write in writes {
        match write.op {
            FieldOp::Set if write.value.is_null() => clear_field(document, &write.path)?,
            FieldOp::Set => set_field(document, &write.path, write.value.clone())?,
            FieldOp::ArrayUnion => {
                let value = array_union(get_field(document, &write.path), write.value.clone());
                set_field(document, &write.path, value)?;
            }
            FieldOp::Max => {
                let value = max_number(get_field(document, &write.path), write.value.clone());
                set_field(document, &write.path, value)?;
            }
        }
    }
    Ok(())
}

fn get_field<'a>(document: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(document, |cursor, segment| cursor.get(segment.as_str()))
}

fn set_field(document: &mut Value, path: &FieldPath, value: Value) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidPath(path.to_string());
    let (last, parents) = path.segments().split_last().ok_or_else(invalid)?;

    let mut cursor = document;
    for segment in parents {
        if cursor.is_null() {
            *cursor = Value::Object(Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .ok_or_else(invalid)?
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    if cursor.is_null() {
        *cursor = Value::Object(Map::new());
    }
    cursor
        .as_object_mut()
        .ok_or_else(invalid)?
        .insert(last.clone(), value);
    Ok(())
}

fn clear_field(document: &mut Value, path: &FieldPath) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidPath(path.to_string());
    let (last, parents) = path.segments().split_last().ok_or_else(invalid)?;

    let mut cursor = document;
    for segment in parents {
        match cursor.get_mut(segment.as_str()) {
            Some(next) => cursor = next,
            None => return Ok(()),
        }
    }
    match cursor {
        Value::Object(map) => {
            map.remove(last);
            Ok(())
        }
        Value::Null => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(path: &str, value: Value) -> FieldWrite {
        FieldWrite::new(path.parse().unwrap(), value)
    }

    #[test]
    fn set_creates_missing_parents() {
        let mut doc = Value::Null;
        apply_writes(&mut doc, &[write("a.b.c", json!(1))]).unwrap();
        assert_eq!(doc, json!({ "a": { "b": { "c": 1 } } }));
    }

    #[test]
    fn null_removes_field_without_creating_parents() {
        let mut doc = json!({ "a": { "b": 1, "c": 2 } });
        apply_writes(
            &mut doc,
            &[write("a.b", Value::Null), write("x.y", Value::Null)],
        )
        .unwrap();
        assert_eq!(doc, json!({ "a": { "c": 2 } }));
    }

    #[test]
    fn path_through_scalar_is_rejected() {
        let mut doc = json!({ "a": 5 });
        let err = apply_writes(&mut doc, &[write("a.b", json!(true))]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[test]
    fn merge_keeps_untouched_siblings() {
        let mut doc = json!({ "m": { "1": { "x": 1 }, "2": { "y": 2 } }, "list": [1, 2] });
        merge(&mut doc, json!({ "m": { "1": { "z": 3 } }, "list": [3] }));
        assert_eq!(
            doc,
            json!({ "m": { "1": { "x": 1, "z": 3 }, "2": { "y": 2 } }, "list": [3] })
        );
    }

    #[test]
    fn decode_empty_document_is_default_progress() {
        let progress = decode(&Value::Null).unwrap();
        assert_eq!(progress, Progress::default());
        let path = FieldPath::root("currentModule");
        assert_eq!(path.segments(), ["currentModule".to_string()]);
    }

    #[test]
    fn array_union_keeps_stored_elements() {
        let mut doc = json!({ "completedModules": [2] });
        let path = FieldPath::root("completedModules");
        apply_writes(
            &mut doc,
            &[
                FieldWrite::array_union(path.clone(), vec![json!(1)]),
                FieldWrite::array_union(path, vec![json!(2)]),
            ],
        )
        .unwrap();
        assert_eq!(doc["completedModules"], json!([2, 1]));
    }

    #[test]
    fn max_write_never_lowers_a_number() {
        let mut doc = json!({ "m": { "currentStep": 3 } });
        apply_writes(&mut doc, &[FieldWrite::max("m.currentStep".parse().unwrap(), 2)]).unwrap();
        assert_eq!(doc["m"]["currentStep"], 3);
        apply_writes(&mut doc, &[FieldWrite::max("m.currentStep".parse().unwrap(), 4)]).unwrap();
        assert_eq!(doc["m"]["currentStep"], 4);
    }

    #[test]
    fn progress_merge_skips_nulls_and_keeps_set_members() {
        let mut doc = json!({
            "completedModules": [1, 2],
            "moduleProgress": { "1": {
                "currentStep": 4,
                "completedAt": 10,
                "stepStates": { "1": { "quizAnswer": { "isCorrect": true } } }
            } }
        });
        merge_progress(
            &mut doc,
            json!({
                "completedModules": [3],
                "moduleProgress": { "1": {
                    "currentStep": 2,
                    "completedAt": null,
                    "stepStates": { "1": { "quizAnswer": null, "videoWatched": true } }
                } }
            }),
        );

        assert_eq!(doc["completedModules"], json!([1, 2, 3]));
        let module = &doc["moduleProgress"]["1"];
        assert_eq!(module["currentStep"], 4);
        assert_eq!(module["completedAt"], 10);
        assert_eq!(module["stepStates"]["1"]["quizAnswer"]["isCorrect"], true);
        assert_eq!(module["stepStates"]["1"]["videoWatched"], true);
    }
}
