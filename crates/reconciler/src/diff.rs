//! Three-way diff over managed fields.
//!
//! A field is compared only if the declaration manages it: it is declared
//! now, or it was declared in the last-applied snapshot. Fields only the live
//! object has were never ours and are ignored, so other writers can own them.

use serde_json::{Map, Value};

/// One managed field whose live value does not match the declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Dotted path from the object root.
    pub path: String,
    pub live: Option<Value>,
    /// `None` when the field was dropped from the declaration.
    pub declared: Option<Value>,
}

/// Compare the managed subtrees at `paths` of three object bodies.
///
/// `live`, `declared` and `last_applied` are the top-level fields of an object
/// besides `apiVersion`, `kind` and `metadata`.
#[must_use]
pub fn managed_changes(
    paths: &[&[&str]],
    live: &Map<String, Value>,
    declared: &Map<String, Value>,
    last_applied: Option<&Map<String, Value>>,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for path in paths {
        compare(
            &path.join("."),
            lookup(live, path),
            lookup(declared, path),
            last_applied.and_then(|last| lookup(last, path)),
            &mut changes,
        );
    }
    changes
}

/// Follow `path` through nested mappings.
#[must_use]
pub fn lookup<'a>(root: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(root.get(*first)?, |value, segment| value.get(*segment))
}

fn compare(
    path: &str,
    live: Option<&Value>,
    declared: Option<&Value>,
    last_applied: Option<&Value>,
    changes: &mut Vec<FieldChange>,
) {
    match (live, declared) {
        (Some(Value::Object(live)), Some(Value::Object(declared))) => {
            let last = last_applied.and_then(Value::as_object);
            for (field, value) in declared {
                compare(
                    &format!("{path}.{field}"),
                    live.get(field),
                    Some(value),
                    last.and_then(|l| l.get(field)),
                    changes,
                );
            }
            // Dropped from the declaration since the last apply, still live.
            for (field, previous) in last.into_iter().flatten() {
                if !declared.contains_key(field) {
                    compare(
                        &format!("{path}.{field}"),
                        live.get(field),
                        None,
                        Some(previous),
                        changes,
                    );
                }
            }
        }
        (Some(live), Some(declared)) => {
            if live != declared {
                changes.push(change(path, Some(live), Some(declared)));
            }
        }
        (None, Some(declared)) => changes.push(change(path, None, Some(declared))),
        (Some(live), None) => {
            if last_applied.is_some() {
                changes.push(change(path, Some(live), None));
            }
        }
        (None, None) => {}
    }
}

fn change(path: &str, live: Option<&Value>, declared: Option<&Value>) -> FieldChange {
    FieldChange {
        path: path.to_string(),
        live: live.cloned(),
        declared: declared.cloned(),
    }
}
