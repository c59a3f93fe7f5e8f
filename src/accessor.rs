//! Attribute access over caller-supplied parameter values.
//!
//! Parameters are `serde_json::Value`s. The evaluator never inspects their
//! shape directly; it asks an [`AttributeAccessor`] for named attributes.

use serde_json::{Map, Value};

/// Reads (and, for key generation, writes) named attributes of a parameter value.
pub trait AttributeAccessor: Send + Sync {
    /// Read `name` off `target`. `None` means the value has no such attribute.
    fn get_attribute(&self, target: &Value, name: &str) -> Option<Value>;

    /// Write `name` on `target`. Returns `false` when `target` can't hold attributes.
    fn set_attribute(&self, target: &mut Value, name: &str, value: Value) -> bool;
}

/// Accessor treating JSON objects as keyed maps.
///
/// - objects: any key is readable, absent keys read as `null`
/// - arrays: numeric indices
/// - scalars and `null`: no attributes
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonAccessor;

impl AttributeAccessor for JsonAccessor {
    fn get_attribute(&self, target: &Value, name: &str) -> Option<Value> {
        match target {
            Value::Object(map) => Some(map.get(name).cloned().unwrap_or(Value::Null)),
            Value::Array(items) => name
                .parse::<usize>()
                .ok()
                .map(|i| items.get(i).cloned().unwrap_or(Value::Null)),
            _ => None,
        }
    }

    fn set_attribute(&self, target: &mut Value, name: &str, value: Value) -> bool {
        match target {
            Value::Object(map) => {
                map.insert(name.to_string(), value);
                true
            }
            Value::Array(items) => match name.parse::<usize>() {
                Ok(i) if i < items.len() => {
                    items[i] = value;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// One step of a property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Name(&'a str),
    Index(&'a str),
}

/// Split `a.b[0].c` into segments. Quotes inside brackets are stripped.
pub fn split_path(path: &str) -> Vec<PathSegment<'_>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part.trim();
        if let Some(open) = rest.find('[') {
            let head = &rest[..open];
            if !head.is_empty() {
                segments.push(PathSegment::Name(head));
            }
            rest = &rest[open..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else {
                    break;
                };
                let key = stripped[..close].trim().trim_matches(|c| c == '\'' || c == '"');
                segments.push(PathSegment::Index(key));
                rest = &stripped[close + 1..];
            }
        } else if !rest.is_empty() {
            segments.push(PathSegment::Name(rest));
        }
    }
    segments
}

/// Navigate a property path from `root`.
///
/// Returns `None` as soon as a step has no such attribute.
pub fn resolve_path(accessor: &dyn AttributeAccessor, root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for segment in split_path(path) {
        let key = match segment {
            PathSegment::Name(k) | PathSegment::Index(k) => k,
        };
        current = accessor.get_attribute(&current, key)?;
    }
    Some(current)
}

/// Write `value` at a property path, creating intermediate objects as needed.
pub fn assign_path(
    accessor: &dyn AttributeAccessor,
    root: &mut Value,
    path: &str,
    value: Value,
) -> bool {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = root;
    for segment in parents {
        let key = match segment {
            PathSegment::Name(k) | PathSegment::Index(k) => *k,
        };
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(item) => item,
                None => return false,
            },
            _ => return false,
        };
    }

    let key = match last {
        PathSegment::Name(k) | PathSegment::Index(k) => *k,
    };
    accessor.set_attribute(current, key, value)
}

/// Short type name for diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
