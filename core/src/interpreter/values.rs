//! Runtime value helpers
//!
//! Values are plain `serde_json::Value`s. This module holds the conversions
//! the interpreter needs (text, truthiness, numbers), dotted-path access used
//! by the addressing layer, and the iterator used by `range`.

use serde_json::{Map, Number, Value as JsonValue};
use std::ops::ControlFlow;

/// Render a value as text: strings raw, everything else as JSON.
pub fn to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Check if value is truthy (for conditionals)
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// `null`, `""`, `[]` and `{}` are empty.
pub fn is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Numeric view of a value. Numeric strings count as numbers.
pub fn to_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::Null => Some(0.0),
        _ => None,
    }
}

/// Build a JSON number, preferring an integer representation.
pub fn number(f: f64) -> JsonValue {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        JsonValue::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').map(str::trim).filter(|s| !s.is_empty())
}

fn child<'a>(value: &'a JsonValue, segment: &str) -> Option<&'a JsonValue> {
    match value {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Read the value at a dotted path (`items.0.name`).
pub fn read_path(value: &JsonValue, path: &str) -> Option<JsonValue> {
    let mut current = value;
    for segment in segments(path) {
        current = child(current, segment)?;
    }
    Some(current.clone())
}

/// Create the structure a dotted path describes, with `value` at its end.
pub fn build_from_path(path: &str, value: JsonValue) -> JsonValue {
    let parts: Vec<&str> = segments(path).collect();
    parts.iter().rev().fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert((*segment).to_string(), inner);
        JsonValue::Object(map)
    })
}

/// Splice `value` into `container` at a dotted path, creating objects on the way.
pub fn set_path(container: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), String> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, init)) = parts.split_last() else {
        *container = value;
        return Ok(());
    };

    let mut current = container;
    for segment in init {
        if current.is_null() {
            *current = JsonValue::Object(Map::new());
        }
        current = match current {
            JsonValue::Object(map) => map
                .entry((*segment).to_string())
                .or_insert_with(|| JsonValue::Object(Map::new())),
            JsonValue::Array(items) => {
                let index = array_index(segment, items.len())?;
                if index == items.len() {
                    items.push(JsonValue::Object(Map::new()));
                }
                &mut items[index]
            }
            other => return Err(format!("cannot descend into {} at '{}'", kind(other), segment)),
        };
    }

    if current.is_null() {
        *current = JsonValue::Object(Map::new());
    }
    match current {
        JsonValue::Object(map) => {
            map.insert((*last).to_string(), value);
            Ok(())
        }
        JsonValue::Array(items) => {
            let index = array_index(last, items.len())?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        other => Err(format!("cannot set '{}' on {}", last, kind(other))),
    }
}

/// Remove the field at a dotted path, returning the removed value.
pub fn remove_path(container: &mut JsonValue, path: &str) -> Result<Option<JsonValue>, String> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, init)) = parts.split_last() else {
        return Err("empty path".to_string());
    };

    let mut current = container;
    for segment in init {
        current = match current {
            JsonValue::Object(map) => match map.get_mut(*segment) {
                Some(next) => next,
                None => return Ok(None),
            },
            JsonValue::Array(items) => match segment.parse::<usize>().ok() {
                Some(i) if i < items.len() => &mut items[i],
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
    }

    match current {
        JsonValue::Object(map) => Ok(map.shift_remove(*last)),
        JsonValue::Array(items) => match last.parse::<usize>().ok() {
            Some(i) if i < items.len() => Ok(Some(items.remove(i))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn array_index(segment: &str, len: usize) -> Result<usize, String> {
    match segment.parse::<usize>() {
        Ok(i) if i <= len => Ok(i),
        Ok(i) => Err(format!("index {} is beyond array length {}", i, len)),
        Err(_) => Err(format!("'{}' is not an array index", segment)),
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Visit the elements of a collection in order.
///
/// Arrays yield `(index text, element, index)`, objects yield
/// `(field name, field value, position)`. Scalars are not iterated.
/// Returns the number of elements visited.
pub fn iterate<F>(collection: &JsonValue, mut visitor: F) -> usize
where
    F: FnMut(&str, &JsonValue, usize) -> ControlFlow<()>,
{
    let mut visited = 0;
    match collection {
        JsonValue::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                visited += 1;
                if visitor(&index.to_string(), item, index).is_break() {
                    break;
                }
            }
        }
        JsonValue::Object(map) => {
            for (index, (key, item)) in map.iter().enumerate() {
                visited += 1;
                if visitor(key, item, index).is_break() {
                    break;
                }
            }
        }
        _ => {}
    }
    visited
}
