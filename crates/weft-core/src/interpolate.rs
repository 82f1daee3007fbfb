//! Parameter interpolation over accumulated step results.
//!
//! References use `{namespace.path}` syntax and address prior steps by
//! event type, with an optional dotted path into the result and bracket
//! indices into arrays:
//!
//! - `{tools.now.result}`
//! - `{tools.date_calc.result.date}`
//! - `{steps[0].result}`
//!
//! Resolution is pure: the same reference against an unchanged context
//! always yields the same value, and an undefined reference always fails
//! with [`InterpolationError::MissingReference`] rather than silently
//! producing null.

use serde_json::{Map, Value};
use thiserror::Error;

/// Interpolation failures. The chain step that required the reference is
/// not executed when resolution fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolationError {
    #[error("unresolvable reference '{{{reference}}}': {detail}")]
    MissingReference { reference: String, detail: String },

    #[error("malformed reference '{{{reference}}}': {detail}")]
    Malformed { reference: String, detail: String },
}

/// Accumulated results visible to a chain execution: the owning thread's
/// record log plus sibling results produced earlier in the same execution.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    root: Map<String, Value>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a top-level entry (e.g. `thread_id`, `metadata`).
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// Record an event result under its dot-hierarchical name, so that
    /// `{tools.now.result}` resolves after a `tools.now` step. The most
    /// recent result for a given event type wins.
    ///
    /// Every result is also appended to the ordered `steps` array, which
    /// lets `{steps[N].result}` disambiguate parallel members that share
    /// an event type.
    pub fn add_result(&mut self, event_type: &str, result: &Value) {
        let mut current = &mut self.root;
        let parts: Vec<&str> = event_type.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = ensure_object(slot);
        }
        let leaf = parts[parts.len() - 1];
        let mut entry = Map::new();
        entry.insert("result".to_string(), result.clone());
        current.insert(leaf.to_string(), Value::Object(entry));

        let steps = self
            .root
            .entry("steps".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(list) = steps.as_array_mut() {
            let mut record = Map::new();
            record.insert("event".to_string(), Value::String(event_type.to_string()));
            record.insert("result".to_string(), result.clone());
            list.push(Value::Object(record));
        }
    }

    fn lookup(&self, reference: &str) -> Result<Value, InterpolationError> {
        let segments = parse_path(reference)?;
        let missing = |detail: String| InterpolationError::MissingReference {
            reference: reference.to_string(),
            detail,
        };

        let mut iter = segments.iter();
        let mut current: &Value = match iter.next() {
            Some(PathSegment::Key(key)) => self
                .root
                .get(key.as_str())
                .ok_or_else(|| missing(format!("key '{}' not found", key)))?,
            _ => return Err(missing("reference must start with a key".to_string())),
        };
        for segment in iter {
            current = match segment {
                PathSegment::Key(key) => current
                    .get(key.as_str())
                    .ok_or_else(|| missing(format!("key '{}' not found", key)))?,
                PathSegment::Index(index) => current
                    .get(*index)
                    .ok_or_else(|| missing(format!("index {} out of bounds", index)))?,
            };
        }
        Ok(current.clone())
    }
}

fn ensure_object(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just set to an object"),
    }
}

#[derive(Debug, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(reference: &str) -> Result<Vec<PathSegment>, InterpolationError> {
    let malformed = |detail: String| InterpolationError::Malformed {
        reference: reference.to_string(),
        detail,
    };

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = reference.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        match ch {
            '.' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
                let mut index_str = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    index_str.push(inner);
                }
                if !closed {
                    return Err(malformed("unmatched '['".to_string()));
                }
                let index: usize = index_str
                    .parse()
                    .map_err(|_| malformed(format!("invalid array index '{}'", index_str)))?;
                segments.push(PathSegment::Index(index));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        segments.push(PathSegment::Key(current));
    }
    if segments.is_empty() {
        return Err(malformed("empty reference".to_string()));
    }
    Ok(segments)
}

/// Recursively resolve every `{namespace.path}` reference inside `params`.
///
/// A string that is exactly one reference resolves to the referenced value
/// with its JSON type intact; references embedded in a longer string are
/// stringified (objects and arrays as compact JSON). Non-string values pass
/// through unchanged.
pub fn resolve(
    params: &Value,
    context: &InterpolationContext,
) -> Result<Value, InterpolationError> {
    match params {
        Value::String(text) => resolve_string(text, context),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve(value, context)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve(item, context)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    text: &str,
    context: &InterpolationContext,
) -> Result<Value, InterpolationError> {
    let references = find_references(text);
    if references.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    // Whole-string single reference keeps the value's JSON type.
    if references.len() == 1 {
        let (start, end, reference) = &references[0];
        if *start == 0 && *end == text.len() {
            return context.lookup(reference);
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, reference) in &references {
        out.push_str(&text[cursor..*start]);
        let value = context.lookup(reference)?;
        match &value {
            Value::String(s) => out.push_str(s),
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&serde_json::to_string(&value).unwrap_or_default())
            }
            other => out.push_str(&other.to_string()),
        }
        cursor = *end;
    }
    out.push_str(&text[cursor..]);
    Ok(Value::String(out))
}

/// Byte ranges and inner paths of `{...}` expressions in `text`.
fn find_references(text: &str) -> Vec<(usize, usize, String)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => start = Some(i),
            '}' => {
                if let Some(open) = start.take() {
                    let inner = &text[open + 1..i];
                    if !inner.is_empty() {
                        out.push((open, i + 1, inner.to_string()));
                    }
                }
            }
            _ => {}
        }
    }
    out
}
