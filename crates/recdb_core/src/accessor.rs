//! Field access by dotted path.
//!
//! Paths address nested values: `a.b` is field `b` of object `a`, and a
//! numeric segment indexes an array (`tags.0`).

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Reads and writes record fields by path.
pub trait Accessor {
    /// Returns the value at `path`.
    fn get(&self, path: &str) -> Option<Value>;

    /// Sets the value at `path`, creating missing parent objects.
    fn set(&mut self, path: &str, value: Value) -> CoreResult<()>;

    /// Short name of the accessor implementation.
    fn type_name(&self) -> &'static str;

    /// Whether a value exists at `path`.
    fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// String at `path`.
    fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer at `path`. Floats without a fractional part count.
    fn get_int(&self, path: &str) -> Option<i64> {
        let value = self.get(path)?;
        value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
    }

    /// Number at `path`.
    fn get_float(&self, path: &str) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    /// Boolean at `path`.
    fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }
}

/// Looks up a dotted path in a JSON tree.
#[must_use]
pub fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at a dotted path, creating missing parent objects.
pub fn assign(root: &mut Value, path: &str, value: Value) -> CoreResult<()> {
    if path.is_empty() {
        return Err(CoreError::accessor("empty path"));
    }
    let mut node = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        node = match node {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_owned(), value);
                    return Ok(());
                }
                map.entry(segment.to_owned())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
            Value::Array(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| CoreError::accessor(format!("{segment:?} is not an array index")))?;
                if index > items.len() {
                    return Err(CoreError::accessor(format!(
                        "index {index} out of range in {path}"
                    )));
                }
                if index == items.len() {
                    items.push(Value::Object(Map::new()));
                }
                if last {
                    items[index] = value;
                    return Ok(());
                }
                &mut items[index]
            }
            other => {
                return Err(CoreError::accessor(format!(
                    "cannot set {path}: {segment:?} is inside a {}",
                    kind(other)
                )))
            }
        };
    }
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accessor over raw JSON bytes.
///
/// The bytes are parsed once; every successful `set` serializes the tree
/// back into the buffer.
#[derive(Debug)]
pub struct JsonBytesAccessor<'a> {
    data: &'a mut Vec<u8>,
    parsed: Option<Value>,
}

impl<'a> JsonBytesAccessor<'a> {
    /// Creates an accessor over `data`. Unparsable data reads as empty.
    pub fn new(data: &'a mut Vec<u8>) -> Self {
        let parsed = serde_json::from_slice(data).ok();
        Self { data, parsed }
    }
}

impl Accessor for JsonBytesAccessor<'_> {
    fn get(&self, path: &str) -> Option<Value> {
        lookup(self.parsed.as_ref()?, path).cloned()
    }

    fn set(&mut self, path: &str, value: Value) -> CoreResult<()> {
        let tree = self
            .parsed
            .as_mut()
            .ok_or_else(|| CoreError::accessor("record data is not valid JSON"))?;
        assign(tree, path, value)?;
        *self.data = serde_json::to_vec(tree).map_err(|e| CoreError::accessor(e.to_string()))?;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "JsonBytes"
    }
}

/// Accessor over a typed value.
///
/// Writes go through a JSON round trip: a write that would leave the value
/// in a shape its type cannot hold is rejected and the value is unchanged.
#[derive(Debug)]
pub struct StructAccessor<'a, T> {
    data: &'a mut T,
}

impl<'a, T: Serialize + DeserializeOwned> StructAccessor<'a, T> {
    /// Creates an accessor over `data`.
    pub fn new(data: &'a mut T) -> Self {
        Self { data }
    }

    fn tree(&self) -> Option<Value> {
        serde_json::to_value(&*self.data).ok()
    }
}

impl<T: Serialize + DeserializeOwned> Accessor for StructAccessor<'_, T> {
    fn get(&self, path: &str) -> Option<Value> {
        lookup(&self.tree()?, path).cloned()
    }

    fn set(&mut self, path: &str, value: Value) -> CoreResult<()> {
        let mut tree = self
            .tree()
            .ok_or_else(|| CoreError::accessor("value is not representable as JSON"))?;
        assign(&mut tree, path, value)?;
        *self.data = serde_json::from_value(tree)
            .map_err(|e| CoreError::accessor(format!("cannot set {path}: {e}")))?;
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "Struct"
    }
}
