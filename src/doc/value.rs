//! JSON <-> Automerge translation
//!
//! Typed records serialize through `serde_json::Value` and are written into
//! the document field by field, so concurrent edits to different fields of
//! the same record merge instead of clobbering each other.

use automerge::transaction::Transactable;
use automerge::{AutoCommit, AutomergeError, ObjId, ObjType, ReadDoc, ScalarValue, Value};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

/// Write a single field of a map object, recursing into nested maps/lists.
pub fn write_field(
    doc: &mut AutoCommit,
    obj: &ObjId,
    key: &str,
    value: &JsonValue,
) -> Result<(), AutomergeError> {
    match value {
        JsonValue::Object(map) => {
            let inner = doc.put_object(obj, key, ObjType::Map)?;
            write_map(doc, &inner, map)
        }
        JsonValue::Array(items) => {
            let inner = doc.put_object(obj, key, ObjType::List)?;
            write_list(doc, &inner, items)
        }
        other => doc.put(obj, key, to_scalar(other)),
    }
}

pub fn write_map(
    doc: &mut AutoCommit,
    obj: &ObjId,
    map: &JsonMap<String, JsonValue>,
) -> Result<(), AutomergeError> {
    for (key, value) in map {
        write_field(doc, obj, key.as_str(), value)?;
    }
    Ok(())
}

pub fn write_list(
    doc: &mut AutoCommit,
    list: &ObjId,
    items: &[JsonValue],
) -> Result<(), AutomergeError> {
    for (i, item) in items.iter().enumerate() {
        match item {
            JsonValue::Object(map) => {
                let inner = doc.insert_object(list, i, ObjType::Map)?;
                write_map(doc, &inner, map)?;
            }
            JsonValue::Array(nested) => {
                let inner = doc.insert_object(list, i, ObjType::List)?;
                write_list(doc, &inner, nested)?;
            }
            other => doc.insert(list, i, to_scalar(other))?,
        }
    }
    Ok(())
}

/// Read an object (map or list) back into a `serde_json::Value`.
pub fn hydrate(doc: &AutoCommit, obj: &ObjId, ty: ObjType) -> Result<JsonValue, AutomergeError> {
    match ty {
        ObjType::Map | ObjType::Table => {
            let mut map = JsonMap::new();
            let keys: Vec<String> = doc.keys(obj).collect();
            for key in keys {
                if let Some((value, id)) = doc.get(obj, key.as_str())? {
                    map.insert(key, hydrate_value(doc, value, &id)?);
                }
            }
            Ok(JsonValue::Object(map))
        }
        ObjType::List => {
            let len = doc.length(obj);
            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                if let Some((value, id)) = doc.get(obj, i)? {
                    items.push(hydrate_value(doc, value, &id)?);
                }
            }
            Ok(JsonValue::Array(items))
        }
        ObjType::Text => Ok(JsonValue::String(doc.text(obj)?)),
    }
}

fn hydrate_value(
    doc: &AutoCommit,
    value: Value<'_>,
    id: &ObjId,
) -> Result<JsonValue, AutomergeError> {
    match value {
        Value::Object(ty) => hydrate(doc, id, ty),
        Value::Scalar(s) => Ok(from_scalar(s.as_ref())),
    }
}

pub(crate) fn to_scalar(value: &JsonValue) -> ScalarValue {
    match value {
        JsonValue::Null => ScalarValue::Null,
        JsonValue::Bool(b) => ScalarValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                ScalarValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                ScalarValue::Uint(u)
            } else {
                ScalarValue::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => ScalarValue::Str(s.as_str().into()),
        // Containers are handled by the callers above.
        _ => ScalarValue::Null,
    }
}

fn from_scalar(scalar: &ScalarValue) -> JsonValue {
    match scalar {
        ScalarValue::Str(s) => JsonValue::String(s.to_string()),
        ScalarValue::Int(i) | ScalarValue::Timestamp(i) => JsonValue::from(*i),
        ScalarValue::Uint(u) => JsonValue::from(*u),
        ScalarValue::F64(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ScalarValue::Boolean(b) => JsonValue::Bool(*b),
        _ => JsonValue::Null,
    }
}
