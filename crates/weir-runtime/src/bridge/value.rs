//! Host <-> script value marshalling.
//!
//! The host value domain covers everything that may cross the engine
//! boundary: primitives, byte arrays, ordered sequences, string-keyed maps,
//! and opaque references for functions and pending promises. Anything else
//! fails with a marshal error instead of being smuggled through.

use std::collections::HashMap;

use rquickjs::{Array, BigInt, Ctx, IntoJs, Object, Type, TypedArray};

use crate::error::{Error, Result};

/// Recursion cap for unmarshalling; cyclic object graphs trip this instead
/// of overflowing the stack.
const MAX_DEPTH: usize = 64;

/// Opaque reference to a script function that crossed into the host world.
/// It cannot be marshalled back; it only records that a function was seen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionRef {
    pub name: Option<String>,
}

/// A host-side value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    /// Small integers; the engine's native int range is i32, wider values
    /// marshal as floats.
    Int(i64),
    /// Engine big-int values.
    BigInt(i64),
    Float(f64),
    String(String),
    /// Byte arrays round-trip byte-for-byte as Uint8Array.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// String-keyed mapping; insertion order is not preserved.
    Map(HashMap<String, Value>),
    /// Opaque function reference.
    Function(FunctionRef),
    /// Opaque pending-result reference.
    Promise,
}

impl Value {
    /// Convert from a JSON value. Numbers become `Int` when integral.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value. `Undefined`, functions and promises map to
    /// `null`; bytes map to an array of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Promise => {
                serde_json::Value::Null
            }
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) | Value::BigInt(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
            }
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => {
                let mut object = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    object.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(object)
            }
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

fn engine_err(e: rquickjs::Error) -> Error {
    Error::marshal(format!("engine: {e}"))
}

/// Marshal a host value into the script world.
///
/// Fails with a marshal error for opaque references, which cannot cross
/// back into script code.
pub fn marshal<'js>(ctx: &Ctx<'js>, value: &Value) -> Result<rquickjs::Value<'js>> {
    match value {
        Value::Undefined => rquickjs::Undefined.into_js(ctx).map_err(engine_err),
        Value::Null => rquickjs::Null.into_js(ctx).map_err(engine_err),
        Value::Bool(b) => b.into_js(ctx).map_err(engine_err),
        Value::Int(i) => {
            // the engine's int representation is 32-bit; wider values go
            // through as doubles
            if let Ok(small) = i32::try_from(*i) {
                small.into_js(ctx).map_err(engine_err)
            } else {
                (*i as f64).into_js(ctx).map_err(engine_err)
            }
        }
        Value::BigInt(i) => BigInt::from_i64(ctx.clone(), *i)
            .and_then(|b| b.into_js(ctx))
            .map_err(engine_err),
        Value::Float(f) => f.into_js(ctx).map_err(engine_err),
        Value::String(s) => s.as_str().into_js(ctx).map_err(engine_err),
        Value::Bytes(bytes) => TypedArray::new(ctx.clone(), bytes.clone())
            .and_then(|a| a.into_js(ctx))
            .map_err(engine_err),
        Value::Array(items) => {
            let array = Array::new(ctx.clone()).map_err(engine_err)?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, marshal(ctx, item)?).map_err(engine_err)?;
            }
            array.into_js(ctx).map_err(engine_err)
        }
        Value::Map(map) => {
            let object = Object::new(ctx.clone()).map_err(engine_err)?;
            for (k, v) in map {
                object
                    .set(k.as_str(), marshal(ctx, v)?)
                    .map_err(engine_err)?;
            }
            object.into_js(ctx).map_err(engine_err)
        }
        Value::Function(_) => Err(Error::marshal("function references cannot be marshalled")),
        Value::Promise => Err(Error::marshal("promise references cannot be marshalled")),
    }
}

/// Unmarshal a script value into the host world.
///
/// Numbers map to `Int` only when the engine itself tags them integral;
/// everything else numeric is a `Float`. Unsupported types (symbols,
/// modules) fail with a marshal error.
pub fn unmarshal(value: &rquickjs::Value<'_>) -> Result<Value> {
    unmarshal_depth(value, 0)
}

fn unmarshal_depth(value: &rquickjs::Value<'_>, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::marshal("value nesting exceeds the supported depth"));
    }

    match value.type_of() {
        Type::Uninitialized | Type::Undefined => Ok(Value::Undefined),
        Type::Null => Ok(Value::Null),
        Type::Bool => Ok(Value::Bool(value.as_bool().unwrap_or_default())),
        Type::Int => Ok(Value::Int(value.as_int().unwrap_or_default() as i64)),
        Type::Float => Ok(Value::Float(value.as_float().unwrap_or_default())),
        Type::BigInt => value
            .get::<i64>()
            .map(Value::BigInt)
            .map_err(|e| Error::marshal(format!("big-int out of range: {e}"))),
        Type::String => value
            .get::<String>()
            .map(Value::String)
            .map_err(engine_err),
        Type::Array => {
            let array = value
                .as_array()
                .ok_or_else(|| Error::marshal("array value without array payload"))?;
            let mut items = Vec::with_capacity(array.len());
            for item in array.iter::<rquickjs::Value>() {
                let item = item.map_err(engine_err)?;
                items.push(unmarshal_depth(&item, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        Type::Function | Type::Constructor => {
            let name = value
                .as_object()
                .and_then(|o| o.get::<_, String>("name").ok())
                .filter(|n| !n.is_empty());
            Ok(Value::Function(FunctionRef { name }))
        }
        Type::Promise => Ok(Value::Promise),
        Type::Symbol | Type::Module => Err(Error::marshal(format!(
            "unsupported value type: {:?}",
            value.type_of()
        ))),
        Type::Exception | Type::Object => {
            let object = value
                .as_object()
                .ok_or_else(|| Error::marshal("object value without object payload"))?;

            if let Some(array) = object.as_typed_array::<u8>() {
                let bytes = array
                    .as_bytes()
                    .ok_or_else(|| Error::marshal("detached byte array"))?;
                return Ok(Value::Bytes(bytes.to_vec()));
            }

            let mut map = HashMap::new();
            for prop in object.props::<String, rquickjs::Value>() {
                let (key, item) = prop.map_err(engine_err)?;
                map.insert(key, unmarshal_depth(&item, depth + 1)?);
            }
            Ok(Value::Map(map))
        }
        other => Err(Error::marshal(format!("unsupported value type: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let json = json!({"a": 1, "b": [true, null, "x"], "c": 2.5});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn ints_and_floats_from_json() {
        assert_eq!(Value::from_json(&json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&json!(3.5)), Value::Float(3.5));
    }

    #[test]
    fn bytes_to_json_is_number_array() {
        assert_eq!(Value::Bytes(vec![1, 2]).to_json(), json!([1, 2]));
    }

    #[test]
    fn opaque_refs_to_json_are_null() {
        assert_eq!(Value::Function(FunctionRef::default()).to_json(), json!(null));
        assert_eq!(Value::Promise.to_json(), json!(null));
    }

    // engine-side marshal/unmarshal round trips live in tests/bridge_test.rs
}
