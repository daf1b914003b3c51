//! Bridges the typed [`Value`] model to the wire [`proto::DynamicValue`].
//!
//! The real plugin protocol encodes `DynamicValue.msgpack` as a msgpack
//! encoding of the provider's native cty value, including a dedicated
//! "unknown" extension type. That framing is explicitly out of scope here
//! (consumed only through the nine named operations); this module instead
//! msgpack-encodes the same untyped, JSON-shaped tree (with the `null`/
//! sentinel-unknown convention) that the rest of this workspace already
//! uses, and decodes it back through the real typed decoder — see
//! DESIGN.md's note on the "extension-typed sentinel" open question.

use infractl_core::value::{self, Type, Untyped, Value};
use infractl_core::{Error, Result};

use crate::proto::DynamicValue;

/// Encodes a typed value as a wire `DynamicValue`.
pub fn encode_wire(v: &Value) -> Result<DynamicValue> {
    let untyped = value::typed_to_untyped(v)?;
    let msgpack = rmp_serde::to_vec_named(&untyped).map_err(|e| Error::msgpack(e.to_string()))?;
    Ok(DynamicValue { msgpack, json: Vec::new() })
}

/// Decodes a wire `DynamicValue` under the given type. A `DynamicValue` with
/// no msgpack payload (as providers send for an absent planned/new state)
/// decodes to `Null(t)`.
pub fn decode_wire(dv: &DynamicValue, t: &Type) -> Result<Value> {
    if dv.msgpack.is_empty() {
        return Ok(Value::Null(t.clone()));
    }
    let untyped: Untyped = rmp_serde::from_slice(&dv.msgpack).map_err(|e| Error::msgpack(e.to_string()))?;
    value::untyped_to_typed(&untyped, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infractl_core::value::Number;

    #[test]
    fn roundtrips_through_msgpack() {
        let v = Value::String("hello".to_string());
        let wire = encode_wire(&v).unwrap();
        assert!(!wire.msgpack.is_empty());
        let decoded = decode_wire(&wire, &Type::String).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn empty_dynamic_value_decodes_to_null() {
        let dv = DynamicValue { msgpack: Vec::new(), json: Vec::new() };
        let decoded = decode_wire(&dv, &Type::Number).unwrap();
        assert_eq!(decoded, Value::Null(Type::Number));
    }

    #[test]
    fn numbers_roundtrip_through_the_wire() {
        let v = Value::Number(Number::Int(7));
        let wire = encode_wire(&v).unwrap();
        let decoded = decode_wire(&wire, &Type::Number).unwrap();
        assert_eq!(decoded, v);
    }
}
