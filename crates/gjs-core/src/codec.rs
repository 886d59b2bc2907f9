//! Canonical, self-verifying serialization for function arguments and
//! results.
//!
//! The wire format is private to this crate: a one-byte version tag
//! followed by a `bincode`-encoded, key-sorted representation of a [`Dict`].
//! Nothing outside this module is expected to parse it. Keys are sorted
//! before encoding (on top of `BTreeMap` already iterating in sorted order)
//! so that two dicts built with keys inserted in a different order always
//! produce byte-identical output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

const WIRE_VERSION: u8 = 1;

/// A dynamically typed, canonically ordered argument or result dictionary.
pub type Dict = BTreeMap<String, Value>;

/// A value that can appear inside a [`Dict`]. Deliberately small: this is a
/// transport format for function arguments and results, not a general
/// document model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Dict),
}

impl Value {
    /// Renders a value the way [`crate::identity::canonical_job_key`] needs:
    /// a stable, human-legible scalar form, used recursively for nested
    /// lists and dicts.
    pub fn render_stable(&self) -> String {
        match self {
            Value::Null => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::render_stable).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Dict(dict) => {
                let rendered: Vec<String> = dict
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.render_stable()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
        }
    }
}

/// Encodes `dict` (or the empty-arguments case, `None`) into the wire
/// format, verifying the bytes decode back to an equal value before
/// returning them.
pub fn encode(dict: Option<&Dict>) -> JobResult<Vec<u8>> {
    let Some(dict) = dict else {
        return Ok(Vec::new());
    };

    let sorted: Vec<(&String, &Value)> = dict.iter().collect();
    let body = bincode::serialize(&sorted)
        .map_err(|e| JobError::Codec(format!("encode failed: {e}")))?;

    let mut wire = Vec::with_capacity(body.len() + 1);
    wire.push(WIRE_VERSION);
    wire.extend_from_slice(&body);

    match decode(&wire) {
        Ok(Some(round_tripped)) if &round_tripped == dict => Ok(wire),
        Ok(Some(_)) => Err(JobError::Codec(
            "round-trip check failed: decoded value differs from input".into(),
        )),
        Ok(None) => Err(JobError::Codec(
            "round-trip check failed: non-empty dict decoded as empty".into(),
        )),
        Err(e) => Err(JobError::Codec(format!("round-trip decode failed: {e}"))),
    }
}

/// Wraps a function's result the way every result handed to the queue must
/// be wrapped (spec's result-wrapping invariant): a one-key dict
/// `{ "result": value }`, so that a function returning nothing at all is
/// distinguishable on the wire from one that explicitly returned null.
pub fn wrap_result(value: Option<Dict>) -> Dict {
    let wrapped = match value {
        Some(dict) => Value::Dict(dict),
        None => Value::Null,
    };
    Dict::from([("result".to_string(), wrapped)])
}

/// Inverse of [`wrap_result`]: pulls the inner value back out of a decoded
/// `{ "result": value }` dict. Fails if the wrapper key is missing, which
/// means the bytes did not come from this crate's own `wrap_result`.
pub fn unwrap_result(dict: Option<Dict>) -> JobResult<Option<Dict>> {
    let dict = dict.ok_or_else(|| JobError::Codec("missing result wrapper".into()))?;
    match dict.get("result") {
        Some(Value::Null) => Ok(None),
        Some(Value::Dict(inner)) => Ok(Some(inner.clone())),
        Some(other) => Err(JobError::Codec(format!(
            "expected \"result\" to be a dict or null, got {other:?}"
        ))),
        None => Err(JobError::Codec("missing \"result\" key in wrapper".into())),
    }
}

/// Decodes bytes produced by [`encode`]. Empty input decodes to `None`,
/// matching the "no arguments" case.
pub fn decode(bytes: &[u8]) -> JobResult<Option<Dict>> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| JobError::Codec("truncated payload".into()))?;
    if *version != WIRE_VERSION {
        return Err(JobError::Codec(format!(
            "unsupported wire version {version}"
        )));
    }

    let pairs: Vec<(String, Value)> = bincode::deserialize(body)
        .map_err(|e| JobError::Codec(format!("decode failed: {e}")))?;

    Ok(Some(pairs.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_of(pairs: &[(&str, Value)]) -> Dict {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn round_trips_empty() {
        let wire = encode(None).unwrap();
        assert!(wire.is_empty());
        assert_eq!(decode(&wire).unwrap(), None);
    }

    #[test]
    fn round_trips_scalars_and_nesting() {
        let dict = dict_of(&[
            ("name", Value::Str("bottles".into())),
            ("count", Value::Int(99)),
            ("ratio", Value::Float(0.5)),
            ("enabled", Value::Bool(true)),
            ("tags", Value::List(vec![Value::Str("a".into()), Value::Str("b".into())])),
            (
                "meta",
                Value::Dict(dict_of(&[("nested", Value::Null)])),
            ),
        ]);

        let wire = encode(Some(&dict)).unwrap();
        assert_eq!(decode(&wire).unwrap().unwrap(), dict);
    }

    #[test]
    fn insertion_order_does_not_affect_encoding() {
        let a = dict_of(&[("b", Value::Int(2)), ("a", Value::Int(1))]);
        let b = dict_of(&[("a", Value::Int(1)), ("b", Value::Int(2))]);

        assert_eq!(encode(Some(&a)).unwrap(), encode(Some(&b)).unwrap());
    }

    #[test]
    fn decode_rejects_bad_version() {
        let err = decode(&[9, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, JobError::Codec(_)));
    }

    #[test]
    fn wraps_missing_result_as_null() {
        let wrapped = wrap_result(None);
        assert_eq!(wrapped.get("result"), Some(&Value::Null));
        assert_eq!(unwrap_result(Some(wrapped)).unwrap(), None);
    }

    #[test]
    fn wraps_and_unwraps_a_real_result() {
        let inner = dict_of(&[("sum", Value::Int(5))]);
        let wrapped = wrap_result(Some(inner.clone()));
        assert_eq!(unwrap_result(Some(wrapped)).unwrap(), Some(inner));
    }

    #[test]
    fn unwrap_rejects_bytes_with_no_wrapper() {
        assert!(unwrap_result(None).is_err());
        assert!(unwrap_result(Some(Dict::new())).is_err());
    }

    #[test]
    fn render_stable_nested() {
        let v = Value::Dict(dict_of(&[
            ("b", Value::List(vec![Value::Int(1), Value::Int(2)])),
            ("a", Value::Str("x".into())),
        ]));
        assert_eq!(v.render_stable(), "{a=x, b=[1, 2]}");
    }
}
