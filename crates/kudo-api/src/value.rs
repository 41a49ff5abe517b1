//! Kind-tagged polymorphic values.
//!
//! Escalation policies embed grant specifications of different shapes in a
//! single list, and escalation statuses carry grant references the same way.
//! A [`ValueWithKind`] keeps the full JSON object around together with its
//! extracted `kind` tag, so the controller can route on the kind without
//! knowing the payload shape, and providers can decode the payload into
//! their own concrete types.
//!
//! The wire shape is flat: `{"kind": "<kind>", ...payload fields}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// A JSON object tagged with a `kind` discriminator.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueWithKind {
    kind: String,
    payload: Map<String, Value>,
}

/// Failure to encode or decode a tagged value.
#[derive(Debug, Error)]
pub enum ValueError {
    /// The payload serialized to a JSON array, which cannot carry a kind tag.
    #[error("encoding of arrays isn't supported")]
    Array,
    /// The payload serialized to a bare scalar, which cannot carry a kind
    /// tag either.
    #[error("encoding of non-object values isn't supported")]
    Scalar,
    /// The raw JSON was not an object.
    #[error("tagged value must be a JSON object")]
    NotAnObject,
    /// The underlying JSON machinery failed.
    #[error("tagged value codec: {0}")]
    Json(#[from] serde_json::Error),
}

impl ValueWithKind {
    /// The kind tag carried by this value.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Encode `value` under the given kind.
    ///
    /// The payload must serialize to a JSON object (or to nothing at all,
    /// which yields `{"kind": ...}` alone); arrays and scalars are rejected
    /// because the tag cannot be injected into them.
    pub fn encode<T: Serialize>(kind: &str, value: &T) -> Result<Self, ValueError> {
        let serialized = serde_json::to_value(value)?;

        let mut payload = match serialized {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            Value::Array(_) => return Err(ValueError::Array),
            _ => return Err(ValueError::Scalar),
        };

        payload.insert("kind".to_string(), Value::String(kind.to_string()));

        Ok(ValueWithKind {
            kind: kind.to_string(),
            payload,
        })
    }

    /// Encode `value`, panicking on failure.
    ///
    /// Reserved for statically-known payload shapes (built-in defaults,
    /// tests) where failure is a programming error.
    ///
    /// # Panics
    ///
    /// Panics when [`ValueWithKind::encode`] fails.
    pub fn must_encode<T: Serialize>(kind: &str, value: &T) -> Self {
        match Self::encode(kind, value) {
            Ok(v) => v,
            Err(err) => panic!("encoding tagged value of kind {kind:?}: {err}"),
        }
    }

    /// Decode the payload into a concrete type.
    ///
    /// The injected `kind` field is visible to the target type; payload
    /// structs without a `kind` field simply ignore it.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ValueError> {
        let value = Value::Object(self.payload.clone());
        Ok(serde_json::from_value(value)?)
    }
}

impl Default for ValueWithKind {
    /// An untagged empty object: the zero value of a grant slot that has
    /// never been written.
    fn default() -> Self {
        ValueWithKind {
            kind: String::new(),
            payload: Map::new(),
        }
    }
}

impl Serialize for ValueWithKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueWithKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        let payload = match value {
            Value::Object(fields) => fields,
            _ => return Err(serde::de::Error::custom(ValueError::NotAnObject)),
        };

        let kind = payload
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(ValueWithKind { kind, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestPayload {
        name: String,
        count: u32,
    }

    #[test]
    fn encode_injects_kind_into_the_object() {
        let value = ValueWithKind::encode(
            "TestKind",
            &TestPayload {
                name: "hello".to_string(),
                count: 3,
            },
        )
        .unwrap();

        assert_eq!(value.kind(), "TestKind");

        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "TestKind", "name": "hello", "count": 3})
        );
    }

    #[test]
    fn encode_of_unit_yields_kind_only() {
        let value = ValueWithKind::encode("Bare", &()).unwrap();
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"kind":"Bare"}"#);
    }

    #[test]
    fn encode_rejects_arrays_and_scalars() {
        assert!(matches!(
            ValueWithKind::encode("Nope", &vec![1, 2, 3]),
            Err(ValueError::Array)
        ));
        assert!(matches!(
            ValueWithKind::encode("Nope", &42),
            Err(ValueError::Scalar)
        ));
    }

    #[test]
    fn decode_round_trips() {
        let payload = TestPayload {
            name: "hello".to_string(),
            count: 3,
        };

        let value = ValueWithKind::encode("TestKind", &payload).unwrap();
        let decoded: TestPayload = value.decode().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn deserialize_extracts_the_kind_tag() {
        let raw = r#"{"kind":"TestKind","name":"hi","count":1}"#;
        let value: ValueWithKind = serde_json::from_str(raw).unwrap();

        assert_eq!(value.kind(), "TestKind");

        let decoded: TestPayload = value.decode().unwrap();
        assert_eq!(decoded.count, 1);
    }

    #[test]
    fn deserialize_without_kind_yields_empty_tag() {
        let value: ValueWithKind = serde_json::from_str(r#"{"name":"hi","count":1}"#).unwrap();
        assert_eq!(value.kind(), "");
    }

    #[test]
    fn deserialize_rejects_non_objects() {
        assert!(serde_json::from_str::<ValueWithKind>("[1,2]").is_err());
        assert!(serde_json::from_str::<ValueWithKind>(r#""str""#).is_err());
    }
}
