//! Wire codec
//!
//! Every message is framed the way Confluent-compatible clients expect:
//!
//! ```text
//! [0x00 magic][u32 big-endian sequential id][Avro binary datum]
//! ```
//!
//! The datum is written with the registered schema, so field order and types
//! on the wire are exactly what was registered.

use std::io::Cursor;

use apache_avro::{from_avro_datum, from_value, to_avro_datum, to_value, Schema};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ForgeError, Result};
use crate::schema::SchemaBody;
use crate::version::SequentialId;

pub const MAGIC_BYTE: u8 = 0x00;
pub const HEADER_LEN: usize = 5;

/// A registered schema bound to one subject and id, ready to encode/decode
#[derive(Debug, Clone)]
pub struct BoundSchema {
    subject: String,
    sequential_id: SequentialId,
    schema: Schema,
}

impl BoundSchema {
    pub fn new(subject: impl Into<String>, sequential_id: SequentialId, body: &SchemaBody) -> Result<Self> {
        Ok(Self {
            subject: subject.into(),
            sequential_id,
            schema: body.avro_schema()?,
        })
    }

    /// Bind from the schema JSON embedded in generated code
    pub fn parse(subject: impl Into<String>, sequential_id: u32, schema_json: &str) -> Result<Self> {
        let body = SchemaBody::parse(schema_json)?;
        Self::new(subject, SequentialId(sequential_id), &body)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn sequential_id(&self) -> SequentialId {
        self.sequential_id
    }

    /// Serialize one event into a framed payload
    pub fn encode<E: Serialize>(&self, event: &E) -> Result<Vec<u8>> {
        let failed = |reason: String| ForgeError::SerializationFailed {
            subject: self.subject.clone(),
            reason,
        };

        let value = to_value(event)
            .and_then(|v| v.resolve(&self.schema))
            .map_err(|e| failed(e.to_string()))?;
        let datum = to_avro_datum(&self.schema, value).map_err(|e| failed(e.to_string()))?;

        let mut payload = Vec::with_capacity(HEADER_LEN + datum.len());
        payload.push(MAGIC_BYTE);
        payload.extend_from_slice(&self.sequential_id.get().to_be_bytes());
        payload.extend_from_slice(&datum);
        Ok(payload)
    }

    /// Decode a framed payload written for this schema
    pub fn decode<E: DeserializeOwned>(&self, payload: &[u8]) -> Result<E> {
        let failed = |reason: String| ForgeError::DeserializationFailed {
            subject: self.subject.clone(),
            reason,
        };

        if payload.len() < HEADER_LEN {
            return Err(failed(format!(
                "payload of {} bytes is shorter than the {} byte header",
                payload.len(),
                HEADER_LEN
            )));
        }
        if payload[0] != MAGIC_BYTE {
            return Err(failed(format!("unknown magic byte 0x{:02x}", payload[0])));
        }
        let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        if id != self.sequential_id.get() {
            return Err(failed(format!(
                "payload written with schema id {}, consumer is bound to {}",
                id, self.sequential_id
            )));
        }

        let mut reader = Cursor::new(&payload[HEADER_LEN..]);
        let value = from_avro_datum(&self.schema, &mut reader, None).map_err(|e| failed(e.to_string()))?;
        if (reader.position() as usize) != payload.len() - HEADER_LEN {
            return Err(failed("trailing bytes after datum".to_string()));
        }
        from_value(&value).map_err(|e| failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "UserSignupEvent",
        "fields": [
            { "name": "userId", "type": "string" },
            { "name": "signupTimestamp", "type": "long" },
            { "name": "referrer", "type": ["null", "string"], "default": null }
        ]
    }"#;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Signup {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "signupTimestamp")]
        signup_timestamp: i64,
        referrer: Option<String>,
    }

    fn bound() -> BoundSchema {
        BoundSchema::parse("UserSignupEvent", 7, SCHEMA).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let event = Signup {
            user_id: "bwayne".to_string(),
            signup_timestamp: 1699564800000,
            referrer: Some("alfred".to_string()),
        };
        let payload = bound().encode(&event).unwrap();
        assert_eq!(&payload[..HEADER_LEN], &[0x00, 0, 0, 0, 7]);
        assert_eq!(bound().decode::<Signup>(&payload).unwrap(), event);

        let anonymous = Signup { referrer: None, ..event };
        let payload = bound().encode(&anonymous).unwrap();
        assert_eq!(bound().decode::<Signup>(&payload).unwrap(), anonymous);
    }

    const EVERY_TYPE: &str = r#"{
        "type": "record",
        "name": "EveryType",
        "fields": [
            { "name": "flag", "type": "boolean" },
            { "name": "count", "type": "int" },
            { "name": "total", "type": "long" },
            { "name": "ratio", "type": "float" },
            { "name": "score", "type": "double" },
            { "name": "blob", "type": "bytes" },
            { "name": "label", "type": "string" },
            { "name": "nothing", "type": "null" },
            { "name": "note", "type": ["string", "null"] },
            { "name": "seenAt", "type": { "type": "long", "logicalType": "timestamp-millis" } }
        ]
    }"#;

    /// Field types as generated for Rust packages
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct EveryType {
        flag: bool,
        count: i32,
        total: i64,
        ratio: f32,
        score: f64,
        blob: serde_bytes::ByteBuf,
        label: String,
        nothing: (),
        note: Option<String>,
        #[serde(rename = "seenAt")]
        seen_at: i64,
    }

    #[test]
    fn test_every_mapped_type_round_trips() {
        let schema = BoundSchema::parse("EveryType", 11, EVERY_TYPE).unwrap();
        let rows = vec![
            EveryType {
                flag: true,
                count: i32::MAX,
                total: i64::MIN,
                ratio: 0.5,
                score: -1.25e300,
                blob: serde_bytes::ByteBuf::from(vec![0x00, 0xff, 0x7f]),
                label: "Zürich ☕ 東京".to_string(),
                nothing: (),
                note: Some("ünïcode".to_string()),
                seen_at: 1_699_564_800_000,
            },
            EveryType {
                flag: false,
                count: i32::MIN,
                total: i64::MAX,
                ratio: -3.0,
                score: 0.0,
                blob: serde_bytes::ByteBuf::new(),
                label: String::new(),
                nothing: (),
                note: None,
                seen_at: 0,
            },
            EveryType {
                flag: true,
                count: 0,
                total: 0,
                ratio: f32::MAX,
                score: f64::MIN_POSITIVE,
                blob: serde_bytes::ByteBuf::from(vec![b'a'; 1024]),
                label: "x".repeat(300),
                nothing: (),
                note: Some(String::new()),
                seen_at: -1,
            },
        ];

        for row in rows {
            let payload = schema.encode(&row).unwrap();
            assert_eq!(&payload[..HEADER_LEN], &[0x00, 0, 0, 0, 11]);
            assert_eq!(schema.decode::<EveryType>(&payload).unwrap(), row);
        }
    }

    #[test]
    fn test_rejects_foreign_schema_id() {
        let other = BoundSchema::parse("UserSignupEvent", 8, SCHEMA).unwrap();
        let payload = other
            .encode(&Signup {
                user_id: "x".to_string(),
                signup_timestamp: 1,
                referrer: None,
            })
            .unwrap();
        let err = bound().decode::<Signup>(&payload).unwrap_err();
        assert!(matches!(err, ForgeError::DeserializationFailed { .. }));
    }

    #[test]
    fn test_rejects_corrupt_payloads() {
        assert!(bound().decode::<Signup>(&[0x00, 0, 0]).is_err());
        assert!(bound().decode::<Signup>(&[0x01, 0, 0, 0, 7, 2]).is_err());
        assert!(bound().decode::<Signup>(&[0x00, 0, 0, 0, 7, 0xff]).is_err());
    }

    #[test]
    fn test_encode_rejects_shape_mismatch() {
        #[derive(Serialize)]
        struct Wrong {
            name: String,
        }
        let err = bound()
            .encode(&Wrong {
                name: "x".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ForgeError::SerializationFailed { .. }));
    }
}
