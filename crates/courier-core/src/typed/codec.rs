//! MessageCodec - the single serialization boundary.
//!
//! # Wire format
//! One JSON object per envelope:
//! ```text
//! {"type":"Ping","id":"01H...","created_at":"...","priority":0,"retry_attempts":0,
//!  "reply_id":null,"reply_to":null,"error":null,"options":0,"tag":null,"meta":{},
//!  "body":{"text":"hi"}}
//! ```
//! `type` is `Message::TYPE` of the body, so bytes can be decoded (or at least
//! routed) without any outside hint. `meta` is a `BTreeMap`, which keeps the
//! encoding deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Envelope, ErrorInfo, Message, MessageId, MessageOptions};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {type_name} envelope: {source}")]
    Encode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("envelope carries {found}, expected {expected}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("body of {type_name} envelope does not decode: {source}")]
    Body {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize)]
struct WireRef<'a, T> {
    #[serde(rename = "type")]
    type_name: &'a str,
    id: MessageId,
    created_at: DateTime<Utc>,
    priority: i64,
    retry_attempts: u32,
    reply_id: Option<MessageId>,
    reply_to: Option<&'a str>,
    error: Option<&'a ErrorInfo>,
    options: MessageOptions,
    tag: Option<&'a str>,
    meta: &'a BTreeMap<String, String>,
    body: &'a T,
}

#[derive(Deserialize)]
struct Wire {
    #[serde(rename = "type")]
    type_name: String,
    id: MessageId,
    created_at: DateTime<Utc>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    retry_attempts: u32,
    #[serde(default)]
    reply_id: Option<MessageId>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    error: Option<ErrorInfo>,
    #[serde(default)]
    options: MessageOptions,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type")]
    type_name: String,
}

impl Wire {
    fn into_envelope<T>(self, body: T) -> Envelope<T> {
        Envelope {
            id: self.id,
            created_at: self.created_at,
            priority: self.priority,
            retry_attempts: self.retry_attempts,
            reply_id: self.reply_id,
            reply_to: self.reply_to,
            error: self.error,
            options: self.options,
            tag: self.tag,
            meta: self.meta,
            body,
        }
    }
}

/// Stateless envelope <-> bytes conversion.
pub struct MessageCodec;

impl MessageCodec {
    pub fn encode<T: Message>(envelope: &Envelope<T>) -> Result<Vec<u8>, CodecError> {
        let wire = WireRef {
            type_name: T::TYPE,
            id: envelope.id,
            created_at: envelope.created_at,
            priority: envelope.priority,
            retry_attempts: envelope.retry_attempts,
            reply_id: envelope.reply_id,
            reply_to: envelope.reply_to.as_deref(),
            error: envelope.error.as_ref(),
            options: envelope.options,
            tag: envelope.tag.as_deref(),
            meta: &envelope.meta,
            body: &envelope.body,
        };
        serde_json::to_vec(&wire).map_err(|source| CodecError::Encode {
            type_name: T::TYPE,
            source,
        })
    }

    pub fn decode<T: Message>(bytes: &[u8]) -> Result<Envelope<T>, DecodeError> {
        let mut wire: Wire = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        if wire.type_name != T::TYPE {
            return Err(DecodeError::TypeMismatch {
                expected: T::TYPE,
                found: wire.type_name,
            });
        }
        let body = serde_json::from_value(wire.body.take()).map_err(|source| DecodeError::Body {
            type_name: T::TYPE,
            source,
        })?;
        Ok(wire.into_envelope(body))
    }

    /// Decode without knowing the body type: returns the type tag and an
    /// envelope whose body is raw JSON. Useful for inspecting a DLQ.
    pub fn decode_untyped(bytes: &[u8]) -> Result<(String, Envelope<serde_json::Value>), DecodeError> {
        let mut wire: Wire = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        let type_name = std::mem::take(&mut wire.type_name);
        let body = wire.body.take();
        Ok((type_name, wire.into_envelope(body)))
    }

    /// Read only the type tag.
    pub fn peek_type(bytes: &[u8]) -> Result<String, DecodeError> {
        let tag: TypeOnly = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        Ok(tag.type_name)
    }
}
