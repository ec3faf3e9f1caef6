//! MessagePack envelope encoding
//!
//! A datagram is one MessagePack map: the message fields, its `type`, and
//! the optional correlation fields `msgID` and `replyData`. `replyData` is
//! opaque and carried as raw MessagePack, so binary payloads and non-string
//! keys survive the trip.

use rmpv::Value;

use crate::net::protocol::{Message, MessageKind, ValidationError};

const MSG_ID: &str = "msgID";
const REPLY_DATA: &str = "replyData";
const TYPE: &str = "type";

/// A message plus the correlation fields it travels with
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation id chosen by the requester, echoed in the reply
    pub msg_id: Option<u32>,
    /// Opaque requester data, echoed in the reply
    pub reply_data: Option<Value>,
    pub body: Message,
}

impl Envelope {
    /// Envelope with no correlation fields
    pub fn new(body: Message) -> Self {
        Self {
            msg_id: None,
            reply_data: None,
            body,
        }
    }

    pub fn with_id(body: Message, msg_id: u32) -> Self {
        Self {
            msg_id: Some(msg_id),
            reply_data: None,
            body,
        }
    }

    /// Wrap `body` as the reply to this envelope, copying its correlation fields
    pub fn reply(&self, body: Message) -> Self {
        Self {
            msg_id: self.msg_id,
            reply_data: self.reply_data.clone(),
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

impl From<Message> for Envelope {
    fn from(body: Message) -> Self {
        Envelope::new(body)
    }
}

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Datagram is not valid MessagePack: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("Failed to encode MessagePack: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to write MessagePack: {0}")]
    Write(#[from] rmpv::encode::Error),

    #[error("Datagram is not a map")]
    NotAMap,

    #[error("Message has no type")]
    MissingType,

    #[error("Unknown message type {0}")]
    UnknownType(Value),

    #[error("Field names must be strings, got {0}")]
    BadKey(Value),

    #[error("msgID must be an unsigned integer, got {0}")]
    BadMsgId(Value),

    #[error("Message does not match its schema: {0}")]
    Schema(rmp_serde::decode::Error),

    #[error("Invalid field: {0}")]
    Invalid(#[from] ValidationError),
}

/// Validate and encode an envelope into one datagram
pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    envelope.body.validate()?;

    let body = rmp_serde::to_vec_named(&envelope.body)?;
    let mut fields = match rmpv::decode::read_value(&mut body.as_slice())? {
        Value::Map(fields) => fields,
        _ => return Err(CodecError::NotAMap),
    };
    if let Some(id) = envelope.msg_id {
        fields.push((Value::from(MSG_ID), Value::from(id)));
    }
    if let Some(data) = &envelope.reply_data {
        fields.push((Value::from(REPLY_DATA), data.clone()));
    }

    let mut out = Vec::with_capacity(body.len() + 16);
    rmpv::encode::write_value(&mut out, &Value::Map(fields))?;
    Ok(out)
}

/// Decode and validate one datagram
pub fn deserialize(mut bytes: &[u8]) -> Result<Envelope, CodecError> {
    let fields = match rmpv::decode::read_value(&mut bytes)? {
        Value::Map(fields) => fields,
        _ => return Err(CodecError::NotAMap),
    };

    let mut msg_id = None;
    let mut reply_data = None;
    let mut kind = None;
    let mut rest = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match key.as_str() {
            Some(MSG_ID) => match value.as_u64().and_then(|id| u32::try_from(id).ok()) {
                Some(id) => msg_id = Some(id),
                None => return Err(CodecError::BadMsgId(value)),
            },
            Some(REPLY_DATA) => reply_data = Some(value),
            Some(TYPE) => {
                match value.as_str().and_then(MessageKind::from_name) {
                    Some(found) => kind = Some(found),
                    None => return Err(CodecError::UnknownType(value)),
                }
                rest.push((key, value));
            }
            None => return Err(CodecError::BadKey(key)),
            _ => rest.push((key, value)),
        }
    }
    if kind.is_none() {
        return Err(CodecError::MissingType);
    }

    let mut typed = Vec::new();
    rmpv::encode::write_value(&mut typed, &Value::Map(rest))?;
    let body: Message = rmp_serde::from_slice(&typed).map_err(CodecError::Schema)?;
    body.validate()?;

    Ok(Envelope {
        msg_id,
        reply_data,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> Vec<u8> {
        rmp_serde::to_vec_named(&value).unwrap()
    }

    #[test]
    fn correlation_fields_survive() {
        let env = Envelope {
            msg_id: Some(42),
            reply_data: Some(Value::Map(vec![(
                Value::from("seq"),
                Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]),
            )])),
            body: Message::ScanReply { distance: 120.5 },
        };
        let decoded = deserialize(&serialize(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn reply_copies_correlation() {
        let request = Envelope {
            msg_id: Some(7),
            reply_data: Some(Value::from("token")),
            body: Message::GetLocationRequest {},
        };
        let reply = request.reply(Message::GetLocationReply { x: 1.0, y: 2.0 });
        assert_eq!(reply.msg_id, Some(7));
        assert_eq!(reply.reply_data, Some(Value::from("token")));
    }

    #[test]
    fn integers_decode_into_float_fields() {
        let env = deserialize(&raw(json!({"type": "setSpeedRequest", "requestedSpeed": 50}))).unwrap();
        assert_eq!(env.body, Message::SetSpeedRequest { requested_speed: 50.0 });
        assert_eq!(env.msg_id, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(deserialize(&[0xc1, 0x00]), Err(CodecError::Decode(_))));
        assert!(matches!(deserialize(&raw(json!([1, 2]))), Err(CodecError::NotAMap)));
        assert!(matches!(deserialize(&raw(json!({"x": 1}))), Err(CodecError::MissingType)));
        assert!(matches!(
            deserialize(&raw(json!({"type": "teleportRequest"}))),
            Err(CodecError::UnknownType(_))
        ));
        assert!(matches!(
            deserialize(&raw(json!({"type": "getInfoRequest", "msgID": -1}))),
            Err(CodecError::BadMsgId(_))
        ));
    }

    #[test]
    fn rejects_schema_and_range_violations() {
        assert!(matches!(
            deserialize(&raw(json!({"type": "scanRequest", "startRadians": 1.0}))),
            Err(CodecError::Schema(_))
        ));
        assert!(matches!(
            deserialize(&raw(json!({"type": "getCanonRequest", "extra": true}))),
            Err(CodecError::Schema(_))
        ));
        assert!(matches!(
            deserialize(&raw(json!({"type": "setSpeedRequest", "requestedSpeed": 150}))),
            Err(CodecError::Invalid(_))
        ));
    }

    #[test]
    fn refuses_to_send_invalid_messages() {
        let env = Envelope::new(Message::GetLocationReply { x: -5.0, y: 0.0 });
        assert!(matches!(serialize(&env), Err(CodecError::Invalid(_))));
    }

    #[test]
    fn binary_and_integer_keyed_reply_data_pass_through() {
        let opaque = Value::Array(vec![
            Value::Binary(vec![1, 2, 3]),
            Value::Map(vec![(Value::from(1), Value::from("a"))]),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(
            &mut bytes,
            &Value::Map(vec![
                (Value::from("type"), Value::from("getInfoRequest")),
                (Value::from("replyData"), opaque.clone()),
            ]),
        )
        .unwrap();

        let request = deserialize(&bytes).unwrap();
        assert_eq!(request.body, Message::GetInfoRequest {});
        assert_eq!(request.reply_data, Some(opaque.clone()));

        // Echoed unchanged in the reply
        let reply = request.reply(Message::GetLocationReply { x: 1.0, y: 2.0 });
        let echoed = deserialize(&serialize(&reply).unwrap()).unwrap();
        assert_eq!(echoed.reply_data, Some(opaque));
    }

    #[test]
    fn non_string_field_names_are_rejected() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(
            &mut bytes,
            &Value::Map(vec![
                (Value::from("type"), Value::from("getInfoRequest")),
                (Value::from(9), Value::from(true)),
            ]),
        )
        .unwrap();
        assert!(matches!(deserialize(&bytes), Err(CodecError::BadKey(_))));
    }
}
