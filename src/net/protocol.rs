//! Datagram protocol message definitions
//! These are the wire types exchanged between robots, spectators and the server

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::game::world::{Explosion, Robot, Shell};

/// Largest coordinate or distance a message may carry
pub const MAX_DISTANCE: f64 = 32767.0;
/// Shortest distance a shell can be fired
pub const MIN_FIRE_DISTANCE: f64 = 10.0;
/// Longest robot name or class name
pub const MAX_NAME_LEN: usize = 16;

/// Every message the protocol knows, tagged by its `type` field.
///
/// Unknown types and unknown fields are rejected at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum Message {
    /// Register the sender as a robot
    JoinRequest {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class: Option<String>,
    },
    JoinReply {
        conf: Box<SimConfig>,
    },

    GetInfoRequest {},
    #[serde(rename_all = "camelCase")]
    GetInfoReply {
        game_number: u32,
        game_step: u32,
        health: f64,
        points: i64,
    },

    GetLocationRequest {},
    GetLocationReply {
        x: f64,
        y: f64,
    },

    GetSpeedRequest {},
    #[serde(rename_all = "camelCase")]
    GetSpeedReply {
        requested_speed: f64,
        current_speed: f64,
    },

    #[serde(rename_all = "camelCase")]
    SetSpeedRequest {
        requested_speed: f64,
    },
    SetSpeedReply {},

    GetDirectionRequest {},
    #[serde(rename_all = "camelCase")]
    GetDirectionReply {
        requested_direction: f64,
        current_direction: f64,
    },

    #[serde(rename_all = "camelCase")]
    SetDirectionRequest {
        requested_direction: f64,
    },
    SetDirectionReply {},

    GetCanonRequest {},
    #[serde(rename_all = "camelCase")]
    GetCanonReply {
        shell_in_progress: bool,
    },

    FireCanonRequest {
        direction: f64,
        distance: f64,
    },
    FireCanonReply {},

    #[serde(rename_all = "camelCase")]
    ScanRequest {
        start_radians: f64,
        end_radians: f64,
    },
    ScanReply {
        distance: f64,
    },

    /// Register the sender as a spectator
    AddViewerRequest {},
    AddViewerReply {
        conf: Box<SimConfig>,
    },

    /// Full world snapshot broadcast to spectators every step
    ViewData {
        state: ViewState,
        bots: BTreeMap<String, Robot>,
        shells: BTreeMap<String, Shell>,
        explosions: BTreeMap<String, Explosion>,
    },

    /// Spectator heartbeat, never answered
    ViewKeepAlive {},

    /// Rejection of a request
    #[serde(rename = "Error")]
    Error {
        result: String,
    },
}

/// Counters sent to spectators with every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub game_number: u32,
    pub game_step: u32,
    pub server_steps: u64,
    pub drop_count: u64,
    pub step_max: u32,
    pub games_to_play: u32,
}

/// Fieldless mirror of [`Message`], used as a lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    JoinRequest,
    JoinReply,
    GetInfoRequest,
    GetInfoReply,
    GetLocationRequest,
    GetLocationReply,
    GetSpeedRequest,
    GetSpeedReply,
    SetSpeedRequest,
    SetSpeedReply,
    GetDirectionRequest,
    GetDirectionReply,
    SetDirectionRequest,
    SetDirectionReply,
    GetCanonRequest,
    GetCanonReply,
    FireCanonRequest,
    FireCanonReply,
    ScanRequest,
    ScanReply,
    AddViewerRequest,
    AddViewerReply,
    ViewData,
    ViewKeepAlive,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 25] = [
        MessageKind::JoinRequest,
        MessageKind::JoinReply,
        MessageKind::GetInfoRequest,
        MessageKind::GetInfoReply,
        MessageKind::GetLocationRequest,
        MessageKind::GetLocationReply,
        MessageKind::GetSpeedRequest,
        MessageKind::GetSpeedReply,
        MessageKind::SetSpeedRequest,
        MessageKind::SetSpeedReply,
        MessageKind::GetDirectionRequest,
        MessageKind::GetDirectionReply,
        MessageKind::SetDirectionRequest,
        MessageKind::SetDirectionReply,
        MessageKind::GetCanonRequest,
        MessageKind::GetCanonReply,
        MessageKind::FireCanonRequest,
        MessageKind::FireCanonReply,
        MessageKind::ScanRequest,
        MessageKind::ScanReply,
        MessageKind::AddViewerRequest,
        MessageKind::AddViewerReply,
        MessageKind::ViewData,
        MessageKind::ViewKeepAlive,
        MessageKind::Error,
    ];

    /// Wire name carried in the `type` field
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::JoinRequest => "joinRequest",
            MessageKind::JoinReply => "joinReply",
            MessageKind::GetInfoRequest => "getInfoRequest",
            MessageKind::GetInfoReply => "getInfoReply",
            MessageKind::GetLocationRequest => "getLocationRequest",
            MessageKind::GetLocationReply => "getLocationReply",
            MessageKind::GetSpeedRequest => "getSpeedRequest",
            MessageKind::GetSpeedReply => "getSpeedReply",
            MessageKind::SetSpeedRequest => "setSpeedRequest",
            MessageKind::SetSpeedReply => "setSpeedReply",
            MessageKind::GetDirectionRequest => "getDirectionRequest",
            MessageKind::GetDirectionReply => "getDirectionReply",
            MessageKind::SetDirectionRequest => "setDirectionRequest",
            MessageKind::SetDirectionReply => "setDirectionReply",
            MessageKind::GetCanonRequest => "getCanonRequest",
            MessageKind::GetCanonReply => "getCanonReply",
            MessageKind::FireCanonRequest => "fireCanonRequest",
            MessageKind::FireCanonReply => "fireCanonReply",
            MessageKind::ScanRequest => "scanRequest",
            MessageKind::ScanReply => "scanReply",
            MessageKind::AddViewerRequest => "addViewerRequest",
            MessageKind::AddViewerReply => "addViewerReply",
            MessageKind::ViewData => "viewData",
            MessageKind::ViewKeepAlive => "viewKeepAlive",
            MessageKind::Error => "Error",
        }
    }

    pub fn from_name(name: &str) -> Option<MessageKind> {
        MessageKind::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Reply kind the server answers this request with
    pub fn reply_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::JoinRequest => Some(MessageKind::JoinReply),
            MessageKind::GetInfoRequest => Some(MessageKind::GetInfoReply),
            MessageKind::GetLocationRequest => Some(MessageKind::GetLocationReply),
            MessageKind::GetSpeedRequest => Some(MessageKind::GetSpeedReply),
            MessageKind::SetSpeedRequest => Some(MessageKind::SetSpeedReply),
            MessageKind::GetDirectionRequest => Some(MessageKind::GetDirectionReply),
            MessageKind::SetDirectionRequest => Some(MessageKind::SetDirectionReply),
            MessageKind::GetCanonRequest => Some(MessageKind::GetCanonReply),
            MessageKind::FireCanonRequest => Some(MessageKind::FireCanonReply),
            MessageKind::ScanRequest => Some(MessageKind::ScanReply),
            MessageKind::AddViewerRequest => Some(MessageKind::AddViewerReply),
            _ => None,
        }
    }

    /// True for messages only the server may send
    pub fn is_server_message(self) -> bool {
        matches!(
            self,
            MessageKind::JoinReply
                | MessageKind::GetInfoReply
                | MessageKind::GetLocationReply
                | MessageKind::GetSpeedReply
                | MessageKind::SetSpeedReply
                | MessageKind::GetDirectionReply
                | MessageKind::SetDirectionReply
                | MessageKind::GetCanonReply
                | MessageKind::FireCanonReply
                | MessageKind::ScanReply
                | MessageKind::AddViewerReply
                | MessageKind::ViewData
                | MessageKind::Error
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A field outside its allowed range
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind}.{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        kind: MessageKind,
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{kind}.{field} has length {len}, expected {min}..={max}")]
    Length {
        kind: MessageKind,
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::JoinRequest { .. } => MessageKind::JoinRequest,
            Message::JoinReply { .. } => MessageKind::JoinReply,
            Message::GetInfoRequest {} => MessageKind::GetInfoRequest,
            Message::GetInfoReply { .. } => MessageKind::GetInfoReply,
            Message::GetLocationRequest {} => MessageKind::GetLocationRequest,
            Message::GetLocationReply { .. } => MessageKind::GetLocationReply,
            Message::GetSpeedRequest {} => MessageKind::GetSpeedRequest,
            Message::GetSpeedReply { .. } => MessageKind::GetSpeedReply,
            Message::SetSpeedRequest { .. } => MessageKind::SetSpeedRequest,
            Message::SetSpeedReply {} => MessageKind::SetSpeedReply,
            Message::GetDirectionRequest {} => MessageKind::GetDirectionRequest,
            Message::GetDirectionReply { .. } => MessageKind::GetDirectionReply,
            Message::SetDirectionRequest { .. } => MessageKind::SetDirectionRequest,
            Message::SetDirectionReply {} => MessageKind::SetDirectionReply,
            Message::GetCanonRequest {} => MessageKind::GetCanonRequest,
            Message::GetCanonReply { .. } => MessageKind::GetCanonReply,
            Message::FireCanonRequest { .. } => MessageKind::FireCanonRequest,
            Message::FireCanonReply {} => MessageKind::FireCanonReply,
            Message::ScanRequest { .. } => MessageKind::ScanRequest,
            Message::ScanReply { .. } => MessageKind::ScanReply,
            Message::AddViewerRequest {} => MessageKind::AddViewerRequest,
            Message::AddViewerReply { .. } => MessageKind::AddViewerReply,
            Message::ViewData { .. } => MessageKind::ViewData,
            Message::ViewKeepAlive {} => MessageKind::ViewKeepAlive,
            Message::Error { .. } => MessageKind::Error,
        }
    }

    /// Build an error reply
    pub fn error(result: impl Into<String>) -> Self {
        Message::Error {
            result: result.into(),
        }
    }

    /// Check every numeric range and string length the message declares
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind();
        let range = |field: &'static str, value: f64, min: f64, max: f64| {
            if (min..=max).contains(&value) {
                Ok(())
            } else {
                Err(ValidationError::OutOfRange {
                    kind,
                    field,
                    value,
                    min,
                    max,
                })
            }
        };
        let length = |field: &'static str, value: &str| {
            let len = value.chars().count();
            if (1..=MAX_NAME_LEN).contains(&len) {
                Ok(())
            } else {
                Err(ValidationError::Length {
                    kind,
                    field,
                    len,
                    min: 1,
                    max: MAX_NAME_LEN,
                })
            }
        };

        match self {
            Message::JoinRequest { name, class } => {
                length("name", name)?;
                if let Some(class) = class {
                    length("class", class)?;
                }
            }
            Message::GetInfoReply { health, .. } => range("health", *health, 0.0, 100.0)?,
            Message::GetLocationReply { x, y } => {
                range("x", *x, 0.0, MAX_DISTANCE)?;
                range("y", *y, 0.0, MAX_DISTANCE)?;
            }
            Message::GetSpeedReply {
                requested_speed,
                current_speed,
            } => {
                range("requestedSpeed", *requested_speed, 0.0, 100.0)?;
                range("currentSpeed", *current_speed, 0.0, 100.0)?;
            }
            Message::SetSpeedRequest { requested_speed } => {
                range("requestedSpeed", *requested_speed, 0.0, 100.0)?
            }
            Message::GetDirectionReply {
                requested_direction,
                current_direction,
            } => {
                range("requestedDirection", *requested_direction, 0.0, TAU)?;
                range("currentDirection", *current_direction, 0.0, TAU)?;
            }
            Message::SetDirectionRequest {
                requested_direction,
            } => range("requestedDirection", *requested_direction, 0.0, TAU)?,
            Message::FireCanonRequest {
                direction,
                distance,
            } => {
                range("direction", *direction, 0.0, TAU)?;
                range("distance", *distance, MIN_FIRE_DISTANCE, MAX_DISTANCE)?;
            }
            Message::ScanRequest {
                start_radians,
                end_radians,
            } => {
                range("startRadians", *start_radians, 0.0, TAU)?;
                range("endRadians", *end_radians, 0.0, TAU)?;
            }
            Message::ScanReply { distance } => range("distance", *distance, 0.0, MAX_DISTANCE)?,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_kinds() {
        let msg = Message::SetSpeedRequest {
            requested_speed: 50.0,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "setSpeedRequest");
        assert_eq!(value["requestedSpeed"], 50.0);
        assert_eq!(MessageKind::from_name("setSpeedRequest"), Some(msg.kind()));

        let value = serde_json::to_value(Message::error("nope")).unwrap();
        assert_eq!(value["type"], "Error");
    }

    #[test]
    fn requests_pair_with_replies() {
        assert_eq!(MessageKind::ScanRequest.reply_kind(), Some(MessageKind::ScanReply));
        assert_eq!(MessageKind::ViewKeepAlive.reply_kind(), None);
        for kind in MessageKind::ALL {
            if let Some(reply) = kind.reply_kind() {
                assert!(reply.is_server_message());
                assert!(!kind.is_server_message());
            }
        }
    }

    #[test]
    fn every_kind_name_is_unique() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn empty_messages_reject_extra_fields() {
        let ok: Message = serde_json::from_value(serde_json::json!({"type": "getInfoRequest"})).unwrap();
        assert_eq!(ok, Message::GetInfoRequest {});

        let extra = serde_json::json!({"type": "getInfoRequest", "junk": 1});
        assert!(serde_json::from_value::<Message>(extra).is_err());
    }

    #[test]
    fn ranges_are_enforced() {
        assert!(Message::SetSpeedRequest { requested_speed: 100.0 }.validate().is_ok());
        assert!(Message::SetSpeedRequest { requested_speed: 101.0 }.validate().is_err());
        assert!(Message::SetSpeedRequest { requested_speed: f64::NAN }.validate().is_err());
        assert!(Message::FireCanonRequest { direction: 1.0, distance: 9.9 }.validate().is_err());
        assert!(Message::ScanRequest { start_radians: 0.0, end_radians: TAU }.validate().is_ok());
    }

    #[test]
    fn join_name_length() {
        let long = Message::JoinRequest {
            name: "x".repeat(17),
            class: None,
        };
        assert!(matches!(long.validate(), Err(ValidationError::Length { len: 17, .. })));

        let empty_class = Message::JoinRequest {
            name: "bot".into(),
            class: Some(String::new()),
        };
        assert!(empty_class.validate().is_err());
    }
}
