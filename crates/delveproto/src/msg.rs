use serde::{Deserialize, Serialize};

use crate::kinds::{Dir, EdgeKind};

/// The outer client envelope. Payload contents are validated per-type in a
/// second stage so the dispatcher can distinguish envelope problems from
/// payload problems without trusting either.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnvelope {
    pub seq: i64,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthPayload {
    pub session_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovePayload {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurnPayload {
    pub face: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinWorldPayload {
    pub world_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractPayload {
    pub action: String,
    #[serde(default)]
    pub target: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UseEggPayload {}

/// A fully validated client message.
#[derive(Debug, Clone)]
pub enum ClientMsg {
    Auth(AuthPayload),
    Move(MovePayload),
    Turn(TurnPayload),
    JoinWorld(JoinWorldPayload),
    Interact(InteractPayload),
    UseEgg(UseEggPayload),
}

#[derive(Debug, Clone)]
pub enum SchemaError {
    UnknownType(String),
    BadPayload { ty: &'static str, detail: String },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::UnknownType(t) => write!(f, "unknown message type: {t}"),
            SchemaError::BadPayload { ty, detail } => {
                write!(f, "bad {ty} payload: {detail}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

fn payload<T: serde::de::DeserializeOwned>(
    ty: &'static str,
    v: &serde_json::Value,
) -> Result<T, SchemaError> {
    // An omitted payload reads as an empty object.
    let v = if v.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        v.clone()
    };
    serde_json::from_value(v).map_err(|e| SchemaError::BadPayload {
        ty,
        detail: e.to_string(),
    })
}

/// Second-stage validation: envelope `type` to a typed payload.
pub fn parse_client(env: &RawEnvelope) -> Result<ClientMsg, SchemaError> {
    match env.ty.as_str() {
        "auth" => Ok(ClientMsg::Auth(payload("auth", &env.payload)?)),
        "move" => Ok(ClientMsg::Move(payload("move", &env.payload)?)),
        "turn" => Ok(ClientMsg::Turn(payload("turn", &env.payload)?)),
        "join_world" => Ok(ClientMsg::JoinWorld(payload("join_world", &env.payload)?)),
        "interact" => Ok(ClientMsg::Interact(payload("interact", &env.payload)?)),
        "use_egg" => Ok(ClientMsg::UseEgg(payload("use_egg", &env.payload)?)),
        other => Err(SchemaError::UnknownType(other.to_string())),
    }
}

/// The four edges of one cell as the client sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeView {
    #[serde(rename = "N")]
    pub n: EdgeKind,
    #[serde(rename = "E")]
    pub e: EdgeKind,
    #[serde(rename = "S")]
    pub s: EdgeKind,
    #[serde(rename = "W")]
    pub w: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView {
    pub x: i64,
    pub y: i64,
    pub edges: EdgeView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YouView {
    pub level: i32,
    pub x: i64,
    pub y: i64,
    pub face: Dir,
    pub hp: i32,
    pub status: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubView {
    pub level: i32,
    pub x: i64,
    pub y: i64,
    #[serde(rename = "distFeet")]
    pub dist_feet: i64,
    pub direction: Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownView {
    pub move_ready_at_ms: u64,
    pub turn_ready_at_ms: u64,
}

/// One world snapshot: everything a client may render at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    pub now: u64,
    pub you: YouView,
    pub hub: HubView,
    pub cooldowns: CooldownView,
    pub world_hash: String,
    pub visible_cells: Vec<CellView>,
    pub minimap_cells: Vec<CellView>,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    AuthOk {
        user_id: String,
        character_id: String,
        world_id: String,
    },
    AuthErr {
        reason: String,
    },
    WorldState(WorldState),
    ActionResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<i64>,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<i64>,
    },
    Event {
        kind: String,
        data: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_with_defaulted_payload() {
        let env: RawEnvelope = serde_json::from_str(r#"{"seq": 3, "type": "use_egg"}"#).unwrap();
        assert_eq!(env.seq, 3);
        assert_eq!(env.ty, "use_egg");
        assert!(parse_client(&env).is_ok());
    }

    #[test]
    fn unknown_envelope_field_is_rejected() {
        let r = serde_json::from_str::<RawEnvelope>(r#"{"seq": 1, "type": "auth", "extra": 1}"#);
        assert!(r.is_err());
    }

    #[test]
    fn unknown_type_is_a_schema_error() {
        let env: RawEnvelope =
            serde_json::from_str(r#"{"seq": 1, "type": "dance", "payload": {}}"#).unwrap();
        match parse_client(&env) {
            Err(SchemaError::UnknownType(t)) => assert_eq!(t, "dance"),
            other => panic!("expected unknown type, got {other:?}"),
        }
    }

    #[test]
    fn unknown_payload_field_is_a_schema_error() {
        let env: RawEnvelope = serde_json::from_str(
            r#"{"seq": 1, "type": "move", "payload": {"dir": "N", "speed": 2}}"#,
        )
        .unwrap();
        assert!(matches!(
            parse_client(&env),
            Err(SchemaError::BadPayload { ty: "move", .. })
        ));
    }

    #[test]
    fn server_messages_tag_type_and_payload() {
        let msg = ServerMsg::ActionResult {
            ok: false,
            reason: Some("blocked".to_string()),
            seq: Some(9),
        };
        let s = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            s,
            r#"{"type":"action_result","payload":{"ok":false,"reason":"blocked","seq":9}}"#
        );
    }

    #[test]
    fn world_state_round_trips() {
        let ws = WorldState {
            now: 42,
            you: YouView {
                level: 1,
                x: 0,
                y: 0,
                face: Dir::N,
                hp: 20,
                status: vec![],
            },
            hub: HubView {
                level: 1,
                x: 0,
                y: 0,
                dist_feet: 0,
                direction: Dir::E,
            },
            cooldowns: CooldownView {
                move_ready_at_ms: 0,
                turn_ready_at_ms: 0,
            },
            world_hash: "00000000".to_string(),
            visible_cells: vec![],
            minimap_cells: vec![],
        };
        let s = serde_json::to_string(&ServerMsg::WorldState(ws.clone())).unwrap();
        assert!(s.contains("\"distFeet\":0"));
        let back: ServerMsg = serde_json::from_str(&s).unwrap();
        match back {
            ServerMsg::WorldState(w) => assert_eq!(w, ws),
            other => panic!("expected world_state, got {other:?}"),
        }
    }
}
