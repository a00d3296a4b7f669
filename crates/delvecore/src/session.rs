//! Per-connection state machine and the action dispatcher.
//!
//! A connection is unauthenticated until a valid `auth`, then joined to its
//! active character. Every inbound envelope is checked for sequence
//! monotonicity, validated against the schema, gated on auth, and only then
//! handled. Handlers are synchronous with respect to the connection; the
//! daemon serializes dispatches through one lock, which is also what makes
//! frontier expansion transactional.

use delveproto::codes;
use delveproto::kinds::Dir;
use delveproto::msg::{self, ClientMsg, MovePayload, RawEnvelope, ServerMsg, TurnPayload};

use crate::oracle::WorldModel;
use crate::snapshot;
use crate::store::{CharacterStore, Pose, SessionStore, WorldRecord};

/// Cooldown lengths are configuration inputs, not constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub move_cooldown_ms: u64,
    pub turn_cooldown_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            move_cooldown_ms: 500,
            turn_cooldown_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldowns {
    pub move_ready_at_ms: u64,
    pub turn_ready_at_ms: u64,
}

#[derive(Debug, Clone)]
struct PlayerState {
    user_id: String,
    character_id: String,
    world_id: String,
    pose: Pose,
    hp: i32,
}

/// Everything the server remembers about one connection.
#[derive(Debug)]
pub struct ConnState {
    last_seq: i64,
    cooldowns: Cooldowns,
    player: Option<PlayerState>,
}

impl ConnState {
    pub fn new() -> Self {
        Self {
            last_seq: -1,
            cooldowns: Cooldowns::default(),
            player: None,
        }
    }

    pub fn authed(&self) -> bool {
        self.player.is_some()
    }

    pub fn last_seq(&self) -> i64 {
        self.last_seq
    }

    pub fn cooldowns(&self) -> Cooldowns {
        self.cooldowns
    }

    pub fn pose(&self) -> Option<Pose> {
        self.player.as_ref().map(|p| p.pose)
    }

    pub fn character_id(&self) -> Option<&str> {
        self.player.as_ref().map(|p| p.character_id.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.player.as_ref().map(|p| p.user_id.as_str())
    }
}

impl Default for ConnState {
    fn default() -> Self {
        Self::new()
    }
}

enum MoveIntent {
    Abs(Dir),
    Forward,
    Back,
}

fn parse_move_dir(token: &str) -> Option<MoveIntent> {
    match token {
        "F" => Some(MoveIntent::Forward),
        "B" => Some(MoveIntent::Back),
        _ => Dir::parse(token).map(MoveIntent::Abs),
    }
}

fn refused(seq: i64, reason: &str) -> ServerMsg {
    ServerMsg::ActionResult {
        ok: false,
        reason: Some(reason.to_string()),
        seq: Some(seq),
    }
}

fn applied(seq: i64) -> ServerMsg {
    ServerMsg::ActionResult {
        ok: true,
        reason: None,
        seq: Some(seq),
    }
}

fn auth_err(reason: &str) -> ServerMsg {
    ServerMsg::AuthErr {
        reason: reason.to_string(),
    }
}

pub struct Engine {
    world: WorldRecord,
    cfg: EngineConfig,
    model: WorldModel,
    sessions: Box<dyn SessionStore>,
    characters: Box<dyn CharacterStore>,
}

impl Engine {
    pub fn new(
        world: WorldRecord,
        cfg: EngineConfig,
        model: WorldModel,
        sessions: Box<dyn SessionStore>,
        characters: Box<dyn CharacterStore>,
    ) -> Self {
        Self {
            world,
            cfg,
            model,
            sessions,
            characters,
        }
    }

    pub fn world(&self) -> &WorldRecord {
        &self.world
    }

    pub fn model_mut(&mut self) -> &mut WorldModel {
        &mut self.model
    }

    /// Apply one inbound envelope and produce the replies to send, in order.
    pub fn dispatch(
        &mut self,
        conn: &mut ConnState,
        now_ms: u64,
        env: &RawEnvelope,
    ) -> Vec<ServerMsg> {
        if env.seq <= conn.last_seq {
            return vec![ServerMsg::Error {
                code: codes::BAD_SEQ.to_string(),
                message: format!("seq {} does not advance past {}", env.seq, conn.last_seq),
                seq: Some(env.seq),
            }];
        }
        conn.last_seq = env.seq;

        let parsed = match msg::parse_client(env) {
            Ok(m) => m,
            Err(e) => {
                return vec![ServerMsg::Error {
                    code: codes::BAD_SCHEMA.to_string(),
                    message: e.to_string(),
                    seq: Some(env.seq),
                }]
            }
        };

        if !conn.authed() && !matches!(parsed, ClientMsg::Auth(_)) {
            return vec![auth_err("unauthenticated")];
        }

        match self.handle(conn, now_ms, env.seq, parsed) {
            Ok(out) => out,
            Err(_) => vec![ServerMsg::Error {
                code: codes::STORAGE.to_string(),
                message: "internal storage error".to_string(),
                seq: Some(env.seq),
            }],
        }
    }

    fn handle(
        &mut self,
        conn: &mut ConnState,
        now_ms: u64,
        seq: i64,
        msg: ClientMsg,
    ) -> anyhow::Result<Vec<ServerMsg>> {
        match msg {
            ClientMsg::Auth(p) => self.handle_auth(conn, now_ms, p.session_token),
            ClientMsg::Turn(p) => self.handle_turn(conn, now_ms, seq, p),
            ClientMsg::Move(p) => self.handle_move(conn, now_ms, seq, p),
            ClientMsg::JoinWorld(_) | ClientMsg::Interact(_) | ClientMsg::UseEgg(_) => {
                Ok(vec![refused(seq, "not_implemented")])
            }
        }
    }

    fn handle_auth(
        &mut self,
        conn: &mut ConnState,
        now_ms: u64,
        token: String,
    ) -> anyhow::Result<Vec<ServerMsg>> {
        if conn.authed() {
            return Ok(vec![auth_err("already authenticated")]);
        }
        let Some(session) = self.sessions.load_session(&token, now_ms) else {
            return Ok(vec![auth_err("invalid session")]);
        };
        let Some(record) = self.characters.load_active(&session.user_id) else {
            return Ok(vec![auth_err("no active character")]);
        };

        conn.cooldowns = Cooldowns {
            move_ready_at_ms: now_ms,
            turn_ready_at_ms: now_ms,
        };
        conn.player = Some(PlayerState {
            user_id: session.user_id.clone(),
            character_id: record.character_id.clone(),
            world_id: record.world_id.clone(),
            pose: record.pose,
            hp: record.hp,
        });

        let snap = snapshot::build_world_state(
            &mut self.model,
            &record.pose,
            record.hp,
            &conn.cooldowns,
            now_ms,
        )?;
        Ok(vec![
            ServerMsg::AuthOk {
                user_id: session.user_id,
                character_id: record.character_id,
                world_id: record.world_id,
            },
            ServerMsg::WorldState(snap),
        ])
    }

    fn handle_turn(
        &mut self,
        conn: &mut ConnState,
        now_ms: u64,
        seq: i64,
        p: TurnPayload,
    ) -> anyhow::Result<Vec<ServerMsg>> {
        let Some(face) = Dir::parse(&p.face) else {
            return Ok(vec![refused(seq, "bad_dir")]);
        };
        if now_ms < conn.cooldowns.turn_ready_at_ms {
            return Ok(vec![refused(seq, "turn_cooldown")]);
        }
        let Some(player) = conn.player.as_mut() else {
            return Ok(vec![auth_err("unauthenticated")]);
        };

        player.pose.face = face;
        conn.cooldowns.turn_ready_at_ms = now_ms + self.cfg.turn_cooldown_ms;
        self.characters
            .save_position(&player.character_id, &player.world_id, &player.pose)?;

        let snap = snapshot::build_world_state(
            &mut self.model,
            &player.pose,
            player.hp,
            &conn.cooldowns,
            now_ms,
        )?;
        Ok(vec![applied(seq), ServerMsg::WorldState(snap)])
    }

    fn handle_move(
        &mut self,
        conn: &mut ConnState,
        now_ms: u64,
        seq: i64,
        p: MovePayload,
    ) -> anyhow::Result<Vec<ServerMsg>> {
        let Some(intent) = parse_move_dir(&p.dir) else {
            return Ok(vec![refused(seq, "bad_dir")]);
        };
        if now_ms < conn.cooldowns.move_ready_at_ms {
            return Ok(vec![refused(seq, "move_cooldown")]);
        }
        let Some(player) = conn.player.as_mut() else {
            return Ok(vec![auth_err("unauthenticated")]);
        };

        // A cardinal input also turns; F and B keep the current facing.
        let (abs, new_face) = match intent {
            MoveIntent::Abs(d) => (d, d),
            MoveIntent::Forward => (player.pose.face, player.pose.face),
            MoveIntent::Back => (player.pose.face.opposite(), player.pose.face),
        };

        if !self.model.can_traverse(
            player.pose.level,
            player.pose.x,
            player.pose.y,
            abs,
            now_ms,
        )? {
            return Ok(vec![refused(seq, "blocked")]);
        }

        player.pose.face = new_face;
        (player.pose.x, player.pose.y) = abs.step(player.pose.x, player.pose.y);
        self.model
            .mark_discovered(player.pose.level, player.pose.x, player.pose.y, now_ms)?;
        conn.cooldowns.move_ready_at_ms = now_ms + self.cfg.move_cooldown_ms;
        self.characters
            .save_position(&player.character_id, &player.world_id, &player.pose)?;

        let snap = snapshot::build_world_state(
            &mut self.model,
            &player.pose,
            player.hp,
            &conn.cooldowns,
            now_ms,
        )?;
        Ok(vec![applied(seq), ServerMsg::WorldState(snap)])
    }
}
