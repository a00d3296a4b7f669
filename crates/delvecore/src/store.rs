//! Storage seams the kernel consumes.
//!
//! Identity and durable character rows live outside this process; the
//! dispatcher only ever sees these narrow traits. Every operation is a single
//! atomic row-level action; the kernel never assumes cross-operation
//! transactions. `MemDirectory` is the in-process implementation used by the
//! daemon and by tests.

use std::collections::HashMap;

use delveproto::kinds::Dir;
use serde::{Deserialize, Serialize};

/// A character's position and facing, mirrored into its own record for cheap
/// updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pose {
    pub level: i32,
    pub x: i64,
    pub y: i64,
    pub face: Dir,
}

/// The persistent world row. One seed per world, never mutated after creation.
#[derive(Debug, Clone)]
pub struct WorldRecord {
    pub world_id: String,
    pub seed: u32,
    pub generator_version: String,
    pub created_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct CharacterRecord {
    pub character_id: String,
    pub world_id: String,
    pub name: String,
    pub hp: i32,
    pub pose: Pose,
}

pub trait SessionStore: Send {
    /// Resolve an opaque token to its owning user, enforcing expiry against
    /// the supplied clock and refreshing last-seen.
    fn load_session(&mut self, token: &str, now_ms: u64) -> Option<SessionRecord>;
}

pub trait CharacterStore: Send {
    fn load_active(&mut self, user_id: &str) -> Option<CharacterRecord>;

    /// Upsert the position record for a character.
    fn save_position(
        &mut self,
        character_id: &str,
        world_id: &str,
        pose: &Pose,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct SessionRow {
    user_id: String,
    expires_ms: u64,
    last_seen_ms: u64,
}

/// In-memory sessions + characters, keyed the way the external stores are.
#[derive(Debug, Default)]
pub struct MemDirectory {
    sessions: HashMap<String, SessionRow>,
    characters: HashMap<String, CharacterRecord>,
    owner_of: HashMap<String, String>,
}

impl MemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_session(&mut self, token: &str, user_id: &str, now_ms: u64, ttl_ms: u64) {
        self.sessions.insert(
            token.to_string(),
            SessionRow {
                user_id: user_id.to_string(),
                expires_ms: now_ms.saturating_add(ttl_ms),
                last_seen_ms: now_ms,
            },
        );
    }

    pub fn insert_character(&mut self, user_id: &str, record: CharacterRecord) {
        self.owner_of
            .insert(record.character_id.clone(), user_id.to_string());
        self.characters.insert(user_id.to_string(), record);
    }
}

impl SessionStore for MemDirectory {
    fn load_session(&mut self, token: &str, now_ms: u64) -> Option<SessionRecord> {
        let row = self.sessions.get_mut(token)?;
        if now_ms >= row.expires_ms {
            return None;
        }
        row.last_seen_ms = now_ms;
        Some(SessionRecord {
            user_id: row.user_id.clone(),
        })
    }
}

impl CharacterStore for MemDirectory {
    fn load_active(&mut self, user_id: &str) -> Option<CharacterRecord> {
        self.characters.get(user_id).cloned()
    }

    fn save_position(
        &mut self,
        character_id: &str,
        world_id: &str,
        pose: &Pose,
    ) -> anyhow::Result<()> {
        let user_id = self
            .owner_of
            .get(character_id)
            .ok_or_else(|| anyhow::anyhow!("unknown character {character_id}"))?;
        let row = self
            .characters
            .get_mut(user_id)
            .ok_or_else(|| anyhow::anyhow!("character row missing for {character_id}"))?;
        row.world_id = world_id.to_string();
        row.pose = *pose;
        Ok(())
    }
}
