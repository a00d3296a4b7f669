use serde::{Deserialize, Serialize};

/// One of the four cardinal directions. Serialized as a single letter on the
/// wire (`"N"`, `"E"`, `"S"`, `"W"`), matching player pose and edge addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dir {
    N,
    E,
    S,
    W,
}

impl Dir {
    pub const ALL: [Dir; 4] = [Dir::N, Dir::E, Dir::S, Dir::W];

    pub fn opposite(self) -> Dir {
        match self {
            Dir::N => Dir::S,
            Dir::E => Dir::W,
            Dir::S => Dir::N,
            Dir::W => Dir::E,
        }
    }

    /// Grid offset. North is -y, south is +y (the south edge of a cell borders
    /// the cell at y+1).
    pub fn delta(self) -> (i64, i64) {
        match self {
            Dir::N => (0, -1),
            Dir::E => (1, 0),
            Dir::S => (0, 1),
            Dir::W => (-1, 0),
        }
    }

    /// Stable small integer for seed mixing.
    pub fn code(self) -> i32 {
        match self {
            Dir::N => 0,
            Dir::E => 1,
            Dir::S => 2,
            Dir::W => 3,
        }
    }

    /// The two directions perpendicular to this one, in a fixed order.
    pub fn lateral(self) -> [Dir; 2] {
        match self {
            Dir::N | Dir::S => [Dir::W, Dir::E],
            Dir::E | Dir::W => [Dir::N, Dir::S],
        }
    }

    pub fn step(self, x: i64, y: i64) -> (i64, i64) {
        let (dx, dy) = self.delta();
        (x + dx, y + dy)
    }

    pub fn parse(token: &str) -> Option<Dir> {
        match token {
            "N" => Some(Dir::N),
            "E" => Some(Dir::E),
            "S" => Some(Dir::S),
            "W" => Some(Dir::W),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dir::N => "N",
            Dir::E => "E",
            Dir::S => "S",
            Dir::W => "W",
        }
    }
}

/// What sits between two adjacent cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Wall,
    Open,
    DoorLocked,
    DoorUnlocked,
    LeverSecret,
}

impl EdgeKind {
    /// Can a character walk through this edge?
    pub fn traversable(self) -> bool {
        matches!(
            self,
            EdgeKind::Open | EdgeKind::DoorUnlocked | EdgeKind::LeverSecret
        )
    }

    /// Can sight pass through this edge? Doors of any kind block vision even
    /// when they permit traversal.
    pub fn see_through(self) -> bool {
        matches!(self, EdgeKind::Open | EdgeKind::LeverSecret)
    }
}

/// What a cell is, when the overlay says anything about it at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    HubRoom,
    Room,
    Corridor,
}
