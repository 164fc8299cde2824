// Core ID and enumeration types for the race protocol.
//
// `ConnectionId` is relay-assigned (a compact u32, one per TCP connection)
// and doubles as the player id for as long as the connection lives.
// `LobbyId` is a random UUID so lobby ids cannot be guessed from the order
// lobbies were created in.
//
// `Track`, `Difficulty` and `VehicleClass` are the fixed menus the client
// offers. They serialize as lowercase strings ("city", "medium", ...), which
// is also how leaderboard keys and profile best-lap keys spell them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relay-assigned connection ID. Also the player's id inside a lobby.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Unique lobby identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LobbyId(pub Uuid);

impl LobbyId {
    /// Generate a fresh random lobby id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    City,
    Mountain,
    Desert,
}

impl Track {
    pub fn as_str(self) -> &'static str {
        match self {
            Track::City => "city",
            Track::Mountain => "mountain",
            Track::Desert => "desert",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
    Insane,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
            Difficulty::Insane => "insane",
        }
    }
}

/// Vehicle class a player races with. New players get `Balanced`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Speedster,
    #[default]
    Balanced,
    Heavy,
}

/// Key under which per-board records are filed: `"<track>-<difficulty>"`.
pub fn board_key(track: Track, difficulty: Difficulty) -> String {
    format!("{}-{}", track.as_str(), difficulty.as_str())
}
