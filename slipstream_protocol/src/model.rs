// Shared data model carried inside protocol messages.
//
// - `CarState`: the opaque per-car snapshot clients send every physics tick.
//   The relay stores and forwards it but never interprets it beyond
//   resetting it to `CarState::spawn()` at race start.
// - `Player`, `LobbyInfo`, `RaceSnapshot`: authoritative snapshots the relay
//   sends whenever roster, readiness or race state changes. Clients replace
//   their local copy wholesale instead of diffing.
// - `LapRecord`, `LeaderboardEntry`, `PlayerProfile`, `ProfilePatch`: the
//   records store vocabulary (leaderboards and player profiles).
//
// Times are integer milliseconds throughout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConnectionId, Difficulty, LobbyId, Track, VehicleClass};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

/// Full physics snapshot of one car. Each update replaces the previous one,
/// so dropped or reordered updates are harmless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarState {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    /// 0 (pristine) to 100 (wrecked).
    pub damage: f64,
    pub current_lap: u32,
    pub last_checkpoint: u32,
    pub speed: f64,
}

impl CarState {
    /// Height above the track origin at which cars spawn.
    pub const SPAWN_HEIGHT: f64 = 1.0;

    /// Canonical state every car is reset to when a race starts.
    pub fn spawn() -> Self {
        Self {
            position: Vec3 {
                x: 0.0,
                y: Self::SPAWN_HEIGHT,
                z: 0.0,
            },
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            damage: 0.0,
            current_lap: 0,
            last_checkpoint: 0,
            speed: 0.0,
        }
    }
}

impl Default for CarState {
    fn default() -> Self {
        Self::spawn()
    }
}

/// A player inside a lobby.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: ConnectionId,
    pub name: String,
    pub vehicle: VehicleClass,
    pub car_state: CarState,
    /// `#RRGGBB`.
    pub color: String,
    pub is_ready: bool,
    /// 1-based race position. Join order until a race assigns real ranks.
    pub position: u32,
    pub lap_times: Vec<u64>,
    pub total_time: u64,
    pub finished: bool,
}

/// Snapshot of a lobby as clients see it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LobbyInfo {
    pub id: LobbyId,
    pub name: String,
    pub host_id: ConnectionId,
    /// Join order.
    pub players: Vec<Player>,
    pub max_players: u32,
    pub track: Track,
    pub difficulty: Difficulty,
    pub is_started: bool,
    pub is_public: bool,
}

/// Snapshot of a race in progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceSnapshot {
    pub lobby_id: LobbyId,
    /// Unix time in milliseconds.
    pub start_time: u64,
    pub is_active: bool,
    /// One entry per participant, in roster order.
    pub player_states: Vec<Player>,
    pub race_time: u64,
}

/// A lap record as submitted by a client. The relay stamps it with an id and
/// timestamp to produce a `LeaderboardEntry`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub player_name: String,
    pub track: Track,
    pub difficulty: Difficulty,
    pub lap_time: u64,
    pub total_time: u64,
    pub vehicle: VehicleClass,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub player_name: String,
    pub track: Track,
    pub difficulty: Difficulty,
    pub lap_time: u64,
    pub total_time: u64,
    pub vehicle: VehicleClass,
    /// Unix time in milliseconds.
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: String,
    pub name: String,
    pub games_played: u32,
    pub wins: u32,
    pub total_race_time: u64,
    /// Keyed by `board_key(track, difficulty)`.
    pub best_lap_times: BTreeMap<String, u64>,
    pub unlocked_tracks: Vec<Track>,
    pub level: u32,
    pub experience: u64,
}

impl PlayerProfile {
    /// Fresh profile with default progression. The name defaults to
    /// `Player <first four characters of the id>`.
    pub fn new(id: &str) -> Self {
        let short: String = id.chars().take(4).collect();
        Self {
            id: id.to_owned(),
            name: format!("Player {short}"),
            games_played: 0,
            wins: 0,
            total_race_time: 0,
            best_lap_times: BTreeMap::new(),
            unlocked_tracks: Vec::new(),
            level: 1,
            experience: 0,
        }
    }

    /// Overwrite every field the patch sets. The id is never patched.
    pub fn apply(&mut self, patch: ProfilePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(games_played) = patch.games_played {
            self.games_played = games_played;
        }
        if let Some(wins) = patch.wins {
            self.wins = wins;
        }
        if let Some(total_race_time) = patch.total_race_time {
            self.total_race_time = total_race_time;
        }
        if let Some(best_lap_times) = patch.best_lap_times {
            self.best_lap_times = best_lap_times;
        }
        if let Some(unlocked_tracks) = patch.unlocked_tracks {
            self.unlocked_tracks = unlocked_tracks;
        }
        if let Some(level) = patch.level {
            self.level = level;
        }
        if let Some(experience) = patch.experience {
            self.experience = experience;
        }
    }
}

/// Partial profile update. Unset fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub games_played: Option<u32>,
    pub wins: Option<u32>,
    pub total_race_time: Option<u64>,
    pub best_lap_times: Option<BTreeMap<String, u64>>,
    pub unlocked_tracks: Option<Vec<Track>>,
    pub level: Option<u32>,
    pub experience: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_state_is_at_rest() {
        let spawn = CarState::spawn();
        assert_eq!(spawn.velocity, Vec3::ZERO);
        assert_eq!(spawn.angular_velocity, Vec3::ZERO);
        assert_eq!(spawn.rotation, Quat::IDENTITY);
        assert_eq!(spawn.damage, 0.0);
        assert_eq!(spawn.current_lap, 0);
        assert_eq!(spawn.last_checkpoint, 0);
        assert_eq!(spawn.position.y, CarState::SPAWN_HEIGHT);
    }

    #[test]
    fn new_profile_defaults() {
        let profile = PlayerProfile::new("abcdef");
        assert_eq!(profile.name, "Player abcd");
        assert_eq!(profile.level, 1);
        assert_eq!(profile.games_played, 0);
        assert!(profile.best_lap_times.is_empty());
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut profile = PlayerProfile::new("racer-1");
        profile.wins = 3;
        profile.apply(ProfilePatch {
            name: Some("Ayrton".into()),
            level: Some(4),
            ..ProfilePatch::default()
        });
        assert_eq!(profile.name, "Ayrton");
        assert_eq!(profile.level, 4);
        assert_eq!(profile.wins, 3);
        assert_eq!(profile.id, "racer-1");
    }

    #[test]
    fn patch_accepts_sparse_json() {
        let patch: ProfilePatch = serde_json::from_str(r#"{"wins":7}"#).unwrap();
        assert_eq!(patch.wins, Some(7));
        assert_eq!(patch.name, None);
    }
}
