// In-memory leaderboards and player profiles.
//
// Boards are keyed by (track, difficulty) and kept sorted by lap time at
// insertion, so queries only slice. A new entry goes after every existing
// entry with an equal lap time, which keeps the order stable. Every
// submitted entry is retained; only queries are capped at
// `LEADERBOARD_SIZE`.
//
// Profiles are keyed by a client-chosen string id and created on first
// upsert.

use std::collections::{BTreeMap, HashMap};

use slipstream_protocol::{
    Difficulty, LapRecord, LeaderboardEntry, PlayerProfile, ProfilePatch, Track, board_key,
};
use uuid::Uuid;

use crate::error::CoordinatorError;

pub const LEADERBOARD_SIZE: usize = 10;

#[derive(Default)]
pub struct RecordStore {
    boards: HashMap<(Track, Difficulty), Vec<LeaderboardEntry>>,
    profiles: HashMap<String, PlayerProfile>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a lap record, stamping it with a fresh id and `now_ms`.
    pub fn submit(&mut self, record: LapRecord, now_ms: u64) -> LeaderboardEntry {
        let entry = LeaderboardEntry {
            id: Uuid::new_v4(),
            player_name: record.player_name,
            track: record.track,
            difficulty: record.difficulty,
            lap_time: record.lap_time,
            total_time: record.total_time,
            vehicle: record.vehicle,
            timestamp: now_ms,
        };
        let board = self
            .boards
            .entry((entry.track, entry.difficulty))
            .or_default();
        let at = board.partition_point(|e| e.lap_time <= entry.lap_time);
        board.insert(at, entry.clone());
        entry
    }

    /// Fastest entries on one board, at most `LEADERBOARD_SIZE`.
    pub fn top(&self, track: Track, difficulty: Difficulty) -> &[LeaderboardEntry] {
        self.boards
            .get(&(track, difficulty))
            .map(|board| &board[..board.len().min(LEADERBOARD_SIZE)])
            .unwrap_or(&[])
    }

    /// Top entries of every non-empty board, keyed by `board_key`.
    pub fn all_top(&self) -> BTreeMap<String, Vec<LeaderboardEntry>> {
        self.boards
            .keys()
            .map(|&(track, difficulty)| {
                (
                    board_key(track, difficulty),
                    self.top(track, difficulty).to_vec(),
                )
            })
            .collect()
    }

    pub fn profile(&self, id: &str) -> Result<&PlayerProfile, CoordinatorError> {
        self.profiles
            .get(id)
            .ok_or(CoordinatorError::PROFILE_NOT_FOUND)
    }

    /// Merge `patch` into the profile, creating it with defaults first if it
    /// does not exist yet.
    pub fn upsert_profile(&mut self, id: &str, patch: ProfilePatch) -> &PlayerProfile {
        let profile = self
            .profiles
            .entry(id.to_owned())
            .or_insert_with(|| PlayerProfile::new(id));
        profile.apply(patch);
        profile
    }
}
