// Protocol messages for client-relay communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by racing clients to the relay.
// - `ServerMessage`: sent by the relay to one client, to a lobby, or to
//   every connected client.
//
// The first frame on every connection must be `Hello`; the relay answers
// with `Welcome` (then the public lobby list) or `Rejected`. Everything else
// is only meaningful after the handshake. `Goodbye` ends the connection and
// is handled exactly like a dropped socket.

use serde::{Deserialize, Serialize};

use crate::model::{
    CarState, LapRecord, LeaderboardEntry, LobbyInfo, Player, PlayerProfile, ProfilePatch,
    RaceSnapshot,
};
use crate::types::{ConnectionId, Difficulty, LobbyId, Track, VehicleClass};

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake. An empty name is replaced with `Player <id>`.
    Hello {
        protocol_version: u32,
        player_name: String,
    },
    CreateLobby {
        name: String,
        max_players: u32,
        track: Track,
        difficulty: Difficulty,
        is_public: bool,
    },
    JoinLobby { lobby_id: LobbyId },
    LeaveLobby,
    SetReady { is_ready: bool },
    /// Change vehicle class while the lobby is still open.
    SelectVehicle { vehicle: VehicleClass },
    /// Host only: begin the countdown.
    StartRace,
    /// High-frequency car snapshot, relayed to the rest of the lobby.
    UpdateCarState { state: CarState },
    FinishRace { final_time: u64, lap_times: Vec<u64> },
    GetLeaderboard {
        track: Track,
        difficulty: Difficulty,
    },
    SubmitLapRecord { record: LapRecord },
    GetProfile { profile_id: String },
    UpdateProfile {
        profile_id: String,
        patch: ProfilePatch,
    },
    /// Leaving gracefully.
    Goodbye,
}

/// Messages sent by the relay to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome {
        connection_id: ConnectionId,
        protocol_version: u32,
    },
    /// Handshake rejected; the connection is closed afterwards.
    Rejected { reason: String },
    /// Public lobbies. Sent on connect and whenever public lobbies churn.
    LobbyList { lobbies: Vec<LobbyInfo> },
    LobbyCreated { lobby: LobbyInfo },
    LobbyJoined { lobby: LobbyInfo },
    LobbyLeft,
    /// Authoritative lobby snapshot after any roster or readiness change.
    LobbyUpdated { lobby: LobbyInfo },
    PlayerJoined { player: Player },
    PlayerLeft { player_id: ConnectionId },
    PlayerReady {
        player_id: ConnectionId,
        is_ready: bool,
    },
    /// Countdown tick: 3, 2, 1, 0.
    RaceStarting { countdown: u32 },
    RaceStarted { race: RaceSnapshot },
    /// Another racer's car snapshot. Never echoed to its sender.
    PlayerStateUpdate {
        player_id: ConnectionId,
        state: CarState,
    },
    /// Final standings, sorted by position.
    RaceFinished { results: Vec<Player> },
    LeaderboardUpdate {
        track: Track,
        difficulty: Difficulty,
        entries: Vec<LeaderboardEntry>,
    },
    Profile { profile: PlayerProfile },
    /// A request was rejected. Only the requester receives this.
    Error { message: String },
}
