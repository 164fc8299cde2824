// slipstream_protocol: wire protocol for the Slipstream race coordinator.
//
// This crate defines the message types, shared data model and framing used by
// the relay (`slipstream_relay`) and racing clients to talk over TCP. It is
// shared by both sides and knows nothing about sockets, threads or physics.
//
// Module overview:
// - `types.rs`:    IDs (`ConnectionId`, `LobbyId`) and the fixed menus
//                  (`Track`, `Difficulty`, `VehicleClass`).
// - `model.rs`:    Snapshot structs carried in messages: `CarState`,
//                  `Player`, `LobbyInfo`, `RaceSnapshot`, plus the records
//                  types (`LeaderboardEntry`, `PlayerProfile`, ...).
// - `message.rs`:  `ClientMessage` / `ServerMessage` enums.
// - `framing.rs`:  4-byte big-endian length prefix + JSON payload, with typed
//                  `send` / `recv` helpers.
//
// Design decisions:
// - **JSON serialization.** Human-readable on the wire and trivially
//   consumed by non-Rust clients.
// - **Car state is opaque.** The relay stores and forwards `CarState` but
//   never validates it; physics lives entirely on clients.
// - **No async runtime.** Framing uses `std::io::Read`/`Write` so it works on
//   blocking `TcpStream`s and in-memory buffers alike.

pub mod framing;
pub mod message;
pub mod model;
pub mod types;

pub use framing::{FrameError, MAX_FRAME_SIZE, read_frame, recv, send, write_frame};
pub use message::{ClientMessage, ServerMessage};
pub use model::{
    CarState, LapRecord, LeaderboardEntry, LobbyInfo, Player, PlayerProfile, ProfilePatch, Quat,
    RaceSnapshot, Vec3,
};
pub use types::{ConnectionId, Difficulty, LobbyId, Track, VehicleClass, board_key};

/// Protocol version sent in `Hello` and checked by the relay.
pub const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_use_lowercase_names() {
        let json = serde_json::to_string(&ClientMessage::CreateLobby {
            name: "Sunday Cup".into(),
            max_players: 4,
            track: Track::City,
            difficulty: Difficulty::Medium,
            is_public: true,
        })
        .unwrap();
        assert!(json.contains(r#""track":"city""#), "{json}");
        assert!(json.contains(r#""difficulty":"medium""#), "{json}");
    }

    #[test]
    fn board_key_format() {
        assert_eq!(board_key(Track::Desert, Difficulty::Insane), "desert-insane");
    }

    #[test]
    fn race_finished_roundtrip() {
        let player = Player {
            id: ConnectionId(1),
            name: "P1".into(),
            vehicle: VehicleClass::Speedster,
            car_state: CarState::spawn(),
            color: "#FF0000".into(),
            is_ready: false,
            position: 1,
            lap_times: vec![45_000, 45_000],
            total_time: 90_000,
            finished: true,
        };
        let msg = ServerMessage::RaceFinished {
            results: vec![player],
        };
        let json = serde_json::to_vec(&msg).unwrap();
        let back: ServerMessage = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn lobby_id_roundtrip() {
        let id = LobbyId::new_v4();
        let msg = ClientMessage::JoinLobby { lobby_id: id };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ClientMessage::JoinLobby { lobby_id: id });
    }
}
