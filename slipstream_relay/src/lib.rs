// slipstream_relay: authoritative lobby and race coordinator for Slipstream.
//
// The relay accepts TCP connections from racing clients, groups them into
// lobbies, runs the pre-race countdown, relays car state between racers and
// ranks the results when everyone has crossed the line. It never simulates
// anything: car physics stays on the clients and the relay stores and
// forwards their snapshots verbatim. It also keeps in-memory leaderboards
// and player profiles reachable over the same connection.
//
// Module overview:
// - `coordinator.rs`: The state machine. Owns every store below and exposes
//                     one method per client operation.
// - `lobby.rs`:       `Lobby` (roster, host, phase) and the `LobbyStore`.
// - `race.rs`:        `RaceSession` (participants, finish order) and ranking.
// - `registry.rs`:    Which connections are live and which lobby each is in.
// - `broadcast.rs`:   Per-lobby broadcast groups over an `Outbox` backend.
// - `timer.rs`:       Deadline queue with cancellable handles (countdowns).
// - `records.rs`:     Leaderboards and player profiles.
// - `server.rs`:      TCP listener, reader threads (one per client), and the
//                     main event loop feeding the coordinator through an
//                     `mpsc` channel.
// - `client.rs`:      `NetClient`, a blocking-free TCP client used by tests
//                     and tools.
// - `config.rs`:      `RelayConfig` / `CountdownConfig`.
// - `error.rs`:       `CoordinatorError`.
//
// Dependencies: `slipstream_protocol` (message types and framing), `tracing`
// for logs, `thiserror` for error types, `uuid`/`rand` for ids and colours,
// `indexmap` for the ordered lobby store.
//
// The relay runs as a standalone binary (`main.rs`) or embedded through the
// library API (`start_relay`).

pub mod broadcast;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lobby;
pub mod race;
pub mod records;
pub mod registry;
pub mod server;
pub mod timer;

use std::time::{SystemTime, UNIX_EPOCH};

pub use broadcast::{MemoryOutbox, Outbox};
pub use client::{ClientError, NetClient};
pub use config::{CountdownConfig, RelayConfig};
pub use coordinator::Coordinator;
pub use error::CoordinatorError;
pub use server::{RelayHandle, start_relay};

/// Milliseconds since the Unix epoch, saturating.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
