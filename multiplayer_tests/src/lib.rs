// Test-only racing client for multiplayer integration tests.
//
// Wraps the real `NetClient` (from `slipstream_relay::client`) and keeps a
// local view of what the relay has told it (current lobby, countdown values,
// race snapshot, opponents' car states, results) to provide a synchronous,
// test-friendly API for exercising the full pipeline:
// connect → lobby → ready → countdown → race → car-state relay → results.
//
// The only test-specific code here is the synchronous polling wrappers
// (blocking loops around `NetClient::poll()`). All networking uses the same
// code paths a real game client would.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use slipstream_protocol::{
    CarState, ClientMessage, ConnectionId, Difficulty, LobbyId, LobbyInfo, Player, RaceSnapshot,
    ServerMessage, Track,
};
use slipstream_relay::NetClient;

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A test racer wrapping a real NetClient.
pub struct TestRacer {
    client: NetClient,
    pending: VecDeque<ServerMessage>,
    pub lobby: Option<LobbyInfo>,
    pub public_lobbies: Vec<LobbyInfo>,
    pub countdowns: Vec<u32>,
    pub race: Option<RaceSnapshot>,
    pub opponents: BTreeMap<ConnectionId, CarState>,
    pub results: Option<Vec<Player>>,
    pub errors: Vec<String>,
}

impl TestRacer {
    /// Connect to a relay server and perform the Hello handshake.
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        let client =
            NetClient::connect(&addr.to_string(), name).expect("TestRacer::connect failed");
        Self {
            client,
            pending: VecDeque::new(),
            lobby: None,
            public_lobbies: Vec::new(),
            countdowns: Vec::new(),
            race: None,
            opponents: BTreeMap::new(),
            results: None,
            errors: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.client.connection_id()
    }

    pub fn send(&mut self, msg: ClientMessage) {
        self.client.send(&msg).expect("send failed");
    }

    /// Create a lobby and block until the relay confirms it.
    pub fn create_lobby(&mut self, max_players: u32, is_public: bool) -> LobbyId {
        self.client
            .create_lobby("Test Cup", max_players, Track::City, Difficulty::Medium, is_public)
            .expect("create_lobby failed");
        self.poll_until("LobbyCreated", |msg| match msg {
            ServerMessage::LobbyCreated { lobby } => Some(lobby.id),
            _ => None,
        })
    }

    /// Join a lobby and block until the relay confirms it.
    pub fn join(&mut self, lobby_id: LobbyId) {
        self.client.join_lobby(lobby_id).expect("join_lobby failed");
        self.poll_until("LobbyJoined", |msg| match msg {
            ServerMessage::LobbyJoined { .. } => Some(()),
            _ => None,
        });
    }

    /// Join a lobby expecting the relay to refuse. Returns the error text.
    pub fn join_expecting_error(&mut self, lobby_id: LobbyId) -> String {
        self.client.join_lobby(lobby_id).expect("join_lobby failed");
        self.poll_until_error()
    }

    pub fn leave(&mut self) {
        self.client.leave_lobby().expect("leave_lobby failed");
        self.poll_until("LobbyLeft", |msg| match msg {
            ServerMessage::LobbyLeft => Some(()),
            _ => None,
        });
    }

    /// Set ready and block until the relay echoes it back.
    pub fn set_ready(&mut self, is_ready: bool) {
        let me = self.id();
        self.client.set_ready(is_ready).expect("set_ready failed");
        self.poll_until("PlayerReady", |msg| match msg {
            ServerMessage::PlayerReady { player_id, .. } if *player_id == me => Some(()),
            _ => None,
        });
    }

    /// Host only: request the race start. Does not wait.
    pub fn start_race(&mut self) {
        self.client.start_race().expect("start_race failed");
    }

    /// Blocking poll until RaceStarted. Countdown values seen on the way are
    /// kept in `countdowns`.
    pub fn poll_until_race_started(&mut self) -> RaceSnapshot {
        self.poll_until("RaceStarted", |msg| match msg {
            ServerMessage::RaceStarted { race } => Some(race.clone()),
            _ => None,
        })
    }

    pub fn drive(&mut self, state: CarState) {
        self.client
            .update_car_state(state)
            .expect("update_car_state failed");
    }

    /// Blocking poll until a car-state update from `opponent` arrives.
    pub fn poll_until_opponent_state(&mut self, opponent: ConnectionId) -> CarState {
        self.poll_until("PlayerStateUpdate", |msg| match msg {
            ServerMessage::PlayerStateUpdate { player_id, state } if *player_id == opponent => {
                Some(state.clone())
            }
            _ => None,
        })
    }

    pub fn finish(&mut self, final_time: u64, lap_times: Vec<u64>) {
        self.client
            .finish_race(final_time, lap_times)
            .expect("finish_race failed");
    }

    /// Blocking poll until RaceFinished.
    pub fn poll_until_results(&mut self) -> Vec<Player> {
        self.poll_until("RaceFinished", |msg| match msg {
            ServerMessage::RaceFinished { results } => Some(results.clone()),
            _ => None,
        })
    }

    /// Blocking poll until a LobbyUpdated snapshot satisfies `pred`.
    pub fn poll_until_lobby<F>(&mut self, mut pred: F) -> LobbyInfo
    where
        F: FnMut(&LobbyInfo) -> bool,
    {
        self.poll_until("matching LobbyUpdated", |msg| match msg {
            ServerMessage::LobbyUpdated { lobby } if pred(lobby) => Some(lobby.clone()),
            _ => None,
        })
    }

    /// Blocking poll until an Error message arrives. Returns its text.
    pub fn poll_until_error(&mut self) -> String {
        self.poll_until("Error", |msg| match msg {
            ServerMessage::Error { message } => Some(message.clone()),
            _ => None,
        })
    }

    /// Blocking poll until `f` returns `Some` for a message. Every message
    /// read on the way updates the local view; messages after the match stay
    /// queued for the next call.
    pub fn poll_until<T, F>(&mut self, what: &str, mut f: F) -> T
    where
        F: FnMut(&ServerMessage) -> Option<T>,
    {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {what}"
            );
            self.pending.extend(self.client.poll());
            while let Some(msg) = self.pending.pop_front() {
                self.apply(&msg);
                if let Some(found) = f(&msg) {
                    return found;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Raw poll: return all pending server messages without waiting. They
    /// still update the local view.
    pub fn poll_raw(&mut self) -> Vec<ServerMessage> {
        self.pending.extend(self.client.poll());
        let messages: Vec<ServerMessage> = self.pending.drain(..).collect();
        for msg in &messages {
            self.apply(msg);
        }
        messages
    }

    /// Send Goodbye and close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::LobbyList { lobbies } => self.public_lobbies = lobbies.clone(),
            ServerMessage::LobbyCreated { lobby }
            | ServerMessage::LobbyJoined { lobby }
            | ServerMessage::LobbyUpdated { lobby } => self.lobby = Some(lobby.clone()),
            ServerMessage::LobbyLeft => self.lobby = None,
            ServerMessage::RaceStarting { countdown } => self.countdowns.push(*countdown),
            ServerMessage::RaceStarted { race } => {
                self.race = Some(race.clone());
                self.results = None;
                self.opponents.clear();
            }
            ServerMessage::PlayerStateUpdate { player_id, state } => {
                self.opponents.insert(*player_id, state.clone());
            }
            ServerMessage::RaceFinished { results } => self.results = Some(results.clone()),
            ServerMessage::Error { message } => self.errors.push(message.clone()),
            _ => {}
        }
    }
}
