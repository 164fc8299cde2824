// The session coordinator: the single owner of all relay state.
//
// `Coordinator` bundles the connection registry, lobby store, broadcast
// groups, timer queue and records store, and exposes one method per client
// operation. `server.rs` drives it from the main thread: `handshake` for new
// connections, `handle_message` for every later frame, `disconnect` when a
// reader thread reports a closed socket, and `fire_due_timers` whenever the
// next deadline passes. Each call runs to completion (broadcasts included)
// before the next one starts, so nothing here locks.
//
// Lobby lifecycle:
//   open --start_race--> counting down --last tick--> racing --all finished--> open
// Leaving (explicitly or by disconnecting) goes through
// `remove_player_from_lobby` in every case. An emptied lobby is destroyed on
// the spot, which cancels its pending countdown tick.
//
// Time is passed in as `Instant`s rather than read from the clock so tests
// can step the countdown deterministically. Wall-clock timestamps that go on
// the wire (race start, leaderboard entries) use `unix_millis()`.
//
// Rejected requests are reported to the requester as `ServerMessage::Error`
// and logged at debug level. Requests that make no sense in the current
// state (car updates outside a race, a second finish, ...) are dropped
// without a reply.

use std::time::Instant;

use rand::seq::SliceRandom;
use slipstream_protocol::{
    CarState, ClientMessage, ConnectionId, Difficulty, LapRecord, LobbyId, PROTOCOL_VERSION,
    Player, ProfilePatch, ServerMessage, Track, VehicleClass,
};
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcast, Outbox};
use crate::config::CountdownConfig;
use crate::error::CoordinatorError;
use crate::lobby::{Lobby, LobbySettings, LobbyStore, new_player};
use crate::records::RecordStore;
use crate::registry::ConnectionRegistry;
use crate::timer::TimerQueue;
use crate::unix_millis;

/// Player colours handed out on create/join.
pub const PALETTE: [&str; 8] = [
    "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF", "#FFA500", "#800080",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    CountdownTick(LobbyId),
}

pub struct Coordinator<O> {
    countdown: CountdownConfig,
    protocol_version: u32,
    registry: ConnectionRegistry,
    lobbies: LobbyStore,
    broadcast: Broadcast<O>,
    timers: TimerQueue<TimerEvent>,
    records: RecordStore,
}

impl<O: Outbox> Coordinator<O> {
    pub fn new(outbox: O, countdown: CountdownConfig) -> Self {
        Self {
            countdown,
            protocol_version: PROTOCOL_VERSION,
            registry: ConnectionRegistry::new(),
            lobbies: LobbyStore::new(),
            broadcast: Broadcast::new(outbox),
            timers: TimerQueue::new(),
            records: RecordStore::new(),
        }
    }

    /// Accept only clients speaking `version` instead of `PROTOCOL_VERSION`.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    // -- connections --------------------------------------------------------

    /// Process a client's `Hello`. On a version mismatch the client gets
    /// `Rejected` and false is returned; the caller should close the
    /// connection. Otherwise the connection is registered and receives
    /// `Welcome` followed by the public lobby list.
    pub fn handshake(
        &mut self,
        id: ConnectionId,
        protocol_version: u32,
        player_name: String,
    ) -> bool {
        if protocol_version != self.protocol_version {
            info!(
                player = %id,
                client_version = protocol_version,
                relay_version = self.protocol_version,
                "handshake rejected"
            );
            let reason = format!(
                "protocol version mismatch: relay speaks {}, client sent {}",
                self.protocol_version, protocol_version
            );
            self.broadcast.send_to(id, &ServerMessage::Rejected { reason });
            return false;
        }

        let name = if player_name.trim().is_empty() {
            format!("Player {}", id.0)
        } else {
            player_name
        };
        info!(player = %id, name = %name, "connection accepted");
        self.registry.connect(id, name);
        self.broadcast.subscribe(id);
        self.broadcast.send_to(
            id,
            &ServerMessage::Welcome {
                connection_id: id,
                protocol_version: self.protocol_version,
            },
        );
        let lobbies = self.lobbies.public_lobbies();
        self.broadcast.send_to(id, &ServerMessage::LobbyList { lobbies });
        true
    }

    /// A connection went away. Runs the same removal as `LeaveLobby`, then
    /// forgets the connection.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if !self.registry.is_connected(id) {
            return;
        }
        self.remove_player_from_lobby(id);
        self.registry.disconnect(id);
        self.broadcast.unsubscribe(id);
        info!(player = %id, "connection closed");
    }

    /// Dispatch one client message. `now` anchors any timers it schedules.
    pub fn handle_message(&mut self, id: ConnectionId, message: ClientMessage, now: Instant) {
        if !self.registry.is_connected(id) {
            warn!(player = %id, "message from unregistered connection dropped");
            return;
        }
        let result = match message {
            ClientMessage::CreateLobby {
                name,
                max_players,
                track,
                difficulty,
                is_public,
            } => {
                let settings = LobbySettings {
                    name,
                    max_players,
                    track,
                    difficulty,
                    is_public,
                };
                self.create_lobby(id, settings);
                Ok(())
            }
            ClientMessage::JoinLobby { lobby_id } => self.join_lobby(id, lobby_id),
            ClientMessage::LeaveLobby => {
                self.leave_lobby(id);
                Ok(())
            }
            ClientMessage::SetReady { is_ready } => {
                self.set_ready(id, is_ready);
                Ok(())
            }
            ClientMessage::SelectVehicle { vehicle } => {
                self.select_vehicle(id, vehicle);
                Ok(())
            }
            ClientMessage::StartRace => self.start_race(id, now),
            ClientMessage::UpdateCarState { state } => {
                self.update_car_state(id, state);
                Ok(())
            }
            ClientMessage::FinishRace {
                final_time,
                lap_times,
            } => {
                self.finish_race(id, final_time, lap_times);
                Ok(())
            }
            ClientMessage::GetLeaderboard { track, difficulty } => {
                self.send_leaderboard(id, track, difficulty);
                Ok(())
            }
            ClientMessage::SubmitLapRecord { record } => {
                self.submit_lap_record(id, record);
                Ok(())
            }
            ClientMessage::GetProfile { profile_id } => self.get_profile(id, &profile_id),
            ClientMessage::UpdateProfile { profile_id, patch } => {
                self.update_profile(id, &profile_id, patch);
                Ok(())
            }
            // Handshake and teardown are handled by the connection layer.
            ClientMessage::Hello { .. } | ClientMessage::Goodbye => Ok(()),
        };
        if let Err(err) = result {
            debug!(player = %id, error = %err, "request rejected");
            self.broadcast.send_to(
                id,
                &ServerMessage::Error {
                    message: err.to_string(),
                },
            );
        }
    }

    // -- lobbies ------------------------------------------------------------

    /// Create a lobby with `requester` as host and only member. A requester
    /// already in a lobby leaves it first.
    pub fn create_lobby(&mut self, requester: ConnectionId, settings: LobbySettings) -> LobbyId {
        if self.registry.lobby_of(requester).is_some() {
            self.leave_lobby(requester);
        }

        let lobby_id = LobbyId::new_v4();
        let name = self.display_name(requester);
        let host = new_player(requester, name, pick_color(std::iter::empty()), 1);
        let lobby = Lobby::new(lobby_id, settings, host);
        let info = lobby.info();
        let is_public = lobby.is_public();
        self.lobbies.insert(lobby);
        self.registry.assign(requester, lobby_id);
        self.broadcast.join_group(lobby_id, requester);
        info!(
            lobby = %lobby_id,
            player = %requester,
            max_players = info.max_players,
            public = is_public,
            "lobby created"
        );

        self.broadcast
            .send_to(requester, &ServerMessage::LobbyCreated { lobby: info });
        if is_public {
            self.broadcast_lobby_list();
        }
        lobby_id
    }

    /// Add `requester` to an open lobby with room.
    pub fn join_lobby(
        &mut self,
        requester: ConnectionId,
        lobby_id: LobbyId,
    ) -> Result<(), CoordinatorError> {
        let current = self.registry.lobby_of(requester);
        if current == Some(lobby_id) {
            if let Some(lobby) = self.lobbies.get(lobby_id) {
                let info = lobby.info();
                self.broadcast
                    .send_to(requester, &ServerMessage::LobbyJoined { lobby: info });
            }
            return Ok(());
        }

        let lobby = self
            .lobbies
            .get(lobby_id)
            .ok_or(CoordinatorError::LOBBY_NOT_FOUND)?;
        if lobby.is_started() {
            return Err(CoordinatorError::AlreadyStarted);
        }
        if lobby.is_full() {
            return Err(CoordinatorError::LobbyFull);
        }

        if current.is_some() {
            self.leave_lobby(requester);
        }

        let name = self.display_name(requester);
        let lobby = self
            .lobbies
            .get_mut(lobby_id)
            .ok_or(CoordinatorError::LOBBY_NOT_FOUND)?;
        let color = pick_color(lobby.colors_in_use());
        let position = u32::try_from(lobby.players().len() + 1).unwrap_or(u32::MAX);
        let player = new_player(requester, name, color, position);
        lobby.add_player(player.clone())?;
        let info = lobby.info();

        self.registry.assign(requester, lobby_id);
        self.broadcast.join_group(lobby_id, requester);
        info!(lobby = %lobby_id, player = %requester, "player joined lobby");

        self.broadcast.send_to(
            requester,
            &ServerMessage::LobbyJoined {
                lobby: info.clone(),
            },
        );
        self.broadcast.send_to_lobby_except(
            lobby_id,
            requester,
            &ServerMessage::PlayerJoined { player },
        );
        self.broadcast.send_to_lobby_except(
            lobby_id,
            requester,
            &ServerMessage::LobbyUpdated { lobby: info },
        );
        Ok(())
    }

    /// Leave the requester's lobby, if any, and confirm with `LobbyLeft`.
    pub fn leave_lobby(&mut self, requester: ConnectionId) {
        if self.remove_player_from_lobby(requester).is_some() {
            self.broadcast.send_to(requester, &ServerMessage::LobbyLeft);
        }
    }

    /// Take `id` out of its lobby: roster, race and broadcast group. Destroys
    /// the lobby if it empties; otherwise tells the remaining members (and
    /// finishes the race if `id` was the last racer still on track). Returns
    /// the lobby `id` was in.
    pub fn remove_player_from_lobby(&mut self, id: ConnectionId) -> Option<LobbyId> {
        let lobby_id = self.registry.unassign(id)?;
        self.broadcast.leave_group(lobby_id, id);

        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return Some(lobby_id);
        };
        let previous_host = lobby.host_id();
        lobby.remove_player(id);
        info!(lobby = %lobby_id, player = %id, "player left lobby");

        if lobby.is_empty() {
            self.destroy_lobby(lobby_id);
            return Some(lobby_id);
        }

        if lobby.host_id() != previous_host {
            info!(lobby = %lobby_id, host = %lobby.host_id(), "host transferred");
        }
        let info = lobby.info();
        let results = lobby.try_complete_race();

        self.broadcast
            .send_to_lobby(lobby_id, &ServerMessage::PlayerLeft { player_id: id });
        self.broadcast
            .send_to_lobby(lobby_id, &ServerMessage::LobbyUpdated { lobby: info });
        if let Some(results) = results {
            self.announce_results(lobby_id, results);
        }
        Some(lobby_id)
    }

    pub fn set_ready(&mut self, requester: ConnectionId, is_ready: bool) {
        let Some(lobby_id) = self.registry.lobby_of(requester) else {
            return;
        };
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return;
        };
        let Some(player) = lobby.player_mut(requester) else {
            return;
        };
        player.is_ready = is_ready;
        let info = lobby.info();
        debug!(lobby = %lobby_id, player = %requester, is_ready, "ready state changed");

        self.broadcast.send_to_lobby(
            lobby_id,
            &ServerMessage::PlayerReady {
                player_id: requester,
                is_ready,
            },
        );
        self.broadcast
            .send_to_lobby(lobby_id, &ServerMessage::LobbyUpdated { lobby: info });
    }

    /// Change the requester's vehicle class. Only while the lobby is open.
    pub fn select_vehicle(&mut self, requester: ConnectionId, vehicle: VehicleClass) {
        let Some(lobby_id) = self.registry.lobby_of(requester) else {
            return;
        };
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return;
        };
        if !lobby.is_open() {
            return;
        }
        let Some(player) = lobby.player_mut(requester) else {
            return;
        };
        player.vehicle = vehicle;
        let info = lobby.info();
        self.broadcast
            .send_to_lobby(lobby_id, &ServerMessage::LobbyUpdated { lobby: info });
    }

    // -- race flow ----------------------------------------------------------

    /// Host request to start. On success the lobby starts counting down; the
    /// first `RaceStarting` goes out one interval after `now`.
    pub fn start_race(
        &mut self,
        requester: ConnectionId,
        now: Instant,
    ) -> Result<(), CoordinatorError> {
        let Some(lobby_id) = self.registry.lobby_of(requester) else {
            return Ok(());
        };
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return Ok(());
        };
        lobby.check_can_start(requester)?;

        let timer = self.timers.schedule(
            now + self.countdown.interval,
            TimerEvent::CountdownTick(lobby_id),
        );
        lobby.set_countdown(self.countdown.from, timer);
        info!(lobby = %lobby_id, from = self.countdown.from, "countdown started");
        Ok(())
    }

    /// Earliest pending timer, for bounding the main loop's wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Run every timer due at `now`, including ticks rescheduled by earlier
    /// ticks in the same call.
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some((deadline, event)) = self.timers.pop_due(now) {
            match event {
                TimerEvent::CountdownTick(lobby_id) => self.countdown_tick(lobby_id, deadline),
            }
        }
    }

    fn countdown_tick(&mut self, lobby_id: LobbyId, deadline: Instant) {
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return;
        };
        let Some((remaining, _)) = lobby.countdown() else {
            return;
        };

        self.broadcast.send_to_lobby(
            lobby_id,
            &ServerMessage::RaceStarting {
                countdown: remaining,
            },
        );
        if remaining > 0 {
            let timer = self.timers.schedule(
                deadline + self.countdown.interval,
                TimerEvent::CountdownTick(lobby_id),
            );
            lobby.set_countdown(remaining - 1, timer);
            return;
        }

        let race = lobby.begin_race(unix_millis());
        info!(lobby = %lobby_id, racers = race.player_states.len(), "race started");
        self.broadcast
            .send_to_lobby(lobby_id, &ServerMessage::RaceStarted { race });
    }

    /// Store a racer's latest car state and relay it to everyone else in the
    /// lobby. Ignored unless the requester is in an active race.
    pub fn update_car_state(&mut self, requester: ConnectionId, state: CarState) {
        let Some(lobby_id) = self.registry.lobby_of(requester) else {
            return;
        };
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return;
        };
        if !lobby.apply_car_state(requester, state.clone()) {
            return;
        }
        self.broadcast.send_to_lobby_except(
            lobby_id,
            requester,
            &ServerMessage::PlayerStateUpdate {
                player_id: requester,
                state,
            },
        );
    }

    /// Record a racer crossing the line. Once every participant has
    /// finished, the results go out and the lobby reopens.
    pub fn finish_race(&mut self, requester: ConnectionId, final_time: u64, lap_times: Vec<u64>) {
        let Some(lobby_id) = self.registry.lobby_of(requester) else {
            return;
        };
        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return;
        };
        let Some(position) = lobby.record_finish(requester, final_time, lap_times) else {
            return;
        };
        debug!(lobby = %lobby_id, player = %requester, final_time, position, "racer finished");

        if let Some(results) = lobby.try_complete_race() {
            self.announce_results(lobby_id, results);
        }
    }

    fn announce_results(&mut self, lobby_id: LobbyId, results: Vec<Player>) {
        info!(lobby = %lobby_id, finishers = results.len(), "race finished");
        self.broadcast
            .send_to_lobby(lobby_id, &ServerMessage::RaceFinished { results });
        if let Some(lobby) = self.lobbies.get(lobby_id) {
            let info = lobby.info();
            self.broadcast
                .send_to_lobby(lobby_id, &ServerMessage::LobbyUpdated { lobby: info });
        }
    }

    // -- records ------------------------------------------------------------

    pub fn send_leaderboard(
        &mut self,
        requester: ConnectionId,
        track: Track,
        difficulty: Difficulty,
    ) {
        let entries = self.records.top(track, difficulty).to_vec();
        self.broadcast.send_to(
            requester,
            &ServerMessage::LeaderboardUpdate {
                track,
                difficulty,
                entries,
            },
        );
    }

    /// File a lap record and reply with the refreshed board.
    pub fn submit_lap_record(&mut self, requester: ConnectionId, record: LapRecord) {
        let entry = self.records.submit(record, unix_millis());
        debug!(
            player = %requester,
            board = %slipstream_protocol::board_key(entry.track, entry.difficulty),
            lap_time = entry.lap_time,
            "lap record submitted"
        );
        self.send_leaderboard(requester, entry.track, entry.difficulty);
    }

    pub fn get_profile(
        &mut self,
        requester: ConnectionId,
        profile_id: &str,
    ) -> Result<(), CoordinatorError> {
        let profile = self.records.profile(profile_id)?.clone();
        self.broadcast
            .send_to(requester, &ServerMessage::Profile { profile });
        Ok(())
    }

    pub fn update_profile(
        &mut self,
        requester: ConnectionId,
        profile_id: &str,
        patch: ProfilePatch,
    ) {
        let profile = self.records.upsert_profile(profile_id, patch).clone();
        self.broadcast
            .send_to(requester, &ServerMessage::Profile { profile });
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    // -- queries ------------------------------------------------------------

    pub fn lobby(&self, id: LobbyId) -> Option<&Lobby> {
        self.lobbies.get(id)
    }

    pub fn lobby_of(&self, id: ConnectionId) -> Option<LobbyId> {
        self.registry.lobby_of(id)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn outbox(&self) -> &O {
        self.broadcast.outbox()
    }

    pub fn outbox_mut(&mut self) -> &mut O {
        self.broadcast.outbox_mut()
    }

    // -- internals ----------------------------------------------------------

    fn destroy_lobby(&mut self, lobby_id: LobbyId) {
        let Some(lobby) = self.lobbies.remove(lobby_id) else {
            return;
        };
        if let Some((_, timer)) = lobby.countdown() {
            self.timers.cancel(timer);
            info!(lobby = %lobby_id, "countdown cancelled");
        }
        self.broadcast.close_group(lobby_id);
        info!(lobby = %lobby_id, "lobby destroyed");
        self.broadcast_lobby_list();
    }

    fn broadcast_lobby_list(&mut self) {
        let lobbies = self.lobbies.public_lobbies();
        self.broadcast
            .send_to_everyone(&ServerMessage::LobbyList { lobbies });
    }

    fn display_name(&self, id: ConnectionId) -> String {
        self.registry
            .name(id)
            .map_or_else(|| format!("Player {}", id.0), str::to_owned)
    }
}

/// A palette colour, preferring ones not already in `in_use`.
fn pick_color<'a>(in_use: impl Iterator<Item = &'a str>) -> String {
    let taken: Vec<&str> = in_use.collect();
    let free: Vec<&str> = PALETTE
        .iter()
        .copied()
        .filter(|color| !taken.contains(color))
        .collect();
    let mut rng = rand::thread_rng();
    free.choose(&mut rng)
        .or_else(|| PALETTE.choose(&mut rng))
        .copied()
        .unwrap_or(PALETTE[0])
        .to_owned()
}
