// Lobbies and the lobby store.
//
// A `Lobby` owns its roster of `Player` records (the only copy; race
// sessions refer to players by id) and tracks where it is in the
// open -> counting down -> racing cycle via `LobbyPhase`. All roster rules
// live here: capacity, host hand-off on departure, readiness for start, race
// reset, finish bookkeeping and final ranking. The coordinator decides what
// to broadcast around each step.
//
// `LobbyStore` keeps lobbies in creation order so the public lobby list is
// stable between broadcasts.

use indexmap::IndexMap;
use slipstream_protocol::{
    CarState, ConnectionId, Difficulty, LobbyId, LobbyInfo, Player, RaceSnapshot, Track,
    VehicleClass,
};

use crate::error::CoordinatorError;
use crate::race::{RaceSession, rank_results};
use crate::timer::TimerHandle;

pub const MIN_PLAYERS: u32 = 2;
pub const MAX_PLAYERS: u32 = 8;

pub fn clamp_max_players(requested: u32) -> u32 {
    requested.clamp(MIN_PLAYERS, MAX_PLAYERS)
}

/// A fresh roster entry: not ready, default vehicle, parked at spawn.
pub fn new_player(id: ConnectionId, name: String, color: String, position: u32) -> Player {
    Player {
        id,
        name,
        vehicle: VehicleClass::default(),
        car_state: CarState::spawn(),
        color,
        is_ready: false,
        position,
        lap_times: Vec::new(),
        total_time: 0,
        finished: false,
    }
}

/// Creation parameters, as sent in `CreateLobby`.
#[derive(Clone, Debug)]
pub struct LobbySettings {
    pub name: String,
    pub max_players: u32,
    pub track: Track,
    pub difficulty: Difficulty,
    pub is_public: bool,
}

#[derive(Debug)]
pub enum LobbyPhase {
    Open,
    /// `remaining` is the next value to announce; `timer` fires it.
    CountingDown {
        remaining: u32,
        timer: TimerHandle,
    },
    Racing(RaceSession),
}

#[derive(Debug)]
pub struct Lobby {
    id: LobbyId,
    name: String,
    host_id: ConnectionId,
    players: Vec<Player>,
    max_players: u32,
    track: Track,
    difficulty: Difficulty,
    is_public: bool,
    phase: LobbyPhase,
}

impl Lobby {
    /// New open lobby with `host` as its only member. `max_players` is
    /// clamped into `[MIN_PLAYERS, MAX_PLAYERS]`.
    pub fn new(id: LobbyId, settings: LobbySettings, host: Player) -> Self {
        Self {
            id,
            name: settings.name,
            host_id: host.id,
            players: vec![host],
            max_players: clamp_max_players(settings.max_players),
            track: settings.track,
            difficulty: settings.difficulty,
            is_public: settings.is_public,
            phase: LobbyPhase::Open,
        }
    }

    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn host_id(&self) -> ConnectionId {
        self.host_id
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn max_players(&self) -> u32 {
        self.max_players
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, LobbyPhase::Open)
    }

    /// Started means counting down or racing; matches `LobbyInfo::is_started`.
    pub fn is_started(&self) -> bool {
        !self.is_open()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players as usize
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn player(&self, id: ConnectionId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: ConnectionId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn colors_in_use(&self) -> impl Iterator<Item = &str> {
        self.players.iter().map(|p| p.color.as_str())
    }

    pub fn race(&self) -> Option<&RaceSession> {
        match &self.phase {
            LobbyPhase::Racing(session) => Some(session),
            _ => None,
        }
    }

    pub fn info(&self) -> LobbyInfo {
        LobbyInfo {
            id: self.id,
            name: self.name.clone(),
            host_id: self.host_id,
            players: self.players.clone(),
            max_players: self.max_players,
            track: self.track,
            difficulty: self.difficulty,
            is_started: self.is_started(),
            is_public: self.is_public,
        }
    }

    /// Append a player. Fails once the lobby has started or is at capacity.
    pub fn add_player(&mut self, player: Player) -> Result<(), CoordinatorError> {
        if self.is_started() {
            return Err(CoordinatorError::AlreadyStarted);
        }
        if self.is_full() {
            return Err(CoordinatorError::LobbyFull);
        }
        self.players.push(player);
        Ok(())
    }

    /// Remove a player from the roster and from any running race. If the
    /// host left and someone remains, the first remaining player becomes
    /// host.
    pub fn remove_player(&mut self, id: ConnectionId) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == id)?;
        let removed = self.players.remove(index);
        if let LobbyPhase::Racing(session) = &mut self.phase {
            session.drop_participant(id);
        }
        if let Some(first) = self.players.first().filter(|_| self.host_id == id) {
            self.host_id = first.id;
        }
        Some(removed)
    }

    /// Every non-host player is ready. The host is exempt, so a lobby with
    /// only its host passes.
    pub fn all_guests_ready(&self) -> bool {
        self.players
            .iter()
            .all(|p| p.is_ready || p.id == self.host_id)
    }

    /// Checks for a start request from `requester`, in reporting order:
    /// host, open, guests ready.
    pub fn check_can_start(&self, requester: ConnectionId) -> Result<(), CoordinatorError> {
        if requester != self.host_id {
            return Err(CoordinatorError::Forbidden);
        }
        if !self.is_open() {
            return Err(CoordinatorError::AlreadyStarted);
        }
        if !self.all_guests_ready() {
            return Err(CoordinatorError::NotReady);
        }
        Ok(())
    }

    /// Enter (or continue) the countdown with `remaining` still to announce.
    pub fn set_countdown(&mut self, remaining: u32, timer: TimerHandle) {
        self.phase = LobbyPhase::CountingDown { remaining, timer };
    }

    /// The countdown's next value and pending timer, if counting down.
    pub fn countdown(&self) -> Option<(u32, TimerHandle)> {
        match self.phase {
            LobbyPhase::CountingDown { remaining, timer } => Some((remaining, timer)),
            _ => None,
        }
    }

    /// Reset every player for the start line and open a race session over
    /// the current roster.
    pub fn begin_race(&mut self, start_time: u64) -> RaceSnapshot {
        for (index, player) in self.players.iter_mut().enumerate() {
            player.car_state = CarState::spawn();
            player.lap_times.clear();
            player.total_time = 0;
            player.finished = false;
            player.position = u32::try_from(index + 1).unwrap_or(u32::MAX);
        }
        let participants = self.players.iter().map(|p| p.id).collect();
        let session = RaceSession::new(self.id, participants, start_time);
        let snapshot = session.snapshot(&self.players);
        self.phase = LobbyPhase::Racing(session);
        snapshot
    }

    /// Overwrite a racer's car state. Returns false (and changes nothing)
    /// unless a race is active and `id` is in it.
    pub fn apply_car_state(&mut self, id: ConnectionId, state: CarState) -> bool {
        let LobbyPhase::Racing(session) = &self.phase else {
            return false;
        };
        if !session.is_active() || !session.is_participant(id) {
            return false;
        }
        match self.player_mut(id) {
            Some(player) => {
                player.car_state = state;
                true
            }
            None => false,
        }
    }

    /// Record a finish. Returns the provisional position, or `None` if no
    /// race is active, `id` is not racing, or `id` already finished.
    pub fn record_finish(
        &mut self,
        id: ConnectionId,
        final_time: u64,
        lap_times: Vec<u64>,
    ) -> Option<u32> {
        let LobbyPhase::Racing(session) = &mut self.phase else {
            return None;
        };
        let player = self.players.iter_mut().find(|p| p.id == id)?;
        let position = session.record_finish(id, final_time)?;
        player.finished = true;
        player.total_time = final_time;
        player.lap_times = lap_times;
        player.position = position;
        Some(position)
    }

    /// If every remaining participant has finished, rank them, write the
    /// final positions back to the roster, end the race and reopen the lobby
    /// with every ready flag cleared. Returns the ranked results.
    pub fn try_complete_race(&mut self) -> Option<Vec<Player>> {
        let LobbyPhase::Racing(session) = &mut self.phase else {
            return None;
        };
        if !session.is_complete() {
            return None;
        }
        session.conclude();
        let finishers: Vec<Player> = session
            .finish_order()
            .iter()
            .filter_map(|id| self.players.iter().find(|p| p.id == *id))
            .cloned()
            .collect();
        let results = rank_results(finishers);
        for ranked in &results {
            if let Some(player) = self.players.iter_mut().find(|p| p.id == ranked.id) {
                player.position = ranked.position;
            }
        }
        for player in &mut self.players {
            player.is_ready = false;
        }
        self.phase = LobbyPhase::Open;
        Some(results)
    }
}

/// All live lobbies, in creation order.
#[derive(Default)]
pub struct LobbyStore {
    lobbies: IndexMap<LobbyId, Lobby>,
}

impl LobbyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, lobby: Lobby) {
        self.lobbies.insert(lobby.id(), lobby);
    }

    pub fn get(&self, id: LobbyId) -> Option<&Lobby> {
        self.lobbies.get(&id)
    }

    pub fn get_mut(&mut self, id: LobbyId) -> Option<&mut Lobby> {
        self.lobbies.get_mut(&id)
    }

    pub fn remove(&mut self, id: LobbyId) -> Option<Lobby> {
        self.lobbies.shift_remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    /// Snapshots of every public lobby, started or not.
    pub fn public_lobbies(&self) -> Vec<LobbyInfo> {
        self.lobbies
            .values()
            .filter(|lobby| lobby.is_public())
            .map(Lobby::info)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_players: u32) -> LobbySettings {
        LobbySettings {
            name: "Sunday Cup".into(),
            max_players,
            track: Track::City,
            difficulty: Difficulty::Medium,
            is_public: true,
        }
    }

    fn player(id: u32) -> Player {
        new_player(ConnectionId(id), format!("P{id}"), "#FF0000".into(), id)
    }

    fn lobby_with(ids: &[u32], max_players: u32) -> Lobby {
        let mut lobby = Lobby::new(LobbyId::new_v4(), settings(max_players), player(ids[0]));
        for id in &ids[1..] {
            lobby.add_player(player(*id)).unwrap();
        }
        lobby
    }

    #[test]
    fn max_players_clamped() {
        assert_eq!(clamp_max_players(0), 2);
        assert_eq!(clamp_max_players(1), 2);
        assert_eq!(clamp_max_players(5), 5);
        assert_eq!(clamp_max_players(99), 8);
        assert_eq!(lobby_with(&[1], 1).max_players(), 2);
    }

    #[test]
    fn full_lobby_rejects_join() {
        let mut lobby = lobby_with(&[1, 2], 2);
        assert!(lobby.is_full());
        assert_eq!(lobby.add_player(player(3)), Err(CoordinatorError::LobbyFull));
        assert_eq!(lobby.players().len(), 2);
    }

    #[test]
    fn host_passes_down_the_roster() {
        let mut lobby = lobby_with(&[1, 2, 3], 8);
        lobby.remove_player(ConnectionId(1));
        assert_eq!(lobby.host_id(), ConnectionId(2));
        lobby.remove_player(ConnectionId(2));
        assert_eq!(lobby.host_id(), ConnectionId(3));
        lobby.remove_player(ConnectionId(3));
        assert!(lobby.is_empty());
    }

    #[test]
    fn guest_leaving_keeps_host() {
        let mut lobby = lobby_with(&[1, 2, 3], 8);
        assert!(lobby.remove_player(ConnectionId(2)).is_some());
        assert_eq!(lobby.host_id(), ConnectionId(1));
        assert!(lobby.remove_player(ConnectionId(2)).is_none());
    }

    #[test]
    fn start_checks_in_order() {
        let mut lobby = lobby_with(&[1, 2], 8);
        assert_eq!(lobby.check_can_start(ConnectionId(2)), Err(CoordinatorError::Forbidden));
        assert_eq!(lobby.check_can_start(ConnectionId(1)), Err(CoordinatorError::NotReady));
        lobby.player_mut(ConnectionId(2)).unwrap().is_ready = true;
        assert_eq!(lobby.check_can_start(ConnectionId(1)), Ok(()));
        lobby.begin_race(0);
        assert_eq!(
            lobby.check_can_start(ConnectionId(1)),
            Err(CoordinatorError::AlreadyStarted)
        );
    }

    #[test]
    fn solo_host_may_start() {
        let lobby = lobby_with(&[1], 8);
        assert!(lobby.all_guests_ready());
        assert_eq!(lobby.check_can_start(ConnectionId(1)), Ok(()));
    }

    #[test]
    fn begin_race_resets_roster() {
        let mut lobby = lobby_with(&[1, 2], 8);
        {
            let p = lobby.player_mut(ConnectionId(2)).unwrap();
            p.car_state.speed = 42.0;
            p.total_time = 5;
            p.lap_times = vec![5];
            p.finished = true;
            p.position = 7;
        }
        let snapshot = lobby.begin_race(1_000);
        assert!(lobby.is_started());
        assert_eq!(snapshot.start_time, 1_000);
        assert_eq!(snapshot.player_states.len(), 2);
        for (index, p) in lobby.players().iter().enumerate() {
            assert_eq!(p.car_state, CarState::spawn());
            assert!(p.lap_times.is_empty());
            assert_eq!(p.total_time, 0);
            assert!(!p.finished);
            assert_eq!(p.position as usize, index + 1);
        }
        let participants = lobby.race().unwrap().participants().to_vec();
        assert_eq!(participants, vec![ConnectionId(1), ConnectionId(2)]);
    }

    #[test]
    fn car_state_only_applies_during_race() {
        let mut lobby = lobby_with(&[1, 2], 8);
        let mut moved = CarState::spawn();
        moved.speed = 12.5;
        assert!(!lobby.apply_car_state(ConnectionId(1), moved.clone()));
        lobby.begin_race(0);
        assert!(lobby.apply_car_state(ConnectionId(1), moved.clone()));
        assert!(!lobby.apply_car_state(ConnectionId(9), moved.clone()));
        assert_eq!(lobby.player(ConnectionId(1)).unwrap().car_state, moved);
    }

    #[test]
    fn race_completes_and_reopens() {
        let mut lobby = lobby_with(&[1, 2], 8);
        lobby.player_mut(ConnectionId(2)).unwrap().is_ready = true;
        lobby.begin_race(0);

        assert_eq!(lobby.record_finish(ConnectionId(2), 95_000, vec![47_000, 48_000]), Some(1));
        assert!(lobby.try_complete_race().is_none());
        assert_eq!(lobby.record_finish(ConnectionId(2), 1, vec![]), None);
        assert_eq!(lobby.record_finish(ConnectionId(1), 90_000, vec![45_000, 45_000]), Some(2));

        let results = lobby.try_complete_race().unwrap();
        let ranked: Vec<(ConnectionId, u32)> = results.iter().map(|p| (p.id, p.position)).collect();
        assert_eq!(ranked, vec![(ConnectionId(1), 1), (ConnectionId(2), 2)]);
        assert!(lobby.is_open());
        assert!(lobby.players().iter().all(|p| !p.is_ready));
        assert_eq!(lobby.player(ConnectionId(1)).unwrap().position, 1);
        assert!(lobby.try_complete_race().is_none());
    }

    #[test]
    fn departure_mid_race_unblocks_completion() {
        let mut lobby = lobby_with(&[1, 2, 3], 8);
        lobby.begin_race(0);
        lobby.record_finish(ConnectionId(1), 100, vec![]);
        lobby.record_finish(ConnectionId(3), 120, vec![]);
        assert!(lobby.try_complete_race().is_none());

        lobby.remove_player(ConnectionId(2));
        let results = lobby.try_complete_race().unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn store_lists_public_lobbies_in_creation_order() {
        let mut store = LobbyStore::new();
        let first = lobby_with(&[1], 4);
        let first_id = first.id();
        let mut hidden_settings = settings(4);
        hidden_settings.is_public = false;
        let hidden = Lobby::new(LobbyId::new_v4(), hidden_settings, player(2));
        let hidden_id = hidden.id();
        let third = lobby_with(&[3], 4);
        let third_id = third.id();
        store.insert(first);
        store.insert(hidden);
        store.insert(third);

        let listed: Vec<LobbyId> = store.public_lobbies().iter().map(|l| l.id).collect();
        assert_eq!(listed, vec![first_id, third_id]);

        assert!(store.remove(hidden_id).is_some());
        assert!(store.get(hidden_id).is_none());
        assert_eq!(store.len(), 2);
    }
}
