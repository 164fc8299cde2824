// Per-lobby race session: who is racing, in what order they finished, and
// when the race began.
//
// A `RaceSession` never owns player records. Car state, lap times and
// finish flags live on the lobby's `Player` entries; the session only holds
// participant ids, so there is exactly one copy of each racer. It is created
// when the countdown reaches zero (see `Lobby::begin_race`) and discarded once
// the results are out.
//
// Finish order is tracked separately from the final ranking: the provisional
// position handed out on `record_finish` is the finish order, and the final
// ranking (`rank_results`) sorts by total time, keeping finish order between
// equal times.

use slipstream_protocol::{ConnectionId, LobbyId, Player, RaceSnapshot};

#[derive(Debug)]
pub struct RaceSession {
    lobby_id: LobbyId,
    start_time: u64,
    active: bool,
    participants: Vec<ConnectionId>,
    finish_order: Vec<ConnectionId>,
    race_time: u64,
}

impl RaceSession {
    /// Start a session for `participants` (roster order). `start_time` is
    /// unix milliseconds.
    pub fn new(lobby_id: LobbyId, participants: Vec<ConnectionId>, start_time: u64) -> Self {
        Self {
            lobby_id,
            start_time,
            active: true,
            participants,
            finish_order: Vec::new(),
            race_time: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn participants(&self) -> &[ConnectionId] {
        &self.participants
    }

    pub fn is_participant(&self, id: ConnectionId) -> bool {
        self.participants.contains(&id)
    }

    pub fn finish_order(&self) -> &[ConnectionId] {
        &self.finish_order
    }

    /// Slowest finishing time reported so far.
    pub fn race_time(&self) -> u64 {
        self.race_time
    }

    /// Record a participant crossing the line. Returns the provisional
    /// position (finish order, 1-based), or `None` if the session is over,
    /// `id` is not racing, or `id` already finished.
    pub fn record_finish(&mut self, id: ConnectionId, total_time: u64) -> Option<u32> {
        if !self.active || !self.is_participant(id) || self.finish_order.contains(&id) {
            return None;
        }
        self.finish_order.push(id);
        self.race_time = self.race_time.max(total_time);
        Some(rank(self.finish_order.len()))
    }

    /// Remove a participant who left mid-race. Returns true if they were
    /// racing.
    pub fn drop_participant(&mut self, id: ConnectionId) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| *p != id);
        self.finish_order.retain(|p| *p != id);
        self.participants.len() != before
    }

    /// True once every remaining participant has finished.
    pub fn is_complete(&self) -> bool {
        self.active
            && !self.participants.is_empty()
            && self.finish_order.len() == self.participants.len()
    }

    pub fn conclude(&mut self) {
        self.active = false;
    }

    /// Snapshot with one entry per participant, taken from `roster`.
    pub fn snapshot(&self, roster: &[Player]) -> RaceSnapshot {
        let player_states = self
            .participants
            .iter()
            .filter_map(|id| roster.iter().find(|p| p.id == *id))
            .cloned()
            .collect();
        RaceSnapshot {
            lobby_id: self.lobby_id,
            start_time: self.start_time,
            is_active: self.active,
            player_states,
            race_time: self.race_time,
        }
    }
}

/// Final standings: sort finishers (given in finish order) by ascending total
/// time and assign positions 1..N. The sort is stable, so equal times keep
/// their finish order.
pub fn rank_results(mut finishers: Vec<Player>) -> Vec<Player> {
    finishers.sort_by_key(|p| p.total_time);
    for (index, player) in finishers.iter_mut().enumerate() {
        player.position = rank(index + 1);
    }
    finishers
}

fn rank(ordinal: usize) -> u32 {
    u32::try_from(ordinal).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use slipstream_protocol::{CarState, VehicleClass};

    use super::*;

    fn finisher(id: u32, total_time: u64) -> Player {
        Player {
            id: ConnectionId(id),
            name: format!("P{id}"),
            vehicle: VehicleClass::Balanced,
            car_state: CarState::spawn(),
            color: "#FFFFFF".into(),
            is_ready: true,
            position: 0,
            lap_times: vec![],
            total_time,
            finished: true,
        }
    }

    fn session(ids: &[u32]) -> RaceSession {
        RaceSession::new(
            LobbyId::new_v4(),
            ids.iter().map(|id| ConnectionId(*id)).collect(),
            0,
        )
    }

    #[test]
    fn provisional_position_is_finish_order() {
        let mut race = session(&[1, 2, 3]);
        assert_eq!(race.record_finish(ConnectionId(2), 100), Some(1));
        assert_eq!(race.record_finish(ConnectionId(1), 90), Some(2));
        assert!(!race.is_complete());
        assert_eq!(race.record_finish(ConnectionId(3), 120), Some(3));
        assert!(race.is_complete());
        assert_eq!(race.race_time(), 120);
    }

    #[test]
    fn duplicate_and_foreign_finishes_ignored() {
        let mut race = session(&[1, 2]);
        assert_eq!(race.record_finish(ConnectionId(1), 100), Some(1));
        assert_eq!(race.record_finish(ConnectionId(1), 50), None);
        assert_eq!(race.record_finish(ConnectionId(9), 50), None);
        assert_eq!(race.finish_order(), &[ConnectionId(1)]);
    }

    #[test]
    fn concluded_session_rejects_finishes() {
        let mut race = session(&[1]);
        race.conclude();
        assert_eq!(race.record_finish(ConnectionId(1), 10), None);
        assert!(!race.is_complete());
    }

    #[test]
    fn dropping_unfinished_racer_can_complete_race() {
        let mut race = session(&[1, 2]);
        race.record_finish(ConnectionId(1), 100);
        assert!(!race.is_complete());
        assert!(race.drop_participant(ConnectionId(2)));
        assert!(race.is_complete());
        assert!(!race.drop_participant(ConnectionId(2)));
    }

    #[test]
    fn ranking_sorts_by_time_and_keeps_finish_order_on_ties() {
        let finishers = vec![finisher(3, 200), finisher(1, 100), finisher(2, 200)];
        let ranked = rank_results(finishers);
        let order: Vec<(u32, u32)> = ranked.iter().map(|p| (p.id.0, p.position)).collect();
        assert_eq!(order, vec![(1, 1), (3, 2), (2, 3)]);
    }

    #[test]
    fn snapshot_lists_participants_in_roster_order() {
        let race = session(&[2, 1]);
        let roster = vec![finisher(1, 0), finisher(2, 0), finisher(5, 0)];
        let snapshot = race.snapshot(&roster);
        let ids: Vec<ConnectionId> = snapshot.player_states.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![ConnectionId(2), ConnectionId(1)]);
        assert!(snapshot.is_active);
    }
}
