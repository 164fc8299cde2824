// End-to-end integration tests for the racing pipeline.
//
// Each test starts a real relay server, connects real NetClient instances
// (via TestRacer), and verifies the full path:
// connect → lobby → ready → countdown → race → car-state relay → results.
//
// These tests exercise the same code paths as a live client; the only
// test-specific code is the synchronous polling wrappers in TestRacer.

use std::thread;
use std::time::Duration;

use slipstream_protocol::{
    CarState, ClientMessage, ConnectionId, Difficulty, LapRecord, LobbyInfo, ProfilePatch,
    ServerMessage, Track, VehicleClass,
};
use multiplayer_tests::TestRacer;
use slipstream_relay::{CountdownConfig, RelayConfig, RelayHandle, start_relay};

/// Countdown step for tests. Short enough for fast tests, long enough for
/// the relay's timer wait to be exercised.
const TEST_COUNTDOWN_INTERVAL: Duration = Duration::from_millis(20);

fn start_test_relay() -> (RelayHandle, std::net::SocketAddr) {
    let config = RelayConfig {
        port: 0,
        countdown: CountdownConfig {
            from: 3,
            interval: TEST_COUNTDOWN_INTERVAL,
        },
        ..RelayConfig::default()
    };
    let (handle, addr) = start_relay(config).unwrap();
    thread::sleep(Duration::from_millis(50));
    (handle, addr)
}

/// Start a relay, connect a host and a joiner, put both in one lobby with
/// the joiner ready.
fn start_test_lobby(
    max_players: u32,
) -> (RelayHandle, std::net::SocketAddr, TestRacer, TestRacer) {
    let (handle, addr) = start_test_relay();
    let mut host = TestRacer::connect(addr, "Host");
    let mut joiner = TestRacer::connect(addr, "Joiner");

    let lobby_id = host.create_lobby(max_players, true);
    joiner.join(lobby_id);
    joiner.set_ready(true);
    host.poll_until_lobby(all_guests_ready);

    (handle, addr, host, joiner)
}

fn all_guests_ready(lobby: &LobbyInfo) -> bool {
    lobby
        .players
        .iter()
        .all(|p| p.is_ready || p.id == lobby.host_id)
}

/// Host starts; both racers poll through the countdown to the start line.
fn start_race(host: &mut TestRacer, joiner: &mut TestRacer) {
    host.start_race();
    host.poll_until_race_started();
    joiner.poll_until_race_started();
}

// ---------------------------------------------------------------------------
// Test scenarios
// ---------------------------------------------------------------------------

/// Two players race to the finish: countdown, start at spawn, ranked results,
/// lobby reset afterwards.
#[test]
fn two_player_race() {
    let (handle, _addr, mut host, mut joiner) = start_test_lobby(2);
    start_race(&mut host, &mut joiner);

    for racer in [&host, &joiner] {
        assert_eq!(racer.countdowns, vec![3, 2, 1, 0]);
        let race = racer.race.as_ref().unwrap();
        assert_eq!(race.player_states.len(), 2);
        assert!(
            race.player_states
                .iter()
                .all(|p| p.car_state == CarState::spawn() && !p.finished)
        );
    }

    host.finish(90_000, vec![45_000, 45_000]);
    joiner.finish(95_000, vec![47_000, 48_000]);

    let host_results = host.poll_until_results();
    let joiner_results = joiner.poll_until_results();
    assert_eq!(host_results, joiner_results);
    assert_eq!(host_results[0].id, host.id());
    assert_eq!(host_results[0].position, 1);
    assert_eq!(host_results[1].id, joiner.id());
    assert_eq!(host_results[1].position, 2);
    assert_eq!(host_results[1].lap_times, vec![47_000, 48_000]);

    let lobby = joiner.poll_until_lobby(|lobby| !lobby.is_started);
    assert!(lobby.players.iter().all(|p| !p.is_ready));

    host.disconnect();
    joiner.disconnect();
    handle.stop();
}

/// Car state flows both ways during a race and is never echoed back.
#[test]
fn car_state_relay() {
    let (handle, _addr, mut host, mut joiner) = start_test_lobby(2);
    start_race(&mut host, &mut joiner);

    let mut host_car = CarState::spawn();
    host_car.speed = 55.0;
    host_car.position.x = 3.0;
    let mut joiner_car = CarState::spawn();
    joiner_car.speed = 61.0;
    joiner_car.current_lap = 1;

    host.drive(host_car.clone());
    joiner.drive(joiner_car.clone());

    assert_eq!(joiner.poll_until_opponent_state(host.id()), host_car);
    assert_eq!(host.poll_until_opponent_state(joiner.id()), joiner_car);

    // Give any stray echo time to arrive before checking.
    thread::sleep(Duration::from_millis(50));
    host.poll_raw();
    joiner.poll_raw();
    assert!(!host.opponents.contains_key(&host.id()));
    assert!(!joiner.opponents.contains_key(&joiner.id()));

    host.disconnect();
    joiner.disconnect();
    handle.stop();
}

/// A racer who disconnects mid-race does not keep the others waiting.
#[test]
fn mid_race_disconnect_completes_race() {
    let (handle, addr, mut host, mut joiner) = start_test_lobby(4);
    let mut quitter = TestRacer::connect(addr, "Quitter");
    let lobby_id = host.lobby.as_ref().unwrap().id;
    quitter.join(lobby_id);
    quitter.set_ready(true);
    host.poll_until_lobby(|lobby| lobby.players.len() == 3 && all_guests_ready(lobby));

    host.start_race();
    for racer in [&mut host, &mut joiner, &mut quitter] {
        racer.poll_until_race_started();
    }

    host.finish(80_000, vec![40_000, 40_000]);
    joiner.finish(82_000, vec![41_000, 41_000]);
    let quitter_id = quitter.id();
    quitter.disconnect();

    let results = host.poll_until_results();
    let ids: Vec<ConnectionId> = results.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![host.id(), joiner.id()]);
    assert!(!ids.contains(&quitter_id));

    host.disconnect();
    joiner.disconnect();
    handle.stop();
}

/// Host leaves (by disconnect, then by LeaveLobby); host passes down the
/// roster and the last departure removes the lobby from the public list.
#[test]
fn host_transfer_and_lobby_teardown() {
    let (handle, addr) = start_test_relay();
    let mut host = TestRacer::connect(addr, "H");
    let mut a = TestRacer::connect(addr, "A");
    let mut b = TestRacer::connect(addr, "B");

    let lobby_id = host.create_lobby(4, true);
    a.join(lobby_id);
    b.join(lobby_id);

    host.disconnect();
    let a_id = a.id();
    let lobby = b.poll_until_lobby(|lobby| lobby.host_id == a_id);
    assert_eq!(lobby.players.len(), 2);

    a.leave();
    let b_id = b.id();
    let lobby = b.poll_until_lobby(|lobby| lobby.host_id == b_id);
    assert_eq!(lobby.players.len(), 1);

    b.leave();
    a.poll_until("empty LobbyList", |msg| match msg {
        ServerMessage::LobbyList { lobbies } if lobbies.is_empty() => Some(()),
        _ => None,
    });
    assert_eq!(a.join_expecting_error(lobby_id), "Lobby not found");

    a.disconnect();
    b.disconnect();
    handle.stop();
}

/// Capacity and role checks surface as errors without dropping the client.
#[test]
fn lobby_rules_enforced() {
    let (handle, addr, mut host, mut joiner) = start_test_lobby(2);
    let lobby_id = host.lobby.as_ref().unwrap().id;

    let mut late = TestRacer::connect(addr, "Late");
    assert_eq!(late.join_expecting_error(lobby_id), "Lobby is full");

    joiner.start_race();
    assert_eq!(joiner.poll_until_error(), "Only the host can start the race");

    joiner.set_ready(false);
    host.start_race();
    assert_eq!(host.poll_until_error(), "Not all players are ready");

    // The refused client is still connected and can host its own lobby.
    late.create_lobby(4, false);

    host.disconnect();
    joiner.disconnect();
    late.disconnect();
    handle.stop();
}

/// Vehicle choice is visible to the rest of the lobby.
#[test]
fn vehicle_selection_broadcast() {
    let (handle, _addr, mut host, mut joiner) = start_test_lobby(2);
    let joiner_id = joiner.id();

    joiner.send(ClientMessage::SelectVehicle {
        vehicle: VehicleClass::Speedster,
    });
    let lobby = host.poll_until_lobby(|lobby| {
        lobby
            .players
            .iter()
            .any(|p| p.id == joiner_id && p.vehicle == VehicleClass::Speedster)
    });
    assert_eq!(lobby.players.len(), 2);

    host.disconnect();
    joiner.disconnect();
    handle.stop();
}

/// Leaderboard and profile requests over the same connection.
#[test]
fn records_over_the_wire() {
    let (handle, addr) = start_test_relay();
    let mut racer = TestRacer::connect(addr, "Archivist");

    for (name, lap_time) in [("slow", 52_000), ("fast", 48_000), ("mid", 50_000)] {
        racer.send(ClientMessage::SubmitLapRecord {
            record: LapRecord {
                player_name: name.into(),
                track: Track::Mountain,
                difficulty: Difficulty::Hard,
                lap_time,
                total_time: lap_time * 3,
                vehicle: VehicleClass::Balanced,
            },
        });
    }
    racer.send(ClientMessage::GetLeaderboard {
        track: Track::Mountain,
        difficulty: Difficulty::Hard,
    });
    let entries = racer.poll_until("full LeaderboardUpdate", |msg| match msg {
        ServerMessage::LeaderboardUpdate { entries, .. } if entries.len() == 3 => {
            Some(entries.clone())
        }
        _ => None,
    });
    let names: Vec<&str> = entries.iter().map(|e| e.player_name.as_str()).collect();
    assert_eq!(names, vec!["fast", "mid", "slow"]);

    racer.send(ClientMessage::GetProfile {
        profile_id: "racer-42".into(),
    });
    assert_eq!(racer.poll_until_error(), "Profile not found");

    racer.send(ClientMessage::UpdateProfile {
        profile_id: "racer-42".into(),
        patch: ProfilePatch {
            wins: Some(3),
            ..ProfilePatch::default()
        },
    });
    racer.send(ClientMessage::GetProfile {
        profile_id: "racer-42".into(),
    });
    let profile = racer.poll_until("Profile with wins", |msg| match msg {
        ServerMessage::Profile { profile } if profile.wins == 3 => Some(profile.clone()),
        _ => None,
    });
    assert_eq!(profile.name, "Player race");
    assert_eq!(profile.level, 1);

    racer.disconnect();
    handle.stop();
}
