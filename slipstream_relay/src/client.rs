// TCP client for talking to the relay.
//
// Provides a non-blocking interface for a game loop (or a test) to
// communicate with the relay server. Architecture:
// - `connect()` performs TCP connect + Hello handshake on the calling thread,
//   then spawns a background reader thread.
// - The reader thread calls `recv()` in a loop and pushes each
//   `ServerMessage` into an `mpsc` channel.
// - The caller holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox non-blocking.
//
// The handshake consumes `Welcome` only. The public lobby list the relay
// sends right after it is the first thing `poll()` returns.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slipstream_protocol::{
    CarState, ClientMessage, ConnectionId, Difficulty, FrameError, LapRecord, LobbyId,
    PROTOCOL_VERSION, ProfilePatch, ServerMessage, Track, VehicleClass, recv, send,
};
use thiserror::Error;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unexpected handshake response: {0:?}")]
    UnexpectedResponse(Box<ServerMessage>),
}

/// TCP client for relay communication.
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: Option<JoinHandle<()>>,
    connection_id: ConnectionId,
}

impl NetClient {
    /// Connect to a relay, perform the Hello handshake with the current
    /// `PROTOCOL_VERSION`, and spawn a reader thread.
    pub fn connect(addr: &str, player_name: &str) -> Result<Self, ClientError> {
        Self::connect_with_version(addr, player_name, PROTOCOL_VERSION)
    }

    /// Like `connect`, announcing an explicit protocol version.
    pub fn connect_with_version(
        addr: &str,
        player_name: &str,
        protocol_version: u32,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(ClientError::Connect)?;
        stream
            .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .map_err(ClientError::Connect)?;

        let reader_stream = stream.try_clone().map_err(ClientError::Connect)?;
        let mut writer = BufWriter::new(stream);

        let hello = ClientMessage::Hello {
            protocol_version,
            player_name: player_name.into(),
        };
        send(&mut writer, &hello)?;

        let mut reader = BufReader::new(reader_stream);
        let connection_id = match recv::<_, ServerMessage>(&mut reader)? {
            ServerMessage::Welcome { connection_id, .. } => connection_id,
            ServerMessage::Rejected { reason } => return Err(ClientError::Rejected(reason)),
            other => return Err(ClientError::UnexpectedResponse(Box::new(other))),
        };

        // Clear read timeout for the long-lived reader loop.
        reader.get_ref().set_read_timeout(None).ok();

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, tx);
        });

        Ok(Self {
            writer,
            inbox: rx,
            _reader_thread: Some(reader_thread),
            connection_id,
        })
    }

    /// The id the relay assigned in `Welcome`.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        send(&mut self.writer, msg)?;
        Ok(())
    }

    pub fn create_lobby(
        &mut self,
        name: &str,
        max_players: u32,
        track: Track,
        difficulty: Difficulty,
        is_public: bool,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::CreateLobby {
            name: name.into(),
            max_players,
            track,
            difficulty,
            is_public,
        })
    }

    pub fn join_lobby(&mut self, lobby_id: LobbyId) -> Result<(), ClientError> {
        self.send(&ClientMessage::JoinLobby { lobby_id })
    }

    pub fn leave_lobby(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::LeaveLobby)
    }

    pub fn set_ready(&mut self, is_ready: bool) -> Result<(), ClientError> {
        self.send(&ClientMessage::SetReady { is_ready })
    }

    pub fn select_vehicle(&mut self, vehicle: VehicleClass) -> Result<(), ClientError> {
        self.send(&ClientMessage::SelectVehicle { vehicle })
    }

    /// Host only.
    pub fn start_race(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::StartRace)
    }

    pub fn update_car_state(&mut self, state: CarState) -> Result<(), ClientError> {
        self.send(&ClientMessage::UpdateCarState { state })
    }

    pub fn finish_race(
        &mut self,
        final_time: u64,
        lap_times: Vec<u64>,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::FinishRace {
            final_time,
            lap_times,
        })
    }

    pub fn get_leaderboard(
        &mut self,
        track: Track,
        difficulty: Difficulty,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::GetLeaderboard { track, difficulty })
    }

    pub fn submit_lap_record(&mut self, record: LapRecord) -> Result<(), ClientError> {
        self.send(&ClientMessage::SubmitLapRecord { record })
    }

    pub fn get_profile(&mut self, profile_id: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::GetProfile {
            profile_id: profile_id.into(),
        })
    }

    pub fn update_profile(
        &mut self,
        profile_id: &str,
        patch: ProfilePatch,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::UpdateProfile {
            profile_id: profile_id.into(),
            patch,
        })
    }

    /// Send Goodbye. The relay closes the connection in response.
    pub fn disconnect(&mut self) {
        let _ = send(&mut self.writer, &ClientMessage::Goodbye);
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&mut self) -> Vec<ServerMessage> {
        self.inbox.try_iter().collect()
    }
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(msg) = recv::<_, ServerMessage>(&mut reader) {
        if tx.send(msg).is_err() {
            break; // Caller dropped the client.
        }
    }
}
