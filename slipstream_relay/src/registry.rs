// Connection registry: which connections are live, what they are called, and
// which lobby (if any) each one currently belongs to.
//
// A connection is registered once its `Hello` handshake succeeds and
// unregistered when it disconnects. The lobby mapping is the single place the
// coordinator looks up "the requester's lobby"; it is kept in step with lobby
// rosters by the coordinator, which is the only writer.

use std::collections::BTreeMap;

use slipstream_protocol::{ConnectionId, LobbyId};

struct ConnectionEntry {
    name: String,
    lobby: Option<LobbyId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection. Re-registering keeps the existing lobby
    /// mapping and only updates the name.
    pub fn connect(&mut self, id: ConnectionId, name: String) {
        self.connections
            .entry(id)
            .and_modify(|entry| entry.name.clone_from(&name))
            .or_insert(ConnectionEntry { name, lobby: None });
    }

    /// Forget a connection. Returns the lobby it was mapped to, if any.
    pub fn disconnect(&mut self, id: ConnectionId) -> Option<LobbyId> {
        self.connections.remove(&id).and_then(|entry| entry.lobby)
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn name(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id).map(|entry| entry.name.as_str())
    }

    pub fn lobby_of(&self, id: ConnectionId) -> Option<LobbyId> {
        self.connections.get(&id).and_then(|entry| entry.lobby)
    }

    /// Map a connection to a lobby. No-op for unknown connections.
    pub fn assign(&mut self, id: ConnectionId, lobby: LobbyId) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.lobby = Some(lobby);
        }
    }

    /// Clear a connection's lobby mapping, returning what it was.
    pub fn unassign(&mut self, id: ConnectionId) -> Option<LobbyId> {
        self.connections
            .get_mut(&id)
            .and_then(|entry| entry.lobby.take())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
