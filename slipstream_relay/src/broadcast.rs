// Fan-out layer between the coordinator and client connections.
//
// `Broadcast` knows who to send to: every subscribed connection (for the
// public lobby list) and one group per lobby (for lobby and race traffic).
// It hands each individual delivery to an `Outbox`, which knows how to send:
// `TcpOutbox` in `server.rs` writes framed JSON to sockets, `MemoryOutbox`
// here records messages for tests and for embedding the coordinator without
// networking.
//
// Delivery is best-effort. Outboxes swallow per-connection write failures;
// a dead socket is reported separately by its reader thread.

use std::collections::{BTreeSet, HashMap};

use slipstream_protocol::{ConnectionId, LobbyId, ServerMessage};

/// Per-connection delivery backend.
pub trait Outbox {
    /// Deliver one message to one connection. Unknown connections are
    /// ignored.
    fn deliver(&mut self, to: ConnectionId, msg: &ServerMessage);
}

pub struct Broadcast<O> {
    outbox: O,
    subscribers: BTreeSet<ConnectionId>,
    groups: HashMap<LobbyId, BTreeSet<ConnectionId>>,
}

impl<O: Outbox> Broadcast<O> {
    pub fn new(outbox: O) -> Self {
        Self {
            outbox,
            subscribers: BTreeSet::new(),
            groups: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, id: ConnectionId) {
        self.subscribers.insert(id);
    }

    /// Drop a connection from the subscriber set and from every group.
    pub fn unsubscribe(&mut self, id: ConnectionId) {
        self.subscribers.remove(&id);
        self.groups.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    pub fn join_group(&mut self, lobby: LobbyId, id: ConnectionId) {
        self.groups.entry(lobby).or_default().insert(id);
    }

    pub fn leave_group(&mut self, lobby: LobbyId, id: ConnectionId) {
        if let Some(members) = self.groups.get_mut(&lobby) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(&lobby);
            }
        }
    }

    pub fn close_group(&mut self, lobby: LobbyId) {
        self.groups.remove(&lobby);
    }

    pub fn group_members(&self, lobby: LobbyId) -> Vec<ConnectionId> {
        self.groups
            .get(&lobby)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn send_to(&mut self, id: ConnectionId, msg: &ServerMessage) {
        self.outbox.deliver(id, msg);
    }

    pub fn send_to_lobby(&mut self, lobby: LobbyId, msg: &ServerMessage) {
        self.fan_out(lobby, None, msg);
    }

    /// Send to every lobby member except `except` (used for relays that must
    /// not echo back to their sender).
    pub fn send_to_lobby_except(
        &mut self,
        lobby: LobbyId,
        except: ConnectionId,
        msg: &ServerMessage,
    ) {
        self.fan_out(lobby, Some(except), msg);
    }

    pub fn send_to_everyone(&mut self, msg: &ServerMessage) {
        for id in &self.subscribers {
            self.outbox.deliver(*id, msg);
        }
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut O {
        &mut self.outbox
    }

    fn fan_out(&mut self, lobby: LobbyId, except: Option<ConnectionId>, msg: &ServerMessage) {
        let Some(members) = self.groups.get(&lobby) else {
            return;
        };
        for id in members {
            if Some(*id) != except {
                self.outbox.deliver(*id, msg);
            }
        }
    }
}

/// Outbox that records every delivery in order.
#[derive(Default)]
pub struct MemoryOutbox {
    sent: Vec<(ConnectionId, ServerMessage)>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered to `id`, oldest first.
    pub fn sent_to(&self, id: ConnectionId) -> Vec<&ServerMessage> {
        self.sent
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, msg)| msg)
            .collect()
    }

    pub fn all(&self) -> &[(ConnectionId, ServerMessage)] {
        &self.sent
    }

    /// Drain everything recorded so far.
    pub fn take(&mut self) -> Vec<(ConnectionId, ServerMessage)> {
        std::mem::take(&mut self.sent)
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Outbox for MemoryOutbox {
    fn deliver(&mut self, to: ConnectionId, msg: &ServerMessage) {
        self.sent.push((to, msg.clone()));
    }
}
