// Request rejection reasons.
//
// Every variant is recoverable: the coordinator reports it to the requesting
// connection as `ServerMessage::Error { message }` (the `Display` text) and
// keeps the connection open. Out-of-context requests (car state with no race
// running, finishing twice, ...) are not errors at all; they are dropped
// silently before reaching this type.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The referenced lobby or profile does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The requester lacks the role the operation needs.
    #[error("Only the host can start the race")]
    Forbidden,

    #[error("Lobby is full")]
    LobbyFull,

    #[error("Race already started")]
    AlreadyStarted,

    /// A guest has not readied up.
    #[error("Not all players are ready")]
    NotReady,
}

impl CoordinatorError {
    pub const LOBBY_NOT_FOUND: CoordinatorError = CoordinatorError::NotFound("Lobby");
    pub const PROFILE_NOT_FOUND: CoordinatorError = CoordinatorError::NotFound("Profile");
}
