//! Error taxonomy shared by every layer of the bridge.
//!
//! None of these errors are retried by the bridge itself. A failed call leaves the adapter
//! exactly as it was before the call, except where the server partially applied a command
//! before replying with an error.

use thiserror::Error;

use crate::protocol::{Action, AgentId};

/// Errors returned by the transport, the RPC client and the environment adapters.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The socket could not be established or broke while a command was in flight.
    ///
    /// Fatal to the current session: the connection is torn down and a fresh
    /// `connect` + `reset` is needed to continue.
    #[error("connection error: {0}")]
    Connection(String),

    /// A command was issued before `connect` (or after `close`).
    #[error("not connected: call connect() first")]
    NotConnected,

    /// The server understood the command but replied with an `error` field.
    #[error("server error: {0}")]
    Server(String),

    /// The reply did not have the expected shape (usually a protocol version mismatch).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The agent is not part of the possible agents cached at connect time.
    #[error("unknown agent '{0}'")]
    UnknownAgent(AgentId),

    /// A space descriptor violates the discrete/box invariants.
    #[error("invalid space descriptor: {0}")]
    InvalidSpace(String),

    /// The action was rejected client-side by the agent's action mask.
    #[error("action {action} is masked out for agent '{agent}'")]
    IllegalAction {
        /// Agent that was about to act
        agent: AgentId,
        /// Rejected action
        action: Action,
    },

    /// A parallel step was given no action for an agent that is still alive.
    #[error("no action supplied for live agent '{0}'")]
    MissingAction(AgentId),
}

impl BridgeError {
    pub(crate) fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn invalid_space(msg: impl Into<String>) -> Self {
        Self::InvalidSpace(msg.into())
    }

    /// True for errors after which the session cannot continue without reconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::NotConnected | Self::Protocol(_)
        )
    }
}

/// Result type used across the bridge.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_is_kept_verbatim() {
        let err = BridgeError::Server("invalid action".to_string());
        assert_eq!(err.to_string(), "server error: invalid action");
        assert!(!err.is_fatal());
    }

    #[test]
    fn connection_errors_are_fatal() {
        assert!(BridgeError::connection("reset by peer").is_fatal());
        assert!(BridgeError::NotConnected.is_fatal());
        assert!(BridgeError::protocol("missing field").is_fatal());
        assert!(!BridgeError::MissingAction("player_0".into()).is_fatal());
    }
}
