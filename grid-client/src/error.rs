//! Failure taxonomy for grid operations.

use std::io;

use thiserror::Error;

/// Result type alias for grid operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the store client.
///
/// Grid-connectivity failures are not retried inside the client; retry is
/// a policy decision owned by each caller (explicit in the optimistic
/// counter strategy, absent elsewhere).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The grid could not be reached, or the connection died mid-call.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] io::Error),

    /// The peer sent something that is not part of the protocol, or an
    /// answer that does not match the request.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Unlock was called on a key this session does not hold. This is a
    /// programming error in the caller, not a transient condition.
    #[error("lock on key {key:?} is not held by this session")]
    LockNotHeld {
        /// The map key whose lock was mishandled.
        key: String,
    },

    /// The node refused the request (for example a cluster name mismatch
    /// during the session handshake).
    #[error("rejected by grid node: {reason}")]
    Rejected {
        /// The node's explanation.
        reason: String,
    },
}
