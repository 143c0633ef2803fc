//! Error types exposed by this crate.

/// A result type where the error variant is always a [`RaftError`].
pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// A fault that stops the consensus module.
///
/// Protocol-level rejections (a refused vote, a failed log-match check, a
/// command submitted to a non-leader) are ordinary return values and never
/// produce a `RaftError`. Once any operation has returned a `RaftError` the
/// module must not be called again without reloading persistent state.
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    /// An error returned by a collaborator: the persistent state store, the
    /// log, the committer, or the RPC egress. Surfaced unchanged.
    #[error("{0}")]
    Collaborator(anyhow::Error),

    /// A Raft invariant no longer holds. This indicates a bug in the host
    /// wiring or a corrupted store and is not recoverable in-process.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl From<anyhow::Error> for RaftError {
    fn from(err: anyhow::Error) -> Self {
        Self::Collaborator(err)
    }
}

/// An error returned from [`Consensus::append_command`][crate::core::Consensus::append_command].
#[derive(Debug, thiserror::Error)]
pub enum AppendCommandError {
    /// This server is not currently the leader; the command was not
    /// appended. Resubmit to the current leader.
    #[error("not the leader")]
    NotLeader,

    /// The append failed with a fault; see [`RaftError`].
    #[error(transparent)]
    Raft(#[from] RaftError),
}
