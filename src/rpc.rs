//! Outbound RPC.

use anyhow::Result;

use crate::message::{AppendEntries, RequestVote, ServerId};

/// The send-only half of the RPC transport.
///
/// Sends are fire-and-forget: the consensus module never waits for a reply.
/// The host delivers any reply that does arrive back into the module,
/// matched with the RPC it answers, through
/// [`receive_append_entries_reply`][crate::core::Consensus::receive_append_entries_reply]
/// and
/// [`receive_request_vote_reply`][crate::core::Consensus::receive_request_vote_reply].
///
/// Implementations must not block; queue the message and return. Any error
/// stops the consensus module.
pub trait RpcEgress {
    /// Sends an AppendEntries RPC to the server with ID `to`.
    fn send_append_entries(&mut self, to: ServerId, rpc: AppendEntries) -> Result<()>;

    /// Sends a RequestVote RPC to the server with ID `to`.
    fn send_request_vote(&mut self, to: ServerId, rpc: RequestVote) -> Result<()>;
}
