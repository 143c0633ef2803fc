//! A tick-driven implementation of the [Raft](https://raft.github.io/)
//! distributed consensus protocol. Raft is described as:
//!
//! > Raft is a consensus algorithm that is designed to be easy to
//! > understand. It's equivalent to Paxos in fault-tolerance and
//! > performance. The difference is that it's decomposed into relatively
//! > independent subproblems, and it cleanly addresses all major pieces
//! > needed for practical systems.
//!
//! The heart of the crate is [`Consensus`](core::Consensus), a passive
//! state machine covering leader election, log replication, and commit
//! tracking for a fixed-membership cluster. It performs no I/O and owns no
//! threads: the host supplies storage for the persistent state
//! ([`storage::PersistentState`]) and the log ([`log::Log`]), a component
//! that applies committed entries ([`committer::Committer`]), and an
//! outbound transport ([`rpc::RpcEgress`]), then drives the module with a
//! periodic tick and with every RPC and reply it receives. Because the
//! module never samples a clock or randomness of its own, whole clusters
//! can be simulated deterministically in tests.
//!
//! [`Node`](node::Node) wraps the module in a processing thread with a
//! real ticker for hosts that just want a running server.

#[macro_use]
mod macros;

pub mod candidate;
pub mod committer;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod replication;
pub mod rpc;
pub mod storage;
pub mod timer;

pub use crate::core::{Consensus, Role};
pub use crate::error::{AppendCommandError, RaftError, RaftResult};
pub use crate::message::{Command, LogEntry, LogIndex, ServerId, TermNo};
