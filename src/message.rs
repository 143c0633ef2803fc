//! Scalar and RPC message types exchanged between Raft servers.
//!
//! This module provides the data types for the messages sent between Raft
//! servers. The field sets match the Raft paper; the wire encoding is left to
//! the host, which is why every type here derives `serde` traits rather than
//! committing to a particular format.

use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroU64;
use std::ops::{Add, AddAssign, Sub};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The unique ID of a server in a Raft cluster.
///
/// IDs are opaque to the consensus module; equality is the only operation it
/// performs on them. Zero is reserved and never names a server.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ServerId(NonZeroU64);

/// The number of a term of Raft leadership.
///
/// Terms increase monotonically; a value of `0` means "no term" (e.g. the
/// term of the entry before an empty log).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct TermNo(pub u64);

/// A 1-based index into the Raft log.
///
/// An index of `0` refers to the position before the first entry.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct LogIndex(pub u64);

/// A state machine command.
///
/// The contents are opaque to the consensus module.
pub type Command = Bytes;

/// An entry in the Raft log: the term of the leader that created it and the
/// command to apply to the state machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogEntry {
    pub term: TermNo,
    pub command: Command,
}

/// A RequestVote RPC, sent by candidates to gather votes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestVote {
    /// The candidate's term.
    pub term: TermNo,
    /// The index of the last entry in the candidate's log.
    pub last_log_index: LogIndex,
    /// The term of the last entry in the candidate's log.
    pub last_log_term: TermNo,
}

/// The reply to a [`RequestVote`] RPC.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestVoteReply {
    /// The receiver's current term, for the candidate to update itself.
    pub term: TermNo,
    /// Whether the receiver granted its vote.
    pub vote_granted: bool,
}

/// An AppendEntries RPC, sent by the leader to replicate log entries; an
/// empty `entries` list serves as a heartbeat.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppendEntries {
    /// The leader's term.
    pub term: TermNo,
    /// The index of the log entry immediately preceding `entries`.
    pub prev_log_index: LogIndex,
    /// The term of the entry at `prev_log_index`, or `0` if it is `0`.
    pub prev_log_term: TermNo,
    /// Consecutive entries to store, starting at `prev_log_index + 1`.
    pub entries: Vec<LogEntry>,
    /// The leader's commit index.
    pub leader_commit: LogIndex,
}

/// The reply to an [`AppendEntries`] RPC.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppendEntriesReply {
    /// The receiver's current term, for the leader to update itself.
    pub term: TermNo,
    /// Whether the follower's log matched `prev_log_index`/`prev_log_term`
    /// and the entries were stored.
    pub success: bool,
}

//
// ServerId impls
//

impl ServerId {
    /// Constructs a `ServerId` from a raw integer, or `None` if `id` is zero.
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    /// Returns the raw integer for this ID.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, fmt)
    }
}

//
// TermNo impls
//

impl fmt::Display for TermNo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(term) = self;
        fmt.debug_tuple("Term").field(term).finish()
    }
}

impl PartialOrd for TermNo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermNo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for TermNo {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self(self.0.checked_add(inc).unwrap_or_else(|| panic!("term overflow")))
    }
}

impl AddAssign<u64> for TermNo {
    fn add_assign(&mut self, inc: u64) {
        *self = *self + inc;
    }
}

//
// LogIndex impls
//

impl LogIndex {
    /// Subtraction checking for underflow. Returns `self - dec`, or `None`
    /// if the result would precede index `0`.
    pub fn checked_sub(self, dec: u64) -> Option<Self> {
        self.0.checked_sub(dec).map(Self)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(index) = self;
        fmt.debug_tuple("LogIdx").field(index).finish()
    }
}

impl PartialOrd for LogIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for LogIndex {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self(self.0.checked_add(inc).unwrap_or_else(|| panic!("log index overflow")))
    }
}

impl Sub<u64> for LogIndex {
    type Output = Self;
    fn sub(self, dec: u64) -> Self {
        Self(self.0.saturating_sub(dec))
    }
}

//
// RPC Display impls
//

impl fmt::Display for RequestVote {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            term,
            last_log_index,
            last_log_term,
        } = self;
        fmt.debug_struct("RequestVote")
            .field("term", &format_args!("{}", term))
            .field("last_log_index", &format_args!("{}", last_log_index))
            .field("last_log_term", &format_args!("{}", last_log_term))
            .finish()
    }
}

impl fmt::Display for RequestVoteReply {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { term, vote_granted } = self;
        fmt.debug_struct("RequestVoteReply")
            .field("term", &format_args!("{}", term))
            .field("vote_granted", vote_granted)
            .finish()
    }
}

impl fmt::Display for AppendEntries {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } = self;
        fmt.debug_struct("AppendEntries")
            .field("term", &format_args!("{}", term))
            .field("prev_log_index", &format_args!("{}", prev_log_index))
            .field("prev_log_term", &format_args!("{}", prev_log_term))
            .field("entries", &entries.len())
            .field("leader_commit", &format_args!("{}", leader_commit))
            .finish()
    }
}

impl fmt::Display for AppendEntriesReply {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { term, success } = self;
        fmt.debug_struct("AppendEntriesReply")
            .field("term", &format_args!("{}", term))
            .field("success", success)
            .finish()
    }
}
