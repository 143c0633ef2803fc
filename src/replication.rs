//! Volatile state of a leader: per-peer replication progress.

use std::collections::BTreeMap;

use log::debug;

use crate::config::ClusterInfo;
use crate::error::{RaftError, RaftResult};
use crate::message::{LogIndex, ServerId};

/// A callback invoked after a [`WatchedIndex`] changes, with the new value.
pub type IndexChangeListener = Box<dyn FnMut(LogIndex) + Send>;

/// A callback that may veto a [`WatchedIndex`] change.
///
/// Invoked with the old and new values before any listener runs; an error is
/// treated as a fatal invariant violation.
pub type IndexChangeVerifier = Box<dyn FnMut(LogIndex, LogIndex) -> Result<(), String> + Send>;

/// A [`LogIndex`] whose changes can be observed.
///
/// A single optional verifier may reject a change; any number of listeners
/// are called in registration order after every accepted change.
#[derive(Default)]
pub struct WatchedIndex {
    value: LogIndex,
    verifier: Option<IndexChangeVerifier>,
    listeners: Vec<IndexChangeListener>,
}

impl WatchedIndex {
    /// Constructs a `WatchedIndex` with value `0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value.
    pub fn get(&self) -> LogIndex {
        self.value
    }

    /// Installs the verifier called before every change.
    pub fn set_verifier(&mut self, verifier: IndexChangeVerifier) {
        self.verifier = Some(verifier);
    }

    /// Adds a listener called after every change.
    pub fn add_listener(&mut self, listener: IndexChangeListener) {
        self.listeners.push(listener);
    }

    /// Sets the value, running the verifier and then the listeners.
    ///
    /// # Errors
    ///
    /// A rejection from the verifier is fatal; the listeners are not called.
    pub fn set(&mut self, new: LogIndex) -> RaftResult<()> {
        let old = self.value;
        self.value = new;
        if let Some(verifier) = &mut self.verifier {
            verifier(old, new).map_err(|message| RaftError::InvariantViolated(message))?;
        }
        for listener in &mut self.listeners {
            listener(new);
        }
        Ok(())
    }
}

/// Per-peer replication state, created on conversion to leader and discarded
/// on exit from leader state.
///
/// For every peer the leader tracks `next_index`, the index of the next log
/// entry to send, and `match_index`, the highest index known to be
/// replicated there. `match_index` is a [`WatchedIndex`] so a host can
/// observe replication progress; the consensus module itself recomputes the
/// commit index as a post-action after every mutation here.
pub struct LeaderVolatileState {
    next_index: BTreeMap<ServerId, LogIndex>,
    match_index: BTreeMap<ServerId, WatchedIndex>,
}

impl LeaderVolatileState {
    /// Constructs leader state for a fresh term of leadership.
    ///
    /// For every peer, `next_index` starts just past the leader's last log
    /// entry and `match_index` starts at `0` (Raft §5.3).
    pub fn new(cluster_info: &ClusterInfo, index_of_last_entry: LogIndex) -> Self {
        let next_index = cluster_info
            .peer_ids()
            .map(|peer| (peer, index_of_last_entry + 1))
            .collect();
        let match_index = cluster_info
            .peer_ids()
            .map(|peer| (peer, WatchedIndex::new()))
            .collect();
        Self {
            next_index,
            match_index,
        }
    }

    /// Returns the index of the next log entry to send to `peer`.
    pub fn next_index(&self, peer: ServerId) -> RaftResult<LogIndex> {
        match self.next_index.get(&peer) {
            Some(&next_index) => Ok(next_index),
            None => Err(invariant_violated!("next_index for unknown peer: {}", peer)),
        }
    }

    /// Returns the highest log index known to be replicated on `peer`.
    pub fn match_index(&self, peer: ServerId) -> RaftResult<LogIndex> {
        match self.match_index.get(&peer) {
            Some(match_index) => Ok(match_index.get()),
            None => Err(invariant_violated!("match_index for unknown peer: {}", peer)),
        }
    }

    /// Returns the `match_index` values of every peer, for quorum
    /// calculations.
    pub fn match_indexes(&self) -> impl Iterator<Item = LogIndex> + '_ {
        self.match_index.values().map(WatchedIndex::get)
    }

    /// Adds a listener for changes to `peer`'s `match_index`.
    pub fn add_match_index_listener(
        &mut self,
        peer: ServerId,
        listener: IndexChangeListener,
    ) -> RaftResult<()> {
        match self.match_index.get_mut(&peer) {
            Some(match_index) => {
                match_index.add_listener(listener);
                Ok(())
            }
            None => Err(invariant_violated!("listener for unknown peer: {}", peer)),
        }
    }

    /// Moves `next_index` for `peer` one entry back, to a floor of `1`, so
    /// the next AppendEntries probes an earlier prefix (Raft §5.3).
    pub fn decrement_next_index(&mut self, peer: ServerId) -> RaftResult<()> {
        let next_index = match self.next_index.get_mut(&peer) {
            Some(next_index) => next_index,
            None => return Err(invariant_violated!("decrement for unknown peer: {}", peer)),
        };
        if *next_index > LogIndex(1) {
            *next_index = *next_index - 1;
        }
        debug!("decremented next_index for {} to {}", peer, next_index);
        Ok(())
    }

    /// Records that `peer`'s log matches this server's up to `match_index`:
    /// sets `match_index` and moves `next_index` just past it.
    pub fn set_match_index_and_next_index(
        &mut self,
        peer: ServerId,
        match_index: LogIndex,
    ) -> RaftResult<()> {
        match self.match_index.get_mut(&peer) {
            Some(watched) => watched.set(match_index)?,
            None => return Err(invariant_violated!("match for unknown peer: {}", peer)),
        }
        // Both maps hold exactly the cluster's peers.
        if let Some(next_index) = self.next_index.get_mut(&peer) {
            *next_index = match_index + 1;
        }
        Ok(())
    }
}
