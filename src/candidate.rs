//! Volatile state of a candidate: the votes granted so far.

use std::collections::BTreeSet;

use crate::config::ClusterInfo;
use crate::error::RaftResult;
use crate::message::ServerId;

/// The tally of votes granted to this server in the current election.
///
/// Created fresh on every conversion to candidate and discarded on exit from
/// candidate state. The tally starts with this server's own vote, so a solo
/// cluster is at quorum from construction.
#[derive(Debug, Eq, PartialEq)]
pub struct CandidateTally {
    granted: BTreeSet<ServerId>,
    members: BTreeSet<ServerId>,
    quorum_size: usize,
}

impl CandidateTally {
    /// Constructs a tally for a fresh election, seeded with this server's
    /// vote for itself.
    pub fn new(cluster_info: &ClusterInfo) -> Self {
        let mut members: BTreeSet<ServerId> = cluster_info.peer_ids().collect();
        members.insert(cluster_info.this_server_id());
        let mut granted = BTreeSet::new();
        granted.insert(cluster_info.this_server_id());
        Self {
            granted,
            members,
            quorum_size: cluster_info.quorum_size(),
        }
    }

    /// Records a vote granted by `peer`.
    ///
    /// Duplicate votes from the same peer are counted once. Returns whether
    /// the tally is at or past quorum after the vote; note that this keeps
    /// returning `true` on every later vote, so the caller must trigger the
    /// conversion to leader at most once.
    ///
    /// # Errors
    ///
    /// A vote from a server outside the cluster is an invariant violation.
    pub fn add_vote(&mut self, peer: ServerId) -> RaftResult<bool> {
        check_invariant!(
            self.members.contains(&peer),
            "vote from unknown server: {}",
            peer
        );
        self.granted.insert(peer);
        Ok(self.has_quorum())
    }

    /// Returns whether the granted votes constitute a quorum.
    pub fn has_quorum(&self) -> bool {
        self.granted.len() >= self.quorum_size
    }

    /// Returns the number of votes granted so far, this server's included.
    pub fn votes_granted(&self) -> usize {
        self.granted.len()
    }
}
