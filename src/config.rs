//! Cluster membership and time settings.

use std::fmt;
use std::time::Duration;

use crate::message::ServerId;

/// The fixed membership of a Raft cluster, as seen from one server.
///
/// Holds the IDs of every server in the cluster and precomputes the sizes
/// derived from them. Membership never changes for the life of the module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterInfo {
    this_server_id: ServerId,
    // Excludes this_server_id.
    peer_server_ids: Vec<ServerId>,
    cluster_size: usize,
    quorum_size: usize,
}

/// An error constructing a [`ClusterInfo`].
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ClusterInfoError {
    #[error("server list is empty")]
    Empty,
    #[error("server list contains duplicate ID: {0}")]
    DuplicateServerId(ServerId),
    #[error("server list does not contain this server's ID: {0}")]
    ThisServerNotInCluster(ServerId),
}

impl ClusterInfo {
    /// Constructs a `ClusterInfo` from the IDs of all servers in the cluster.
    ///
    /// `all_server_ids` must list every server exactly once, including
    /// `this_server_id`. A single-element list describes a solo cluster.
    pub fn new(
        all_server_ids: &[ServerId],
        this_server_id: ServerId,
    ) -> Result<Self, ClusterInfoError> {
        if all_server_ids.is_empty() {
            return Err(ClusterInfoError::Empty);
        }

        let mut peer_server_ids = Vec::with_capacity(all_server_ids.len() - 1);
        let mut seen_this_server = false;
        for &server_id in all_server_ids {
            if all_server_ids.iter().filter(|&&id| id == server_id).count() > 1 {
                return Err(ClusterInfoError::DuplicateServerId(server_id));
            }
            if server_id == this_server_id {
                seen_this_server = true;
            } else {
                peer_server_ids.push(server_id);
            }
        }
        if !seen_this_server {
            return Err(ClusterInfoError::ThisServerNotInCluster(this_server_id));
        }

        let cluster_size = all_server_ids.len();
        Ok(Self {
            this_server_id,
            peer_server_ids,
            cluster_size,
            quorum_size: quorum_size_for_cluster_size(cluster_size),
        })
    }

    /// Returns the ID of "this" server.
    pub fn this_server_id(&self) -> ServerId {
        self.this_server_id
    }

    /// Returns an iterator over the IDs of every server except this one, in
    /// a deterministic order.
    pub fn peer_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.peer_server_ids.iter().copied()
    }

    /// Returns whether `server_id` names a member of this cluster.
    pub fn contains(&self, server_id: ServerId) -> bool {
        server_id == self.this_server_id || self.peer_server_ids.contains(&server_id)
    }

    /// Returns the number of servers in the cluster, this one included.
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Returns the number of servers that constitutes a quorum.
    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }
}

impl fmt::Display for ClusterInfo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "cluster of {} with peers {:?}",
            self.this_server_id, self.peer_server_ids
        )
    }
}

/// Computes the minimum number of servers constituting a quorum in a cluster
/// of `cluster_size` servers.
///
/// A quorum of reachable servers is needed both to elect a leader and to
/// commit an entry of the replicated log.
pub fn quorum_size_for_cluster_size(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// The time parameters of a Raft server.
///
/// All servers in a cluster should run with the same settings. The tick
/// interval must be much smaller than the election timeout for heartbeats to
/// reliably suppress follower elections.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeSettings {
    /// The interval between ticks of the driving ticker.
    pub tick_interval: Duration,
    /// The lower bound of the election timeout; actual timeouts are chosen
    /// uniformly from `[low, 2 * low)`.
    pub election_timeout_low: Duration,
}

/// An error validating [`TimeSettings`].
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum TimeSettingsError {
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
    #[error("election timeout must be greater than the tick interval")]
    ElectionTimeoutTooShort,
}

impl TimeSettings {
    /// Checks that the settings are usable.
    pub fn validate(&self) -> Result<(), TimeSettingsError> {
        if self.tick_interval.is_zero() {
            return Err(TimeSettingsError::ZeroTickInterval);
        }
        if self.election_timeout_low <= self.tick_interval {
            return Err(TimeSettingsError::ElectionTimeoutTooShort);
        }
        Ok(())
    }
}
