//! The passive consensus module: the complete Raft state machine of one
//! server.
//!
//! [`Consensus`] performs no I/O of its own and runs no threads. Every state
//! change happens inside a synchronous call made by the host, which must
//! serialize all calls: ticks, inbound RPCs, matched replies, and client
//! commands are delivered one at a time. [`Node`](crate::node::Node) is a
//! host loop that does exactly that.
//!
//! Raft behavior is implemented against the "Rules for Servers" summary of
//! the Raft paper (Figure 2); rule tags like `#RFS-L4` below refer to it.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand_core::RngCore;

use crate::candidate::CandidateTally;
use crate::committer::{commit_pair, CommitHandle, Committer};
use crate::config::ClusterInfo;
use crate::error::{AppendCommandError, RaftError, RaftResult};
use crate::log::{index_and_term_of_last_entry, Log};
use crate::message::{
    AppendEntries, AppendEntriesReply, Command, LogIndex, RequestVote, RequestVoteReply, ServerId,
    TermNo,
};
use crate::replication::LeaderVolatileState;
use crate::rpc::RpcEgress;
use crate::storage::PersistentState;
use crate::timer::ElectionTimeoutTimer;

/// The server states of Raft (#5.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

// Role plus the volatile state that exists only in that role. Transitioning
// drops the abandoned role's state.
enum RoleState {
    Follower,
    Candidate(CandidateTally),
    Leader(LeaderVolatileState),
}

/// A passive Raft consensus module.
///
/// Composes the cluster membership, the election timer, and the volatile
/// per-role state with the host-provided collaborators: the persistent state
/// store, the log, the committer, and the RPC egress. The host drives it by
/// calling [`tick`] at a fixed interval and delivering every inbound RPC and
/// reply; the module decides what this server is (follower, candidate, or
/// leader), what to send, how to reply, and when entries are committed.
///
/// The module never samples a clock; the host passes `now` into the calls
/// that need one, so tests can drive a simulated clock.
///
/// # Errors
///
/// Every operation that can fail returns [`RaftError`]. After an error the
/// module is in an undefined state and must not be called again without
/// reloading persistent state.
///
/// [`tick`]: Self::tick
pub struct Consensus<L, S, C, T, R> {
    cluster_info: ClusterInfo,
    persistent_state: S,
    log: L,
    committer: C,
    rpc_egress: T,
    election_timeout_timer: ElectionTimeoutTimer<R>,
    role: RoleState,
    // VOLATILE STATE: commitIndex (initialized to 0, increases
    // monotonically)
    commit_index: LogIndex,
    max_entries_per_append_entry: usize,
    // Reply handlers carry no clock parameter; role transitions they trigger
    // reset the election timer relative to the latest now the host passed.
    last_observed_now: Instant,
}

impl<L, S, C, T, R> Consensus<L, S, C, T, R>
where
    L: Log,
    S: PersistentState,
    C: Committer,
    T: RpcEgress,
    R: RngCore,
{
    /// Constructs a consensus module starting as follower at the term loaded
    /// from `persistent_state` (#5.2-p1s2).
    ///
    /// `rng` drives election timeout randomization and must produce
    /// different sequences on every server of the cluster.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistent_state: S,
        log: L,
        committer: C,
        rpc_egress: T,
        cluster_info: ClusterInfo,
        max_entries_per_append_entry: usize,
        election_timeout_low: Duration,
        rng: R,
        now: Instant,
    ) -> RaftResult<Self> {
        check_invariant!(
            max_entries_per_append_entry >= 1,
            "max_entries_per_append_entry must be at least 1"
        );
        check_invariant!(
            !election_timeout_low.is_zero(),
            "election timeout must be greater than zero"
        );
        Ok(Self {
            cluster_info,
            persistent_state,
            log,
            committer,
            rpc_egress,
            election_timeout_timer: ElectionTimeoutTimer::new(rng, election_timeout_low, now),
            role: RoleState::Follower,
            commit_index: LogIndex(0),
            max_entries_per_append_entry,
            last_observed_now: now,
        })
    }

    //
    // observers
    //

    /// Returns this server's current role.
    pub fn role(&self) -> Role {
        match self.role {
            RoleState::Follower => Role::Follower,
            RoleState::Candidate(_) => Role::Candidate,
            RoleState::Leader(_) => Role::Leader,
        }
    }

    /// Returns this server's current term.
    pub fn term(&self) -> TermNo {
        self.persistent_state.current_term()
    }

    /// Returns the index of the highest log entry known to be committed.
    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    /// Returns the cluster membership this module was built with.
    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    /// Returns a reference to the persistent state store.
    pub fn persistent_state(&self) -> &S {
        &self.persistent_state
    }

    /// Returns a reference to the log storage.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Returns a mutable reference to the log storage.
    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    /// Returns the randomly chosen duration of the current election timeout
    /// period.
    pub fn election_timeout_duration(&self) -> Duration {
        self.election_timeout_timer.current_duration()
    }

    /// Returns the instant at which the current election timeout expires.
    pub fn election_timeout_expiry(&self) -> Instant {
        self.election_timeout_timer.expiry()
    }

    /// Returns the per-peer replication state, while this server is leader.
    pub fn leader_state(&self) -> Option<&LeaderVolatileState> {
        match &self.role {
            RoleState::Leader(leader_state) => Some(leader_state),
            _ => None,
        }
    }

    /// Returns the mutable per-peer replication state, while this server is
    /// leader.
    pub fn leader_state_mut(&mut self) -> Option<&mut LeaderVolatileState> {
        match &mut self.role {
            RoleState::Leader(leader_state) => Some(leader_state),
            _ => None,
        }
    }

    //
    // host entry points
    //

    /// Performs one tick of periodic work at time `now`.
    ///
    /// A follower or candidate whose election timeout has expired starts a
    /// new election (#RFS-F2, #RFS-C4). A leader sends an AppendEntries to
    /// every peer, carrying entries for peers that are behind and empty as a
    /// heartbeat otherwise (#RFS-L1b, #RFS-L3.0), and then recomputes the
    /// commit index (#RFS-L4).
    pub fn tick(&mut self, now: Instant) -> RaftResult<()> {
        self.last_observed_now = now;
        match self.role() {
            Role::Follower | Role::Candidate => {
                if self.election_timeout_timer.expired(now) {
                    info!("election timeout at {}", self.persistent_state.current_term());
                    self.start_election(now)?;
                }
                Ok(())
            }
            Role::Leader => {
                let peers: Vec<ServerId> = self.cluster_info.peer_ids().collect();
                for peer in peers {
                    self.send_append_entries_to_peer(peer)?;
                }
                self.advance_commit_index()
            }
        }
    }

    /// Processes a RequestVote RPC from the server with ID `from`, returning
    /// the reply to send back (#RFS-F1).
    ///
    /// The vote is granted iff this server has not yet voted in the
    /// candidate's term (or voted for this same candidate) and the
    /// candidate's log is at least as up-to-date as this server's
    /// (#5.2, #5.4.1).
    pub fn receive_request_vote(
        &mut self,
        from: ServerId,
        rpc: RequestVote,
        now: Instant,
    ) -> RaftResult<RequestVoteReply> {
        self.last_observed_now = now;

        // 1. Reply false if term < currentTerm (#5.1)
        if rpc.term < self.persistent_state.current_term() {
            debug!(
                "refused vote for {}: {} < current {}",
                from,
                rpc.term,
                self.persistent_state.current_term()
            );
            return Ok(self.request_vote_reply(false));
        }

        // #RFS-A2: a newer term converts this server to follower first.
        if rpc.term > self.persistent_state.current_term() {
            self.become_follower(rpc.term, now)?;
        }

        // #5.4.1-p3: which of two logs is more up-to-date is decided by the
        // index and term of their last entries.
        let (last_log_index, last_log_term) = index_and_term_of_last_entry(&self.log)?;
        let candidate_is_at_least_as_up_to_date = rpc.last_log_term > last_log_term
            || (rpc.last_log_term == last_log_term && rpc.last_log_index >= last_log_index);

        // 2. If votedFor is null or candidateId, and candidate's log is at
        // least as up-to-date as receiver's log, grant vote (#5.2, #5.4)
        let voted_for = self.persistent_state.voted_for();
        if (voted_for.is_none() || voted_for == Some(from)) && candidate_is_at_least_as_up_to_date {
            if voted_for.is_none() {
                self.persistent_state
                    .set_voted_for(Some(from))
                    .map_err(RaftError::from)?;
            }
            // #RFS-F2: granting a vote is authoritative contact.
            self.election_timeout_timer.reset(now);
            info!(
                "granted vote to {} at {}",
                from,
                self.persistent_state.current_term()
            );
            return Ok(self.request_vote_reply(true));
        }

        match voted_for {
            Some(vote) if vote != from => {
                info!("refused vote for {}: already voted for {}", from, vote)
            }
            _ => info!(
                "refused vote for {} with {} at {}: our log has {} at {}",
                from, rpc.last_log_index, rpc.last_log_term, last_log_index, last_log_term
            ),
        }
        Ok(self.request_vote_reply(false))
    }

    /// Processes an AppendEntries RPC from the server with ID `from`,
    /// returning the reply to send back (#RFS-F1).
    ///
    /// On success the new entries are stored, truncating any conflicting
    /// tail, and the commit index follows the leader's (#5.3). A failed
    /// log-match check does not truncate; the leader's next RPC with an
    /// earlier `prev_log_index` drives convergence.
    pub fn receive_append_entries(
        &mut self,
        from: ServerId,
        rpc: AppendEntries,
        now: Instant,
    ) -> RaftResult<AppendEntriesReply> {
        self.last_observed_now = now;

        // 1. Reply false if term < currentTerm (#5.1)
        if rpc.term < self.persistent_state.current_term() {
            debug!(
                "ignored AppendEntries from {}: {} < current {}",
                from,
                rpc.term,
                self.persistent_state.current_term()
            );
            return Ok(self.append_entries_reply(false));
        }

        // #RFS-A2 / #RFS-C3: a newer term, or a same-term AppendEntries seen
        // as candidate, converts this server to follower.
        if rpc.term > self.persistent_state.current_term() {
            self.become_follower(rpc.term, now)?;
        } else {
            match self.role() {
                Role::Follower => (),
                Role::Candidate => {
                    // Another server won the election for this term.
                    self.become_follower(rpc.term, now)?;
                }
                Role::Leader => {
                    // At most one leader per term (#5.2).
                    return Err(invariant_violated!(
                        "AppendEntries from second leader {} at {}",
                        from,
                        rpc.term
                    ));
                }
            }
        }

        // Contact from the current leader restarts the election timeout,
        // whether or not the log-match check below passes.
        self.election_timeout_timer.reset(now);

        // 2. Reply false if log doesn't contain an entry at prevLogIndex
        // whose term matches prevLogTerm (#5.3)
        if self.log.index_of_last_entry() < rpc.prev_log_index {
            info!(
                "rejected append from {} at {}: our log ends at {}",
                from,
                rpc.prev_log_index,
                self.log.index_of_last_entry()
            );
            return Ok(self.append_entries_reply(false));
        }
        if rpc.prev_log_index > LogIndex(0) {
            let our_prev_log_term = self
                .log
                .term_at_index(rpc.prev_log_index)
                .map_err(RaftError::from)?;
            if our_prev_log_term != rpc.prev_log_term {
                warn!(
                    "rejected append from {} at {}: we have {}, leader has {}",
                    from, rpc.prev_log_index, our_prev_log_term, rpc.prev_log_term
                );
                return Ok(self.append_entries_reply(false));
            }
        }

        // 3. + 4. Delete conflicting entries, append new ones (#5.3). The
        // log does both in one call; empty entries are a pure heartbeat.
        self.log
            .set_entries_after_index(rpc.prev_log_index, rpc.entries)
            .map_err(RaftError::from)?;

        // 5. If leaderCommit > commitIndex, set commitIndex =
        // min(leaderCommit, index of last new entry)
        if rpc.leader_commit > self.commit_index {
            let new_commit_index = rpc.leader_commit.min(self.log.index_of_last_entry());
            if new_commit_index > self.commit_index {
                self.set_commit_index(new_commit_index)?;
            }
        }

        Ok(self.append_entries_reply(true))
    }

    /// Processes the reply to a RequestVote RPC this server sent to `from`.
    ///
    /// `sent_rpc` must be the RPC the reply answers; replies to RPCs from
    /// earlier terms are discarded. On a quorum of granted votes this server
    /// converts to leader (#RFS-C2).
    pub fn receive_request_vote_reply(
        &mut self,
        from: ServerId,
        sent_rpc: RequestVote,
        reply: RequestVoteReply,
    ) -> RaftResult<()> {
        let current_term = self.persistent_state.current_term();
        if sent_rpc.term != current_term {
            debug!(
                "ignored RequestVote reply from {} answering {}",
                from, sent_rpc.term
            );
            return Ok(());
        }
        if reply.term > current_term {
            let now = self.last_observed_now;
            self.become_follower(reply.term, now)?;
            return Ok(());
        }

        let quorum_reached = match &mut self.role {
            RoleState::Candidate(tally) => {
                if !reply.vote_granted {
                    info!("vote refused by {} at {}", from, current_term);
                    return Ok(());
                }
                info!("vote granted by {} at {}", from, current_term);
                // add_vote keeps answering true once at quorum, but a vote
                // can only reach this arm while still candidate, so the
                // conversion below happens at most once per election.
                tally.add_vote(from)?
            }
            _ => {
                debug!("ignored RequestVote reply from {} while not candidate", from);
                return Ok(());
            }
        };
        if quorum_reached {
            self.become_leader()?;
        }
        Ok(())
    }

    /// Processes the reply to an AppendEntries RPC this server sent to
    /// `from`.
    ///
    /// On success the peer's replication state advances past the entries of
    /// `sent_rpc` and the commit index is recomputed; on failure `nextIndex`
    /// backs off by one so the next tick probes an earlier prefix
    /// (#RFS-L3.1, #RFS-L3.2).
    pub fn receive_append_entries_reply(
        &mut self,
        from: ServerId,
        sent_rpc: AppendEntries,
        reply: AppendEntriesReply,
    ) -> RaftResult<()> {
        let current_term = self.persistent_state.current_term();
        if sent_rpc.term != current_term {
            debug!(
                "ignored AppendEntries reply from {} answering {}",
                from, sent_rpc.term
            );
            return Ok(());
        }
        if reply.term > current_term {
            let now = self.last_observed_now;
            self.become_follower(reply.term, now)?;
            return Ok(());
        }

        match &mut self.role {
            RoleState::Leader(leader_state) => {
                if reply.success {
                    let match_index = sent_rpc.prev_log_index + sent_rpc.entries.len() as u64;
                    leader_state.set_match_index_and_next_index(from, match_index)?;
                } else {
                    info!("append refused by {}; probing an earlier prefix", from);
                    leader_state.decrement_next_index(from)?;
                    return Ok(());
                }
            }
            // Only a leader sends AppendEntries, so only a leader can see a
            // same-term reply.
            _ => {
                return Err(invariant_violated!(
                    "AppendEntries reply at current {} received from {} while not leader",
                    current_term,
                    from
                ))
            }
        }

        // The matchIndex change may have created a quorum; advance without
        // waiting for the next tick.
        self.advance_commit_index()
    }

    /// Appends `command` to the replicated log, returning a handle that
    /// resolves once the command has been applied to the state machine.
    ///
    /// Only the leader accepts commands (#RFS-L2); followers and candidates
    /// return [`AppendCommandError::NotLeader`] and the client should retry
    /// against the current leader. Replication to peers starts on the next
    /// tick.
    pub fn append_command(&mut self, command: Command) -> Result<CommitHandle, AppendCommandError> {
        if !matches!(self.role, RoleState::Leader(_)) {
            return Err(AppendCommandError::NotLeader);
        }
        let term = self.persistent_state.current_term();
        let index = self
            .log
            .append_entry(term, command)
            .map_err(RaftError::from)?;
        let (signal, handle) = commit_pair();
        self.committer
            .register_listener(index, signal)
            .map_err(RaftError::from)?;
        debug!("appended command at {} in {}", index, term);
        Ok(handle)
    }

    //
    // role transitions
    //

    // Starts a new election: increment currentTerm, vote for self, reset the
    // election timer, send RequestVote RPCs to all other servers (#RFS-C1).
    // A solo cluster is its own quorum and becomes leader immediately.
    fn start_election(&mut self, now: Instant) -> RaftResult<()> {
        let new_term = self.persistent_state.current_term() + 1;
        self.persistent_state
            .set_current_term(new_term)
            .map_err(RaftError::from)?;
        self.persistent_state
            .set_voted_for(Some(self.cluster_info.this_server_id()))
            .map_err(RaftError::from)?;
        let tally = CandidateTally::new(&self.cluster_info);
        let has_quorum = tally.has_quorum();
        self.role = RoleState::Candidate(tally);
        self.election_timeout_timer.reset(now);
        info!("became candidate at {}", new_term);

        if has_quorum {
            return self.become_leader();
        }

        let (last_log_index, last_log_term) = index_and_term_of_last_entry(&self.log)?;
        let rpc = RequestVote {
            term: new_term,
            last_log_index,
            last_log_term,
        };
        let peers: Vec<ServerId> = self.cluster_info.peer_ids().collect();
        for peer in peers {
            self.rpc_egress
                .send_request_vote(peer, rpc.clone())
                .map_err(RaftError::from)?;
        }
        Ok(())
    }

    // Converts to leader: initialize nextIndex just past the local log and
    // matchIndex to 0 for every peer (#RFS-L1a). The initial empty
    // AppendEntries round goes out on the next tick, which is due well
    // within half an election timeout.
    fn become_leader(&mut self) -> RaftResult<()> {
        self.role = RoleState::Leader(LeaderVolatileState::new(
            &self.cluster_info,
            self.log.index_of_last_entry(),
        ));
        info!("became leader at {}", self.persistent_state.current_term());
        Ok(())
    }

    // Converts to follower at `term`, discarding any candidate or leader
    // volatile state and restarting the election timeout. The persistent
    // store clears votedFor whenever the term advances, so a same-term
    // conversion (#RFS-C3) keeps this server's vote.
    fn become_follower(&mut self, term: TermNo, now: Instant) -> RaftResult<()> {
        self.persistent_state
            .set_current_term(term)
            .map_err(RaftError::from)?;
        self.role = RoleState::Follower;
        self.election_timeout_timer.reset(now);
        info!("became follower at {}", term);
        Ok(())
    }

    //
    // leader activity
    //

    // Sends one AppendEntries RPC to `peer`: entries starting at the peer's
    // nextIndex when it is behind, empty as a heartbeat when it is caught
    // up.
    fn send_append_entries_to_peer(&mut self, peer: ServerId) -> RaftResult<()> {
        let next_index = match &self.role {
            RoleState::Leader(leader_state) => leader_state.next_index(peer)?,
            _ => return Err(invariant_violated!("replicating to {} while not leader", peer)),
        };
        let prev_log_index = next_index - 1;
        let prev_log_term = if prev_log_index > LogIndex(0) {
            self.log
                .term_at_index(prev_log_index)
                .map_err(RaftError::from)?
        } else {
            TermNo(0)
        };
        let entries = self
            .log
            .entries_after_index(prev_log_index, self.max_entries_per_append_entry)
            .map_err(RaftError::from)?;
        let rpc = AppendEntries {
            term: self.persistent_state.current_term(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
        };
        self.rpc_egress
            .send_append_entries(peer, rpc)
            .map_err(RaftError::from)
    }

    // #RFS-L4: if there exists an N such that N > commitIndex, a majority of
    // matchIndex[i] >= N, and log[N].term == currentTerm: set
    // commitIndex = N (#5.3, #5.4). Entries from earlier terms are only ever
    // committed alongside a current-term entry (#5.4.2).
    fn advance_commit_index(&mut self) -> RaftResult<()> {
        let new_commit_index = match &self.role {
            RoleState::Leader(leader_state) => {
                let mut agree_indexes: Vec<LogIndex> = leader_state.match_indexes().collect();
                // This server agrees up to the end of its own log.
                agree_indexes.push(self.log.index_of_last_entry());
                agree_indexes.sort_unstable();
                // The quorum-th largest index is agreed on by a quorum.
                let candidate = agree_indexes[agree_indexes.len() - self.cluster_info.quorum_size()];
                if candidate > self.commit_index
                    && self.log.term_at_index(candidate).map_err(RaftError::from)?
                        == self.persistent_state.current_term()
                {
                    Some(candidate)
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(new_commit_index) = new_commit_index {
            self.set_commit_index(new_commit_index)?;
        }
        Ok(())
    }

    // Advances commitIndex and notifies the committer, exactly once per
    // distinct value.
    fn set_commit_index(&mut self, commit_index: LogIndex) -> RaftResult<()> {
        check_invariant!(
            commit_index >= self.commit_index,
            "commit index cannot decrease from {} to {}",
            self.commit_index,
            commit_index
        );
        check_invariant!(
            commit_index <= self.log.index_of_last_entry(),
            "commit index {} is beyond the end of the log at {}",
            commit_index,
            self.log.index_of_last_entry()
        );
        debug!(
            "commit index advanced from {} to {}",
            self.commit_index, commit_index
        );
        self.commit_index = commit_index;
        // The log learns the new floor first so it can refuse truncation of
        // committed entries from here on.
        self.log
            .commit_index_changed(commit_index)
            .map_err(RaftError::from)?;
        self.committer
            .commit_async(commit_index)
            .map_err(RaftError::from)
    }

    //
    // replies
    //

    fn request_vote_reply(&self, vote_granted: bool) -> RequestVoteReply {
        RequestVoteReply {
            // Refetched: processing the request may have advanced the term.
            term: self.persistent_state.current_term(),
            vote_granted,
        }
    }

    fn append_entries_reply(&self, success: bool) -> AppendEntriesReply {
        AppendEntriesReply {
            term: self.persistent_state.current_term(),
            success,
        }
    }
}
