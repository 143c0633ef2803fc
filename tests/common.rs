#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand_chacha::ChaChaRng;
use rand_core::SeedableRng;

use tickraft::committer::{CommitSignal, Committer};
use tickraft::config::ClusterInfo;
use tickraft::core::{Consensus, Role};
use tickraft::log::memory::InMemoryLog;
use tickraft::log::index_and_term_of_last_entry;
use tickraft::message::{
    AppendEntries, LogIndex, RequestVote, RequestVoteReply, ServerId, TermNo,
};
use tickraft::rpc::RpcEgress;
use tickraft::storage::InMemoryPersistentState;

pub const THIS_SERVER_ID: u64 = 101;
pub const ALL_SERVER_IDS: [u64; 5] = [101, 102, 103, 104, 105];

// Values for tests based on Figure 7 of the Raft paper: start as follower at
// term 7 so that the leader will be at term 8.
pub const CURRENT_TERM: u64 = 7;

pub const ELECTION_TIMEOUT_LOW: Duration = Duration::from_millis(150);
pub const TICK_DURATION: Duration = Duration::from_millis(30);
pub const MAX_ENTRIES_PER_APPEND_ENTRY: usize = 3;

/// Terms of the 10-entry log of the leader line of Figure 7.
pub fn figure_7_leader_line_terms() -> Vec<u64> {
    vec![1, 1, 1, 4, 4, 5, 5, 6, 6, 6]
}

pub fn id(id: u64) -> ServerId {
    ServerId::new(id).unwrap()
}

pub type TestConsensus =
    Consensus<InMemoryLog, InMemoryPersistentState, MockCommitter, MockRpcEgress, ChaChaRng>;

/// One consensus module under test, with a simulated clock and recording
/// collaborators.
pub struct Fixture {
    pub cm: TestConsensus,
    pub now: Instant,
    pub egress: MockRpcEgress,
    pub committer: MockCommitter,
}

/// An RPC recorded by [`MockRpcEgress`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SentRpc {
    AppendEntries(AppendEntries),
    RequestVote(RequestVote),
}

/// An [`RpcEgress`] recording every send for later assertion.
#[derive(Clone, Default)]
pub struct MockRpcEgress {
    sent: Rc<RefCell<Vec<(ServerId, SentRpc)>>>,
}

/// A call recorded by [`MockCommitter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommitterCall {
    CommitAsync(LogIndex),
    RegisterListener(LogIndex),
}

/// A [`Committer`] recording every call for later assertion.
#[derive(Clone, Default)]
pub struct MockCommitter {
    calls: Rc<RefCell<Vec<CommitterCall>>>,
    signals: Rc<RefCell<Vec<(LogIndex, CommitSignal)>>>,
}

pub struct TestLogger;

//
// setup
//

pub fn setup_follower(log_terms: &[u64]) -> Fixture {
    setup(log_terms, false)
}

pub fn setup_solo_follower(log_terms: &[u64]) -> Fixture {
    setup(log_terms, true)
}

pub fn setup(log_terms: &[u64], solo: bool) -> Fixture {
    TestLogger::init();
    let all_server_ids: Vec<ServerId> = if solo {
        vec![id(THIS_SERVER_ID)]
    } else {
        ALL_SERVER_IDS.iter().map(|&i| id(i)).collect()
    };
    let cluster_info = ClusterInfo::new(&all_server_ids, id(THIS_SERVER_ID)).unwrap();
    let egress = MockRpcEgress::default();
    let committer = MockCommitter::default();
    let now = Instant::now();
    let cm = Consensus::new(
        InMemoryPersistentState::with_current_term(TermNo(CURRENT_TERM)),
        InMemoryLog::with_terms(log_terms),
        committer.clone(),
        egress.clone(),
        cluster_info,
        MAX_ENTRIES_PER_APPEND_ENTRY,
        ELECTION_TIMEOUT_LOW,
        ChaChaRng::seed_from_u64(THIS_SERVER_ID),
        now,
    )
    .unwrap();
    let mut fixture = Fixture {
        cm,
        now,
        egress,
        committer,
    };
    // Bias the simulated clock to avoid exact expiry matches.
    fixture.advance(Duration::from_millis(10));
    fixture
}

/// A follower with the Figure 7 leader-line log.
pub fn setup_follower_figure_7() -> Fixture {
    setup_follower(&figure_7_leader_line_terms())
}

/// A candidate at term 8 with the Figure 7 leader-line log, RequestVotes
/// already sent (and cleared from the egress record).
pub fn setup_candidate_figure_7() -> Fixture {
    let mut fixture = setup_follower_figure_7();
    fixture.tick_till_election_timeout();
    assert_eq!(fixture.cm.role(), Role::Candidate);
    assert_eq!(fixture.cm.term(), TermNo(CURRENT_TERM + 1));
    fixture.egress.take_sent();
    fixture
}

/// A leader at term 8 with the Figure 7 leader-line log, elected by votes
/// from 102 and 103.
pub fn setup_leader_figure_7() -> Fixture {
    let mut fixture = setup_candidate_figure_7();
    fixture.grant_vote_from(102);
    fixture.grant_vote_from(103);
    assert_eq!(fixture.cm.role(), Role::Leader);
    fixture.egress.take_sent();
    fixture
}

//
// Fixture impls
//

impl Fixture {
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }

    /// Advances the clock by one tick interval and ticks the module.
    pub fn tick(&mut self) {
        self.advance(TICK_DURATION);
        self.cm.tick(self.now).unwrap();
    }

    /// Jumps the clock to the election timeout expiry and ticks once.
    pub fn tick_till_election_timeout(&mut self) {
        self.now = self.cm.election_timeout_expiry();
        self.cm.tick(self.now).unwrap();
    }

    /// The RequestVote this server sends (or would send) in its current
    /// term.
    pub fn request_vote_rpc(&self) -> RequestVote {
        let (last_log_index, last_log_term) =
            index_and_term_of_last_entry(self.cm.log()).unwrap();
        RequestVote {
            term: self.cm.term(),
            last_log_index,
            last_log_term,
        }
    }

    /// Delivers a granted RequestVote reply from the peer `from`.
    pub fn grant_vote_from(&mut self, from: u64) {
        let sent_rpc = self.request_vote_rpc();
        let term = self.cm.term();
        self.cm
            .receive_request_vote_reply(
                id(from),
                sent_rpc,
                RequestVoteReply {
                    term,
                    vote_granted: true,
                },
            )
            .unwrap();
    }

    /// The index and term of the last entry of this server's log.
    pub fn last_index_and_term(&self) -> (LogIndex, TermNo) {
        index_and_term_of_last_entry(self.cm.log()).unwrap()
    }
}

//
// MockRpcEgress impls
//

impl MockRpcEgress {
    /// Returns and clears the recorded sends.
    pub fn take_sent(&self) -> Vec<(ServerId, SentRpc)> {
        self.sent.borrow_mut().drain(..).collect()
    }

    /// Asserts that exactly `expected` was sent (in order) and clears the
    /// record.
    pub fn check_sent(&self, expected: &[(ServerId, SentRpc)]) {
        assert_eq!(self.take_sent(), expected);
    }

    /// Asserts that nothing was sent.
    pub fn check_no_sent(&self) {
        assert_eq!(self.take_sent(), vec![]);
    }
}

impl RpcEgress for MockRpcEgress {
    fn send_append_entries(&mut self, to: ServerId, rpc: AppendEntries) -> anyhow::Result<()> {
        self.sent.borrow_mut().push((to, SentRpc::AppendEntries(rpc)));
        Ok(())
    }

    fn send_request_vote(&mut self, to: ServerId, rpc: RequestVote) -> anyhow::Result<()> {
        self.sent.borrow_mut().push((to, SentRpc::RequestVote(rpc)));
        Ok(())
    }
}

//
// MockCommitter impls
//

impl MockCommitter {
    /// Returns and clears the recorded calls.
    pub fn take_calls(&self) -> Vec<CommitterCall> {
        self.calls.borrow_mut().drain(..).collect()
    }

    /// Asserts that exactly `expected` was recorded (in order) and clears
    /// the record.
    pub fn check_calls(&self, expected: &[CommitterCall]) {
        assert_eq!(self.take_calls(), expected);
    }

    /// Fires the registered commit signals for entries up to `index`,
    /// simulating the state machine applying them.
    pub fn apply_up_to(&self, index: LogIndex) {
        let mut signals = self.signals.borrow_mut();
        let mut remaining = Vec::new();
        for (signal_index, signal) in signals.drain(..) {
            if signal_index <= index {
                signal.notify();
            } else {
                remaining.push((signal_index, signal));
            }
        }
        *signals = remaining;
    }
}

impl Committer for MockCommitter {
    fn commit_async(&mut self, commit_index: LogIndex) -> anyhow::Result<()> {
        self.calls
            .borrow_mut()
            .push(CommitterCall::CommitAsync(commit_index));
        Ok(())
    }

    fn register_listener(&mut self, index: LogIndex, signal: CommitSignal) -> anyhow::Result<()> {
        self.calls
            .borrow_mut()
            .push(CommitterCall::RegisterListener(index));
        self.signals.borrow_mut().push((index, signal));
        Ok(())
    }
}

//
// TestLogger impls
//

static LOGGER: TestLogger = TestLogger;

impl TestLogger {
    pub fn init() {
        let _ignore = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);
    }
}

impl log::Log for TestLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        eprintln!("{:<5} {}", record.level(), record.args());
    }

    fn flush(&self) {}
}
