//! The AppendEntries receiver: term reconciliation, the log-match check,
//! conflict truncation, and commit-index advance.

use bytes::Bytes;
use common::*;
use tickraft::core::Role;
use tickraft::error::RaftError;
use tickraft::log::Log;
use tickraft::message::{
    AppendEntries, AppendEntriesReply, LogEntry, LogIndex, TermNo,
};

mod common;

fn entry(term: u64, command: &str) -> LogEntry {
    LogEntry {
        term: TermNo(term),
        command: Bytes::from(command.to_string()),
    }
}

fn append_entries(
    term: u64,
    prev_log_index: u64,
    prev_log_term: u64,
    entries: Vec<LogEntry>,
    leader_commit: u64,
) -> AppendEntries {
    AppendEntries {
        term: TermNo(term),
        prev_log_index: LogIndex(prev_log_index),
        prev_log_term: TermNo(prev_log_term),
        entries,
        leader_commit: LogIndex(leader_commit),
    }
}

// 1. Reply false if term < currentTerm (#5.1)
#[test]
fn refuses_older_term() {
    let mut fixture = setup_follower_figure_7();
    let expiry_before = fixture.cm.election_timeout_expiry();
    fixture.advance(TICK_DURATION);

    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(6, 10, 6, vec![], 0), fixture.now)
        .unwrap();
    assert_eq!(
        reply,
        AppendEntriesReply {
            term: TermNo(7),
            success: false
        }
    );
    // A stale leader is not authoritative contact; the timer is untouched.
    assert_eq!(fixture.cm.election_timeout_expiry(), expiry_before);
}

// 2. Reply false if log doesn't contain an entry at prevLogIndex whose term
// matches prevLogTerm (#5.3). The receiver does not truncate on a failed
// match; the leader's next RPC with a lower prevLogIndex converges the logs.
#[test]
fn refuses_mismatched_prev_term_without_truncating() {
    let mut fixture = setup_follower_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(7, 10, 5, vec![], 0), fixture.now)
        .unwrap();
    assert_eq!(
        reply,
        AppendEntriesReply {
            term: TermNo(7),
            success: false
        }
    );
    assert_eq!(fixture.cm.log().index_of_last_entry(), LogIndex(10));
    assert_eq!(fixture.cm.log().term_at_index(LogIndex(10)).unwrap(), TermNo(6));
}

#[test]
fn refuses_prev_index_past_end_of_log() {
    let mut fixture = setup_follower_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(7, 11, 6, vec![], 0), fixture.now)
        .unwrap();
    assert!(!reply.success);
    assert_eq!(fixture.cm.log().index_of_last_entry(), LogIndex(10));
}

// An empty entries list is a pure heartbeat: the log is untouched and the
// election timeout restarts.
#[test]
fn heartbeat_succeeds_and_restarts_election_timeout() {
    let mut fixture = setup_follower_figure_7();
    let expiry_before = fixture.cm.election_timeout_expiry();
    fixture.advance(TICK_DURATION);

    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(7, 10, 6, vec![], 0), fixture.now)
        .unwrap();
    assert_eq!(
        reply,
        AppendEntriesReply {
            term: TermNo(7),
            success: true
        }
    );
    assert_eq!(fixture.cm.log().index_of_last_entry(), LogIndex(10));
    assert_ne!(fixture.cm.election_timeout_expiry(), expiry_before);
    assert!(fixture.cm.election_timeout_expiry() >= fixture.now + ELECTION_TIMEOUT_LOW);
}

// prevLogIndex of 0 always passes the match check.
#[test]
fn prev_index_zero_matches_trivially() {
    let mut fixture = setup_follower(&[]);
    let reply = fixture
        .cm
        .receive_append_entries(
            id(102),
            append_entries(7, 0, 0, vec![entry(7, "c1")], 0),
            fixture.now,
        )
        .unwrap();
    assert!(reply.success);
    assert_eq!(fixture.cm.log().index_of_last_entry(), LogIndex(1));
}

// 3. + 4. A conflicting tail is replaced by the leader's entries (#5.3).
#[test]
fn appends_entries_replacing_conflicting_tail() {
    let mut fixture = setup_follower_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(
            id(102),
            append_entries(8, 8, 6, vec![entry(6, "c9"), entry(8, "x10")], 0),
            fixture.now,
        )
        .unwrap();
    assert_eq!(
        reply,
        AppendEntriesReply {
            term: TermNo(8),
            success: true
        }
    );
    assert_eq!(fixture.cm.term(), TermNo(8));
    assert_eq!(fixture.cm.role(), Role::Follower);

    let log = fixture.cm.log();
    assert_eq!(log.index_of_last_entry(), LogIndex(10));
    assert_eq!(log.term_at_index(LogIndex(9)).unwrap(), TermNo(6));
    assert_eq!(log.term_at_index(LogIndex(10)).unwrap(), TermNo(8));
    assert_eq!(
        log.entry_at_index(LogIndex(10)).unwrap().command,
        Bytes::from_static(b"x10")
    );
}

// Re-delivering the same AppendEntries yields the same log state and the
// same reply.
#[test]
fn redelivery_is_idempotent() {
    let mut fixture = setup_follower_figure_7();
    let rpc = append_entries(7, 9, 6, vec![entry(6, "c10")], 4);

    let first = fixture
        .cm
        .receive_append_entries(id(102), rpc.clone(), fixture.now)
        .unwrap();
    let log_after_first = fixture.cm.log().clone();
    fixture
        .committer
        .check_calls(&[CommitterCall::CommitAsync(LogIndex(4))]);

    let second = fixture
        .cm
        .receive_append_entries(id(102), rpc, fixture.now)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(fixture.cm.log(), &log_after_first);
    // The committer is notified once per distinct commit index.
    fixture.committer.check_calls(&[]);
}

// 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit,
// index of last new entry)
#[test]
fn commit_index_follows_leader() {
    let mut fixture = setup_follower_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(7, 10, 6, vec![], 4), fixture.now)
        .unwrap();
    assert!(reply.success);
    assert_eq!(fixture.cm.commit_index(), LogIndex(4));
    fixture
        .committer
        .check_calls(&[CommitterCall::CommitAsync(LogIndex(4))]);
}

#[test]
fn commit_index_clamps_to_end_of_log() {
    let mut fixture = setup_follower_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(7, 10, 6, vec![], 15), fixture.now)
        .unwrap();
    assert!(reply.success);
    assert_eq!(fixture.cm.commit_index(), LogIndex(10));
    fixture
        .committer
        .check_calls(&[CommitterCall::CommitAsync(LogIndex(10))]);
}

// #RFS-C3: a candidate that sees a same-term AppendEntries recognizes the
// new leader and returns to follower.
#[test]
fn candidate_stands_down_for_same_term_leader() {
    let mut fixture = setup_candidate_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(8, 10, 6, vec![], 0), fixture.now)
        .unwrap();
    assert_eq!(
        reply,
        AppendEntriesReply {
            term: TermNo(8),
            success: true
        }
    );
    assert_eq!(fixture.cm.role(), Role::Follower);
    assert_eq!(fixture.cm.term(), TermNo(8));
}

// #RFS-A2: a leader that sees a newer-term AppendEntries steps down.
#[test]
fn leader_stands_down_for_newer_term_leader() {
    let mut fixture = setup_leader_figure_7();
    let reply = fixture
        .cm
        .receive_append_entries(id(102), append_entries(9, 10, 6, vec![], 0), fixture.now)
        .unwrap();
    assert_eq!(
        reply,
        AppendEntriesReply {
            term: TermNo(9),
            success: true
        }
    );
    assert_eq!(fixture.cm.role(), Role::Follower);
    assert!(fixture.cm.leader_state().is_none());
}

// Two leaders in one term is impossible; a same-term AppendEntries received
// as leader is fatal.
#[test]
fn same_term_append_entries_as_leader_is_fatal() {
    let mut fixture = setup_leader_figure_7();
    let result =
        fixture
            .cm
            .receive_append_entries(id(102), append_entries(8, 10, 6, vec![], 0), fixture.now);
    assert!(matches!(result, Err(RaftError::InvariantViolated(_))));
}
