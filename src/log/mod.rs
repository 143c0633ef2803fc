//! The Raft log storage interface.
//!
//! The log is an ordered sequence of [`LogEntry`] values with first index 1.
//! The service hosting the consensus module owns the storage and exposes it
//! through the [`Log`] trait; [`memory::InMemoryLog`] is a reference
//! implementation, primarily for testing.

pub mod memory;

use anyhow::Result;

use crate::message::{Command, LogEntry, LogIndex, TermNo};

/// Storage of the Raft log of one server.
///
/// The consensus module is the only writer. Every method must either succeed
/// or report the failure; any error stops the consensus module.
pub trait Log {
    /// Returns the index of the last entry in the log, or `0` if the log is
    /// empty.
    fn index_of_last_entry(&self) -> LogIndex;

    /// Returns the term of the entry at `index`.
    ///
    /// # Errors
    ///
    /// `index` of `0` or past the end of the log is an error.
    fn term_at_index(&self, index: LogIndex) -> Result<TermNo>;

    /// Returns up to `max_entries` entries starting just after `index`.
    ///
    /// The returned entries are sent as-is in an AppendEntries RPC. An
    /// `index` equal to the last index yields an empty list.
    ///
    /// # Errors
    ///
    /// `index` past the end of the log is an error; `0` is valid.
    fn entries_after_index(&self, index: LogIndex, max_entries: usize) -> Result<Vec<LogEntry>>;

    /// Discards all entries after `index` and appends `entries` in their
    /// place.
    ///
    /// The log may optimize by only rewriting from the first position where
    /// the existing and new entries disagree on term. An `index` of `0`
    /// discards the whole log; an empty `entries` list discards only.
    ///
    /// # Errors
    ///
    /// An `index` past the end of the log, or below the highest commit index
    /// this log has been told of, is an error.
    fn set_entries_after_index(&mut self, index: LogIndex, entries: Vec<LogEntry>) -> Result<()>;

    /// Appends one entry with the given term and command, returning its
    /// index.
    ///
    /// Only called while this server is the leader.
    fn append_entry(&mut self, term: TermNo, command: Command) -> Result<LogIndex>;

    /// Tells the log that entries up to `commit_index` are committed, so
    /// that [`set_entries_after_index`] can refuse to truncate them.
    ///
    /// Called once per distinct value, with strictly increasing values
    /// never beyond the end of the log.
    ///
    /// [`set_entries_after_index`]: Self::set_entries_after_index
    fn commit_index_changed(&mut self, commit_index: LogIndex) -> Result<()>;
}

/// Returns the index and term of the last entry of `log`, or `(0, 0)` if the
/// log is empty.
pub fn index_and_term_of_last_entry<L: Log + ?Sized>(log: &L) -> Result<(LogIndex, TermNo)> {
    let last_log_index = log.index_of_last_entry();
    let last_log_term = if last_log_index > LogIndex(0) {
        log.term_at_index(last_log_index)?
    } else {
        TermNo(0)
    };
    Ok((last_log_index, last_log_term))
}
