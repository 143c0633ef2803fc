//! A naive in-memory implementation of [`Log`], primarily for testing.

use anyhow::{anyhow, Result};
use bytes::Bytes;

use crate::message::{Command, LogEntry, LogIndex, TermNo};

use super::Log;

/// A `Vec`-backed Raft log.
///
/// Useful for tests and for deployments that accept losing the log on
/// restart. The consensus module reports every commit-index advance through
/// [`commit_index_changed`][Log::commit_index_changed], and the log refuses
/// truncation below the reported index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InMemoryLog {
    entries: Vec<LogEntry>,
    commit_floor: LogIndex,
}

impl InMemoryLog {
    /// Constructs an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a log with one entry per term in `terms`, with commands
    /// `"c1"`, `"c2"`, ... matching each entry's index.
    pub fn with_terms(terms: &[u64]) -> Self {
        let entries = terms
            .iter()
            .enumerate()
            .map(|(index, &term)| LogEntry {
                term: TermNo(term),
                command: Bytes::from(format!("c{}", index + 1)),
            })
            .collect();
        Self {
            entries,
            commit_floor: LogIndex(0),
        }
    }

    /// Returns the entry at `index`, if present.
    pub fn entry_at_index(&self, index: LogIndex) -> Option<&LogEntry> {
        let slot = index.0.checked_sub(1)?;
        self.entries.get(slot as usize)
    }

    fn check_in_log(&self, index: LogIndex, zero_valid: bool) -> Result<()> {
        if index == LogIndex(0) && !zero_valid {
            return Err(anyhow!("index 0 is invalid for this call"));
        }
        if index > self.index_of_last_entry() {
            return Err(anyhow!(
                "index {} is beyond the end of the log at {}",
                index,
                self.index_of_last_entry()
            ));
        }
        Ok(())
    }
}

impl Log for InMemoryLog {
    fn index_of_last_entry(&self) -> LogIndex {
        LogIndex(self.entries.len() as u64)
    }

    fn term_at_index(&self, index: LogIndex) -> Result<TermNo> {
        self.check_in_log(index, false)?;
        Ok(self.entries[(index.0 - 1) as usize].term)
    }

    fn entries_after_index(&self, index: LogIndex, max_entries: usize) -> Result<Vec<LogEntry>> {
        self.check_in_log(index, true)?;
        Ok(self
            .entries
            .iter()
            .skip(index.0 as usize)
            .take(max_entries)
            .cloned()
            .collect())
    }

    fn set_entries_after_index(&mut self, index: LogIndex, entries: Vec<LogEntry>) -> Result<()> {
        self.check_in_log(index, true)?;
        if index < self.commit_floor {
            return Err(anyhow!(
                "refusing to truncate at {} below committed {}",
                index,
                self.commit_floor
            ));
        }
        self.entries.truncate(index.0 as usize);
        self.entries.extend(entries);
        Ok(())
    }

    fn append_entry(&mut self, term: TermNo, command: Command) -> Result<LogIndex> {
        self.entries.push(LogEntry { term, command });
        Ok(self.index_of_last_entry())
    }

    fn commit_index_changed(&mut self, commit_index: LogIndex) -> Result<()> {
        self.commit_floor = self.commit_floor.max(commit_index);
        Ok(())
    }
}
