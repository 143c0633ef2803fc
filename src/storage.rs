//! Durable storage of a server's Raft persistent state.
//!
//! Raft requires `currentTerm` and `votedFor` to survive restarts (Figure 2,
//! "Persistent state on all servers"). The consensus module accesses them
//! through the [`PersistentState`] trait; [`JsonFilePersistentState`] is a
//! file-backed implementation and [`InMemoryPersistentState`] a volatile one
//! for tests.

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::message::{ServerId, TermNo};

/// Storage of `currentTerm` and `votedFor`.
///
/// Setters must be durable on return: the consensus module sends RPCs that
/// reflect the stored values immediately after writing them. Any error stops
/// the consensus module.
pub trait PersistentState {
    /// Returns the highest term this server has seen, or `0` if none.
    fn current_term(&self) -> TermNo;

    /// Durably stores `term` as the current term, clearing the vote when the
    /// term advances.
    ///
    /// # Errors
    ///
    /// A `term` lower than the stored current term is an error.
    fn set_current_term(&mut self, term: TermNo) -> Result<()>;

    /// Returns the candidate this server voted for in the current term, if
    /// any.
    fn voted_for(&self) -> Option<ServerId>;

    /// Durably stores the vote for the current term.
    fn set_voted_for(&mut self, voted_for: Option<ServerId>) -> Result<()>;
}

/// Volatile [`PersistentState`], for tests and throwaway clusters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InMemoryPersistentState {
    current_term: TermNo,
    voted_for: Option<ServerId>,
}

impl InMemoryPersistentState {
    /// Constructs state with term `0` and no vote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs state with the given term and no vote.
    pub fn with_current_term(current_term: TermNo) -> Self {
        Self {
            current_term,
            voted_for: None,
        }
    }
}

impl PersistentState for InMemoryPersistentState {
    fn current_term(&self) -> TermNo {
        self.current_term
    }

    fn set_current_term(&mut self, term: TermNo) -> Result<()> {
        if term < self.current_term {
            return Err(anyhow!(
                "current term cannot decrease from {} to {}",
                self.current_term,
                term
            ));
        }
        if term > self.current_term {
            self.voted_for = None;
        }
        self.current_term = term;
        Ok(())
    }

    fn voted_for(&self) -> Option<ServerId> {
        self.voted_for
    }

    fn set_voted_for(&mut self, voted_for: Option<ServerId>) -> Result<()> {
        self.voted_for = voted_for;
        Ok(())
    }
}

// On-disk shape; votedFor 0 encodes "none".
#[derive(Debug, Default, Deserialize, Serialize)]
struct PersistedState {
    #[serde(rename = "currentTerm")]
    current_term: u64,
    #[serde(rename = "votedFor")]
    voted_for: u64,
}

/// [`PersistentState`] stored as a small JSON file, written atomically.
///
/// The file holds `{"currentTerm": <u64>, "votedFor": <u64>}` with `0`
/// encoding "no vote". It is absent until the first write; an absent file
/// reads as term `0` with no vote. Writes go to a temporary file in the same
/// directory which is then renamed over the target, so a crash mid-write
/// never leaves a torn file.
#[derive(Debug)]
pub struct JsonFilePersistentState {
    path: PathBuf,
    state: PersistedState,
}

impl JsonFilePersistentState {
    /// Opens or initializes persistent state at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("corrupt persistent state file {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => PersistedState::default(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("cannot read persistent state file {}", path.display())
                })
            }
        };
        Ok(Self { path, state })
    }

    fn write_atomically(&self) -> Result<()> {
        let data = serde_json::to_vec(&self.state)?;
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        fs::write(&tmp_path, data)
            .with_context(|| format!("cannot write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("cannot rename into {}", self.path.display()))?;
        Ok(())
    }
}

impl PersistentState for JsonFilePersistentState {
    fn current_term(&self) -> TermNo {
        TermNo(self.state.current_term)
    }

    fn set_current_term(&mut self, term: TermNo) -> Result<()> {
        if term.0 < self.state.current_term {
            return Err(anyhow!(
                "current term cannot decrease from {} to {}",
                TermNo(self.state.current_term),
                term
            ));
        }
        if term.0 > self.state.current_term {
            self.state.voted_for = 0;
        }
        self.state.current_term = term.0;
        self.write_atomically()
    }

    fn voted_for(&self) -> Option<ServerId> {
        ServerId::new(self.state.voted_for)
    }

    fn set_voted_for(&mut self, voted_for: Option<ServerId>) -> Result<()> {
        self.state.voted_for = voted_for.map(ServerId::get).unwrap_or(0);
        self.write_atomically()
    }
}
