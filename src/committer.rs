//! Applying committed entries to the state machine.
//!
//! Raft tracks two indexes: `commitIndex`, owned by the consensus module,
//! and `lastApplied`, owned by the service's state machine. The module only
//! ever pushes `commitIndex` forward and tells the committer; applying
//! entries up to it is the committer's job, asynchronously to the module
//! (#RFS-A1).

use std::fmt;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;

use crate::message::LogIndex;

/// The component that applies committed log entries to the state machine.
///
/// Owns `lastApplied`. Any error stops the consensus module.
pub trait Committer {
    /// Tells the committer that `commitIndex` has advanced to
    /// `commit_index`: entries up to it may now be applied.
    ///
    /// Called once per distinct value, with strictly increasing values never
    /// beyond the end of the log. Must not block; application is expected to
    /// happen asynchronously.
    fn commit_async(&mut self, commit_index: LogIndex) -> Result<()>;

    /// Associates `signal` with the log entry at `index`, to be fired once
    /// that entry has been applied to the state machine.
    fn register_listener(&mut self, index: LogIndex, signal: CommitSignal) -> Result<()>;
}

/// Creates a connected [`CommitSignal`] / [`CommitHandle`] pair.
pub fn commit_pair() -> (CommitSignal, CommitHandle) {
    let (tx, rx) = mpsc::sync_channel(1);
    (CommitSignal { tx }, CommitHandle { rx })
}

/// The sending half of a one-shot commit notification, held by the
/// committer.
pub struct CommitSignal {
    tx: mpsc::SyncSender<()>,
}

impl CommitSignal {
    /// Fires the notification. Dropped handles are ignored.
    pub fn notify(self) {
        let _ = self.tx.try_send(());
    }
}

/// The receiving half of a one-shot commit notification, returned to the
/// caller of [`append_command`][crate::core::Consensus::append_command].
///
/// Resolves once the appended command has been applied to the state machine.
/// If leadership is lost before the entry commits, the committer drops the
/// signal and the handle reports cancellation instead.
pub struct CommitHandle {
    rx: mpsc::Receiver<()>,
}

impl CommitHandle {
    /// Returns whether the command has been applied, without blocking.
    pub fn is_complete(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Blocks until the command is applied or the signal is dropped.
    /// Returns whether the command was applied.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Like [`wait`][Self::wait], but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

impl fmt::Debug for CommitHandle {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CommitHandle").finish_non_exhaustive()
    }
}
