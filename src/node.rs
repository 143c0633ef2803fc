//! An active Raft node: a background thread driving the passive
//! [`Consensus`] module.
//!
//! The consensus module requires every call to be serialized. `Node` owns
//! the module on a dedicated processing thread and funnels ticks, inbound
//! RPCs, matched replies, and client commands to it through a single
//! bounded work queue, so hosts get a thread-safe surface without caring
//! about the serialization rule.
//!
//! The `process_*` methods follow these conventions:
//!
//!  - Each call immediately returns a single-use receiver. The result is
//!    delivered later, once the processing thread gets to the request.
//!  - If processing fails, the node stops and nothing is delivered; the
//!    receiver reports disconnection. See [`stop_error`](Node::stop_error).
//!  - If the work queue is full, or the node has stopped, the call is
//!    dropped and the receiver reports disconnection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use log::error;
use rand_core::RngCore;

use crate::committer::{CommitHandle, Committer};
use crate::core::Consensus;
use crate::error::{AppendCommandError, RaftError, RaftResult};
use crate::log::Log;
use crate::message::{
    AppendEntries, AppendEntriesReply, Command, RequestVote, RequestVoteReply, ServerId,
};
use crate::rpc::RpcEgress;
use crate::storage::PersistentState;

const WORK_QUEUE_SIZE: usize = 100;

type Work<L, S, C, T, R> = Box<dyn FnOnce(&mut Consensus<L, S, C, T, R>) -> RaftResult<()> + Send>;

/// A running Raft server: a processing thread that owns a [`Consensus`]
/// module, ticks it at a fixed interval, and applies work sent by the
/// `process_*` methods.
///
/// The node stops when [`stop`](Self::stop) is called, when it is dropped,
/// or when the consensus module reports a [`RaftError`].
pub struct Node<L, S, C, T, R> {
    work_tx: Sender<Work<L, S, C, T, R>>,
    stop_tx: Sender<()>,
    stopped: Arc<AtomicBool>,
    stop_error: Arc<Mutex<Option<RaftError>>>,
}

impl<L, S, C, T, R> Node<L, S, C, T, R>
where
    L: Log + Send + 'static,
    S: PersistentState + Send + 'static,
    C: Committer + Send + 'static,
    T: RpcEgress + Send + 'static,
    R: RngCore + Send + 'static,
{
    /// Starts the processing thread for `consensus`, ticking it every
    /// `tick_interval`.
    pub fn spawn(mut consensus: Consensus<L, S, C, T, R>, tick_interval: Duration) -> Self {
        let (work_tx, work_rx) = bounded(WORK_QUEUE_SIZE);
        let (stop_tx, stop_rx) = bounded(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_error = Arc::new(Mutex::new(None));

        let thread_stopped = Arc::clone(&stopped);
        let thread_stop_error = Arc::clone(&stop_error);
        thread::spawn(move || {
            let ticker = tick(tick_interval);
            if let Err(err) = process(&mut consensus, work_rx, ticker, stop_rx) {
                error!("node stopped: {}", err);
                *thread_stop_error.lock().unwrap() = Some(err);
            }
            thread_stopped.store(true, Ordering::SeqCst);
        });

        Self {
            work_tx,
            stop_tx,
            stopped,
            stop_error,
        }
    }

    /// Delivers an AppendEntries RPC received from `from`. The reply to
    /// send back arrives on the returned receiver.
    pub fn process_append_entries(
        &self,
        from: ServerId,
        rpc: AppendEntries,
    ) -> mpsc::Receiver<AppendEntriesReply> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.run(move |consensus| {
            let reply = consensus.receive_append_entries(from, rpc, Instant::now())?;
            let _ = reply_tx.try_send(reply);
            Ok(())
        });
        reply_rx
    }

    /// Delivers a RequestVote RPC received from `from`. The reply to send
    /// back arrives on the returned receiver.
    pub fn process_request_vote(
        &self,
        from: ServerId,
        rpc: RequestVote,
    ) -> mpsc::Receiver<RequestVoteReply> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.run(move |consensus| {
            let reply = consensus.receive_request_vote(from, rpc, Instant::now())?;
            let _ = reply_tx.try_send(reply);
            Ok(())
        });
        reply_rx
    }

    /// Delivers the reply `from` sent to this server's AppendEntries RPC
    /// `sent_rpc`.
    pub fn process_append_entries_reply(
        &self,
        from: ServerId,
        sent_rpc: AppendEntries,
        reply: AppendEntriesReply,
    ) {
        self.run(move |consensus| consensus.receive_append_entries_reply(from, sent_rpc, reply));
    }

    /// Delivers the reply `from` sent to this server's RequestVote RPC
    /// `sent_rpc`.
    pub fn process_request_vote_reply(
        &self,
        from: ServerId,
        sent_rpc: RequestVote,
        reply: RequestVoteReply,
    ) {
        self.run(move |consensus| consensus.receive_request_vote_reply(from, sent_rpc, reply));
    }

    /// Submits `command` for appending to the replicated log.
    ///
    /// The receiver delivers either a [`CommitHandle`] resolving when the
    /// command is applied, or [`AppendCommandError::NotLeader`] if this
    /// server does not currently accept commands.
    pub fn append_command(
        &self,
        command: Command,
    ) -> mpsc::Receiver<Result<CommitHandle, AppendCommandError>> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.run(move |consensus| match consensus.append_command(command) {
            Ok(handle) => {
                let _ = reply_tx.try_send(Ok(handle));
                Ok(())
            }
            Err(AppendCommandError::NotLeader) => {
                let _ = reply_tx.try_send(Err(AppendCommandError::NotLeader));
                Ok(())
            }
            Err(AppendCommandError::Raft(err)) => Err(err),
        });
        reply_rx
    }

    /// Runs `fun` against the consensus module on the processing thread and
    /// delivers its result. Useful for observing state.
    pub fn inspect<F, V>(&self, fun: F) -> mpsc::Receiver<V>
    where
        F: FnOnce(&Consensus<L, S, C, T, R>) -> V + Send + 'static,
        V: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.run(move |consensus| {
            let _ = reply_tx.try_send(fun(consensus));
            Ok(())
        });
        reply_rx
    }

    /// Asks the processing thread to stop. Safe to call more than once;
    /// returns without waiting for the thread to finish.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Returns whether the processing thread has stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the error that stopped the processing thread, if it stopped
    /// with one. Each error is returned once.
    pub fn stop_error(&self) -> Option<RaftError> {
        self.stop_error.lock().unwrap().take()
    }

    fn run(&self, work: impl FnOnce(&mut Consensus<L, S, C, T, R>) -> RaftResult<()> + Send + 'static) {
        let _ = self.work_tx.try_send(Box::new(work));
    }
}

impl<L, S, C, T, R> Drop for Node<L, S, C, T, R> {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
    }
}

fn process<L, S, C, T, R>(
    consensus: &mut Consensus<L, S, C, T, R>,
    work_rx: Receiver<Work<L, S, C, T, R>>,
    ticker: Receiver<Instant>,
    stop_rx: Receiver<()>,
) -> RaftResult<()>
where
    L: Log,
    S: PersistentState,
    C: Committer,
    T: RpcEgress,
    R: RngCore,
{
    loop {
        select! {
            recv(work_rx) -> work => match work {
                Ok(work) => work(consensus)?,
                // All handles to the node are gone.
                Err(_) => return Ok(()),
            },
            recv(ticker) -> _instant => {
                // Tick with a fresh now; the ticker's instant may be stale
                // if the queue was busy.
                consensus.tick(Instant::now())?;
            }
            recv(stop_rx) -> _ => return Ok(()),
        }
    }
}
