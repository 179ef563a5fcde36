//! Bootstrap work queue with completion-barrier semantics.
//!
//! The queue holds the block requests a fresh node must download and is
//! drained by one worker per peer. A request is pending, in flight with
//! exactly one worker, or completed. `take` hands out pending requests and
//! blocks while the queue is empty but requests are still in flight
//! elsewhere — a failing worker requeues its outstanding request, and some
//! other worker must be able to pick it up. Only when nothing is pending
//! and nothing is in flight is the queue permanently drained.
//!
//! The barrier releases when every worker has reported done. Bootstrap
//! succeeded iff the queue was fully drained at that point; "all workers
//! died with work left over" releases the barrier too, with
//! `is_complete() == false`.

use std::collections::VecDeque;
use std::pin::pin;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use cairn_core::wire::BlockRequest;

pub struct RequestQueue {
    state: Mutex<State>,
    /// Wakes blocked takers on requeue and on permanent drain.
    takers: Notify,
    /// Barrier: flips to true when the last worker reports done.
    done: watch::Sender<bool>,
}

struct State {
    pending: VecDeque<BlockRequest>,
    in_flight: usize,
    workers: usize,
    drained_at_exit: bool,
}

impl RequestQueue {
    pub fn new(requests: impl IntoIterator<Item = BlockRequest>, workers: usize) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: Mutex::new(State {
                pending: requests.into_iter().collect(),
                in_flight: 0,
                workers,
                drained_at_exit: false,
            }),
            takers: Notify::new(),
            done,
        }
    }

    /// Remove and return one request, marking it in flight.
    ///
    /// Returns `None` only when the queue is permanently drained: nothing
    /// pending and nothing in flight that could still be requeued.
    pub async fn take(&self) -> Option<BlockRequest> {
        loop {
            let mut notified = pin!(self.takers.notified());
            {
                let mut state = self.state.lock();
                if let Some(request) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(request);
                }
                if state.in_flight == 0 {
                    return None;
                }
                // Register for a wakeup while still holding the lock, so a
                // requeue between unlock and await cannot be missed.
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Mark an in-flight request completed: its bytes are in the store.
    pub fn complete(&self, _request: BlockRequest) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 && state.pending.is_empty() {
            // Permanently drained: wake takers so they can observe it.
            self.takers.notify_waiters();
        }
    }

    /// Push an in-flight request back to the tail. Called by a worker whose
    /// peer failed mid-transfer, before `mark_worker_done`.
    pub fn requeue(&self, request: BlockRequest) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        state.pending.push_back(request);
        self.takers.notify_waiters();
    }

    /// Worker exit notification. Releases the barrier once all workers
    /// have reported.
    pub fn mark_worker_done(&self) {
        let mut state = self.state.lock();
        state.workers -= 1;
        if state.workers == 0 {
            state.drained_at_exit = state.pending.is_empty() && state.in_flight == 0;
            drop(state);
            self.done.send_replace(true);
            self.takers.notify_waiters();
        }
    }

    /// Block until the barrier releases.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in self, so this cannot fail while we hold &self.
        let _ = rx.wait_for(|released| *released).await;
    }

    /// True iff the queue was empty, with nothing in flight, when the last
    /// worker exited. Only meaningful after `wait` returns.
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        state.workers == 0 && state.drained_at_exit
    }
}
