// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-thread entry point into a dispatcher.
//!
//! Other threads never touch dispatcher state. They push a [`Command`] into a
//! mutex-guarded FIFO and wake the poll; the loop drains the FIFO at the top
//! of every iteration and then signals a condition variable so that
//! [`DispatcherHandle::flush`] can wait for its commands to be enacted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Waker;
use parking_lot::{Condvar, Mutex};

use crate::address::{MsgAddress, Scope};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::wp::WorkProcess;

/// Work handed to the dispatcher thread.
pub(crate) enum Command {
    Send { msg: Message, to: MsgAddress },
    Publish { msg: Message, scope: Scope },
    Attach(Box<dyn WorkProcess>),
    Stop,
}

#[derive(Default)]
struct QueueState {
    commands: VecDeque<Command>,
    /// Sequence number of the last submitted command.
    submitted: u64,
    /// Every command up to this sequence number has been enacted.
    enacted: u64,
    closed: bool,
}

/// FIFO + condvar shared between a dispatcher and its handles.
#[derive(Default)]
pub(crate) struct CommandQueue {
    state: Mutex<QueueState>,
    enacted: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, cmd: Command) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Stopped);
        }
        state.commands.push_back(cmd);
        state.submitted += 1;
        Ok(state.submitted)
    }

    /// Take every queued command. Returns the ticket to pass to
    /// [`CommandQueue::mark_enacted`] once they have been carried out.
    pub fn drain(&self) -> (Vec<Command>, u64) {
        let mut state = self.state.lock();
        let upto = state.submitted;
        (state.commands.drain(..).collect(), upto)
    }

    pub fn mark_enacted(&self, upto: u64) {
        let mut state = self.state.lock();
        if upto > state.enacted {
            state.enacted = upto;
            self.enacted.notify_all();
        }
    }

    fn wait_enacted(&self, ticket: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.enacted < ticket && !state.closed {
            if self.enacted.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.enacted >= ticket
    }

    /// Refuse further commands and release waiters.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.commands.clear();
        self.enacted.notify_all();
    }
}

/// Thread-safe handle for submitting work to a dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    queue: Arc<CommandQueue>,
    waker: Arc<Waker>,
}

impl DispatcherHandle {
    pub(crate) fn new(queue: Arc<CommandQueue>, waker: Arc<Waker>) -> Self {
        Self { queue, waker }
    }

    fn submit(&self, cmd: Command) -> Result<u64> {
        let ticket = self.queue.push(cmd)?;
        self.waker.wake()?;
        Ok(ticket)
    }

    /// Send `msg` to `to` with the dispatcher as sender.
    pub fn send(&self, msg: Message, to: MsgAddress) -> Result<()> {
        self.submit(Command::Send { msg, to }).map(|_| ())
    }

    /// Publish `msg` with the dispatcher as sender.
    pub fn publish(&self, msg: Message, scope: Scope) -> Result<()> {
        self.submit(Command::Publish { msg, scope }).map(|_| ())
    }

    /// Attach a work process from another thread.
    pub fn attach(&self, wp: Box<dyn WorkProcess>) -> Result<()> {
        self.submit(Command::Attach(wp)).map(|_| ())
    }

    /// Ask the dispatcher loop to exit.
    pub fn stop(&self) -> Result<()> {
        self.submit(Command::Stop).map(|_| ())
    }

    /// Block until every command submitted so far has been enacted, or until
    /// `timeout` elapses. Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> Result<bool> {
        let ticket = {
            let state = self.queue.state.lock();
            if state.closed {
                return Err(Error::Stopped);
            }
            state.submitted
        };
        self.waker.wake()?;
        Ok(self.queue.wait_enacted(ticket, timeout))
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle").finish_non_exhaustive()
    }
}
