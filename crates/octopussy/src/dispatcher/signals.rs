// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX signal capture.
//!
//! Each registered signal gets a `signal-hook` flag owned by the dispatcher
//! that asked for it. The loop swaps the flags back to false and calls
//! [`crate::WorkProcess::signal`] from its own thread.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::FORBIDDEN;
use signal_hook::SigId;

use super::WpKey;
use crate::wp::SignalMode;

fn check_signum(signum: i32) -> io::Result<()> {
    if !(1..64).contains(&signum) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("signal number {} out of range", signum),
        ));
    }
    if FORBIDDEN.contains(&signum) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("signal {} cannot be handled", signum),
        ));
    }
    Ok(())
}

struct Registration {
    receivers: Vec<WpKey>,
    raised: Arc<AtomicBool>,
    hook: SigId,
}

/// Signal registrations of one dispatcher.
#[derive(Default)]
pub(crate) struct SignalTable {
    delivered: HashMap<i32, Registration>,
    /// Signals swallowed by a flag nobody reads.
    ignored: HashMap<i32, SigId>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any signal is routed to a work process.
    pub fn is_active(&self) -> bool {
        !self.delivered.is_empty()
    }

    /// Register `owner` for `signum`. Signals `signal-hook` refuses to
    /// handle (SIGKILL, SIGSTOP, SIGSEGV and friends) are an error.
    pub fn add(&mut self, owner: WpKey, signum: i32, mode: SignalMode) -> io::Result<()> {
        check_signum(signum)?;
        match mode {
            SignalMode::Deliver => {
                if let Some(reg) = self.delivered.get_mut(&signum) {
                    if !reg.receivers.contains(&owner) {
                        reg.receivers.push(owner);
                    }
                    return Ok(());
                }
                let raised = Arc::new(AtomicBool::new(false));
                let hook = signal_hook::flag::register(signum, Arc::clone(&raised))?;
                self.delivered.insert(
                    signum,
                    Registration {
                        receivers: vec![owner],
                        raised,
                        hook,
                    },
                );
            }
            SignalMode::Ignore => {
                if !self.ignored.contains_key(&signum) {
                    let hook = signal_hook::flag::register(signum, Arc::new(AtomicBool::new(false)))?;
                    self.ignored.insert(signum, hook);
                }
            }
        }
        Ok(())
    }

    pub fn remove_owner(&mut self, owner: WpKey) {
        let mut emptied = Vec::new();
        for (signum, reg) in self.delivered.iter_mut() {
            reg.receivers.retain(|k| *k != owner);
            if reg.receivers.is_empty() {
                emptied.push(*signum);
            }
        }
        for signum in emptied {
            if let Some(reg) = self.delivered.remove(&signum) {
                if !signal_hook::low_level::unregister(reg.hook) {
                    log::warn!("[signals] handler for signal {} was already gone", signum);
                }
            }
        }
    }

    /// Collect pending signals as `(signum, receivers)` pairs.
    pub fn collect(&self) -> Vec<(i32, Vec<WpKey>)> {
        let mut pending: Vec<(i32, Vec<WpKey>)> = self
            .delivered
            .iter()
            .filter(|(_, reg)| reg.raised.swap(false, Ordering::Relaxed))
            .map(|(signum, reg)| (*signum, reg.receivers.clone()))
            .collect();
        pending.sort_by_key(|(signum, _)| *signum);
        pending
    }
}

impl Drop for SignalTable {
    fn drop(&mut self) {
        for (_, reg) in self.delivered.drain() {
            signal_hook::low_level::unregister(reg.hook);
        }
        for (_, hook) in self.ignored.drain() {
            signal_hook::low_level::unregister(hook);
        }
    }
}

impl std::fmt::Debug for SignalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut delivered: Vec<i32> = self.delivered.keys().copied().collect();
        delivered.sort_unstable();
        f.debug_struct("SignalTable")
            .field("delivered", &delivered)
            .field("ignored", &self.ignored.len())
            .finish()
    }
}
