// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Running a dispatcher on a dedicated OS thread.

use std::sync::mpsc::sync_channel;
use std::thread::{self, JoinHandle};

use super::{Dispatcher, DispatcherHandle};
use crate::address::MsgAddress;
use crate::context::Context;
use crate::error::{Error, Result};

/// A dispatcher running its poll loop on its own thread.
///
/// Dropping the value stops the loop and joins the thread.
pub struct DispatcherThread {
    handle: DispatcherHandle,
    address: MsgAddress,
    join: Option<JoinHandle<Result<()>>>,
}

impl DispatcherThread {
    /// Build a dispatcher from `context` on a new thread, run `setup` on it
    /// (attach work processes there), start it and enter the poll loop.
    ///
    /// Returns once the dispatcher is running, or with the error from
    /// construction, `setup` or start.
    pub fn spawn<F>(context: Context, setup: F) -> Result<Self>
    where
        F: FnOnce(&mut Dispatcher) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = sync_channel(1);
        let join = thread::Builder::new()
            .name("octopussy-dsp".to_string())
            .spawn(move || -> Result<()> {
                let mut dsp = match Dispatcher::new(context) {
                    Ok(dsp) => dsp,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return Ok(());
                    }
                };
                if let Err(e) = setup(&mut dsp).and_then(|()| dsp.start()) {
                    let _ = tx.send(Err(e));
                    return Ok(());
                }
                let _ = tx.send(Ok((dsp.handle(), dsp.address())));
                dsp.poll_loop()
            })?;

        match rx.recv() {
            Ok(Ok((handle, address))) => Ok(Self {
                handle,
                address,
                join: Some(join),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(Error::Stopped)
            }
        }
    }

    pub fn handle(&self) -> &DispatcherHandle {
        &self.handle
    }

    /// Address of the hosted dispatcher.
    pub fn address(&self) -> MsgAddress {
        self.address
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the loop and wait for the thread. Returns the loop's result.
    pub fn stop(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        // The loop may already have exited on its own.
        let _ = self.handle.stop();
        join.join()
            .map_err(|_| Error::Io(std::io::Error::other("dispatcher thread panicked")))?
    }
}

impl Drop for DispatcherThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("[dispatcher] thread ended with error: {}", e);
        }
    }
}
