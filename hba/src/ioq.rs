// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-unit I/O queue.
//!
//! The queue mediates request blocks between the adapter's intake path and
//! user-mode dispatcher workers. A posted block sits on the pending list
//! until a worker claims it with [`Ioq::start_processing`], which hands out
//! an opaque hint; it then lives in the in-process set until
//! [`Ioq::end_processing`] carries a response back for that hint. Chunked
//! transfers are reinserted at the head of the pending list so a large
//! transfer finishes before newer arrivals are served.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use scsi_sys::hash_mix64;
use scsi_sys::scsi::srb_status;
use scsi_sys::scsi::SRB_STATUS_ABORTED;
use scsi_sys::scsi::SRB_STATUS_PENDING;

use crate::qevent::CancelToken;
use crate::qevent::Qevent;
use crate::qevent::WaitStatus;
use crate::srb::Srb;
use crate::unit::StorageUnit;
use crate::Error;
use crate::Result;

/// Outcome of [`Ioq::start_processing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// A request was claimed; the prepare callback ran.
    Success,
    Timeout,
    Cancelled,
    /// Spurious wakeup (the pending list was empty after a reset); the
    /// caller should retry or bail out if the queue stopped.
    Unsuccessful,
}

/// Queue entry: one posted request block plus its delivery state.
pub struct SrbExtension {
    pub srb: Arc<Srb>,
    pub unit: Arc<StorageUnit>,
    /// Opaque routing hint handed to the dispatcher; never zero.
    pub hint: u64,
    /// Bytes of the block's data buffer involved in user-mode processing.
    pub data_length: usize,
    /// Bytes already delivered; advanced by the chunking complete step.
    pub chunk_offset: usize,
}

struct IoqState {
    stopped: bool,
    next_seq: u64,
    pending: VecDeque<SrbExtension>,
    in_process: HashMap<u64, SrbExtension>,
}

pub struct Ioq {
    state: Mutex<IoqState>,
    pending_event: Qevent,
}

impl Default for Ioq {
    fn default() -> Self {
        Self::new()
    }
}

impl Ioq {
    pub fn new() -> Self {
        Ioq {
            state: Mutex::new(IoqState {
                stopped: false,
                next_seq: 1,
                pending: VecDeque::new(),
                in_process: HashMap::new(),
            }),
            pending_event: Qevent::new(),
        }
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Appends a request block to the pending list.
    pub fn post(&self, srb: Arc<Srb>, unit: Arc<StorageUnit>, data_length: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::Cancelled);
        }
        // The mixer is a bijection, so distinct sequence numbers can never
        // produce colliding hints, and only 0 maps to 0.
        let hint = hash_mix64(state.next_seq);
        state.next_seq += 1;
        state.pending.push_back(SrbExtension {
            srb,
            unit,
            hint,
            data_length,
            chunk_offset: 0,
        });
        self.pending_event.set();
        Ok(())
    }

    /// Waits for a pending request block and claims it.
    ///
    /// On success the block has moved to the in-process set and `prepare`
    /// has run against it (filling the outgoing wire request).
    pub fn start_processing<F>(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
        prepare: F,
    ) -> StartStatus
    where
        F: FnOnce(&mut SrbExtension),
    {
        match self.pending_event.wait(timeout, cancel) {
            WaitStatus::Timeout => return StartStatus::Timeout,
            WaitStatus::Cancelled => return StartStatus::Cancelled,
            WaitStatus::Success => {}
        }

        let mut state = self.state.lock().unwrap();
        if state.stopped {
            // Permanently wake the next waiter.
            self.pending_event.set();
            return StartStatus::Cancelled;
        }
        match state.pending.pop_front() {
            Some(mut ext) => {
                let wake = !state.pending.is_empty();
                prepare(&mut ext);
                state.in_process.insert(ext.hint, ext);
                if wake {
                    self.pending_event.set();
                }
                StartStatus::Success
            }
            None => StartStatus::Unsuccessful,
        }
    }

    /// Carries a response back to the in-process request block for `hint`.
    ///
    /// Unknown hints are silently dropped; the block was cancelled or the
    /// queue was reset in the meantime. When `complete` returns
    /// `SRB_STATUS_PENDING` the block still has chunks left and goes back
    /// to the head of the pending list.
    pub fn end_processing<F>(&self, hint: u64, complete: F)
    where
        F: FnOnce(&mut SrbExtension) -> u8,
    {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        let Some(mut ext) = state.in_process.remove(&hint) else {
            return;
        };
        let status = complete(&mut ext);
        if srb_status(status) == SRB_STATUS_PENDING {
            state.pending.push_front(ext);
            self.pending_event.set();
        } else {
            ext.srb.complete(status);
        }
    }

    /// Fail-completes every queued block; with `stop` the queue also stops
    /// accepting work and releases all current and future waiters.
    pub fn reset(&self, stop: bool) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        for ext in state.pending.drain(..) {
            ext.srb.complete(SRB_STATUS_ABORTED);
        }
        for (_, ext) in state.in_process.drain() {
            ext.srb.complete(SRB_STATUS_ABORTED);
        }
        if stop {
            state.stopped = true;
            self.pending_event.set();
        }
    }

    /// Removes a specific request block from the queue and fail-completes
    /// it.
    pub fn cancel_srb(&self, srb: &Arc<Srb>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(Error::Cancelled);
        }
        if let Some(pos) = state
            .pending
            .iter()
            .position(|ext| Arc::ptr_eq(&ext.srb, srb))
        {
            let ext = state.pending.remove(pos).unwrap();
            ext.srb.complete(SRB_STATUS_ABORTED);
            return Ok(());
        }
        let hint = state
            .in_process
            .iter()
            .find(|(_, ext)| Arc::ptr_eq(&ext.srb, srb))
            .map(|(hint, _)| *hint);
        match hint {
            Some(hint) => {
                let ext = state.in_process.remove(&hint).unwrap();
                ext.srb.complete(SRB_STATUS_ABORTED);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    #[cfg(test)]
    fn depths(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.pending.len(), state.in_process.len())
    }
}

impl Drop for Ioq {
    fn drop(&mut self) {
        self.reset(false);
    }
}
