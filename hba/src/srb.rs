// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! SCSI request blocks.
//!
//! An [`Srb`] is one in-flight command as seen by the adapter: the CDB, the
//! data buffer, and a completion slot the submitter waits on. The adapter
//! either answers it synchronously or parks it on a unit's I/O queue and
//! completes it later from a transact response.

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

use log::debug;
use scsi_sys::scsi::srb_status;
use scsi_sys::scsi::SenseData;
use scsi_sys::scsi::SCSISTAT_GOOD;
use scsi_sys::scsi::SRB_STATUS_PENDING;
use scsi_sys::scsi::SRB_STATUS_SUCCESS;

/// Direction of the data transfer, from the initiator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    None,
    /// Device to initiator (e.g. READ, INQUIRY).
    In,
    /// Initiator to device (e.g. WRITE, UNMAP).
    Out,
}

/// Which request-block function this block carries.
#[derive(Clone)]
pub enum SrbFunction {
    ExecuteScsi,
    /// Cancel a previously posted request block.
    AbortCommand(Arc<Srb>),
    ResetBus,
    ResetDevice,
    ResetLogicalUnit,
    Flush,
    Shutdown,
    Pnp,
    Wmi,
}

/// Mutable request-block state, guarded by the block's lock.
pub struct SrbState {
    pub data: Vec<u8>,
    pub data_transfer_length: usize,
    pub scsi_status: u8,
    pub sense: Option<SenseData>,
    completion: Option<u8>,
}

/// Snapshot of a completed request block.
#[derive(Debug, Clone)]
pub struct SrbCompletion {
    pub srb_status: u8,
    pub scsi_status: u8,
    pub sense: Option<SenseData>,
    pub data_transfer_length: usize,
}

pub struct Srb {
    btl: u32,
    function: SrbFunction,
    cdb: [u8; 16],
    data_direction: DataDirection,
    state: Mutex<SrbState>,
    done: Condvar,
}

impl Srb {
    pub fn new(
        btl: u32,
        function: SrbFunction,
        cdb: &[u8],
        data_direction: DataDirection,
        data: Vec<u8>,
    ) -> Arc<Srb> {
        let mut cdb16 = [0u8; 16];
        let len = cdb.len().min(16);
        cdb16[..len].copy_from_slice(&cdb[..len]);
        let data_transfer_length = data.len();
        Arc::new(Srb {
            btl,
            function,
            cdb: cdb16,
            data_direction,
            state: Mutex::new(SrbState {
                data,
                data_transfer_length,
                scsi_status: SCSISTAT_GOOD,
                sense: None,
                completion: None,
            }),
            done: Condvar::new(),
        })
    }

    pub fn new_execute(
        btl: u32,
        cdb: &[u8],
        data_direction: DataDirection,
        data: Vec<u8>,
    ) -> Arc<Srb> {
        Srb::new(btl, SrbFunction::ExecuteScsi, cdb, data_direction, data)
    }

    pub fn btl(&self) -> u32 {
        self.btl
    }

    pub fn function(&self) -> &SrbFunction {
        &self.function
    }

    pub fn cdb(&self) -> &[u8; 16] {
        &self.cdb
    }

    pub fn data_direction(&self) -> DataDirection {
        self.data_direction
    }

    pub fn state(&self) -> MutexGuard<'_, SrbState> {
        self.state.lock().unwrap()
    }

    /// Completes the block with the given SRB status and wakes the waiter.
    ///
    /// A block completes at most once; later calls are ignored (the block
    /// may race between queue reset and cancellation).
    pub fn complete(&self, status: u8) {
        debug_assert_ne!(srb_status(status), SRB_STATUS_PENDING);
        let mut state = self.state.lock().unwrap();
        if state.completion.is_some() {
            return;
        }
        if srb_status(status) != SRB_STATUS_SUCCESS {
            debug!("srb {:02x?} completed with status {:#04x}", self.cdb[0], status);
        }
        state.completion = Some(status);
        self.done.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completion.is_some()
    }

    /// Blocks until the request completes.
    pub fn wait(&self) -> SrbCompletion {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(srb_status) = state.completion {
                return SrbCompletion {
                    srb_status,
                    scsi_status: state.scsi_status,
                    sense: state.sense,
                    data_transfer_length: state.data_transfer_length,
                };
            }
            state = self.done.wait(state).unwrap();
        }
    }

    /// Clones the data buffer; test and pass-through convenience.
    pub fn data(&self) -> Vec<u8> {
        self.state.lock().unwrap().data.clone()
    }
}
