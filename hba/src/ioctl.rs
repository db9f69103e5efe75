// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The adapter's service surface: the transact exchange the dispatcher
//! workers drive, transact-process reassignment, and a pass-through
//! executor that submits a CDB and waits for its completion.

use std::sync::Arc;

use scsi_sys::scsi::SenseData;
use scsi_sys::transact::TransactReq;
use scsi_sys::transact::TransactRsp;

use crate::ioq::StartStatus;
use crate::qevent::CancelToken;
use crate::scsi;
use crate::srb::DataDirection;
use crate::srb::Srb;
use crate::unit::Hba;
use crate::Error;
use crate::Result;

impl Hba {
    /// One transact exchange: optionally carries a response back to an
    /// in-process request, then optionally blocks until the next request
    /// is available.
    ///
    /// Returns `Ok(true)` when `req` was filled with a new request and
    /// `Ok(false)` when there is none (response-only call or timeout).
    /// Only the unit's transact process may call this; a missing unit
    /// reports `Cancelled` so dispatcher loops wind down.
    pub fn transact(
        &self,
        btl: u32,
        process_id: u32,
        rsp: Option<&TransactRsp>,
        req: Option<&mut TransactReq>,
        mut data_buffer: Option<&mut [u8]>,
        cancel: Option<&CancelToken>,
    ) -> Result<bool> {
        if rsp.is_none() && req.is_none() {
            return Err(Error::InvalidParameter);
        }
        if req.is_some() && data_buffer.is_none() {
            return Err(Error::InvalidParameter);
        }

        let unit = self.reference_by_btl(btl).ok_or(Error::Cancelled)?;
        if process_id != unit.transact_process_id() {
            return Err(Error::AccessDenied);
        }
        if let Some(buffer) = data_buffer.as_deref() {
            if buffer.len() < unit.params().max_transfer_length as usize {
                return Err(Error::InvalidParameter);
            }
        }

        if let Some(rsp) = rsp {
            unit.ioq()
                .end_processing(rsp.hint, |ext| scsi::complete(ext, rsp, data_buffer.as_deref()));
        }

        if let Some(req) = req {
            *req = TransactReq::default();
            let buffer = data_buffer.as_deref_mut().unwrap();

            // Wait for a request to arrive; spurious wakeups after a
            // device reset loop back into the wait.
            loop {
                let status = unit
                    .ioq()
                    .start_processing(None, cancel, |ext| scsi::prepare(ext, &mut *req, &mut *buffer));
                match status {
                    StartStatus::Success => return Ok(true),
                    StartStatus::Timeout => return Ok(false),
                    StartStatus::Cancelled => return Err(Error::Cancelled),
                    StartStatus::Unsuccessful => {
                        if unit.ioq().stopped() {
                            return Err(Error::Cancelled);
                        }
                    }
                }
            }
        }

        Ok(false)
    }

    /// Reassigns which process may issue transact calls for this unit.
    pub fn set_transact_process_id(&self, btl: u32, process_id: u32) -> Result<()> {
        let unit = self.reference_by_btl(btl).ok_or(Error::Cancelled)?;
        unit.set_transact_process_id(process_id);
        Ok(())
    }
}

/// Completion of a pass-through execution.
#[derive(Debug, Clone)]
pub struct ScsiExecuteResult {
    pub srb_status: u8,
    pub scsi_status: u8,
    pub sense: Option<SenseData>,
    pub data: Vec<u8>,
    pub data_length: usize,
}

/// Submits one CDB to the addressed unit and waits for its completion,
/// the way the pass-through ioctl drives the real adapter.
pub fn scsi_execute(
    hba: &Hba,
    btl: u32,
    cdb: &[u8],
    data_direction: DataDirection,
    data: Vec<u8>,
) -> ScsiExecuteResult {
    let srb = Srb::new_execute(btl, cdb, data_direction, data);
    crate::io::start_io(hba, &srb);
    let completion = srb.wait();
    ScsiExecuteResult {
        srb_status: completion.srb_status,
        scsi_status: completion.scsi_status,
        sense: completion.sense,
        data: srb.data(),
        data_length: completion.data_transfer_length,
    }
}
