// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Request-block intake: routes each block by its function the way the
//! storage port hands blocks to a miniport's start-io entry.

use std::sync::Arc;

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

use scsi_sys::scsi::srb_status;
use scsi_sys::scsi::SRB_STATUS_ABORT_FAILED;
use scsi_sys::scsi::SRB_STATUS_INVALID_REQUEST;
use scsi_sys::scsi::SRB_STATUS_NO_DEVICE;
use scsi_sys::scsi::SRB_STATUS_PENDING;
use scsi_sys::scsi::SRB_STATUS_SUCCESS;
use scsi_sys::transact::btl;
use scsi_sys::transact::btl_b;
use scsi_sys::transact::btl_from_index;
use scsi_sys::transact::btl_t;

use crate::scsi::srb_execute_scsi;
use crate::srb::Srb;
use crate::srb::SrbFunction;
use crate::unit::Hba;

/// Capabilities reported for the virtual disks: removable, silently
/// installed, and safe to surprise-remove.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct DeviceCapabilities {
    pub removable: u8,
    pub silent_install: u8,
    pub surprise_removal_ok: u8,
    pub _pad0: u8,
}
const_assert_eq!(4, std::mem::size_of::<DeviceCapabilities>());

pub fn device_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        removable: 1,
        silent_install: 1,
        surprise_removal_ok: 1,
        _pad0: 0,
    }
}

/// Accepts one request block. Blocks that do not return pending are
/// completed before this returns.
pub fn start_io(hba: &Hba, srb: &Arc<Srb>) {
    let status = match srb.function() {
        SrbFunction::ExecuteScsi => srb_execute_scsi(hba, srb),
        SrbFunction::AbortCommand(target) => srb_abort_command(hba, srb, target),
        SrbFunction::ResetBus => srb_reset_bus(hba, srb),
        SrbFunction::ResetDevice => srb_reset_device(hba, srb),
        SrbFunction::ResetLogicalUnit => srb_reset_logical_unit(hba, srb),
        // A SYNCHRONIZE CACHE must have preceded these.
        SrbFunction::Flush | SrbFunction::Shutdown => SRB_STATUS_SUCCESS,
        SrbFunction::Pnp => srb_pnp(srb),
        SrbFunction::Wmi => SRB_STATUS_INVALID_REQUEST,
    };

    if srb_status(status) != SRB_STATUS_PENDING {
        srb.complete(status);
    }
}

fn srb_abort_command(hba: &Hba, srb: &Arc<Srb>, target: &Arc<Srb>) -> u8 {
    let Some(unit) = hba.reference_by_btl(srb.btl()) else {
        return SRB_STATUS_NO_DEVICE;
    };
    match unit.ioq().cancel_srb(target) {
        Ok(()) => SRB_STATUS_SUCCESS,
        Err(_) => SRB_STATUS_ABORT_FAILED,
    }
}

fn srb_reset_bus(hba: &Hba, srb: &Arc<Srb>) -> u8 {
    if btl_b(srb.btl()) != 0 {
        return SRB_STATUS_NO_DEVICE;
    }
    // Reset every unit's queue; queues keep accepting work afterwards.
    for index in 0..hba.capacity() {
        if let Some(unit) = hba.reference_by_btl(btl_from_index(index)) {
            unit.ioq().reset(false);
        }
    }
    SRB_STATUS_SUCCESS
}

fn srb_reset_device(hba: &Hba, srb: &Arc<Srb>) -> u8 {
    // The LUN of a reset-device block is not valid; address by target only.
    let Some(unit) = hba.reference_by_btl(btl(btl_b(srb.btl()), btl_t(srb.btl()), 0)) else {
        return SRB_STATUS_NO_DEVICE;
    };
    unit.ioq().reset(false);
    SRB_STATUS_SUCCESS
}

fn srb_reset_logical_unit(hba: &Hba, srb: &Arc<Srb>) -> u8 {
    let Some(unit) = hba.reference_by_btl(srb.btl()) else {
        return SRB_STATUS_NO_DEVICE;
    };
    unit.ioq().reset(false);
    SRB_STATUS_SUCCESS
}

fn srb_pnp(srb: &Srb) -> u8 {
    let capabilities = device_capabilities();
    let mut state = srb.state();
    let total = std::mem::size_of::<DeviceCapabilities>();
    if state.data.len() < total {
        return SRB_STATUS_INVALID_REQUEST;
    }
    state.data[..total].copy_from_slice(capabilities.as_bytes());
    state.data_transfer_length = total;
    SRB_STATUS_SUCCESS
}

#[cfg(test)]
mod tests {
    use scsi_sys::scsi::SCSIOP_READ16;
    use scsi_sys::scsi::SRB_STATUS_ABORTED;
    use scsi_sys::transact::StorageUnitParams;

    use super::*;
    use crate::cdb::build_rw_cdb;
    use crate::srb::DataDirection;

    fn provisioned_hba() -> Arc<Hba> {
        let hba = Hba::new(16);
        let params = StorageUnitParams {
            guid: [1; 16],
            block_count: 16,
            block_length: 512,
            max_transfer_length: 5 * 512,
            ..Default::default()
        };
        hba.provision(&params, 42).unwrap();
        hba
    }

    #[test]
    fn abort_command_cancels_posted_srb() {
        let hba = provisioned_hba();
        let cdb = build_rw_cdb(SCSIOP_READ16, 7, 5);
        let target = Srb::new_execute(0, &cdb, DataDirection::In, vec![0; 5 * 512]);
        start_io(&hba, &target);
        assert!(!target.is_completed());

        let abort = Srb::new(
            0,
            SrbFunction::AbortCommand(Arc::clone(&target)),
            &[],
            DataDirection::None,
            Vec::new(),
        );
        start_io(&hba, &abort);
        assert_eq!(abort.wait().srb_status, SRB_STATUS_SUCCESS);
        assert_eq!(target.wait().srb_status, SRB_STATUS_ABORTED);

        // Aborting again fails: the block is gone.
        let abort = Srb::new(
            0,
            SrbFunction::AbortCommand(target),
            &[],
            DataDirection::None,
            Vec::new(),
        );
        start_io(&hba, &abort);
        assert_eq!(abort.wait().srb_status, SRB_STATUS_ABORT_FAILED);
    }

    #[test]
    fn reset_device_aborts_queued_io() {
        let hba = provisioned_hba();
        let cdb = build_rw_cdb(SCSIOP_READ16, 0, 5);
        let target = Srb::new_execute(0, &cdb, DataDirection::In, vec![0; 5 * 512]);
        start_io(&hba, &target);

        let reset = Srb::new(0, SrbFunction::ResetDevice, &[], DataDirection::None, Vec::new());
        start_io(&hba, &reset);
        assert_eq!(reset.wait().srb_status, SRB_STATUS_SUCCESS);
        assert_eq!(target.wait().srb_status, SRB_STATUS_ABORTED);

        // The queue is reset, not stopped.
        assert!(!hba.reference_by_btl(0).unwrap().ioq().stopped());
    }

    #[test]
    fn pnp_reports_capabilities() {
        let hba = provisioned_hba();
        let srb = Srb::new(0, SrbFunction::Pnp, &[], DataDirection::In, vec![0; 4]);
        start_io(&hba, &srb);
        assert_eq!(srb.wait().srb_status, SRB_STATUS_SUCCESS);
        assert_eq!(&srb.data()[..3], &[1, 1, 1]);
    }

    #[test]
    fn wmi_is_invalid() {
        let hba = provisioned_hba();
        let srb = Srb::new(0, SrbFunction::Wmi, &[], DataDirection::None, Vec::new());
        start_io(&hba, &srb);
        assert_eq!(srb.wait().srb_status, SRB_STATUS_INVALID_REQUEST);
    }
}
