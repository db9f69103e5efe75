// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Transport handles.
//!
//! A storage unit talks to its host through one of two interchangeable
//! transports, chosen by the open name: the adapter transport provisions a
//! unit in the virtual SCSI adapter and exchanges transacts with it, and
//! the pipe transport serves the unit over a message-mode socket.

use std::sync::Arc;

use hba::CancelToken;
use hba::Hba;

use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::TransactReq;
use scsi_sys::transact::TransactRsp;
use scsi_sys::transact::DEVICE_NAME;
use scsi_sys::transact::HARDWARE_ID;
use scsi_sys::transact::PIPE_PREFIX;

use crate::pipe;
use crate::pipe::PipeUnit;
use crate::Error;
use crate::Result;

/// Resolves a device name to the canonical adapter device path.
///
/// Literal paths (absolute, or already in device-path form) pass through;
/// a hardware id (the default, or anything with a wildcard) resolves to
/// the adapter's device name.
pub fn get_device_path(device_name: &str) -> Result<String> {
    if device_name.is_empty() {
        return Err(Error::InvalidParameter);
    }
    if device_name.starts_with('/') || device_name.starts_with("\\\\?\\") {
        return Ok(device_name.to_string());
    }
    if device_name == HARDWARE_ID || device_name.contains('*') || device_name.contains('\\') {
        return Ok(DEVICE_NAME.to_string());
    }
    Ok(device_name.to_string())
}

/// Adapter-transport connection: the unit provisioned in an [`Hba`].
pub struct DeviceHandle {
    hba: Arc<Hba>,
    cancel: CancelToken,
    process_id: u32,
}

impl DeviceHandle {
    pub fn hba(&self) -> &Arc<Hba> {
        &self.hba
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        // Release any transact still blocked on this handle.
        self.cancel.cancel();
    }
}

/// A storage unit's transport, tagged by kind.
pub enum StorageHandle {
    Device(DeviceHandle),
    Pipe(Arc<PipeUnit>),
}

impl StorageHandle {
    /// Opens a transport for `params`: `pipe:`-prefixed names select the
    /// pipe transport, everything else the in-process adapter. Returns the
    /// handle and the unit's BTL.
    pub fn open(name: &str, params: &StorageUnitParams) -> Result<(StorageHandle, u32)> {
        if name.starts_with(PIPE_PREFIX) {
            let (unit, btl) = pipe::open_pipe(name, params)?;
            Ok((StorageHandle::Pipe(unit), btl))
        } else {
            let _path = get_device_path(name)?;
            let hba = hba::global::init();
            Self::open_on(&hba, params)
        }
    }

    /// Opens an adapter-transport handle on a specific adapter instance.
    pub fn open_on(hba: &Arc<Hba>, params: &StorageUnitParams) -> Result<(StorageHandle, u32)> {
        let process_id = std::process::id();
        let btl = hba.provision(params, process_id)?;
        Ok((
            StorageHandle::Device(DeviceHandle {
                hba: Arc::clone(hba),
                cancel: CancelToken::new(),
                process_id,
            }),
            btl,
        ))
    }

    /// One transact exchange: deliver `rsp` (if any), wait for the next
    /// request into `req` (if requested). A zero `req.hint` afterwards
    /// means no request arrived.
    pub fn transact(
        &self,
        btl: u32,
        rsp: Option<&TransactRsp>,
        req: Option<&mut TransactReq>,
        data_buffer: &mut [u8],
    ) -> Result<()> {
        match self {
            StorageHandle::Device(device) => {
                device
                    .hba
                    .transact(
                        btl,
                        device.process_id,
                        rsp,
                        req,
                        Some(data_buffer),
                        Some(&device.cancel),
                    )
                    .map(|_| ())
                    .map_err(Error::from)
            }
            StorageHandle::Pipe(unit) => pipe::transact_pipe(unit, btl, rsp, req, data_buffer),
        }
    }

    /// Removes the unit from its host; pending transacts are cancelled.
    /// Idempotent from the caller's point of view: a second shutdown
    /// reports not-found.
    pub fn shutdown(&self, guid: &[u8; 16]) -> Result<()> {
        match self {
            StorageHandle::Device(device) => {
                device
                    .hba
                    .unprovision(Some(guid), 0, device.process_id)
                    .map_err(Error::from)
            }
            StorageHandle::Pipe(unit) => pipe::shutdown_pipe(unit, guid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params(guid: [u8; 16]) -> StorageUnitParams {
        StorageUnitParams {
            guid,
            block_count: 16,
            block_length: 512,
            max_transfer_length: 512,
            ..Default::default()
        }
    }

    #[test]
    fn device_path_resolution() {
        assert_eq!(get_device_path("/dev/whatever").unwrap(), "/dev/whatever");
        assert_eq!(get_device_path(HARDWARE_ID).unwrap(), DEVICE_NAME);
        assert_eq!(get_device_path("root\\*").unwrap(), DEVICE_NAME);
        assert_eq!(get_device_path(DEVICE_NAME).unwrap(), DEVICE_NAME);
        assert!(get_device_path("").is_err());
    }

    #[test]
    fn open_on_provisions_and_shutdown_unprovisions() {
        let hba = Hba::new(16);
        let params = test_params([3; 16]);
        let (handle, btl) = StorageHandle::open_on(&hba, &params).unwrap();
        assert!(hba.reference_by_btl(btl).is_some());
        handle.shutdown(&params.guid).unwrap();
        assert!(hba.reference_by_btl(btl).is_none());
        assert!(matches!(
            handle.shutdown(&params.guid),
            Err(Error::NotFound)
        ));
    }
}
