// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage-unit parameters and the transact request/response structures
//! exchanged between the adapter and the user-mode dispatcher.

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

/// Default device name of the in-process adapter.
pub const DEVICE_NAME: &str = "stgproxy";
/// Hardware id of the adapter as reported to device discovery.
pub const HARDWARE_ID: &str = "root/stgproxy";
/// Open names with this prefix select the pipe transport.
pub const PIPE_PREFIX: &str = "pipe:";
/// 8-character ASCII vendor id reported by INQUIRY.
pub const VENDOR_ID: [u8; 8] = *b"StgProxy";

/// Default number of storage-unit slots in the adapter table.
pub const STORAGE_UNIT_CAPACITY: usize = 16;
/// Hard upper bound of the slot table; also the size of the user-mode pipe
/// registry.
pub const STORAGE_UNIT_MAX_CAPACITY: usize = 64;

pub const fn btl(b: u8, t: u8, l: u8) -> u32 {
    ((b as u32) << 16) | ((t as u32) << 8) | (l as u32)
}

pub const fn btl_b(btl: u32) -> u8 {
    ((btl >> 16) & 0xff) as u8
}

pub const fn btl_t(btl: u32) -> u8 {
    ((btl >> 8) & 0xff) as u8
}

pub const fn btl_l(btl: u32) -> u8 {
    (btl & 0xff) as u8
}

pub const fn index_from_btl(btl: u32) -> usize {
    btl_t(btl) as usize
}

pub const fn btl_from_index(index: usize) -> u32 {
    btl(0, index as u8, 0)
}

// Service request codes.
pub const IOCTL_PROVISION: u8 = b'p';
pub const IOCTL_UNPROVISION: u8 = b'u';
pub const IOCTL_LIST: u8 = b'l';
pub const IOCTL_TRANSACT: u8 = b't';
pub const IOCTL_SET_TRANSACT_PID: u8 = b'i';

// Transact request kinds.
pub const TRANSACT_KIND_RESERVED: u8 = 0;
pub const TRANSACT_KIND_READ: u8 = 1;
pub const TRANSACT_KIND_WRITE: u8 = 2;
pub const TRANSACT_KIND_FLUSH: u8 = 3;
pub const TRANSACT_KIND_UNMAP: u8 = 4;
pub const TRANSACT_KIND_COUNT: u8 = 5;

// StorageUnitParams flags.
pub const PARAMS_WRITE_PROTECTED: u32 = 1 << 0;
pub const PARAMS_CACHE_SUPPORTED: u32 = 1 << 1;
pub const PARAMS_UNMAP_SUPPORTED: u32 = 1 << 2;
pub const PARAMS_EJECT_DISABLED: u32 = 1 << 3;

/// Scsi status value in a response that acknowledges a message without
/// expecting any further processing.
pub const SCSI_STATUS_NO_REPLY: u8 = 0xff;

/// Fixed 128-byte description of one storage unit.
#[repr(C)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct StorageUnitParams {
    /// Identity; must be non-zero.
    pub guid: [u8; 16],
    pub block_count: u64,
    pub block_length: u32,
    pub product_id: [u8; 16],
    pub product_revision_level: [u8; 4],
    /// Must be 0: direct access block device.
    pub device_type: u8,
    pub _pad0: [u8; 3],
    /// `PARAMS_*` bits.
    pub flags: u32,
    pub max_transfer_length: u32,
    pub _pad1: [u8; 4],
    pub reserved: [u64; 8],
}
const_assert_eq!(128, std::mem::size_of::<StorageUnitParams>());

impl Default for StorageUnitParams {
    fn default() -> Self {
        FromZeroes::new_zeroed()
    }
}

impl StorageUnitParams {
    pub fn write_protected(&self) -> bool {
        self.flags & PARAMS_WRITE_PROTECTED != 0
    }

    pub fn cache_supported(&self) -> bool {
        self.flags & PARAMS_CACHE_SUPPORTED != 0
    }

    pub fn unmap_supported(&self) -> bool {
        self.flags & PARAMS_UNMAP_SUPPORTED != 0
    }

    pub fn eject_disabled(&self) -> bool {
        self.flags & PARAMS_EJECT_DISABLED != 0
    }
}

/// Completion status carried in a transact response.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct StorageUnitStatus {
    pub scsi_status: u8,
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub _pad0: [u8; 4],
    pub information: u64,
    pub reserved_csi: u64,
    pub reserved_sks: u32,
    /// Bits 0-7: field replaceable unit code; bit 8: information valid.
    pub flags: u32,
}
const_assert_eq!(32, std::mem::size_of::<StorageUnitStatus>());

pub const STATUS_INFORMATION_VALID: u32 = 1 << 8;

impl StorageUnitStatus {
    pub fn information_valid(&self) -> bool {
        self.flags & STATUS_INFORMATION_VALID != 0
    }

    /// Fills in a CHECK CONDITION status with the given sense.
    pub fn set_sense(&mut self, sense_key: u8, asc: u8, information: Option<u64>) {
        self.scsi_status = crate::scsi::SCSISTAT_CHECK_CONDITION;
        self.sense_key = sense_key;
        self.asc = asc;
        if let Some(information) = information {
            self.information = information;
            self.flags |= STATUS_INFORMATION_VALID;
        }
    }
}

// TransactReq flags.
pub const TRANSACT_FORCE_UNIT_ACCESS: u32 = 1 << 0;

/// One request handed to the user-mode dispatcher.
///
/// `kind` selects which fields are meaningful: Read/Write use all of them,
/// Flush ignores `flags`, and Unmap carries its descriptor count in
/// `block_count` with the descriptors in the companion data buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct TransactReq {
    /// Opaque; routes the response back to the originating request.
    /// Zero means "no request".
    pub hint: u64,
    pub kind: u8,
    pub _pad0: [u8; 7],
    pub block_address: u64,
    pub block_count: u32,
    /// `TRANSACT_*` bits.
    pub flags: u32,
}
const_assert_eq!(32, std::mem::size_of::<TransactReq>());

impl TransactReq {
    pub fn force_unit_access(&self) -> bool {
        self.flags & TRANSACT_FORCE_UNIT_ACCESS != 0
    }
}

/// The dispatcher's response to a previously delivered request.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct TransactRsp {
    pub hint: u64,
    pub kind: u8,
    pub _pad0: [u8; 7],
    pub status: StorageUnitStatus,
}
const_assert_eq!(48, std::mem::size_of::<TransactRsp>());

/// One unmap range as carried in the transact data buffer.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
pub struct UnmapDescriptor {
    pub block_address: u64,
    pub block_count: u32,
    pub reserved: u32,
}
const_assert_eq!(16, std::mem::size_of::<UnmapDescriptor>());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btl_packing() {
        assert_eq!(btl(0, 5, 0), 0x500);
        assert_eq!(btl_t(btl(1, 2, 3)), 2);
        assert_eq!(btl_b(btl(1, 2, 3)), 1);
        assert_eq!(btl_l(btl(1, 2, 3)), 3);
        assert_eq!(index_from_btl(btl_from_index(7)), 7);
    }

    #[test]
    fn params_flags() {
        let params = StorageUnitParams {
            flags: PARAMS_CACHE_SUPPORTED | PARAMS_EJECT_DISABLED,
            ..Default::default()
        };
        assert!(params.cache_supported());
        assert!(params.eject_disabled());
        assert!(!params.write_protected());
        assert!(!params.unmap_supported());
    }

    #[test]
    fn status_set_sense() {
        let mut status = StorageUnitStatus::default();
        status.set_sense(crate::scsi::SCSI_SENSE_MEDIUM_ERROR, 0x11, Some(42));
        assert_eq!(status.scsi_status, crate::scsi::SCSISTAT_CHECK_CONDITION);
        assert_eq!(status.information, 42);
        assert!(status.information_valid());

        let mut status = StorageUnitStatus::default();
        status.set_sense(crate::scsi::SCSI_SENSE_ILLEGAL_REQUEST, 0x24, None);
        assert!(!status.information_valid());
    }
}
