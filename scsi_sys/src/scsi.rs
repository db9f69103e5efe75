// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! SCSI operation codes, status values, sense codes and the fixed-layout
//! data-in structures answered by the adapter.

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

// Operation codes.
pub const SCSIOP_TEST_UNIT_READY: u8 = 0x00;
pub const SCSIOP_READ6: u8 = 0x08;
pub const SCSIOP_WRITE6: u8 = 0x0a;
pub const SCSIOP_INQUIRY: u8 = 0x12;
pub const SCSIOP_MODE_SENSE: u8 = 0x1a;
pub const SCSIOP_READ_CAPACITY: u8 = 0x25;
pub const SCSIOP_READ: u8 = 0x28;
pub const SCSIOP_WRITE: u8 = 0x2a;
pub const SCSIOP_SYNCHRONIZE_CACHE: u8 = 0x35;
pub const SCSIOP_UNMAP: u8 = 0x42;
pub const SCSIOP_MODE_SENSE10: u8 = 0x5a;
pub const SCSIOP_READ16: u8 = 0x88;
pub const SCSIOP_WRITE16: u8 = 0x8a;
pub const SCSIOP_SYNCHRONIZE_CACHE16: u8 = 0x91;
pub const SCSIOP_SERVICE_ACTION_IN16: u8 = 0x9e;
pub const SCSIOP_REPORT_LUNS: u8 = 0xa0;
pub const SCSIOP_READ12: u8 = 0xa8;
pub const SCSIOP_WRITE12: u8 = 0xaa;

pub const SERVICE_ACTION_READ_CAPACITY16: u8 = 0x10;

// SCSI status codes.
pub const SCSISTAT_GOOD: u8 = 0x00;
pub const SCSISTAT_CHECK_CONDITION: u8 = 0x02;

// SRB status values, modeled on the storage-port request block contract.
// The low 6 bits carry the status proper; the top bits are flags.
pub const SRB_STATUS_PENDING: u8 = 0x00;
pub const SRB_STATUS_SUCCESS: u8 = 0x01;
pub const SRB_STATUS_ABORTED: u8 = 0x02;
pub const SRB_STATUS_ABORT_FAILED: u8 = 0x03;
pub const SRB_STATUS_ERROR: u8 = 0x04;
pub const SRB_STATUS_INVALID_REQUEST: u8 = 0x06;
pub const SRB_STATUS_NO_DEVICE: u8 = 0x08;
pub const SRB_STATUS_DATA_OVERRUN: u8 = 0x12;
pub const SRB_STATUS_INTERNAL_ERROR: u8 = 0x30;
pub const SRB_STATUS_AUTOSENSE_VALID: u8 = 0x80;
pub const SRB_STATUS_MASK: u8 = 0x3f;

pub const fn srb_status(status: u8) -> u8 {
    status & SRB_STATUS_MASK
}

// Sense keys.
pub const SCSI_SENSE_NO_SENSE: u8 = 0x00;
pub const SCSI_SENSE_MEDIUM_ERROR: u8 = 0x03;
pub const SCSI_SENSE_ILLEGAL_REQUEST: u8 = 0x05;
pub const SCSI_SENSE_DATA_PROTECT: u8 = 0x07;

// Additional sense codes.
pub const SCSI_ADSENSE_NO_SENSE: u8 = 0x00;
pub const SCSI_ADSENSE_WRITE_ERROR: u8 = 0x0c;
pub const SCSI_ADSENSE_UNRECOVERED_ERROR: u8 = 0x11;
pub const SCSI_ADSENSE_SEEK_ERROR: u8 = 0x15;
pub const SCSI_ADSENSE_ILLEGAL_COMMAND: u8 = 0x20;
pub const SCSI_ADSENSE_ILLEGAL_BLOCK: u8 = 0x21;
pub const SCSI_ADSENSE_INVALID_CDB: u8 = 0x24;
pub const SCSI_ADSENSE_INVALID_FIELD_PARAMETER_LIST: u8 = 0x26;
pub const SCSI_ADSENSE_WRITE_PROTECT: u8 = 0x27;

// Additional sense code qualifiers.
pub const SCSI_SENSEQ_POSITIONING_ERROR_DETECTED_BY_READ: u8 = 0x02;

pub const SCSI_SENSE_ERRORCODE_FIXED_CURRENT: u8 = 0x70;
pub const SCSI_SENSE_INFORMATION_VALID: u8 = 0x80;

// Inquiry.
pub const INQUIRY_DATA_BUFFER_SIZE: usize = 36;
pub const DIRECT_ACCESS_DEVICE: u8 = 0x00;
pub const DEVICE_QUALIFIER_ACTIVE: u8 = 0x00;
pub const INQUIRY_COMMAND_QUEUE: u8 = 0x02;

// Vital product data pages.
pub const VPD_SUPPORTED_PAGES: u8 = 0x00;
pub const VPD_SERIAL_NUMBER: u8 = 0x80;
pub const VPD_DEVICE_IDENTIFIERS: u8 = 0x83;
pub const VPD_BLOCK_LIMITS: u8 = 0xb0;
pub const VPD_LOGICAL_BLOCK_PROVISIONING: u8 = 0xb2;

pub const VPD_CODE_SET_BINARY: u8 = 0x01;
pub const VPD_CODE_SET_ASCII: u8 = 0x02;
pub const VPD_IDENTIFIER_TYPE_VENDOR_SPECIFIC: u8 = 0x00;
pub const VPD_IDENTIFIER_TYPE_VENDOR_ID: u8 = 0x01;
pub const VPD_ASSOCIATION_DEVICE: u8 = 0x00;

pub const VPD_LBP_LBPU: u8 = 0x80;
pub const PROVISIONING_TYPE_THIN: u8 = 0x02;

// Mode sense.
pub const MODE_PAGE_CACHING: u8 = 0x08;
pub const MODE_SENSE_RETURN_ALL: u8 = 0x3f;
pub const MODE_SENSE_CURRENT_VALUES: u8 = 0x00;
pub const MODE_SENSE_CHANGEABLE_VALUES: u8 = 0x01;
pub const MODE_DSP_FUA_SUPPORTED: u8 = 0x10;
pub const MODE_DSP_WRITE_PROTECT: u8 = 0x80;
pub const MODE_CACHING_READ_DISABLE_CACHE: u8 = 0x01;
pub const MODE_CACHING_WRITE_CACHE_ENABLE: u8 = 0x04;

/// Standard inquiry data, 36 bytes.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct InquiryData {
    /// Bits 0-4: device type; bits 5-7: qualifier.
    pub device_type: u8,
    /// Bit 7: removable media.
    pub removable_media: u8,
    pub versions: u8,
    pub response_data_format: u8,
    pub additional_length: u8,
    pub reserved: [u8; 2],
    /// Bit 1: command queueing supported.
    pub flags: u8,
    pub vendor_id: [u8; 8],
    pub product_id: [u8; 16],
    pub product_revision_level: [u8; 4],
}
const_assert_eq!(INQUIRY_DATA_BUFFER_SIZE, std::mem::size_of::<InquiryData>());

/// Common 4-byte header of the VPD pages answered here.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct VpdPageHeader {
    pub device_type: u8,
    pub page_code: u8,
    pub reserved: u8,
    pub page_length: u8,
}
const_assert_eq!(4, std::mem::size_of::<VpdPageHeader>());

/// One identification descriptor of VPD page 83h; the identifier bytes
/// follow the descriptor.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct VpdIdentificationDescriptor {
    /// Bits 0-3: code set.
    pub code_set: u8,
    /// Bits 0-3: identifier type; bits 4-5: association.
    pub identifier_type: u8,
    pub reserved: u8,
    pub identifier_length: u8,
}
const_assert_eq!(4, std::mem::size_of::<VpdIdentificationDescriptor>());

/// VPD page B0h, block limits. 64 bytes, page length 60.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct VpdBlockLimits {
    pub device_type: u8,
    pub page_code: u8,
    pub page_length: [u8; 2],
    pub wsnz: u8,
    pub maximum_compare_and_write_length: u8,
    pub optimal_transfer_length_granularity: [u8; 2],
    pub maximum_transfer_length: [u8; 4],
    pub optimal_transfer_length: [u8; 4],
    pub maximum_prefetch_length: [u8; 4],
    pub maximum_unmap_lba_count: [u8; 4],
    pub maximum_unmap_block_descriptor_count: [u8; 4],
    pub optimal_unmap_granularity: [u8; 4],
    pub unmap_granularity_alignment: [u8; 4],
    pub maximum_write_same_length: [u8; 8],
    pub reserved: [u8; 20],
}
const_assert_eq!(64, std::mem::size_of::<VpdBlockLimits>());

/// VPD page B2h, logical block provisioning. 8 bytes, page length 4.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct VpdLogicalBlockProvisioning {
    pub device_type: u8,
    pub page_code: u8,
    pub page_length: [u8; 2],
    pub threshold_exponent: u8,
    /// Bit 7: LBPU; bit 1: ANC_SUP; bit 0: DP.
    pub flags: u8,
    /// Bits 0-2: provisioning type.
    pub provisioning_type: u8,
    pub reserved: u8,
}
const_assert_eq!(8, std::mem::size_of::<VpdLogicalBlockProvisioning>());

/// Mode parameter header for MODE SENSE (6).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct ModeParameterHeader {
    pub mode_data_length: u8,
    pub medium_type: u8,
    pub device_specific_parameter: u8,
    pub block_descriptor_length: u8,
}
const_assert_eq!(4, std::mem::size_of::<ModeParameterHeader>());

/// Mode parameter header for MODE SENSE (10).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct ModeParameterHeader10 {
    pub mode_data_length: [u8; 2],
    pub medium_type: u8,
    pub device_specific_parameter: u8,
    pub reserved: [u8; 2],
    pub block_descriptor_length: [u8; 2],
}
const_assert_eq!(8, std::mem::size_of::<ModeParameterHeader10>());

/// Caching mode page (08h).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct ModeCachingPage {
    /// Bits 0-5: page code; bit 7: page savable.
    pub page_code: u8,
    pub page_length: u8,
    /// Bit 0: RCD; bit 2: WCE.
    pub flags: u8,
    pub retention_priority: u8,
    pub disable_prefetch_transfer_length: [u8; 2],
    pub minimum_prefetch: [u8; 2],
    pub maximum_prefetch: [u8; 2],
    pub maximum_prefetch_ceiling: [u8; 2],
}
const_assert_eq!(12, std::mem::size_of::<ModeCachingPage>());

/// READ CAPACITY (10) data.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct ReadCapacityData {
    pub logical_block_address: [u8; 4],
    pub bytes_per_block: [u8; 4],
}
const_assert_eq!(8, std::mem::size_of::<ReadCapacityData>());

/// READ CAPACITY (16) short form: last LBA and block length only.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct ReadCapacityDataEx {
    pub logical_block_address: [u8; 8],
    pub bytes_per_block: [u8; 4],
}
const_assert_eq!(12, std::mem::size_of::<ReadCapacityDataEx>());

/// READ CAPACITY (16) full parameter data.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct ReadCapacity16Data {
    pub logical_block_address: [u8; 8],
    pub bytes_per_block: [u8; 4],
    pub protection: u8,
    pub logical_per_physical_exponent: u8,
    /// Bit 7 of byte 0: LBPME; bit 6: LBPRZ.
    pub lowest_aligned_lba: [u8; 2],
    pub reserved: [u8; 16],
}
const_assert_eq!(32, std::mem::size_of::<ReadCapacity16Data>());

pub const READ_CAPACITY16_LBPME: u8 = 0x80;

/// Fixed-format sense data.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct SenseData {
    /// Bits 0-6: error code; bit 7: information valid.
    pub error_code: u8,
    pub segment_number: u8,
    /// Bits 0-3: sense key.
    pub sense_key: u8,
    pub information: [u8; 4],
    pub additional_sense_length: u8,
    pub command_specific_information: [u8; 4],
    pub additional_sense_code: u8,
    pub additional_sense_code_qualifier: u8,
    pub field_replaceable_unit_code: u8,
    pub sense_key_specific: [u8; 3],
}
const_assert_eq!(18, std::mem::size_of::<SenseData>());

/// REPORT LUNS parameter data header; 8-byte LUN entries follow.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct LunListHeader {
    pub lun_list_length: [u8; 4],
    pub reserved: [u8; 4],
}
const_assert_eq!(8, std::mem::size_of::<LunListHeader>());

/// UNMAP parameter list header; block descriptors follow.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct UnmapListHeader {
    pub data_length: [u8; 2],
    pub block_descriptor_data_length: [u8; 2],
    pub reserved: [u8; 4],
}
const_assert_eq!(8, std::mem::size_of::<UnmapListHeader>());

/// One UNMAP block descriptor as it appears on the wire.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct UnmapBlockDescriptor {
    pub starting_lba: [u8; 8],
    pub lba_count: [u8; 4],
    pub reserved: [u8; 4],
}
const_assert_eq!(16, std::mem::size_of::<UnmapBlockDescriptor>());
