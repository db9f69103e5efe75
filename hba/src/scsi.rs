// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! SCSI command execution.
//!
//! Non-data commands (INQUIRY, MODE SENSE, READ CAPACITY, ...) are answered
//! in place from the unit's parameters. Data commands (READ, WRITE,
//! SYNCHRONIZE CACHE, UNMAP) are range-checked and posted to the unit's
//! I/O queue; [`prepare`] and [`complete`] then marshal them to and from
//! user mode one `max_transfer_length` chunk at a time.

use std::sync::Arc;

use zerocopy::AsBytes;

use scsi_sys::scsi::*;
use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::TransactReq;
use scsi_sys::transact::TransactRsp;
use scsi_sys::transact::UnmapDescriptor;
use scsi_sys::transact::TRANSACT_FORCE_UNIT_ACCESS;
use scsi_sys::transact::TRANSACT_KIND_FLUSH;
use scsi_sys::transact::TRANSACT_KIND_READ;
use scsi_sys::transact::TRANSACT_KIND_UNMAP;
use scsi_sys::transact::TRANSACT_KIND_WRITE;
use scsi_sys::transact::VENDOR_ID;

use crate::cdb::get_be16;
use crate::cdb::get_be32;
use crate::cdb::get_be64;
use crate::cdb::put_be32;
use crate::cdb::Cdb;
use crate::ioq::SrbExtension;
use crate::srb::Srb;
use crate::unit::Hba;
use crate::unit::StorageUnit;
use crate::unit::SERIAL_NUMBER_LENGTH;

/// Executes one SCSI request block. Returns `SRB_STATUS_PENDING` when the
/// block was posted to the unit's queue for user-mode processing.
pub fn srb_execute_scsi(hba: &Hba, srb: &Arc<Srb>) -> u8 {
    let cdb_raw = *srb.cdb();
    let cdb = Cdb(&cdb_raw);

    let Some(unit) = hba.reference_by_btl(srb.btl()) else {
        // An empty slot still answers REPORT LUNS with an empty list.
        return if cdb.operation_code() == SCSIOP_REPORT_LUNS {
            scsi_report_luns(None, srb)
        } else {
            SRB_STATUS_NO_DEVICE
        };
    };

    match cdb.operation_code() {
        SCSIOP_REPORT_LUNS => scsi_report_luns(Some(&unit), srb),
        SCSIOP_TEST_UNIT_READY => SRB_STATUS_SUCCESS,
        SCSIOP_INQUIRY => scsi_inquiry(&unit, srb, cdb),
        SCSIOP_MODE_SENSE | SCSIOP_MODE_SENSE10 => scsi_mode_sense(&unit, srb, cdb),
        SCSIOP_READ_CAPACITY => scsi_read_capacity(&unit, srb, cdb),
        SCSIOP_READ6 | SCSIOP_READ | SCSIOP_READ12 | SCSIOP_READ16 | SCSIOP_WRITE6
        | SCSIOP_WRITE | SCSIOP_WRITE12 | SCSIOP_WRITE16 | SCSIOP_SYNCHRONIZE_CACHE
        | SCSIOP_SYNCHRONIZE_CACHE16 => scsi_post_range_srb(&unit, srb, cdb),
        SCSIOP_UNMAP => scsi_post_unmap_srb(&unit, srb, cdb),
        SCSIOP_SERVICE_ACTION_IN16 if cdb.service_action() == SERVICE_ACTION_READ_CAPACITY16 => {
            scsi_read_capacity(&unit, srb, cdb)
        }
        _ => SRB_STATUS_INVALID_REQUEST,
    }
}

fn scsi_report_luns(unit: Option<&Arc<StorageUnit>>, srb: &Srb) -> u8 {
    let mut state = srb.state();
    state.data.fill(0);

    // One all-zeros LUN when the target is populated, an empty list
    // otherwise; the zeroed buffer already encodes the LUN itself.
    let length: usize = if unit.is_some() { 8 } else { 0 };
    if 8 + length > state.data.len() {
        return SRB_STATUS_DATA_OVERRUN;
    }
    put_be32(&mut state.data, length as u32);
    state.data_transfer_length = 8 + length;

    SRB_STATUS_SUCCESS
}

fn scsi_inquiry(unit: &StorageUnit, srb: &Srb, cdb: Cdb) -> u8 {
    let mut state = srb.state();
    state.data.fill(0);

    if !cdb.inquiry_evpd() {
        if cdb.inquiry_page_code() != 0 {
            return scsi_error(srb, state, SCSI_SENSE_ILLEGAL_REQUEST, SCSI_ADSENSE_INVALID_CDB);
        }
        if INQUIRY_DATA_BUFFER_SIZE > state.data.len() {
            return SRB_STATUS_DATA_OVERRUN;
        }

        let params = unit.params();
        let inquiry = InquiryData {
            device_type: params.device_type,
            removable_media: 0,
            // "The device complies to the standard."
            versions: 5,
            response_data_format: 2,
            additional_length: (INQUIRY_DATA_BUFFER_SIZE - 5) as u8,
            flags: INQUIRY_COMMAND_QUEUE,
            vendor_id: VENDOR_ID,
            product_id: params.product_id,
            product_revision_level: params.product_revision_level,
            ..Default::default()
        };
        state.data[..INQUIRY_DATA_BUFFER_SIZE].copy_from_slice(inquiry.as_bytes());
        state.data_transfer_length = INQUIRY_DATA_BUFFER_SIZE;

        return SRB_STATUS_SUCCESS;
    }

    match cdb.inquiry_page_code() {
        VPD_SUPPORTED_PAGES => {
            const PAGES: [u8; 5] = [
                VPD_SUPPORTED_PAGES,
                VPD_SERIAL_NUMBER,
                VPD_DEVICE_IDENTIFIERS,
                VPD_BLOCK_LIMITS,
                VPD_LOGICAL_BLOCK_PROVISIONING,
            ];
            let total = std::mem::size_of::<VpdPageHeader>() + PAGES.len();
            if total > state.data.len() {
                return SRB_STATUS_DATA_OVERRUN;
            }
            let header = VpdPageHeader {
                device_type: unit.params().device_type,
                page_code: VPD_SUPPORTED_PAGES,
                page_length: PAGES.len() as u8,
                ..Default::default()
            };
            state.data[..4].copy_from_slice(header.as_bytes());
            state.data[4..total].copy_from_slice(&PAGES);
            state.data_transfer_length = total;
            SRB_STATUS_SUCCESS
        }
        VPD_SERIAL_NUMBER => {
            let total = std::mem::size_of::<VpdPageHeader>() + SERIAL_NUMBER_LENGTH;
            if total > state.data.len() {
                return SRB_STATUS_DATA_OVERRUN;
            }
            let header = VpdPageHeader {
                device_type: unit.params().device_type,
                page_code: VPD_SERIAL_NUMBER,
                page_length: SERIAL_NUMBER_LENGTH as u8,
                ..Default::default()
            };
            state.data[..4].copy_from_slice(header.as_bytes());
            state.data[4..total].copy_from_slice(unit.serial_number());
            state.data_transfer_length = total;
            SRB_STATUS_SUCCESS
        }
        VPD_DEVICE_IDENTIFIERS => scsi_inquiry_identifiers(unit, srb, state),
        VPD_BLOCK_LIMITS => {
            let total = std::mem::size_of::<VpdBlockLimits>();
            if total > state.data.len() {
                return SRB_STATUS_DATA_OVERRUN;
            }
            let params = unit.params();
            let mut limits = VpdBlockLimits {
                device_type: params.device_type,
                page_code: VPD_BLOCK_LIMITS,
                page_length: [0, (total - 4) as u8],
                ..Default::default()
            };
            put_be32(
                &mut limits.maximum_transfer_length,
                params.max_transfer_length / params.block_length,
            );
            if params.unmap_supported() {
                limits.maximum_unmap_lba_count = [0xff; 4];
                put_be32(
                    &mut limits.maximum_unmap_block_descriptor_count,
                    params.max_transfer_length
                        / std::mem::size_of::<UnmapBlockDescriptor>() as u32,
                );
            }
            state.data[..total].copy_from_slice(limits.as_bytes());
            state.data_transfer_length = total;
            SRB_STATUS_SUCCESS
        }
        VPD_LOGICAL_BLOCK_PROVISIONING => {
            let total = std::mem::size_of::<VpdLogicalBlockProvisioning>();
            if total > state.data.len() {
                return SRB_STATUS_DATA_OVERRUN;
            }
            let params = unit.params();
            let mut page = VpdLogicalBlockProvisioning {
                device_type: params.device_type,
                page_code: VPD_LOGICAL_BLOCK_PROVISIONING,
                page_length: [0, (total - 4) as u8],
                ..Default::default()
            };
            if params.unmap_supported() {
                page.flags = VPD_LBP_LBPU;
                page.provisioning_type = PROVISIONING_TYPE_THIN;
            }
            state.data[..total].copy_from_slice(page.as_bytes());
            state.data_transfer_length = total;
            SRB_STATUS_SUCCESS
        }
        _ => scsi_error(srb, state, SCSI_SENSE_ILLEGAL_REQUEST, SCSI_ADSENSE_INVALID_CDB),
    }
}

fn scsi_inquiry_identifiers(
    unit: &StorageUnit,
    _srb: &Srb,
    mut state: std::sync::MutexGuard<'_, crate::srb::SrbState>,
) -> u8 {
    let params = unit.params();

    // Identifier 0: ASCII vendor-id + product-id + revision + serial.
    const IDENTIFIER0_LENGTH: usize = 8 + 16 + 4 + SERIAL_NUMBER_LENGTH;
    // Identifier 1: the eject/ownership channel read by the shell:
    // "PID " or "PIDX" followed by the big-endian owner process id.
    const IDENTIFIER1_LENGTH: usize = 8;
    const DESCRIPTOR_SIZE: usize = std::mem::size_of::<VpdIdentificationDescriptor>();
    const TOTAL: usize = std::mem::size_of::<VpdPageHeader>()
        + DESCRIPTOR_SIZE
        + IDENTIFIER0_LENGTH
        + DESCRIPTOR_SIZE
        + IDENTIFIER1_LENGTH;

    if TOTAL > state.data.len() {
        return SRB_STATUS_DATA_OVERRUN;
    }

    let header = VpdPageHeader {
        device_type: params.device_type,
        page_code: VPD_DEVICE_IDENTIFIERS,
        page_length: (TOTAL - std::mem::size_of::<VpdPageHeader>()) as u8,
        ..Default::default()
    };
    state.data[..4].copy_from_slice(header.as_bytes());

    let descriptor = VpdIdentificationDescriptor {
        code_set: VPD_CODE_SET_ASCII,
        identifier_type: VPD_IDENTIFIER_TYPE_VENDOR_ID | (VPD_ASSOCIATION_DEVICE << 4),
        identifier_length: IDENTIFIER0_LENGTH as u8,
        ..Default::default()
    };
    state.data[4..8].copy_from_slice(descriptor.as_bytes());
    state.data[8..16].copy_from_slice(&VENDOR_ID);
    state.data[16..32].copy_from_slice(&params.product_id);
    state.data[32..36].copy_from_slice(&params.product_revision_level);
    state.data[36..72].copy_from_slice(unit.serial_number());

    let descriptor = VpdIdentificationDescriptor {
        code_set: VPD_CODE_SET_BINARY,
        identifier_type: VPD_IDENTIFIER_TYPE_VENDOR_SPECIFIC | (VPD_ASSOCIATION_DEVICE << 4),
        identifier_length: IDENTIFIER1_LENGTH as u8,
        ..Default::default()
    };
    state.data[72..76].copy_from_slice(descriptor.as_bytes());
    state.data[76..79].copy_from_slice(b"PID");
    state.data[79] = if params.eject_disabled() { b'X' } else { b' ' };
    let owner = unit.owner_process_id();
    state.data[80..84].copy_from_slice(&owner.to_be_bytes());

    state.data_transfer_length = TOTAL;
    SRB_STATUS_SUCCESS
}

fn scsi_mode_sense(unit: &StorageUnit, srb: &Srb, cdb: Cdb) -> u8 {
    let mut state = srb.state();
    state.data.fill(0);

    // Only the caching page (alone or via "return all pages") is reported;
    // changeable-values queries are rejected.
    if cdb.mode_sense_pc() == MODE_SENSE_CHANGEABLE_VALUES
        || (cdb.mode_sense_page_code() != MODE_PAGE_CACHING
            && cdb.mode_sense_page_code() != MODE_SENSE_RETURN_ALL)
    {
        return scsi_error(srb, state, SCSI_SENSE_ILLEGAL_REQUEST, SCSI_ADSENSE_INVALID_CDB);
    }

    let params = unit.params();
    let mut device_specific_parameter = 0;
    if params.write_protected() {
        device_specific_parameter |= MODE_DSP_WRITE_PROTECT;
    }
    if params.cache_supported() {
        device_specific_parameter |= MODE_DSP_FUA_SUPPORTED;
    }

    let header_size;
    let data_length;
    if cdb.operation_code() == SCSIOP_MODE_SENSE {
        header_size = std::mem::size_of::<ModeParameterHeader>();
        data_length = header_size + std::mem::size_of::<ModeCachingPage>();
        if data_length > state.data.len() {
            return SRB_STATUS_DATA_OVERRUN;
        }
        let header = ModeParameterHeader {
            mode_data_length: (data_length - 1) as u8,
            medium_type: 0,
            device_specific_parameter,
            block_descriptor_length: 0,
        };
        state.data[..header_size].copy_from_slice(header.as_bytes());
    } else {
        header_size = std::mem::size_of::<ModeParameterHeader10>();
        data_length = header_size + std::mem::size_of::<ModeCachingPage>();
        if data_length > state.data.len() {
            return SRB_STATUS_DATA_OVERRUN;
        }
        let header = ModeParameterHeader10 {
            mode_data_length: ((data_length - 2) as u16).to_be_bytes(),
            medium_type: 0,
            device_specific_parameter,
            ..Default::default()
        };
        state.data[..header_size].copy_from_slice(header.as_bytes());
    }

    let caching = ModeCachingPage {
        page_code: MODE_PAGE_CACHING,
        page_length: (std::mem::size_of::<ModeCachingPage>() - 2) as u8,
        flags: if params.cache_supported() {
            MODE_CACHING_WRITE_CACHE_ENABLE
        } else {
            MODE_CACHING_READ_DISABLE_CACHE
        },
        ..Default::default()
    };
    state.data[header_size..data_length].copy_from_slice(caching.as_bytes());
    state.data_transfer_length = data_length;

    SRB_STATUS_SUCCESS
}

fn scsi_read_capacity(unit: &StorageUnit, srb: &Srb, cdb: Cdb) -> u8 {
    let mut state = srb.state();
    state.data.fill(0);

    let params = unit.params();
    if cdb.operation_code() == SCSIOP_READ_CAPACITY {
        let total = std::mem::size_of::<ReadCapacityData>();
        if total > state.data.len() {
            return SRB_STATUS_DATA_OVERRUN;
        }
        let last_lba = if params.block_count <= u32::MAX as u64 {
            (params.block_count - 1) as u32
        } else {
            u32::MAX
        };
        let data = ReadCapacityData {
            logical_block_address: last_lba.to_be_bytes(),
            bytes_per_block: params.block_length.to_be_bytes(),
        };
        state.data[..total].copy_from_slice(data.as_bytes());
        state.data_transfer_length = total;
        SRB_STATUS_SUCCESS
    } else {
        let short_total = std::mem::size_of::<ReadCapacityDataEx>();
        if short_total > state.data.len() {
            return SRB_STATUS_DATA_OVERRUN;
        }
        let full_total = std::mem::size_of::<ReadCapacity16Data>();
        let mut data = ReadCapacity16Data {
            logical_block_address: (params.block_count - 1).to_be_bytes(),
            bytes_per_block: params.block_length.to_be_bytes(),
            ..Default::default()
        };
        let total = if full_total <= state.data.len() {
            if params.unmap_supported() {
                data.lowest_aligned_lba[0] = READ_CAPACITY16_LBPME;
            }
            full_total
        } else {
            short_total
        };
        state.data[..total].copy_from_slice(&data.as_bytes()[..total]);
        state.data_transfer_length = total;
        SRB_STATUS_SUCCESS
    }
}

fn scsi_post_range_srb(unit: &Arc<StorageUnit>, srb: &Arc<Srb>, cdb: Cdb) -> u8 {
    let params = *unit.params();
    let (block_address, block_count, _) = cdb.range();
    let data_length: u64;

    match cdb.operation_code() {
        SCSIOP_READ6 | SCSIOP_READ | SCSIOP_READ12 | SCSIOP_READ16 => {
            data_length = block_count as u64 * params.block_length as u64;
            if (srb.state().data.len() as u64) < data_length {
                return SRB_STATUS_INTERNAL_ERROR;
            }
        }
        SCSIOP_WRITE6 | SCSIOP_WRITE | SCSIOP_WRITE12 | SCSIOP_WRITE16 => {
            if params.write_protected() {
                let state = srb.state();
                return scsi_error(srb, state, SCSI_SENSE_DATA_PROTECT, SCSI_ADSENSE_WRITE_PROTECT);
            }
            data_length = block_count as u64 * params.block_length as u64;
            if (srb.state().data.len() as u64) < data_length {
                return SRB_STATUS_INTERNAL_ERROR;
            }
        }
        SCSIOP_SYNCHRONIZE_CACHE | SCSIOP_SYNCHRONIZE_CACHE16 => {
            if !params.cache_supported() {
                return SRB_STATUS_INVALID_REQUEST;
            }
            if params.write_protected() {
                let state = srb.state();
                return scsi_error(srb, state, SCSI_SENSE_DATA_PROTECT, SCSI_ADSENSE_WRITE_PROTECT);
            }
            data_length = 0;
        }
        _ => return SRB_STATUS_INVALID_REQUEST,
    }

    if block_count == 0 {
        return SRB_STATUS_SUCCESS;
    }

    match block_address.checked_add(block_count as u64) {
        Some(end) if end <= params.block_count => {}
        _ => {
            let state = srb.state();
            return scsi_error(srb, state, SCSI_SENSE_ILLEGAL_REQUEST, SCSI_ADSENSE_ILLEGAL_BLOCK);
        }
    }

    scsi_post_srb(unit, srb, data_length as usize)
}

fn scsi_post_unmap_srb(unit: &Arc<StorageUnit>, srb: &Arc<Srb>, cdb: Cdb) -> u8 {
    let params = *unit.params();
    if !params.unmap_supported() {
        return SRB_STATUS_INVALID_REQUEST;
    }
    if params.write_protected() {
        let state = srb.state();
        return scsi_error(srb, state, SCSI_SENSE_DATA_PROTECT, SCSI_ADSENSE_WRITE_PROTECT);
    }

    let data_length;
    {
        let state = srb.state();
        let header_size = std::mem::size_of::<UnmapListHeader>();
        if state.data.len() < header_size {
            return SRB_STATUS_INTERNAL_ERROR;
        }
        data_length = get_be16(&state.data[2..]) as usize;
        if state.data.len() < header_size + data_length {
            return SRB_STATUS_INTERNAL_ERROR;
        }
        if data_length > params.max_transfer_length as usize {
            return scsi_error(
                srb,
                state,
                SCSI_SENSE_ILLEGAL_REQUEST,
                SCSI_ADSENSE_INVALID_FIELD_PARAMETER_LIST,
            );
        }
        if cdb.unmap_anchor() {
            return scsi_error(srb, state, SCSI_SENSE_ILLEGAL_REQUEST, SCSI_ADSENSE_INVALID_CDB);
        }
        if data_length == 0 {
            return SRB_STATUS_SUCCESS;
        }

        let descriptor_size = std::mem::size_of::<UnmapBlockDescriptor>();
        for index in 0..data_length / descriptor_size {
            let offset = header_size + index * descriptor_size;
            let block_address = get_be64(&state.data[offset..]);
            let block_count = get_be32(&state.data[offset + 8..]);
            match block_address.checked_add(block_count as u64) {
                Some(end) if end <= params.block_count => {}
                _ => {
                    return scsi_error(
                        srb,
                        state,
                        SCSI_SENSE_ILLEGAL_REQUEST,
                        SCSI_ADSENSE_ILLEGAL_BLOCK,
                    );
                }
            }
        }
    }

    scsi_post_srb(unit, srb, data_length)
}

fn scsi_post_srb(unit: &Arc<StorageUnit>, srb: &Arc<Srb>, data_length: usize) -> u8 {
    match unit
        .ioq()
        .post(Arc::clone(srb), Arc::clone(unit), data_length)
    {
        Ok(()) => SRB_STATUS_PENDING,
        Err(_) => SRB_STATUS_ABORTED,
    }
}

/// Fills the outgoing wire request for a claimed request block, copying the
/// current Write chunk or the Unmap descriptors into the data buffer.
pub fn prepare(ext: &mut SrbExtension, req: &mut TransactReq, data_buffer: &mut [u8]) {
    let cdb_raw = *ext.srb.cdb();
    let cdb = Cdb(&cdb_raw);
    let params = *ext.unit.params();

    match cdb.operation_code() {
        SCSIOP_READ6 | SCSIOP_READ | SCSIOP_READ12 | SCSIOP_READ16 => {
            let (block_address, _, force_unit_access) = cdb.range();
            let chunk_length = chunk_length(ext, &params);
            req.hint = ext.hint;
            req.kind = TRANSACT_KIND_READ;
            req.block_address =
                block_address + (ext.chunk_offset as u64) / params.block_length as u64;
            req.block_count = (chunk_length / params.block_length as usize) as u32;
            req.flags = if !params.cache_supported() || force_unit_access {
                TRANSACT_FORCE_UNIT_ACCESS
            } else {
                0
            };
        }
        SCSIOP_WRITE6 | SCSIOP_WRITE | SCSIOP_WRITE12 | SCSIOP_WRITE16 => {
            let (block_address, _, force_unit_access) = cdb.range();
            let chunk_length = chunk_length(ext, &params);
            req.hint = ext.hint;
            req.kind = TRANSACT_KIND_WRITE;
            req.block_address =
                block_address + (ext.chunk_offset as u64) / params.block_length as u64;
            req.block_count = (chunk_length / params.block_length as usize) as u32;
            req.flags = if !params.cache_supported() || force_unit_access {
                TRANSACT_FORCE_UNIT_ACCESS
            } else {
                0
            };
            let state = ext.srb.state();
            data_buffer[..chunk_length]
                .copy_from_slice(&state.data[ext.chunk_offset..ext.chunk_offset + chunk_length]);
        }
        SCSIOP_SYNCHRONIZE_CACHE | SCSIOP_SYNCHRONIZE_CACHE16 => {
            let (block_address, block_count, _) = cdb.range();
            req.hint = ext.hint;
            req.kind = TRANSACT_KIND_FLUSH;
            req.block_address = block_address;
            req.block_count = block_count;
            req.flags = 0;
        }
        SCSIOP_UNMAP => {
            let descriptor_size = std::mem::size_of::<UnmapBlockDescriptor>();
            let count = ext.data_length / descriptor_size;
            req.hint = ext.hint;
            req.kind = TRANSACT_KIND_UNMAP;
            req.block_address = 0;
            req.block_count = count as u32;
            req.flags = 0;
            let state = ext.srb.state();
            let header_size = std::mem::size_of::<UnmapListHeader>();
            for index in 0..count {
                let offset = header_size + index * descriptor_size;
                let descriptor = UnmapDescriptor {
                    block_address: get_be64(&state.data[offset..]),
                    block_count: get_be32(&state.data[offset + 8..]),
                    reserved: 0,
                };
                let out = index * std::mem::size_of::<UnmapDescriptor>();
                data_buffer[out..out + std::mem::size_of::<UnmapDescriptor>()]
                    .copy_from_slice(descriptor.as_bytes());
            }
        }
        _ => unreachable!("non-postable operation code {:#04x}", cdb.operation_code()),
    }
}

/// Applies a transact response to its request block. Returns the SRB status
/// to complete with; `SRB_STATUS_PENDING` means more chunks remain.
pub fn complete(ext: &mut SrbExtension, rsp: &TransactRsp, data_buffer: Option<&[u8]>) -> u8 {
    if rsp.status.scsi_status != SCSISTAT_GOOD {
        let state = ext.srb.state();
        return scsi_error_ex(
            &ext.srb,
            state,
            rsp.status.sense_key,
            rsp.status.asc,
            rsp.status.ascq,
            rsp.status.information_valid().then_some(rsp.status.information),
        );
    }

    let cdb_raw = *ext.srb.cdb();
    let params = *ext.unit.params();
    match cdb_raw[0] {
        SCSIOP_READ6 | SCSIOP_READ | SCSIOP_READ12 | SCSIOP_READ16 => {
            let chunk_length = chunk_length(ext, &params);
            {
                let mut state = ext.srb.state();
                let offset = ext.chunk_offset;
                match data_buffer {
                    Some(buffer) if buffer.len() >= chunk_length => {
                        state.data[offset..offset + chunk_length]
                            .copy_from_slice(&buffer[..chunk_length]);
                    }
                    _ => state.data[offset..offset + chunk_length].fill(0),
                }
            }
            ext.chunk_offset += chunk_length;
            if ext.chunk_offset >= ext.data_length {
                SRB_STATUS_SUCCESS
            } else {
                SRB_STATUS_PENDING
            }
        }
        SCSIOP_WRITE6 | SCSIOP_WRITE | SCSIOP_WRITE12 | SCSIOP_WRITE16 => {
            ext.chunk_offset += chunk_length(ext, &params);
            if ext.chunk_offset >= ext.data_length {
                SRB_STATUS_SUCCESS
            } else {
                SRB_STATUS_PENDING
            }
        }
        SCSIOP_SYNCHRONIZE_CACHE | SCSIOP_SYNCHRONIZE_CACHE16 | SCSIOP_UNMAP => {
            SRB_STATUS_SUCCESS
        }
        _ => SRB_STATUS_ABORTED,
    }
}

fn chunk_length(ext: &SrbExtension, params: &StorageUnitParams) -> usize {
    (ext.data_length - ext.chunk_offset).min(params.max_transfer_length as usize)
}

fn scsi_error(
    srb: &Srb,
    state: std::sync::MutexGuard<'_, crate::srb::SrbState>,
    sense_key: u8,
    additional_sense_code: u8,
) -> u8 {
    scsi_error_ex(srb, state, sense_key, additional_sense_code, 0, None)
}

/// Records CHECK CONDITION with fixed-format autosense on the request
/// block and returns the matching SRB status.
fn scsi_error_ex(
    _srb: &Srb,
    mut state: std::sync::MutexGuard<'_, crate::srb::SrbState>,
    sense_key: u8,
    additional_sense_code: u8,
    additional_sense_code_qualifier: u8,
    information: Option<u64>,
) -> u8 {
    let mut sense = SenseData {
        error_code: SCSI_SENSE_ERRORCODE_FIXED_CURRENT,
        sense_key,
        additional_sense_code,
        additional_sense_code_qualifier,
        additional_sense_length: (std::mem::size_of::<SenseData>() - 8) as u8,
        ..Default::default()
    };
    if let Some(information) = information {
        sense.information = (information as u32).to_be_bytes();
        sense.error_code |= SCSI_SENSE_INFORMATION_VALID;
    }

    state.sense = Some(sense);
    state.scsi_status = SCSISTAT_CHECK_CONDITION;

    SRB_STATUS_ERROR | SRB_STATUS_AUTOSENSE_VALID
}
