// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared test support: an in-memory block device and the block data
//! pattern used to verify transfers.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use scsi_sys::hash_mix64;
use scsi_sys::scsi::SCSISTAT_CHECK_CONDITION;
use scsi_sys::scsi::SCSI_ADSENSE_SEEK_ERROR;
use scsi_sys::scsi::SCSI_SENSEQ_POSITIONING_ERROR_DETECTED_BY_READ;
use scsi_sys::scsi::SCSI_SENSE_MEDIUM_ERROR;
use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::StorageUnitStatus;
use scsi_sys::transact::UnmapDescriptor;
use scsi_sys::transact::STATUS_INFORMATION_VALID;

use stgunit::StorageUnit;
use stgunit::StorageUnitInterface;

pub const BLOCK_LENGTH: usize = 512;

/// Routes `log` output to the test harness; safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test unit parameters: 16 blocks of 512 bytes, `max_block_count` blocks
/// per transfer.
pub fn test_params(guid: [u8; 16], max_block_count: u32, flags: u32) -> StorageUnitParams {
    StorageUnitParams {
        guid,
        block_count: 16,
        block_length: BLOCK_LENGTH as u32,
        product_id: *b"RamDisk         ",
        product_revision_level: *b"1.0 ",
        flags,
        max_transfer_length: max_block_count * BLOCK_LENGTH as u32,
        ..Default::default()
    }
}

/// Fills each block with `hash_mix64(block_address + i + 1)` repeated
/// every 8 bytes.
pub fn fill_pattern(buffer: &mut [u8], block_address: u64) {
    for (index, block) in buffer.chunks_mut(BLOCK_LENGTH).enumerate() {
        let value = hash_mix64(block_address + index as u64 + 1);
        for word in block.chunks_mut(8) {
            word.copy_from_slice(&value.to_ne_bytes()[..word.len()]);
        }
    }
}

/// Verifies the pattern [`fill_pattern`] writes.
pub fn check_pattern(buffer: &[u8], block_address: u64) -> bool {
    for (index, block) in buffer.chunks(BLOCK_LENGTH).enumerate() {
        let value = hash_mix64(block_address + index as u64 + 1);
        for word in block.chunks(8) {
            if word != &value.to_ne_bytes()[..word.len()] {
                return false;
            }
        }
    }
    true
}

/// In-memory block device backend.
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    pub flush_count: AtomicUsize,
    pub unmapped: Mutex<Vec<UnmapDescriptor>>,
    fail_reads: AtomicBool,
}

impl RamDisk {
    pub fn new(block_count: usize) -> RamDisk {
        RamDisk {
            data: Mutex::new(vec![0u8; block_count * BLOCK_LENGTH]),
            flush_count: AtomicUsize::new(0),
            unmapped: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Pre-fills the disk contents with the block pattern.
    pub fn fill(&self) {
        let mut data = self.data.lock().unwrap();
        fill_pattern(&mut data, 0);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Makes every subsequent read fail with a medium error at LBA 11.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::Release);
    }
}

impl StorageUnitInterface for RamDisk {
    fn read(
        &self,
        _storage_unit: &StorageUnit,
        buffer: &mut [u8],
        block_address: u64,
        block_count: u32,
        _flush: bool,
        status: &mut StorageUnitStatus,
    ) -> bool {
        if self.fail_reads.load(Ordering::Acquire) {
            status.scsi_status = SCSISTAT_CHECK_CONDITION;
            status.sense_key = SCSI_SENSE_MEDIUM_ERROR;
            status.asc = SCSI_ADSENSE_SEEK_ERROR;
            status.ascq = SCSI_SENSEQ_POSITIONING_ERROR_DETECTED_BY_READ;
            status.information = 11;
            status.flags |= STATUS_INFORMATION_VALID;
            return true;
        }
        let data = self.data.lock().unwrap();
        let offset = block_address as usize * BLOCK_LENGTH;
        let length = block_count as usize * BLOCK_LENGTH;
        buffer[..length].copy_from_slice(&data[offset..offset + length]);
        true
    }

    fn write(
        &self,
        _storage_unit: &StorageUnit,
        buffer: &[u8],
        block_address: u64,
        block_count: u32,
        _flush: bool,
        _status: &mut StorageUnitStatus,
    ) -> bool {
        let mut data = self.data.lock().unwrap();
        let offset = block_address as usize * BLOCK_LENGTH;
        let length = block_count as usize * BLOCK_LENGTH;
        data[offset..offset + length].copy_from_slice(&buffer[..length]);
        true
    }

    fn flush(
        &self,
        _storage_unit: &StorageUnit,
        _block_address: u64,
        _block_count: u32,
        _status: &mut StorageUnitStatus,
    ) -> bool {
        self.flush_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn unmap(
        &self,
        _storage_unit: &StorageUnit,
        descriptors: &[UnmapDescriptor],
        _status: &mut StorageUnitStatus,
    ) -> bool {
        let mut data = self.data.lock().unwrap();
        for descriptor in descriptors {
            let offset = descriptor.block_address as usize * BLOCK_LENGTH;
            let length = descriptor.block_count as usize * BLOCK_LENGTH;
            data[offset..offset + length].fill(0);
        }
        self.unmapped.lock().unwrap().extend_from_slice(descriptors);
        true
    }

    fn supports_flush(&self) -> bool {
        true
    }
}
