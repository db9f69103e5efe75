// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Dispatcher end-to-end: worker pool serving a RAM disk through the
//! adapter transport, including chunked transfers, deferred responses,
//! error propagation and shutdown.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use hba::cdb::build_rw_cdb;
use hba::cdb::put_be16;
use hba::cdb::put_be32;
use hba::cdb::put_be64;
use hba::ioctl::scsi_execute;
use hba::DataDirection;
use hba::Hba;
use scsi_sys::scsi::*;
use scsi_sys::transact::*;

use stgunit::operation_context;
use stgunit::StorageUnit;
use stgunit::StorageUnitInterface;

use common::check_pattern;
use common::fill_pattern;
use common::test_params;
use common::RamDisk;
use common::BLOCK_LENGTH;

fn read_blocks(hba: &Arc<Hba>, block_address: u64, block_count: u32) -> hba::ioctl::ScsiExecuteResult {
    let cdb = build_rw_cdb(SCSIOP_READ16, block_address, block_count);
    scsi_execute(
        hba,
        0,
        &cdb,
        DataDirection::In,
        vec![0; block_count as usize * BLOCK_LENGTH],
    )
}

#[test]
fn dispatcher_serves_reads_and_writes() {
    common::init_logging();
    let hba = Hba::new(16);
    let params = test_params([0x61; 16], 4, PARAMS_CACHE_SUPPORTED);
    let disk = Arc::new(RamDisk::new(16));
    disk.fill();

    let unit = StorageUnit::create_on(&hba, &params, Arc::clone(&disk) as _).unwrap();
    unit.start_dispatcher(2).unwrap();

    let result = read_blocks(&hba, 2, 2);
    assert_eq!(result.srb_status, SRB_STATUS_SUCCESS);
    assert!(check_pattern(&result.data, 2));

    let mut data = vec![0u8; 3 * BLOCK_LENGTH];
    fill_pattern(&mut data, 100);
    let cdb = build_rw_cdb(SCSIOP_WRITE16, 5, 3);
    let result = scsi_execute(&hba, 0, &cdb, DataDirection::Out, data);
    assert_eq!(result.srb_status, SRB_STATUS_SUCCESS);

    let result = read_blocks(&hba, 5, 3);
    assert_eq!(result.srb_status, SRB_STATUS_SUCCESS);
    assert!(check_pattern(&result.data, 100));

    unit.shutdown();
    unit.wait_dispatcher();
    assert_eq!(unit.dispatcher_error(), stgunit::error::ERROR_CANCELLED);
    assert!(hba.list().is_empty());
    // The unit advertised a cache, so the root worker flushed on exit.
    assert!(disk.flush_count.load(Ordering::Acquire) >= 1);
}

#[test]
fn dispatcher_serves_chunked_read() {
    common::init_logging();
    let hba = Hba::new(16);
    // 3-block transfer cap; a 5-block read is delivered in two chunks.
    let params = test_params([0x62; 16], 3, 0);
    let disk = Arc::new(RamDisk::new(16));
    disk.fill();

    let unit = StorageUnit::create_on(&hba, &params, Arc::clone(&disk) as _).unwrap();
    unit.start_dispatcher(1).unwrap();

    let result = read_blocks(&hba, 7, 5);
    assert_eq!(result.srb_status, SRB_STATUS_SUCCESS);
    assert_eq!(result.data_length, 5 * BLOCK_LENGTH);
    assert!(check_pattern(&result.data, 7));

    unit.shutdown();
    unit.wait_dispatcher();
}

#[test]
fn dispatcher_propagates_medium_error() {
    common::init_logging();
    let hba = Hba::new(16);
    let params = test_params([0x63; 16], 4, 0);
    let disk = Arc::new(RamDisk::new(16));

    let unit = StorageUnit::create_on(&hba, &params, Arc::clone(&disk) as _).unwrap();
    unit.start_dispatcher(1).unwrap();

    disk.fail_reads();
    let result = read_blocks(&hba, 7, 2);
    assert_eq!(
        result.srb_status,
        SRB_STATUS_ERROR | SRB_STATUS_AUTOSENSE_VALID
    );
    assert_eq!(result.scsi_status, SCSISTAT_CHECK_CONDITION);
    let sense = result.sense.unwrap();
    assert_eq!(sense.sense_key, SCSI_SENSE_MEDIUM_ERROR);
    assert_eq!(sense.additional_sense_code, SCSI_ADSENSE_SEEK_ERROR);
    assert_eq!(sense.information, 11u32.to_be_bytes());
    assert_ne!(sense.error_code & SCSI_SENSE_INFORMATION_VALID, 0);

    unit.shutdown();
    unit.wait_dispatcher();
}

#[test]
fn dispatcher_serves_unmap() {
    common::init_logging();
    let hba = Hba::new(16);
    let params = test_params([0x64; 16], 4, PARAMS_UNMAP_SUPPORTED);
    let disk = Arc::new(RamDisk::new(16));
    disk.fill();

    let unit = StorageUnit::create_on(&hba, &params, Arc::clone(&disk) as _).unwrap();
    unit.start_dispatcher(1).unwrap();

    let mut list = vec![0u8; 8 + 16];
    put_be16(&mut list, 22);
    put_be16(&mut list[2..], 16);
    put_be64(&mut list[8..], 3);
    put_be32(&mut list[16..], 2);
    let mut cdb = [0u8; 16];
    cdb[0] = SCSIOP_UNMAP;
    put_be16(&mut cdb[7..], list.len() as u16);
    let result = scsi_execute(&hba, 0, &cdb, DataDirection::Out, list);
    assert_eq!(result.srb_status, SRB_STATUS_SUCCESS);

    let unmapped = disk.unmapped.lock().unwrap().clone();
    assert_eq!(unmapped.len(), 1);
    assert_eq!(unmapped[0].block_address, 3);
    assert_eq!(unmapped[0].block_count, 2);
    // The unmapped blocks read back zero.
    let result = read_blocks(&hba, 3, 2);
    assert!(result.data.iter().all(|&b| b == 0));

    unit.shutdown();
    unit.wait_dispatcher();
}

#[test]
fn dispatcher_shutdown_with_idle_workers() {
    common::init_logging();
    let hba = Hba::new(16);
    let params = test_params([0x65; 16], 4, 0);
    let disk = Arc::new(RamDisk::new(16));

    let unit = StorageUnit::create_on(&hba, &params, Arc::clone(&disk) as _).unwrap();
    unit.start_dispatcher(4).unwrap();
    thread::sleep(Duration::from_millis(50));

    // All workers are blocked in transact; shutdown cancels them.
    unit.shutdown();
    unit.shutdown();
    unit.wait_dispatcher();
    assert_eq!(unit.dispatcher_error(), stgunit::error::ERROR_CANCELLED);
    assert!(hba.list().is_empty());
}

#[test]
fn dispatcher_rejects_double_start() {
    common::init_logging();
    let hba = Hba::new(16);
    let params = test_params([0x66; 16], 4, 0);
    let disk = Arc::new(RamDisk::new(16));
    let unit = StorageUnit::create_on(&hba, &params, disk as _).unwrap();
    unit.start_dispatcher(1).unwrap();
    assert!(unit.start_dispatcher(1).is_err());
    unit.shutdown();
    unit.wait_dispatcher();
}

/// Backend that defers every read and completes it from another thread
/// via send_response.
struct DeferredDisk {
    pending: Mutex<Option<(u64, u64, u32)>>,
}

impl StorageUnitInterface for DeferredDisk {
    fn read(
        &self,
        _storage_unit: &StorageUnit,
        _buffer: &mut [u8],
        block_address: u64,
        block_count: u32,
        _flush: bool,
        _status: &mut StorageUnitStatus,
    ) -> bool {
        let context = operation_context().unwrap();
        assert_eq!(context.request.kind, TRANSACT_KIND_READ);
        *self.pending.lock().unwrap() =
            Some((context.request.hint, block_address, block_count));
        false
    }
}

#[test]
fn deferred_response_completes_read() {
    common::init_logging();
    let hba = Hba::new(16);
    let params = test_params([0x67; 16], 4, 0);
    let disk = Arc::new(DeferredDisk {
        pending: Mutex::new(None),
    });

    let unit = StorageUnit::create_on(&hba, &params, Arc::clone(&disk) as _).unwrap();
    unit.start_dispatcher(2).unwrap();

    let initiator = {
        let hba = Arc::clone(&hba);
        thread::spawn(move || read_blocks(&hba, 4, 2))
    };

    // Wait for the callback to capture the request, then finish it from
    // this thread.
    let (hint, block_address, block_count) = loop {
        if let Some(pending) = disk.pending.lock().unwrap().take() {
            break pending;
        }
        thread::sleep(Duration::from_millis(5));
    };
    let mut buffer = vec![0u8; 4 * BLOCK_LENGTH];
    fill_pattern(&mut buffer[..block_count as usize * BLOCK_LENGTH], block_address);
    let rsp = TransactRsp {
        hint,
        kind: TRANSACT_KIND_READ,
        ..Default::default()
    };
    unit.send_response(&rsp, &mut buffer);

    let result = initiator.join().unwrap();
    assert_eq!(result.srb_status, SRB_STATUS_SUCCESS);
    assert!(check_pattern(&result.data, 4));

    unit.shutdown();
    unit.wait_dispatcher();
}
