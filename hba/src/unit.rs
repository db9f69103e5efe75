// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage units and the adapter slot table.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use log::debug;
use scsi_sys::transact::btl_b;
use scsi_sys::transact::btl_from_index;
use scsi_sys::transact::btl_l;
use scsi_sys::transact::btl_t;
use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::STORAGE_UNIT_MAX_CAPACITY;

use crate::ioq::Ioq;
use crate::Error;
use crate::Result;

pub const SERIAL_NUMBER_LENGTH: usize = 36;

/// One provisioned storage unit. Created with [`Hba::provision`]; torn down
/// when the last reference drops after unprovision stops its queue.
pub struct StorageUnit {
    params: StorageUnitParams,
    serial_number: [u8; SERIAL_NUMBER_LENGTH],
    owner_process_id: u32,
    transact_process_id: AtomicU32,
    ioq: Ioq,
}

impl StorageUnit {
    pub(crate) fn new(params: &StorageUnitParams, process_id: u32) -> Arc<StorageUnit> {
        let mut params = *params;
        left_align_ascii(&mut params.product_id);
        left_align_ascii(&mut params.product_revision_level);
        Arc::new(StorageUnit {
            serial_number: serial_number_from_guid(&params.guid),
            params,
            owner_process_id: process_id,
            transact_process_id: AtomicU32::new(process_id),
            ioq: Ioq::new(),
        })
    }

    pub fn params(&self) -> &StorageUnitParams {
        &self.params
    }

    /// 36-character ASCII serial derived from the GUID.
    pub fn serial_number(&self) -> &[u8; SERIAL_NUMBER_LENGTH] {
        &self.serial_number
    }

    pub fn owner_process_id(&self) -> u32 {
        self.owner_process_id
    }

    pub fn transact_process_id(&self) -> u32 {
        self.transact_process_id.load(Ordering::Relaxed)
    }

    pub fn set_transact_process_id(&self, process_id: u32) {
        self.transact_process_id.store(process_id, Ordering::Relaxed);
    }

    pub fn ioq(&self) -> &Ioq {
        &self.ioq
    }
}

/// "Left align" an ASCII field: every byte from the first non-printable one
/// on becomes a space. An all-NUL field is left alone for testing.
fn left_align_ascii(field: &mut [u8]) {
    if field.first() == Some(&0) {
        return;
    }
    let mut spaces = false;
    for byte in field.iter_mut() {
        if spaces || *byte < b' ' || *byte >= 0x7f {
            *byte = b' ';
            spaces = true;
        }
    }
}

fn serial_number_from_guid(guid: &[u8; 16]) -> [u8; SERIAL_NUMBER_LENGTH] {
    let data1 = u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]);
    let data2 = u16::from_le_bytes([guid[4], guid[5]]);
    let data3 = u16::from_le_bytes([guid[6], guid[7]]);
    let text = format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        data1,
        data2,
        data3,
        guid[8],
        guid[9],
        guid[10],
        guid[11],
        guid[12],
        guid[13],
        guid[14],
        guid[15],
    );
    let mut serial = [0u8; SERIAL_NUMBER_LENGTH];
    serial.copy_from_slice(text.as_bytes());
    serial
}

struct UnitTable {
    units: Vec<Option<Arc<StorageUnit>>>,
    count: usize,
}

/// The adapter: a fixed-capacity table of storage units.
pub struct Hba {
    state: Mutex<UnitTable>,
    capacity: usize,
}

impl Hba {
    pub fn new(capacity: usize) -> Arc<Hba> {
        let capacity = capacity.clamp(1, STORAGE_UNIT_MAX_CAPACITY);
        Arc::new(Hba {
            state: Mutex::new(UnitTable {
                units: vec![None; capacity],
                count: 0,
            }),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates a storage unit in the first free slot and returns its BTL.
    pub fn provision(&self, params: &StorageUnitParams, process_id: u32) -> Result<u32> {
        validate_params(params)?;

        let unit = StorageUnit::new(params, process_id);
        let mut state = self.state.lock().unwrap();
        let mut free_index = None;
        for (index, slot) in state.units.iter().enumerate() {
            match slot {
                None => {
                    if free_index.is_none() {
                        free_index = Some(index);
                    }
                }
                Some(existing) => {
                    if existing.params.guid == params.guid {
                        return Err(Error::AlreadyExists);
                    }
                }
            }
        }
        let Some(index) = free_index else {
            return Err(Error::CannotMake);
        };
        state.units[index] = Some(unit);
        state.count += 1;
        drop(state);

        debug!("bus change: unit provisioned at index {}", index);
        Ok(btl_from_index(index))
    }

    /// Removes a storage unit by GUID (preferred) or slot index and stops
    /// its queue. Only the owning process may unprovision.
    pub fn unprovision(
        &self,
        guid: Option<&[u8; 16]>,
        index: usize,
        process_id: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (index, unit) = match guid {
            Some(guid) => {
                let Some(index) = state
                    .units
                    .iter()
                    .position(|slot| matches!(slot, Some(unit) if unit.params.guid == *guid))
                else {
                    return Err(Error::NotFound);
                };
                (index, Arc::clone(state.units[index].as_ref().unwrap()))
            }
            None => match state.units.get(index) {
                Some(Some(unit)) => (index, Arc::clone(unit)),
                _ => return Err(Error::NotFound),
            },
        };
        if unit.owner_process_id != process_id {
            return Err(Error::AccessDenied);
        }
        state.units[index] = None;
        state.count -= 1;
        drop(state);

        unit.ioq.reset(true);
        debug!("bus change: unit unprovisioned at index {}", index);
        Ok(())
    }

    /// Looks up the unit addressed by `btl`. Bus and LUN must be zero.
    pub fn reference_by_btl(&self, btl: u32) -> Option<Arc<StorageUnit>> {
        if btl_b(btl) != 0 || btl_l(btl) != 0 {
            return None;
        }
        let state = self.state.lock().unwrap();
        state
            .units
            .get(btl_t(btl) as usize)
            .and_then(|slot| slot.as_ref().map(Arc::clone))
    }

    /// Returns the occupancy bitmap, optionally filtered to units owned by
    /// `process_id`, along with the number of set bits.
    pub fn use_bitmap(&self, process_id: Option<u32>) -> ([u8; 32], usize) {
        let mut bitmap = [0u8; 32];
        let mut count = 0;
        let state = self.state.lock().unwrap();
        for (index, slot) in state.units.iter().enumerate() {
            if let Some(unit) = slot {
                if process_id.is_none() || process_id == Some(unit.owner_process_id) {
                    bitmap[index >> 3] |= 1 << (index & 7);
                    count += 1;
                }
            }
        }
        (bitmap, count)
    }

    /// Enumerates the BTLs of all occupied slots.
    pub fn list(&self) -> Vec<u32> {
        let (bitmap, mut count) = self.use_bitmap(None);
        let mut btls = Vec::with_capacity(count);
        for index in 0..STORAGE_UNIT_MAX_CAPACITY {
            if count == 0 {
                break;
            }
            if bitmap[index >> 3] & (1 << (index & 7)) != 0 {
                btls.push(btl_from_index(index));
                count -= 1;
            }
        }
        btls
    }

    /// Process-death sweep: unprovisions every unit the exited process
    /// owns, releasing its pending I/O.
    pub fn notify_process_exit(&self, process_id: u32) {
        let (bitmap, mut count) = self.use_bitmap(Some(process_id));
        for index in 0..STORAGE_UNIT_MAX_CAPACITY {
            if count == 0 {
                break;
            }
            if bitmap[index >> 3] & (1 << (index & 7)) != 0 {
                let _ = self.unprovision(None, index, process_id);
                count -= 1;
            }
        }
    }
}

fn validate_params(params: &StorageUnitParams) -> Result<()> {
    if params.guid == [0u8; 16]
        || params.block_count == 0
        || (params.block_length as usize)
            < std::mem::size_of::<scsi_sys::transact::UnmapDescriptor>()
        || params.device_type != scsi_sys::scsi::DIRECT_ACCESS_DEVICE
        || params.max_transfer_length == 0
        || params.max_transfer_length % params.block_length != 0
    {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

/// Process-global adapter, guarded for create/destroy the way the driver
/// guards its device extension.
pub mod global {
    use std::sync::Arc;
    use std::sync::RwLock;

    use scsi_sys::transact::STORAGE_UNIT_CAPACITY;

    use super::Hba;

    static ADAPTER: RwLock<Option<Arc<Hba>>> = RwLock::new(None);

    /// Returns the global adapter, creating it with the default capacity on
    /// first use.
    pub fn init() -> Arc<Hba> {
        let mut adapter = ADAPTER.write().unwrap();
        match &*adapter {
            Some(hba) => Arc::clone(hba),
            None => {
                let hba = Hba::new(STORAGE_UNIT_CAPACITY);
                *adapter = Some(Arc::clone(&hba));
                hba
            }
        }
    }

    pub fn acquire() -> Option<Arc<Hba>> {
        ADAPTER.read().unwrap().as_ref().map(Arc::clone)
    }

    pub fn fini() {
        ADAPTER.write().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use scsi_sys::transact::btl;

    use super::*;

    fn params_with_guid(guid: [u8; 16]) -> StorageUnitParams {
        StorageUnitParams {
            guid,
            block_count: 16,
            block_length: 512,
            max_transfer_length: 512,
            ..Default::default()
        }
    }

    #[test]
    fn provision_unprovision_round_trip() {
        let hba = Hba::new(16);
        let params = params_with_guid([1; 16]);
        assert_eq!(hba.provision(&params, 10).unwrap(), 0);
        hba.unprovision(Some(&params.guid), 0, 10).unwrap();
        assert_eq!(hba.provision(&params, 10).unwrap(), 0);
    }

    #[test]
    fn provision_rejects_invalid_params() {
        let hba = Hba::new(16);
        let mut params = params_with_guid([0; 16]);
        assert_eq!(hba.provision(&params, 10), Err(Error::InvalidParameter));

        params = params_with_guid([1; 16]);
        params.block_count = 0;
        assert_eq!(hba.provision(&params, 10), Err(Error::InvalidParameter));

        params = params_with_guid([1; 16]);
        params.block_length = 8;
        assert_eq!(hba.provision(&params, 10), Err(Error::InvalidParameter));

        params = params_with_guid([1; 16]);
        params.max_transfer_length = 513;
        assert_eq!(hba.provision(&params, 10), Err(Error::InvalidParameter));

        params = params_with_guid([1; 16]);
        params.device_type = 5;
        assert_eq!(hba.provision(&params, 10), Err(Error::InvalidParameter));
    }

    #[test]
    fn duplicate_guid_collides() {
        let hba = Hba::new(16);
        let params = params_with_guid([1; 16]);
        assert_eq!(hba.provision(&params, 10).unwrap(), 0);
        assert_eq!(hba.provision(&params, 10), Err(Error::AlreadyExists));
        let other = params_with_guid([2; 16]);
        assert_eq!(hba.provision(&other, 10).unwrap(), btl(0, 1, 0));
    }

    #[test]
    fn table_full_cannot_make() {
        let hba = Hba::new(2);
        for index in 0..2u8 {
            let params = params_with_guid([index + 1; 16]);
            assert_eq!(
                hba.provision(&params, 10).unwrap(),
                btl_from_index(index as usize)
            );
        }
        let params = params_with_guid([99; 16]);
        assert_eq!(hba.provision(&params, 10), Err(Error::CannotMake));
    }

    #[test]
    fn unprovision_requires_owner() {
        let hba = Hba::new(16);
        let params = params_with_guid([1; 16]);
        hba.provision(&params, 10).unwrap();
        assert_eq!(
            hba.unprovision(Some(&params.guid), 0, 11),
            Err(Error::AccessDenied)
        );
        assert!(hba.reference_by_btl(0).is_some());
        hba.unprovision(Some(&params.guid), 0, 10).unwrap();
        assert_eq!(
            hba.unprovision(Some(&params.guid), 0, 10),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn reference_by_btl_checks_bus_and_lun() {
        let hba = Hba::new(16);
        let params = params_with_guid([1; 16]);
        hba.provision(&params, 10).unwrap();
        assert!(hba.reference_by_btl(btl(0, 0, 0)).is_some());
        assert!(hba.reference_by_btl(btl(1, 0, 0)).is_none());
        assert!(hba.reference_by_btl(btl(0, 0, 1)).is_none());
        assert!(hba.reference_by_btl(btl(0, 1, 0)).is_none());
    }

    #[test]
    fn reference_returns_provisioned_params() {
        let hba = Hba::new(16);
        let mut params = params_with_guid([7; 16]);
        params.product_id = *b"TestDisk\0\0\0\0\0\0\0\0";
        hba.provision(&params, 10).unwrap();
        let unit = hba.reference_by_btl(0).unwrap();
        assert_eq!(unit.params().guid, params.guid);
        assert_eq!(unit.params().block_count, 16);
        // Left alignment turned the embedded NULs into spaces.
        assert_eq!(&unit.params().product_id, b"TestDisk        ");
    }

    #[test]
    fn process_exit_sweeps_owned_units() {
        let hba = Hba::new(16);
        hba.provision(&params_with_guid([1; 16]), 10).unwrap();
        hba.provision(&params_with_guid([2; 16]), 11).unwrap();
        hba.provision(&params_with_guid([3; 16]), 10).unwrap();

        let unit = hba.reference_by_btl(0).unwrap();
        hba.notify_process_exit(10);
        assert_eq!(hba.list(), vec![btl(0, 1, 0)]);
        assert!(unit.ioq().stopped());

        let (bitmap, count) = hba.use_bitmap(Some(11));
        assert_eq!(count, 1);
        assert_eq!(bitmap[0], 0b10);
    }

    #[test]
    fn serial_number_derivation() {
        // {4112A9A1-0000-0000-0807-060504030201} in wire (little-endian
        // fields) layout.
        let mut guid = [0u8; 16];
        guid[0..4].copy_from_slice(&0x4112a9a1u32.to_le_bytes());
        guid[8..16].copy_from_slice(&[8, 7, 6, 5, 4, 3, 2, 1]);
        let params = StorageUnitParams {
            guid,
            block_count: 16,
            block_length: 512,
            max_transfer_length: 512,
            ..Default::default()
        };
        let unit = StorageUnit::new(&params, 1);
        assert_eq!(
            unit.serial_number(),
            b"4112a9a1-0000-0000-0807-060504030201"
        );
    }
}
