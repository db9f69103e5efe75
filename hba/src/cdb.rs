// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command descriptor block parsing.
//!
//! SCSI is big-endian on the wire; every multi-byte field goes through the
//! explicit helpers here regardless of host endianness.

use scsi_sys::scsi::*;

pub fn get_be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

pub fn get_be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn get_be64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

pub fn put_be16(bytes: &mut [u8], value: u16) {
    bytes[..2].copy_from_slice(&value.to_be_bytes());
}

pub fn put_be32(bytes: &mut [u8], value: u32) {
    bytes[..4].copy_from_slice(&value.to_be_bytes());
}

pub fn put_be64(bytes: &mut [u8], value: u64) {
    bytes[..8].copy_from_slice(&value.to_be_bytes());
}

/// A borrowed CDB; the underlying buffer is always 16 bytes, the operation
/// code determines how many of them are meaningful.
#[derive(Clone, Copy)]
pub struct Cdb<'a>(pub &'a [u8; 16]);

impl<'a> Cdb<'a> {
    pub fn operation_code(&self) -> u8 {
        self.0[0]
    }

    /// CDB length in bytes, from the operation-code group.
    pub fn length(&self) -> usize {
        match self.operation_code() >> 5 {
            0 => 6,
            1 | 2 => 10,
            4 => 16,
            5 => 12,
            _ => 16,
        }
    }

    /// Block range and force-unit-access of a Read/Write/Synchronize Cache
    /// CDB in any of its 6/10/12/16-byte encodings.
    pub fn range(&self) -> (u64, u32, bool) {
        let cdb = self.0;
        match self.operation_code() >> 5 {
            0 => {
                // CDB6: 21-bit block address, 8-bit count where 0 means 256.
                let address = (((cdb[1] & 0x1f) as u64) << 16)
                    | ((cdb[2] as u64) << 8)
                    | (cdb[3] as u64);
                let count = if cdb[4] != 0 { cdb[4] as u32 } else { 256 };
                (address, count, false)
            }
            1 | 2 => (
                get_be32(&cdb[2..]) as u64,
                get_be16(&cdb[7..]) as u32,
                cdb[1] & 0x08 != 0,
            ),
            4 => (
                get_be64(&cdb[2..]),
                get_be32(&cdb[10..]),
                cdb[1] & 0x08 != 0,
            ),
            5 => (
                get_be32(&cdb[2..]) as u64,
                get_be32(&cdb[6..]),
                cdb[1] & 0x08 != 0,
            ),
            _ => (0, 0, false),
        }
    }

    // INQUIRY fields.

    pub fn inquiry_evpd(&self) -> bool {
        self.0[1] & 0x01 != 0
    }

    pub fn inquiry_page_code(&self) -> u8 {
        self.0[2]
    }

    // MODE SENSE fields; the 10-byte variant has its own layout.

    pub fn mode_sense_pc(&self) -> u8 {
        self.0[2] >> 6
    }

    pub fn mode_sense_page_code(&self) -> u8 {
        self.0[2] & 0x3f
    }

    // SERVICE ACTION IN (16).

    pub fn service_action(&self) -> u8 {
        self.0[1] & 0x1f
    }

    // UNMAP.

    pub fn unmap_anchor(&self) -> bool {
        self.0[1] & 0x01 != 0
    }
}

/// Builds a Read/Write/Synchronize Cache CDB of the requested size; test
/// and pass-through convenience.
pub fn build_rw_cdb(operation_code: u8, block_address: u64, block_count: u32) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = operation_code;
    match operation_code >> 5 {
        0 => {
            cdb[1] = ((block_address >> 16) & 0x1f) as u8;
            cdb[2] = (block_address >> 8) as u8;
            cdb[3] = block_address as u8;
            cdb[4] = block_count as u8;
        }
        1 | 2 => {
            put_be32(&mut cdb[2..], block_address as u32);
            put_be16(&mut cdb[7..], block_count as u16);
        }
        4 => {
            put_be64(&mut cdb[2..], block_address);
            put_be32(&mut cdb[10..], block_count);
        }
        5 => {
            put_be32(&mut cdb[2..], block_address as u32);
            put_be32(&mut cdb[6..], block_count);
        }
        _ => {}
    }
    cdb
}
