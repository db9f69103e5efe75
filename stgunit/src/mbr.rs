// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Minimal master-boot-record builder.
//!
//! Backends use this to pre-stamp an empty image with a partition table.
//! The record cannot boot anything: the boot code is just `INT 18h; HLT;
//! JMP -3`, which is fine because none of these units are bootable.
//!
//! See <https://en.wikipedia.org/wiki/Master_boot_record>

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

use crate::Error;
use crate::Result;

// Windows CHS defaults.
const SECTORS_PER_TRACK: u32 = 63;
const HEADS_PER_CYLINDER: u32 = 255;

/// One partition to place in the table.
#[derive(Debug, Default, Copy, Clone)]
pub struct Partition {
    /// Partition type byte.
    pub kind: u8,
    /// 0: not active (bootable); 0x80: active.
    pub active: u8,
    pub block_address: u64,
    pub block_count: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
struct MbrPartition {
    active: u8,
    first_chs: [u8; 3],
    kind: u8,
    last_chs: [u8; 3],
    block_address: [u8; 4],
    block_count: [u8; 4],
}
const_assert_eq!(16, std::mem::size_of::<MbrPartition>());

#[repr(C)]
#[derive(Copy, Clone, FromZeroes, FromBytes, AsBytes)]
struct Mbr {
    boot: [u8; 440],
    signature: [u8; 4],
    padding: [u8; 2],
    partitions: [MbrPartition; 4],
    magic: [u8; 2],
}
const_assert_eq!(512, std::mem::size_of::<Mbr>());

fn lba_to_chs(lba: u32) -> (u32, u32, u32) {
    let cylinder = lba / (HEADS_PER_CYLINDER * SECTORS_PER_TRACK);
    let head = (lba / SECTORS_PER_TRACK) % HEADS_PER_CYLINDER;
    let sector = (lba % SECTORS_PER_TRACK) + 1;
    if cylinder > 1023 {
        (1023, 254, 63)
    } else {
        (cylinder, head, sector)
    }
}

fn chs_to_mbr(cylinder: u32, head: u32, sector: u32) -> [u8; 3] {
    [
        head as u8,
        ((sector & 0x3f) | ((cylinder >> 2) & 0xc0)) as u8,
        (cylinder & 0xff) as u8,
    ]
}

/// Materializes a partition table for up to 4 partitions into a 512-byte
/// master boot record.
pub fn define_partition_table(partitions: &[Partition], buffer: &mut [u8; 512]) -> Result<()> {
    if partitions.len() > 4 {
        return Err(Error::InvalidParameter);
    }
    for partition in partitions {
        let end = partition.block_address + partition.block_count;
        if end <= partition.block_address || end > u32::MAX as u64 {
            return Err(Error::InvalidParameter);
        }
    }

    let mut mbr = Mbr::new_zeroed();
    mbr.boot[..5].copy_from_slice(&[
        0xcd, 0x18, // INT 18h
        0xf4, // HLT
        0xeb, 0xfd, // JMP to the HLT instruction
    ]);
    mbr.magic = [0x55, 0xaa];

    for (entry, partition) in mbr.partitions.iter_mut().zip(partitions) {
        let block_address = partition.block_address as u32;
        let end_block_address = (partition.block_address + partition.block_count) as u32;

        entry.kind = partition.kind;
        entry.active = partition.active;
        entry.block_address = block_address.to_le_bytes();
        entry.block_count = (partition.block_count as u32).to_le_bytes();

        let (cylinder, head, sector) = lba_to_chs(block_address);
        entry.first_chs = chs_to_mbr(cylinder, head, sector);
        let (cylinder, head, sector) = lba_to_chs(end_block_address);
        entry.last_chs = chs_to_mbr(cylinder, head, sector);
    }

    buffer.copy_from_slice(mbr.as_bytes());
    Ok(())
}
