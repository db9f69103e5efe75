// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw SCSI and storage-unit transact wire definitions.
//!
//! This crate only contains constants and fixed-layout structures shared by
//! the virtual SCSI adapter and the user-mode storage unit library. All
//! multi-byte SCSI fields are big-endian byte arrays; transact structures
//! are native-endian and only ever cross a same-host boundary.

pub mod hash;
pub mod scsi;
pub mod transact;

pub use hash::hash_mix32;
pub use hash::hash_mix64;
