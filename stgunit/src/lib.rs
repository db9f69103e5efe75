// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! User-mode storage unit library.
//!
//! A storage unit pairs a block-device implementation (the
//! [`StorageUnitInterface`]) with a transport to the virtual SCSI adapter.
//! The dispatcher runs a pool of worker threads that each repeatedly call
//! transact, invoke the block callbacks, and carry the response back with
//! the wait for the next request.
//!
//! Two transports exist: the adapter transport talks to the in-process
//! [`hba`] engine the way the real library drives the kernel driver, and
//! the pipe transport (open names starting with `pipe:`) serves requests
//! over a message-mode socket for in-process testing.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod mbr;
pub mod net;
pub mod pipe;

pub use config::UnitConfig;
pub use dispatch::operation_context;
pub use dispatch::OperationContext;
pub use dispatch::StorageUnit;
pub use dispatch::StorageUnitInterface;
pub use error::Error;
pub use error::Result;
pub use handle::StorageHandle;
pub use mbr::define_partition_table;
pub use mbr::Partition;
