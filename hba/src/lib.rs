// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Virtual SCSI host bus adapter.
//!
//! The adapter owns a fixed-capacity table of storage units, decodes SCSI
//! request blocks and answers non-data commands in place, and forwards
//! Read/Write/Flush/Unmap to per-unit I/O queues from which user-mode
//! dispatcher workers pull requests via [`Hba::transact`].

use remain::sorted;
use thiserror::Error as ThisError;

pub mod cdb;
pub mod io;
pub mod ioctl;
pub mod ioq;
pub mod qevent;
pub mod scsi;
pub mod srb;
pub mod unit;

pub use ioq::Ioq;
pub use qevent::CancelToken;
pub use qevent::Qevent;
pub use qevent::WaitStatus;
pub use srb::DataDirection;
pub use srb::Srb;
pub use srb::SrbFunction;
pub use unit::global;
pub use unit::Hba;
pub use unit::StorageUnit;

/// Errors surfaced by the adapter's service surface.
#[sorted]
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("access denied")]
    AccessDenied,
    #[error("object already exists")]
    AlreadyExists,
    #[error("operation cancelled")]
    Cancelled,
    #[error("no free storage unit slot")]
    CannotMake,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("object not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
