// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;

use remain::sorted;
use thiserror::Error as ThisError;

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("access denied")]
    AccessDenied,
    #[error("storage unit already exists")]
    AlreadyExists,
    #[error("operation cancelled")]
    Cancelled,
    #[error("no free storage unit slot")]
    CannotMake,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("storage unit not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

// Stable nonzero codes for the dispatcher error word.
pub const ERROR_INVALID_PARAMETER: u32 = 1;
pub const ERROR_NOT_FOUND: u32 = 2;
pub const ERROR_ALREADY_EXISTS: u32 = 3;
pub const ERROR_CANNOT_MAKE: u32 = 4;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_CANCELLED: u32 = 6;
pub const ERROR_IO: u32 = 7;

impl Error {
    /// Code published through the dispatcher error word; never zero.
    pub fn code(&self) -> u32 {
        match self {
            Error::AccessDenied => ERROR_ACCESS_DENIED,
            Error::AlreadyExists => ERROR_ALREADY_EXISTS,
            Error::Cancelled => ERROR_CANCELLED,
            Error::CannotMake => ERROR_CANNOT_MAKE,
            Error::InvalidParameter => ERROR_INVALID_PARAMETER,
            Error::Io(_) => ERROR_IO,
            Error::NotFound => ERROR_NOT_FOUND,
        }
    }
}

impl From<hba::Error> for Error {
    fn from(err: hba::Error) -> Self {
        match err {
            hba::Error::AccessDenied => Error::AccessDenied,
            hba::Error::AlreadyExists => Error::AlreadyExists,
            hba::Error::Cancelled => Error::Cancelled,
            hba::Error::CannotMake => Error::CannotMake,
            hba::Error::InvalidParameter => Error::InvalidParameter,
            hba::Error::NotFound => Error::NotFound,
        }
    }
}
