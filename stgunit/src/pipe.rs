// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The pipe transport.
//!
//! Instead of provisioning a unit in the adapter, a `pipe:` open name
//! allocates a slot in a process-wide registry and serves the unit over a
//! single-peer message-mode socket at `<base>/<slot-index>`. The peer
//! receives the storage-unit parameters as the first message after
//! connecting; each transact then writes an optional response (with the
//! Read payload whose length is recalled from a per-unit hint map) and
//! reads the next request (with the Write/Unmap payload). Short or failed
//! messages zero the request so the dispatcher just loops.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;

use log::debug;
use once_cell::sync::Lazy;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use scsi_sys::transact::btl_from_index;
use scsi_sys::transact::index_from_btl;
use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::TransactReq;
use scsi_sys::transact::TransactRsp;
use scsi_sys::transact::UnmapDescriptor;
use scsi_sys::transact::PIPE_PREFIX;
use scsi_sys::transact::STORAGE_UNIT_MAX_CAPACITY;
use scsi_sys::transact::TRANSACT_KIND_READ;
use scsi_sys::transact::TRANSACT_KIND_UNMAP;
use scsi_sys::transact::TRANSACT_KIND_WRITE;

use crate::net::UnixSeqpacket;
use crate::net::UnixSeqpacketListener;
use crate::Error;
use crate::Result;

/// Fixed message header size; a request occupies the leading bytes of the
/// same-sized header.
pub const TRANSACT_MSG_SIZE: usize = std::mem::size_of::<TransactRsp>();

static STORAGE_UNITS: Lazy<RwLock<Vec<Option<Arc<PipeUnit>>>>> =
    Lazy::new(|| RwLock::new(vec![None; STORAGE_UNIT_MAX_CAPACITY]));

struct PipeState {
    /// Positive while connected; the magnitude is a connection generation
    /// so concurrent disconnects of the same connection act once.
    connected: i32,
    conn: Option<Arc<UnixSeqpacket>>,
    /// Read-request hint to payload length, so the matching response knows
    /// how many bytes to attach.
    hints: HashMap<u64, u32>,
}

pub struct PipeUnit {
    params: StorageUnitParams,
    listener: UnixSeqpacketListener,
    state: RwLock<PipeState>,
    shutdown: AtomicBool,
}

impl PipeUnit {
    pub fn params(&self) -> &StorageUnitParams {
        &self.params
    }

    pub fn socket_path(&self) -> &Path {
        self.listener.path()
    }

    fn take_hint(&self, hint: u64) -> u32 {
        self.state
            .write()
            .unwrap()
            .hints
            .remove(&hint)
            .unwrap_or(0)
    }

    fn put_hint(&self, hint: u64, value: u32) -> bool {
        let mut state = self.state.write().unwrap();
        if state.hints.contains_key(&hint) {
            return false;
        }
        state.hints.insert(hint, value);
        true
    }
}

/// Allocates a registry slot for `params` and creates the unit's socket.
pub fn open_pipe(name: &str, params: &StorageUnitParams) -> Result<(Arc<PipeUnit>, u32)> {
    let base = name.strip_prefix(PIPE_PREFIX).unwrap_or(name);
    if base.is_empty() {
        return Err(Error::InvalidParameter);
    }

    let mut units = STORAGE_UNITS.write().unwrap();
    let mut free_index = None;
    for (index, slot) in units.iter().enumerate() {
        match slot {
            None => {
                if free_index.is_none() {
                    free_index = Some(index);
                }
            }
            Some(unit) => {
                if unit.params.guid == params.guid {
                    return Err(Error::AlreadyExists);
                }
            }
        }
    }
    let Some(index) = free_index else {
        return Err(Error::CannotMake);
    };

    let base = PathBuf::from(base);
    std::fs::create_dir_all(&base)?;
    let listener = UnixSeqpacketListener::bind(base.join(index.to_string()))?;

    let unit = Arc::new(PipeUnit {
        params: *params,
        listener,
        state: RwLock::new(PipeState {
            connected: 0,
            conn: None,
            hints: HashMap::new(),
        }),
        shutdown: AtomicBool::new(false),
    });
    units[index] = Some(Arc::clone(&unit));

    Ok((unit, btl_from_index(index)))
}

/// One transact exchange over the pipe; see the module comment for the
/// message flow.
pub fn transact_pipe(
    unit: &Arc<PipeUnit>,
    btl: u32,
    rsp: Option<&TransactRsp>,
    req: Option<&mut TransactReq>,
    data_buffer: &mut [u8],
) -> Result<()> {
    if rsp.is_none() && req.is_none() {
        return Err(Error::InvalidParameter);
    }
    if unit.shutdown.load(Ordering::Acquire) {
        return Err(Error::Cancelled);
    }
    let max_transfer_length = unit.params.max_transfer_length as usize;
    if req.is_some() && data_buffer.len() < max_transfer_length {
        return Err(Error::InvalidParameter);
    }

    {
        let units = STORAGE_UNITS.read().unwrap();
        match units.get(index_from_btl(btl)) {
            Some(Some(registered)) if Arc::ptr_eq(registered, unit) => {}
            _ => return Err(Error::NotFound),
        }
    }

    let mut msg = vec![0u8; TRANSACT_MSG_SIZE + max_transfer_length];

    // Connect phase: accept a peer and deliver the unit parameters as the
    // first message. Connecting holds the unit lock, serializing workers.
    let (generation, conn) = {
        let mut state = unit.state.write().unwrap();
        if state.connected <= 0 {
            if unit.shutdown.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            let conn = match unit.listener.accept() {
                Ok(conn) => Arc::new(conn),
                Err(err) => {
                    if unit.shutdown.load(Ordering::Acquire) {
                        return Err(Error::Cancelled);
                    }
                    return Err(Error::Io(err));
                }
            };
            match conn.send(unit.params.as_bytes()) {
                Ok(_) => {
                    state.conn = Some(conn);
                    state.connected = -state.connected;
                    state.connected += 1;
                }
                Err(err) => {
                    debug!("pipe handshake failed: {}", err);
                    return zero_out(req);
                }
            }
        }
        (
            state.connected,
            Arc::clone(state.conn.as_ref().expect("connected without a socket")),
        )
    };

    if let Some(rsp) = rsp {
        let data_length = if rsp.kind == TRANSACT_KIND_READ {
            unit.take_hint(rsp.hint) as usize
        } else {
            0
        };
        msg[..TRANSACT_MSG_SIZE].copy_from_slice(rsp.as_bytes());
        let data_length = data_length.min(data_buffer.len());
        msg[TRANSACT_MSG_SIZE..TRANSACT_MSG_SIZE + data_length]
            .copy_from_slice(&data_buffer[..data_length]);
        if conn.send(&msg[..TRANSACT_MSG_SIZE + data_length]).is_err() {
            disconnect(unit, generation);
            return zero_out(req);
        }
    }

    if let Some(req) = req {
        let received = match conn.recv(&mut msg) {
            Ok(n) => n,
            Err(_) => {
                disconnect(unit, generation);
                return zero_out(Some(req));
            }
        };
        if received < TRANSACT_MSG_SIZE {
            if received == 0 {
                // Peer went away; reconnect on the next call.
                disconnect(unit, generation);
            }
            return zero_out(Some(req));
        }

        let incoming = TransactReq::read_from_prefix(&msg[..])
            .expect("transact message shorter than a request");
        match incoming.kind {
            TRANSACT_KIND_READ => {
                let data_length = incoming.block_count as u64 * unit.params.block_length as u64;
                if data_length > max_transfer_length as u64 {
                    return zero_out(Some(req));
                }
                if !unit.put_hint(incoming.hint, data_length as u32) {
                    return zero_out(Some(req));
                }
            }
            TRANSACT_KIND_WRITE => {
                let data_length = incoming.block_count as u64 * unit.params.block_length as u64;
                if data_length > max_transfer_length as u64 {
                    return zero_out(Some(req));
                }
                let payload = (received - TRANSACT_MSG_SIZE).min(data_length as usize);
                data_buffer[..payload]
                    .copy_from_slice(&msg[TRANSACT_MSG_SIZE..TRANSACT_MSG_SIZE + payload]);
                data_buffer[payload..data_length as usize].fill(0);
            }
            TRANSACT_KIND_UNMAP => {
                let data_length = incoming.block_count as u64
                    * std::mem::size_of::<UnmapDescriptor>() as u64;
                if data_length > max_transfer_length as u64 {
                    return zero_out(Some(req));
                }
                let payload = (received - TRANSACT_MSG_SIZE).min(data_length as usize);
                data_buffer[..payload]
                    .copy_from_slice(&msg[TRANSACT_MSG_SIZE..TRANSACT_MSG_SIZE + payload]);
                data_buffer[payload..data_length as usize].fill(0);
            }
            _ => {}
        }
        *req = incoming;
    }

    Ok(())
}

/// Removes the unit from the registry and wakes any blocked pipe I/O.
pub fn shutdown_pipe(unit: &Arc<PipeUnit>, guid: &[u8; 16]) -> Result<()> {
    {
        let mut units = STORAGE_UNITS.write().unwrap();
        let Some(index) = units.iter().position(
            |slot| matches!(slot, Some(registered) if registered.params.guid == *guid),
        ) else {
            return Err(Error::NotFound);
        };
        if !Arc::ptr_eq(units[index].as_ref().unwrap(), unit) {
            return Err(Error::NotFound);
        }
        units[index] = None;
    }

    unit.shutdown.store(true, Ordering::Release);
    unit.listener.shutdown();
    if let Some(conn) = unit.state.read().unwrap().conn.as_ref() {
        conn.shutdown();
    }
    Ok(())
}

fn disconnect(unit: &PipeUnit, generation: i32) {
    let mut state = unit.state.write().unwrap();
    if state.connected == generation {
        state.conn = None;
        state.connected = -state.connected;
    }
}

fn zero_out(req: Option<&mut TransactReq>) -> Result<()> {
    if let Some(req) = req {
        *req = TransactReq::default();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_params(guid: [u8; 16]) -> StorageUnitParams {
        StorageUnitParams {
            guid,
            block_count: 16,
            block_length: 512,
            max_transfer_length: 4 * 512,
            ..Default::default()
        }
    }

    #[test]
    fn open_rejects_duplicate_guid() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display().to_string();
        let name = format!("{}{}", PIPE_PREFIX, base);
        let params = pipe_params([0xd7; 16]);
        let (unit, _btl) = open_pipe(&name, &params).unwrap();
        assert!(matches!(
            open_pipe(&name, &params),
            Err(Error::AlreadyExists)
        ));
        shutdown_pipe(&unit, &params.guid).unwrap();
    }

    #[test]
    fn shutdown_removes_slot() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display().to_string();
        let name = format!("{}{}", PIPE_PREFIX, base);
        let params = pipe_params([0xd8; 16]);
        let (unit, _btl) = open_pipe(&name, &params).unwrap();
        shutdown_pipe(&unit, &params.guid).unwrap();
        assert!(matches!(
            shutdown_pipe(&unit, &params.guid),
            Err(Error::NotFound)
        ));
        // The slot is free again.
        let (unit, _btl) = open_pipe(&name, &params).unwrap();
        shutdown_pipe(&unit, &params.guid).unwrap();
    }

    #[test]
    fn hint_map_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().display().to_string();
        let name = format!("{}{}", PIPE_PREFIX, base);
        let params = pipe_params([0xd9; 16]);
        let (unit, _btl) = open_pipe(&name, &params).unwrap();
        assert!(unit.put_hint(0x1234, 1024));
        // Duplicate hints are rejected until taken.
        assert!(!unit.put_hint(0x1234, 2048));
        assert_eq!(unit.take_hint(0x1234), 1024);
        assert_eq!(unit.take_hint(0x1234), 0);
        shutdown_pipe(&unit, &params.guid).unwrap();
    }
}
