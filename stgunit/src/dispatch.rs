// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The storage unit object and its dispatcher.
//!
//! [`StorageUnit::start_dispatcher`] runs a pool of workers; each repeats
//! one transact exchange (response out, request in) and calls into the
//! [`StorageUnitInterface`]. A callback may defer its response and finish
//! later with [`StorageUnit::send_response`] from any thread. The first
//! worker failure latches the dispatcher error and shuts the unit down,
//! which cancels the transacts of every other worker.

use std::cell::RefCell;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;

use log::debug;
use zerocopy::FromBytes;

use scsi_sys::scsi::SCSI_ADSENSE_ILLEGAL_COMMAND;
use scsi_sys::scsi::SCSI_SENSE_ILLEGAL_REQUEST;
use scsi_sys::transact::StorageUnitParams;
use scsi_sys::transact::StorageUnitStatus;
use scsi_sys::transact::TransactReq;
use scsi_sys::transact::TransactRsp;
use scsi_sys::transact::UnmapDescriptor;
use scsi_sys::transact::TRANSACT_KIND_COUNT;
use scsi_sys::transact::TRANSACT_KIND_FLUSH;
use scsi_sys::transact::TRANSACT_KIND_READ;
use scsi_sys::transact::TRANSACT_KIND_UNMAP;
use scsi_sys::transact::TRANSACT_KIND_WRITE;

use crate::handle::StorageHandle;
use crate::Error;
use crate::Result;

/// The block-device capability set. A default method reports the
/// operation as unsupported, the way a missing entry in a function-pointer
/// record would.
pub trait StorageUnitInterface: Send + Sync {
    fn read(
        &self,
        storage_unit: &StorageUnit,
        buffer: &mut [u8],
        block_address: u64,
        block_count: u32,
        flush: bool,
        status: &mut StorageUnitStatus,
    ) -> bool {
        let _ = (storage_unit, buffer, block_address, block_count, flush);
        unsupported(status)
    }

    fn write(
        &self,
        storage_unit: &StorageUnit,
        buffer: &[u8],
        block_address: u64,
        block_count: u32,
        flush: bool,
        status: &mut StorageUnitStatus,
    ) -> bool {
        let _ = (storage_unit, buffer, block_address, block_count, flush);
        unsupported(status)
    }

    fn flush(
        &self,
        storage_unit: &StorageUnit,
        block_address: u64,
        block_count: u32,
        status: &mut StorageUnitStatus,
    ) -> bool {
        let _ = (storage_unit, block_address, block_count);
        unsupported(status)
    }

    fn unmap(
        &self,
        storage_unit: &StorageUnit,
        descriptors: &[UnmapDescriptor],
        status: &mut StorageUnitStatus,
    ) -> bool {
        let _ = (storage_unit, descriptors);
        unsupported(status)
    }

    /// Whether [`Self::flush`] is implemented; gates the final flush the
    /// dispatcher issues on behalf of the host at shutdown.
    fn supports_flush(&self) -> bool {
        false
    }
}

fn unsupported(status: &mut StorageUnitStatus) -> bool {
    status.set_sense(SCSI_SENSE_ILLEGAL_REQUEST, SCSI_ADSENSE_ILLEGAL_COMMAND, None);
    true
}

/// Buffer allocator for the per-worker data buffers.
pub type BufferAlloc = dyn Fn(usize) -> Vec<u8> + Send + Sync;

/// The request/response pair of the operation a block callback is
/// currently servicing, retrievable via [`operation_context`].
#[derive(Debug, Clone, Copy)]
pub struct OperationContext {
    pub request: TransactReq,
    pub response: TransactRsp,
}

thread_local! {
    static OPERATION_CONTEXT: RefCell<Option<OperationContext>> = const { RefCell::new(None) };
}

/// Returns the calling worker's current operation context; `None` outside
/// a block callback.
pub fn operation_context() -> Option<OperationContext> {
    OPERATION_CONTEXT.with(|ctx| *ctx.borrow())
}

pub struct StorageUnit {
    params: StorageUnitParams,
    interface: Arc<dyn StorageUnitInterface>,
    handle: StorageHandle,
    btl: u32,
    buffer_alloc: Mutex<Arc<BufferAlloc>>,
    dispatcher: Mutex<Option<JoinHandle<u32>>>,
    pending_spawns: AtomicUsize,
    dispatcher_error: AtomicU32,
    debug_log: AtomicU32,
}

impl StorageUnit {
    /// Creates a storage unit on the named transport; `None` selects the
    /// default adapter.
    pub fn create(
        device_name: Option<&str>,
        params: &StorageUnitParams,
        interface: Arc<dyn StorageUnitInterface>,
    ) -> Result<Arc<StorageUnit>> {
        let name = device_name.unwrap_or(scsi_sys::transact::HARDWARE_ID);
        let (handle, btl) = StorageHandle::open(name, params)?;
        Ok(Self::with_handle(params, interface, handle, btl))
    }

    /// Creates a storage unit on a specific adapter instance.
    pub fn create_on(
        hba: &Arc<hba::Hba>,
        params: &StorageUnitParams,
        interface: Arc<dyn StorageUnitInterface>,
    ) -> Result<Arc<StorageUnit>> {
        let (handle, btl) = StorageHandle::open_on(hba, params)?;
        Ok(Self::with_handle(params, interface, handle, btl))
    }

    fn with_handle(
        params: &StorageUnitParams,
        interface: Arc<dyn StorageUnitInterface>,
        handle: StorageHandle,
        btl: u32,
    ) -> Arc<StorageUnit> {
        Arc::new(StorageUnit {
            params: *params,
            interface,
            handle,
            btl,
            buffer_alloc: Mutex::new(Arc::new(|size| vec![0u8; size])),
            dispatcher: Mutex::new(None),
            pending_spawns: AtomicUsize::new(0),
            dispatcher_error: AtomicU32::new(0),
            debug_log: AtomicU32::new(0),
        })
    }

    pub fn params(&self) -> &StorageUnitParams {
        &self.params
    }

    pub fn btl(&self) -> u32 {
        self.btl
    }

    pub fn handle(&self) -> &StorageHandle {
        &self.handle
    }

    /// Replaces the data-buffer allocator; takes effect for workers
    /// started afterwards.
    pub fn set_buffer_allocator(&self, alloc: Arc<BufferAlloc>) {
        *self.buffer_alloc.lock().unwrap() = alloc;
    }

    /// Per-kind bitmask of requests/responses to log; bits past the known
    /// kinds log everything unknown.
    pub fn set_debug_log(&self, mask: u32) {
        self.debug_log.store(mask, Ordering::Relaxed);
    }

    /// First worker failure, as an [`Error`] code; 0 while healthy.
    pub fn dispatcher_error(&self) -> u32 {
        self.dispatcher_error.load(Ordering::Acquire)
    }

    pub fn set_dispatcher_error(&self, error: u32) {
        if error == 0 {
            return;
        }
        let _ = self.dispatcher_error.compare_exchange(
            0,
            error,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Starts `thread_count` dispatcher workers; 0 means one per CPU in
    /// the process affinity mask.
    pub fn start_dispatcher(self: &Arc<Self>, thread_count: usize) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock().unwrap();
        if dispatcher.is_some() {
            return Err(Error::InvalidParameter);
        }

        let thread_count = if thread_count == 0 {
            affinity_thread_count()
        } else {
            thread_count
        };
        self.pending_spawns.store(thread_count, Ordering::Release);

        let unit = Arc::clone(self);
        let root = thread::Builder::new()
            .name("stgunit_disp".to_string())
            .spawn(move || dispatcher_thread(unit, true))
            .map_err(Error::Io)?;
        *dispatcher = Some(root);
        Ok(())
    }

    /// Waits for the dispatcher (all workers) to stop.
    pub fn wait_dispatcher(&self) {
        let root = self.dispatcher.lock().unwrap().take();
        if let Some(root) = root {
            let _ = root.join();
        }
    }

    /// Shuts the unit down: removes it from its host, which cancels every
    /// worker's transact. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.handle.shutdown(&self.params.guid);
    }

    /// Forwards a deferred response; used by interfaces that returned
    /// incomplete from a callback and finish the work on another thread.
    /// `data_buffer` must be at least `max_transfer_length` bytes and
    /// carries the Read payload when responding to a Read.
    pub fn send_response(&self, response: &TransactRsp, data_buffer: &mut [u8]) {
        self.debug_log_response(response);
        if let Err(err) = self.handle.transact(self.btl, Some(response), None, data_buffer) {
            self.set_dispatcher_error(err.code());
            self.shutdown();
        }
    }

    fn debug_log_request(&self, request: &TransactReq) {
        let mask = self.debug_log.load(Ordering::Relaxed);
        if mask != 0 && (request.kind >= TRANSACT_KIND_COUNT || mask & (1 << request.kind) != 0) {
            debug!("request: {:?}", request);
        }
    }

    fn debug_log_response(&self, response: &TransactRsp) {
        let mask = self.debug_log.load(Ordering::Relaxed);
        if mask != 0 && (response.kind >= TRANSACT_KIND_COUNT || mask & (1 << response.kind) != 0)
        {
            debug!("response: {:?}", response);
        }
    }
}

impl Drop for StorageUnit {
    fn drop(&mut self) {
        let _ = self.handle.shutdown(&self.params.guid);
    }
}

/// Number of CPUs in the process affinity mask; the default worker count.
fn affinity_thread_count() -> usize {
    // SAFETY: cpu_set_t is a plain bitmask filled in by the kernel.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) == 0 {
            let count = libc::CPU_COUNT(&set);
            if count > 0 {
                return count as usize;
            }
        }
    }
    1
}

fn dispatcher_thread(unit: Arc<StorageUnit>, is_root: bool) -> u32 {
    let max_transfer_length = unit.params.max_transfer_length as usize;
    let alloc = Arc::clone(&*unit.buffer_alloc.lock().unwrap());
    let mut data_buffer = (*alloc)(max_transfer_length);
    if data_buffer.len() < max_transfer_length {
        unit.set_dispatcher_error(crate::error::ERROR_INVALID_PARAMETER);
        unit.shutdown();
        return unit.dispatcher_error();
    }

    // Each worker spawns at most one sibling, so workers come up without
    // funneling through the creator.
    let mut sibling: Option<JoinHandle<u32>> = None;
    let spawn = unit
        .pending_spawns
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            (count > 1).then(|| count - 1)
        })
        .is_ok();
    if spawn {
        let sibling_unit = Arc::clone(&unit);
        match thread::Builder::new()
            .name("stgunit_disp".to_string())
            .spawn(move || dispatcher_thread(sibling_unit, false))
        {
            Ok(handle) => sibling = Some(handle),
            Err(err) => {
                let error = Error::Io(err).code();
                unit.set_dispatcher_error(error);
                unit.shutdown();
            }
        }
    }

    let mut response: Option<TransactRsp> = None;
    let error = loop {
        let mut request = TransactReq::default();
        if let Err(err) =
            unit.handle
                .transact(unit.btl, response.as_ref(), Some(&mut request), &mut data_buffer)
        {
            break err.code();
        }

        if request.hint == 0 {
            response = None;
            continue;
        }

        unit.debug_log_request(&request);

        let mut rsp = TransactRsp {
            hint: request.hint,
            kind: request.kind,
            ..Default::default()
        };
        OPERATION_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = Some(OperationContext {
                request,
                response: rsp,
            })
        });

        let complete = match request.kind {
            TRANSACT_KIND_READ => {
                let length = request.block_count as usize * unit.params.block_length as usize;
                unit.interface.read(
                    &unit,
                    &mut data_buffer[..length],
                    request.block_address,
                    request.block_count,
                    request.force_unit_access(),
                    &mut rsp.status,
                )
            }
            TRANSACT_KIND_WRITE => {
                let length = request.block_count as usize * unit.params.block_length as usize;
                unit.interface.write(
                    &unit,
                    &data_buffer[..length],
                    request.block_address,
                    request.block_count,
                    request.force_unit_access(),
                    &mut rsp.status,
                )
            }
            TRANSACT_KIND_FLUSH => unit.interface.flush(
                &unit,
                request.block_address,
                request.block_count,
                &mut rsp.status,
            ),
            TRANSACT_KIND_UNMAP => {
                let descriptors = read_unmap_descriptors(
                    &data_buffer,
                    request.block_count as usize,
                );
                unit.interface.unmap(&unit, &descriptors, &mut rsp.status)
            }
            _ => unsupported(&mut rsp.status),
        };

        OPERATION_CONTEXT.with(|ctx| *ctx.borrow_mut() = None);

        if complete {
            unit.debug_log_response(&rsp);
            response = Some(rsp);
        } else {
            response = None;
        }
    };

    unit.set_dispatcher_error(error);
    unit.shutdown();

    if let Some(sibling) = sibling {
        let _ = sibling.join();
    }

    // The host never sees the unit disappear gracefully, so the root
    // worker flushes once on its behalf before going away.
    if is_root && unit.params.cache_supported() && unit.interface.supports_flush() {
        let mut status = StorageUnitStatus::default();
        unit.interface.flush(&unit, 0, 0, &mut status);
    }

    error
}

fn read_unmap_descriptors(buffer: &[u8], count: usize) -> Vec<UnmapDescriptor> {
    let descriptor_size = std::mem::size_of::<UnmapDescriptor>();
    let count = count.min(buffer.len() / descriptor_size);
    (0..count)
        .map(|index| {
            UnmapDescriptor::read_from(&buffer[index * descriptor_size..][..descriptor_size])
                .expect("descriptor size mismatch")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmap_descriptor_parsing() {
        let descriptors = [
            UnmapDescriptor {
                block_address: 7,
                block_count: 3,
                reserved: 0,
            },
            UnmapDescriptor {
                block_address: 11,
                block_count: 1,
                reserved: 0,
            },
        ];
        let mut buffer = Vec::new();
        for descriptor in &descriptors {
            buffer.extend_from_slice(zerocopy::AsBytes::as_bytes(descriptor));
        }
        assert_eq!(read_unmap_descriptors(&buffer, 2), descriptors.to_vec());
        // Counts beyond the buffer are clamped.
        assert_eq!(read_unmap_descriptors(&buffer, 5).len(), 2);
    }

    #[test]
    fn operation_context_outside_callback_is_none() {
        assert!(operation_context().is_none());
    }

    #[test]
    fn dispatcher_error_first_writer_wins() {
        let hba = hba::Hba::new(16);
        let params = StorageUnitParams {
            guid: [9; 16],
            block_count: 16,
            block_length: 512,
            max_transfer_length: 512,
            ..Default::default()
        };
        struct Null;
        impl StorageUnitInterface for Null {}
        let unit = StorageUnit::create_on(&hba, &params, Arc::new(Null)).unwrap();
        assert_eq!(unit.dispatcher_error(), 0);
        unit.set_dispatcher_error(0);
        assert_eq!(unit.dispatcher_error(), 0);
        unit.set_dispatcher_error(crate::error::ERROR_CANCELLED);
        unit.set_dispatcher_error(crate::error::ERROR_IO);
        assert_eq!(unit.dispatcher_error(), crate::error::ERROR_CANCELLED);
    }
}
