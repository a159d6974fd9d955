//! Ordered command streams
//!
//! A [`Stream`] owns a worker thread that executes enqueued commands one at a
//! time, in submission order, against its parent [`StreamExecutor`]. The
//! `then_*` methods return immediately; [`Stream::block_host_until_done`]
//! waits for the queue to drain.
//!
//! Errors are sticky: once a command fails, every later command is skipped and
//! the failure is reported by each subsequent `block_host_until_done`.
//!
//! ## Example
//!
//! ```rust
//! use lumen_backends::{InterpreterPlatform, Platform, Stream};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = InterpreterPlatform::new().executor(0)?;
//! let stream = Stream::new(executor.clone())?;
//!
//! let buffer = executor.allocate(4)?;
//! stream.then_memcpy_host_to_device(buffer, &[1, 2, 3, 4]);
//! let pending = stream.then_memcpy_device_to_host(buffer);
//! stream.block_host_until_done()?;
//! assert_eq!(pending.take()?, vec![1, 2, 3, 4]);
//! executor.deallocate(buffer)?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use lumen_tracing::performance::{record_transfer, TransferDirection};
use parking_lot::{Condvar, Mutex};

use crate::error::{BackendError, Result};
use crate::executor::{GemmConfig, StreamExecutor};
use crate::isa::KernelFunction;
use crate::launch::LaunchConfig;
use crate::memory::DeviceMemoryBase;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

type HostSlot = Arc<Mutex<Option<Vec<u8>>>>;

enum StreamCommand {
    HostToDevice {
        dst: DeviceMemoryBase,
        data: Vec<u8>,
    },
    DeviceToHost {
        src: DeviceMemoryBase,
        slot: HostSlot,
    },
    DeviceToDevice {
        dst: DeviceMemoryBase,
        src: DeviceMemoryBase,
        size: usize,
    },
    Memset {
        dst: DeviceMemoryBase,
        value: u8,
    },
    Launch {
        kernel: Arc<KernelFunction>,
        config: LaunchConfig,
        args: Vec<DeviceMemoryBase>,
    },
    Gemm {
        config: GemmConfig,
        lhs: DeviceMemoryBase,
        rhs: DeviceMemoryBase,
        out: DeviceMemoryBase,
    },
}

impl StreamCommand {
    fn execute(self, executor: &dyn StreamExecutor) -> Result<()> {
        match self {
            StreamCommand::HostToDevice { dst, data } => {
                let start = Instant::now();
                executor.memcpy_host_to_device(dst, &data)?;
                record_transfer(
                    data.len(),
                    TransferDirection::HostToDevice,
                    start.elapsed().as_micros() as u64,
                );
                Ok(())
            }
            StreamCommand::DeviceToHost { src, slot } => {
                let start = Instant::now();
                let mut host = vec![0u8; src.size()];
                executor.memcpy_device_to_host(&mut host, src)?;
                record_transfer(
                    host.len(),
                    TransferDirection::DeviceToHost,
                    start.elapsed().as_micros() as u64,
                );
                *slot.lock() = Some(host);
                Ok(())
            }
            StreamCommand::DeviceToDevice { dst, src, size } => {
                let start = Instant::now();
                executor.memcpy_device_to_device(dst, src, size)?;
                record_transfer(
                    size,
                    TransferDirection::DeviceToDevice,
                    start.elapsed().as_micros() as u64,
                );
                Ok(())
            }
            StreamCommand::Memset { dst, value } => executor.memset(dst, value),
            StreamCommand::Launch { kernel, config, args } => executor.launch_kernel(&kernel, &config, &args),
            StreamCommand::Gemm { config, lhs, rhs, out } => executor.gemm(&config, lhs, rhs, out),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            StreamCommand::HostToDevice { .. } => "memcpy_h2d",
            StreamCommand::DeviceToHost { .. } => "memcpy_d2h",
            StreamCommand::DeviceToDevice { .. } => "memcpy_d2d",
            StreamCommand::Memset { .. } => "memset",
            StreamCommand::Launch { .. } => "launch",
            StreamCommand::Gemm { .. } => "gemm",
        }
    }
}

#[derive(Default)]
struct StreamState {
    queue: VecDeque<StreamCommand>,
    in_flight: bool,
    error: Option<BackendError>,
    shutdown: bool,
}

#[derive(Default)]
struct StreamShared {
    state: Mutex<StreamState>,
    work_ready: Condvar,
    idle: Condvar,
}

/// Result slot of a device-to-host copy.
///
/// Holds the bytes once the stream has executed the copy.
#[derive(Debug, Clone)]
pub struct PendingHostBuffer {
    slot: HostSlot,
}

impl PendingHostBuffer {
    /// Take the copied bytes.
    ///
    /// # Errors
    ///
    /// [`BackendError::TransferIncomplete`] if the copy has not run (or was
    /// skipped after an earlier failure), or the bytes were already taken.
    pub fn take(&self) -> Result<Vec<u8>> {
        self.slot.lock().take().ok_or(BackendError::TransferIncomplete)
    }
}

/// In-order command queue bound to one device.
pub struct Stream {
    id: u64,
    executor: Arc<dyn StreamExecutor>,
    shared: Arc<StreamShared>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    /// Create a stream on `executor` and start its worker thread.
    ///
    /// # Errors
    ///
    /// [`BackendError::StreamCreation`] if the worker thread cannot be spawned.
    pub fn new(executor: Arc<dyn StreamExecutor>) -> Result<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(StreamShared::default());

        let worker = std::thread::Builder::new()
            .name(format!("lumen-stream-{id}"))
            .spawn({
                let shared = Arc::clone(&shared);
                let executor = Arc::clone(&executor);
                move || worker_loop(&shared, executor.as_ref())
            })
            .map_err(|e| BackendError::StreamCreation(e.to_string()))?;

        tracing::debug!(
            stream = id,
            platform = executor.platform_name(),
            device_ordinal = executor.ordinal(),
            "stream_created"
        );

        Ok(Self {
            id,
            executor,
            shared,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Executor this stream runs on.
    pub fn parent(&self) -> &Arc<dyn StreamExecutor> {
        &self.executor
    }

    /// `false` once any command has failed.
    pub fn ok(&self) -> bool {
        self.shared.state.lock().error.is_none()
    }

    fn enqueue(&self, command: StreamCommand) -> &Self {
        let mut state = self.shared.state.lock();
        tracing::trace!(stream = self.id, command = command.name(), depth = state.queue.len(), "enqueue");
        state.queue.push_back(command);
        self.shared.work_ready.notify_one();
        self
    }

    /// Copy `data` into `dst`. The bytes are captured at enqueue time.
    pub fn then_memcpy_host_to_device(&self, dst: DeviceMemoryBase, data: &[u8]) -> &Self {
        self.enqueue(StreamCommand::HostToDevice {
            dst,
            data: data.to_vec(),
        })
    }

    /// Copy all of `src` to the host.
    pub fn then_memcpy_device_to_host(&self, src: DeviceMemoryBase) -> PendingHostBuffer {
        let slot = HostSlot::default();
        self.enqueue(StreamCommand::DeviceToHost {
            src,
            slot: Arc::clone(&slot),
        });
        PendingHostBuffer { slot }
    }

    pub fn then_memcpy_device_to_device(&self, dst: DeviceMemoryBase, src: DeviceMemoryBase, size: usize) -> &Self {
        self.enqueue(StreamCommand::DeviceToDevice { dst, src, size })
    }

    pub fn then_memset(&self, dst: DeviceMemoryBase, value: u8) -> &Self {
        self.enqueue(StreamCommand::Memset { dst, value })
    }

    pub fn then_launch(&self, kernel: Arc<KernelFunction>, config: LaunchConfig, args: Vec<DeviceMemoryBase>) -> &Self {
        self.enqueue(StreamCommand::Launch { kernel, config, args })
    }

    pub fn then_gemm(
        &self,
        config: GemmConfig,
        lhs: DeviceMemoryBase,
        rhs: DeviceMemoryBase,
        out: DeviceMemoryBase,
    ) -> &Self {
        self.enqueue(StreamCommand::Gemm { config, lhs, rhs, out })
    }

    /// Wait until every enqueued command has run.
    ///
    /// # Errors
    ///
    /// [`BackendError::StreamFailed`] wrapping the first command failure.
    pub fn block_host_until_done(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() || state.in_flight {
            self.shared.idle.wait(&mut state);
        }
        match &state.error {
            Some(e) => Err(BackendError::StreamFailed(Box::new(e.clone()))),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("device_ordinal", &self.executor.ordinal())
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(stream = self.id, "stream_worker_panicked");
            }
        }
    }
}

fn worker_loop(shared: &StreamShared, executor: &dyn StreamExecutor) {
    loop {
        let (command, skip) = {
            let mut state = shared.state.lock();
            loop {
                if let Some(command) = state.queue.pop_front() {
                    state.in_flight = true;
                    break (command, state.error.is_some());
                }
                if state.shutdown {
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let result = if skip {
            tracing::debug!(command = command.name(), "command_skipped_after_failure");
            Ok(())
        } else {
            command.execute(executor)
        };

        let mut state = shared.state.lock();
        state.in_flight = false;
        if let Err(e) = result {
            tracing::debug!(error = %e, "stream_command_failed");
            state.error.get_or_insert(e);
        }
        if state.queue.is_empty() {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::interpreter::InterpreterPlatform;
    use crate::platform::Platform;

    fn stream() -> Stream {
        let executor = InterpreterPlatform::new().executor(0).unwrap();
        Stream::new(executor).unwrap()
    }

    #[test]
    fn test_commands_run_in_order() {
        let stream = stream();
        let executor = Arc::clone(stream.parent());
        let a = executor.allocate(4).unwrap();
        let b = executor.allocate(4).unwrap();

        stream
            .then_memcpy_host_to_device(a, &[9, 8, 7, 6])
            .then_memset(b, 0xAA)
            .then_memcpy_device_to_device(b, a, 2);
        let pending = stream.then_memcpy_device_to_host(b);
        stream.block_host_until_done().unwrap();

        assert_eq!(pending.take().unwrap(), vec![9, 8, 0xAA, 0xAA]);
        assert!(matches!(pending.take(), Err(BackendError::TransferIncomplete)));
    }

    #[test]
    fn test_errors_are_sticky() {
        let stream = stream();
        let executor = Arc::clone(stream.parent());
        let good = executor.allocate(4).unwrap();

        stream.then_memset(DeviceMemoryBase::new(0xdead_0000, 4), 0);
        let pending = stream.then_memcpy_device_to_host(good);

        let err = stream.block_host_until_done().unwrap_err();
        assert!(matches!(err, BackendError::StreamFailed(_)));
        assert!(!stream.ok());
        assert!(matches!(pending.take(), Err(BackendError::TransferIncomplete)));

        // Still failed on the next wait, even with nothing queued.
        assert!(stream.block_host_until_done().is_err());
    }

    #[test]
    fn test_empty_stream_is_done() {
        let stream = stream();
        assert!(stream.block_host_until_done().is_ok());
        assert!(stream.ok());
    }

    #[test]
    fn test_drop_drains_queue() {
        let executor = InterpreterPlatform::new().executor(0).unwrap();
        let buffer = executor.allocate(2).unwrap();
        {
            let stream = Stream::new(Arc::clone(&executor)).unwrap();
            stream.then_memset(buffer, 3);
        }
        let mut host = [0u8; 2];
        executor.memcpy_device_to_host(&mut host, buffer).unwrap();
        assert_eq!(host, [3, 3]);
    }
}
