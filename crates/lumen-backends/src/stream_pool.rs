//! Reusable streams per device

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::executor::StreamExecutor;
use crate::stream::Stream;

/// Pool of idle streams for one device.
///
/// Streams are created on demand and returned on guard drop. A stream that
/// has failed is discarded instead of returned.
pub struct StreamPool {
    executor: Arc<dyn StreamExecutor>,
    streams: Mutex<Vec<Stream>>,
}

impl StreamPool {
    pub fn new(executor: Arc<dyn StreamExecutor>) -> Self {
        Self {
            executor,
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Borrow an idle stream, creating one if none is available.
    pub fn borrow_stream(&self) -> Result<PooledStream<'_>> {
        let reused = self.streams.lock().pop();
        let stream = match reused {
            Some(stream) => stream,
            None => Stream::new(Arc::clone(&self.executor))?,
        };
        tracing::trace!(stream = stream.id(), device_ordinal = self.executor.ordinal(), "stream_borrowed");
        Ok(PooledStream {
            pool: self,
            stream: Some(stream),
        })
    }

    /// Number of idle streams.
    pub fn idle_streams(&self) -> usize {
        self.streams.lock().len()
    }
}

/// Stream on loan from a [`StreamPool`].
pub struct PooledStream<'a> {
    pool: &'a StreamPool,
    stream: Option<Stream>,
}

impl Deref for PooledStream<'_> {
    type Target = Stream;

    fn deref(&self) -> &Stream {
        // Only `drop` takes the stream out.
        self.stream.as_ref().unwrap_or_else(|| unreachable!("pooled stream used after return"))
    }
}

impl Drop for PooledStream<'_> {
    fn drop(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if stream.ok() {
            self.pool.streams.lock().push(stream);
        } else {
            tracing::debug!(stream = stream.id(), "discarding_failed_stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::interpreter::InterpreterPlatform;
    use crate::memory::DeviceMemoryBase;
    use crate::platform::Platform;

    fn pool() -> StreamPool {
        StreamPool::new(InterpreterPlatform::new().executor(0).unwrap())
    }

    #[test]
    fn test_streams_are_reused() {
        let pool = pool();
        let first = pool.borrow_stream().unwrap().id();
        assert_eq!(pool.idle_streams(), 1);
        let second = pool.borrow_stream().unwrap().id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_borrows_get_distinct_streams() {
        let pool = pool();
        let a = pool.borrow_stream().unwrap();
        let b = pool.borrow_stream().unwrap();
        assert_ne!(a.id(), b.id());
        drop(a);
        drop(b);
        assert_eq!(pool.idle_streams(), 2);
    }

    #[test]
    fn test_failed_stream_is_discarded() {
        let pool = pool();
        {
            let stream = pool.borrow_stream().unwrap();
            stream.then_memset(DeviceMemoryBase::new(0x42, 1), 0);
            assert!(stream.block_host_until_done().is_err());
        }
        assert_eq!(pool.idle_streams(), 0);
    }
}
