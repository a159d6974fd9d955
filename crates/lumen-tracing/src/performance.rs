//! Performance-focused tracing utilities
//!
//! Timing guards and standard event shapes for the hot paths of the
//! workspace: host/device transfers, kernel launches and compilation.
//!
//! ## Example
//!
//! ```rust
//! use lumen_tracing::performance::{record_transfer, PerformanceSpan, TransferDirection};
//!
//! let span = PerformanceSpan::new("compile_module", Some(100));
//! // ... do work ...
//! drop(span); // logged only when it took at least 100μs
//!
//! record_transfer(4096, TransferDirection::HostToDevice, 250);
//! ```

use std::fmt;
use std::time::Instant;
use tracing::Level;

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// When a threshold is set, durations below it are not logged.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a debug-level span with an optional threshold in microseconds.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Create a span at the given level.
    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Name the span was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.map_or(true, |threshold| elapsed_us >= threshold) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Direction of a memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::HostToDevice => write!(f, "H2D"),
            TransferDirection::DeviceToHost => write!(f, "D2H"),
            TransferDirection::DeviceToDevice => write!(f, "D2D"),
        }
    }
}

/// Bandwidth in MiB/s for `bytes` moved in `duration_us`.
pub fn bandwidth_mibps(bytes: usize, duration_us: u64) -> f64 {
    if duration_us == 0 {
        return 0.0;
    }
    (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
}

/// Record a memory transfer with its bandwidth.
pub fn record_transfer(bytes: usize, direction: TransferDirection, duration_us: u64) {
    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        direction = %direction,
        duration_us = duration_us,
        bandwidth_mibps = bandwidth_mibps(bytes, duration_us),
        "data_transfer"
    );
}

/// Record a kernel launch: how many lanes ran how many instructions.
pub fn record_kernel_launch(kernel: &str, lanes: u64, instruction_count: usize, duration_us: u64) {
    let lanes_per_sec = if duration_us > 0 {
        lanes as f64 / duration_us as f64 * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "kernel_launch",
        kernel = kernel,
        lanes = lanes,
        instruction_count = instruction_count,
        duration_us = duration_us,
        lanes_per_sec = lanes_per_sec,
        "kernel_execution"
    );
}
