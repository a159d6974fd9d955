//! Convenience macros for performance tracing

/// Create a [`crate::performance::PerformanceSpan`], optionally with fields.
///
/// ```rust
/// use lumen_tracing::perf_span;
///
/// {
///     let _span = perf_span!("lower_fusion", ops = 3);
///     // ... work ...
/// } // logs the duration with the fields attached
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _fields = $crate::__private::debug_span!("perf", name = $name, $($field = $value),+).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Evaluate a block and return `(result, duration_us)`, logging the timing.
///
/// ```rust
/// use lumen_tracing::timed_block;
///
/// let (sum, _duration_us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::__private::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
