//! Invocation phases and the fatal failure channel
//!
//! Every harness call walks the same phases in order:
//!
//! ```text
//! Uncompiled → Compiling → Compiled → InputsBound → Launched → Drained → ResultsExtracted
//! ```
//!
//! Compilation failures are returned to the caller. Everything else that can
//! go wrong (no platform, malformed text, allocation, launch or stream
//! failures) means the fixture or the device is broken, and goes through
//! [`check_ok`], which panics.

use std::fmt;

/// Where an invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvocationPhase {
    Uncompiled,
    Compiling,
    Compiled,
    InputsBound,
    Launched,
    Drained,
    ResultsExtracted,
}

impl InvocationPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            InvocationPhase::Uncompiled => "uncompiled",
            InvocationPhase::Compiling => "compiling",
            InvocationPhase::Compiled => "compiled",
            InvocationPhase::InputsBound => "inputs_bound",
            InvocationPhase::Launched => "launched",
            InvocationPhase::Drained => "drained",
            InvocationPhase::ResultsExtracted => "results_extracted",
        }
    }
}

impl fmt::Display for InvocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unwrap `result` or panic naming `context` and the error.
///
/// # Panics
///
/// When `result` is an error.
#[track_caller]
pub fn check_ok<T, E: fmt::Display>(result: Result<T, E>, context: impl fmt::Display) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(%context, %error, "fatal harness failure");
            panic!("{context}: {error}");
        }
    }
}

/// Phase tracker for one call.
#[derive(Debug)]
pub(crate) struct Invocation {
    phase: InvocationPhase,
}

impl Invocation {
    pub(crate) fn new() -> Self {
        Self {
            phase: InvocationPhase::Uncompiled,
        }
    }

    pub(crate) fn phase(&self) -> InvocationPhase {
        self.phase
    }

    pub(crate) fn enter(&mut self, next: InvocationPhase) {
        debug_assert!(next > self.phase, "phase {} cannot follow {}", next, self.phase);
        tracing::debug!(from = %self.phase, to = %next, "invocation_phase");
        self.phase = next;
    }

    /// [`check_ok`] with the current phase as context.
    #[track_caller]
    pub(crate) fn check<T, E: fmt::Display>(&self, result: Result<T, E>) -> T {
        check_ok(result, self.phase)
    }
}
