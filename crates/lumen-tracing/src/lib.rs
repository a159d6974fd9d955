//! Shared tracing configuration for the lumen workspace.
//!
//! Every binary, bench and integration test in the workspace installs its
//! `tracing` subscriber through this crate so that filters, output format and
//! span events look the same no matter which crate emitted them.
//!
//! ## Example
//!
//! ```rust
//! use lumen_tracing::{build_subscriber, TracingConfig};
//!
//! let config = TracingConfig::for_ci();
//! let subscriber = build_subscriber(&config).expect("valid default filter");
//! # drop(subscriber);
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::sync::Once;

pub use tracing::{debug, error, info, trace, warn};

#[doc(hidden)]
pub mod __private {
    pub use tracing::{debug, debug_span};
}

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Environment variable selecting a preset (`local`, `ci`, `test`).
pub const PROFILE_ENV: &str = "LUMEN_TRACING_PROFILE";
/// Environment variable overriding the filter directives.
pub const DIRECTIVES_ENV: &str = "LUMEN_TRACING_DIRECTIVES";
/// Environment variable selecting the output format (`pretty`, `compact`, `json`).
pub const FORMAT_ENV: &str = "LUMEN_TRACING_FORMAT";

/// Configuration describing how the shared tracing subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional filter directives (e.g. `lumen_compiler=debug,info`). When
    /// absent, `RUST_LOG` is consulted and then [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Directive used when neither `directives` nor `RUST_LOG` resolve.
    pub default_directive: String,
    /// Whether event targets (module paths) appear in output.
    pub include_targets: bool,
    /// ANSI colouring. Always off for JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
    /// Route output through the libtest capture writer.
    pub test_writer: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for local development.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            test_writer: false,
        }
    }

    /// Machine-readable JSON without colour codes.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Compact output captured by the test harness, quiet unless asked.
    pub fn for_tests() -> Self {
        Self {
            default_directive: "warn".to_string(),
            ansi: false,
            output: TracingOutput::Compact,
            test_writer: true,
            ..Self::for_local()
        }
    }

    /// Build a configuration from the `LUMEN_TRACING_*` environment variables.
    ///
    /// The profile preset is applied first, then individual overrides.
    pub fn from_env() -> Self {
        let profile = env::var(PROFILE_ENV)
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "test" | "tests" => Self::for_tests(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var(DIRECTIVES_ENV) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Some(output) = env::var(FORMAT_ENV).ok().and_then(|v| TracingOutput::from_env_value(&v)) {
            if output == TracingOutput::Json {
                config.ansi = false;
            }
            config.output = output;
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Output format choices for the formatter layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors surfaced while configuring the shared subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),

    /// A global subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber from the configuration without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(fmt_layer(config)).with(filter))
}

fn fmt_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone());

    match (config.output, config.test_writer) {
        (TracingOutput::Compact, false) => Box::new(base.compact().with_ansi(config.ansi)),
        (TracingOutput::Compact, true) => Box::new(base.compact().with_ansi(config.ansi).with_test_writer()),
        (TracingOutput::Pretty, false) => Box::new(base.pretty().with_ansi(config.ansi)),
        (TracingOutput::Pretty, true) => Box::new(base.pretty().with_ansi(config.ansi).with_test_writer()),
        (TracingOutput::Json, false) => Box::new(base.json().with_ansi(false)),
        (TracingOutput::Json, true) => Box::new(base.json().with_ansi(false).with_test_writer()),
    }
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Install the test preset once per process.
///
/// Integration tests call this at the top of every test; the first call wins
/// and later calls (or a subscriber installed elsewhere) are ignored.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let mut config = TracingConfig::for_tests();
        if let Ok(directives) = env::var(DIRECTIVES_ENV) {
            config.directives = Some(directives);
        }
        let _ = init_global_tracing(&config);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialises tests that touch process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn reset_env() {
        for key in [PROFILE_ENV, DIRECTIVES_ENV, FORMAT_ENV] {
            env::remove_var(key);
        }
    }

    #[test]
    fn rejects_invalid_directive() {
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(build_subscriber(&config), Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    fn builds_every_output_format() {
        for output in [TracingOutput::Compact, TracingOutput::Pretty, TracingOutput::Json] {
            for test_writer in [false, true] {
                let config = TracingConfig {
                    directives: Some("info".to_string()),
                    output,
                    test_writer,
                    ..TracingConfig::default()
                };
                assert!(build_subscriber(&config).is_ok());
            }
        }
    }

    #[test]
    fn from_env_applies_profile_then_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();

        env::set_var(PROFILE_ENV, "ci");
        env::set_var(FORMAT_ENV, "compact");
        env::set_var(DIRECTIVES_ENV, "lumen_compiler=debug");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("lumen_compiler=debug"));
        assert_eq!(config.output, TracingOutput::Compact);
        assert!(!config.ansi);

        reset_env();
    }

    #[test]
    fn json_format_disables_ansi() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();

        env::set_var(FORMAT_ENV, "JSON");
        let config = TracingConfig::from_env();
        assert_eq!(config.output, TracingOutput::Json);
        assert!(!config.ansi);

        reset_env();
    }

    #[test]
    fn test_preset_uses_capture_writer() {
        let config = TracingConfig::for_tests();
        assert!(config.test_writer);
        assert_eq!(config.default_directive, "warn");
    }
}
