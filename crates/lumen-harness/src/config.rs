//! Harness configuration

use std::env;

use lumen_backends::INTERPRETER_PLATFORM_NAME;
use lumen_ir::DialectSet;

/// Environment variable naming the platform tests run on.
pub const PLATFORM_ENV_VAR: &str = "LUMEN_TEST_PLATFORM";

/// Which platform a harness binds to and which dialects its text parser loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub platform_name: String,
    /// Dialects registered when parsing textual modules.
    pub dialects: DialectSet,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            platform_name: INTERPRETER_PLATFORM_NAME.to_string(),
            dialects: DialectSet::gpu_lowering(),
        }
    }
}

impl HarnessConfig {
    /// Defaults, with the platform taken from `LUMEN_TEST_PLATFORM` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        match env::var(PLATFORM_ENV_VAR) {
            Ok(name) if !name.trim().is_empty() => config.platform_name = name.trim().to_string(),
            _ => {}
        }
        config
    }

    #[must_use]
    pub fn with_platform(mut self, platform_name: impl Into<String>) -> Self {
        self.platform_name = platform_name.into();
        self
    }

    #[must_use]
    pub fn with_dialects(mut self, dialects: DialectSet) -> Self {
        self.dialects = dialects;
        self
    }
}
