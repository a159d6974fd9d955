//! # lumen-harness
//!
//! Compile-and-run fixture for correctness tests of the GPU lowering
//! pipeline. A test hands the harness a module (parsed or textual) plus
//! input buffers and gets the produced buffers back, with nothing between
//! the compiler and the device mocked out.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      GpuTestHarness                        │
//! │  HarnessConfig ──► Backend (platform, compiler, allocator, │
//! │                    stream pools)                           │
//! └──────┬───────────────────┬──────────────────────┬──────────┘
//!        │ parse text        │ compile "main"       │ upload / run / download
//!        ▼                   ▼                      ▼
//!   lumen_ir::Context   Compiler (GpuCompiler)   Stream + Executable
//! ```
//!
//! # Usage
//!
//! ```rust
//! use lumen_harness::GpuTestHarness;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let harness = GpuTestHarness::new();
//! let outputs = harness.run_text_with_host_buffers(
//!     r#"func @main(%in: memref<4xi8> {lmhlo.params = 0 : index},
//!                   %out: memref<4xi8> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
//!          "lmhlo.copy"(%in, %out) : (memref<4xi8>, memref<4xi8>) -> ()
//!          "lmhlo.terminator"() : () -> ()
//!        }"#,
//!     &[&[1, 2, 3, 4]],
//! )?;
//! assert_eq!(outputs, vec![vec![1, 2, 3, 4]]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod harness;
pub mod phase;

pub use config::{HarnessConfig, PLATFORM_ENV_VAR};
pub use harness::{GpuTestHarness, ENTRY_POINT, MODULE_NAME};
pub use phase::{check_ok, InvocationPhase};
