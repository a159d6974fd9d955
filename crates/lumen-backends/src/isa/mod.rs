//! Kernel ISA
//!
//! The instruction set that compiled kernels are expressed in and that the
//! interpreter platform executes.
//!
//! # Architecture
//!
//! - **Lane-parallel**: every instruction runs once per lane; lane `i` owns element `i`
//! - **Register-based**: 256 per-lane registers (0-255)
//! - **Typed operations**: all operations specify their type explicitly
//! - **Straight-line**: no control flow, selection goes through SETcc + SEL
//!
//! # Instruction Categories
//!
//! - **Data Movement**: LDG, STG, MOV, MOV_IMM, CVT
//! - **Arithmetic**: ADD, SUB, MUL, DIV, MIN, MAX, ABS, NEG
//! - **Logic**: AND, OR, XOR, NOT, SETcc, SEL

mod instruction;
mod kernel;
mod types;

pub use instruction::Instruction;
pub use kernel::{KernelError, KernelFunction, KernelParam, KernelResult};
pub use types::{Address, Condition, Register, Type};
