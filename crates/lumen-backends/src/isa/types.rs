//! Core types for the kernel ISA
//!
//! This module defines the fundamental types used throughout the ISA:
//! - Registers
//! - Data types
//! - Kernel parameter addressing
//! - Condition codes

use std::fmt;

// ================================================================================================
// Register Types
// ================================================================================================

/// Register identifier (0-255)
///
/// Registers are per-lane and untyped at rest; every instruction names the
/// type it reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Register(pub u8);

impl Register {
    /// Create a new register
    pub const fn new(index: u8) -> Self {
        Register(index)
    }

    /// Get register index
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// ================================================================================================
// Data Types
// ================================================================================================

/// Type of data operated on by instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Type {
    /// Boolean, one byte in memory (0 or 1)
    PRED,

    // Signed integers
    I8,
    I16,
    I32,
    I64,

    // Unsigned integers
    U8,
    U16,
    U32,
    U64,

    // Floating point
    F16,  // IEEE 754 half precision
    BF16, // Brain floating point 16
    F32,  // IEEE 754 single precision
    F64,  // IEEE 754 double precision
}

impl Type {
    /// Size of this type in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            Type::PRED | Type::I8 | Type::U8 => 1,
            Type::I16 | Type::U16 | Type::F16 | Type::BF16 => 2,
            Type::I32 | Type::U32 | Type::F32 => 4,
            Type::I64 | Type::U64 | Type::F64 => 8,
        }
    }

    /// Is this an integer type?
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::U8 | Type::U16 | Type::U32 | Type::U64
        )
    }

    /// Is this a floating-point type?
    pub const fn is_float(self) -> bool {
        matches!(self, Type::F16 | Type::BF16 | Type::F32 | Type::F64)
    }

    /// Is this a signed integer type?
    pub const fn is_signed_integer(self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    /// Is this an unsigned integer type?
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Type::U8 | Type::U16 | Type::U32 | Type::U64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::PRED => write!(f, "pred"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::U8 => write!(f, "u8"),
            Type::U16 => write!(f, "u16"),
            Type::U32 => write!(f, "u32"),
            Type::U64 => write!(f, "u64"),
            Type::F16 => write!(f, "f16"),
            Type::BF16 => write!(f, "bf16"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
        }
    }
}

// ================================================================================================
// Addressing
// ================================================================================================

/// Memory operand of LDG/STG, relative to a kernel parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Address {
    /// Element at the lane's global index
    Lane { param: u16 },
    /// Element 0, read by every lane (rank-0 operands)
    Broadcast { param: u16 },
}

impl Address {
    pub const fn param(self) -> u16 {
        match self {
            Address::Lane { param } | Address::Broadcast { param } => param,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Lane { param } => write!(f, "param{param}[lane]"),
            Address::Broadcast { param } => write!(f, "param{param}[0]"),
        }
    }
}

// ================================================================================================
// Condition Codes
// ================================================================================================

/// Condition code for comparisons
///
/// Used by the SETcc instruction. Signedness comes from the instruction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Condition {
    EQ, // Equal
    NE, // Not equal
    LT, // Less than
    LE, // Less than or equal
    GT, // Greater than
    GE, // Greater than or equal
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::EQ => write!(f, "eq"),
            Condition::NE => write!(f, "ne"),
            Condition::LT => write!(f, "lt"),
            Condition::LE => write!(f, "le"),
            Condition::GT => write!(f, "gt"),
            Condition::GE => write!(f, "ge"),
        }
    }
}
