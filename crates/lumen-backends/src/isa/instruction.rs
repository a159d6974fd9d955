//! Kernel ISA instruction set
//!
//! - Data movement (LDG, STG, MOV, MOV_IMM, CVT)
//! - Arithmetic (ADD, SUB, MUL, DIV, MIN, MAX, ABS, NEG)
//! - Logic (AND, OR, XOR, NOT, SETcc, SEL)

use super::types::{Address, Condition, Register, Type};
use std::fmt;

/// One instruction, executed independently by every lane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[allow(non_camel_case_types)]
pub enum Instruction {
    // ============================================================================================
    // Data Movement
    // ============================================================================================
    /// Load from a parameter buffer to register
    LDG { ty: Type, dst: Register, addr: Address },

    /// Store from register to a parameter buffer
    STG { ty: Type, src: Register, addr: Address },

    /// Move value from one register to another
    MOV { ty: Type, dst: Register, src: Register },

    /// Move immediate value to register
    ///
    /// The value is the bit pattern of `ty`, zero-extended to 64 bits.
    MOV_IMM { ty: Type, dst: Register, value: u64 },

    /// Convert between types
    CVT {
        src_ty: Type,
        dst_ty: Type,
        dst: Register,
        src: Register,
    },

    // ============================================================================================
    // Arithmetic
    // ============================================================================================
    /// Addition: dst = src1 + src2
    ADD {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Subtraction: dst = src1 - src2
    SUB {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Multiplication: dst = src1 * src2
    MUL {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Division: dst = src1 / src2
    DIV {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Minimum: dst = min(src1, src2)
    MIN {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Maximum: dst = max(src1, src2)
    MAX {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Absolute value: dst = |src|
    ABS { ty: Type, dst: Register, src: Register },

    /// Negation: dst = -src
    NEG { ty: Type, dst: Register, src: Register },

    // ============================================================================================
    // Logic
    // ============================================================================================
    /// Bitwise AND (logical for PRED)
    AND {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Bitwise OR (logical for PRED)
    OR {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Bitwise XOR (logical for PRED)
    XOR {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Bitwise NOT (logical for PRED)
    NOT { ty: Type, dst: Register, src: Register },

    /// Compare and set: dst (PRED) = src1 cond src2
    SETcc {
        ty: Type,
        cond: Condition,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// Select: dst = pred ? src_true : src_false
    SEL {
        ty: Type,
        dst: Register,
        pred: Register,
        src_true: Register,
        src_false: Register,
    },
}

impl Instruction {
    /// Registers written by this instruction.
    pub fn destination(&self) -> Option<Register> {
        match self {
            Instruction::STG { .. } => None,
            Instruction::LDG { dst, .. }
            | Instruction::MOV { dst, .. }
            | Instruction::MOV_IMM { dst, .. }
            | Instruction::CVT { dst, .. }
            | Instruction::ADD { dst, .. }
            | Instruction::SUB { dst, .. }
            | Instruction::MUL { dst, .. }
            | Instruction::DIV { dst, .. }
            | Instruction::MIN { dst, .. }
            | Instruction::MAX { dst, .. }
            | Instruction::ABS { dst, .. }
            | Instruction::NEG { dst, .. }
            | Instruction::AND { dst, .. }
            | Instruction::OR { dst, .. }
            | Instruction::XOR { dst, .. }
            | Instruction::NOT { dst, .. }
            | Instruction::SETcc { dst, .. }
            | Instruction::SEL { dst, .. } => Some(*dst),
        }
    }

    /// Parameter buffer touched by a memory instruction.
    pub fn address(&self) -> Option<Address> {
        match self {
            Instruction::LDG { addr, .. } | Instruction::STG { addr, .. } => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LDG { ty, dst, addr } => write!(f, "ldg.{ty} {dst}, {addr}"),
            Instruction::STG { ty, src, addr } => write!(f, "stg.{ty} {addr}, {src}"),
            Instruction::MOV { ty, dst, src } => write!(f, "mov.{ty} {dst}, {src}"),
            Instruction::MOV_IMM { ty, dst, value } => write!(f, "mov.{ty} {dst}, {value:#x}"),
            Instruction::CVT {
                src_ty,
                dst_ty,
                dst,
                src,
            } => write!(f, "cvt.{dst_ty}.{src_ty} {dst}, {src}"),
            Instruction::ADD { ty, dst, src1, src2 } => write!(f, "add.{ty} {dst}, {src1}, {src2}"),
            Instruction::SUB { ty, dst, src1, src2 } => write!(f, "sub.{ty} {dst}, {src1}, {src2}"),
            Instruction::MUL { ty, dst, src1, src2 } => write!(f, "mul.{ty} {dst}, {src1}, {src2}"),
            Instruction::DIV { ty, dst, src1, src2 } => write!(f, "div.{ty} {dst}, {src1}, {src2}"),
            Instruction::MIN { ty, dst, src1, src2 } => write!(f, "min.{ty} {dst}, {src1}, {src2}"),
            Instruction::MAX { ty, dst, src1, src2 } => write!(f, "max.{ty} {dst}, {src1}, {src2}"),
            Instruction::ABS { ty, dst, src } => write!(f, "abs.{ty} {dst}, {src}"),
            Instruction::NEG { ty, dst, src } => write!(f, "neg.{ty} {dst}, {src}"),
            Instruction::AND { ty, dst, src1, src2 } => write!(f, "and.{ty} {dst}, {src1}, {src2}"),
            Instruction::OR { ty, dst, src1, src2 } => write!(f, "or.{ty} {dst}, {src1}, {src2}"),
            Instruction::XOR { ty, dst, src1, src2 } => write!(f, "xor.{ty} {dst}, {src1}, {src2}"),
            Instruction::NOT { ty, dst, src } => write!(f, "not.{ty} {dst}, {src}"),
            Instruction::SETcc {
                ty,
                cond,
                dst,
                src1,
                src2,
            } => write!(f, "set.{cond}.{ty} {dst}, {src1}, {src2}"),
            Instruction::SEL {
                ty,
                dst,
                pred,
                src_true,
                src_false,
            } => write!(f, "sel.{ty} {dst}, {pred}, {src_true}, {src_false}"),
        }
    }
}
