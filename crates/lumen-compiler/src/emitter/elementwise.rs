//! Elementwise operations
//!
//! The same op names exist as buffer ops (`lmhlo.add(%a, %b, %out)`) and as
//! value ops inside fusions (`%r = mhlo.add(%a, %b)`). Both go through
//! [`emit_value`] once their operands sit in registers.

use lumen_backends::isa::{Condition, Register};
use lumen_backends::{CompileError, CompileResult};
use lumen_ir::{ElementType, Operation};

use super::builder::{BinaryOp, KernelBuilder, UnaryOp};
use super::{broadcast, IrEmitter, KernelParams};
use crate::types::isa_type;

/// Attribute of `compare` naming the predicate.
pub const COMPARISON_DIRECTION_ATTR: &str = "comparison_direction";

/// Elementwise operation, independent of dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseOp {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Convert,
    Compare,
    Select,
}

impl ElementwiseOp {
    /// Operation for an op name without its namespace.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "add" => Self::Binary(BinaryOp::Add),
            "subtract" => Self::Binary(BinaryOp::Sub),
            "multiply" => Self::Binary(BinaryOp::Mul),
            "divide" => Self::Binary(BinaryOp::Div),
            "maximum" => Self::Binary(BinaryOp::Max),
            "minimum" => Self::Binary(BinaryOp::Min),
            "and" => Self::Binary(BinaryOp::And),
            "or" => Self::Binary(BinaryOp::Or),
            "xor" => Self::Binary(BinaryOp::Xor),
            "negate" => Self::Unary(UnaryOp::Neg),
            "abs" => Self::Unary(UnaryOp::Abs),
            "not" => Self::Unary(UnaryOp::Not),
            "convert" => Self::Convert,
            "compare" => Self::Compare,
            "select" => Self::Select,
            _ => return None,
        })
    }

    /// Number of value operands.
    pub fn arity(self) -> usize {
        match self {
            Self::Unary(_) | Self::Convert => 1,
            Self::Binary(_) | Self::Compare => 2,
            Self::Select => 3,
        }
    }
}

fn parse_direction(op: &Operation) -> CompileResult<Condition> {
    let direction = op
        .attributes
        .get(COMPARISON_DIRECTION_ATTR)
        .and_then(|attr| attr.as_str())
        .ok_or_else(|| CompileError::invalid(op.name.to_string(), "missing 'comparison_direction'"))?;
    match direction {
        "EQ" => Ok(Condition::EQ),
        "NE" => Ok(Condition::NE),
        "LT" => Ok(Condition::LT),
        "LE" => Ok(Condition::LE),
        "GT" => Ok(Condition::GT),
        "GE" => Ok(Condition::GE),
        other => Err(CompileError::invalid(
            op.name.to_string(),
            format!("unknown comparison direction '{other}'"),
        )),
    }
}

/// Emit `kind` over operands already in registers; returns the result register.
pub(super) fn emit_value(
    builder: &mut KernelBuilder,
    op: &Operation,
    kind: ElementwiseOp,
    operands: &[(Register, ElementType)],
    result: ElementType,
) -> CompileResult<Register> {
    let mismatch = || {
        let types: Vec<String> = operands.iter().map(|(_, ty)| ty.to_string()).collect();
        CompileError::invalid(
            op.name.to_string(),
            format!("operand types [{}] do not fit result type {result}", types.join(", ")),
        )
    };

    match (kind, operands) {
        (ElementwiseOp::Binary(binary), &[(a, ta), (b, tb)]) => {
            if ta != result || tb != result {
                return Err(mismatch());
            }
            if matches!(binary, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor) && result.is_float() {
                return Err(CompileError::invalid(op.name.to_string(), "bitwise operation on a float type"));
            }
            builder.binary(binary, isa_type(result), a, b)
        }
        (ElementwiseOp::Unary(unary), &[(a, ta)]) => {
            if ta != result {
                return Err(mismatch());
            }
            if unary == UnaryOp::Not && result.is_float() {
                return Err(CompileError::invalid(op.name.to_string(), "bitwise operation on a float type"));
            }
            builder.unary(unary, isa_type(result), a)
        }
        (ElementwiseOp::Convert, &[(a, ta)]) => builder.convert(isa_type(ta), isa_type(result), a),
        (ElementwiseOp::Compare, &[(a, ta), (b, tb)]) => {
            if ta != tb || !result.is_bool() {
                return Err(mismatch());
            }
            let cond = parse_direction(op)?;
            builder.compare(isa_type(ta), cond, a, b)
        }
        (ElementwiseOp::Select, &[(pred, tp), (t, tt), (f, tf)]) => {
            if !tp.is_bool() || tt != result || tf != result {
                return Err(mismatch());
            }
            builder.select(isa_type(result), pred, t, f)
        }
        _ => Err(CompileError::invalid(
            op.name.to_string(),
            format!("expects {} operands, got {}", kind.arity(), operands.len()),
        )),
    }
}

impl IrEmitter<'_> {
    /// `lmhlo.<op>(inputs..., out)` as a one-op kernel.
    pub(super) fn emit_elementwise(&mut self, op: &Operation) -> CompileResult<()> {
        let kind = ElementwiseOp::from_name(op.name.op())
            .ok_or_else(|| CompileError::unsupported(op.name.to_string(), "not an elementwise operation"))?;
        Self::expect_operands(op, kind.arity() + 1)?;

        let (inputs, out) = op.operands.split_at(kind.arity());
        let out = out[0];
        let (out_slot, out_ty) = self.buffer(op, out)?;

        let mut builder = self.kernel_builder(op.name.op());
        let mut params = KernelParams::default();
        let mut registers = Vec::with_capacity(inputs.len());
        for &input in inputs {
            let (slot, ty) = self.buffer(op, input)?;
            let broadcast = broadcast(op, ty, &out_ty.dims)?;
            let param = params.param_for(&mut builder, input, slot, ty);
            registers.push((builder.load(isa_type(ty.element), param, broadcast)?, ty.element));
        }

        let result = emit_value(&mut builder, op, kind, &registers, out_ty.element)?;
        let out_param = params.param_for(&mut builder, out, out_slot, out_ty);
        builder.store(isa_type(out_ty.element), result, out_param);

        let kernel = builder.build(out_ty.num_elements(), self.options.flush_denormals_to_zero)?;
        self.push_kernel(kernel, params.into_args());
        Ok(())
    }
}
