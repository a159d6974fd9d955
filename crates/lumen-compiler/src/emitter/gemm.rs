//! `lmhlo_gpu.gemm` lowering

use lumen_backends::{CompileError, CompileResult, ComputeCapability, GemmConfig};
use lumen_ir::{ElementType, Operation};

use super::IrEmitter;
use crate::thunk::Thunk;
use crate::types::isa_type;

impl IrEmitter<'_> {
    /// `gemm(%lhs, %rhs, %out) {alpha_real, beta, transpose_lhs, transpose_rhs}`
    ///
    /// All three buffers are rank-2 and share a float element type. bf16
    /// needs an Ampere-class device.
    pub(super) fn emit_gemm(&mut self, op: &Operation) -> CompileResult<()> {
        Self::expect_operands(op, 3)?;
        let name = op.name.to_string();
        let (lhs, lhs_ty) = self.buffer(op, op.operands[0])?;
        let (rhs, rhs_ty) = self.buffer(op, op.operands[1])?;
        let (out, out_ty) = self.buffer(op, op.operands[2])?;

        let element = out_ty.element;
        if lhs_ty.element != element || rhs_ty.element != element {
            return Err(CompileError::invalid(
                name,
                format!("mixed element types {} x {} -> {element}", lhs_ty.element, rhs_ty.element),
            ));
        }
        if !element.is_float() {
            return Err(CompileError::unsupported(name, format!("gemm on {element}")));
        }
        if element == ElementType::BF16 {
            match self.context.compute_capability {
                Some(capability) if capability.is_at_least(ComputeCapability::AMPERE) => {}
                actual => {
                    return Err(CompileError::CapabilityRequired {
                        op: name,
                        required: ComputeCapability::AMPERE,
                        actual,
                    });
                }
            }
        }

        let alpha = float_attr(op, "alpha_real", 1.0)?;
        if float_attr(op, "alpha_imag", 0.0)? != 0.0 {
            return Err(CompileError::unsupported(name, "complex alpha"));
        }
        let beta = float_attr(op, "beta", 0.0)?;
        let lhs_transposed = bool_attr(op, "transpose_lhs")?;
        let rhs_transposed = bool_attr(op, "transpose_rhs")?;

        let (lhs_dims, rhs_dims, out_dims) = match (&lhs_ty.dims[..], &rhs_ty.dims[..], &out_ty.dims[..]) {
            (&[a0, a1], &[b0, b1], &[c0, c1]) => ([a0, a1], [b0, b1], [c0, c1]),
            _ => return Err(CompileError::invalid(name, "operands must be rank 2")),
        };
        let (m, k) = if lhs_transposed {
            (lhs_dims[1], lhs_dims[0])
        } else {
            (lhs_dims[0], lhs_dims[1])
        };
        let (rhs_k, n) = if rhs_transposed {
            (rhs_dims[1], rhs_dims[0])
        } else {
            (rhs_dims[0], rhs_dims[1])
        };
        if k != rhs_k || out_dims != [m, n] {
            return Err(CompileError::invalid(
                name,
                format!("cannot multiply {lhs_ty} by {rhs_ty} into {out_ty}"),
            ));
        }

        let config = GemmConfig {
            element: isa_type(element),
            m: m as usize,
            n: n as usize,
            k: k as usize,
            alpha,
            beta,
            lhs_transposed,
            rhs_transposed,
        };
        tracing::trace!(m = config.m, n = config.n, k = config.k, %element, "emitted gemm");
        self.thunks.push(Thunk::Gemm { config, lhs, rhs, out });
        Ok(())
    }
}

fn float_attr(op: &Operation, name: &str, default: f64) -> CompileResult<f64> {
    match op.attributes.get(name) {
        None => Ok(default),
        Some(attr) => attr
            .as_float()
            .ok_or_else(|| CompileError::invalid(op.name.to_string(), format!("'{name}' must be a number, got {attr}"))),
    }
}

fn bool_attr(op: &Operation, name: &str) -> CompileResult<bool> {
    match op.attributes.get(name) {
        None => Ok(false),
        Some(attr) => attr
            .as_bool()
            .ok_or_else(|| CompileError::invalid(op.name.to_string(), format!("'{name}' must be a boolean, got {attr}"))),
    }
}
