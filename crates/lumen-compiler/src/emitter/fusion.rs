//! `lmhlo.fusion` lowering
//!
//! A fusion region is a value-level program between buffer loads and stores:
//!
//! ```text
//! "lmhlo.fusion"() ({
//!   %a = "std.tensor_load"(%arg0) : (memref<8xf32>) -> tensor<8xf32>
//!   %c = "mhlo.constant"() {value = dense<2.0> : tensor<f32>} : () -> tensor<f32>
//!   %m = "mhlo.multiply"(%a, %c) : (tensor<8xf32>, tensor<f32>) -> tensor<8xf32>
//!   "std.tensor_store"(%m, %arg1) : (tensor<8xf32>, memref<8xf32>) -> ()
//!   "lmhlo.terminator"() : () -> ()
//! }) : () -> ()
//! ```
//!
//! The whole region becomes one kernel with a lane per element of the stored
//! buffers. Rank-0 tensors broadcast to every lane.

use std::collections::{HashMap, HashSet};

use lumen_backends::isa::Register;
use lumen_backends::{CompileError, CompileResult};
use lumen_ir::{ElementType, Operation, Region, Value};

use super::elementwise::{emit_value, ElementwiseOp};
use super::{broadcast, IrEmitter, KernelParams};
use crate::types::isa_type;

impl IrEmitter<'_> {
    pub(super) fn emit_fusion(&mut self, op: &Operation) -> CompileResult<()> {
        let region = match op.regions.as_slice() {
            [region] => region,
            _ => return Err(CompileError::invalid(op.name.to_string(), "expects exactly one region")),
        };
        let dims = self.fusion_dims(op, region)?;
        let elements = dims
            .iter()
            .try_fold(1usize, |count, &d| count.checked_mul(usize::try_from(d).ok()?))
            .ok_or_else(|| {
                CompileError::invalid(op.name.to_string(), format!("iteration shape {dims:?} is too large"))
            })?;
        let last_uses = last_uses(region);

        let mut builder = self.kernel_builder("fusion");
        let mut params = KernelParams::default();
        let mut values: HashMap<Value, (Register, ElementType)> = HashMap::new();
        let lookup = |values: &HashMap<Value, (Register, ElementType)>, inner: &Operation, value: Value| {
            values.get(&value).copied().ok_or_else(|| {
                CompileError::invalid(
                    inner.name.to_string(),
                    format!("operand #{} is not a value computed in this fusion", value.index()),
                )
            })
        };

        for (position, inner) in region.operations.iter().enumerate() {
            if inner.is_terminator() {
                break;
            }
            match (inner.name.namespace(), inner.name.op()) {
                ("std", "tensor_load") => {
                    Self::expect_operands(inner, 1)?;
                    let result = self.single_result(inner)?;
                    let buffer = inner.operands[0];
                    let (slot, ty) = self.buffer(inner, buffer)?;
                    let broadcast = broadcast(inner, ty, &dims)?;
                    let param = params.param_for(&mut builder, buffer, slot, ty);
                    let register = builder.load(isa_type(ty.element), param, broadcast)?;
                    values.insert(result, (register, ty.element));
                }
                ("std", "tensor_store") => {
                    Self::expect_operands(inner, 2)?;
                    let (register, element) = lookup(&values, inner, inner.operands[0])?;
                    let buffer = inner.operands[1];
                    let (slot, ty) = self.buffer(inner, buffer)?;
                    if element != ty.element {
                        return Err(CompileError::invalid(
                            inner.name.to_string(),
                            format!("cannot store {element} into a buffer of {}", ty.element),
                        ));
                    }
                    let param = params.param_for(&mut builder, buffer, slot, ty);
                    builder.store(isa_type(element), register, param);
                }
                ("mhlo", "constant") => {
                    let result = self.single_result(inner)?;
                    let element = self.tensor_element(inner, result, &dims)?;
                    let dense = inner
                        .attributes
                        .get("value")
                        .and_then(|attr| attr.as_dense())
                        .ok_or_else(|| CompileError::invalid(inner.name.to_string(), "missing dense 'value' attribute"))?;
                    let scalar = match dense.get(0) {
                        Some(scalar) if dense.is_splat() || dense.len() == 1 => scalar,
                        _ => {
                            return Err(CompileError::unsupported(
                                inner.name.to_string(),
                                "only splat constants can be fused",
                            ));
                        }
                    };
                    let register = builder.immediate(isa_type(element), scalar.to_bits(element))?;
                    values.insert(result, (register, element));
                }
                ("mhlo", name) if ElementwiseOp::from_name(name).is_some() => {
                    let kind = ElementwiseOp::from_name(name).ok_or_else(|| {
                        CompileError::unsupported(inner.name.to_string(), "not an elementwise operation")
                    })?;
                    let result = self.single_result(inner)?;
                    let element = self.tensor_element(inner, result, &dims)?;
                    let operands = inner
                        .operands
                        .iter()
                        .map(|&value| lookup(&values, inner, value))
                        .collect::<CompileResult<Vec<_>>>()?;
                    let register = emit_value(&mut builder, inner, kind, &operands, element)?;
                    values.insert(result, (register, element));
                }
                _ => {
                    return Err(CompileError::unsupported(
                        inner.name.to_string(),
                        "cannot appear inside lmhlo.fusion",
                    ));
                }
            }

            let mut released = HashSet::new();
            for &operand in &inner.operands {
                if last_uses.get(&operand) == Some(&position) && released.insert(operand) {
                    if let Some((register, _)) = values.remove(&operand) {
                        builder.free_reg(register);
                    }
                }
            }
        }

        let kernel = builder.build(elements, self.options.flush_denormals_to_zero)?;
        self.push_kernel(kernel, params.into_args());
        Ok(())
    }

    /// Shape of the buffers the fusion stores to; all of them must agree.
    fn fusion_dims(&self, op: &Operation, region: &Region) -> CompileResult<Vec<i64>> {
        let mut dims: Option<Vec<i64>> = None;
        for inner in &region.operations {
            if !inner.name.is("std", "tensor_store") {
                continue;
            }
            let Some(&buffer) = inner.operands.get(1) else {
                continue;
            };
            let (_, ty) = self.buffer(inner, buffer)?;
            match &dims {
                None => dims = Some(ty.dims.clone()),
                Some(existing) if *existing == ty.dims => {}
                Some(existing) => {
                    return Err(CompileError::invalid(
                        op.name.to_string(),
                        format!("stores to buffers of shapes {existing:?} and {:?}", ty.dims),
                    ));
                }
            }
        }
        dims.ok_or_else(|| CompileError::invalid(op.name.to_string(), "fusion stores no result"))
    }

    fn single_result(&self, op: &Operation) -> CompileResult<Value> {
        match op.results.as_slice() {
            [result] => Ok(*result),
            _ => Err(CompileError::invalid(
                op.name.to_string(),
                format!("expects one result, got {}", op.results.len()),
            )),
        }
    }

    /// Element type of a tensor result that lives in the fusion's iteration space.
    fn tensor_element(&self, op: &Operation, value: Value, dims: &[i64]) -> CompileResult<ElementType> {
        let tensor = self
            .function
            .value_type(value)
            .and_then(|ty| ty.as_tensor())
            .ok_or_else(|| CompileError::invalid(op.name.to_string(), "result is not a tensor"))?;
        if tensor.rank() != 0 && tensor.dims != dims {
            return Err(CompileError::invalid(
                op.name.to_string(),
                format!("result {tensor} does not match iteration shape {dims:?}"),
            ));
        }
        Ok(tensor.element)
    }
}

/// Index of the last operation in `region` reading each value.
fn last_uses(region: &Region) -> HashMap<Value, usize> {
    let mut uses = HashMap::new();
    for (position, op) in region.operations.iter().enumerate() {
        for &operand in &op.operands {
            uses.insert(operand, position);
        }
    }
    uses
}
