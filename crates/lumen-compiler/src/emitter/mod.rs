//! IR emitter: entry function → thunks and kernels
//!
//! # Architecture
//!
//! ```text
//! Function body (lmhlo / lmhlo_gpu ops, in order)
//!          │
//!          ├── lmhlo.copy        → Thunk::Copy
//!          ├── lmhlo.constant    → Thunk::Constant
//!          ├── lmhlo.<elementwise>→ KernelBuilder → Thunk::Kernel
//!          ├── lmhlo.fusion      → KernelBuilder → Thunk::Kernel
//!          └── lmhlo_gpu.gemm    → Thunk::Gemm
//! ```
//!
//! Kernels go into the [`CodegenUnit`](lumen_backends::CodegenUnit) of the
//! emitter context; thunks keep a shared handle to them.

mod builder;
mod elementwise;
mod fusion;
mod gemm;
mod registers;

use std::sync::Arc;

use lumen_backends::isa::KernelFunction;
use lumen_backends::{CompileError, CompileResult, DebugOptions, EmitterContext, LaunchConfig};
use lumen_ir::{Function, Operation, ShapedType, Value};

use crate::buffer_assignment::{BufferAssignment, BufferSlot};
use crate::thunk::Thunk;
use crate::types::isa_type;

pub use builder::{BinaryOp, KernelBuilder, UnaryOp};
pub use elementwise::ElementwiseOp;
pub use registers::RegisterAllocator;

/// Lowers one entry function.
pub struct IrEmitter<'a> {
    function: &'a Function,
    assignment: &'a BufferAssignment,
    context: &'a mut EmitterContext,
    options: &'a DebugOptions,
    thunks: Vec<Thunk>,
}

impl<'a> IrEmitter<'a> {
    pub fn new(
        function: &'a Function,
        assignment: &'a BufferAssignment,
        context: &'a mut EmitterContext,
        options: &'a DebugOptions,
    ) -> Self {
        Self {
            function,
            assignment,
            context,
            options,
            thunks: Vec::new(),
        }
    }

    /// Lower the body, in program order, up to its terminator.
    pub fn emit(mut self) -> CompileResult<Vec<Thunk>> {
        let function = self.function;
        for op in &function.body.operations {
            if op.is_terminator() {
                break;
            }
            self.emit_operation(op)?;
        }
        tracing::debug!(
            function = %function.name,
            thunks = self.thunks.len(),
            kernels = self.context.unit.kernels().len(),
            "lowered entry function"
        );
        Ok(self.thunks)
    }

    fn emit_operation(&mut self, op: &Operation) -> CompileResult<()> {
        match (op.name.namespace(), op.name.op()) {
            ("lmhlo", "copy") => self.emit_copy(op),
            ("lmhlo", "constant") => self.emit_constant(op),
            ("lmhlo", "fusion") => self.emit_fusion(op),
            ("lmhlo", name) if ElementwiseOp::from_name(name).is_some() => self.emit_elementwise(op),
            ("lmhlo_gpu", "gemm") => self.emit_gemm(op),
            ("mhlo", _) => Err(CompileError::unsupported(
                op.name.to_string(),
                "value-level operations are only lowered inside lmhlo.fusion",
            )),
            _ => Err(CompileError::unsupported(op.name.to_string(), "no lowering for this operation")),
        }
    }

    // ============================================================================
    // Buffers
    // ============================================================================

    /// Slot and memref type of a buffer operand.
    fn buffer(&self, op: &Operation, value: Value) -> CompileResult<(BufferSlot, &'a ShapedType)> {
        let assignment = self.assignment;
        match (assignment.slot(value), assignment.buffer_type(value)) {
            (Some(slot), Some(ty)) => Ok((slot, ty)),
            _ => Err(CompileError::invalid(
                op.name.to_string(),
                format!("operand #{} is not an entry buffer", value.index()),
            )),
        }
    }

    fn expect_operands(op: &Operation, count: usize) -> CompileResult<()> {
        if op.operands.len() != count {
            return Err(CompileError::invalid(
                op.name.to_string(),
                format!("expects {count} operands, got {}", op.operands.len()),
            ));
        }
        Ok(())
    }

    // ============================================================================
    // Thunks
    // ============================================================================

    fn emit_copy(&mut self, op: &Operation) -> CompileResult<()> {
        Self::expect_operands(op, 2)?;
        let (src, src_ty) = self.buffer(op, op.operands[0])?;
        let (dst, dst_ty) = self.buffer(op, op.operands[1])?;
        if src_ty.byte_size() != dst_ty.byte_size() {
            return Err(CompileError::invalid(
                op.name.to_string(),
                format!("source has {} bytes, destination {}", src_ty.byte_size(), dst_ty.byte_size()),
            ));
        }
        self.thunks.push(Thunk::Copy {
            src,
            dst,
            size: dst_ty.byte_size(),
        });
        Ok(())
    }

    fn emit_constant(&mut self, op: &Operation) -> CompileResult<()> {
        Self::expect_operands(op, 1)?;
        let (dst, dst_ty) = self.buffer(op, op.operands[0])?;
        let dense = op
            .attributes
            .get("value")
            .and_then(|attr| attr.as_dense())
            .ok_or_else(|| CompileError::invalid(op.name.to_string(), "missing dense 'value' attribute"))?;
        if dense.ty.element_type() != Some(dst_ty.element) || dense.len() != dst_ty.num_elements() {
            return Err(CompileError::invalid(
                op.name.to_string(),
                format!("value of type {} does not fit {dst_ty}", dense.ty),
            ));
        }
        self.thunks.push(Thunk::Constant {
            dst,
            bytes: dense.to_bytes().into(),
        });
        Ok(())
    }

    // ============================================================================
    // Kernels
    // ============================================================================

    fn kernel_builder(&self, base: &str) -> KernelBuilder {
        KernelBuilder::new(self.context.unit.unique_kernel_name(base))
    }

    /// Add `kernel` to the unit and enqueue a launch over its elements.
    fn push_kernel(&mut self, kernel: KernelFunction, args: Vec<BufferSlot>) {
        let block_size = self
            .options
            .kernel_block_size
            .min(self.context.device_info.threads_per_block_limit);
        let config = LaunchConfig::linear(kernel.element_count, block_size);
        tracing::trace!(
            kernel = %kernel.name,
            instructions = kernel.instructions.len(),
            %config,
            "emitted kernel"
        );
        let kernel: Arc<KernelFunction> = self.context.unit.add_kernel(kernel);
        self.thunks.push(Thunk::Kernel { kernel, config, args });
    }
}

/// Kernel parameters of one kernel, one per distinct buffer.
#[derive(Debug, Default)]
struct KernelParams {
    params: Vec<(Value, u16)>,
    args: Vec<BufferSlot>,
}

impl KernelParams {
    /// Parameter bound to `value`, declaring it on first use.
    fn param_for(&mut self, builder: &mut KernelBuilder, value: Value, slot: BufferSlot, ty: &ShapedType) -> u16 {
        if let Some(&(_, param)) = self.params.iter().find(|(v, _)| *v == value) {
            return param;
        }
        let param = builder.param(isa_type(ty.element), ty.num_elements());
        self.params.push((value, param));
        self.args.push(slot);
        param
    }

    fn into_args(self) -> Vec<BufferSlot> {
        self.args
    }
}

/// Whether `operand` is read as a rank-0 broadcast into an iteration space of `dims`.
fn broadcast(op: &Operation, operand: &ShapedType, dims: &[i64]) -> CompileResult<bool> {
    if operand.dims == dims {
        Ok(false)
    } else if operand.rank() == 0 {
        Ok(true)
    } else {
        Err(CompileError::invalid(
            op.name.to_string(),
            format!("operand {operand} does not match iteration shape {dims:?}"),
        ))
    }
}
