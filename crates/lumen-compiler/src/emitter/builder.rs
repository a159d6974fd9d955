//! Kernel builder
//!
//! Fluent construction of [`KernelFunction`]s with integrated register
//! allocation. Every method that produces a value returns the register that
//! holds it.

use lumen_backends::isa::{Address, Condition, Instruction, KernelFunction, KernelParam, Register, Type};
use lumen_backends::{CompileError, CompileResult};

use super::registers::RegisterAllocator;

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    And,
    Or,
    Xor,
}

/// One-operand operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Not,
}

/// Builder for one kernel.
#[derive(Debug)]
pub struct KernelBuilder {
    name: String,
    params: Vec<KernelParam>,
    instructions: Vec<Instruction>,
    reg_alloc: RegisterAllocator,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            instructions: Vec::new(),
            reg_alloc: RegisterAllocator::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare the next buffer parameter; returns its index.
    pub fn param(&mut self, ty: Type, elements: usize) -> u16 {
        self.params.push(KernelParam::new(ty, elements));
        (self.params.len() - 1) as u16
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    // ============================================================================
    // Register Allocation
    // ============================================================================

    pub fn alloc_reg(&mut self) -> CompileResult<Register> {
        self.reg_alloc
            .alloc()
            .ok_or_else(|| CompileError::unsupported(&self.name, "kernel needs more than 256 live registers"))
    }

    pub fn free_reg(&mut self, reg: Register) {
        self.reg_alloc.free(reg);
    }

    // ============================================================================
    // Memory
    // ============================================================================

    /// Load the lane's element of `param`, or element 0 for every lane.
    pub fn load(&mut self, ty: Type, param: u16, broadcast: bool) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        let addr = if broadcast {
            Address::Broadcast { param }
        } else {
            Address::Lane { param }
        };
        self.instructions.push(Instruction::LDG { ty, dst, addr });
        Ok(dst)
    }

    /// Store `src` to the lane's element of `param`.
    pub fn store(&mut self, ty: Type, src: Register, param: u16) {
        self.instructions.push(Instruction::STG {
            ty,
            src,
            addr: Address::Lane { param },
        });
    }

    // ============================================================================
    // Values
    // ============================================================================

    /// Materialize the raw bits of a `ty` constant.
    pub fn immediate(&mut self, ty: Type, value: u64) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        self.instructions.push(Instruction::MOV_IMM { ty, dst, value });
        Ok(dst)
    }

    pub fn binary(&mut self, op: BinaryOp, ty: Type, src1: Register, src2: Register) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        self.instructions.push(match op {
            BinaryOp::Add => Instruction::ADD { ty, dst, src1, src2 },
            BinaryOp::Sub => Instruction::SUB { ty, dst, src1, src2 },
            BinaryOp::Mul => Instruction::MUL { ty, dst, src1, src2 },
            BinaryOp::Div => Instruction::DIV { ty, dst, src1, src2 },
            BinaryOp::Max => Instruction::MAX { ty, dst, src1, src2 },
            BinaryOp::Min => Instruction::MIN { ty, dst, src1, src2 },
            BinaryOp::And => Instruction::AND { ty, dst, src1, src2 },
            BinaryOp::Or => Instruction::OR { ty, dst, src1, src2 },
            BinaryOp::Xor => Instruction::XOR { ty, dst, src1, src2 },
        });
        Ok(dst)
    }

    pub fn unary(&mut self, op: UnaryOp, ty: Type, src: Register) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        self.instructions.push(match op {
            UnaryOp::Neg => Instruction::NEG { ty, dst, src },
            UnaryOp::Abs => Instruction::ABS { ty, dst, src },
            UnaryOp::Not => Instruction::NOT { ty, dst, src },
        });
        Ok(dst)
    }

    pub fn convert(&mut self, src_ty: Type, dst_ty: Type, src: Register) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        self.instructions.push(Instruction::CVT {
            src_ty,
            dst_ty,
            dst,
            src,
        });
        Ok(dst)
    }

    /// Predicate register holding `src1 cond src2`.
    pub fn compare(&mut self, ty: Type, cond: Condition, src1: Register, src2: Register) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        self.instructions.push(Instruction::SETcc {
            ty,
            cond,
            dst,
            src1,
            src2,
        });
        Ok(dst)
    }

    pub fn select(
        &mut self,
        ty: Type,
        pred: Register,
        src_true: Register,
        src_false: Register,
    ) -> CompileResult<Register> {
        let dst = self.alloc_reg()?;
        self.instructions.push(Instruction::SEL {
            ty,
            dst,
            pred,
            src_true,
            src_false,
        });
        Ok(dst)
    }

    /// Finish the kernel for `element_count` lanes.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidOperation`] if a memory instruction disagrees
    /// with its declared parameter.
    pub fn build(self, element_count: usize, flush_denormals: bool) -> CompileResult<KernelFunction> {
        let kernel = KernelFunction {
            name: self.name,
            params: self.params,
            instructions: self.instructions,
            element_count,
            flush_denormals,
        };
        kernel
            .validate()
            .map_err(|e| CompileError::invalid(&kernel.name, e.to_string()))?;
        Ok(kernel)
    }
}
