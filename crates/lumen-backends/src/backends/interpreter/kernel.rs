//! Kernel interpreter
//!
//! Runs a [`KernelFunction`] over its launch grid. Blocks execute in parallel
//! with rayon, lanes within a block run in order. Every lane reads memory
//! under a shared lock and buffers its stores; the stores are applied under
//! the write lock once all lanes finish, so every load observes the memory as
//! it was at launch.
//!
//! Registers hold raw bit patterns. Each instruction reinterprets them as its
//! own type:
//!
//! - integers wrap to the type width; division by zero yields all ones
//! - floats are computed in f64 and rounded to the type
//! - MIN/MAX propagate NaN
//! - with denormal flushing on, subnormal f32 results become zero

use std::time::Instant;

use lumen_tracing::perf_span;
use lumen_tracing::performance::record_kernel_launch;
use parking_lot::RwLock;
use rayon::prelude::*;

use super::memory::MemoryManager;
use crate::error::{BackendError, Result};
use crate::isa::{Address, Condition, Instruction, KernelFunction, Register, Type};
use crate::launch::LaunchConfig;
use crate::memory::DeviceMemoryBase;

/// A store buffered until every lane has run.
struct Store {
    param: usize,
    element: usize,
    ty: Type,
    bits: u64,
}

/// Launch `kernel` with `args` bound to its parameters.
pub(crate) fn launch(
    memory: &RwLock<MemoryManager>,
    kernel: &KernelFunction,
    config: &LaunchConfig,
    args: &[DeviceMemoryBase],
) -> Result<()> {
    let _span = perf_span!(
        "interpreter_launch",
        kernel = kernel.name.as_str(),
        instructions = kernel.instructions.len(),
        lanes = config.total_lanes()
    );
    let start = Instant::now();

    kernel
        .validate()
        .map_err(|e| BackendError::execution_error(format!("kernel '{}': {e}", kernel.name)))?;

    if args.len() != kernel.params.len() {
        return Err(BackendError::KernelArgumentCount {
            kernel: kernel.name.clone(),
            expected: kernel.params.len(),
            actual: args.len(),
        });
    }
    for (index, (arg, param)) in args.iter().zip(&kernel.params).enumerate() {
        if arg.size() < param.byte_size() {
            return Err(BackendError::KernelArgumentSize {
                kernel: kernel.name.clone(),
                index,
                expected: param.byte_size(),
                actual: arg.size(),
            });
        }
    }

    let num_registers = kernel.num_registers();
    let lanes_per_block = config.block.total_lanes() as usize;
    let total_blocks = config.grid.total_blocks() as usize;

    let stores: Vec<Store> = {
        let guard = memory.read();
        let buffers = args
            .iter()
            .map(|arg| guard.bytes(*arg))
            .collect::<Result<Vec<&[u8]>>>()?;

        let per_block = (0..total_blocks)
            .into_par_iter()
            .map(|block| {
                let mut stores = Vec::new();
                let mut registers = vec![None; num_registers];
                for lane in 0..lanes_per_block {
                    let global = block * lanes_per_block + lane;
                    if global >= kernel.element_count {
                        break;
                    }
                    registers.iter_mut().for_each(|r| *r = None);
                    let mut state = LaneState {
                        kernel,
                        buffers: &buffers,
                        registers: &mut registers,
                        global,
                        stores: &mut stores,
                    };
                    for instruction in &kernel.instructions {
                        state.execute(instruction)?;
                    }
                }
                Ok(stores)
            })
            .collect::<Result<Vec<Vec<Store>>>>()?;

        per_block.into_iter().flatten().collect()
    };

    {
        let mut guard = memory.write();
        for store in stores {
            let width = store.ty.size_bytes();
            let bytes = guard.bytes_mut(args[store.param])?;
            let offset = store.element * width;
            bytes[offset..offset + width].copy_from_slice(&store.bits.to_le_bytes()[..width]);
        }
    }

    record_kernel_launch(
        &kernel.name,
        config.total_lanes(),
        kernel.instructions.len(),
        start.elapsed().as_micros() as u64,
    );
    Ok(())
}

struct LaneState<'a, 'b> {
    kernel: &'a KernelFunction,
    buffers: &'a [&'b [u8]],
    registers: &'a mut [Option<u64>],
    global: usize,
    stores: &'a mut Vec<Store>,
}

impl LaneState<'_, '_> {
    fn read(&self, register: Register) -> Result<u64> {
        self.registers
            .get(register.index() as usize)
            .copied()
            .ok_or(BackendError::InvalidRegister(register.index()))?
            .ok_or(BackendError::UninitializedRegister(register.index()))
    }

    fn write(&mut self, register: Register, ty: Type, bits: u64) -> Result<()> {
        let slot = self
            .registers
            .get_mut(register.index() as usize)
            .ok_or(BackendError::InvalidRegister(register.index()))?;
        *slot = Some(bits & mask(ty));
        Ok(())
    }

    fn element(&self, addr: Address) -> usize {
        match addr {
            Address::Lane { .. } => self.global,
            Address::Broadcast { .. } => 0,
        }
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<()> {
        let ftz = self.kernel.flush_denormals;
        match *instruction {
            Instruction::LDG { ty, dst, addr } => {
                let width = ty.size_bytes();
                let offset = self.element(addr) * width;
                let bytes = &self.buffers[addr.param() as usize][offset..offset + width];
                self.write(dst, ty, load_bits(ty, bytes))
            }
            Instruction::STG { ty, src, addr } => {
                let bits = self.read(src)? & mask(ty);
                self.stores.push(Store {
                    param: addr.param() as usize,
                    element: self.element(addr),
                    ty,
                    bits,
                });
                Ok(())
            }
            Instruction::MOV { ty, dst, src } => {
                let bits = self.read(src)?;
                self.write(dst, ty, bits)
            }
            Instruction::MOV_IMM { ty, dst, value } => self.write(dst, ty, value),
            Instruction::CVT {
                src_ty,
                dst_ty,
                dst,
                src,
            } => {
                let bits = convert(src_ty, dst_ty, self.read(src)?, ftz);
                self.write(dst, dst_ty, bits)
            }
            Instruction::ADD { ty, dst, src1, src2 } => self.binary(BinaryOp::Add, ty, dst, src1, src2),
            Instruction::SUB { ty, dst, src1, src2 } => self.binary(BinaryOp::Sub, ty, dst, src1, src2),
            Instruction::MUL { ty, dst, src1, src2 } => self.binary(BinaryOp::Mul, ty, dst, src1, src2),
            Instruction::DIV { ty, dst, src1, src2 } => self.binary(BinaryOp::Div, ty, dst, src1, src2),
            Instruction::MIN { ty, dst, src1, src2 } => self.binary(BinaryOp::Min, ty, dst, src1, src2),
            Instruction::MAX { ty, dst, src1, src2 } => self.binary(BinaryOp::Max, ty, dst, src1, src2),
            Instruction::AND { ty, dst, src1, src2 } => self.binary(BinaryOp::And, ty, dst, src1, src2),
            Instruction::OR { ty, dst, src1, src2 } => self.binary(BinaryOp::Or, ty, dst, src1, src2),
            Instruction::XOR { ty, dst, src1, src2 } => self.binary(BinaryOp::Xor, ty, dst, src1, src2),
            Instruction::ABS { ty, dst, src } => self.unary(UnaryOp::Abs, ty, dst, src),
            Instruction::NEG { ty, dst, src } => self.unary(UnaryOp::Neg, ty, dst, src),
            Instruction::NOT { ty, dst, src } => self.unary(UnaryOp::Not, ty, dst, src),
            Instruction::SETcc {
                ty,
                cond,
                dst,
                src1,
                src2,
            } => {
                let result = compare(ty, cond, self.read(src1)?, self.read(src2)?);
                self.write(dst, Type::PRED, result as u64)
            }
            Instruction::SEL {
                ty,
                dst,
                pred,
                src_true,
                src_false,
            } => {
                let chosen = if self.read(pred)? != 0 { src_true } else { src_false };
                let bits = self.read(chosen)?;
                self.write(dst, ty, bits)
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, ty: Type, dst: Register, src1: Register, src2: Register) -> Result<()> {
        let bits = binary(op, ty, self.read(src1)?, self.read(src2)?, self.kernel.flush_denormals)?;
        self.write(dst, ty, bits)
    }

    fn unary(&mut self, op: UnaryOp, ty: Type, dst: Register, src: Register) -> Result<()> {
        let bits = unary(op, ty, self.read(src)?, self.kernel.flush_denormals)?;
        self.write(dst, ty, bits)
    }
}

// ================================================================================================
// Value Semantics
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Abs,
    Neg,
    Not,
}

fn mask(ty: Type) -> u64 {
    match ty.size_bytes() {
        8 => u64::MAX,
        _ if ty == Type::PRED => 1,
        width => (1u64 << (width * 8)) - 1,
    }
}

fn load_bits(ty: Type, bytes: &[u8]) -> u64 {
    match ty.size_bytes() {
        1 => bytemuck::pod_read_unaligned::<u8>(bytes) as u64,
        2 => u16::from_le(bytemuck::pod_read_unaligned::<u16>(bytes)) as u64,
        4 => u32::from_le(bytemuck::pod_read_unaligned::<u32>(bytes)) as u64,
        _ => u64::from_le(bytemuck::pod_read_unaligned::<u64>(bytes)),
    }
}

/// Sign-extend `bits` of a signed type to i64.
fn signed(ty: Type, bits: u64) -> i64 {
    let shift = 64 - ty.size_bytes() as u32 * 8;
    ((bits << shift) as i64) >> shift
}

pub(crate) fn to_f64(ty: Type, bits: u64) -> f64 {
    match ty {
        Type::F16 => half::f16::from_bits(bits as u16).to_f64(),
        Type::BF16 => half::bf16::from_bits(bits as u16).to_f64(),
        Type::F32 => f32::from_bits(bits as u32) as f64,
        Type::F64 => f64::from_bits(bits),
        _ if ty.is_signed_integer() => signed(ty, bits) as f64,
        _ => bits as f64,
    }
}

pub(crate) fn from_f64(ty: Type, value: f64, ftz: bool) -> u64 {
    match ty {
        Type::F16 => half::f16::from_f64(value).to_bits() as u64,
        Type::BF16 => half::bf16::from_f64(value).to_bits() as u64,
        Type::F32 => {
            let mut single = value as f32;
            if ftz && single.is_subnormal() {
                single = 0.0f32.copysign(single);
            }
            single.to_bits() as u64
        }
        Type::F64 => value.to_bits(),
        Type::PRED => (value != 0.0) as u64,
        // Saturating, NaN to zero.
        _ if ty.is_signed_integer() => {
            let bits = ty.size_bytes() as u32 * 8;
            let min = -(2f64.powi(bits as i32 - 1));
            let max = 2f64.powi(bits as i32 - 1) - 1.0;
            (value.clamp(min, max) as i64) as u64 & mask(ty)
        }
        _ => {
            let max = if ty.size_bytes() == 8 {
                u64::MAX as f64
            } else {
                mask(ty) as f64
            };
            value.clamp(0.0, max) as u64
        }
    }
}

fn convert(src_ty: Type, dst_ty: Type, bits: u64, ftz: bool) -> u64 {
    if dst_ty == Type::PRED {
        return if src_ty.is_float() {
            (to_f64(src_ty, bits) != 0.0) as u64
        } else {
            (bits & mask(src_ty) != 0) as u64
        };
    }
    if src_ty.is_float() || dst_ty.is_float() {
        return from_f64(dst_ty, to_f64(src_ty, bits), ftz);
    }
    let widened = if src_ty.is_signed_integer() {
        signed(src_ty, bits) as u64
    } else {
        bits & mask(src_ty)
    };
    widened & mask(dst_ty)
}

fn binary(op: BinaryOp, ty: Type, a: u64, b: u64, ftz: bool) -> Result<u64> {
    if ty.is_float() {
        let (x, y) = (to_f64(ty, a), to_f64(ty, b));
        let value = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Min if x.is_nan() || y.is_nan() => f64::NAN,
            BinaryOp::Max if x.is_nan() || y.is_nan() => f64::NAN,
            BinaryOp::Min => x.min(y),
            BinaryOp::Max => x.max(y),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                return Err(BackendError::unsupported(format!("{op:?} on {ty}")));
            }
        };
        return Ok(from_f64(ty, value, ftz));
    }

    let bits = match op {
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        _ if ty.is_signed_integer() => {
            let (x, y) = (signed(ty, a), signed(ty, b));
            (match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div if y == 0 => -1,
                BinaryOp::Div => x.wrapping_div(y),
                BinaryOp::Min => x.min(y),
                _ => x.max(y),
            }) as u64
        }
        _ => {
            let (x, y) = (a & mask(ty), b & mask(ty));
            match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div if y == 0 => u64::MAX,
                BinaryOp::Div => x / y,
                BinaryOp::Min => x.min(y),
                _ => x.max(y),
            }
        }
    };
    Ok(bits & mask(ty))
}

fn unary(op: UnaryOp, ty: Type, a: u64, ftz: bool) -> Result<u64> {
    if ty.is_float() {
        let x = to_f64(ty, a);
        let value = match op {
            UnaryOp::Abs => x.abs(),
            UnaryOp::Neg => -x,
            UnaryOp::Not => return Err(BackendError::unsupported(format!("not on {ty}"))),
        };
        return Ok(from_f64(ty, value, ftz));
    }
    let bits = match op {
        UnaryOp::Not => !a,
        UnaryOp::Abs if ty.is_signed_integer() => signed(ty, a).wrapping_abs() as u64,
        UnaryOp::Abs => a,
        UnaryOp::Neg => (signed(ty, a).wrapping_neg()) as u64,
    };
    Ok(bits & mask(ty))
}

fn compare(ty: Type, cond: Condition, a: u64, b: u64) -> bool {
    use std::cmp::Ordering;

    let ordering = if ty.is_float() {
        to_f64(ty, a).partial_cmp(&to_f64(ty, b))
    } else if ty.is_signed_integer() {
        Some(signed(ty, a).cmp(&signed(ty, b)))
    } else {
        Some((a & mask(ty)).cmp(&(b & mask(ty))))
    };
    match (cond, ordering) {
        // Unordered (NaN) compares false except for NE.
        (Condition::NE, None) => true,
        (_, None) => false,
        (Condition::EQ, Some(o)) => o == Ordering::Equal,
        (Condition::NE, Some(o)) => o != Ordering::Equal,
        (Condition::LT, Some(o)) => o == Ordering::Less,
        (Condition::LE, Some(o)) => o != Ordering::Greater,
        (Condition::GT, Some(o)) => o == Ordering::Greater,
        (Condition::GE, Some(o)) => o != Ordering::Less,
    }
}
