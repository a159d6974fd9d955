//! Kernel container for ISA instructions
//!
//! A kernel is a straight-line instruction sequence run once per lane over a
//! fixed element count, with typed parameter buffers bound at launch.

use super::instruction::Instruction;
use super::types::{Address, Register, Type};

/// Errors found when validating a kernel before launch
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KernelError {
    /// Instruction addresses a parameter the kernel does not declare
    #[error("instruction {instruction} addresses parameter {param}, kernel has {count}")]
    UndeclaredParameter { instruction: usize, param: u16, count: usize },

    /// Load or store type disagrees with the parameter's element type
    #[error("instruction {instruction} accesses parameter {param} as {used}, declared {declared}")]
    ParameterTypeMismatch {
        instruction: usize,
        param: u16,
        declared: Type,
        used: Type,
    },

    /// Kernel covers more elements than a lane-addressed parameter holds
    #[error("parameter {param} holds {elements} elements, kernel covers {element_count}")]
    ParameterTooSmall {
        param: u16,
        elements: usize,
        element_count: usize,
    },
}

/// Result type for kernel operations
pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Typed buffer parameter of a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KernelParam {
    pub ty: Type,
    /// Element count of the bound buffer
    pub elements: usize,
}

impl KernelParam {
    pub const fn new(ty: Type, elements: usize) -> Self {
        Self { ty, elements }
    }

    pub const fn byte_size(&self) -> usize {
        self.ty.size_bytes() * self.elements
    }
}

/// A compiled elementwise kernel
///
/// # Example
///
/// ```
/// use lumen_backends::isa::{Address, Instruction, KernelFunction, KernelParam, Register, Type};
///
/// let kernel = KernelFunction {
///     name: "copy".to_string(),
///     params: vec![KernelParam::new(Type::F32, 4), KernelParam::new(Type::F32, 4)],
///     instructions: vec![
///         Instruction::LDG { ty: Type::F32, dst: Register(0), addr: Address::Lane { param: 0 } },
///         Instruction::STG { ty: Type::F32, src: Register(0), addr: Address::Lane { param: 1 } },
///     ],
///     element_count: 4,
///     flush_denormals: false,
/// };
/// assert!(kernel.validate().is_ok());
/// assert_eq!(kernel.num_registers(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KernelFunction {
    pub name: String,
    pub params: Vec<KernelParam>,
    pub instructions: Vec<Instruction>,
    /// Lanes with a global index at or past this count do nothing
    pub element_count: usize,
    /// Flush f32 denormal results to zero
    pub flush_denormals: bool,
}

impl KernelFunction {
    /// Number of registers touched, i.e. one past the highest register written.
    pub fn num_registers(&self) -> usize {
        self.instructions
            .iter()
            .filter_map(Instruction::destination)
            .map(|Register(r)| r as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Check that every memory instruction matches a declared parameter.
    ///
    /// # Errors
    ///
    /// Returns the first [`KernelError`] found, in instruction order.
    pub fn validate(&self) -> KernelResult<()> {
        for (index, instruction) in self.instructions.iter().enumerate() {
            let (ty, addr) = match instruction {
                Instruction::LDG { ty, addr, .. } | Instruction::STG { ty, addr, .. } => (*ty, *addr),
                _ => continue,
            };
            let param_index = addr.param();
            let param = self
                .params
                .get(param_index as usize)
                .ok_or(KernelError::UndeclaredParameter {
                    instruction: index,
                    param: param_index,
                    count: self.params.len(),
                })?;
            if param.ty != ty {
                return Err(KernelError::ParameterTypeMismatch {
                    instruction: index,
                    param: param_index,
                    declared: param.ty,
                    used: ty,
                });
            }
            let needed = match addr {
                Address::Lane { .. } => self.element_count,
                Address::Broadcast { .. } => 1,
            };
            if param.elements < needed {
                return Err(KernelError::ParameterTooSmall {
                    param: param_index,
                    elements: param.elements,
                    element_count: needed,
                });
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON, the format used for kernel dumps.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
