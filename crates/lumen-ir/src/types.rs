//! IR types
//!
//! Element types, shaped types (`memref<...>`, `tensor<...>`) and their
//! textual forms. Only static shapes are representable.

use std::fmt;
use std::str::FromStr;

// ================================================================================================
// Element Types
// ================================================================================================

/// Scalar element type of a shaped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Boolean, stored as one byte.
    I1,
    I8,
    I16,
    I32,
    I64,
    UI8,
    UI16,
    UI32,
    UI64,
    F16,
    BF16,
    F32,
    F64,
    /// Target-sized index, stored as eight bytes.
    Index,
}

impl ElementType {
    /// Storage width in bytes.
    pub const fn byte_width(self) -> usize {
        match self {
            ElementType::I1 | ElementType::I8 | ElementType::UI8 => 1,
            ElementType::I16 | ElementType::UI16 | ElementType::F16 | ElementType::BF16 => 2,
            ElementType::I32 | ElementType::UI32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::UI64 | ElementType::F64 | ElementType::Index => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::F16 | ElementType::BF16 | ElementType::F32 | ElementType::F64
        )
    }

    /// Integer types, excluding `i1`.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ElementType::I8
                | ElementType::I16
                | ElementType::I32
                | ElementType::I64
                | ElementType::UI8
                | ElementType::UI16
                | ElementType::UI32
                | ElementType::UI64
                | ElementType::Index
        )
    }

    pub const fn is_bool(self) -> bool {
        matches!(self, ElementType::I1)
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            ElementType::UI8 | ElementType::UI16 | ElementType::UI32 | ElementType::UI64
        )
    }

    fn keyword(self) -> &'static str {
        match self {
            ElementType::I1 => "i1",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::UI8 => "ui8",
            ElementType::UI16 => "ui16",
            ElementType::UI32 => "ui32",
            ElementType::UI64 => "ui64",
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Index => "index",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for ElementType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "i1" => ElementType::I1,
            "i8" | "si8" => ElementType::I8,
            "i16" | "si16" => ElementType::I16,
            "i32" | "si32" => ElementType::I32,
            "i64" | "si64" => ElementType::I64,
            "ui8" => ElementType::UI8,
            "ui16" => ElementType::UI16,
            "ui32" => ElementType::UI32,
            "ui64" => ElementType::UI64,
            "f16" => ElementType::F16,
            "bf16" => ElementType::BF16,
            "f32" => ElementType::F32,
            "f64" => ElementType::F64,
            "index" => ElementType::Index,
            _ => return Err(()),
        })
    }
}

// ================================================================================================
// Shaped Types
// ================================================================================================

/// Static shape plus element type, shared by memrefs and tensors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapedType {
    pub dims: Vec<i64>,
    pub element: ElementType,
}

impl ShapedType {
    pub fn new(dims: impl Into<Vec<i64>>, element: ElementType) -> Self {
        Self {
            dims: dims.into(),
            element,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of the dimensions (1 for rank 0), saturating at `usize::MAX`.
    pub fn num_elements(&self) -> usize {
        self.dims
            .iter()
            .fold(1usize, |count, &d| count.saturating_mul(d.max(0) as usize))
    }

    /// Saturates like [`num_elements`](Self::num_elements).
    pub fn byte_size(&self) -> usize {
        self.num_elements().saturating_mul(self.element.byte_width())
    }

    /// Parse the body of `memref<...>` / `tensor<...>`, e.g. `4x5xf32`.
    pub fn parse_body(body: &str) -> Result<Self, String> {
        let mut rest = body.trim();
        let mut dims = Vec::new();

        loop {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits > 0 && rest[digits..].starts_with('x') {
                let dim = rest[..digits]
                    .parse::<i64>()
                    .map_err(|e| format!("invalid dimension '{}': {e}", &rest[..digits]))?;
                dims.push(dim);
                rest = &rest[digits + 1..];
            } else if rest.starts_with('?') {
                return Err("dynamic dimensions are not supported".to_string());
            } else {
                break;
            }
        }

        let element = rest
            .parse::<ElementType>()
            .map_err(|_| format!("unknown element type '{rest}'"))?;
        Ok(Self { dims, element })
    }
}

impl fmt::Display for ShapedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.dims {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}", self.element)
    }
}

// ================================================================================================
// Types
// ================================================================================================

/// Type of an SSA value or attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ElementType),
    /// Buffer in device memory.
    MemRef(ShapedType),
    /// Immutable value, only meaningful inside fusion regions.
    Tensor(ShapedType),
    None,
}

impl Type {
    pub fn memref(dims: impl Into<Vec<i64>>, element: ElementType) -> Self {
        Type::MemRef(ShapedType::new(dims, element))
    }

    pub fn tensor(dims: impl Into<Vec<i64>>, element: ElementType) -> Self {
        Type::Tensor(ShapedType::new(dims, element))
    }

    pub fn as_shaped(&self) -> Option<&ShapedType> {
        match self {
            Type::MemRef(shaped) | Type::Tensor(shaped) => Some(shaped),
            _ => None,
        }
    }

    pub fn as_memref(&self) -> Option<&ShapedType> {
        match self {
            Type::MemRef(shaped) => Some(shaped),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&ShapedType> {
        match self {
            Type::Tensor(shaped) => Some(shaped),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            Type::Scalar(element) => Some(*element),
            Type::MemRef(shaped) | Type::Tensor(shaped) => Some(shaped.element),
            Type::None => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(element) => write!(f, "{element}"),
            Type::MemRef(shaped) => write!(f, "memref<{shaped}>"),
            Type::Tensor(shaped) => write!(f, "tensor<{shaped}>"),
            Type::None => write!(f, "none"),
        }
    }
}
