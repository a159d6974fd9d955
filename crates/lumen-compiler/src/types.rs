//! Mapping between IR element types, device shapes and ISA types

use lumen_backends::isa::Type;
use lumen_backends::{PrimitiveType, Shape};
use lumen_ir::{ElementType, ShapedType};

/// Storage type of `element` in device memory.
pub fn primitive_type(element: ElementType) -> PrimitiveType {
    match element {
        ElementType::I1 => PrimitiveType::Pred,
        ElementType::I8 => PrimitiveType::S8,
        ElementType::I16 => PrimitiveType::S16,
        ElementType::I32 => PrimitiveType::S32,
        ElementType::I64 | ElementType::Index => PrimitiveType::S64,
        ElementType::UI8 => PrimitiveType::U8,
        ElementType::UI16 => PrimitiveType::U16,
        ElementType::UI32 => PrimitiveType::U32,
        ElementType::UI64 => PrimitiveType::U64,
        ElementType::F16 => PrimitiveType::F16,
        ElementType::BF16 => PrimitiveType::BF16,
        ElementType::F32 => PrimitiveType::F32,
        ElementType::F64 => PrimitiveType::F64,
    }
}

/// Register type kernels use for `element`.
pub fn isa_type(element: ElementType) -> Type {
    match element {
        ElementType::I1 => Type::PRED,
        ElementType::I8 => Type::I8,
        ElementType::I16 => Type::I16,
        ElementType::I32 => Type::I32,
        ElementType::I64 | ElementType::Index => Type::I64,
        ElementType::UI8 => Type::U8,
        ElementType::UI16 => Type::U16,
        ElementType::UI32 => Type::U32,
        ElementType::UI64 => Type::U64,
        ElementType::F16 => Type::F16,
        ElementType::BF16 => Type::BF16,
        ElementType::F32 => Type::F32,
        ElementType::F64 => Type::F64,
    }
}

/// Array shape of a static memref or tensor type.
///
/// Returns `None` when a dimension is dynamic.
pub fn shape_of(shaped: &ShapedType) -> Option<Shape> {
    let dimensions = shaped
        .dims
        .iter()
        .map(|&d| usize::try_from(d).ok())
        .collect::<Option<Vec<usize>>>()?;
    Some(Shape::array(primitive_type(shaped.element), dimensions))
}
