//! Buffer assignment
//!
//! Every memref argument of the entry function is one device buffer. Its
//! attributes decide who provides it:
//!
//! ```text
//! %arg0: memref<4xf32> {lmhlo.params = 0 : index}                           → parameter 0
//! %arg1: memref<4xf32> {lmhlo.output_index = dense<[1]> : tensor<1xindex>}  → result leaf {1}
//! %arg2: memref<4xf32>                                                      → temporary
//! ```
//!
//! Parameter numbers must be dense from zero. Output indices must describe a
//! well-formed tuple tree; that tree is the executable's result shape.

use std::collections::HashMap;

use lumen_backends::{CompileError, CompileResult, Shape, ShapeIndex};
use lumen_ir::{Argument, Function, ShapedType, Value};

use crate::types::shape_of;

/// Argument attribute carrying the parameter number.
pub const PARAMS_ATTR: &str = "lmhlo.params";
/// Argument attribute carrying the result tuple index.
pub const OUTPUT_INDEX_ATTR: &str = "lmhlo.output_index";

/// Where a buffer comes from at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSlot {
    /// Caller argument, by parameter number
    Parameter(usize),
    /// Result leaf, by position in leaf order
    Output(usize),
    /// Scratch allocated for one execution
    Temp(usize),
}

/// Buffer layout of one entry function.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferAssignment {
    slots: HashMap<Value, BufferSlot>,
    buffer_types: HashMap<Value, ShapedType>,
    parameter_shapes: Vec<Shape>,
    result_shape: Shape,
    output_sizes: Vec<usize>,
    temp_sizes: Vec<usize>,
}

impl BufferAssignment {
    /// Assign the arguments of `function`.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidSignature`] for non-memref or dynamic arguments,
    /// arguments whose byte size overflows `usize`, malformed annotations, and parameter numbers or output indices that do
    /// not form a dense layout.
    pub fn new(function: &Function) -> CompileResult<Self> {
        let invalid = |reason: String| CompileError::InvalidSignature {
            function: function.name.clone(),
            reason,
        };

        let mut buffer_types = HashMap::new();
        let mut parameters: Vec<(usize, Value, Shape)> = Vec::new();
        let mut outputs: Vec<(ShapeIndex, Value, Shape)> = Vec::new();
        let mut temps: Vec<(Value, Shape)> = Vec::new();

        for (position, argument) in function.arguments.iter().enumerate() {
            let memref = function
                .value_type(argument.value)
                .and_then(|ty| ty.as_memref())
                .ok_or_else(|| invalid(format!("argument {position} is not a memref")))?;
            let shape =
                shape_of(memref).ok_or_else(|| invalid(format!("argument {position} has a dynamic shape")))?;
            if shape.checked_byte_size().is_none() {
                return Err(invalid(format!("argument {position} of type {memref} does not fit in memory")));
            }
            buffer_types.insert(argument.value, memref.clone());

            match (parameter_number(argument), output_index(argument)) {
                (Some(_), Some(_)) => {
                    return Err(invalid(format!(
                        "argument {position} is annotated as both a parameter and an output"
                    )));
                }
                (Some(number), None) => {
                    let number = number.map_err(|reason| invalid(format!("argument {position}: {reason}")))?;
                    parameters.push((number, argument.value, shape));
                }
                (None, Some(index)) => {
                    let index = index.map_err(|reason| invalid(format!("argument {position}: {reason}")))?;
                    outputs.push((index, argument.value, shape));
                }
                (None, None) => temps.push((argument.value, shape)),
            }
        }

        let mut slots = HashMap::new();

        parameters.sort_by_key(|(number, _, _)| *number);
        for (expected, (number, value, _)) in parameters.iter().enumerate() {
            if *number != expected {
                return Err(invalid(format!(
                    "parameter numbers must be dense from 0, found {number} where {expected} was expected"
                )));
            }
            slots.insert(*value, BufferSlot::Parameter(expected));
        }
        let parameter_shapes = parameters.into_iter().map(|(_, _, shape)| shape).collect();

        let (result_shape, output_sizes) = if outputs.is_empty() {
            (Shape::tuple(Vec::new()), Vec::new())
        } else {
            let leaves = outputs
                .iter()
                .map(|(index, _, shape)| (index.clone(), shape.clone()))
                .collect();
            let result_shape = Shape::from_leaves(leaves).map_err(|e| invalid(format!("bad output indices: {e}")))?;
            let order = result_shape.leaf_indices();
            let mut sizes = vec![0; order.len()];
            for (index, value, shape) in &outputs {
                let leaf = order
                    .iter()
                    .position(|i| i == index)
                    .ok_or_else(|| invalid(format!("output index {index} is not a leaf")))?;
                sizes[leaf] = shape.byte_size();
                slots.insert(*value, BufferSlot::Output(leaf));
            }
            (result_shape, sizes)
        };

        let temp_sizes = temps
            .iter()
            .enumerate()
            .map(|(i, (value, shape))| {
                slots.insert(*value, BufferSlot::Temp(i));
                shape.byte_size()
            })
            .collect();

        Ok(Self {
            slots,
            buffer_types,
            parameter_shapes,
            result_shape,
            output_sizes,
            temp_sizes,
        })
    }

    /// Slot of an entry argument; `None` for any other value.
    pub fn slot(&self, value: Value) -> Option<BufferSlot> {
        self.slots.get(&value).copied()
    }

    /// Memref type of an entry argument.
    pub fn buffer_type(&self, value: Value) -> Option<&ShapedType> {
        self.buffer_types.get(&value)
    }

    pub fn parameter_shapes(&self) -> &[Shape] {
        &self.parameter_shapes
    }

    pub fn result_shape(&self) -> &Shape {
        &self.result_shape
    }

    /// Byte size of each result leaf, in leaf order.
    pub fn output_sizes(&self) -> &[usize] {
        &self.output_sizes
    }

    pub fn temp_sizes(&self) -> &[usize] {
        &self.temp_sizes
    }
}

fn parameter_number(argument: &Argument) -> Option<Result<usize, String>> {
    let attribute = argument.attributes.get(PARAMS_ATTR)?;
    Some(match attribute.as_integer() {
        Some(number) => usize::try_from(number).map_err(|_| format!("negative {PARAMS_ATTR} {number}")),
        None => Err(format!("{PARAMS_ATTR} must be an integer, got {attribute}")),
    })
}

fn output_index(argument: &Argument) -> Option<Result<ShapeIndex, String>> {
    let attribute = argument.attributes.get(OUTPUT_INDEX_ATTR)?;
    Some(match attribute.as_index_list() {
        Some(list) => list
            .into_iter()
            .map(|position| {
                usize::try_from(position).map_err(|_| format!("negative position {position} in {OUTPUT_INDEX_ATTR}"))
            })
            .collect::<Result<Vec<usize>, String>>()
            .map(ShapeIndex),
        None => Err(format!("{OUTPUT_INDEX_ATTR} must be an index list, got {attribute}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_backends::PrimitiveType;
    use lumen_ir::{Context, DialectSet};

    fn entry(text: &str) -> Function {
        let module = Context::new(DialectSet::gpu_lowering()).parse_source_string(text).unwrap();
        module.function("main").unwrap().clone()
    }

    #[test]
    fn test_parameters_outputs_and_temps() {
        let function = entry(
            r#"func @main(%out: memref<2xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>},
                          %b: memref<2xf32> {lmhlo.params = 1 : index},
                          %tmp: memref<3xi8>,
                          %a: memref<2xf32> {lmhlo.params = 0 : index}) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        let assignment = BufferAssignment::new(&function).unwrap();
        let args: Vec<Value> = function.arguments.iter().map(|a| a.value).collect();

        assert_eq!(assignment.slot(args[0]), Some(BufferSlot::Output(0)));
        assert_eq!(assignment.slot(args[1]), Some(BufferSlot::Parameter(1)));
        assert_eq!(assignment.slot(args[2]), Some(BufferSlot::Temp(0)));
        assert_eq!(assignment.slot(args[3]), Some(BufferSlot::Parameter(0)));
        assert_eq!(assignment.parameter_shapes().len(), 2);
        assert_eq!(
            assignment.result_shape(),
            &Shape::tuple(vec![Shape::array(PrimitiveType::F32, vec![2])])
        );
        assert_eq!(assignment.output_sizes(), &[8]);
        assert_eq!(assignment.temp_sizes(), &[3]);
    }

    #[test]
    fn test_output_leaves_follow_tuple_order() {
        let function = entry(
            r#"func @main(%second: memref<4xi8> {lmhlo.output_index = dense<[1]> : tensor<1xindex>},
                          %first: memref<2xi32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        let assignment = BufferAssignment::new(&function).unwrap();
        let args: Vec<Value> = function.arguments.iter().map(|a| a.value).collect();
        assert_eq!(assignment.slot(args[0]), Some(BufferSlot::Output(1)));
        assert_eq!(assignment.slot(args[1]), Some(BufferSlot::Output(0)));
        assert_eq!(assignment.output_sizes(), &[8, 4]);
    }

    #[test]
    fn test_gap_in_parameter_numbers() {
        let function = entry(
            r#"func @main(%a: memref<1xi8> {lmhlo.params = 0 : index}, %b: memref<1xi8> {lmhlo.params = 2 : index}) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        let err = BufferAssignment::new(&function).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSignature { .. }), "{err}");
    }

    #[test]
    fn test_conflicting_output_indices() {
        let function = entry(
            r#"func @main(%a: memref<1xi8> {lmhlo.output_index = dense<[0]> : tensor<1xindex>},
                          %b: memref<1xi8> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        assert!(matches!(
            BufferAssignment::new(&function),
            Err(CompileError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_oversized_argument() {
        let function = entry(
            r#"func @main(%a: memref<4294967296x4294967296xf32> {lmhlo.params = 0 : index}) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        let err = BufferAssignment::new(&function).unwrap_err();
        assert!(err.to_string().contains("does not fit in memory"), "{err}");
    }

    #[test]
    fn test_no_outputs_is_empty_tuple() {
        let function = entry(
            r#"func @main(%a: memref<1xi8> {lmhlo.params = 0 : index}) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        let assignment = BufferAssignment::new(&function).unwrap();
        assert_eq!(assignment.result_shape(), &Shape::tuple(Vec::new()));
        assert!(assignment.output_sizes().is_empty());
    }
}
