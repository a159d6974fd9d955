//! Module and function builders
//!
//! Fluent construction of structured modules without going through text.
//!
//! ## Example
//!
//! ```
//! use lumen_ir::{Attribute, Attributes, Context, DialectSet, ElementType, FunctionBuilder, ModuleBuilder, Type};
//!
//! let context = Context::new(DialectSet::gpu_lowering());
//! let buffer = Type::memref([4], ElementType::I8);
//!
//! let mut main = FunctionBuilder::new("main");
//! let input = main.argument_with_attributes(buffer.clone(), Attributes::new().with("lmhlo.params", Attribute::index(0)));
//! let output = main.argument(buffer);
//! main.op("lmhlo.copy", &[input, output], Vec::new(), Attributes::new());
//! main.terminator("lmhlo.terminator");
//!
//! let module = ModuleBuilder::new(&context).function(main.build()).build();
//! assert_eq!(module.functions[0].body.operations.len(), 2);
//! ```

use crate::attributes::Attributes;
use crate::context::Context;
use crate::dialect::DialectSet;
use crate::ir::{Argument, Function, Module, Operation, OperationName, Region, Value, ValueInfo};
use crate::types::Type;

/// Builder for [`Module`].
#[derive(Debug)]
pub struct ModuleBuilder {
    name: Option<String>,
    attributes: Attributes,
    dialects: DialectSet,
    functions: Vec<Function>,
}

impl ModuleBuilder {
    /// Start a module in `context`; the module records the context's dialects.
    pub fn new(context: &Context) -> Self {
        Self {
            name: None,
            attributes: Attributes::new(),
            dialects: context.dialects(),
            functions: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    pub fn build(self) -> Module {
        let mut module = Module::new(self.name, self.dialects);
        module.attributes = self.attributes;
        module.functions = self.functions;
        module
    }
}

/// Builder for [`Function`].
///
/// Operations are appended to the innermost open region; [`FunctionBuilder::op_with_region`]
/// opens a nested one for the duration of its closure.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    arguments: Vec<Argument>,
    result_types: Vec<Type>,
    attributes: Attributes,
    values: Vec<ValueInfo>,
    regions: Vec<Region>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            result_types: Vec::new(),
            attributes: Attributes::new(),
            values: Vec::new(),
            regions: vec![Region::default()],
        }
    }

    fn define(&mut self, name: String, ty: Type) -> Value {
        let value = Value(self.values.len() as u32);
        self.values.push(ValueInfo { name, ty });
        value
    }

    pub fn argument(&mut self, ty: Type) -> Value {
        self.argument_with_attributes(ty, Attributes::new())
    }

    pub fn argument_with_attributes(&mut self, ty: Type, attributes: Attributes) -> Value {
        let value = self.define(format!("arg{}", self.arguments.len()), ty);
        self.arguments.push(Argument { value, attributes });
        value
    }

    pub fn result_types(&mut self, types: Vec<Type>) -> &mut Self {
        self.result_types = types;
        self
    }

    pub fn attributes(&mut self, attributes: Attributes) -> &mut Self {
        self.attributes = attributes;
        self
    }

    /// Type of a value created by this builder.
    pub fn value_type(&self, value: Value) -> Option<&Type> {
        self.values.get(value.index()).map(|info| &info.ty)
    }

    /// Append an operation and return its results.
    pub fn op(
        &mut self,
        name: impl Into<OperationName>,
        operands: &[Value],
        result_types: Vec<Type>,
        attributes: Attributes,
    ) -> Vec<Value> {
        self.push(name.into(), operands, result_types, attributes, Vec::new())
    }

    /// Append an operation with one region populated by `build_region`.
    pub fn op_with_region(
        &mut self,
        name: impl Into<OperationName>,
        operands: &[Value],
        attributes: Attributes,
        build_region: impl FnOnce(&mut Self),
    ) {
        self.regions.push(Region::default());
        build_region(self);
        let region = self.regions.pop().unwrap_or_default();
        self.push(name.into(), operands, Vec::new(), attributes, vec![region]);
    }

    /// Append an operand-less, result-less terminator such as `lmhlo.terminator`.
    pub fn terminator(&mut self, name: impl Into<OperationName>) {
        self.op(name, &[], Vec::new(), Attributes::new());
    }

    fn push(
        &mut self,
        name: OperationName,
        operands: &[Value],
        result_types: Vec<Type>,
        attributes: Attributes,
        regions: Vec<Region>,
    ) -> Vec<Value> {
        let results: Vec<Value> = result_types
            .into_iter()
            .map(|ty| {
                let index = self.values.len() - self.arguments.len();
                self.define(index.to_string(), ty)
            })
            .collect();

        let op = Operation {
            name,
            operands: operands.to_vec(),
            results: results.clone(),
            attributes,
            regions,
            location: None,
        };
        if let Some(region) = self.regions.last_mut() {
            region.operations.push(op);
        }
        results
    }

    pub fn build(mut self) -> Function {
        let body = self.regions.drain(..).next().unwrap_or_default();
        Function {
            name: self.name,
            arguments: self.arguments,
            result_types: self.result_types,
            attributes: self.attributes,
            body,
            values: self.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectSet;
    use crate::types::ElementType;
    use crate::verify::verify_module;

    #[test]
    fn nested_region_collects_inner_ops() {
        let tensor = Type::tensor([2], ElementType::F32);
        let memref = Type::memref([2], ElementType::F32);

        let mut f = FunctionBuilder::new("main");
        let a = f.argument(memref.clone());
        let b = f.argument(memref);
        f.op_with_region("lmhlo.fusion", &[], Attributes::new(), |f| {
            let loaded = f.op("std.tensor_load", &[a], vec![tensor.clone()], Attributes::new());
            let sum = f.op("mhlo.add", &[loaded[0], loaded[0]], vec![tensor.clone()], Attributes::new());
            f.op("std.tensor_store", &[sum[0], b], Vec::new(), Attributes::new());
            f.terminator("lmhlo.terminator");
        });
        f.terminator("lmhlo.terminator");
        let function = f.build();

        assert_eq!(function.body.operations.len(), 2);
        assert_eq!(function.body.operations[0].regions[0].operations.len(), 4);
        assert_eq!(function.values()[2].name, "0");
        assert_eq!(function.values()[3].name, "1");

        let context = Context::new(DialectSet::gpu_lowering());
        let module = ModuleBuilder::new(&context).name("fused").function(function).build();
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn built_module_prints_and_reparses() {
        let context = Context::new(DialectSet::gpu_lowering());
        let mut f = FunctionBuilder::new("main");
        let a = f.argument(Type::memref([3], ElementType::I32));
        let b = f.argument(Type::memref([3], ElementType::I32));
        f.op("lmhlo.copy", &[a, b], Vec::new(), Attributes::new());
        f.terminator("lmhlo.terminator");
        let module = ModuleBuilder::new(&context).function(f.build()).build();

        let reparsed = context.parse_source_string(&module.to_string()).unwrap();
        assert_eq!(reparsed.to_string(), module.to_string());
    }
}
