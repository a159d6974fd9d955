//! Module, function and operation data model
//!
//! Functions own a value table: every SSA value (argument or op result) is a
//! [`Value`] index into it, carrying its printed name and type. Regions hold
//! a single block of operations.

use std::fmt;

use crate::attributes::Attributes;
use crate::dialect::{Dialect, DialectSet};
use crate::types::Type;

/// Source position (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// SSA value handle, local to a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub(crate) u32);

impl Value {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Name and type of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub ty: Type,
}

/// `namespace.op`, e.g. `lmhlo.copy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationName {
    namespace: String,
    op: String,
}

impl OperationName {
    pub fn new(namespace: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            op: op.into(),
        }
    }

    /// Split a full name at its first `.`; `None` when there is no namespace.
    pub fn parse(full: &str) -> Option<Self> {
        let (namespace, op) = full.split_once('.')?;
        (!namespace.is_empty() && !op.is_empty()).then(|| Self::new(namespace, op))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn is(&self, namespace: &str, op: &str) -> bool {
        self.namespace == namespace && self.op == op
    }

    /// Known dialect of this op, regardless of whether it is loaded.
    pub fn dialect(&self) -> Option<Dialect> {
        Dialect::from_namespace(&self.namespace)
    }
}

impl From<&str> for OperationName {
    fn from(full: &str) -> Self {
        Self::parse(full).unwrap_or_else(|| Self::new("", full))
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.op)
        } else {
            write!(f, "{}.{}", self.namespace, self.op)
        }
    }
}

const TERMINATORS: [(&str, &str); 3] = [("std", "return"), ("lmhlo", "terminator"), ("mhlo", "return")];

/// A generic operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: OperationName,
    pub operands: Vec<Value>,
    pub results: Vec<Value>,
    pub attributes: Attributes,
    pub regions: Vec<Region>,
    pub location: Option<Location>,
}

impl Operation {
    pub fn is_terminator(&self) -> bool {
        TERMINATORS.iter().any(|(ns, op)| self.name.is(ns, op))
    }
}

/// Single-block region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub operations: Vec<Operation>,
}

impl Region {
    pub fn terminator(&self) -> Option<&Operation> {
        self.operations.last().filter(|op| op.is_terminator())
    }
}

/// Entry argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub value: Value,
    pub attributes: Attributes,
}

/// A function: arguments, optional results, one body region.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub result_types: Vec<Type>,
    pub attributes: Attributes,
    pub body: Region,
    pub(crate) values: Vec<ValueInfo>,
}

impl Function {
    pub fn value_info(&self, value: Value) -> Option<&ValueInfo> {
        self.values.get(value.index())
    }

    /// Type of `value`. Values always come from this function's table.
    pub fn value_type(&self, value: Value) -> Option<&Type> {
        self.value_info(value).map(|info| &info.ty)
    }

    pub fn values(&self) -> &[ValueInfo] {
        &self.values
    }

    pub fn argument_types(&self) -> impl Iterator<Item = &Type> {
        self.arguments.iter().filter_map(|arg| self.value_type(arg.value))
    }

    /// Every operation in program order, including nested regions.
    pub fn walk(&self) -> Vec<&Operation> {
        fn visit<'a>(region: &'a Region, out: &mut Vec<&'a Operation>) {
            for op in &region.operations {
                out.push(op);
                for nested in &op.regions {
                    visit(nested, out);
                }
            }
        }
        let mut out = Vec::new();
        visit(&self.body, &mut out);
        out
    }
}

/// Top-level container. Remembers the dialects of the context it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: Option<String>,
    pub attributes: Attributes,
    pub functions: Vec<Function>,
    pub(crate) dialects: DialectSet,
}

impl Module {
    pub fn new(name: Option<String>, dialects: DialectSet) -> Self {
        Self {
            name,
            attributes: Attributes::new(),
            functions: Vec::new(),
            dialects,
        }
    }

    pub fn dialects(&self) -> DialectSet {
        self.dialects
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// True when the op's namespace is loaded in this module's context.
    pub fn is_registered(&self, name: &OperationName) -> bool {
        self.dialects.contains_namespace(name.namespace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_name_splits_at_first_dot() {
        let name = OperationName::parse("lmhlo_gpu.gemm").unwrap();
        assert_eq!(name.namespace(), "lmhlo_gpu");
        assert_eq!(name.op(), "gemm");
        assert_eq!(name.dialect(), Some(Dialect::LmhloGpu));

        let nested = OperationName::parse("foo.bar.baz").unwrap();
        assert_eq!(nested.op(), "bar.baz");
        assert_eq!(nested.dialect(), None);
    }

    #[test]
    fn operation_name_requires_namespace() {
        assert!(OperationName::parse("copy").is_none());
        assert!(OperationName::parse(".copy").is_none());
        assert_eq!(OperationName::from("copy").to_string(), "copy");
    }

    #[test]
    fn registration_follows_module_dialects() {
        let module = Module::new(None, DialectSet::empty().with(Dialect::Lmhlo));
        assert!(module.is_registered(&"lmhlo.copy".into()));
        assert!(!module.is_registered(&"mhlo.add".into()));
        assert!(!module.is_registered(&"foo.bar".into()));
    }
}
