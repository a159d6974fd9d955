//! Structural verification
//!
//! Checks that hold for every well-formed module regardless of dialect:
//! unique function names, terminated regions, values defined before use.
//! Modules from the parser already satisfy the value rules; modules built in
//! code may not.

use std::collections::HashSet;

use crate::ir::{Function, Module, Region, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("function '@{0}' is defined more than once")]
    DuplicateFunction(String),

    #[error("region in '@{function}' does not end with a terminator")]
    MissingTerminator { function: String },

    #[error("terminator '{op}' in '@{function}' is not the last operation of its region")]
    MisplacedTerminator { op: String, function: String },

    #[error("'{op}' in '@{function}' uses value #{value} before it is defined")]
    UseBeforeDefinition { op: String, function: String, value: usize },

    #[error("'{op}' in '@{function}' refers to value #{value} outside the function's value table")]
    UnknownValue { op: String, function: String, value: usize },
}

/// Verify a whole module.
///
/// # Errors
///
/// Returns the first violation found, in function order.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let mut names = HashSet::new();
    for function in &module.functions {
        if !names.insert(function.name.as_str()) {
            return Err(VerifyError::DuplicateFunction(function.name.clone()));
        }
        verify_function(function)?;
    }
    Ok(())
}

pub fn verify_function(function: &Function) -> Result<(), VerifyError> {
    let mut defined: HashSet<Value> = function.arguments.iter().map(|arg| arg.value).collect();
    verify_region(function, &function.body, &mut defined)
}

fn verify_region(function: &Function, region: &Region, defined: &mut HashSet<Value>) -> Result<(), VerifyError> {
    let count = region.operations.len();
    if region.terminator().is_none() {
        return Err(VerifyError::MissingTerminator {
            function: function.name.clone(),
        });
    }

    for (i, op) in region.operations.iter().enumerate() {
        if op.is_terminator() && i + 1 != count {
            return Err(VerifyError::MisplacedTerminator {
                op: op.name.to_string(),
                function: function.name.clone(),
            });
        }

        for &operand in &op.operands {
            if function.value_info(operand).is_none() {
                return Err(VerifyError::UnknownValue {
                    op: op.name.to_string(),
                    function: function.name.clone(),
                    value: operand.index(),
                });
            }
            if !defined.contains(&operand) {
                return Err(VerifyError::UseBeforeDefinition {
                    op: op.name.to_string(),
                    function: function.name.clone(),
                    value: operand.index(),
                });
            }
        }

        for nested in &op.regions {
            verify_region(function, nested, defined)?;
        }

        for &result in &op.results {
            if function.value_info(result).is_none() {
                return Err(VerifyError::UnknownValue {
                    op: op.name.to_string(),
                    function: function.name.clone(),
                    value: result.index(),
                });
            }
            defined.insert(result);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, DialectSet};

    fn parse(text: &str) -> Module {
        Context::new(DialectSet::gpu_lowering()).parse_source_string(text).unwrap()
    }

    #[test]
    fn accepts_terminated_module() {
        let module = parse(
            r#"func @main(%a: memref<1xi8>, %b: memref<1xi8>) {
                 "lmhlo.copy"(%a, %b) : (memref<1xi8>, memref<1xi8>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }"#,
        );
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn missing_terminator() {
        let module = parse(r#"func @main(%a: memref<1xi8>) { "lmhlo.copy"(%a, %a) : (memref<1xi8>, memref<1xi8>) -> () }"#);
        assert!(matches!(verify_module(&module), Err(VerifyError::MissingTerminator { .. })));

        let empty = parse("func @main() {}");
        assert!(matches!(verify_module(&empty), Err(VerifyError::MissingTerminator { .. })));
    }

    #[test]
    fn terminator_in_the_middle() {
        let module = parse("func @main() { return return }");
        assert!(matches!(verify_module(&module), Err(VerifyError::MisplacedTerminator { .. })));
    }

    #[test]
    fn fusion_region_needs_its_own_terminator() {
        let module = parse(
            r#"func @main() {
                 "lmhlo.fusion"() ({
                 }) : () -> ()
                 return
               }"#,
        );
        assert!(matches!(verify_module(&module), Err(VerifyError::MissingTerminator { .. })));
    }
}
