//! Textual form of modules
//!
//! Modules print in the generic operation form accepted by the parser, so
//! `context.parse_source_string(&module.to_string())` yields an equivalent module (source locations aside).

use std::fmt::{self, Write};

use crate::attributes::write_escaped;
use crate::ir::{Function, Module, Operation, Region, Value};

const INDENT: &str = "  ";

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("module")?;
        if let Some(name) = &self.name {
            f.write_str(" ")?;
            write_symbol(f, name)?;
        }
        if !self.attributes.is_empty() {
            write!(f, " attributes {}", self.attributes)?;
        }
        f.write_str(" {\n")?;
        for function in &self.functions {
            write_function(f, function)?;
        }
        f.write_str("}\n")
    }
}

fn write_symbol(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    f.write_char('@')?;
    let bare = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));
    if bare {
        f.write_str(name)
    } else {
        write_escaped(f, name)
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, function: &Function) -> fmt::Result {
    write!(f, "{INDENT}func ")?;
    write_symbol(f, &function.name)?;
    f.write_char('(')?;
    for (i, argument) in function.arguments.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        let info = &function.values()[argument.value.index()];
        write!(f, "%{}: {}", info.name, info.ty)?;
        if !argument.attributes.is_empty() {
            write!(f, " {}", argument.attributes)?;
        }
    }
    f.write_char(')')?;

    if !function.result_types.is_empty() {
        f.write_str(" -> (")?;
        write_comma_separated(f, function.result_types.iter())?;
        f.write_char(')')?;
    }
    if !function.attributes.is_empty() {
        write!(f, " attributes {}", function.attributes)?;
    }

    f.write_char(' ')?;
    write_region(f, function, &function.body, 2)?;
    f.write_char('\n')
}

fn write_region(f: &mut fmt::Formatter<'_>, function: &Function, region: &Region, depth: usize) -> fmt::Result {
    f.write_str("{\n")?;
    for op in &region.operations {
        write_operation(f, function, op, depth)?;
    }
    for _ in 0..depth - 1 {
        f.write_str(INDENT)?;
    }
    f.write_char('}')
}

fn write_operation(f: &mut fmt::Formatter<'_>, function: &Function, op: &Operation, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }

    let name_of = |v: &Value| format!("%{}", function.values()[v.index()].name);
    let type_of = |v: &Value| function.values()[v.index()].ty.clone();

    if !op.results.is_empty() {
        write_comma_separated(f, op.results.iter().map(name_of))?;
        f.write_str(" = ")?;
    }

    write!(f, "\"{}\"(", op.name)?;
    write_comma_separated(f, op.operands.iter().map(name_of))?;
    f.write_char(')')?;

    if !op.regions.is_empty() {
        f.write_str(" (")?;
        for (i, region) in op.regions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_region(f, function, region, depth + 1)?;
        }
        f.write_char(')')?;
    }

    if !op.attributes.is_empty() {
        write!(f, " {}", op.attributes)?;
    }

    f.write_str(" : (")?;
    write_comma_separated(f, op.operands.iter().map(type_of))?;
    f.write_str(") -> ")?;
    if op.results.len() == 1 {
        write!(f, "{}", type_of(&op.results[0]))?;
    } else {
        f.write_char('(')?;
        write_comma_separated(f, op.results.iter().map(type_of))?;
        f.write_char(')')?;
    }
    f.write_char('\n')
}

fn write_comma_separated<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item = T>) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
