//! Parsing context: which dialects are loaded and how unknown ones are treated.

use crate::dialect::{Dialect, DialectSet};
use crate::ir::Module;
use crate::parser::{ParseError, Parser};

/// Dialect registry used to parse (or build) modules.
///
/// Operations from namespaces outside the loaded set parse as opaque
/// operations unless [`Context::set_allow_unregistered_dialects`] turns that
/// off; the compiler decides what to do with them later.
#[derive(Debug, Clone)]
pub struct Context {
    dialects: DialectSet,
    allow_unregistered_dialects: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DialectSet::empty())
    }
}

impl Context {
    pub fn new(dialects: DialectSet) -> Self {
        Self {
            dialects,
            allow_unregistered_dialects: true,
        }
    }

    pub fn load_dialect(&mut self, dialect: Dialect) {
        self.dialects.insert(dialect);
    }

    pub fn dialects(&self) -> DialectSet {
        self.dialects
    }

    pub fn set_allow_unregistered_dialects(&mut self, allow: bool) {
        self.allow_unregistered_dialects = allow;
    }

    pub fn allows_unregistered_dialects(&self) -> bool {
        self.allow_unregistered_dialects
    }

    pub fn is_registered_namespace(&self, namespace: &str) -> bool {
        self.dialects.contains_namespace(namespace)
    }

    /// Parse textual IR into a module owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] with the line and column of the first problem.
    #[tracing::instrument(skip_all, fields(bytes = text.len(), dialects = %self.dialects))]
    pub fn parse_source_string(&self, text: &str) -> Result<Module, ParseError> {
        let module = Parser::new(text, self)?.parse_module()?;
        tracing::debug!(
            module = module.name.as_deref().unwrap_or("<anonymous>"),
            functions = module.functions.len(),
            "module_parsed"
        );
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_dialect_extends_registry() {
        let mut context = Context::default();
        assert!(!context.is_registered_namespace("lmhlo"));
        context.load_dialect(Dialect::Lmhlo);
        assert!(context.is_registered_namespace("lmhlo"));
        assert!(context.allows_unregistered_dialects());
    }

    #[test]
    fn parsed_module_records_context_dialects() {
        let context = Context::new(DialectSet::gpu_lowering().without(Dialect::Mhlo));
        let module = context.parse_source_string("func @main() { return }").unwrap();
        assert_eq!(module.dialects(), context.dialects());
    }
}
