//! Recursive descent parser for the textual IR form
//!
//! ## Grammar
//!
//! ```text
//! <module>     ::= "module" [ <symbol> ] [ "attributes" <attr-dict> ] "{" <func>* "}"
//!                | <func>*
//! <func>       ::= ("func" | "func.func") <symbol> "(" [ <arg> { "," <arg> } ] ")"
//!                  [ "->" <type-list> ] [ "attributes" <attr-dict> ] <region>
//! <arg>        ::= <value-id> ":" <type> [ <attr-dict> ]
//! <region>     ::= "{" <op>* "}"
//! <op>         ::= [ <value-id> { "," <value-id> } "=" ] <generic-op> | "return" [ <operands> ":" <types> ]
//! <generic-op> ::= <string> "(" [ <value-id> { "," <value-id> } ] ")"
//!                  [ "(" <region> { "," <region> } ")" ] [ <attr-dict> ]
//!                  ":" "(" <types> ")" "->" ( <type> | "(" <types> ")" )
//! <attr-dict>  ::= "{" [ <name> [ "=" <attr> ] { "," ... } ] "}"
//! <attr>       ::= <int> [ ":" <type> ] | <float> [ ":" <type> ] | "true" | "false" | "unit"
//!                | <string> | "[" <attr>,* "]" | "dense" "<" <scalar> | "[" ... "]" ">" ":" <type> | <type>
//! ```
//!
//! ## Example
//!
//! ```
//! use lumen_ir::{Context, DialectSet};
//!
//! let context = Context::new(DialectSet::gpu_lowering());
//! let module = context
//!     .parse_source_string(
//!         r#"func @main(%a: memref<4xi8>, %b: memref<4xi8>) {
//!              "lmhlo.copy"(%a, %b) : (memref<4xi8>, memref<4xi8>) -> ()
//!              "lmhlo.terminator"() : () -> ()
//!            }"#,
//!     )
//!     .unwrap();
//! assert_eq!(module.functions[0].body.operations.len(), 2);
//! ```

use std::collections::HashMap;

use crate::attributes::{Attribute, Attributes, DenseElements, DenseValues, Scalar};
use crate::context::Context;
use crate::ir::{Argument, Function, Location, Module, Operation, OperationName, Region, Value, ValueInfo};
use crate::lexer::{tokenize, ShapedKind, Token, TokenKind};
use crate::types::{ElementType, ShapedType, Type};

/// Errors produced while lexing or parsing textual IR.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("{location}: unexpected character '{ch}'")]
    UnexpectedCharacter { ch: char, location: Location },

    #[error("{location}: unterminated string literal")]
    UnterminatedString { location: Location },

    #[error("{location}: invalid numeric literal '{text}'")]
    InvalidNumber { text: String, location: Location },

    #[error("{location}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        location: Location,
    },

    #[error("{location}: unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String, location: Location },

    #[error("{location}: use of undefined value '%{name}'")]
    UndefinedValue { name: String, location: Location },

    #[error("{location}: redefinition of value '%{name}'")]
    RedefinedValue { name: String, location: Location },

    #[error("{location}: redefinition of function '@{name}'")]
    RedefinedFunction { name: String, location: Location },

    #[error("{location}: invalid operation name '{name}', expected 'dialect.op'")]
    InvalidOperationName { name: String, location: Location },

    #[error("{location}: operation '{name}' belongs to unregistered dialect '{namespace}'")]
    UnregisteredDialect {
        name: String,
        namespace: String,
        location: Location,
    },

    #[error("{location}: invalid type '{text}': {reason}")]
    InvalidType {
        text: String,
        reason: String,
        location: Location,
    },

    #[error("{location}: invalid attribute: {reason}")]
    InvalidAttribute { reason: String, location: Location },

    #[error("{location}: '{op}' has {found} {what} but {expected} types were given")]
    CountMismatch {
        op: String,
        what: &'static str,
        expected: usize,
        found: usize,
        location: Location,
    },

    #[error("{location}: '%{name}' has type {declared} but is used as {used}")]
    TypeMismatch {
        name: String,
        declared: Type,
        used: Type,
        location: Location,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// SSA names visible inside one function.
#[derive(Default)]
struct FunctionScope {
    values: Vec<ValueInfo>,
    names: HashMap<String, Value>,
}

impl FunctionScope {
    fn define(&mut self, name: String, ty: Type, location: Location) -> ParseResult<Value> {
        if self.names.contains_key(&name) {
            return Err(ParseError::RedefinedValue { name, location });
        }
        let value = Value(self.values.len() as u32);
        self.names.insert(name.clone(), value);
        self.values.push(ValueInfo { name, ty });
        Ok(value)
    }

    fn lookup(&self, name: &str, location: Location) -> ParseResult<Value> {
        self.names.get(name).copied().ok_or_else(|| ParseError::UndefinedValue {
            name: name.to_string(),
            location,
        })
    }

    fn type_of(&self, value: Value) -> &Type {
        &self.values[value.index()].ty
    }
}

/// Parser state
pub(crate) struct Parser<'c> {
    tokens: Vec<Token>,
    position: usize,
    context: &'c Context,
}

impl<'c> Parser<'c> {
    pub(crate) fn new(source: &str, context: &'c Context) -> ParseResult<Self> {
        Ok(Parser {
            tokens: tokenize(source)?,
            position: 0,
            context,
        })
    }

    // ============================================================================================
    // Token helpers
    // ============================================================================================

    fn peek(&self) -> &Token {
        // `tokenize` always ends the stream with Eof and `advance` never moves past it.
        &self.tokens[self.position]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.position].clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::BareId(w) if w == word)
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Location> {
        if self.check(&kind) {
            Ok(self.advance().location)
        } else {
            Err(unexpected(self.peek(), &kind.to_string()))
        }
    }

    // ============================================================================================
    // Module and functions
    // ============================================================================================

    pub(crate) fn parse_module(mut self) -> ParseResult<Module> {
        let mut module = Module::new(None, self.context.dialects());

        if self.is_keyword("module") {
            self.advance();
            if let TokenKind::SymbolRef(name) = &self.peek().kind {
                module.name = Some(name.clone());
                self.advance();
            }
            if self.is_keyword("attributes") {
                self.advance();
                module.attributes = self.parse_attribute_dict()?;
            }
            self.expect(TokenKind::LBrace)?;
            while !self.check(&TokenKind::RBrace) {
                let function = self.parse_function(&module)?;
                module.functions.push(function);
            }
            self.expect(TokenKind::RBrace)?;
        } else {
            while !self.check(&TokenKind::Eof) {
                let function = self.parse_function(&module)?;
                module.functions.push(function);
            }
        }

        self.expect(TokenKind::Eof)?;
        Ok(module)
    }

    fn parse_function(&mut self, module: &Module) -> ParseResult<Function> {
        if !(self.is_keyword("func") || self.is_keyword("func.func")) {
            return Err(unexpected(self.peek(), "'func'"));
        }
        self.advance();

        let token = self.advance();
        let name = match token.kind {
            TokenKind::SymbolRef(name) => name,
            _ => return Err(unexpected(&token, "function name")),
        };
        if module.function(&name).is_some() {
            return Err(ParseError::RedefinedFunction {
                name,
                location: token.location,
            });
        }

        let mut scope = FunctionScope::default();
        let mut arguments = Vec::new();
        self.expect(TokenKind::LParen)?;
        if !self.eat(&TokenKind::RParen) {
            loop {
                let token = self.advance();
                let TokenKind::ValueId(arg_name) = token.kind else {
                    return Err(unexpected(&token, "argument name"));
                };
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                let attributes = if self.check(&TokenKind::LBrace) {
                    self.parse_attribute_dict()?
                } else {
                    Attributes::new()
                };
                let value = scope.define(arg_name, ty, token.location)?;
                arguments.push(Argument { value, attributes });

                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let result_types = if self.eat(&TokenKind::Arrow) {
            if self.eat(&TokenKind::LParen) {
                self.parse_type_list_until_rparen()?
            } else {
                vec![self.parse_type()?]
            }
        } else {
            Vec::new()
        };

        let attributes = if self.is_keyword("attributes") {
            self.advance();
            self.parse_attribute_dict()?
        } else {
            Attributes::new()
        };

        let body = self.parse_region(&mut scope)?;

        Ok(Function {
            name,
            arguments,
            result_types,
            attributes,
            body,
            values: scope.values,
        })
    }

    fn parse_region(&mut self, scope: &mut FunctionScope) -> ParseResult<Region> {
        self.expect(TokenKind::LBrace)?;
        let mut region = Region::default();
        while !self.eat(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(unexpected(self.peek(), "'}' closing region"));
            }
            region.operations.push(self.parse_operation(scope)?);
        }
        Ok(region)
    }

    // ============================================================================================
    // Operations
    // ============================================================================================

    fn parse_operation(&mut self, scope: &mut FunctionScope) -> ParseResult<Operation> {
        let location = self.peek().location;

        let mut result_names = Vec::new();
        if matches!(self.peek().kind, TokenKind::ValueId(_)) {
            loop {
                let token = self.advance();
                match token.kind {
                    TokenKind::ValueId(name) => result_names.push((name, token.location)),
                    _ => return Err(unexpected(&token, "result name")),
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Equal)?;
        }

        if self.is_keyword("return") {
            return self.parse_return(scope, result_names, location);
        }

        let token = self.advance();
        let name = match token.kind {
            TokenKind::String(full) => OperationName::parse(&full).ok_or(ParseError::InvalidOperationName {
                name: full,
                location: token.location,
            })?,
            _ => return Err(unexpected(&token, "operation name")),
        };
        self.check_registered(&name, token.location)?;

        self.expect(TokenKind::LParen)?;
        let operands = self.parse_operand_list(scope, &TokenKind::RParen)?;
        self.expect(TokenKind::RParen)?;

        let mut regions = Vec::new();
        if self.eat(&TokenKind::LParen) {
            loop {
                regions.push(self.parse_region(scope)?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let attributes = if self.check(&TokenKind::LBrace) {
            self.parse_attribute_dict()?
        } else {
            Attributes::new()
        };

        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::LParen)?;
        let operand_types = self.parse_type_list_until_rparen()?;
        self.expect(TokenKind::Arrow)?;
        let result_types = if self.eat(&TokenKind::LParen) {
            self.parse_type_list_until_rparen()?
        } else {
            vec![self.parse_type()?]
        };

        check_operand_types(scope, &name, &operands, &operand_types, location)?;
        let results = define_results(scope, &name, result_names, result_types, location)?;

        Ok(Operation {
            name,
            operands,
            results,
            attributes,
            regions,
            location: Some(location),
        })
    }

    /// `return [%v, ... : types]`, shorthand for `"std.return"`.
    fn parse_return(
        &mut self,
        scope: &mut FunctionScope,
        result_names: Vec<(String, Location)>,
        location: Location,
    ) -> ParseResult<Operation> {
        self.advance();
        let name = OperationName::new("std", "return");
        if let Some((result, result_location)) = result_names.into_iter().next() {
            return Err(ParseError::UnexpectedToken {
                expected: "operation without results".to_string(),
                found: format!("'%{result}'"),
                location: result_location,
            });
        }

        let mut operands = Vec::new();
        if matches!(self.peek().kind, TokenKind::ValueId(_)) {
            operands = self.parse_operand_list(scope, &TokenKind::Colon)?;
            self.expect(TokenKind::Colon)?;
            let mut types = vec![self.parse_type()?];
            while self.eat(&TokenKind::Comma) {
                types.push(self.parse_type()?);
            }
            check_operand_types(scope, &name, &operands, &types, location)?;
        }

        Ok(Operation {
            name,
            operands,
            results: Vec::new(),
            attributes: Attributes::new(),
            regions: Vec::new(),
            location: Some(location),
        })
    }

    fn check_registered(&self, name: &OperationName, location: Location) -> ParseResult<()> {
        if self.context.allows_unregistered_dialects() || self.context.is_registered_namespace(name.namespace()) {
            return Ok(());
        }
        Err(ParseError::UnregisteredDialect {
            name: name.to_string(),
            namespace: name.namespace().to_string(),
            location,
        })
    }

    fn parse_operand_list(&mut self, scope: &FunctionScope, terminator: &TokenKind) -> ParseResult<Vec<Value>> {
        let mut operands = Vec::new();
        if self.check(terminator) {
            return Ok(operands);
        }
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::ValueId(name) => operands.push(scope.lookup(&name, token.location)?),
                _ => return Err(unexpected(&token, "operand")),
            }
            if !self.eat(&TokenKind::Comma) {
                return Ok(operands);
            }
        }
    }

    // ============================================================================================
    // Types
    // ============================================================================================

    fn parse_type(&mut self) -> ParseResult<Type> {
        let token = self.advance();
        match token.kind {
            TokenKind::ShapedType { kind, body } => {
                let shaped = ShapedType::parse_body(&body).map_err(|reason| ParseError::InvalidType {
                    text: body.clone(),
                    reason,
                    location: token.location,
                })?;
                Ok(match kind {
                    ShapedKind::MemRef => Type::MemRef(shaped),
                    ShapedKind::Tensor => Type::Tensor(shaped),
                })
            }
            TokenKind::BareId(word) if word == "none" => Ok(Type::None),
            TokenKind::BareId(word) => {
                word.parse::<ElementType>()
                    .map(Type::Scalar)
                    .map_err(|_| ParseError::InvalidType {
                        reason: "unknown type".to_string(),
                        text: word,
                        location: token.location,
                    })
            }
            _ => Err(unexpected(&token, "type")),
        }
    }

    /// Types separated by commas, consuming the closing `)`.
    fn parse_type_list_until_rparen(&mut self) -> ParseResult<Vec<Type>> {
        let mut types = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(types);
        }
        loop {
            types.push(self.parse_type()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(types)
    }

    // ============================================================================================
    // Attributes
    // ============================================================================================

    fn parse_attribute_dict(&mut self) -> ParseResult<Attributes> {
        self.expect(TokenKind::LBrace)?;
        let mut attributes = Attributes::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(attributes);
        }
        loop {
            let token = self.advance();
            let key = match token.kind {
                TokenKind::BareId(key) | TokenKind::String(key) => key,
                _ => return Err(unexpected(&token, "attribute name")),
            };
            let value = if self.eat(&TokenKind::Equal) {
                self.parse_attribute()?
            } else {
                Attribute::Unit
            };
            attributes.insert(key, value);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(attributes)
    }

    fn parse_optional_type_suffix(&mut self) -> ParseResult<Option<Type>> {
        if self.eat(&TokenKind::Colon) {
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    fn parse_attribute(&mut self) -> ParseResult<Attribute> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Integer(value) => {
                self.advance();
                let ty = self.parse_optional_type_suffix()?;
                Ok(Attribute::Integer { value, ty })
            }
            TokenKind::Float(value) => {
                self.advance();
                let ty = self.parse_optional_type_suffix()?;
                Ok(Attribute::Float { value, ty })
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Attribute::String(s))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_attribute()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RBracket)?;
                }
                Ok(Attribute::Array(items))
            }
            TokenKind::BareId(word) => match word.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Attribute::Bool(word == "true"))
                }
                "unit" => {
                    self.advance();
                    Ok(Attribute::Unit)
                }
                "dense" => self.parse_dense(),
                _ => Ok(Attribute::Type(self.parse_type()?)),
            },
            TokenKind::ShapedType { .. } => Ok(Attribute::Type(self.parse_type()?)),
            _ => Err(unexpected(&token, "attribute value")),
        }
    }

    fn parse_dense(&mut self) -> ParseResult<Attribute> {
        let location = self.advance().location;
        self.expect(TokenKind::LAngle)?;

        let payload = if self.eat(&TokenKind::RAngle) {
            DenseValues::Elements(Vec::new())
        } else {
            let payload = if self.check(&TokenKind::LBracket) {
                let mut values = Vec::new();
                self.parse_dense_list(&mut values)?;
                DenseValues::Elements(values)
            } else {
                DenseValues::Splat(self.parse_dense_scalar()?)
            };
            self.expect(TokenKind::RAngle)?;
            payload
        };

        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let invalid = |reason: String| ParseError::InvalidAttribute { reason, location };
        let shaped = ty
            .as_shaped()
            .ok_or_else(|| invalid(format!("dense attribute needs a shaped type, found {ty}")))?;

        let element = shaped.element;
        let convert = |scalar: Scalar| -> ParseResult<Scalar> {
            match (scalar, element) {
                (_, e) if e.is_float() => Ok(Scalar::Float(scalar.as_f64())),
                (_, ElementType::I1) => Ok(Scalar::Bool(scalar.as_i64() != 0)),
                (Scalar::Float(v), e) => Err(invalid(format!("float literal {v:?} for integer type {e}"))),
                (_, _) => Ok(Scalar::Int(scalar.as_i64())),
            }
        };

        let values = match payload {
            DenseValues::Splat(scalar) => DenseValues::Splat(convert(scalar)?),
            DenseValues::Elements(values) => {
                if values.len() != shaped.num_elements() {
                    return Err(invalid(format!(
                        "{} elements given for {ty} with {} elements",
                        values.len(),
                        shaped.num_elements()
                    )));
                }
                DenseValues::Elements(values.into_iter().map(convert).collect::<ParseResult<_>>()?)
            }
        };

        Ok(Attribute::Dense(DenseElements { ty, values }))
    }

    /// Nested lists are flattened in row-major order.
    fn parse_dense_list(&mut self, out: &mut Vec<Scalar>) -> ParseResult<()> {
        self.expect(TokenKind::LBracket)?;
        if self.eat(&TokenKind::RBracket) {
            return Ok(());
        }
        loop {
            if self.check(&TokenKind::LBracket) {
                self.parse_dense_list(out)?;
            } else {
                out.push(self.parse_dense_scalar()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(())
    }

    fn parse_dense_scalar(&mut self) -> ParseResult<Scalar> {
        let token = self.advance();
        match token.kind {
            TokenKind::Integer(v) => Ok(Scalar::Int(v)),
            TokenKind::Float(v) => Ok(Scalar::Float(v)),
            TokenKind::BareId(word) if word == "true" => Ok(Scalar::Bool(true)),
            TokenKind::BareId(word) if word == "false" => Ok(Scalar::Bool(false)),
            _ => Err(unexpected(&token, "dense element")),
        }
    }
}

fn unexpected(token: &Token, expected: &str) -> ParseError {
    if token.kind == TokenKind::Eof {
        ParseError::UnexpectedEof {
            expected: expected.to_string(),
            location: token.location,
        }
    } else {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: token.kind.to_string(),
            location: token.location,
        }
    }
}

fn check_operand_types(
    scope: &FunctionScope,
    name: &OperationName,
    operands: &[Value],
    types: &[Type],
    location: Location,
) -> ParseResult<()> {
    if operands.len() != types.len() {
        return Err(ParseError::CountMismatch {
            op: name.to_string(),
            what: "operands",
            expected: types.len(),
            found: operands.len(),
            location,
        });
    }
    for (&operand, ty) in operands.iter().zip(types) {
        let declared = scope.type_of(operand);
        if declared != ty {
            return Err(ParseError::TypeMismatch {
                name: scope.values[operand.index()].name.clone(),
                declared: declared.clone(),
                used: ty.clone(),
                location,
            });
        }
    }
    Ok(())
}

fn define_results(
    scope: &mut FunctionScope,
    name: &OperationName,
    result_names: Vec<(String, Location)>,
    result_types: Vec<Type>,
    location: Location,
) -> ParseResult<Vec<Value>> {
    if result_names.len() != result_types.len() {
        return Err(ParseError::CountMismatch {
            op: name.to_string(),
            what: "results",
            expected: result_types.len(),
            found: result_names.len(),
            location,
        });
    }
    result_names
        .into_iter()
        .zip(result_types)
        .map(|((result, result_location), ty)| scope.define(result, ty, result_location))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, DialectSet};

    fn parse(text: &str) -> ParseResult<Module> {
        Context::new(DialectSet::gpu_lowering()).parse_source_string(text)
    }

    const COPY: &str = r#"
        module @copy {
          func @main(%arg0: memref<4xi8> {lmhlo.params = 0 : index},
                     %arg1: memref<4xi8> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
            "lmhlo.copy"(%arg0, %arg1) : (memref<4xi8>, memref<4xi8>) -> ()
            "lmhlo.terminator"() : () -> ()
          }
        }
    "#;

    #[test]
    fn parse_copy_module() {
        let module = parse(COPY).unwrap();
        assert_eq!(module.name.as_deref(), Some("copy"));
        let main = module.function("main").unwrap();
        assert_eq!(main.arguments.len(), 2);
        assert_eq!(
            main.arguments[0].attributes.get("lmhlo.params").and_then(Attribute::as_integer),
            Some(0)
        );
        assert_eq!(
            main.arguments[1]
                .attributes
                .get("lmhlo.output_index")
                .and_then(Attribute::as_index_list),
            Some(vec![0])
        );
        assert_eq!(main.body.operations[0].name.to_string(), "lmhlo.copy");
        assert!(main.body.terminator().is_some());
    }

    #[test]
    fn parse_fusion_region_with_results() {
        let module = parse(
            r#"func @main(%a: memref<2xf32>, %b: memref<2xf32>) {
                 "lmhlo.fusion"() ({
                   %0 = "std.tensor_load"(%a) : (memref<2xf32>) -> tensor<2xf32>
                   %1 = "mhlo.add"(%0, %0) : (tensor<2xf32>, tensor<2xf32>) -> tensor<2xf32>
                   "std.tensor_store"(%1, %b) : (tensor<2xf32>, memref<2xf32>) -> ()
                   "lmhlo.terminator"() : () -> ()
                 }) : () -> ()
                 return
               }"#,
        )
        .unwrap();
        let main = &module.functions[0];
        let fusion = &main.body.operations[0];
        assert_eq!(fusion.regions.len(), 1);
        assert_eq!(fusion.regions[0].operations.len(), 4);
        assert_eq!(main.body.operations[1].name.to_string(), "std.return");
        assert_eq!(main.values().len(), 4);
    }

    #[test]
    fn unbalanced_braces_report_eof() {
        let err = parse(r#"func @main() { "lmhlo.terminator"() : () -> ()"#).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }), "{err}");
    }

    #[test]
    fn undefined_and_redefined_values() {
        let undefined = parse(r#"func @main() { "lmhlo.copy"(%x, %x) : (memref<1xi8>, memref<1xi8>) -> () }"#);
        assert!(matches!(undefined, Err(ParseError::UndefinedValue { ref name, .. }) if name == "x"));

        let redefined = parse(
            r#"func @main(%a: memref<1xf32>) {
                 %a = "mhlo.constant"() {value = dense<1.0> : tensor<1xf32>} : () -> tensor<1xf32>
               }"#,
        );
        assert!(matches!(redefined, Err(ParseError::RedefinedValue { .. })));
    }

    #[test]
    fn operand_type_mismatch() {
        let err = parse(r#"func @main(%a: memref<4xi8>) { "lmhlo.copy"(%a) : (memref<4xi16>) -> () }"#).unwrap_err();
        assert!(matches!(err, ParseError::TypeMismatch { .. }));

        let err = parse(r#"func @main(%a: memref<4xi8>) { "lmhlo.copy"(%a) : () -> () }"#).unwrap_err();
        assert!(matches!(err, ParseError::CountMismatch { what: "operands", .. }));
    }

    #[test]
    fn unregistered_dialects_follow_context_policy() {
        let text = r#"func @main() { "foo.bar"() : () -> () }"#;
        let mut context = Context::new(DialectSet::gpu_lowering());
        let module = context.parse_source_string(text).unwrap();
        assert!(!module.is_registered(&module.functions[0].body.operations[0].name));

        context.set_allow_unregistered_dialects(false);
        assert!(matches!(
            context.parse_source_string(text),
            Err(ParseError::UnregisteredDialect { ref namespace, .. }) if namespace == "foo"
        ));

        let restricted = {
            let mut context = Context::new(DialectSet::gpu_lowering().without(Dialect::LmhloGpu));
            context.set_allow_unregistered_dialects(false);
            context
        };
        assert!(restricted
            .parse_source_string(r#"func @main() { "lmhlo_gpu.gemm"() : () -> () }"#)
            .is_err());
    }

    #[test]
    fn dense_attribute_forms() {
        let module = parse(
            r#"func @main(%o: memref<8xi8>) {
                 "lmhlo.constant"(%o) {value = dense<-1> : tensor<8xi8>} : (memref<8xi8>) -> ()
                 "lmhlo.constant"(%o) {value = dense<[[1, 2], [3, 4], [5, 6], [7, 8]]> : tensor<4x2xi8>} : (memref<8xi8>) -> ()
               }"#,
        )
        .unwrap();
        let ops = &module.functions[0].body.operations;
        let splat = ops[0].attributes.get("value").and_then(Attribute::as_dense).unwrap();
        assert!(splat.is_splat());
        assert_eq!(splat.to_bytes(), vec![0xFF; 8]);
        let nested = ops[1].attributes.get("value").and_then(Attribute::as_dense).unwrap();
        assert_eq!(nested.to_bytes(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn dense_element_count_must_match() {
        let err = parse(
            r#"func @main(%o: memref<3xi8>) {
                 "lmhlo.constant"(%o) {value = dense<[1, 2]> : tensor<3xi8>} : (memref<3xi8>) -> ()
               }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidAttribute { .. }));
    }

    #[test]
    fn invalid_operation_name_and_type() {
        assert!(matches!(
            parse(r#"func @main() { "copy"() : () -> () }"#),
            Err(ParseError::InvalidOperationName { .. })
        ));
        assert!(matches!(
            parse(r#"func @main(%a: memref<?xf32>) { return }"#),
            Err(ParseError::InvalidType { .. })
        ));
    }

    #[test]
    fn duplicate_functions_rejected() {
        let err = parse("func @main() { return } func @main() { return }").unwrap_err();
        assert!(matches!(err, ParseError::RedefinedFunction { .. }));
    }

    #[test]
    fn error_carries_location() {
        let err = parse("func @main() {\n  \"lmhlo.copy\"(%missing) : (memref<1xi8>) -> ()\n}").unwrap_err();
        assert!(err.to_string().starts_with("2:"), "{err}");
    }
}
