//! Operation and argument attributes

use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ElementType, Type};

/// One scalar inside a dense elements attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Bool(b) => b as i64,
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => b as i64 as f64,
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// Raw bits of this scalar stored as `element`, zero-extended to 64 bits.
    pub fn to_bits(self, element: ElementType) -> u64 {
        match element {
            ElementType::I1 => (self.as_i64() != 0) as u64,
            ElementType::F16 => half::f16::from_f64(self.as_f64()).to_bits() as u64,
            ElementType::BF16 => half::bf16::from_f64(self.as_f64()).to_bits() as u64,
            ElementType::F32 => (self.as_f64() as f32).to_bits() as u64,
            ElementType::F64 => self.as_f64().to_bits(),
            _ => {
                let width = element.byte_width() * 8;
                let raw = self.as_i64() as u64;
                if width == 64 {
                    raw
                } else {
                    raw & ((1u64 << width) - 1)
                }
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write_float(f, *v),
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    // `{:?}` always keeps a `.` or exponent, so the literal re-lexes as a float.
    write!(f, "{value:?}")
}

/// Payload of `dense<...>`.
#[derive(Debug, Clone, PartialEq)]
pub enum DenseValues {
    Splat(Scalar),
    Elements(Vec<Scalar>),
}

/// A `dense<...> : tensor<...>` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseElements {
    pub ty: Type,
    pub values: DenseValues,
}

impl DenseElements {
    pub fn is_splat(&self) -> bool {
        matches!(self.values, DenseValues::Splat(_))
    }

    /// Element count of the attribute's type.
    pub fn len(&self) -> usize {
        self.ty.as_shaped().map_or(1, |s| s.num_elements())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match &self.values {
            DenseValues::Splat(value) => (index < self.len()).then_some(*value),
            DenseValues::Elements(values) => values.get(index).copied(),
        }
    }

    /// All elements, expanding a splat.
    pub fn to_vec(&self) -> Vec<Scalar> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Element bytes in little-endian storage order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let element = self.ty.element_type().unwrap_or(ElementType::I8);
        let width = element.byte_width();
        let mut bytes = Vec::with_capacity(self.len() * width);
        for value in self.to_vec() {
            bytes.extend_from_slice(&value.to_bits(element).to_le_bytes()[..width]);
        }
        bytes
    }
}

/// Attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Integer { value: i64, ty: Option<Type> },
    Float { value: f64, ty: Option<Type> },
    String(String),
    Type(Type),
    Array(Vec<Attribute>),
    Dense(DenseElements),
}

impl Attribute {
    pub fn index(value: i64) -> Self {
        Attribute::Integer {
            value,
            ty: Some(Type::Scalar(ElementType::Index)),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Attribute::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Numeric value; integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Attribute::Float { value, .. } => Some(*value),
            Attribute::Integer { value, .. } => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_dense(&self) -> Option<&DenseElements> {
        match self {
            Attribute::Dense(dense) => Some(dense),
            _ => None,
        }
    }

    /// Integer list from a dense attribute, an array of integers or a single integer.
    pub fn as_index_list(&self) -> Option<Vec<i64>> {
        match self {
            Attribute::Integer { value, .. } => Some(vec![*value]),
            Attribute::Dense(dense) => Some(dense.to_vec().into_iter().map(Scalar::as_i64).collect()),
            Attribute::Array(items) => items.iter().map(Attribute::as_integer).collect(),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Unit => f.write_str("unit"),
            Attribute::Bool(b) => write!(f, "{b}"),
            Attribute::Integer { value, ty } => {
                write!(f, "{value}")?;
                if let Some(ty) = ty {
                    write!(f, " : {ty}")?;
                }
                Ok(())
            }
            Attribute::Float { value, ty } => {
                write_float(f, *value)?;
                if let Some(ty) = ty {
                    write!(f, " : {ty}")?;
                }
                Ok(())
            }
            Attribute::String(s) => write_escaped(f, s),
            Attribute::Type(ty) => write!(f, "{ty}"),
            Attribute::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Attribute::Dense(dense) => {
                f.write_str("dense<")?;
                match &dense.values {
                    DenseValues::Splat(value) => write!(f, "{value}")?,
                    DenseValues::Elements(values) => {
                        f.write_str("[")?;
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{value}")?;
                        }
                        f.write_str("]")?;
                    }
                }
                write!(f, "> : {}", dense.ty)
            }
        }
    }
}

pub(crate) fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

/// Named attributes, kept sorted so printing is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Attribute) -> Option<Attribute> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Attribute)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, Attribute)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if is_bare_key(name) {
                f.write_str(name)?;
            } else {
                write_escaped(f, name)?;
            }
            if *value != Attribute::Unit {
                write!(f, " = {value}")?;
            }
        }
        f.write_str("}")
    }
}

fn is_bare_key(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
}
