//! Shapes of executable parameters and results
//!
//! A [`Shape`] is either a dense array or a tuple of shapes. Leaves of a tuple
//! are addressed by a [`ShapeIndex`], the path of tuple positions from the
//! root. A [`ShapeTree`] attaches one value to every leaf.

use std::fmt;

/// Element type of an array shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Pred,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    F32,
    F64,
}

impl PrimitiveType {
    pub const fn byte_width(self) -> usize {
        match self {
            PrimitiveType::Pred | PrimitiveType::S8 | PrimitiveType::U8 => 1,
            PrimitiveType::S16 | PrimitiveType::U16 | PrimitiveType::F16 | PrimitiveType::BF16 => 2,
            PrimitiveType::S32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::S64 | PrimitiveType::U64 | PrimitiveType::F64 => 8,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Pred => "pred",
            PrimitiveType::S8 => "s8",
            PrimitiveType::S16 => "s16",
            PrimitiveType::S32 => "s32",
            PrimitiveType::S64 => "s64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F16 => "f16",
            PrimitiveType::BF16 => "bf16",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Path from the root of a shape to one of its subshapes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShapeIndex(pub Vec<usize>);

impl ShapeIndex {
    /// The root index `{}`.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, position: usize) -> Self {
        let mut path = self.0.clone();
        path.push(position);
        Self(path)
    }
}

impl From<Vec<usize>> for ShapeIndex {
    fn from(path: Vec<usize>) -> Self {
        Self(path)
    }
}

impl fmt::Display for ShapeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, position) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{position}")?;
        }
        f.write_str("}")
    }
}

/// Errors building a shape from leaf positions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("no leaves given")]
    Empty,

    #[error("leaf index {0} appears twice")]
    DuplicateIndex(ShapeIndex),

    #[error("leaf index {index} conflicts with {other}")]
    Conflict { index: ShapeIndex, other: ShapeIndex },

    #[error("tuple at {parent} is missing position {missing}")]
    Gap { parent: ShapeIndex, missing: usize },
}

/// Array or tuple shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Array {
        element_type: PrimitiveType,
        dimensions: Vec<usize>,
    },
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn array(element_type: PrimitiveType, dimensions: Vec<usize>) -> Self {
        Shape::Array {
            element_type,
            dimensions,
        }
    }

    /// Untyped byte buffer `u8[size]`.
    pub fn bytes(size: usize) -> Self {
        Shape::array(PrimitiveType::U8, vec![size])
    }

    pub fn tuple(elements: Vec<Shape>) -> Self {
        Shape::Tuple(elements)
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// Size in bytes of an array; zero for tuples (their leaves own the bytes).
    ///
    /// Saturates at `usize::MAX`; use [`checked_byte_size`](Self::checked_byte_size)
    /// on shapes that have not been validated.
    pub fn byte_size(&self) -> usize {
        self.checked_byte_size().unwrap_or(usize::MAX)
    }

    /// Size in bytes, or `None` when it does not fit in `usize`.
    pub fn checked_byte_size(&self) -> Option<usize> {
        match self {
            Shape::Array {
                element_type,
                dimensions,
            } => dimensions
                .iter()
                .try_fold(element_type.byte_width(), |bytes, &dimension| bytes.checked_mul(dimension)),
            Shape::Tuple(_) => Some(0),
        }
    }

    pub fn subshape(&self, index: &ShapeIndex) -> Option<&Shape> {
        index.0.iter().try_fold(self, |shape, &position| match shape {
            Shape::Tuple(elements) => elements.get(position),
            Shape::Array { .. } => None,
        })
    }

    /// Indices of all array leaves, depth first in tuple order.
    pub fn leaf_indices(&self) -> Vec<ShapeIndex> {
        fn walk(shape: &Shape, index: ShapeIndex, out: &mut Vec<ShapeIndex>) {
            match shape {
                Shape::Array { .. } => out.push(index),
                Shape::Tuple(elements) => {
                    for (position, element) in elements.iter().enumerate() {
                        walk(element, index.child(position), out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(self, ShapeIndex::root(), &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            Shape::Array { .. } => 1,
            Shape::Tuple(elements) => elements.iter().map(Shape::leaf_count).sum(),
        }
    }

    /// Assemble the shape whose leaves sit at the given indices.
    ///
    /// Tuple positions must be dense from zero at every level. A single leaf
    /// at the root index yields an array shape.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] for empty input, repeated or overlapping
    /// indices, and gaps in tuple positions.
    pub fn from_leaves(leaves: Vec<(ShapeIndex, Shape)>) -> Result<Shape, ShapeError> {
        if leaves.is_empty() {
            return Err(ShapeError::Empty);
        }
        let mut sorted = leaves;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for pair in sorted.windows(2) {
            let (a, b) = (&pair[0].0, &pair[1].0);
            if a == b {
                return Err(ShapeError::DuplicateIndex(a.clone()));
            }
            if b.0.starts_with(&a.0) {
                return Err(ShapeError::Conflict {
                    index: b.clone(),
                    other: a.clone(),
                });
            }
        }
        build(ShapeIndex::root(), &sorted)
    }
}

fn build(parent: ShapeIndex, leaves: &[(ShapeIndex, Shape)]) -> Result<Shape, ShapeError> {
    let depth = parent.0.len();
    if let [(index, shape)] = leaves {
        if index.0.len() == depth {
            return Ok(shape.clone());
        }
    }
    let mut elements = Vec::new();
    let mut rest = leaves;
    while let Some((first, _)) = rest.first() {
        let position = first.0[depth];
        if position != elements.len() {
            return Err(ShapeError::Gap {
                parent,
                missing: elements.len(),
            });
        }
        let split = rest
            .iter()
            .position(|(index, _)| index.0[depth] != position)
            .unwrap_or(rest.len());
        elements.push(build(parent.child(position), &rest[..split])?);
        rest = &rest[split..];
    }
    Ok(Shape::Tuple(elements))
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array {
                element_type,
                dimensions,
            } => {
                write!(f, "{element_type}[")?;
                for (i, dimension) in dimensions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{dimension}")?;
                }
                f.write_str("]")
            }
            Shape::Tuple(elements) => {
                f.write_str("(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One value per leaf of a shape, in leaf order.
#[derive(Debug, Clone)]
pub struct ShapeTree<T> {
    shape: Shape,
    leaves: Vec<(ShapeIndex, T)>,
}

impl<T> ShapeTree<T> {
    /// Tree over `shape` with every leaf produced by `init`.
    pub fn from_fn(shape: Shape, mut init: impl FnMut(&ShapeIndex) -> T) -> Self {
        let leaves = shape
            .leaf_indices()
            .into_iter()
            .map(|index| {
                let value = init(&index);
                (index, value)
            })
            .collect();
        Self { shape, leaves }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn element(&self, index: &ShapeIndex) -> Option<&T> {
        self.leaves.iter().find(|(i, _)| i == index).map(|(_, v)| v)
    }

    pub fn element_mut(&mut self, index: &ShapeIndex) -> Option<&mut T> {
        self.leaves.iter_mut().find(|(i, _)| i == index).map(|(_, v)| v)
    }

    /// Replace the value at a leaf, returning the old one.
    pub fn set_element(&mut self, index: &ShapeIndex, value: T) -> Option<T> {
        self.element_mut(index).map(|slot| std::mem::replace(slot, value))
    }

    pub fn leaves(&self) -> impl Iterator<Item = (&ShapeIndex, &T)> {
        self.leaves.iter().map(|(i, v)| (i, v))
    }

    pub fn into_leaves(self) -> impl Iterator<Item = (ShapeIndex, T)> {
        self.leaves.into_iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(&ShapeIndex, T) -> U) -> ShapeTree<U> {
        ShapeTree {
            shape: self.shape,
            leaves: self
                .leaves
                .into_iter()
                .map(|(index, value)| {
                    let mapped = f(&index, value);
                    (index, mapped)
                })
                .collect(),
        }
    }
}

impl<T: Default> ShapeTree<T> {
    pub fn new(shape: Shape) -> Self {
        Self::from_fn(shape, |_| T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32s(n: usize) -> Shape {
        Shape::array(PrimitiveType::F32, vec![n])
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::bytes(4).to_string(), "u8[4]");
        let tuple = Shape::tuple(vec![f32s(2), Shape::array(PrimitiveType::S8, vec![2, 4])]);
        assert_eq!(tuple.to_string(), "(f32[2], s8[2,4])");
        assert_eq!(ShapeIndex(vec![0, 1]).to_string(), "{0,1}");
        assert_eq!(ShapeIndex::root().to_string(), "{}");
    }

    #[test]
    fn test_leaf_order_is_depth_first() {
        let shape = Shape::tuple(vec![Shape::tuple(vec![f32s(1), f32s(2)]), f32s(3)]);
        assert_eq!(
            shape.leaf_indices(),
            vec![ShapeIndex(vec![0, 0]), ShapeIndex(vec![0, 1]), ShapeIndex(vec![1])]
        );
        assert_eq!(shape.leaf_count(), 3);
        assert_eq!(shape.subshape(&ShapeIndex(vec![0, 1])), Some(&f32s(2)));
        assert_eq!(shape.subshape(&ShapeIndex(vec![1, 0])), None);
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(Shape::array(PrimitiveType::F16, vec![3, 4]).byte_size(), 24);
        assert_eq!(Shape::array(PrimitiveType::S32, vec![]).byte_size(), 4);
        assert_eq!(Shape::bytes(0).byte_size(), 0);
    }

    #[test]
    fn test_byte_size_overflow() {
        let huge = Shape::array(PrimitiveType::F32, vec![1 << 32, 1 << 32]);
        assert_eq!(huge.checked_byte_size(), None);
        assert_eq!(huge.byte_size(), usize::MAX);
        assert_eq!(Shape::array(PrimitiveType::F32, vec![0, usize::MAX]).checked_byte_size(), Some(0));
    }

    #[test]
    fn test_from_leaves_root_and_tuple() {
        let root = Shape::from_leaves(vec![(ShapeIndex::root(), f32s(4))]).unwrap();
        assert_eq!(root, f32s(4));

        let tuple = Shape::from_leaves(vec![(ShapeIndex(vec![1]), f32s(2)), (ShapeIndex(vec![0]), f32s(1))]).unwrap();
        assert_eq!(tuple, Shape::tuple(vec![f32s(1), f32s(2)]));

        let single = Shape::from_leaves(vec![(ShapeIndex(vec![0]), f32s(1))]).unwrap();
        assert_eq!(single, Shape::tuple(vec![f32s(1)]));
    }

    #[test]
    fn test_from_leaves_rejects_bad_layouts() {
        assert_eq!(Shape::from_leaves(vec![]), Err(ShapeError::Empty));
        assert!(matches!(
            Shape::from_leaves(vec![(ShapeIndex(vec![0]), f32s(1)), (ShapeIndex(vec![0]), f32s(1))]),
            Err(ShapeError::DuplicateIndex(_))
        ));
        assert!(matches!(
            Shape::from_leaves(vec![(ShapeIndex(vec![0]), f32s(1)), (ShapeIndex(vec![0, 1]), f32s(1))]),
            Err(ShapeError::Conflict { .. })
        ));
        assert_eq!(
            Shape::from_leaves(vec![(ShapeIndex(vec![0]), f32s(1)), (ShapeIndex(vec![2]), f32s(1))]),
            Err(ShapeError::Gap {
                parent: ShapeIndex::root(),
                missing: 1
            })
        );
    }

    #[test]
    fn test_shape_tree_access() {
        let shape = Shape::tuple(vec![f32s(1), f32s(2)]);
        let mut tree: ShapeTree<Option<u32>> = ShapeTree::new(shape);
        assert_eq!(tree.set_element(&ShapeIndex(vec![1]), Some(7)), Some(None));
        assert_eq!(tree.element(&ShapeIndex(vec![1])), Some(&Some(7)));
        assert_eq!(tree.set_element(&ShapeIndex(vec![2]), Some(1)), None);

        let mapped = tree.map(|_, v| v.unwrap_or(0));
        assert_eq!(mapped.leaves().map(|(_, v)| *v).collect::<Vec<_>>(), vec![0, 7]);
    }
}
