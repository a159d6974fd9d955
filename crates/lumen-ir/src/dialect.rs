//! Dialect registry
//!
//! The lowered-buffer program family is split across four namespaces. A
//! [`DialectSet`] records which of them a context (and every module built in
//! it) has loaded.

use std::fmt;

/// A known operation namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dialect {
    /// Buffer-level ops (`lmhlo.copy`, `lmhlo.fusion`, ...).
    Lmhlo,
    /// Value-level ops used inside fusion regions.
    Mhlo,
    /// Standard ops (`std.tensor_load`, `std.return`, ...).
    Std,
    /// GPU-specific buffer ops (`lmhlo_gpu.gemm`).
    LmhloGpu,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Dialect::Lmhlo, Dialect::Mhlo, Dialect::Std, Dialect::LmhloGpu];

    pub const fn namespace(self) -> &'static str {
        match self {
            Dialect::Lmhlo => "lmhlo",
            Dialect::Mhlo => "mhlo",
            Dialect::Std => "std",
            Dialect::LmhloGpu => "lmhlo_gpu",
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.namespace() == namespace)
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Set of loaded dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DialectSet(u8);

impl DialectSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every dialect a GPU-lowered module may use.
    pub const fn gpu_lowering() -> Self {
        Self(Dialect::Lmhlo.bit() | Dialect::Mhlo.bit() | Dialect::Std.bit() | Dialect::LmhloGpu.bit())
    }

    #[must_use]
    pub const fn with(self, dialect: Dialect) -> Self {
        Self(self.0 | dialect.bit())
    }

    #[must_use]
    pub const fn without(self, dialect: Dialect) -> Self {
        Self(self.0 & !dialect.bit())
    }

    pub fn insert(&mut self, dialect: Dialect) {
        self.0 |= dialect.bit();
    }

    pub const fn contains(self, dialect: Dialect) -> bool {
        self.0 & dialect.bit() != 0
    }

    /// True when `namespace` names a loaded dialect.
    pub fn contains_namespace(self, namespace: &str) -> bool {
        Dialect::from_namespace(namespace).is_some_and(|d| self.contains(d))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Dialect> {
        Dialect::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Dialect> for DialectSet {
    fn from_iter<I: IntoIterator<Item = Dialect>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), DialectSet::with)
    }
}

impl fmt::Display for DialectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, dialect) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dialect}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_lowering_holds_all_four() {
        let set = DialectSet::gpu_lowering();
        assert_eq!(set.len(), 4);
        for dialect in Dialect::ALL {
            assert!(set.contains(dialect));
            assert!(set.contains_namespace(dialect.namespace()));
        }
        assert!(!set.contains_namespace("gpu"));
    }

    #[test]
    fn without_removes_one_dialect() {
        let set = DialectSet::gpu_lowering().without(Dialect::LmhloGpu);
        assert!(!set.contains(Dialect::LmhloGpu));
        assert!(set.contains(Dialect::Lmhlo));
        assert_eq!(set.to_string(), "{lmhlo, mhlo, std}");
    }

    #[test]
    fn collects_from_iterator() {
        let set: DialectSet = [Dialect::Std, Dialect::Lmhlo].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Dialect::Lmhlo, Dialect::Std]);
        assert!(DialectSet::empty().is_empty());
    }
}
