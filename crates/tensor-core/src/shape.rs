// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptors and dimension utilities.
//!
//! Two flavours exist:
//! - [`Shape`] is concrete: every dimension is a known size. Tensors with
//!   data always carry a `Shape`.
//! - [`DynShape`] is declared: each [`Dim`] is either fixed, a named symbol
//!   (e.g. `batch`) or unknown. Graph values carry a `DynShape`.

use std::fmt;

/// Describes the dimensionality of a [`crate::Tensor`].
///
/// Shapes are immutable once created and provide convenience methods for
/// computing strides, total element counts, and broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![2, 3, 4]);
    /// assert_eq!(s.rank(), 3);
    /// assert_eq!(s.num_elements(), 24);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Creates a scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Creates a 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Creates a 2-D shape (matrix).
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    /// Returns the number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    ///
    /// For a scalar shape (rank 0), returns 1.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the size of a specific dimension, or `None` if out of bounds.
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }

    /// Computes the memory footprint in bytes for a given [`crate::DType`].
    pub fn size_bytes(&self, dtype: super::DType) -> usize {
        self.num_elements() * dtype.size_bytes()
    }

    /// Computes row-major (C-order) strides for this shape.
    pub fn strides(&self) -> Vec<usize> {
        let rank = self.dims.len();
        if rank == 0 {
            return vec![];
        }
        let mut strides = vec![0usize; rank];
        strides[rank - 1] = 1;
        for i in (0..rank - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Returns the multidirectional broadcast of two shapes, or `None`
    /// when a pair of aligned dimensions differs and neither is 1.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let mut out = vec![0usize; rank];
        for (i, slot) in out.iter_mut().enumerate() {
            let a = aligned(&self.dims, rank, i).unwrap_or(1);
            let b = aligned(&other.dims, rank, i).unwrap_or(1);
            *slot = match (a, b) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => return None,
            };
        }
        Some(Shape::new(out))
    }

    /// Strides for reading `self` as if it were broadcast to `target`:
    /// broadcast dimensions get stride 0.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let own = self.strides();
        let rank = target.rank();
        (0..rank)
            .map(|i| {
                let offset = rank - self.rank();
                if i < offset || self.dims[i - offset] == 1 {
                    0
                } else {
                    own[i - offset]
                }
            })
            .collect()
    }
}

/// Returns the dimension of `dims` that aligns with position `i` of a
/// right-aligned shape of rank `rank`.
fn aligned<T: Copy>(dims: &[T], rank: usize, i: usize) -> Option<T> {
    let offset = rank - dims.len();
    if i < offset {
        None
    } else {
        Some(dims[i - offset])
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// Convenience: `Shape::from(vec![2, 3])`.
impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

/// Convenience: `Shape::from(&[2, 3][..])`.
impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

// ── Declared (possibly symbolic) shapes ────────────────────────────

/// A single declared dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Dim {
    /// A known, non-negative size.
    Fixed(usize),
    /// A named dynamic size (e.g. `"batch"`).
    Symbolic(String),
    /// Nothing is known about this dimension.
    Unknown,
}

impl Dim {
    /// Returns the size if the dimension is fixed.
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(*n),
            _ => None,
        }
    }

    /// Broadcasts two declared dimensions.
    ///
    /// A fixed non-1 size wins over a symbolic or unknown one; two different
    /// symbols resolve to unknown. Returns `None` for two fixed sizes that
    /// differ where neither is 1.
    pub fn broadcast(&self, other: &Dim) -> Option<Dim> {
        match (self, other) {
            (Dim::Fixed(a), Dim::Fixed(b)) if a == b => Some(Dim::Fixed(*a)),
            (Dim::Fixed(1), d) | (d, Dim::Fixed(1)) => Some(d.clone()),
            (Dim::Fixed(_), Dim::Fixed(_)) => None,
            (Dim::Fixed(n), _) | (_, Dim::Fixed(n)) => Some(Dim::Fixed(*n)),
            (Dim::Symbolic(a), Dim::Symbolic(b)) if a == b => Some(Dim::Symbolic(a.clone())),
            _ => Some(Dim::Unknown),
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Symbolic(s) => f.write_str(s),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Fixed(n)
    }
}

/// A declared shape of known rank whose dimensions may be dynamic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DynShape {
    dims: Vec<Dim>,
}

impl DynShape {
    /// Creates a declared shape from dimensions.
    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    /// Creates a fully static declared shape.
    pub fn fixed(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().map(|&d| Dim::Fixed(d)).collect(),
        }
    }

    /// Creates a shape of the given rank with every dimension unknown.
    pub fn unknown(rank: usize) -> Self {
        Self {
            dims: vec![Dim::Unknown; rank],
        }
    }

    /// Returns the rank.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the dimensions.
    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Returns `true` when every dimension is fixed.
    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|d| matches!(d, Dim::Fixed(_)))
    }

    /// Converts to a concrete [`Shape`] when fully static.
    pub fn to_static(&self) -> Option<Shape> {
        self.dims
            .iter()
            .map(Dim::fixed)
            .collect::<Option<Vec<_>>>()
            .map(Shape::new)
    }

    /// Number of elements when fully static.
    pub fn num_elements(&self) -> Option<usize> {
        self.to_static().map(|s| s.num_elements())
    }

    /// Multidirectional broadcast of two declared shapes. Returns the index
    /// (in the broadcast result) of the first conflicting dimension on error.
    pub fn broadcast(&self, other: &DynShape) -> Result<DynShape, usize> {
        let rank = self.rank().max(other.rank());
        let one = Dim::Fixed(1);
        let mut out = Vec::with_capacity(rank);
        for i in 0..rank {
            let a = aligned_ref(&self.dims, rank, i).unwrap_or(&one);
            let b = aligned_ref(&other.dims, rank, i).unwrap_or(&one);
            out.push(a.broadcast(b).ok_or(i)?);
        }
        Ok(DynShape::new(out))
    }
}

fn aligned_ref<T>(dims: &[T], rank: usize, i: usize) -> Option<&T> {
    let offset = rank - dims.len();
    if i < offset {
        None
    } else {
        dims.get(i - offset)
    }
}

impl From<&Shape> for DynShape {
    fn from(shape: &Shape) -> Self {
        DynShape::fixed(shape.dims())
    }
}

impl fmt::Display for DynShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert!(s.strides().is_empty());
    }

    #[test]
    fn test_matrix_shape() {
        let s = Shape::matrix(3, 4);
        assert_eq!(s.rank(), 2);
        assert_eq!(s.num_elements(), 12);
        assert_eq!(s.strides(), vec![4, 1]);
        assert_eq!(s.size_bytes(DType::F32), 48);
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.strides(), vec![12, 4, 1]);
    }

    #[test]
    fn test_broadcast() {
        let a = Shape::new(vec![1, 3]);
        let b = Shape::new(vec![4, 3]);
        assert_eq!(a.broadcast(&b), Some(Shape::new(vec![4, 3])));

        let c = Shape::new(vec![5, 1, 1]);
        assert_eq!(a.broadcast(&c), Some(Shape::new(vec![5, 1, 3])));

        let d = Shape::new(vec![4, 2]);
        assert!(a.broadcast(&d).is_none());
        assert!(b.broadcast(&d).is_none());
    }

    #[test]
    fn test_broadcast_strides() {
        let bias = Shape::vector(3);
        let out = Shape::new(vec![2, 3]);
        assert_eq!(bias.broadcast_strides(&out), vec![0, 1]);
        let col = Shape::new(vec![2, 1]);
        assert_eq!(col.broadcast_strides(&out), vec![1, 0]);
    }

    #[test]
    fn test_display() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(format!("{s}"), "[2, 3, 4]");
        let d = DynShape::new(vec![Dim::Symbolic("N".into()), Dim::Fixed(3), Dim::Unknown]);
        assert_eq!(format!("{d}"), "[N, 3, ?]");
    }

    #[test]
    fn test_dim_broadcast_symbolic() {
        let n = Dim::Symbolic("N".into());
        assert_eq!(n.broadcast(&Dim::Fixed(1)), Some(n.clone()));
        assert_eq!(n.broadcast(&Dim::Fixed(7)), Some(Dim::Fixed(7)));
        assert_eq!(n.broadcast(&n), Some(n.clone()));
        assert_eq!(n.broadcast(&Dim::Symbolic("M".into())), Some(Dim::Unknown));
        assert_eq!(Dim::Fixed(2).broadcast(&Dim::Fixed(3)), None);
    }

    #[test]
    fn test_dyn_shape_static() {
        let d = DynShape::fixed(&[1, 3, 224, 224]);
        assert!(d.is_static());
        assert_eq!(d.to_static(), Some(Shape::new(vec![1, 3, 224, 224])));
        let u = DynShape::new(vec![Dim::Unknown, Dim::Fixed(3)]);
        assert!(u.to_static().is_none());
    }

    #[test]
    fn test_dyn_broadcast_conflict_index() {
        let a = DynShape::fixed(&[2, 3]);
        let b = DynShape::fixed(&[4, 3]);
        assert_eq!(a.broadcast(&b), Err(0));
    }

    proptest! {
        #[test]
        fn prop_broadcast_commutes(a in prop::collection::vec(1usize..4, 0..4),
                                   b in prop::collection::vec(1usize..4, 0..4)) {
            let sa = Shape::new(a);
            let sb = Shape::new(b);
            prop_assert_eq!(sa.broadcast(&sb), sb.broadcast(&sa));
        }

        #[test]
        fn prop_broadcast_with_self_is_identity(a in prop::collection::vec(0usize..6, 0..5)) {
            let s = Shape::new(a);
            prop_assert_eq!(s.broadcast(&s), Some(s.clone()));
        }

        #[test]
        fn prop_dyn_agrees_with_static(a in prop::collection::vec(1usize..4, 0..4),
                                       b in prop::collection::vec(1usize..4, 0..4)) {
            let sa = Shape::new(a);
            let sb = Shape::new(b);
            let dynamic = DynShape::from(&sa).broadcast(&DynShape::from(&sb)).ok();
            prop_assert_eq!(dynamic.and_then(|d| d.to_static()), sa.broadcast(&sb));
        }
    }
}
