// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shapes and the slicing arithmetic used for sub-tensor views.

use crate::TensorError;
use std::fmt;

/// Dimension sizes of a tensor, outermost dimension first.
///
/// The flat buffer behind a shape is row-major: the last dimension is the
/// contiguous one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![1, 3, 4, 4]);
    /// assert_eq!(s.rank(), 4);
    /// assert_eq!(s.num_elements(), 48);
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

    /// Returns a copy of this shape with dimension `index` set to `value`.
    pub fn with_dim(&self, index: usize, value: usize) -> Result<Shape, TensorError> {
        if index >= self.dims.len() {
            return Err(TensorError::AxisOutOfRange {
                axis: index,
                shape: self.clone(),
            });
        }
        let mut dims = self.dims.clone();
        dims[index] = value;
        Ok(Shape { dims })
    }

    /// Computes the memory footprint in bytes for a given [`crate::DType`].
    pub fn size_bytes(&self, dtype: super::DType) -> usize {
        self.num_elements() * dtype.size_bytes()
    }

    /// Computes row-major strides in elements.
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

    /// Returns `true` when every slice along `axis` occupies one contiguous
    /// run of the flat buffer, i.e. all dimensions outside `axis` are 1.
    pub fn is_contiguous_along(&self, axis: usize) -> bool {
        axis < self.dims.len() && self.dims[..axis].iter().all(|&d| d == 1)
    }

    /// Element offset of index `start` along `axis` in a contiguous slicing.
    pub fn slice_offset(&self, axis: usize, start: usize) -> Result<usize, TensorError> {
        if axis >= self.dims.len() {
            return Err(TensorError::AxisOutOfRange {
                axis,
                shape: self.clone(),
            });
        }
        let inner: usize = self.dims[axis + 1..].iter().product();
        Ok(start * inner)
    }

    /// Returns `true` if two shapes are broadcast-compatible.
    ///
    /// Shapes are compatible when, aligning dimensions from the right,
    /// each pair is either equal or one of them is 1.
    pub fn is_broadcast_compatible(&self, other: &Shape) -> bool {
        self.dims
            .iter()
            .rev()
            .zip(other.dims.iter().rev())
            .all(|(&a, &b)| a == b || a == 1 || b == 1)
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

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert!(s.strides().is_empty());
    }

    #[test]
    fn test_4d_strides() {
        let s = Shape::new(vec![2, 3, 4, 5]);
        assert_eq!(s.strides(), vec![60, 20, 5, 1]);
    }

    #[test]
    fn test_with_dim() {
        let s = Shape::new(vec![1, 4, 8, 8]);
        assert_eq!(s.with_dim(1, 2).unwrap().dims(), &[1, 2, 8, 8]);
        assert!(s.with_dim(4, 1).is_err());
    }

    #[test]
    fn test_contiguous_along() {
        let nchw = Shape::new(vec![1, 6, 4, 4]);
        assert!(nchw.is_contiguous_along(1));
        assert!(nchw.is_contiguous_along(0));
        let nhwc = Shape::new(vec![1, 4, 4, 6]);
        assert!(!nhwc.is_contiguous_along(3));
        let batched = Shape::new(vec![2, 6, 4, 4]);
        assert!(!batched.is_contiguous_along(1));
    }

    #[test]
    fn test_slice_offset() {
        let s = Shape::new(vec![1, 6, 4, 4]);
        assert_eq!(s.slice_offset(1, 3).unwrap(), 48);
        assert_eq!(s.slice_offset(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_broadcast_compatible() {
        let a = Shape::new(vec![1, 3]);
        assert!(a.is_broadcast_compatible(&Shape::new(vec![4, 3])));
        assert!(!a.is_broadcast_compatible(&Shape::new(vec![4, 2])));
    }

    #[test]
    fn test_display() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(format!("{s}"), "[2, 3, 4]");
    }

    #[test]
    fn test_size_bytes() {
        let s = Shape::new(vec![10, 20]);
        assert_eq!(s.size_bytes(DType::F32), 800);
        assert_eq!(s.size_bytes(DType::QAsymm8), 200);
    }

    #[test]
    fn test_from_conversions() {
        let s1: Shape = vec![2, 3].into();
        let s2: Shape = [2, 3].into();
        assert_eq!(s1, s2);
    }
}
