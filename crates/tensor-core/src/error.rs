// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor metadata.

use crate::{DataLayout, DataLayoutDimension, Shape};

/// Errors that can occur while interpreting tensor descriptors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// A byte buffer does not match the size implied by shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two shapes are incompatible for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype} for operation {op}")]
    UnsupportedDType {
        op: &'static str,
        dtype: crate::DType,
    },

    /// A logical dimension cannot be resolved for the given layout and rank.
    #[error("dimension {dimension:?} is not defined for {layout:?} tensors of rank {rank}")]
    MissingDimension {
        dimension: DataLayoutDimension,
        layout: DataLayout,
        rank: usize,
    },

    /// A dimension index is out of range for the shape.
    #[error("axis {axis} out of range for shape {shape}")]
    AxisOutOfRange { axis: usize, shape: Shape },
}
