// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Data layouts and logical dimension lookup.
//!
//! Shapes store dimensions outermost first, so a 4-D tensor reads:
//!
//! ```text
//! NCHW: [batches, channel, height, width]
//! NHWC: [batches, height, width, channel]
//! ```
//!
//! Lower-rank shapes are right-aligned against the 4-D layout: a rank-3
//! NCHW shape is `[channel, height, width]`.

use crate::{Shape, TensorError};
use std::fmt;

/// Channel ordering of image-like tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum DataLayout {
    /// Channels before spatial dimensions.
    #[default]
    Nchw,
    /// Channels innermost.
    Nhwc,
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLayout::Nchw => f.write_str("NCHW"),
            DataLayout::Nhwc => f.write_str("NHWC"),
        }
    }
}

/// A logical dimension independent of the physical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataLayoutDimension {
    Width,
    Height,
    Channel,
    Batches,
}

/// Returns the index of `dimension` within a rank-4 shape of `layout`.
pub fn get_dimension_idx(layout: DataLayout, dimension: DataLayoutDimension) -> usize {
    use DataLayoutDimension::*;
    match (layout, dimension) {
        (_, Batches) => 0,
        (DataLayout::Nchw, Channel) => 1,
        (DataLayout::Nchw, Height) => 2,
        (DataLayout::Nchw, Width) => 3,
        (DataLayout::Nhwc, Height) => 1,
        (DataLayout::Nhwc, Width) => 2,
        (DataLayout::Nhwc, Channel) => 3,
    }
}

/// Resolves `dimension` to an index of `shape`, right-aligning shapes of
/// rank below 4.
pub fn resolve_dimension_idx(
    shape: &Shape,
    layout: DataLayout,
    dimension: DataLayoutDimension,
) -> Result<usize, TensorError> {
    let rank = shape.rank();
    let idx = get_dimension_idx(layout, dimension);
    if rank >= 4 {
        return Ok(idx + rank - 4);
    }
    let shift = 4 - rank;
    idx.checked_sub(shift).ok_or(TensorError::MissingDimension {
        dimension,
        layout,
        rank,
    })
}

/// Returns the size of `dimension` in `shape`.
pub fn get_dimension_size(
    shape: &Shape,
    layout: DataLayout,
    dimension: DataLayoutDimension,
) -> Result<usize, TensorError> {
    let idx = resolve_dimension_idx(shape, layout, dimension)?;
    Ok(shape.dims()[idx])
}
