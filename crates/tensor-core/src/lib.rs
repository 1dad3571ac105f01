// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor metadata shared by every layer of the graph runtime.
//!
//! This crate provides:
//! - [`Shape`]: ordered dimension sizes, outermost dimension first.
//! - [`DType`]: element data types, float and quantized.
//! - [`DataLayout`] / [`DataLayoutDimension`]: channel ordering of 4-D
//!   tensors and lookup of a logical dimension's index.
//! - [`QuantizationInfo`]: scale/offset pair for quantized tensors.
//! - [`Target`]: the execution backend a tensor or node is bound to.
//! - [`TensorDescriptor`]: the full static description of a graph tensor.
//!
//! Nothing here owns memory. Buffers live behind backend tensor handles
//! created during graph finalization.

mod descriptor;
mod dtype;
mod error;
mod layout;
mod quantization;
mod shape;

pub use descriptor::{Target, TensorDescriptor};
pub use dtype::DType;
pub use error::TensorError;
pub use layout::{
    get_dimension_idx, get_dimension_size, resolve_dimension_idx, DataLayout, DataLayoutDimension,
};
pub use quantization::QuantizationInfo;
pub use shape::Shape;
