// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

use std::fmt;

/// Enumerates the element types a graph tensor can carry.
///
/// Backends use `DType` to size buffers and to reject operations their
/// kernels cannot execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    #[default]
    F32,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 32-bit signed integer (quantized bias accumulators).
    S32,
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit asymmetric quantized (scale + offset).
    QAsymm8,
    /// 8-bit symmetric quantized (scale only).
    QSymm8,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::S32 => 4,
            DType::F16 => 2,
            DType::U8 | DType::QAsymm8 | DType::QSymm8 => 1,
        }
    }

    /// Returns `true` for the quantized 8-bit types.
    pub fn is_quantized(self) -> bool {
        matches!(self, DType::QAsymm8 | DType::QSymm8)
    }

    /// Returns `true` for asymmetric quantized types, which need S32 biases.
    pub fn is_quantized_asymmetric(self) -> bool {
        matches!(self, DType::QAsymm8)
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::S32 => "s32",
            DType::U8 => "u8",
            DType::QAsymm8 => "qasymm8",
            DType::QSymm8 => "qsymm8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
