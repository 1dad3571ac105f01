// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantization metadata.

/// Uniform quantization parameters: `real = scale * (q - offset)`.
///
/// An empty `QuantizationInfo` (scale 0) marks a non-quantized tensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct QuantizationInfo {
    pub scale: f32,
    pub offset: i32,
}

impl QuantizationInfo {
    pub fn new(scale: f32, offset: i32) -> Self {
        Self { scale, offset }
    }

    /// Returns `true` when no quantization is attached.
    pub fn is_empty(&self) -> bool {
        self.scale == 0.0 && self.offset == 0
    }

    pub fn quantize(&self, value: f32) -> i32 {
        (value / self.scale).round() as i32 + self.offset
    }

    pub fn dequantize(&self, value: i32) -> f32 {
        (value - self.offset) as f32 * self.scale
    }
}
