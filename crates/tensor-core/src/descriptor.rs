// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor descriptors and execution targets.

use crate::layout::resolve_dimension_idx;
use crate::{DType, DataLayout, DataLayoutDimension, QuantizationInfo, Shape, TensorError};
use std::fmt;

/// An execution backend selector.
///
/// `Unspecified` means "let the graph manager pick"; finalization replaces
/// it with a concrete, supported target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Unspecified,
    /// CPU vector backend.
    Neon,
    /// GPU compute backend.
    Cl,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Unspecified => "unspecified",
            Target::Neon => "neon",
            Target::Cl => "cl",
        }
    }

    /// Parses a target name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "unspecified" | "" => Some(Target::Unspecified),
            "neon" | "cpu" => Some(Target::Neon),
            "cl" | "gpu" | "opencl" => Some(Target::Cl),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a graph tensor.
///
/// Owned by the graph and mutated by shape propagation and passes; backend
/// handles copy it when they are created.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct TensorDescriptor {
    pub shape: Shape,
    pub data_type: DType,
    pub layout: DataLayout,
    pub quant_info: QuantizationInfo,
    pub target: Target,
}

impl TensorDescriptor {
    /// Creates an NCHW, non-quantized descriptor with no target.
    pub fn new(shape: impl Into<Shape>, data_type: DType) -> Self {
        Self {
            shape: shape.into(),
            data_type,
            ..Default::default()
        }
    }

    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_quant_info(mut self, quant_info: QuantizationInfo) -> Self {
        self.quant_info = quant_info;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_shape(mut self, shape: impl Into<Shape>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_data_type(mut self, data_type: DType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Total number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Total buffer size in bytes.
    pub fn total_size(&self) -> usize {
        self.shape.size_bytes(self.data_type)
    }

    /// Index of a logical dimension in this descriptor's shape.
    pub fn dimension_idx(&self, dimension: DataLayoutDimension) -> Result<usize, TensorError> {
        resolve_dimension_idx(&self.shape, self.layout, dimension)
    }

    /// Size of a logical dimension in this descriptor's shape.
    pub fn dimension(&self, dimension: DataLayoutDimension) -> Result<usize, TensorError> {
        let idx = self.dimension_idx(dimension)?;
        Ok(self.shape.dims()[idx])
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.shape, self.data_type, self.layout)?;
        if self.target != Target::Unspecified {
            write!(f, " @{}", self.target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_size() {
        let d = TensorDescriptor::new(vec![1, 3, 4, 4], DType::F32);
        assert_eq!(d.num_elements(), 48);
        assert_eq!(d.total_size(), 192);
    }

    #[test]
    fn test_dimension_nhwc() {
        let d = TensorDescriptor::new(vec![1, 8, 6, 4], DType::F32).with_layout(DataLayout::Nhwc);
        assert_eq!(d.dimension(DataLayoutDimension::Channel).unwrap(), 4);
        assert_eq!(d.dimension(DataLayoutDimension::Width).unwrap(), 6);
        assert_eq!(d.dimension_idx(DataLayoutDimension::Height).unwrap(), 1);
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(Target::parse("NEON"), Some(Target::Neon));
        assert_eq!(Target::parse("gpu"), Some(Target::Cl));
        assert_eq!(Target::parse("tpu"), None);
    }

    #[test]
    fn test_display() {
        let d = TensorDescriptor::new(vec![2, 3], DType::F32).with_target(Target::Neon);
        assert_eq!(format!("{d}"), "[2, 3] f32 NCHW @neon");
    }

    #[test]
    fn test_serde_roundtrip() {
        let d = TensorDescriptor::new(vec![1, 2, 2, 2], DType::QAsymm8)
            .with_quant_info(QuantizationInfo::new(0.1, 5))
            .with_target(Target::Cl);
        let json = serde_json::to_string(&d).unwrap();
        let back: TensorDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
