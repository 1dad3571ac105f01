// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operation parameters carried by node kinds.

use std::fmt;

/// Activation functions a node can apply or fuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    /// `max(0, x)`.
    Relu,
    /// `min(a, max(0, x))`.
    BoundedRelu,
    /// `min(a, max(b, x))`.
    LuBoundedRelu,
    /// `x` if positive, `a * x` otherwise.
    LeakyRelu,
    Logistic,
    Tanh,
    Identity,
}

impl ActivationFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::BoundedRelu => "bounded_relu",
            Self::LuBoundedRelu => "lu_bounded_relu",
            Self::LeakyRelu => "leaky_relu",
            Self::Logistic => "logistic",
            Self::Tanh => "tanh",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for ActivationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activation function with its `a`/`b` coefficients.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActivationInfo {
    pub function: ActivationFunction,
    pub a: f32,
    pub b: f32,
}

impl ActivationInfo {
    pub fn new(function: ActivationFunction) -> Self {
        Self::with_bounds(function, 0.0, 0.0)
    }

    pub fn with_bounds(function: ActivationFunction, a: f32, b: f32) -> Self {
        Self { function, a, b }
    }

    /// Applies the activation to one value.
    pub fn apply(&self, x: f32) -> f32 {
        match self.function {
            ActivationFunction::Relu => x.max(0.0),
            ActivationFunction::BoundedRelu => x.max(0.0).min(self.a),
            ActivationFunction::LuBoundedRelu => x.max(self.b).min(self.a),
            ActivationFunction::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    self.a * x
                }
            }
            ActivationFunction::Logistic => 1.0 / (1.0 + (-x).exp()),
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::Identity => x,
        }
    }
}

impl fmt::Display for ActivationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function {
            ActivationFunction::BoundedRelu | ActivationFunction::LeakyRelu => {
                write!(f, "{}({})", self.function, self.a)
            }
            ActivationFunction::LuBoundedRelu => {
                write!(f, "{}({}, {})", self.function, self.a, self.b)
            }
            _ => write!(f, "{}", self.function),
        }
    }
}

/// Strides and padding of a sliding-window operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct PadStrideInfo {
    pub stride_x: usize,
    pub stride_y: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
}

impl PadStrideInfo {
    /// Symmetric padding.
    pub fn new(stride_x: usize, stride_y: usize, pad_x: usize, pad_y: usize) -> Self {
        Self {
            stride_x,
            stride_y,
            pad_left: pad_x,
            pad_right: pad_x,
            pad_top: pad_y,
            pad_bottom: pad_y,
        }
    }

    /// Output extent of a window of `kernel` sliding over `input` along x.
    pub fn output_width(&self, input: usize, kernel: usize) -> Option<usize> {
        scaled_dimension(input, kernel, self.pad_left, self.pad_right, self.stride_x)
    }

    /// Output extent of a window of `kernel` sliding over `input` along y.
    pub fn output_height(&self, input: usize, kernel: usize) -> Option<usize> {
        scaled_dimension(input, kernel, self.pad_top, self.pad_bottom, self.stride_y)
    }
}

fn scaled_dimension(input: usize, kernel: usize, pad_a: usize, pad_b: usize, stride: usize) -> Option<usize> {
    let padded = input + pad_a + pad_b;
    if stride == 0 || kernel == 0 || padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// Convolution algorithm a backend should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvolutionMethod {
    /// Let the backend choose.
    #[default]
    Default,
    Gemm,
    Direct,
    Winograd,
}

impl ConvolutionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Gemm => "gemm",
            Self::Direct => "direct",
            Self::Winograd => "winograd",
        }
    }
}

/// Parameters of a convolution node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvolutionInfo {
    pub pad_stride: PadStrideInfo,
    pub num_groups: usize,
    pub method: ConvolutionMethod,
    /// Activation fused into the convolution's output.
    pub fused_activation: Option<ActivationInfo>,
}

impl ConvolutionInfo {
    pub fn new(pad_stride: PadStrideInfo) -> Self {
        Self {
            pad_stride,
            num_groups: 1,
            method: ConvolutionMethod::Default,
            fused_activation: None,
        }
    }

    pub fn with_groups(mut self, num_groups: usize) -> Self {
        self.num_groups = num_groups;
        self
    }

    pub fn with_method(mut self, method: ConvolutionMethod) -> Self {
        self.method = method;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingType {
    Max,
    Avg,
}

/// Parameters of a pooling node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingInfo {
    pub pool_type: PoolingType,
    /// Window as `(width, height)`. Ignored when `global` is set.
    pub pool_size: (usize, usize),
    pub pad_stride: PadStrideInfo,
    /// Pools the whole spatial extent into one value per channel.
    pub global: bool,
}

impl PoolingInfo {
    pub fn new(pool_type: PoolingType, pool_size: usize, pad_stride: PadStrideInfo) -> Self {
        Self {
            pool_type,
            pool_size: (pool_size, pool_size),
            pad_stride,
            global: false,
        }
    }

    pub fn global(pool_type: PoolingType) -> Self {
        Self {
            pool_type,
            pool_size: (0, 0),
            pad_stride: PadStrideInfo::new(1, 1, 0, 0),
            global: true,
        }
    }
}

/// Binary element-wise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EltwiseOperation {
    Add,
    Sub,
    Mul,
}

impl EltwiseOperation {
    pub fn apply(self, lhs: f32, rhs: f32) -> f32 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
        }
    }
}
