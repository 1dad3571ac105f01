// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise functions: activation, batch normalization, binary ops.

use super::Geometry;
use graph_ir::{read_f32, write_f32, ActivationInfo, EltwiseOperation, ExecutableFunction, GraphError, TensorHandle};
use std::rc::Rc;
use tensor_core::TensorError;

pub struct ActivationLayer {
    src: Rc<dyn TensorHandle>,
    dst: Rc<dyn TensorHandle>,
    info: ActivationInfo,
}

impl ActivationLayer {
    pub fn new(src: Rc<dyn TensorHandle>, dst: Rc<dyn TensorHandle>, info: ActivationInfo) -> Self {
        Self { src, dst, info }
    }
}

impl ExecutableFunction for ActivationLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let mut values = read_f32(&*self.src)?;
        values.iter_mut().for_each(|v| *v = self.info.apply(*v));
        write_f32(&*self.dst, &values)
    }
}

/// `dst = (src - mean) / sqrt(var + epsilon) * gamma + beta`, per channel.
///
/// A missing gamma is 1, a missing beta is 0.
pub struct BatchNormalizationLayer {
    src: Rc<dyn TensorHandle>,
    mean: Rc<dyn TensorHandle>,
    var: Rc<dyn TensorHandle>,
    beta: Option<Rc<dyn TensorHandle>>,
    gamma: Option<Rc<dyn TensorHandle>>,
    dst: Rc<dyn TensorHandle>,
    epsilon: f32,
    fused_activation: Option<ActivationInfo>,
    geometry: Geometry,
}

impl BatchNormalizationLayer {
    pub fn new(
        src: Rc<dyn TensorHandle>,
        [mean, var]: [Rc<dyn TensorHandle>; 2],
        beta: Option<Rc<dyn TensorHandle>>,
        gamma: Option<Rc<dyn TensorHandle>>,
        dst: Rc<dyn TensorHandle>,
        epsilon: f32,
        fused_activation: Option<ActivationInfo>,
    ) -> Result<Self, GraphError> {
        let geometry = Geometry::of(src.descriptor())?;
        Ok(Self {
            src,
            mean,
            var,
            beta,
            gamma,
            dst,
            epsilon,
            fused_activation,
            geometry,
        })
    }
}

impl ExecutableFunction for BatchNormalizationLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let g = self.geometry;
        let src = read_f32(&*self.src)?;
        let mean = read_f32(&*self.mean)?;
        let var = read_f32(&*self.var)?;
        let beta = self.beta.as_deref().map(read_f32).transpose()?;
        let gamma = self.gamma.as_deref().map(read_f32).transpose()?;

        // Fold each channel into one scale and shift.
        let (scale, shift): (Vec<f32>, Vec<f32>) = (0..g.c)
            .map(|c| {
                let gamma_c = gamma.as_ref().map_or(1.0, |v| v[c]);
                let beta_c = beta.as_ref().map_or(0.0, |v| v[c]);
                let scale = gamma_c / (var[c] + self.epsilon).sqrt();
                (scale, beta_c - mean[c] * scale)
            })
            .unzip();

        let mut out = vec![0.0f32; g.len()];
        for n in 0..g.n {
            for c in 0..g.c {
                for y in 0..g.h {
                    for x in 0..g.w {
                        let i = g.index(n, c, y, x);
                        let v = src[i] * scale[c] + shift[c];
                        out[i] = self.fused_activation.map_or(v, |act| act.apply(v));
                    }
                }
            }
        }
        write_f32(&*self.dst, &out)
    }
}

/// Binary element-wise operation on two tensors of equal shape.
pub struct EltwiseLayer {
    lhs: Rc<dyn TensorHandle>,
    rhs: Rc<dyn TensorHandle>,
    dst: Rc<dyn TensorHandle>,
    op: EltwiseOperation,
}

impl EltwiseLayer {
    pub fn new(
        lhs: Rc<dyn TensorHandle>,
        rhs: Rc<dyn TensorHandle>,
        dst: Rc<dyn TensorHandle>,
        op: EltwiseOperation,
    ) -> Self {
        Self { lhs, rhs, dst, op }
    }
}

impl ExecutableFunction for EltwiseLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let (lhs_shape, rhs_shape) = (&self.lhs.descriptor().shape, &self.rhs.descriptor().shape);
        if lhs_shape != rhs_shape {
            return Err(TensorError::ShapeMismatch {
                op: "eltwise",
                lhs: lhs_shape.clone(),
                rhs: rhs_shape.clone(),
            }
            .into());
        }
        let lhs = read_f32(&*self.lhs)?;
        let rhs = read_f32(&*self.rhs)?;
        let out: Vec<f32> = lhs.iter().zip(&rhs).map(|(a, b)| self.op.apply(*a, *b)).collect();
        write_f32(&*self.dst, &out)
    }
}
