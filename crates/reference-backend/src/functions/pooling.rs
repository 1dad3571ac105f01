// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pooling and softmax.

use super::Geometry;
use graph_ir::{read_f32, write_f32, ExecutableFunction, GraphError, PoolingInfo, PoolingType, TensorHandle};
use std::rc::Rc;

/// Max or average pooling over a sliding window.
///
/// Padded positions never contribute: a max ignores them and an average
/// divides by the number of real elements under the window.
pub struct PoolingLayer {
    src: Rc<dyn TensorHandle>,
    dst: Rc<dyn TensorHandle>,
    pool_type: PoolingType,
    window: (usize, usize),
    stride: (usize, usize),
    pad: (usize, usize),
    input: Geometry,
    output: Geometry,
}

impl PoolingLayer {
    pub fn new(src: Rc<dyn TensorHandle>, dst: Rc<dyn TensorHandle>, info: PoolingInfo) -> Result<Self, GraphError> {
        let input = Geometry::of(src.descriptor())?;
        let output = Geometry::of(dst.descriptor())?;
        let ps = info.pad_stride;
        let (window, stride, pad) = if info.global {
            ((input.w, input.h), (1, 1), (0, 0))
        } else {
            (info.pool_size, (ps.stride_x, ps.stride_y), (ps.pad_left, ps.pad_top))
        };
        Ok(Self {
            src,
            dst,
            pool_type: info.pool_type,
            window,
            stride,
            pad,
            input,
            output,
        })
    }

    fn pool(&self, src: &[f32], n: usize, c: usize, oy: usize, ox: usize) -> f32 {
        let (i, (pw, ph)) = (self.input, self.window);
        // Window bounds in input coordinates, clipped to the image.
        let y0 = (oy * self.stride.1).saturating_sub(self.pad.1);
        let x0 = (ox * self.stride.0).saturating_sub(self.pad.0);
        let y1 = (oy * self.stride.1 + ph).saturating_sub(self.pad.1).min(i.h);
        let x1 = (ox * self.stride.0 + pw).saturating_sub(self.pad.0).min(i.w);

        let values = (y0..y1).flat_map(|y| (x0..x1).map(move |x| src[i.index(n, c, y, x)]));
        match self.pool_type {
            PoolingType::Max => values.fold(f32::NEG_INFINITY, f32::max),
            PoolingType::Avg => {
                let count = (y1.saturating_sub(y0) * x1.saturating_sub(x0)).max(1);
                values.sum::<f32>() / count as f32
            }
        }
    }
}

impl ExecutableFunction for PoolingLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let src = read_f32(&*self.src)?;
        let o = self.output;
        let mut out = vec![0.0f32; o.len()];
        for n in 0..o.n {
            for c in 0..o.c {
                for y in 0..o.h {
                    for x in 0..o.w {
                        out[o.index(n, c, y, x)] = self.pool(&src, n, c, y, x);
                    }
                }
            }
        }
        write_f32(&*self.dst, &out)
    }
}

/// Softmax along the last dimension, `exp(beta * (x - max)) / sum`.
pub struct SoftmaxLayer {
    src: Rc<dyn TensorHandle>,
    dst: Rc<dyn TensorHandle>,
    beta: f32,
}

impl SoftmaxLayer {
    pub fn new(src: Rc<dyn TensorHandle>, dst: Rc<dyn TensorHandle>, beta: f32) -> Self {
        Self { src, dst, beta }
    }
}

impl ExecutableFunction for SoftmaxLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let mut values = read_f32(&*self.src)?;
        let row_len = self.src.descriptor().shape.dims().last().copied().unwrap_or(1);
        if row_len == 0 {
            return Ok(());
        }
        for row in values.chunks_mut(row_len) {
            // Subtract the max before exponentiating to avoid overflow.
            let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for v in row.iter_mut() {
                *v = (self.beta * (*v - max_val)).exp();
                sum += *v;
            }
            if sum > 0.0 {
                let inv_sum = 1.0 / sum;
                row.iter_mut().for_each(|v| *v *= inv_sum);
            }
        }
        write_f32(&*self.dst, &values)
    }
}
