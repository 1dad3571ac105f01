// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Convolution and fully connected layers.
//!
//! ```text
//!   src ──im2col──► scratch [K, P] ──┐
//!                                    ├─ gemm ─► [OFM/g, P] ─► bias, act ─► dst
//!   weights ──prepare──► [OFM, K] ───┘
//! ```
//!
//! `K` is `C/groups * KH * KW` and `P` the number of output pixels. The
//! im2col matrix lives in a [`Scratch`] workspace; weights are packed
//! once in `prepare`, after which the original weight tensor is marked
//! unused so the runtime can release it.

use super::gemm::{gemm, gemm_le_bytes};
use super::scratch::Scratch;
use super::Geometry;
use graph_ir::{
    read_f32, write_f32, ActivationInfo, ConvolutionInfo, ConvolutionMethod, ExecutableFunction, GraphContext,
    GraphError, PadStrideInfo, TensorHandle,
};
use std::rc::Rc;
use tensor_core::Target;

pub struct ConvolutionLayer {
    src: Rc<dyn TensorHandle>,
    weights: Rc<dyn TensorHandle>,
    bias: Option<Rc<dyn TensorHandle>>,
    dst: Rc<dyn TensorHandle>,
    input: Geometry,
    output: Geometry,
    kernel: Geometry,
    pad_stride: PadStrideInfo,
    groups: usize,
    activation: Option<ActivationInfo>,
    /// `None` selects the direct kernel.
    scratch: Option<Scratch>,
    packed: Option<Vec<f32>>,
}

impl ConvolutionLayer {
    pub fn new(
        src: Rc<dyn TensorHandle>,
        weights: Rc<dyn TensorHandle>,
        bias: Option<Rc<dyn TensorHandle>>,
        dst: Rc<dyn TensorHandle>,
        info: ConvolutionInfo,
        ctx: &GraphContext,
        target: Target,
    ) -> Result<Self, GraphError> {
        let input = Geometry::of(src.descriptor())?;
        let output = Geometry::of(dst.descriptor())?;
        let kernel = Geometry::of(weights.descriptor())?;
        let groups = info.num_groups.max(1);

        let scratch = match info.method {
            ConvolutionMethod::Direct => None,
            _ => {
                let rows = kernel.c * kernel.h * kernel.w;
                let size = rows * output.h * output.w * std::mem::size_of::<f32>();
                Some(Scratch::new(size, ctx, target)?)
            }
        };
        tracing::trace!(
            method = info.method.as_str(),
            groups,
            managed_scratch = scratch.as_ref().is_some_and(Scratch::is_managed),
            "convolution configured"
        );
        Ok(Self {
            src,
            weights,
            bias,
            dst,
            input,
            output,
            kernel,
            pad_stride: info.pad_stride,
            groups,
            activation: info.fused_activation,
            scratch,
            packed: None,
        })
    }

    /// Weights as `[OFM, K]` rows in `(ic, ky, kx)` order.
    fn pack_weights(&self) -> Result<Vec<f32>, GraphError> {
        let w = read_f32(&*self.weights)?;
        let k = self.kernel;
        let mut packed = Vec::with_capacity(w.len());
        for oc in 0..k.n {
            for ic in 0..k.c {
                for ky in 0..k.h {
                    for kx in 0..k.w {
                        packed.push(w[k.index(oc, ic, ky, kx)]);
                    }
                }
            }
        }
        Ok(packed)
    }

    /// Input coordinate under kernel tap `(ky, kx)` of output pixel `(oy, ox)`.
    #[inline]
    fn source_pixel(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<(usize, usize)> {
        let ps = &self.pad_stride;
        let y = (oy * ps.stride_y + ky).checked_sub(ps.pad_top)?;
        let x = (ox * ps.stride_x + kx).checked_sub(ps.pad_left)?;
        (y < self.input.h && x < self.input.w).then_some((y, x))
    }

    fn run_gemm(&self, scratch: &Scratch, src: &[f32], packed: &[f32]) -> Result<Vec<f32>, GraphError> {
        let (i, o, k) = (self.input, self.output, self.kernel);
        let pixels = o.h * o.w;
        let rows = k.c * k.h * k.w;
        let ofm_per_group = o.c / self.groups;
        let mut out = vec![0.0f32; o.len()];
        let mut tile = vec![0.0f32; ofm_per_group * pixels];

        for n in 0..o.n {
            for g in 0..self.groups {
                scratch.with_bytes_mut(|col| {
                    for ic in 0..k.c {
                        let c = g * k.c + ic;
                        for ky in 0..k.h {
                            for kx in 0..k.w {
                                let row = (ic * k.h + ky) * k.w + kx;
                                for oy in 0..o.h {
                                    for ox in 0..o.w {
                                        let v = self
                                            .source_pixel(oy, ox, ky, kx)
                                            .map_or(0.0, |(y, x)| src[i.index(n, c, y, x)]);
                                        let at = (row * pixels + oy * o.w + ox) * 4;
                                        col[at..at + 4].copy_from_slice(&v.to_le_bytes());
                                    }
                                }
                            }
                        }
                    }
                    let weights = &packed[g * ofm_per_group * rows..(g + 1) * ofm_per_group * rows];
                    gemm_le_bytes(weights, col, &mut tile, ofm_per_group, rows, pixels);
                })?;

                for oc in 0..ofm_per_group {
                    for oy in 0..o.h {
                        for ox in 0..o.w {
                            out[o.index(n, g * ofm_per_group + oc, oy, ox)] = tile[oc * pixels + oy * o.w + ox];
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn run_direct(&self, src: &[f32]) -> Result<Vec<f32>, GraphError> {
        let w = read_f32(&*self.weights)?;
        let (i, o, k) = (self.input, self.output, self.kernel);
        let ofm_per_group = o.c / self.groups;
        let mut out = vec![0.0f32; o.len()];
        for n in 0..o.n {
            for oc in 0..o.c {
                let g = oc / ofm_per_group;
                for oy in 0..o.h {
                    for ox in 0..o.w {
                        let mut acc = 0.0f32;
                        for ic in 0..k.c {
                            for ky in 0..k.h {
                                for kx in 0..k.w {
                                    if let Some((y, x)) = self.source_pixel(oy, ox, ky, kx) {
                                        acc += src[i.index(n, g * k.c + ic, y, x)] * w[k.index(oc, ic, ky, kx)];
                                    }
                                }
                            }
                        }
                        out[o.index(n, oc, oy, ox)] = acc;
                    }
                }
            }
        }
        Ok(out)
    }
}

impl ExecutableFunction for ConvolutionLayer {
    fn prepare(&mut self) -> Result<(), GraphError> {
        if self.scratch.is_some() && self.packed.is_none() {
            self.packed = Some(self.pack_weights()?);
            self.weights.mark_as_unused();
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), GraphError> {
        let src = read_f32(&*self.src)?;
        let mut out = match (&self.scratch, &self.packed) {
            (Some(scratch), Some(packed)) => self.run_gemm(scratch, &src, packed)?,
            (Some(scratch), None) => self.run_gemm(scratch, &src, &self.pack_weights()?)?,
            (None, _) => self.run_direct(&src)?,
        };

        let bias = self.bias.as_deref().map(read_f32).transpose()?;
        let o = self.output;
        for n in 0..o.n {
            for c in 0..o.c {
                let b = bias.as_ref().map_or(0.0, |v| v[c]);
                for y in 0..o.h {
                    for x in 0..o.w {
                        let v = &mut out[o.index(n, c, y, x)];
                        *v += b;
                        if let Some(act) = self.activation {
                            *v = act.apply(*v);
                        }
                    }
                }
            }
        }
        write_f32(&*self.dst, &out)
    }
}

/// `dst[b] = src[b] @ weights^T + bias` with `[num_outputs, K]` weights.
pub struct FullyConnectedLayer {
    src: Rc<dyn TensorHandle>,
    weights: Rc<dyn TensorHandle>,
    bias: Option<Rc<dyn TensorHandle>>,
    dst: Rc<dyn TensorHandle>,
    num_outputs: usize,
    /// Weights transposed to `[K, num_outputs]`.
    packed: Option<Vec<f32>>,
}

impl FullyConnectedLayer {
    pub fn new(
        src: Rc<dyn TensorHandle>,
        weights: Rc<dyn TensorHandle>,
        bias: Option<Rc<dyn TensorHandle>>,
        dst: Rc<dyn TensorHandle>,
        num_outputs: usize,
    ) -> Self {
        Self {
            src,
            weights,
            bias,
            dst,
            num_outputs,
            packed: None,
        }
    }

    fn depth(&self) -> usize {
        self.weights.descriptor().num_elements() / self.num_outputs.max(1)
    }

    fn transpose_weights(&self) -> Result<Vec<f32>, GraphError> {
        let w = read_f32(&*self.weights)?;
        let (n, k) = (self.num_outputs, self.depth());
        let mut packed = vec![0.0f32; w.len()];
        for row in 0..n {
            for col in 0..k {
                packed[col * n + row] = w[row * k + col];
            }
        }
        Ok(packed)
    }
}

impl ExecutableFunction for FullyConnectedLayer {
    fn prepare(&mut self) -> Result<(), GraphError> {
        if self.packed.is_none() {
            self.packed = Some(self.transpose_weights()?);
            self.weights.mark_as_unused();
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), GraphError> {
        let src = read_f32(&*self.src)?;
        let (n, k) = (self.num_outputs, self.depth());
        let batches = src.len() / k.max(1);
        let mut out = vec![0.0f32; batches * n];
        match &self.packed {
            Some(packed) => gemm(&src, packed, &mut out, batches, k, n),
            None => gemm(&src, &self.transpose_weights()?, &mut out, batches, k, n),
        }

        if let Some(bias) = self.bias.as_deref().map(read_f32).transpose()? {
            for row in out.chunks_mut(n) {
                row.iter_mut().zip(&bias).for_each(|(v, b)| *v += b);
            }
        }
        write_f32(&*self.dst, &out)
    }
}
