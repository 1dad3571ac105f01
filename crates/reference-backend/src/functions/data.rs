// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Data movement: concatenation, split and reshaping copies.
//!
//! Concatenation and split see a tensor as `[outer, axis, inner]` and
//! move whole `axis * inner` blocks per outer index.

use graph_ir::{read_f32, write_f32, ExecutableFunction, GraphError, TensorHandle};
use std::rc::Rc;
use tensor_core::{DataLayoutDimension, Shape, TensorError};

/// Number of outer rows and elements per row when splitting at `axis`.
fn rows_at(shape: &Shape, axis: usize) -> Result<(usize, usize), TensorError> {
    if axis >= shape.rank() {
        return Err(TensorError::AxisOutOfRange {
            axis,
            shape: shape.clone(),
        });
    }
    let outer = shape.dims()[..axis].iter().product();
    let row = shape.dims()[axis..].iter().product();
    Ok((outer, row))
}

pub struct ConcatenateLayer {
    inputs: Vec<Rc<dyn TensorHandle>>,
    dst: Rc<dyn TensorHandle>,
    axis: usize,
}

impl ConcatenateLayer {
    pub fn new(
        inputs: Vec<Rc<dyn TensorHandle>>,
        dst: Rc<dyn TensorHandle>,
        axis: DataLayoutDimension,
    ) -> Result<Self, GraphError> {
        let axis = dst.descriptor().dimension_idx(axis)?;
        Ok(Self { inputs, dst, axis })
    }
}

impl ExecutableFunction for ConcatenateLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let (outer, _) = rows_at(&self.dst.descriptor().shape, self.axis)?;
        let mut sources = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let (_, row) = rows_at(&input.descriptor().shape, self.axis)?;
            sources.push((read_f32(&**input)?, row));
        }

        let mut out = Vec::with_capacity(self.dst.descriptor().num_elements());
        for o in 0..outer {
            for (values, row) in &sources {
                out.extend_from_slice(&values[o * row..(o + 1) * row]);
            }
        }
        write_f32(&*self.dst, &out)
    }
}

pub struct SplitLayer {
    src: Rc<dyn TensorHandle>,
    outputs: Vec<Rc<dyn TensorHandle>>,
    axis: usize,
}

impl SplitLayer {
    pub fn new(src: Rc<dyn TensorHandle>, outputs: Vec<Rc<dyn TensorHandle>>, axis: usize) -> Self {
        Self { src, outputs, axis }
    }
}

impl ExecutableFunction for SplitLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        let (outer, src_row) = rows_at(&self.src.descriptor().shape, self.axis)?;
        let values = read_f32(&*self.src)?;

        let mut start = 0;
        for output in &self.outputs {
            let (_, row) = rows_at(&output.descriptor().shape, self.axis)?;
            let mut out = Vec::with_capacity(outer * row);
            for o in 0..outer {
                let base = o * src_row + start;
                out.extend_from_slice(&values[base..base + row]);
            }
            write_f32(&**output, &out)?;
            start += row;
        }
        Ok(())
    }
}

/// Copies the elements unchanged. Serves flatten and reshape, whose
/// output differs from the input only in shape.
pub struct CopyLayer {
    src: Rc<dyn TensorHandle>,
    dst: Rc<dyn TensorHandle>,
}

impl CopyLayer {
    pub fn new(src: Rc<dyn TensorHandle>, dst: Rc<dyn TensorHandle>) -> Self {
        Self { src, dst }
    }
}

impl ExecutableFunction for CopyLayer {
    fn run(&mut self) -> Result<(), GraphError> {
        if self.src.id() == self.dst.id() {
            return Ok(());
        }
        write_f32(&*self.dst, &read_f32(&*self.src)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::tensor;
    use super::*;
    use tensor_core::{DType, DataLayout, TensorDescriptor};

    #[test]
    fn test_concatenate_channels_nchw() {
        let a = tensor(TensorDescriptor::new([1, 1, 1, 2], DType::F32), &[1.0, 2.0]);
        let b = tensor(TensorDescriptor::new([1, 2, 1, 2], DType::F32), &[3.0, 4.0, 5.0, 6.0]);
        let dst = tensor(TensorDescriptor::new([1, 3, 1, 2], DType::F32), &[]);
        ConcatenateLayer::new(vec![a, b], dst.clone(), DataLayoutDimension::Channel)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(read_f32(&*dst).unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_concatenate_channels_nhwc_interleaves() {
        let nhwc = |c| TensorDescriptor::new([1, 1, 2, c], DType::F32).with_layout(DataLayout::Nhwc);
        let a = tensor(nhwc(1), &[1.0, 2.0]);
        let b = tensor(nhwc(1), &[10.0, 20.0]);
        let dst = tensor(nhwc(2), &[]);
        ConcatenateLayer::new(vec![a, b], dst.clone(), DataLayoutDimension::Channel)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(read_f32(&*dst).unwrap(), vec![1.0, 10.0, 2.0, 20.0]);
    }

    #[test]
    fn test_split_inverts_concatenate() {
        let src = tensor(TensorDescriptor::new([2, 4], DType::F32), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let left = tensor(TensorDescriptor::new([2, 2], DType::F32), &[]);
        let right = tensor(TensorDescriptor::new([2, 2], DType::F32), &[]);
        SplitLayer::new(src, vec![left.clone(), right.clone()], 1).run().unwrap();
        assert_eq!(read_f32(&*left).unwrap(), vec![0.0, 1.0, 4.0, 5.0]);
        assert_eq!(read_f32(&*right).unwrap(), vec![2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn test_split_axis_out_of_range() {
        let src = tensor(TensorDescriptor::new([4], DType::F32), &[]);
        let out = tensor(TensorDescriptor::new([4], DType::F32), &[]);
        let err = SplitLayer::new(src, vec![out], 2).run().unwrap_err();
        assert!(matches!(err, GraphError::Tensor(TensorError::AxisOutOfRange { axis: 2, .. })));
    }
}
