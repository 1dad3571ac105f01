// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer-level helpers that add nodes together with their constants.

use crate::{
    ActivationInfo, ConvolutionInfo, ConvolutionMethod, EltwiseOperation, Graph, GraphError, NodeId,
    NodeIdxPair, NodeKind, NodeParams, PadStrideInfo, PoolingInfo, TensorAccessor,
};
use tensor_core::{DataLayout, DataLayoutDimension, Shape, TensorDescriptor};

/// Optional accessor attached to a created tensor.
pub type Accessor = Option<Box<dyn TensorAccessor>>;

/// Adds layers to a [`Graph`].
///
/// Each helper validates that the input pair exists, creates the node,
/// creates `Const` nodes for weights and other parameters, and connects
/// everything. Helpers return the id of the main node.
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn add_input_node(g: &mut Graph, params: NodeParams, desc: TensorDescriptor, accessor: Accessor) -> NodeId {
        let nid = g.add_node(params, NodeKind::Input { desc });
        set_accessor(g, nid, accessor);
        nid
    }

    pub fn add_const_node(g: &mut Graph, params: NodeParams, desc: TensorDescriptor, accessor: Accessor) -> NodeId {
        let nid = g.add_node(params, NodeKind::Const { desc });
        set_accessor(g, nid, accessor);
        nid
    }

    /// Adds an output sink. The accessor is bound to the incoming tensor.
    pub fn add_output_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        accessor: Accessor,
    ) -> Result<NodeId, GraphError> {
        let tensor = input_tensor(g, input)?;
        let nid = g.add_node(params, NodeKind::Output);
        g.add_connection(input.node, input.index, nid, 0)?;
        if let Some(t) = g.tensor_mut(tensor) {
            t.set_accessor(accessor);
        }
        Ok(nid)
    }

    pub fn add_activation_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        info: ActivationInfo,
    ) -> Result<NodeId, GraphError> {
        Self::add_single_input(g, params, input, NodeKind::Activation(info))
    }

    /// Adds a batch normalization with `[C]` mean and variance constants.
    ///
    /// Beta and gamma constants are created only when their accessors are
    /// given.
    #[allow(clippy::too_many_arguments)]
    pub fn add_batch_normalization_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        epsilon: f32,
        mean: Accessor,
        var: Accessor,
        beta: Accessor,
        gamma: Accessor,
    ) -> Result<NodeId, GraphError> {
        let src = input_desc(g, input)?;
        let channels = src.dimension(DataLayoutDimension::Channel)?;
        let common = src.clone().with_shape(Shape::vector(channels));

        let nid = g.add_node(
            params.clone(),
            NodeKind::BatchNormalization {
                epsilon,
                fused_activation: None,
            },
        );
        g.add_connection(input.node, input.index, nid, 0)?;

        let slots = [("Mean", mean, 1), ("Variance", var, 2), ("Beta", beta, 3), ("Gamma", gamma, 4)];
        for (suffix, accessor, slot) in slots {
            if slot >= 3 && accessor.is_none() {
                continue;
            }
            let c = Self::add_const_node(g, sub_params(&params, suffix), common.clone(), accessor);
            g.add_connection(c, 0, nid, slot)?;
        }
        Ok(nid)
    }

    /// Adds a convolution and its weights (and bias, when an accessor is
    /// given).
    ///
    /// Weights are `[OFM, C/groups, KH, KW]` for NCHW inputs and
    /// `[OFM, KH, KW, C/groups]` for NHWC inputs.
    #[allow(clippy::too_many_arguments)]
    pub fn add_convolution_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        kernel: (usize, usize),
        depth: usize,
        pad_stride: PadStrideInfo,
        num_groups: usize,
        method: ConvolutionMethod,
        weights: Accessor,
        bias: Accessor,
    ) -> Result<NodeId, GraphError> {
        if num_groups == 0 || depth == 0 {
            return Err(GraphError::InvalidGraph(format!(
                "convolution '{}' needs non-zero depth and group count",
                params.name
            )));
        }
        let src = input_desc(g, input)?;
        let channels = src.dimension(DataLayoutDimension::Channel)?;
        let (kernel_w, kernel_h) = kernel;
        let w_shape = match src.layout {
            DataLayout::Nchw => Shape::from([depth, channels / num_groups, kernel_h, kernel_w]),
            DataLayout::Nhwc => Shape::from([depth, kernel_h, kernel_w, channels / num_groups]),
        };
        let w_desc = src.clone().with_shape(w_shape);
        let has_bias = bias.is_some();

        let info = ConvolutionInfo::new(pad_stride)
            .with_groups(num_groups)
            .with_method(method);
        let nid = g.add_node(params.clone(), NodeKind::Convolution(info));
        g.add_connection(input.node, input.index, nid, 0)?;

        let w = Self::add_const_node(g, sub_params(&params, "Weights"), w_desc, weights);
        g.add_connection(w, 0, nid, 1)?;
        if has_bias {
            let b_desc = src.with_shape(Shape::vector(depth));
            let b = Self::add_const_node(g, sub_params(&params, "Bias"), b_desc, bias);
            g.add_connection(b, 0, nid, 2)?;
        }
        Ok(nid)
    }

    pub fn add_concatenate_node(
        g: &mut Graph,
        params: NodeParams,
        inputs: &[NodeIdxPair],
        axis: DataLayoutDimension,
    ) -> Result<NodeId, GraphError> {
        if inputs.is_empty() {
            return Err(GraphError::InvalidGraph(format!(
                "concatenation '{}' has no inputs",
                params.name
            )));
        }
        for pair in inputs {
            input_tensor(g, *pair)?;
        }
        let nid = g.add_node(
            params,
            NodeKind::Concatenate {
                num_inputs: inputs.len(),
                axis,
                enabled: true,
            },
        );
        for (slot, pair) in inputs.iter().enumerate() {
            g.add_connection(pair.node, pair.index, nid, slot)?;
        }
        Ok(nid)
    }

    pub fn add_split_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        num_splits: usize,
        axis: usize,
    ) -> Result<NodeId, GraphError> {
        Self::add_single_input(
            g,
            params,
            input,
            NodeKind::Split {
                num_splits,
                axis,
                enabled: true,
            },
        )
    }

    pub fn add_elementwise_node(
        g: &mut Graph,
        params: NodeParams,
        lhs: NodeIdxPair,
        rhs: NodeIdxPair,
        operation: EltwiseOperation,
    ) -> Result<NodeId, GraphError> {
        input_tensor(g, lhs)?;
        input_tensor(g, rhs)?;
        let nid = g.add_node(params, NodeKind::Eltwise(operation));
        g.add_connection(lhs.node, lhs.index, nid, 0)?;
        g.add_connection(rhs.node, rhs.index, nid, 1)?;
        Ok(nid)
    }

    /// Adds a fully connected layer with `[num_outputs, K]` weights, where
    /// `K` is the number of elements per batch of the input.
    pub fn add_fully_connected_layer(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        num_outputs: usize,
        weights: Accessor,
        bias: Accessor,
    ) -> Result<NodeId, GraphError> {
        let src = input_desc(g, input)?;
        let batches = match src.shape.rank() {
            0 | 1 => 1,
            _ => src.shape.dims()[0].max(1),
        };
        let k = src.shape.num_elements() / batches;
        let has_bias = bias.is_some();

        let nid = g.add_node(params.clone(), NodeKind::FullyConnected { num_outputs });
        g.add_connection(input.node, input.index, nid, 0)?;

        let w_desc = src.clone().with_shape(Shape::matrix(num_outputs, k));
        let w = Self::add_const_node(g, sub_params(&params, "Weights"), w_desc, weights);
        g.add_connection(w, 0, nid, 1)?;
        if has_bias {
            let b_desc = src.with_shape(Shape::vector(num_outputs));
            let b = Self::add_const_node(g, sub_params(&params, "Bias"), b_desc, bias);
            g.add_connection(b, 0, nid, 2)?;
        }
        Ok(nid)
    }

    pub fn add_pooling_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        info: PoolingInfo,
    ) -> Result<NodeId, GraphError> {
        Self::add_single_input(g, params, input, NodeKind::Pooling(info))
    }

    pub fn add_softmax_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        beta: f32,
    ) -> Result<NodeId, GraphError> {
        Self::add_single_input(g, params, input, NodeKind::Softmax { beta })
    }

    pub fn add_flatten_node(g: &mut Graph, params: NodeParams, input: NodeIdxPair) -> Result<NodeId, GraphError> {
        Self::add_single_input(g, params, input, NodeKind::Flatten)
    }

    pub fn add_reshape_node(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        shape: Shape,
    ) -> Result<NodeId, GraphError> {
        Self::add_single_input(g, params, input, NodeKind::Reshape { shape })
    }

    fn add_single_input(
        g: &mut Graph,
        params: NodeParams,
        input: NodeIdxPair,
        kind: NodeKind,
    ) -> Result<NodeId, GraphError> {
        input_tensor(g, input)?;
        let nid = g.add_node(params, kind);
        g.add_connection(input.node, input.index, nid, 0)?;
        Ok(nid)
    }
}

fn input_tensor(g: &Graph, pair: NodeIdxPair) -> Result<crate::TensorId, GraphError> {
    g.node_output_tensor(pair.node, pair.index).ok_or_else(|| {
        GraphError::InvalidConnection(format!("{} has no output {}", pair.node, pair.index))
    })
}

fn input_desc(g: &Graph, pair: NodeIdxPair) -> Result<TensorDescriptor, GraphError> {
    let tid = input_tensor(g, pair)?;
    g.tensor(tid)
        .map(|t| t.desc().clone())
        .ok_or_else(|| GraphError::InvalidGraph(format!("tensor {tid} is missing")))
}

fn set_accessor(g: &mut Graph, nid: NodeId, accessor: Accessor) {
    if let Some(t) = g.node_output_tensor(nid, 0).and_then(|tid| g.tensor_mut(tid)) {
        t.set_accessor(accessor);
    }
}

fn sub_params(params: &NodeParams, suffix: &str) -> NodeParams {
    NodeParams {
        name: format!("{}{}", params.name, suffix),
        target: params.target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FillAccessor, NodeType};
    use tensor_core::DType;

    fn input(g: &mut Graph, dims: [usize; 4], layout: DataLayout) -> NodeId {
        let desc = TensorDescriptor::new(dims, DType::F32).with_layout(layout);
        GraphBuilder::add_input_node(g, NodeParams::new("in"), desc, None)
    }

    #[test]
    fn test_convolution_creates_weights_and_bias() {
        let mut g = Graph::new("conv");
        let i = input(&mut g, [1, 4, 8, 8], DataLayout::Nchw);
        let conv = GraphBuilder::add_convolution_node(
            &mut g,
            NodeParams::new("conv"),
            NodeIdxPair::new(i, 0),
            (3, 3),
            6,
            PadStrideInfo::new(1, 1, 1, 1),
            2,
            ConvolutionMethod::Default,
            Some(Box::new(FillAccessor::new(0.5))),
            Some(Box::new(FillAccessor::new(0.0))),
        )
        .unwrap();

        assert_eq!(g.nodes_of(NodeType::Const).len(), 2);
        let w = g.node_input_tensor(conv, 1).unwrap();
        assert_eq!(g.tensor(w).unwrap().desc().shape.dims(), &[6, 2, 3, 3]);
        assert!(g.tensor(w).unwrap().has_accessor());
        let out = g.node_output_tensor(conv, 0).unwrap();
        assert_eq!(g.tensor(out).unwrap().desc().shape.dims(), &[1, 6, 8, 8]);
        assert_eq!(g.node(NodeId::new(3)).unwrap().name(), "convBias");
    }

    #[test]
    fn test_convolution_without_bias_nhwc() {
        let mut g = Graph::new("conv");
        let i = input(&mut g, [1, 5, 5, 8], DataLayout::Nhwc);
        let conv = GraphBuilder::add_convolution_node(
            &mut g,
            NodeParams::new("conv"),
            NodeIdxPair::new(i, 0),
            (3, 3),
            4,
            PadStrideInfo::new(1, 1, 0, 0),
            1,
            ConvolutionMethod::Gemm,
            None,
            None,
        )
        .unwrap();
        assert!(g.node_input_tensor(conv, 2).is_none());
        let w = g.node_input_tensor(conv, 1).unwrap();
        assert_eq!(g.tensor(w).unwrap().desc().shape.dims(), &[4, 3, 3, 8]);
    }

    #[test]
    fn test_batch_normalization_optional_params() {
        let mut g = Graph::new("bn");
        let i = input(&mut g, [1, 3, 4, 4], DataLayout::Nchw);
        let bn = GraphBuilder::add_batch_normalization_node(
            &mut g,
            NodeParams::new("bn"),
            NodeIdxPair::new(i, 0),
            1e-3,
            None,
            None,
            None,
            Some(Box::new(FillAccessor::new(1.0))),
        )
        .unwrap();
        let node = g.node(bn).unwrap();
        assert!(node.input_edge(3).is_none());
        assert!(node.input_edge(4).is_some());
        let mean = g.node_input_tensor(bn, 1).unwrap();
        assert_eq!(g.tensor(mean).unwrap().desc().shape.dims(), &[3]);
    }

    #[test]
    fn test_output_accessor_bound_to_input_tensor() {
        let mut g = Graph::new("out");
        let i = input(&mut g, [1, 1, 2, 2], DataLayout::Nchw);
        GraphBuilder::add_output_node(
            &mut g,
            NodeParams::new("out"),
            NodeIdxPair::new(i, 0),
            Some(Box::new(FillAccessor::new(0.0))),
        )
        .unwrap();
        let t = g.node_output_tensor(i, 0).unwrap();
        assert!(g.tensor(t).unwrap().has_accessor());

        let bad = GraphBuilder::add_output_node(&mut g, NodeParams::new("bad"), NodeIdxPair::new(i, 4), None);
        assert!(matches!(bad, Err(GraphError::InvalidConnection(_))));
    }

    #[test]
    fn test_fully_connected_weights_shape() {
        let mut g = Graph::new("fc");
        let i = input(&mut g, [2, 3, 2, 2], DataLayout::Nchw);
        let fc = GraphBuilder::add_fully_connected_layer(
            &mut g,
            NodeParams::new("fc"),
            NodeIdxPair::new(i, 0),
            5,
            None,
            None,
        )
        .unwrap();
        let w = g.node_input_tensor(fc, 1).unwrap();
        assert_eq!(g.tensor(w).unwrap().desc().shape.dims(), &[5, 12]);
        let out = g.node_output_tensor(fc, 0).unwrap();
        assert_eq!(g.tensor(out).unwrap().desc().shape.dims(), &[2, 5]);
    }
}
