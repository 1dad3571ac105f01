// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A sequential front end over one graph.
//!
//! [`Stream`] tracks the tail of the network being built so each layer
//! can be appended to the previous one, then finalizes and runs the graph
//! through its own [`GraphManager`].

use crate::{ExecutionMetrics, GraphManager, RuntimeConfig, RuntimeError};
use graph_ir::{Accessor, BackendRegistry, Graph, GraphBuilder, GraphContext, GraphError, NodeId, NodeIdxPair, NodeParams};
use std::rc::Rc;
use tensor_core::{Target, TensorDescriptor};

pub struct Stream {
    graph: Graph,
    ctx: GraphContext,
    manager: GraphManager,
    tail: Option<NodeIdxPair>,
    max_iterations: Option<usize>,
}

impl Stream {
    pub fn new(name: impl Into<String>, backends: Rc<BackendRegistry>) -> Self {
        Self {
            graph: Graph::new(name),
            ctx: GraphContext::default(),
            manager: GraphManager::new(backends),
            tail: None,
            max_iterations: None,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    pub fn manager(&self) -> &GraphManager {
        &self.manager
    }

    /// Output the next layer will consume.
    pub fn tail(&self) -> Option<NodeIdxPair> {
        self.tail
    }

    pub fn set_tail(&mut self, tail: NodeIdxPair) {
        self.tail = Some(tail);
    }

    /// Adds an input node and makes it the tail.
    pub fn add_input(&mut self, params: NodeParams, desc: TensorDescriptor, accessor: Accessor) -> NodeId {
        let nid = GraphBuilder::add_input_node(&mut self.graph, params, desc, accessor);
        self.tail = Some(NodeIdxPair::new(nid, 0));
        nid
    }

    /// Appends a layer fed by the tail; its first output becomes the tail.
    pub fn add_layer<F>(&mut self, build: F) -> Result<NodeId, GraphError>
    where
        F: FnOnce(&mut Graph, NodeIdxPair) -> Result<NodeId, GraphError>,
    {
        let tail = self.require_tail()?;
        let nid = build(&mut self.graph, tail)?;
        self.tail = Some(NodeIdxPair::new(nid, 0));
        Ok(nid)
    }

    /// Terminates the tail with an output node.
    pub fn add_output(&mut self, params: NodeParams, accessor: Accessor) -> Result<NodeId, GraphError> {
        let tail = self.require_tail()?;
        GraphBuilder::add_output_node(&mut self.graph, params, tail, accessor)
    }

    /// Finalizes the graph with the passes and options of `config`.
    ///
    /// `target` overrides the configured target.
    pub fn finalize(&mut self, target: Option<Target>, config: &RuntimeConfig) -> Result<(), RuntimeError> {
        let target = match target {
            Some(t) => t,
            None => config.parse_target()?,
        };
        self.ctx.set_config(config.graph_config());
        let pass_manager = config.create_pass_manager()?;
        self.max_iterations = config.max_iterations;
        self.manager
            .finalize_graph(&mut self.graph, &mut self.ctx, &pass_manager, target)
    }

    /// Runs the finalized graph until an accessor is exhausted or the
    /// configured iteration limit is reached.
    pub fn run(&mut self) -> Result<ExecutionMetrics, RuntimeError> {
        self.manager
            .execute_graph_with_limit(&mut self.graph, self.max_iterations)
    }

    fn require_tail(&self) -> Result<NodeIdxPair, GraphError> {
        self.tail
            .ok_or_else(|| GraphError::InvalidGraph(format!("stream '{}' has no input yet", self.graph.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_ir::{ActivationFunction, ActivationInfo, CaptureAccessor, DummyAccessor, FillAccessor};
    use reference_backend::ReferenceBackend;
    use tensor_core::DType;

    fn backends() -> Rc<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        registry.add_backend(Target::Neon, ReferenceBackend::new(Target::Neon));
        Rc::new(registry)
    }

    #[test]
    fn test_layer_without_input_fails() {
        let mut stream = Stream::new("empty", backends());
        let err = stream.add_output(NodeParams::new("out"), None).unwrap_err();
        assert!(matches!(err, GraphError::InvalidGraph(_)));
    }

    #[test]
    fn test_build_finalize_run() {
        let mut stream = Stream::new("bounded", backends());
        let capture = CaptureAccessor::new();
        stream.add_input(
            NodeParams::new("x"),
            TensorDescriptor::new([2, 2], DType::F32),
            Some(Box::new(FillAccessor::new(-2.0))),
        );
        stream
            .add_layer(|g, tail| {
                GraphBuilder::add_activation_node(
                    g,
                    NodeParams::new("bounded"),
                    tail,
                    ActivationInfo::with_bounds(ActivationFunction::BoundedRelu, 1.0, 0.0),
                )
            })
            .unwrap();
        stream.add_output(NodeParams::new("y"), Some(Box::new(capture.clone()))).unwrap();

        let config = RuntimeConfig {
            max_iterations: Some(3),
            ..Default::default()
        };
        stream.finalize(None, &config).unwrap();
        let metrics = stream.run().unwrap();
        assert_eq!(metrics.iterations, 3);
        assert_eq!(capture.sink().borrow()[2], vec![0.0; 4]);
    }

    #[test]
    fn test_finalize_twice_is_rejected() {
        let mut stream = Stream::new("twice", backends());
        stream.add_input(
            NodeParams::new("x"),
            TensorDescriptor::new([4], DType::F32),
            Some(Box::new(DummyAccessor::new(1))),
        );
        stream
            .add_layer(|g, tail| {
                GraphBuilder::add_activation_node(
                    g,
                    NodeParams::new("relu"),
                    tail,
                    ActivationInfo::new(ActivationFunction::Relu),
                )
            })
            .unwrap();
        stream.add_output(NodeParams::new("y"), None).unwrap();

        let config = RuntimeConfig::default();
        stream.finalize(Some(Target::Neon), &config).unwrap();
        let err = stream.finalize(Some(Target::Neon), &config).unwrap_err();
        assert!(matches!(err, RuntimeError::Graph(GraphError::GraphAlreadyRegistered(_))));
        assert!(stream.manager().is_registered(stream.graph().id()));
    }
}
