// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The backend contract and the registry that maps targets to backends.
//!
//! A backend validates nodes, creates tensor handles and turns nodes into
//! executable functions for one [`Target`]. The [`BackendRegistry`] is an
//! explicit value built once at start-up and shared with the graph
//! manager; there is no global registry.

use crate::{ExecutableFunction, Graph, GraphContext, GraphError, NodeId, NodeKind, TensorHandle, ValidationError};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tensor_core::{Target, TensorDescriptor};

/// Capabilities a backend provides to the graph layer.
pub trait DeviceBackend: fmt::Debug {
    fn name(&self) -> &str;

    /// `false` when the hardware or driver the backend needs is absent.
    fn is_backend_supported(&self) -> bool;

    /// Creates this backend's memory context in `ctx` if it has none.
    fn setup_backend_context(&self, ctx: &mut GraphContext) -> Result<(), GraphError>;

    /// Removes the memory context created by `setup_backend_context`.
    fn release_backend_context(&self, ctx: &mut GraphContext);

    fn create_tensor(&self, desc: &TensorDescriptor, ctx: &GraphContext) -> Result<Rc<dyn TensorHandle>, GraphError>;

    /// Creates a view of `parent` starting `byte_offset` bytes in.
    fn create_subtensor(
        &self,
        parent: &Rc<dyn TensorHandle>,
        desc: TensorDescriptor,
        byte_offset: usize,
    ) -> Result<Rc<dyn TensorHandle>, GraphError>;

    /// Checks whether an operation with these descriptors can run here.
    ///
    /// Passes call this on operations that do not exist in the graph yet.
    fn validate_operation(
        &self,
        kind: &NodeKind,
        inputs: &[Option<&TensorDescriptor>],
        outputs: &[Option<&TensorDescriptor>],
    ) -> Result<(), ValidationError>;

    fn validate_node(&self, graph: &Graph, node: NodeId) -> Result<(), ValidationError> {
        let kind = graph
            .node(node)
            .map(|n| n.kind())
            .ok_or_else(|| ValidationError::new(format!("node {node} does not exist")))?;
        self.validate_operation(kind, &graph.input_descriptors(node), &graph.output_descriptors(node))
    }

    /// Builds the function for `node`, or `None` for nodes that need no
    /// task (inputs, outputs, constants, disabled views).
    fn configure_node(
        &self,
        graph: &Graph,
        node: NodeId,
        ctx: &GraphContext,
    ) -> Result<Option<Box<dyn ExecutableFunction>>, GraphError>;
}

/// Maps each target to the backend that serves it.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<Target, Box<dyn DeviceBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` for `target`, replacing any previous one.
    pub fn add_backend(&mut self, target: Target, backend: impl DeviceBackend + 'static) {
        tracing::debug!(device = %target, backend = backend.name(), "backend registered");
        self.backends.insert(target, Box::new(backend));
    }

    /// Returns the backend for `target`, supported or not.
    pub fn find_backend(&self, target: Target) -> Result<&dyn DeviceBackend, GraphError> {
        self.backends
            .get(&target)
            .map(|b| &**b)
            .ok_or(GraphError::MissingBackend(target))
    }

    /// Returns the backend for `target` if it can run on this host.
    pub fn get_backend(&self, target: Target) -> Result<&dyn DeviceBackend, GraphError> {
        let backend = self.find_backend(target)?;
        if !backend.is_backend_supported() {
            return Err(GraphError::UnsupportedBackend(target));
        }
        Ok(backend)
    }

    pub fn contains(&self, target: Target) -> bool {
        self.backends.contains_key(&target)
    }

    /// Registered and supported.
    pub fn is_target_supported(&self, target: Target) -> bool {
        self.backends
            .get(&target)
            .is_some_and(|b| b.is_backend_supported())
    }

    /// First supported target, preferring the CPU backend.
    pub fn default_target(&self) -> Result<Target, GraphError> {
        [Target::Neon, Target::Cl]
            .into_iter()
            .find(|t| self.is_target_supported(*t))
            .ok_or(GraphError::NoSupportedBackend)
    }

    pub fn targets(&self) -> impl Iterator<Item = Target> + '_ {
        self.backends.keys().copied()
    }
}
