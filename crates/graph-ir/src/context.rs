// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph configuration and per-target memory management state.
//!
//! Each target that a graph uses gets one [`MemoryManagerContext`]: an
//! allocator plus two on-demand memory managers. The *intra* manager
//! serves scratch buffers inside functions; the *cross* manager, with its
//! single memory group, serves transition tensors between functions.
//! [`GraphContext::finalize`] populates both once the plan is built.

use crate::GraphError;
use memory_manager::{AllocationStats, Allocator, MemoryBudget, MemoryGroup, MemoryManager};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tensor_core::Target;

/// Options that shape how a graph is finalized.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Let functions share scratch buffers through the intra manager.
    pub use_function_memory_manager: bool,
    /// Alias transition tensors with disjoint lifetimes.
    pub use_transition_memory_manager: bool,
    /// Ceiling for each target's allocator. `None` means unbounded.
    pub memory_budget: Option<MemoryBudget>,
    /// Record per-task timings during execution.
    pub enable_profiling: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            use_function_memory_manager: true,
            use_transition_memory_manager: true,
            memory_budget: None,
            enable_profiling: false,
        }
    }
}

/// Memory management state of one target.
#[derive(Clone)]
pub struct MemoryManagerContext {
    pub target: Target,
    /// Scratch memory inside functions.
    pub intra_mm: Option<MemoryManager>,
    /// Transition tensors between functions.
    pub cross_mm: Option<MemoryManager>,
    /// The group every transition tensor of this target joins.
    pub cross_group: Option<MemoryGroup>,
    pub allocator: Option<Rc<dyn Allocator>>,
}

impl MemoryManagerContext {
    /// A context with an allocator and no memory managers.
    pub fn new(target: Target, allocator: Rc<dyn Allocator>) -> Self {
        Self {
            target,
            intra_mm: None,
            cross_mm: None,
            cross_group: None,
            allocator: Some(allocator),
        }
    }

    /// Adds fresh intra and cross managers and the cross group.
    pub fn with_memory_managers(mut self) -> Self {
        let cross_mm = MemoryManager::on_demand();
        self.cross_group = Some(MemoryGroup::new(Some(cross_mm.clone())));
        self.cross_mm = Some(cross_mm);
        self.intra_mm = Some(MemoryManager::on_demand());
        self
    }
}

impl fmt::Debug for MemoryManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManagerContext")
            .field("target", &self.target)
            .field("intra_mm", &self.intra_mm)
            .field("cross_mm", &self.cross_mm)
            .field("cross_group", &self.cross_group)
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// Configuration plus per-target memory state shared by one graph's
/// finalization and execution.
#[derive(Debug, Default)]
pub struct GraphContext {
    config: GraphConfig,
    memory_managers: BTreeMap<Target, MemoryManagerContext>,
}

impl GraphContext {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            memory_managers: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GraphConfig) {
        self.config = config;
    }

    /// Registers the memory context of a target.
    ///
    /// Returns `false` and keeps the existing context if the target
    /// already has one.
    pub fn insert_memory_management_ctx(&mut self, ctx: MemoryManagerContext) -> bool {
        if self.memory_managers.contains_key(&ctx.target) {
            return false;
        }
        self.memory_managers.insert(ctx.target, ctx);
        true
    }

    pub fn memory_management_ctx(&self, target: Target) -> Option<&MemoryManagerContext> {
        self.memory_managers.get(&target)
    }

    pub fn memory_management_ctx_mut(&mut self, target: Target) -> Option<&mut MemoryManagerContext> {
        self.memory_managers.get_mut(&target)
    }

    pub fn remove_memory_management_ctx(&mut self, target: Target) -> Option<MemoryManagerContext> {
        self.memory_managers.remove(&target)
    }

    pub fn memory_managers(&self) -> impl Iterator<Item = &MemoryManagerContext> {
        self.memory_managers.values()
    }

    /// Allocator statistics summed over every target.
    pub fn allocation_stats(&self) -> AllocationStats {
        let mut total = AllocationStats::default();
        for alloc in self.memory_managers.values().filter_map(|c| c.allocator.as_ref()) {
            total.accumulate(&alloc.stats());
        }
        total
    }

    /// Populates every target's intra and cross managers with one pool.
    pub fn finalize(&mut self) -> Result<(), GraphError> {
        for ctx in self.memory_managers.values() {
            let Some(allocator) = &ctx.allocator else {
                continue;
            };
            for mm in [&ctx.intra_mm, &ctx.cross_mm].into_iter().flatten() {
                mm.populate(Rc::clone(allocator), 1)?;
            }
            tracing::debug!(
                target_device = %ctx.target,
                cross_pool_bytes = ctx.cross_mm.as_ref().map_or(0, MemoryManager::pool_size_bytes),
                intra_pool_bytes = ctx.intra_mm.as_ref().map_or(0, MemoryManager::pool_size_bytes),
                "memory managers populated"
            );
        }
        Ok(())
    }
}
