// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Ordered collection of mutators with per-pass enable flags.

use crate::mutators::{GraphMutator, MutationType};
use crate::PassError;
use graph_ir::{BackendRegistry, Graph};
use std::fmt;

struct Pass {
    mutator: Box<dyn GraphMutator>,
    enabled: bool,
}

/// Runs mutators in the order they were appended.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Pass>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, mutator: impl GraphMutator + 'static, enabled: bool) {
        self.passes.push(Pass {
            mutator: Box::new(mutator),
            enabled,
        });
    }

    pub fn num_passes(&self) -> usize {
        self.passes.len()
    }

    pub fn pass(&self, idx: usize) -> Option<&dyn GraphMutator> {
        self.passes.get(idx).map(|p| p.mutator.as_ref())
    }

    pub fn is_enabled(&self, idx: usize) -> bool {
        self.passes.get(idx).is_some_and(|p| p.enabled)
    }

    /// Enables or disables every pass named `name`. Returns `false` if
    /// none matched.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for pass in self.passes.iter_mut().filter(|p| p.mutator.name() == name) {
            pass.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn disable(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }

    /// Runs every enabled IR pass, then every enabled backend pass.
    pub fn run_all(&self, graph: &mut Graph, backends: &BackendRegistry) -> Result<(), PassError> {
        self.run_type(graph, backends, MutationType::Ir)?;
        self.run_type(graph, backends, MutationType::Backend)
    }

    /// Runs the enabled passes of one mutation type, in order.
    pub fn run_type(
        &self,
        graph: &mut Graph,
        backends: &BackendRegistry,
        mutation_type: MutationType,
    ) -> Result<(), PassError> {
        for idx in 0..self.passes.len() {
            if self.passes[idx].mutator.mutation_type() == mutation_type {
                self.run_index(graph, backends, idx)?;
            }
        }
        Ok(())
    }

    /// Runs pass `idx` if it exists and is enabled.
    pub fn run_index(&self, graph: &mut Graph, backends: &BackendRegistry, idx: usize) -> Result<(), PassError> {
        let Some(pass) = self.passes.get(idx).filter(|p| p.enabled) else {
            return Ok(());
        };
        tracing::debug!(
            pass = pass.mutator.name(),
            kind = %pass.mutator.mutation_type(),
            graph = graph.name(),
            "running pass"
        );
        pass.mutator.mutate(graph, backends)
    }
}

impl fmt::Debug for PassManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passes: Vec<(&str, bool)> = self
            .passes
            .iter()
            .map(|p| (p.mutator.name(), p.enabled))
            .collect();
        f.debug_struct("PassManager").field("passes", &passes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        name: &'static str,
        kind: MutationType,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl GraphMutator for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn mutation_type(&self) -> MutationType {
            self.kind
        }

        fn mutate(&self, _graph: &mut Graph, _backends: &BackendRegistry) -> Result<(), PassError> {
            self.log.borrow_mut().push(self.name);
            Ok(())
        }
    }

    fn manager(log: &Rc<RefCell<Vec<&'static str>>>) -> PassManager {
        let mut pm = PassManager::new();
        for (name, kind, enabled) in [
            ("backend-a", MutationType::Backend, true),
            ("ir-a", MutationType::Ir, true),
            ("ir-off", MutationType::Ir, false),
            ("backend-b", MutationType::Backend, true),
        ] {
            pm.append(
                Recorder {
                    name,
                    kind,
                    log: Rc::clone(log),
                },
                enabled,
            );
        }
        pm
    }

    #[test]
    fn test_run_all_orders_ir_before_backend() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let pm = manager(&log);
        let mut g = Graph::new("g");
        pm.run_all(&mut g, &BackendRegistry::new()).unwrap();
        assert_eq!(*log.borrow(), vec!["ir-a", "backend-a", "backend-b"]);
    }

    #[test]
    fn test_disable_and_run_index() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pm = manager(&log);
        assert!(pm.disable("backend-a"));
        assert!(!pm.disable("missing"));
        assert!(!pm.is_enabled(0));

        let mut g = Graph::new("g");
        pm.run_type(&mut g, &BackendRegistry::new(), MutationType::Backend).unwrap();
        pm.run_index(&mut g, &BackendRegistry::new(), 2).unwrap();
        pm.run_index(&mut g, &BackendRegistry::new(), 42).unwrap();
        assert_eq!(*log.borrow(), vec!["backend-b"]);

        assert_eq!(pm.pass(1).map(|p| p.name()), Some("ir-a"));
        pm.clear();
        assert_eq!(pm.num_passes(), 0);
    }
}
