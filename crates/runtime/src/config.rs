// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! target = "neon"
//! memory_budget = "64M"
//! use_transition_memory_manager = true
//! use_function_memory_manager = true
//! enable_profiling = false
//! disabled_passes = ["NodeExecutionMethodMutator"]
//! max_iterations = 10
//! ```

use crate::RuntimeError;
use graph_ir::GraphConfig;
use graph_passes::{create_default_pass_manager, PassManager};
use memory_manager::MemoryBudget;
use std::path::Path;
use tensor_core::Target;

/// Configuration for finalizing and executing graphs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Requested target: `"neon"`, `"cl"` or `"unspecified"`.
    pub target: String,
    /// Per-target allocator ceiling, written like `"64M"`. Unbounded when
    /// absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_budget: Option<MemoryBudget>,
    /// Alias transition tensors with disjoint lifetimes.
    pub use_transition_memory_manager: bool,
    /// Share function scratch memory through the intra manager.
    pub use_function_memory_manager: bool,
    /// Record per-task timings.
    pub enable_profiling: bool,
    /// Names of default passes to turn off.
    pub disabled_passes: Vec<String>,
    /// Stop after this many iterations even if no accessor is exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target: "neon".to_string(),
            memory_budget: None,
            use_transition_memory_manager: true,
            use_function_memory_manager: true,
            enable_profiling: false,
            disabled_passes: Vec::new(),
            max_iterations: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str).map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the target name.
    pub fn parse_target(&self) -> Result<Target, RuntimeError> {
        Target::parse(&self.target).ok_or_else(|| {
            RuntimeError::ConfigError(format!(
                "unknown target '{}'; expected 'neon', 'cl' or 'unspecified'",
                self.target
            ))
        })
    }

    /// The [`GraphConfig`] this configuration describes.
    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            use_function_memory_manager: self.use_function_memory_manager,
            use_transition_memory_manager: self.use_transition_memory_manager,
            memory_budget: self.memory_budget,
            enable_profiling: self.enable_profiling,
        }
    }

    /// The default pass pipeline with `disabled_passes` turned off.
    pub fn create_pass_manager(&self) -> Result<PassManager, RuntimeError> {
        let mut pm = create_default_pass_manager();
        for name in &self.disabled_passes {
            if !pm.disable(name) {
                return Err(RuntimeError::ConfigError(format!("unknown pass '{name}'")));
            }
        }
        Ok(pm)
    }
}
