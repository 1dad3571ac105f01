// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-passes
//!
//! Rewrites a [`graph_ir::Graph`] before it is configured for execution,
//! using pluggable mutators run by a [`PassManager`].
//!
//! # Mutators
//!
//! | Mutator | Type | Effect |
//! |---|---|---|
//! | [`NodeFusionMutator`] | IR | Folds ReLU variants into the preceding convolution or batch norm |
//! | [`GroupedConvolutionMutator`] | IR | Lowers unsupported grouped convolutions to split/conv/concat |
//! | [`InPlaceOperationMutator`] | Backend | Runs activations and batch norms over their input |
//! | [`ConcatSubTensorMutator`] | Backend | Replaces contiguous concatenations with output views |
//! | [`SplitSubTensorMutator`] | Backend | Replaces contiguous splits with input views |
//! | [`NodeExecutionMethodMutator`] | Backend | Resets rejected convolution methods to the default |
//!
//! IR mutators run before tensor handles exist; backend mutators run
//! after, and may rebind handles.
//!
//! # Trait-Based Extensibility
//!
//! All mutators implement [`GraphMutator`], so new rewrites can be added
//! without modifying the runtime:
//!
//! ```ignore
//! struct MyRewrite;
//! impl GraphMutator for MyRewrite {
//!     fn name(&self) -> &str { "MyRewrite" }
//!     fn mutation_type(&self) -> MutationType { MutationType::Ir }
//!     fn mutate(&self, graph: &mut Graph, backends: &BackendRegistry)
//!         -> Result<(), PassError> { /* ... */ }
//! }
//! ```

mod error;
mod manager;
pub mod mutators;

pub use error::PassError;
pub use manager::PassManager;
pub use mutators::concat_subtensor::ConcatSubTensorMutator;
pub use mutators::execution_method::NodeExecutionMethodMutator;
pub use mutators::fusion::NodeFusionMutator;
pub use mutators::grouped_convolution::GroupedConvolutionMutator;
pub use mutators::in_place::InPlaceOperationMutator;
pub use mutators::split_subtensor::SplitSubTensorMutator;
pub use mutators::{GraphMutator, MutationType};

/// Builds the standard pipeline with every mutator enabled.
///
/// Order: fusion, grouped convolution, in-place, concatenation views,
/// split views, execution method.
pub fn create_default_pass_manager() -> PassManager {
    let mut pm = PassManager::new();
    pm.append(NodeFusionMutator::new(), true);
    pm.append(GroupedConvolutionMutator::new(), true);
    pm.append(InPlaceOperationMutator::new(), true);
    pm.append(ConcatSubTensorMutator::new(), true);
    pm.append(SplitSubTensorMutator::new(), true);
    pm.append(NodeExecutionMethodMutator::new(), true);
    pm
}
