// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # reference-backend
//!
//! A host-memory [`DeviceBackend`](graph_ir::DeviceBackend) with naive f32
//! kernels. It gives the graph runtime a complete backend to finalize and
//! execute against on any machine.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ReferenceBackend`] | Validation, memory context setup, function configuration |
//! | [`HostTensorHandle`] | Heap-backed tensor, optionally managed by a memory group |
//! | [`SubTensorHandle`] | Byte window into a root handle, used for in-place concat/split |
//! | [`functions`] | Convolution (im2col + gemm or direct), FC, pooling, softmax, pointwise, data movement |
//!
//! Convolutions on the gemm path keep their im2col matrix in a scratch
//! workspace. With the function memory manager enabled, workspaces join
//! the target's intra manager and share one pool sized for the largest.
//!
//! # Example
//! ```
//! use graph_ir::BackendRegistry;
//! use reference_backend::ReferenceBackend;
//! use tensor_core::Target;
//!
//! let mut registry = BackendRegistry::new();
//! registry.add_backend(Target::Neon, ReferenceBackend::new(Target::Neon));
//! registry.add_backend(Target::Cl, ReferenceBackend::new(Target::Cl).with_support(false));
//!
//! assert_eq!(registry.default_target().unwrap(), Target::Neon);
//! assert!(!registry.is_target_supported(Target::Cl));
//! ```

mod backend;
pub mod functions;
mod handle;

pub use backend::ReferenceBackend;
pub use handle::{HostTensorHandle, SubTensorHandle};
