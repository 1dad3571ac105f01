// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Directed connections between node slots.

use crate::{EdgeId, NodeId, TensorId};
use std::fmt;

/// Carries one tensor from a producer's output slot to a consumer's input
/// slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub(crate) id: EdgeId,
    pub(crate) producer: NodeId,
    pub(crate) producer_idx: usize,
    pub(crate) consumer: NodeId,
    pub(crate) consumer_idx: usize,
    pub(crate) tensor: TensorId,
}

impl Edge {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn producer(&self) -> NodeId {
        self.producer
    }

    pub fn producer_idx(&self) -> usize {
        self.producer_idx
    }

    pub fn consumer(&self) -> NodeId {
        self.consumer
    }

    pub fn consumer_idx(&self) -> usize {
        self.consumer_idx
    }

    pub fn tensor(&self) -> TensorId {
        self.tensor
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}[{}] -> {}[{}] ({})",
            self.id, self.producer, self.producer_idx, self.consumer, self.consumer_idx, self.tensor
        )
    }
}
