// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accessors: the callbacks that move data into and out of a graph.
//!
//! An input accessor fills a tensor before each iteration; an output
//! accessor drains one after it. Const accessors run once at finalization.
//! Returning `false` signals that the stream is exhausted, which ends the
//! execution loop without an error.

use crate::handle::{read_f32, write_f32};
use crate::TensorHandle;
use std::cell::RefCell;
use std::rc::Rc;

/// Data callback bound to a graph tensor.
pub trait TensorAccessor {
    /// Accesses `tensor`. Returns `false` when no more data is available.
    fn access_tensor(&mut self, tensor: &dyn TensorHandle) -> bool;
}

impl<F> TensorAccessor for F
where
    F: FnMut(&dyn TensorHandle) -> bool,
{
    fn access_tensor(&mut self, tensor: &dyn TensorHandle) -> bool {
        self(tensor)
    }
}

/// Leaves the tensor untouched; reports exhaustion after `max_calls`.
#[derive(Debug, Clone, Default)]
pub struct DummyAccessor {
    max_calls: Option<usize>,
    calls: usize,
}

impl DummyAccessor {
    /// Succeeds `max_calls` times, then returns `false` forever.
    pub fn new(max_calls: usize) -> Self {
        Self {
            max_calls: Some(max_calls),
            calls: 0,
        }
    }

    /// Never reports exhaustion.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl TensorAccessor for DummyAccessor {
    fn access_tensor(&mut self, _tensor: &dyn TensorHandle) -> bool {
        self.calls += 1;
        self.max_calls.map_or(true, |max| self.calls <= max)
    }
}

/// Fills every element of an F32 tensor with one value.
#[derive(Debug, Clone, Copy)]
pub struct FillAccessor {
    value: f32,
}

impl FillAccessor {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl TensorAccessor for FillAccessor {
    fn access_tensor(&mut self, tensor: &dyn TensorHandle) -> bool {
        let values = vec![self.value; tensor.descriptor().num_elements()];
        match write_f32(tensor, &values) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "fill accessor failed");
                false
            }
        }
    }
}

/// Copies a fixed F32 buffer into the tensor on every call.
#[derive(Debug, Clone)]
pub struct VecAccessor {
    values: Vec<f32>,
}

impl VecAccessor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }
}

impl TensorAccessor for VecAccessor {
    fn access_tensor(&mut self, tensor: &dyn TensorHandle) -> bool {
        match write_f32(tensor, &self.values) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "vec accessor failed");
                false
            }
        }
    }
}

/// Records every F32 output it sees into a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureAccessor {
    sink: Rc<RefCell<Vec<Vec<f32>>>>,
}

impl CaptureAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared buffer. Keep a clone before moving the accessor into a
    /// graph.
    pub fn sink(&self) -> Rc<RefCell<Vec<Vec<f32>>>> {
        Rc::clone(&self.sink)
    }
}

impl TensorAccessor for CaptureAccessor {
    fn access_tensor(&mut self, tensor: &dyn TensorHandle) -> bool {
        match read_f32(tensor) {
            Ok(values) => {
                self.sink.borrow_mut().push(values);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture accessor failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullHandle(tensor_core::TensorDescriptor, crate::HandleId);

    impl TensorHandle for NullHandle {
        fn id(&self) -> crate::HandleId {
            self.1
        }
        fn descriptor(&self) -> &tensor_core::TensorDescriptor {
            &self.0
        }
        fn allocate(&self) -> Result<(), crate::GraphError> {
            Ok(())
        }
        fn free(&self) {}
        fn manage(&self, _group: &memory_manager::MemoryGroup) -> Result<(), crate::GraphError> {
            Ok(())
        }
        fn is_used(&self) -> bool {
            true
        }
        fn mark_as_unused(&self) {}
        fn is_allocated(&self) -> bool {
            true
        }
        fn with_bytes(&self, f: &mut dyn FnMut(&[u8])) -> Result<(), crate::GraphError> {
            f(&[]);
            Ok(())
        }
        fn with_bytes_mut(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), crate::GraphError> {
            f(&mut []);
            Ok(())
        }
    }

    fn null_handle() -> NullHandle {
        NullHandle(
            tensor_core::TensorDescriptor::new([0], tensor_core::DType::F32),
            memory_manager::ObjectId::next(),
        )
    }

    #[test]
    fn test_dummy_accessor_exhausts() {
        let handle = null_handle();
        let mut acc = DummyAccessor::new(2);
        assert!(acc.access_tensor(&handle));
        assert!(acc.access_tensor(&handle));
        assert!(!acc.access_tensor(&handle));
        assert_eq!(acc.calls(), 3);

        let mut forever = DummyAccessor::unlimited();
        assert!((0..100).all(|_| forever.access_tensor(&handle)));
    }

    #[test]
    fn test_closure_accessor() {
        let handle = null_handle();
        let mut seen = 0;
        {
            let mut acc = |_: &dyn TensorHandle| {
                seen += 1;
                seen < 2
            };
            assert!(acc.access_tensor(&handle));
            assert!(!acc.access_tensor(&handle));
        }
        assert_eq!(seen, 2);
    }
}
