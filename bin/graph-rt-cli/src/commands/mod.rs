// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the pieces they share: logging, configuration, the
//! backend registry and the demo network.

pub mod inspect;
pub mod run;

use graph_ir::{
    write_f32, ActivationFunction, ActivationInfo, BackendRegistry, CaptureAccessor, ConvolutionMethod,
    GraphBuilder, NodeIdxPair, NodeParams, PadStrideInfo, PoolingInfo, PoolingType,
    TensorAccessor, TensorHandle,
};
use reference_backend::ReferenceBackend;
use runtime::{RuntimeConfig, Stream};
use std::path::Path;
use std::rc::Rc;
use tensor_core::{DType, DataLayoutDimension, Target, TensorDescriptor};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// The file configuration if given, else defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(p) => Ok(RuntimeConfig::from_file(p)?),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Host backend for the CPU target. The GPU target is registered but
/// reports itself unsupported, so requests for it fall back.
pub fn backends() -> Rc<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.add_backend(Target::Neon, ReferenceBackend::new(Target::Neon));
    registry.add_backend(Target::Cl, ReferenceBackend::new(Target::Cl).with_support(false));
    Rc::new(registry)
}

/// Deterministic values in `[-0.5, 0.5)` for a tensor.
fn pattern_accessor(seed: u32, batches: Option<usize>) -> Box<dyn TensorAccessor> {
    let mut calls = 0usize;
    Box::new(move |tensor: &dyn TensorHandle| {
        calls += 1;
        if batches.is_some_and(|max| calls > max) {
            return false;
        }
        let n = tensor.descriptor().num_elements();
        let values: Vec<f32> = (0..n)
            .map(|i| {
                let x = (i as u32).wrapping_mul(2_654_435_761).wrapping_add(seed.wrapping_mul(40_503));
                (x % 1000) as f32 / 1000.0 - 0.5
            })
            .collect();
        write_f32(tensor, &values).is_ok()
    })
}

fn conv(
    stream: &mut Stream,
    name: &str,
    kernel: usize,
    depth: usize,
    groups: usize,
    seed: u32,
) -> anyhow::Result<()> {
    let pad = kernel / 2;
    stream.add_layer(|g, tail| {
        GraphBuilder::add_convolution_node(
            g,
            NodeParams::new(name),
            tail,
            (kernel, kernel),
            depth,
            PadStrideInfo::new(1, 1, pad, pad),
            groups,
            ConvolutionMethod::Default,
            Some(pattern_accessor(seed, None)),
            Some(pattern_accessor(seed + 1, None)),
        )
    })?;
    Ok(())
}

/// A small image classifier:
///
/// ```text
///   image ─▶ conv3x3 ─▶ bn ─▶ relu ─▶ conv3x3/g2 ─▶ relu ─▶ maxpool
///         ─▶ squeeze1x1 ─┬─▶ expand1x1 ─┬─▶ concat ─▶ gap ─▶ fc ─▶ softmax
///                        └─▶ expand3x3 ─┘
/// ```
///
/// The input accessor supplies `batches` images; the returned capture
/// collects one probability vector per batch.
pub fn build_demo_network(stream: &mut Stream, batches: usize) -> anyhow::Result<CaptureAccessor> {
    let image = TensorDescriptor::new([1, 3, 32, 32], DType::F32);
    stream.add_input(NodeParams::new("image"), image, Some(pattern_accessor(7, Some(batches))));

    conv(stream, "conv1", 3, 16, 1, 11)?;
    stream.add_layer(|g, tail| {
        GraphBuilder::add_batch_normalization_node(
            g,
            NodeParams::new("bn1"),
            tail,
            0.001,
            Some(pattern_accessor(13, None)),
            Some(Box::new(graph_ir::FillAccessor::new(1.0))),
            Some(pattern_accessor(17, None)),
            Some(Box::new(graph_ir::FillAccessor::new(1.0))),
        )
    })?;
    relu(stream, "relu1")?;
    conv(stream, "conv2", 3, 16, 2, 19)?;
    relu(stream, "relu2")?;
    stream.add_layer(|g, tail| {
        GraphBuilder::add_pooling_node(
            g,
            NodeParams::new("pool"),
            tail,
            PoolingInfo::new(PoolingType::Max, 2, PadStrideInfo::new(2, 2, 0, 0)),
        )
    })?;

    conv(stream, "squeeze", 1, 8, 1, 23)?;
    let squeeze = stream.tail().ok_or_else(|| anyhow::anyhow!("stream lost its tail"))?;
    conv(stream, "expand1x1", 1, 8, 1, 29)?;
    let left = stream.tail().ok_or_else(|| anyhow::anyhow!("stream lost its tail"))?;
    stream.set_tail(squeeze);
    conv(stream, "expand3x3", 3, 8, 1, 31)?;
    let right = stream.tail().ok_or_else(|| anyhow::anyhow!("stream lost its tail"))?;
    let concat = GraphBuilder::add_concatenate_node(
        stream.graph_mut(),
        NodeParams::new("concat"),
        &[left, right],
        DataLayoutDimension::Channel,
    )?;
    stream.set_tail(NodeIdxPair::new(concat, 0));

    stream.add_layer(|g, tail| {
        GraphBuilder::add_pooling_node(g, NodeParams::new("gap"), tail, PoolingInfo::global(PoolingType::Avg))
    })?;
    stream.add_layer(|g, tail| GraphBuilder::add_flatten_node(g, NodeParams::new("flatten"), tail))?;
    stream.add_layer(|g, tail| {
        GraphBuilder::add_fully_connected_layer(
            g,
            NodeParams::new("fc"),
            tail,
            10,
            Some(pattern_accessor(37, None)),
            Some(pattern_accessor(41, None)),
        )
    })?;
    stream.add_layer(|g, tail| GraphBuilder::add_softmax_node(g, NodeParams::new("softmax"), tail, 1.0))?;

    let capture = CaptureAccessor::new();
    stream.add_output(NodeParams::new("probabilities"), Some(Box::new(capture.clone())))?;
    Ok(capture)
}

fn relu(stream: &mut Stream, name: &str) -> anyhow::Result<()> {
    stream.add_layer(|g, tail| {
        GraphBuilder::add_activation_node(g, NodeParams::new(name), tail, ActivationInfo::new(ActivationFunction::Relu))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_network_runs() {
        let mut stream = Stream::new("demo", backends());
        let capture = build_demo_network(&mut stream, 2).unwrap();
        stream.finalize(Some(Target::Cl), &RuntimeConfig::default()).unwrap();

        let metrics = stream.run().unwrap();
        assert_eq!(metrics.iterations, 2);
        let sink = capture.sink();
        let outputs = sink.borrow();
        assert_eq!(outputs.len(), 2);
        let total: f32 = outputs[0].iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }
}
