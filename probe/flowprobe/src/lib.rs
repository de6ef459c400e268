// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Assembly of the flowprobe core: flow workers driving the plugin
//! runtime on one side of the output ring, IPFIX exporter threads on
//! the other.

pub use flowprobe_core as core;
pub use flowprobe_ipfix as ipfix;
pub use flowprobe_quic as quic;
pub use flowprobe_storage as storage;

mod basic_plus;
mod batch;
mod pipeline;

pub use basic_plus::{BasicPlusContext, BasicPlusPlugin, BASIC_PLUS_GROUP};
pub use batch::OutputBatch;
pub use pipeline::{run_exporter, FlowWorker};
