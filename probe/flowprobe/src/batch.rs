// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use flowprobe_core::{flow::FlowRecord, plugin::PluginRegistry};

/// One ring entry: a batch of completed flow records.
///
/// Batches are pooled by the ring; a worker taking a recycled batch
/// calls [`release`](Self::release) first, which is where the plugin
/// contexts of the previous generation are destroyed — by then every
/// reader group has released the batch, so the serialized records are
/// long gone.
#[derive(Debug, Default)]
pub struct OutputBatch {
    pub records: Vec<FlowRecord>,
}

impl OutputBatch {
    /// Destroys any leftover plugin contexts and empties the batch.
    pub fn release(&mut self, plugins: &PluginRegistry) {
        for record in &mut self.records {
            plugins.destroy_flow(record);
        }
        self.records.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
