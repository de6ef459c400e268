// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The two hot loops around the output ring.

use crate::batch::OutputBatch;
use flowprobe_core::{
    field::BasicFields,
    flow::{AllocError, Direction, FlowEndReason, FlowRecord, FlowRecordBuilder, LayoutError},
    packet::PacketContext,
    plugin::{PacketVerdict, PluginRegistry},
};
use flowprobe_ipfix::IpfixExporter;
use flowprobe_storage::{OutputRing, ReaderGroup, ReadOutcome, Writer};

/// Records batched into one ring entry before hand-off
const DEFAULT_BATCH_SIZE: usize = 64;

/// Worker-side driver: builds flow records, runs the plugin lifecycle
/// and hands finalized flows to the output ring.
///
/// The (external) flow cache owns the hash table and timeouts; this
/// type is the part it calls into.
pub struct FlowWorker<'r> {
    plugins: &'r PluginRegistry,
    basic: BasicFields,
    builder: FlowRecordBuilder,
    writer: Writer<'r, OutputBatch>,
    batch: Box<OutputBatch>,
    batch_size: usize,
}

impl<'r> FlowWorker<'r> {
    pub fn new(
        plugins: &'r PluginRegistry,
        basic: BasicFields,
        ring: &'r OutputRing<OutputBatch>,
    ) -> Result<Self, LayoutError> {
        let builder = FlowRecordBuilder::new(plugins.context_layouts())?;
        let writer = ring.register_writer();
        let mut batch = writer.alloc(OutputBatch::default);
        batch.release(plugins);
        Ok(Self {
            plugins,
            basic,
            builder,
            writer,
            batch,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Creates a flow record from the first packet of a new flow and
    /// runs the initial plugin pass.
    ///
    /// An allocation failure surfaces to the flow cache, which counts
    /// the packet as dropped.
    pub fn create_flow(
        &mut self,
        packet: &PacketContext,
        hash: u64,
    ) -> Result<FlowRecord, AllocError> {
        let mut record = self.builder.build()?;
        record.init_from_packet(packet, hash);
        self.plugins.init_flow(&mut record, packet, Direction::Forward);
        Ok(record)
    }

    /// Drives all plugins for a subsequent packet of `record`.
    pub fn process_packet(
        &mut self,
        record: &mut FlowRecord,
        packet: &PacketContext,
        direction: Direction,
    ) -> PacketVerdict {
        self.plugins.process_packet(record, packet, direction)
    }

    /// Finalizes a flow and hands it to the exporter side.
    pub fn finalize_flow(&mut self, mut record: FlowRecord, reason: FlowEndReason) {
        record.end_reason = Some(reason);
        self.plugins.finalize_flow(&mut record);
        self.basic.mark(&mut record);

        self.batch.records.push(record);
        if self.batch.records.len() >= self.batch_size {
            self.submit();
        }
    }

    /// Publishes the current batch even if it is not full.
    pub fn submit(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let mut fresh = self.writer.alloc(OutputBatch::default);
        fresh.release(self.plugins);
        let full = core::mem::replace(&mut self.batch, fresh);
        self.writer.write(full);
    }

    /// Flushes pending records and unregisters from the ring.
    pub fn finish(mut self) {
        self.submit();
        self.writer.recycle(core::mem::take(&mut self.batch));
        self.writer.unregister();
    }
}

/// Exporter-side loop: drains one reader group into an IPFIX exporter
/// until all workers are gone and the ring is empty.
pub fn run_exporter(group: ReaderGroup<'_, OutputBatch>, exporter: &mut IpfixExporter) {
    let mut reader = group.reader();
    loop {
        match reader.read() {
            ReadOutcome::Entry(batch) => {
                for record in &batch.records {
                    exporter.process_record(record);
                }
            }
            ReadOutcome::Empty => exporter.flush(),
            ReadOutcome::Exhausted => {
                exporter.flush();
                break;
            }
        }
    }
}
