// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-packet and export drivers of the plugin lifecycle.

use crate::{
    flow::{Direction, FlowRecord},
    packet::PacketContext,
    plugin::{
        registry::{PluginEntry, PluginRegistry},
        BeforeUpdateAction, ExportAction, HookContext, InitResult, UpdateAction,
    },
};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What the flow cache should do with the current packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketVerdict {
    /// Normal processing continues
    Continue,
    /// Finalize the flow *without* this packet and reprocess the packet
    /// as the first packet of a new flow
    FlushAndReinsert,
    /// Finalize the flow *including* this packet
    Flush,
}

/// Runs a hook, converting a panic into `None`.
///
/// A faulting plugin must not corrupt the flow; the callers treat
/// `None` as a `Remove` request.
fn guarded<R>(entry: &PluginEntry, hook: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => Some(result),
        Err(_) => {
            tracing::warn!(plugin = entry.name, "plugin hook panicked, removing plugin");
            None
        }
    }
}

impl PluginRegistry {
    /// Destroys one plugin's context (if constructed) and detaches the
    /// plugin from the flow.
    fn remove_plugin(&self, record: &mut FlowRecord, index: usize) {
        let entry = &self.entries()[index];
        let constructed = record.plugins_constructed.test(index);

        if constructed {
            if let Some((_, data)) = record.split_plugin_mut(index) {
                let _ = guarded(entry, || entry.plugin.on_destroy(&mut *data));
            }
        }

        record.plugins_available.clear(index);
        record.plugins_update.clear(index);
        record.plugins_constructed.clear(index);
    }

    /// Drives all plugins for one packet of an existing flow.
    ///
    /// Directional statistics are folded in between the `before_update`
    /// pass and the `on_init`/`on_update` pass, so `before_update`
    /// never observes state written for the current packet.
    pub fn process_packet(
        &self,
        record: &mut FlowRecord,
        packet: &PacketContext,
        direction: Direction,
    ) -> PacketVerdict {
        let hook = HookContext { packet, direction };

        for index in 0..self.entries().len() {
            let entry = &self.entries()[index];
            if !entry.overrides.before_update {
                continue;
            }
            {
                let header = &**record;
                if !(header.plugins_available.test(index)
                    && header.plugins_constructed.test(index)
                    && header.plugins_update.test(index))
                {
                    continue;
                }
            }
            let Some((header, data)) = record.split_plugin_mut(index) else {
                continue;
            };
            let action = guarded(entry, || entry.plugin.before_update(&hook, &*header, &*data));
            match action {
                Some(BeforeUpdateAction::NoAction) => {}
                Some(BeforeUpdateAction::FlushFlowAndReinsert) => {
                    return PacketVerdict::FlushAndReinsert;
                }
                Some(BeforeUpdateAction::Remove) | None => self.remove_plugin(record, index),
            }
        }

        record.update(packet, direction);

        let mut verdict = PacketVerdict::Continue;
        for index in 0..self.entries().len() {
            let entry = &self.entries()[index];
            let constructed;
            {
                let header = &**record;
                if !(header.plugins_available.test(index) && header.plugins_update.test(index)) {
                    continue;
                }
                constructed = header.plugins_constructed.test(index);
            }
            let Some((header, data)) = record.split_plugin_mut(index) else {
                continue;
            };

            if !constructed {
                let result = guarded(entry, || entry.plugin.on_init(&hook, &mut *header, &mut *data));
                match result {
                    Some(InitResult::ConstructedNeedsUpdate) => {
                        header.plugins_constructed.set(index);
                    }
                    Some(InitResult::ConstructedFinal) => {
                        header.plugins_constructed.set(index);
                        header.plugins_update.clear(index);
                    }
                    Some(InitResult::PendingConstruction) => {}
                    Some(InitResult::Irrelevant) | None => {
                        header.plugins_available.clear(index);
                        header.plugins_update.clear(index);
                    }
                }
            } else if entry.overrides.update {
                let result = guarded(entry, || entry.plugin.on_update(&hook, &mut *header, &mut *data));
                match result {
                    Some(UpdateAction::NeedsUpdate) => {}
                    Some(UpdateAction::Final) => header.plugins_update.clear(index),
                    Some(UpdateAction::Remove) | None => self.remove_plugin(record, index),
                    Some(UpdateAction::FlushFlow) => verdict = PacketVerdict::Flush,
                }
            }
        }

        verdict
    }

    /// Runs `on_init` for all plugins on the first packet of a new
    /// flow.
    pub fn init_flow(
        &self,
        record: &mut FlowRecord,
        packet: &PacketContext,
        direction: Direction,
    ) {
        let hook = HookContext { packet, direction };
        for index in 0..self.entries().len() {
            let entry = &self.entries()[index];
            if !record.plugins_available.test(index) {
                continue;
            }
            let Some((header, data)) = record.split_plugin_mut(index) else {
                continue;
            };
            let result = guarded(entry, || entry.plugin.on_init(&hook, &mut *header, &mut *data));
            match result {
                Some(InitResult::ConstructedNeedsUpdate) => {
                    header.plugins_constructed.set(index);
                }
                Some(InitResult::ConstructedFinal) => {
                    header.plugins_constructed.set(index);
                    header.plugins_update.clear(index);
                }
                Some(InitResult::PendingConstruction) => {}
                Some(InitResult::Irrelevant) | None => {
                    header.plugins_available.clear(index);
                    header.plugins_update.clear(index);
                }
            }
        }
    }

    /// Runs `on_export` for every constructed plugin: the last chance
    /// to compute derived fields before the record is serialized.
    ///
    /// Contexts stay alive afterwards; the exporter still reads them.
    pub fn finalize_flow(&self, record: &mut FlowRecord) {
        for index in 0..self.entries().len() {
            let entry = &self.entries()[index];
            {
                let header = &**record;
                if !(header.plugins_available.test(index)
                    && header.plugins_constructed.test(index))
                {
                    continue;
                }
            }
            if !entry.overrides.export {
                continue;
            }
            let Some((header, data)) = record.split_plugin_mut(index) else {
                continue;
            };
            let action = guarded(entry, || entry.plugin.on_export(&mut *header, &mut *data));
            match action {
                Some(ExportAction::NoAction) => {}
                Some(ExportAction::Remove) | None => self.remove_plugin(record, index),
            }
        }
    }

    /// Runs `on_destroy` for every still-constructed plugin.
    ///
    /// Called once the serialized record has been released; idempotent,
    /// so `on_destroy` runs exactly once per constructed context.
    pub fn destroy_flow(&self, record: &mut FlowRecord) {
        for index in 0..self.entries().len() {
            if record.plugins_constructed.test(index) {
                self.remove_plugin(record, index);
            }
        }
    }

    /// The full export stage: `on_export` then `on_destroy`
    pub fn export_flow(&self, record: &mut FlowRecord) {
        self.finalize_flow(record);
        self.destroy_flow(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flow::FlowRecordBuilder,
        plugin::{self, ContextLayout, Overrides, ProcessPlugin},
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Default)]
    struct Counters {
        inits: AtomicUsize,
        updates: AtomicUsize,
        exports: AtomicUsize,
        destroys: AtomicUsize,
    }

    struct CountingContext {
        marker: u64,
    }

    struct CountingPlugin {
        counters: Arc<Counters>,
        init_result: InitResult,
        update_action: UpdateAction,
    }

    impl ProcessPlugin for CountingPlugin {
        fn context_layout(&self) -> ContextLayout {
            ContextLayout::of::<CountingContext>()
        }

        fn overrides(&self) -> Overrides {
            Overrides {
                before_update: false,
                update: true,
                export: true,
            }
        }

        fn on_init(
            &self,
            _hook: &HookContext,
            _flow: &mut crate::flow::FlowHeader,
            data: &mut [u8],
        ) -> InitResult {
            self.counters.inits.fetch_add(1, Ordering::Relaxed);
            if matches!(
                self.init_result,
                InitResult::ConstructedNeedsUpdate | InitResult::ConstructedFinal
            ) {
                plugin::write_context(data, CountingContext { marker: 42 });
            }
            self.init_result
        }

        fn on_update(
            &self,
            _hook: &HookContext,
            _flow: &mut crate::flow::FlowHeader,
            data: &mut [u8],
        ) -> UpdateAction {
            let context = unsafe { plugin::context_mut::<CountingContext>(data) };
            assert_eq!(context.marker, 42);
            self.counters.updates.fetch_add(1, Ordering::Relaxed);
            self.update_action
        }

        fn on_export(
            &self,
            _flow: &mut crate::flow::FlowHeader,
            data: &mut [u8],
        ) -> ExportAction {
            let context = unsafe { plugin::context_ref::<CountingContext>(data) };
            assert_eq!(context.marker, 42);
            self.counters.exports.fetch_add(1, Ordering::Relaxed);
            ExportAction::NoAction
        }

        fn on_destroy(&self, data: &mut [u8]) {
            self.counters.destroys.fetch_add(1, Ordering::Relaxed);
            unsafe { plugin::drop_context::<CountingContext>(data) };
        }
    }

    struct PanickingPlugin;

    impl ProcessPlugin for PanickingPlugin {
        fn context_layout(&self) -> ContextLayout {
            ContextLayout { size: 8, alignment: 8 }
        }

        fn overrides(&self) -> Overrides {
            Overrides {
                before_update: false,
                update: true,
                export: false,
            }
        }

        fn on_init(
            &self,
            _hook: &HookContext,
            _flow: &mut crate::flow::FlowHeader,
            _data: &mut [u8],
        ) -> InitResult {
            InitResult::ConstructedNeedsUpdate
        }

        fn on_update(
            &self,
            _hook: &HookContext,
            _flow: &mut crate::flow::FlowHeader,
            _data: &mut [u8],
        ) -> UpdateAction {
            panic!("malformed input");
        }

        fn on_destroy(&self, _data: &mut [u8]) {}
    }

    fn setup(
        init_result: InitResult,
        update_action: UpdateAction,
    ) -> (PluginRegistry, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let mut registry = PluginRegistry::new();
        registry
            .register(
                "counting",
                Box::new(CountingPlugin {
                    counters: counters.clone(),
                    init_result,
                    update_action,
                }),
            )
            .unwrap();
        (registry, counters)
    }

    fn new_flow(registry: &PluginRegistry) -> FlowRecord {
        let builder = FlowRecordBuilder::new(registry.context_layouts()).unwrap();
        let mut record = builder.build().unwrap();
        record.init_from_packet(&PacketContext::empty(), 1);
        record
    }

    #[test]
    fn constructed_plugin_is_destroyed_exactly_once() {
        let (registry, counters) = setup(InitResult::ConstructedNeedsUpdate, UpdateAction::NeedsUpdate);
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        for _ in 0..3 {
            let verdict = registry.process_packet(&mut record, &packet, Direction::Reverse);
            assert_eq!(verdict, PacketVerdict::Continue);
        }
        registry.export_flow(&mut record);

        assert_eq!(counters.inits.load(Ordering::Relaxed), 1);
        assert_eq!(counters.updates.load(Ordering::Relaxed), 3);
        assert_eq!(counters.exports.load(Ordering::Relaxed), 1);
        assert_eq!(counters.destroys.load(Ordering::Relaxed), 1);
        assert!(record.plugins_constructed.is_empty());
    }

    #[test]
    fn constructed_final_skips_updates_but_exports() {
        let (registry, counters) = setup(InitResult::ConstructedFinal, UpdateAction::NeedsUpdate);
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        registry.process_packet(&mut record, &packet, Direction::Forward);
        registry.export_flow(&mut record);

        assert_eq!(counters.updates.load(Ordering::Relaxed), 0);
        assert_eq!(counters.exports.load(Ordering::Relaxed), 1);
        assert_eq!(counters.destroys.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn irrelevant_plugin_is_never_retried() {
        let (registry, counters) = setup(InitResult::Irrelevant, UpdateAction::NeedsUpdate);
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        registry.process_packet(&mut record, &packet, Direction::Forward);
        registry.export_flow(&mut record);

        assert_eq!(counters.inits.load(Ordering::Relaxed), 1);
        assert_eq!(counters.destroys.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pending_construction_retries_on_next_packet() {
        let (registry, counters) = setup(InitResult::PendingConstruction, UpdateAction::NeedsUpdate);
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        registry.process_packet(&mut record, &packet, Direction::Forward);
        registry.process_packet(&mut record, &packet, Direction::Forward);

        assert_eq!(counters.inits.load(Ordering::Relaxed), 3);
        assert_eq!(counters.destroys.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn remove_from_update_detaches_and_destroys() {
        let (registry, counters) = setup(InitResult::ConstructedNeedsUpdate, UpdateAction::Remove);
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        registry.process_packet(&mut record, &packet, Direction::Forward);
        assert!(record.plugins_available.is_empty());
        assert_eq!(counters.destroys.load(Ordering::Relaxed), 1);

        // export after removal must not touch the plugin again
        registry.export_flow(&mut record);
        assert_eq!(counters.exports.load(Ordering::Relaxed), 0);
        assert_eq!(counters.destroys.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_hook_is_treated_as_remove() {
        let mut registry = PluginRegistry::new();
        registry.register("panicking", Box::new(PanickingPlugin)).unwrap();
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        let verdict = registry.process_packet(&mut record, &packet, Direction::Forward);
        assert_eq!(verdict, PacketVerdict::Continue);
        assert!(record.plugins_available.is_empty());

        // flow statistics survived the fault
        assert_eq!(record.stats.forward().packets, 2);
    }

    #[test]
    fn flush_verdict_includes_current_packet() {
        let (registry, _) = setup(InitResult::ConstructedNeedsUpdate, UpdateAction::FlushFlow);
        let mut record = new_flow(&registry);
        let packet = PacketContext::empty();

        registry.init_flow(&mut record, &packet, Direction::Forward);
        let verdict = registry.process_packet(&mut record, &packet, Direction::Forward);
        assert_eq!(verdict, PacketVerdict::Flush);
        assert_eq!(record.stats.forward().packets, 2);
    }
}
