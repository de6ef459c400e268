// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The process-plugin interface and lifecycle driver.
//!
//! Lifecycle of one plugin on one flow:
//! `on_init` → `before_update` → `on_update` → `on_export` → `on_destroy`.
//!
//! A plugin instance is shared by all flows; per-flow state lives in
//! the context region the flow allocation reserves for it. `on_destroy`
//! is called exactly once for every context that `on_init` constructed.

mod context;
mod registry;
mod runtime;

pub use context::{context_mut, context_ref, drop_context, write_context};
pub use registry::{PluginEntry, PluginError, PluginRegistry};
pub use runtime::PacketVerdict;

use crate::{flow::Direction, packet::PacketContext};
use core::mem::{align_of, size_of};

/// Result of `on_init`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitResult {
    /// Context constructed; keep delivering packets
    ConstructedNeedsUpdate,
    /// Context constructed; no more per-packet callbacks, but the
    /// plugin stays attached until export
    ConstructedFinal,
    /// Cannot decide yet; call `on_init` again on the next packet
    PendingConstruction,
    /// Not applicable to this flow; never retry
    Irrelevant,
}

/// Result of `before_update`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeforeUpdateAction {
    NoAction,
    /// Finalize the current flow *without* this packet and reprocess
    /// the packet as the first packet of a new flow
    FlushFlowAndReinsert,
    /// Detach this plugin; the flow continues with the others
    Remove,
}

/// Result of `on_update`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    NeedsUpdate,
    /// No more per-packet callbacks, stay attached until export
    Final,
    /// Detach this plugin immediately
    Remove,
    /// Finalize the flow *including* this packet
    FlushFlow,
}

/// Result of `on_export`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportAction {
    NoAction,
    Remove,
}

/// Which optional hooks a plugin implements
///
/// Cached at registration so unimplemented hooks never cost a virtual
/// call on the packet path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub before_update: bool,
    pub update: bool,
    pub export: bool,
}

/// Size and alignment of a plugin's per-flow context region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextLayout {
    pub size: usize,
    pub alignment: usize,
}

impl ContextLayout {
    /// The layout of a concrete context type
    pub const fn of<C>() -> Self {
        Self {
            size: size_of::<C>(),
            alignment: align_of::<C>(),
        }
    }
}

/// Per-packet inputs shared by all hooks
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    pub packet: &'a PacketContext<'a>,
    pub direction: Direction,
}

/// A flow-processing plugin.
///
/// Hooks receive the mutable flow header and the plugin's own context
/// bytes as two disjoint borrows. Hooks must not block or perform I/O.
pub trait ProcessPlugin: Send + Sync {
    /// Memory requirements of the per-flow context
    fn context_layout(&self) -> ContextLayout;

    /// Which optional hooks to dispatch
    fn overrides(&self) -> Overrides;

    /// Attempts construction of the per-flow context.
    ///
    /// `data` is zeroed, unconstructed memory; a `Constructed*` return
    /// promises that the context was written (see [`write_context`]).
    fn on_init(
        &self,
        hook: &HookContext,
        flow: &mut crate::flow::FlowHeader,
        data: &mut [u8],
    ) -> InitResult;

    /// Read-only flow-control inspection before any state update
    fn before_update(
        &self,
        hook: &HookContext,
        flow: &crate::flow::FlowHeader,
        data: &[u8],
    ) -> BeforeUpdateAction {
        let _ = (hook, flow, data);
        BeforeUpdateAction::NoAction
    }

    /// Main per-packet processing
    fn on_update(
        &self,
        hook: &HookContext,
        flow: &mut crate::flow::FlowHeader,
        data: &mut [u8],
    ) -> UpdateAction {
        let _ = (hook, flow, data);
        UpdateAction::Final
    }

    /// Final computations before the flow is serialized
    fn on_export(&self, flow: &mut crate::flow::FlowHeader, data: &mut [u8]) -> ExportAction {
        let _ = (flow, data);
        ExportAction::NoAction
    }

    /// Releases the per-flow context; must not panic.
    ///
    /// Called exactly once for every context constructed by `on_init`.
    fn on_destroy(&self, data: &mut [u8]);
}
