// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The `basic_plus` process plugin: TTL, IP flags, TCP window, option
//! and MSS fields beyond the built-in basic statistics.

use flowprobe_core::{
    field::{FieldHandler, FieldRegistry, RegistryError, ScalarGetter},
    flow::{Direction, DirectionalPair, FlowHeader},
    inet::{IpFamily, TcpFlags},
    plugin::{
        self, ContextLayout, HookContext, InitResult, Overrides, ProcessPlugin, UpdateAction,
    },
};

/// The field-group name of this plugin
pub const BASIC_PLUS_GROUP: &str = "basic_plus";

/// Per-flow context of the basic-plus plugin
#[derive(Debug, Default)]
pub struct BasicPlusContext {
    /// Minimum observed TTL / hop limit per direction
    pub ip_ttl: DirectionalPair<u8>,
    pub ip_flags: DirectionalPair<u8>,
    pub tcp_window: DirectionalPair<u16>,
    /// Cumulative `tcpOptions` bitmask per direction
    pub tcp_options: DirectionalPair<u64>,
    pub tcp_mss: DirectionalPair<u32>,
    /// L3 byte size of the first forward SYN segment
    pub tcp_syn_size: u16,
    reverse_seen: bool,
}

struct BasicPlusFields {
    ip_ttl: (FieldHandler, FieldHandler),
    ip_flags: (FieldHandler, FieldHandler),
    tcp_window: (FieldHandler, FieldHandler),
    tcp_options: (FieldHandler, FieldHandler),
    tcp_mss: (FieldHandler, FieldHandler),
    tcp_syn_size: FieldHandler,
}

/// Extends the exported flow with TTL, TCP window, option and MSS
/// fields
pub struct BasicPlusPlugin {
    fields: BasicPlusFields,
}

impl BasicPlusPlugin {
    pub fn new(registry: &mut FieldRegistry) -> Result<Self, RegistryError> {
        let mut group = registry.group(BASIC_PLUS_GROUP);

        let fields = BasicPlusFields {
            ip_ttl: group.register_directional_pair(
                "ip_ttl",
                "ip_ttl_rev",
                ScalarGetter::U8(|source| {
                    *source.context::<BasicPlusContext>().ip_ttl.forward()
                }),
                ScalarGetter::U8(|source| {
                    *source.context::<BasicPlusContext>().ip_ttl.reverse()
                }),
            )?,
            ip_flags: group.register_directional_pair(
                "ip_flags",
                "ip_flags_rev",
                ScalarGetter::U8(|source| {
                    *source.context::<BasicPlusContext>().ip_flags.forward()
                }),
                ScalarGetter::U8(|source| {
                    *source.context::<BasicPlusContext>().ip_flags.reverse()
                }),
            )?,
            tcp_window: group.register_directional_pair(
                "tcp_win",
                "tcp_win_rev",
                ScalarGetter::U16(|source| {
                    *source.context::<BasicPlusContext>().tcp_window.forward()
                }),
                ScalarGetter::U16(|source| {
                    *source.context::<BasicPlusContext>().tcp_window.reverse()
                }),
            )?,
            tcp_options: group.register_directional_pair(
                "tcp_opt",
                "tcp_opt_rev",
                ScalarGetter::U64(|source| {
                    *source.context::<BasicPlusContext>().tcp_options.forward()
                }),
                ScalarGetter::U64(|source| {
                    *source.context::<BasicPlusContext>().tcp_options.reverse()
                }),
            )?,
            tcp_mss: group.register_directional_pair(
                "tcp_mss",
                "tcp_mss_rev",
                ScalarGetter::U32(|source| {
                    *source.context::<BasicPlusContext>().tcp_mss.forward()
                }),
                ScalarGetter::U32(|source| {
                    *source.context::<BasicPlusContext>().tcp_mss.reverse()
                }),
            )?,
            tcp_syn_size: group.register_scalar(
                "tcp_syn_size",
                ScalarGetter::U16(|source| source.context::<BasicPlusContext>().tcp_syn_size),
            )?,
        };

        Ok(Self { fields })
    }

    fn fill_direction(
        &self,
        hook: &HookContext,
        flow: &mut FlowHeader,
        context: &mut BasicPlusContext,
        direction: Direction,
    ) {
        let packet = hook.packet;
        let (ttl_handler, flags_handler, win_handler, opt_handler, mss_handler) =
            match direction {
                Direction::Forward => (
                    self.fields.ip_ttl.0,
                    self.fields.ip_flags.0,
                    self.fields.tcp_window.0,
                    self.fields.tcp_options.0,
                    self.fields.tcp_mss.0,
                ),
                Direction::Reverse => (
                    self.fields.ip_ttl.1,
                    self.fields.ip_flags.1,
                    self.fields.tcp_window.1,
                    self.fields.tcp_options.1,
                    self.fields.tcp_mss.1,
                ),
            };

        context.ip_ttl[direction] = packet.ttl;
        ttl_handler.set_available(flow);

        if flow.key.family() == IpFamily::V4 {
            context.ip_flags[direction] = packet.ip_flags;
            flags_handler.set_available(flow);
        }

        let Some(tcp) = packet.tcp else {
            return;
        };
        context.tcp_window[direction] = tcp.window;
        win_handler.set_available(flow);
        context.tcp_options[direction] |= tcp.options;
        opt_handler.set_available(flow);
        if let Some(mss) = tcp.mss {
            context.tcp_mss[direction] = mss;
            mss_handler.set_available(flow);
        }
    }
}

impl ProcessPlugin for BasicPlusPlugin {
    fn context_layout(&self) -> ContextLayout {
        ContextLayout::of::<BasicPlusContext>()
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            before_update: false,
            update: true,
            export: false,
        }
    }

    fn on_init(&self, hook: &HookContext, flow: &mut FlowHeader, data: &mut [u8]) -> InitResult {
        let mut context = BasicPlusContext::default();
        self.fill_direction(hook, flow, &mut context, Direction::Forward);

        if hook.packet.tcp.is_some() && hook.packet.tcp_flags.contains(TcpFlags::SYN) {
            context.tcp_syn_size = hook.packet.wire_bytes.min(u16::MAX as u64) as u16;
            self.fields.tcp_syn_size.set_available(flow);
        }

        plugin::write_context(data, context);
        InitResult::ConstructedNeedsUpdate
    }

    fn on_update(&self, hook: &HookContext, flow: &mut FlowHeader, data: &mut [u8]) -> UpdateAction {
        let context = unsafe { plugin::context_mut::<BasicPlusContext>(data) };

        // keep the per-direction minimum TTL
        let seen = context.ip_ttl[hook.direction];
        if seen == 0 || hook.packet.ttl < seen {
            context.ip_ttl[hook.direction] = hook.packet.ttl;
        }
        if let Some(tcp) = hook.packet.tcp {
            context.tcp_options[hook.direction] |= tcp.options;
        }

        if hook.direction == Direction::Forward || context.reverse_seen {
            return UpdateAction::NeedsUpdate;
        }

        self.fill_direction(hook, flow, context, Direction::Reverse);
        context.reverse_seen = true;

        // both directions captured; nothing left to observe
        if hook.packet.tcp.is_some() {
            UpdateAction::Final
        } else {
            UpdateAction::NeedsUpdate
        }
    }

    fn on_destroy(&self, data: &mut [u8]) {
        unsafe { plugin::drop_context::<BasicPlusContext>(data) };
    }
}
