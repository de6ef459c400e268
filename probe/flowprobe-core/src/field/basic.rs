// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The built-in `basic` field group.
//!
//! These fields read the flow header itself rather than a plugin
//! context, and are present on every exported record. They occupy
//! protocol index zero in the exporter's field map.

use crate::{
    field::{
        getter::ScalarGetter,
        handler::FieldHandler,
        registry::{FieldRegistry, RegistryError},
    },
    flow::{Direction, FlowHeader},
    inet::{IpFamily, PROTOCOL_TCP},
};

/// The group name of the built-in flow-header fields
pub const BASIC_GROUP: &str = "basic";

/// Handlers of the built-in flow-header fields
#[derive(Clone, Copy, Debug)]
pub struct BasicFields {
    src_ip4: FieldHandler,
    dst_ip4: FieldHandler,
    src_ip6: FieldHandler,
    dst_ip6: FieldHandler,
    src_port: FieldHandler,
    dst_port: FieldHandler,
    protocol: FieldHandler,
    src_mac: FieldHandler,
    dst_mac: FieldHandler,
    time_start: FieldHandler,
    time_end: FieldHandler,
    end_reason: FieldHandler,
    packets: (FieldHandler, FieldHandler),
    bytes: (FieldHandler, FieldHandler),
    tcp_flags: (FieldHandler, FieldHandler),
}

impl BasicFields {
    /// Registers the `basic` group into `registry`
    pub fn register(registry: &mut FieldRegistry) -> Result<Self, RegistryError> {
        let mut group = registry.group(BASIC_GROUP);

        let src_ip4 = group.register_scalar(
            "src_ip4",
            ScalarGetter::Ipv4(|source| source.flow.key.src_ip.as_v4().unwrap_or_default()),
        )?;
        let dst_ip4 = group.register_scalar(
            "dst_ip4",
            ScalarGetter::Ipv4(|source| source.flow.key.dst_ip.as_v4().unwrap_or_default()),
        )?;
        let src_ip6 = group.register_scalar(
            "src_ip6",
            ScalarGetter::Ipv6(|source| source.flow.key.src_ip.as_v6().unwrap_or_default()),
        )?;
        let dst_ip6 = group.register_scalar(
            "dst_ip6",
            ScalarGetter::Ipv6(|source| source.flow.key.dst_ip.as_v6().unwrap_or_default()),
        )?;
        let src_port =
            group.register_scalar("src_port", ScalarGetter::U16(|source| source.flow.key.src_port))?;
        let dst_port =
            group.register_scalar("dst_port", ScalarGetter::U16(|source| source.flow.key.dst_port))?;
        let protocol = group.register_scalar(
            "protocol",
            ScalarGetter::U8(|source| source.flow.key.l4_protocol),
        )?;
        let src_mac = group.register_scalar(
            "src_mac",
            ScalarGetter::Mac(|source| *source.flow.mac.forward()),
        )?;
        let dst_mac = group.register_scalar(
            "dst_mac",
            ScalarGetter::Mac(|source| *source.flow.mac.reverse()),
        )?;
        let time_start = group.register_scalar(
            "time_start",
            ScalarGetter::Timestamp(|source| source.flow.time_created),
        )?;
        let time_end = group.register_scalar(
            "time_end",
            ScalarGetter::Timestamp(|source| source.flow.time_updated),
        )?;
        let end_reason = group.register_scalar(
            "end_reason",
            ScalarGetter::U8(|source| source.flow.end_reason.map(|reason| reason as u8).unwrap_or(0)),
        )?;

        let packets = group.register_directional_pair(
            "packets",
            "packets_rev",
            ScalarGetter::U64(|source| source.flow.stats.forward().packets),
            ScalarGetter::U64(|source| source.flow.stats.reverse().packets),
        )?;
        let bytes = group.register_directional_pair(
            "bytes",
            "bytes_rev",
            ScalarGetter::U64(|source| source.flow.stats.forward().bytes),
            ScalarGetter::U64(|source| source.flow.stats.reverse().bytes),
        )?;
        let tcp_flags = group.register_directional_pair(
            "tcp_flags",
            "tcp_flags_rev",
            ScalarGetter::U8(|source| source.flow.stats.forward().tcp_flags.bits()),
            ScalarGetter::U8(|source| source.flow.stats.reverse().tcp_flags.bits()),
        )?;

        Ok(Self {
            src_ip4,
            dst_ip4,
            src_ip6,
            dst_ip6,
            src_port,
            dst_port,
            protocol,
            src_mac,
            dst_mac,
            time_start,
            time_end,
            end_reason,
            packets,
            bytes,
            tcp_flags,
        })
    }

    /// Flags the applicable basic fields on a finalized flow.
    ///
    /// Family-specific address fields are set for the flow's family
    /// only; reverse counters only when reverse packets were seen; TCP
    /// flag unions only for TCP flows.
    pub fn mark(&self, flow: &mut FlowHeader) {
        match flow.key.family() {
            IpFamily::V4 => {
                self.src_ip4.set_available(flow);
                self.dst_ip4.set_available(flow);
            }
            IpFamily::V6 => {
                self.src_ip6.set_available(flow);
                self.dst_ip6.set_available(flow);
            }
        }

        self.src_port.set_available(flow);
        self.dst_port.set_available(flow);
        self.protocol.set_available(flow);
        self.src_mac.set_available(flow);
        self.dst_mac.set_available(flow);
        self.time_start.set_available(flow);
        self.time_end.set_available(flow);
        self.end_reason.set_available(flow);

        self.packets.0.set_available(flow);
        self.bytes.0.set_available(flow);
        if flow.stats[Direction::Reverse].packets > 0 {
            self.packets.1.set_available(flow);
            self.bytes.1.set_available(flow);
        }

        if flow.key.l4_protocol == PROTOCOL_TCP {
            self.tcp_flags.0.set_available(flow);
            if flow.stats[Direction::Reverse].packets > 0 {
                self.tcp_flags.1.set_available(flow);
            }
        }
    }
}
