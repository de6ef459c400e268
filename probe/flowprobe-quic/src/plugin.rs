// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC process plugin: per-flow context, exporter fields and
//! lifecycle hooks.

use crate::{
    header::PacketType,
    parser::{parse_quic_payload, ParseError},
    tls::HandshakeType,
};
use flowprobe_core::{
    field::{FieldHandler, FieldRegistry, RegistryError, ScalarGetter, VectorGetter},
    flow::FlowHeader,
    inet::PROTOCOL_UDP,
    plugin::{
        self, ContextLayout, HookContext, InitResult, Overrides, ProcessPlugin, UpdateAction,
    },
};

/// The field-group name of this plugin
pub const QUIC_GROUP: &str = "quic";

/// Longest packet-type history kept per flow
const MAX_PACKET_TYPE_HISTORY: usize = 30;

/// Cross-packet processing state of one flow
#[derive(Debug, Default)]
pub(crate) struct ProcessingState {
    /// First client-chosen DCID; keying material for every later
    /// Initial of the flow
    pub initial_dcid: Option<Vec<u8>>,
    pub retry_count: u8,
    pub last_hello: Option<HandshakeType>,
}

/// Per-flow context of the QUIC plugin
#[derive(Debug, Default)]
pub struct QuicContext {
    pub version: u32,
    pub token_length: u64,
    pub server_name: Option<String>,
    pub user_agent: Option<String>,
    pub zero_rtt_count: u8,
    pub coalesced_count: u8,
    pub client_hello_parsed: bool,
    pub server_port: u16,
    pub packet_types: Vec<u8>,
    pub extension_types: Vec<u16>,
    pub extension_lengths: Vec<u16>,
    pub(crate) state: ProcessingState,
}

impl QuicContext {
    pub(crate) fn note_packet_type(&mut self, packet_type: PacketType) {
        if self.packet_types.len() < MAX_PACKET_TYPE_HISTORY {
            self.packet_types.push(packet_type as u8);
        }
    }

    pub(crate) fn saw_version_negotiation(&self) -> bool {
        self.packet_types
            .contains(&(PacketType::VersionNegotiation as u8))
    }
}

struct QuicFields {
    version: FieldHandler,
    token_length: FieldHandler,
    server_name: FieldHandler,
    user_agent: FieldHandler,
    zero_rtt_count: FieldHandler,
    client_hello_parsed: FieldHandler,
    server_port: FieldHandler,
    packet_types: FieldHandler,
    extension_types: FieldHandler,
    extension_lengths: FieldHandler,
}

/// QUIC Initial metadata extraction plugin
pub struct QuicPlugin {
    fields: QuicFields,
}

impl QuicPlugin {
    /// Registers the plugin's fields and builds the plugin
    pub fn new(registry: &mut FieldRegistry) -> Result<Self, RegistryError> {
        let mut group = registry.group(QUIC_GROUP);

        let fields = QuicFields {
            version: group.register_scalar(
                "version",
                ScalarGetter::U32(|source| source.context::<QuicContext>().version),
            )?,
            token_length: group.register_scalar(
                "token_length",
                ScalarGetter::U64(|source| source.context::<QuicContext>().token_length),
            )?,
            server_name: group.register_scalar(
                "server_name",
                ScalarGetter::Str(|source| {
                    source
                        .context::<QuicContext>()
                        .server_name
                        .as_deref()
                        .unwrap_or("")
                }),
            )?,
            user_agent: group.register_scalar(
                "user_agent",
                ScalarGetter::Str(|source| {
                    source
                        .context::<QuicContext>()
                        .user_agent
                        .as_deref()
                        .unwrap_or("")
                }),
            )?,
            zero_rtt_count: group.register_scalar(
                "zero_rtt_count",
                ScalarGetter::U8(|source| source.context::<QuicContext>().zero_rtt_count),
            )?,
            client_hello_parsed: group.register_scalar(
                "client_hello_parsed",
                ScalarGetter::U8(|source| {
                    source.context::<QuicContext>().client_hello_parsed as u8
                }),
            )?,
            server_port: group.register_scalar(
                "server_port",
                ScalarGetter::U16(|source| source.context::<QuicContext>().server_port),
            )?,
            packet_types: group.register_vector(
                "packet_types",
                VectorGetter::U8(|source| &source.context::<QuicContext>().packet_types),
            )?,
            extension_types: group.register_vector(
                "tls_ext_types",
                VectorGetter::U16(|source| &source.context::<QuicContext>().extension_types),
            )?,
            extension_lengths: group.register_vector(
                "tls_ext_lengths",
                VectorGetter::U16(|source| &source.context::<QuicContext>().extension_lengths),
            )?,
        };

        Ok(Self { fields })
    }

    fn mark_fields(&self, flow: &mut FlowHeader, context: &QuicContext) {
        self.fields.version.set_available(flow);
        self.fields.token_length.set_available(flow);
        self.fields.zero_rtt_count.set_available(flow);
        self.fields.client_hello_parsed.set_available(flow);
        self.fields.packet_types.set_available(flow);

        if context.server_name.is_some() {
            self.fields.server_name.set_available(flow);
        }
        if context.user_agent.is_some() {
            self.fields.user_agent.set_available(flow);
        }
        if context.server_port != 0 {
            self.fields.server_port.set_available(flow);
        }
        if !context.extension_types.is_empty() {
            self.fields.extension_types.set_available(flow);
            self.fields.extension_lengths.set_available(flow);
        }
    }

    fn note_direction(&self, hook: &HookContext, context: &mut QuicContext) {
        // a parsed ClientHello fixes which endpoint is the server
        if context.server_port == 0
            && context.state.last_hello == Some(HandshakeType::ClientHello)
        {
            context.server_port = hook.packet.dst_port;
        }
        if context.state.last_hello == Some(HandshakeType::ServerHello)
            && context.server_port == 0
        {
            context.server_port = hook.packet.src_port;
        }
    }
}

impl ProcessPlugin for QuicPlugin {
    fn context_layout(&self) -> ContextLayout {
        ContextLayout::of::<QuicContext>()
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            before_update: false,
            update: true,
            export: false,
        }
    }

    fn on_init(&self, hook: &HookContext, flow: &mut FlowHeader, data: &mut [u8]) -> InitResult {
        if hook.packet.l4_protocol != PROTOCOL_UDP {
            return InitResult::Irrelevant;
        }
        let payload = hook.packet.payload;
        // long-header bit is the cheapest pre-filter
        if payload.is_empty() || payload[0] & 0x80 == 0 {
            return InitResult::Irrelevant;
        }

        let mut context = QuicContext::default();
        match parse_quic_payload(&mut context, payload) {
            Ok(()) => {}
            Err(ParseError::NotQuic) => return InitResult::Irrelevant,
            // looked like QUIC but did not decrypt; later packets of
            // the handshake may
            Err(ParseError::Undecryptable) => {
                tracing::trace!("quic initial did not decrypt, retrying on later packets");
                return InitResult::PendingConstruction;
            }
        }

        self.note_direction(hook, &mut context);
        self.mark_fields(flow, &context);
        plugin::write_context(data, context);
        InitResult::ConstructedNeedsUpdate
    }

    fn on_update(&self, hook: &HookContext, flow: &mut FlowHeader, data: &mut [u8]) -> UpdateAction {
        let context = unsafe { plugin::context_mut::<QuicContext>(data) };

        let payload = hook.packet.payload;
        if payload.is_empty() || payload[0] & 0x80 == 0 {
            // short-header traffic after the handshake carries no
            // extractable metadata
            return UpdateAction::NeedsUpdate;
        }

        if parse_quic_payload(context, payload).is_ok() {
            self.note_direction(hook, context);
            self.mark_fields(flow, context);
        }
        UpdateAction::NeedsUpdate
    }

    fn on_destroy(&self, data: &mut [u8]) {
        unsafe { plugin::drop_context::<QuicContext>(data) };
    }
}
