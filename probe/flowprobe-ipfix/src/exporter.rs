// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The exporter loop body: template bookkeeping, record emission and
//! the flush/reconnect discipline.

use crate::{
    compress::Lz4Framer,
    connection::{Connection, ConnectionConfig, SendOutcome, TransportMode},
    element::{ElementMap, ElementMapError},
    message::MessageBuffer,
    options::{ExporterOptions, OptionsParseError},
    record,
    template::TemplateCache,
};
use core::fmt;
use flowprobe_core::{
    field::{FieldDescriptor, FieldGetter, FieldRegistry, ProtocolFieldMap, ScalarGetter},
    flow::FlowRecord,
    time::Timestamp,
};

/// Exporter startup failed; the process exits with a diagnostic.
#[derive(Debug)]
pub enum ConfigError {
    Options(OptionsParseError),
    Elements(ElementMapError),
    /// The element's declared length does not match the field's wire
    /// size
    LengthMismatch {
        group: &'static str,
        name: &'static str,
    },
    /// IP-variant fields cannot be exported; register family-specific
    /// fields instead
    UnsupportedGetter {
        group: &'static str,
        name: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Options(error) => error.fmt(f),
            Self::Elements(error) => error.fmt(f),
            Self::LengthMismatch { group, name } => {
                write!(f, "element length of {group}.{name} does not match its wire size")
            }
            Self::UnsupportedGetter { group, name } => {
                write!(f, "field {group}.{name} has no fixed-family wire encoding")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<OptionsParseError> for ConfigError {
    fn from(error: OptionsParseError) -> Self {
        Self::Options(error)
    }
}

impl From<ElementMapError> for ConfigError {
    fn from(error: ElementMapError) -> Self {
        Self::Elements(error)
    }
}

/// Counters of one exporter instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExporterStats {
    pub messages: u64,
    pub dropped_messages: u64,
    pub bytes: u64,
    pub records: u64,
    pub dropped_records: u64,
    pub oversized_records: u64,
}

/// The IPFIX exporter owned by one exporter thread
pub struct IpfixExporter {
    options: ExporterOptions,
    elements: ElementMap,
    fields: ProtocolFieldMap,
    templates: TemplateCache,
    message: MessageBuffer,
    lz4: Option<Lz4Framer>,
    connection: Connection,
    stats: ExporterStats,
    records_exported: u64,
}

impl IpfixExporter {
    /// Builds the exporter from its option string.
    ///
    /// `groups` lists the protocol groups in plugin order, with the
    /// built-in `basic` group first; the biflow views of `registry`
    /// define the exported fields.
    pub fn new(
        params: &str,
        registry: &FieldRegistry,
        groups: &[&'static str],
        elements: ElementMap,
    ) -> Result<Self, ConfigError> {
        Self::with_options(ExporterOptions::parse(params)?, registry, groups, elements)
    }

    pub fn with_options(
        options: ExporterOptions,
        registry: &FieldRegistry,
        groups: &[&'static str],
        elements: ElementMap,
    ) -> Result<Self, ConfigError> {
        // a biflow record carries the forward view then the reverse view
        let merged: Vec<FieldDescriptor> = registry
            .biflow_forward()
            .iter()
            .chain(registry.biflow_reverse())
            .copied()
            .collect();
        let fields = ProtocolFieldMap::new(&merged, groups);
        Self::validate(&fields, &elements)?;

        let mut connection_config = ConnectionConfig::new(
            options.host.clone(),
            options.port,
            options.mode,
        );
        connection_config.reconnect_min = options.reconnect_min;
        connection_config.reconnect_max = options.reconnect_max;
        connection_config.verbose = options.verbose;

        Ok(Self {
            message: MessageBuffer::new(options.mtu as usize, options.observation_domain),
            lz4: options.lz4.map(|lz4| Lz4Framer::new(lz4.buffer_size)),
            connection: Connection::new(connection_config),
            options,
            elements,
            fields,
            templates: TemplateCache::new(),
            stats: ExporterStats::default(),
            records_exported: 0,
        })
    }

    /// Startup check: every exported field has an element whose length
    /// matches the value's wire encoding.
    fn validate(fields: &ProtocolFieldMap, elements: &ElementMap) -> Result<(), ConfigError> {
        for (_, descriptors) in fields.iter() {
            for descriptor in descriptors {
                let group = descriptor.group();
                let name = descriptor.name();
                let Some(element) = elements.get(group, name) else {
                    return Err(ElementMapError::MissingElement {
                        group: group.to_string(),
                        name: name.to_string(),
                    }
                    .into());
                };
                if matches!(descriptor.getter(), FieldGetter::Scalar(ScalarGetter::Ip(_))) {
                    return Err(ConfigError::UnsupportedGetter { group, name });
                }
                match record::fixed_wire_size(descriptor.getter()) {
                    Some(size) => {
                        if element.length != Some(size as u16) {
                            return Err(ConfigError::LengthMismatch { group, name });
                        }
                    }
                    None => {
                        if element.length.is_some() {
                            return Err(ConfigError::LengthMismatch { group, name });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn stats(&self) -> &ExporterStats {
        &self.stats
    }

    #[inline]
    pub fn options(&self) -> &ExporterOptions {
        &self.options
    }

    /// Protocol mask of a record: a protocol participates when its
    /// plugin is still attached and constructed and contributed at
    /// least one field.
    fn active_mask(&self, record: &FlowRecord) -> u32 {
        let mut mask = 0u32;
        for (protocol, descriptors) in self.fields.iter() {
            if protocol > 0 {
                let plugin = protocol - 1;
                if !(record.plugins_available.test(plugin)
                    && record.plugins_constructed.test(plugin))
                {
                    continue;
                }
            }
            if descriptors
                .iter()
                .any(|descriptor| descriptor.is_in_record(record))
            {
                mask |= 1 << protocol;
            }
        }
        mask
    }

    /// Serializes one completed flow into the outgoing message,
    /// emitting the template first when the collector has not seen it
    /// (or, over UDP, not recently enough).
    pub fn process_record(&mut self, record: &FlowRecord) {
        self.process_record_at(record, Timestamp::now())
    }

    pub fn process_record_at(&mut self, record: &FlowRecord, now: Timestamp) {
        self.stats.records += 1;
        self.records_exported += 1;

        let family = record.key.family();
        let mask = self.active_mask(record);
        if mask == 0 {
            self.stats.dropped_records += 1;
            return;
        }

        let template_wire = {
            let template =
                self.templates
                    .get_or_build(mask, family, &self.fields, &self.elements);
            let refresh_due = match self.options.mode {
                TransportMode::TcpNonBlocking => template.last_sent.is_none(),
                TransportMode::Udp => match template.last_sent {
                    None => true,
                    Some(sent) => {
                        now.saturating_duration_since(sent) >= self.options.template_refresh
                            || self.options.template_refresh_records.is_some_and(|records| {
                                self.records_exported - template.sent_at_record >= records
                            })
                    }
                },
            };
            refresh_due.then(|| template.wire.clone())
        };

        if let Some(wire) = template_wire {
            if !self.message.fits(wire.len()) {
                self.flush_at(now);
            }
            if self.message.fits(wire.len()) {
                self.message.append_template_set(&wire);
                if let Some(template) = self.templates.get_mut(mask, family) {
                    template.last_sent = Some(now);
                    template.sent_at_record = self.records_exported;
                }
            }
        }

        let size = {
            let template = self.templates.get(mask, family).expect("template just built");
            record::record_size(template, &self.fields, record, family)
        };
        if size > self.message.max_body() {
            self.stats.oversized_records += 1;
            tracing::warn!(size, mtu = self.options.mtu, "flow record exceeds the mtu");
            return;
        }
        if !self.message.fits(size) {
            self.flush_at(now);
            if !self.message.fits(size) {
                // transport is down and the pending message is retained
                self.stats.dropped_records += 1;
                return;
            }
        }

        let template = self.templates.get(mask, family).expect("template just built");
        let fields = &self.fields;
        self.message.append_data_set(template.id, size, |encoder| {
            record::write_record(encoder, template, fields, record, family)
        });
    }

    /// Sends one finished message buffer over the transport, framing
    /// it through LZ4 when enabled.
    fn transmit(
        connection: &mut Connection,
        lz4: &mut Option<Lz4Framer>,
        stats: &mut ExporterStats,
        message: &mut MessageBuffer,
        now: Timestamp,
        drop_on_failure: bool,
    ) -> bool {
        let (outcome, sent_len) = {
            let bytes = message.finish(now.as_secs() as u32);
            match lz4 {
                Some(framer) => match framer.frame(bytes) {
                    Ok(framed) => {
                        let len = framed.len();
                        (connection.send(framed), len)
                    }
                    Err(error) => {
                        tracing::warn!(%error, "lz4 framing failed, message dropped");
                        (SendOutcome::Failed, 0)
                    }
                },
                None => {
                    let len = bytes.len();
                    (connection.send(bytes), len)
                }
            }
        };

        match outcome {
            SendOutcome::Sent | SendOutcome::SentAfterReconnect => {
                stats.messages += 1;
                stats.bytes += sent_len as u64;
                message.confirm();
                true
            }
            SendOutcome::Failed => {
                if drop_on_failure {
                    stats.dropped_messages += 1;
                    message.discard();
                }
                false
            }
        }
    }

    /// Resynchronizes the transport session after a reconnection: the
    /// sequence restarts at zero, the compression stream resets and
    /// every known template is replayed ahead of pending data.
    fn on_reconnected(&mut self, now: Timestamp) {
        self.message.reset_sequence();
        self.templates.mark_all_unsent();
        if let Some(framer) = &mut self.lz4 {
            framer.request_reset();
        }
        if self.templates.is_empty() {
            return;
        }

        let wires: Vec<Vec<u8>> = self
            .templates
            .iter()
            .map(|template| template.wire.clone())
            .collect();

        let mut replay = MessageBuffer::new(
            self.options.mtu as usize,
            self.options.observation_domain,
        );
        let mut delivered = true;
        for wire in &wires {
            if !replay.fits(wire.len()) {
                delivered &= Self::transmit(
                    &mut self.connection,
                    &mut self.lz4,
                    &mut self.stats,
                    &mut replay,
                    now,
                    false,
                );
            }
            replay.append_template_set(wire);
        }
        if replay.has_sets() {
            delivered &= Self::transmit(
                &mut self.connection,
                &mut self.lz4,
                &mut self.stats,
                &mut replay,
                now,
                false,
            );
        }

        if delivered {
            for template in self.templates.iter_mut() {
                template.last_sent = Some(now);
                template.sent_at_record = self.records_exported;
            }
        }
    }

    /// Flushes the current message to the collector.
    ///
    /// Datagram failures drop the message; stream failures keep it
    /// pending for replay after the next successful reconnect.
    pub fn flush(&mut self) {
        self.flush_at(Timestamp::now())
    }

    pub fn flush_at(&mut self, now: Timestamp) {
        if !self.message.has_sets() {
            return;
        }

        match self.options.mode {
            TransportMode::Udp => {
                Self::transmit(
                    &mut self.connection,
                    &mut self.lz4,
                    &mut self.stats,
                    &mut self.message,
                    now,
                    true,
                );
            }
            TransportMode::TcpNonBlocking => {
                if !self.connection.is_connected() {
                    if !self.connection.try_reconnect() {
                        return;
                    }
                    self.on_reconnected(now);
                }
                Self::transmit(
                    &mut self.connection,
                    &mut self.lz4,
                    &mut self.stats,
                    &mut self.message,
                    now,
                    false,
                );
            }
        }
    }
}
