// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Serialization of one flow record against a template: size
//! calculation, value writes in network byte order and zero/empty
//! placeholders for absent fields.

use crate::{basic_list, template::Template};
use flowprobe_core::{
    field::{FieldDescriptor, FieldGetter, FieldSource, ProtocolFieldMap, ScalarGetter, VectorGetter},
    flow::FlowRecord,
    inet::IpFamily,
};
use flowprobe_codec::EncoderBuffer;

/// The natural wire size of a fixed-length getter; `None` for
/// variable-length values.
pub fn fixed_wire_size(getter: &FieldGetter) -> Option<usize> {
    match getter {
        FieldGetter::Scalar(scalar) => match scalar {
            ScalarGetter::U8(_) => Some(1),
            ScalarGetter::U16(_) => Some(2),
            ScalarGetter::U32(_) => Some(4),
            ScalarGetter::U64(_) | ScalarGetter::F64(_) | ScalarGetter::Timestamp(_) => Some(8),
            ScalarGetter::Ipv4(_) => Some(4),
            ScalarGetter::Ipv6(_) => Some(16),
            ScalarGetter::Mac(_) => Some(6),
            ScalarGetter::Ip(_) | ScalarGetter::Str(_) | ScalarGetter::Bytes(_) => None,
        },
        FieldGetter::Vector(_) => None,
    }
}

/// Element size of one vector entry
fn vector_element_size(getter: &VectorGetter) -> usize {
    match getter {
        VectorGetter::U8(_) => 1,
        VectorGetter::U16(_) => 2,
        VectorGetter::U32(_) => 4,
        VectorGetter::U64(_) | VectorGetter::F64(_) => 8,
    }
}

/// Family-specific address fields only appear in templates of their
/// own family.
pub fn field_matches_family(descriptor: &FieldDescriptor, family: IpFamily) -> bool {
    match descriptor.getter() {
        FieldGetter::Scalar(ScalarGetter::Ipv4(_)) => family == IpFamily::V4,
        FieldGetter::Scalar(ScalarGetter::Ipv6(_)) => family == IpFamily::V6,
        _ => true,
    }
}

/// Whether the owning plugin's data may be read for this field.
///
/// Besides the field's own availability bit, the owning plugin must
/// still be attached and constructed; a plugin removed mid-flow leaves
/// its bits behind but its context is gone.
fn field_is_present(record: &FlowRecord, protocol: usize, descriptor: &FieldDescriptor) -> bool {
    if !descriptor.is_in_record(record) {
        return false;
    }
    if protocol == 0 {
        // the built-in basic group reads the flow header itself
        return true;
    }
    let plugin = protocol - 1;
    record.plugins_available.test(plugin) && record.plugins_constructed.test(plugin)
}

fn field_source<'a>(record: &'a FlowRecord, protocol: usize) -> FieldSource<'a> {
    if protocol == 0 {
        FieldSource::header_only(record)
    } else {
        let context = record.plugin_context(protocol - 1).unwrap_or(&[]);
        FieldSource::new(record, context)
    }
}

fn variable_payload_len(source: FieldSource, getter: &FieldGetter) -> usize {
    match getter {
        FieldGetter::Scalar(ScalarGetter::Str(get)) => get(source).len(),
        FieldGetter::Scalar(ScalarGetter::Bytes(get)) => get(source).len(),
        FieldGetter::Vector(vector) => match vector {
            VectorGetter::U8(get) => get(source).len(),
            VectorGetter::U16(get) => get(source).len() * 2,
            VectorGetter::U32(get) => get(source).len() * 4,
            VectorGetter::U64(get) => get(source).len() * 8,
            VectorGetter::F64(get) => get(source).len() * 8,
        },
        _ => 0,
    }
}

/// The serialized size of `record` under `template`.
///
/// Fixed fields were pre-summed into the template's static size, so
/// this only walks the variable-length fields.
pub fn record_size(
    template: &Template,
    fields: &ProtocolFieldMap,
    record: &FlowRecord,
    family: IpFamily,
) -> usize {
    let mut size = template.static_size;
    for protocol in template.protocols.iter().copied() {
        for descriptor in fields.fields(protocol) {
            if !field_matches_family(descriptor, family) {
                continue;
            }
            if fixed_wire_size(descriptor.getter()).is_some() {
                continue;
            }
            let payload = if field_is_present(record, protocol, descriptor) {
                variable_payload_len(field_source(record, protocol), descriptor.getter())
            } else {
                0
            };
            size += basic_list::encoded_size(payload);
        }
    }
    size
}

fn write_scalar(encoder: &mut EncoderBuffer, source: FieldSource, getter: &ScalarGetter) {
    match getter {
        ScalarGetter::U8(get) => encoder.write_u8(get(source)),
        ScalarGetter::U16(get) => encoder.write_u16(get(source)),
        ScalarGetter::U32(get) => encoder.write_u32(get(source)),
        ScalarGetter::U64(get) => encoder.write_u64(get(source)),
        ScalarGetter::F64(get) => encoder.write_u64(get(source).to_bits()),
        ScalarGetter::Timestamp(get) => encoder.write_u64(get(source).as_unix_millis()),
        ScalarGetter::Ipv4(get) => encoder.write_slice(&get(source).octets()),
        ScalarGetter::Ipv6(get) => encoder.write_slice(&get(source).octets()),
        ScalarGetter::Mac(get) => encoder.write_slice(&get(source).octets()),
        ScalarGetter::Ip(_) => unreachable!("rejected during startup validation"),
        ScalarGetter::Str(get) => {
            let value = get(source).as_bytes();
            basic_list::write_basic_list(encoder, value.len(), |encoder| {
                encoder.write_slice(value)
            });
        }
        ScalarGetter::Bytes(get) => {
            let value = get(source);
            basic_list::write_basic_list(encoder, value.len(), |encoder| {
                encoder.write_slice(value)
            });
        }
    }
}

fn write_vector(encoder: &mut EncoderBuffer, source: FieldSource, getter: &VectorGetter) {
    let payload = variable_payload_len(source, &FieldGetter::Vector(*getter));
    basic_list::write_basic_list(encoder, payload, |encoder| match getter {
        VectorGetter::U8(get) => encoder.write_slice(get(source)),
        VectorGetter::U16(get) => {
            for value in get(source) {
                encoder.write_u16(*value);
            }
        }
        VectorGetter::U32(get) => {
            for value in get(source) {
                encoder.write_u32(*value);
            }
        }
        VectorGetter::U64(get) => {
            for value in get(source) {
                encoder.write_u64(*value);
            }
        }
        VectorGetter::F64(get) => {
            for value in get(source) {
                encoder.write_u64(value.to_bits());
            }
        }
    });
}

fn write_placeholder(encoder: &mut EncoderBuffer, getter: &FieldGetter) {
    match fixed_wire_size(getter) {
        Some(len) => encoder.write_repeated(len, 0),
        None => encoder.write_u8(0),
    }
}

/// Serializes one record, preserving the fixed per-template layout:
/// every template field is written, absent ones as zero bytes or an
/// empty list.
pub fn write_record(
    encoder: &mut EncoderBuffer,
    template: &Template,
    fields: &ProtocolFieldMap,
    record: &FlowRecord,
    family: IpFamily,
) {
    for protocol in template.protocols.iter().copied() {
        for descriptor in fields.fields(protocol) {
            if !field_matches_family(descriptor, family) {
                continue;
            }
            if !field_is_present(record, protocol, descriptor) {
                write_placeholder(encoder, descriptor.getter());
                continue;
            }
            let source = field_source(record, protocol);
            match descriptor.getter() {
                FieldGetter::Scalar(scalar) => write_scalar(encoder, source, scalar),
                FieldGetter::Vector(vector) => write_vector(encoder, source, vector),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{element::ElementMap, template::TemplateCache};
    use flowprobe_core::{
        field::{BasicFields, FieldRegistry},
        flow::{Direction, FlowRecordBuilder},
        inet::{IpV4Address, TcpFlags},
        packet::PacketContext,
    };
    use flowprobe_codec::DecoderBuffer;

    fn sample_flow() -> (FieldRegistry, BasicFields, flowprobe_core::flow::FlowRecord) {
        let mut registry = FieldRegistry::new();
        let basic = BasicFields::register(&mut registry).unwrap();

        let builder = FlowRecordBuilder::new([]).unwrap();
        let mut record = builder.build().unwrap();

        let mut packet = PacketContext::empty();
        packet.src_ip = IpV4Address::from([192, 0, 2, 1]).into();
        packet.dst_ip = IpV4Address::from([192, 0, 2, 2]).into();
        packet.src_port = 4321;
        packet.dst_port = 443;
        packet.l4_protocol = 6;
        packet.tcp_flags = TcpFlags::SYN;
        packet.wire_bytes = 60;
        record.init_from_packet(&packet, 1);

        let mut reverse = packet;
        reverse.tcp_flags = TcpFlags::SYN | TcpFlags::ACK;
        record.update(&reverse, Direction::Reverse);
        basic.mark(&mut record);

        (registry, basic, record)
    }

    fn elements() -> ElementMap {
        ElementMap::from_yaml_str(
            r#"
basic:
  - { name: src_ip4, pen: 0, id: 8, length: 4 }
  - { name: dst_ip4, pen: 0, id: 12, length: 4 }
  - { name: src_ip6, pen: 0, id: 27, length: 16 }
  - { name: dst_ip6, pen: 0, id: 28, length: 16 }
  - { name: src_port, pen: 0, id: 7, length: 2 }
  - { name: dst_port, pen: 0, id: 11, length: 2 }
  - { name: protocol, pen: 0, id: 4, length: 1 }
  - { name: src_mac, pen: 0, id: 56, length: 6 }
  - { name: dst_mac, pen: 0, id: 80, length: 6 }
  - { name: time_start, pen: 0, id: 152, length: 8 }
  - { name: time_end, pen: 0, id: 153, length: 8 }
  - { name: end_reason, pen: 0, id: 136, length: 1 }
  - { name: packets, pen: 0, id: 2, length: 8 }
  - { name: packets_rev, pen: 29305, id: 2, length: 8 }
  - { name: bytes, pen: 0, id: 1, length: 8 }
  - { name: bytes_rev, pen: 29305, id: 1, length: 8 }
  - { name: tcp_flags, pen: 0, id: 6, length: 1 }
  - { name: tcp_flags_rev, pen: 29305, id: 6, length: 1 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn size_matches_written_bytes_and_values_round_trip() {
        let (registry, _, record) = sample_flow();
        let merged: Vec<_> = registry
            .biflow_forward()
            .iter()
            .chain(registry.biflow_reverse())
            .copied()
            .collect();
        let map = ProtocolFieldMap::new(&merged, &["basic"]);
        let elements = elements();
        let mut cache = TemplateCache::new();

        let mask = map.protocol_mask(&record);
        assert_eq!(mask, 0b01);

        let template = cache.get_or_build(mask, IpFamily::V4, &map, &elements);
        let size = record_size(template, &map, &record, IpFamily::V4);
        assert_eq!(size, template.static_size);

        let mut storage = vec![0u8; size];
        let mut encoder = EncoderBuffer::new(&mut storage);
        write_record(&mut encoder, template, &map, &record, IpFamily::V4);
        assert_eq!(encoder.len(), size, "no partial field writes");

        // walk the record back with the template's field order
        let buffer = DecoderBuffer::new(encoder.as_slice());
        let (src_ip, buffer) = buffer.decode_slice(4).unwrap();
        assert_eq!(src_ip, [192, 0, 2, 1]);
        let (dst_ip, buffer) = buffer.decode_slice(4).unwrap();
        assert_eq!(dst_ip, [192, 0, 2, 2]);
        let (src_port, buffer) = buffer.decode_u16().unwrap();
        assert_eq!(src_port, 4321);
        let (dst_port, buffer) = buffer.decode_u16().unwrap();
        assert_eq!(dst_port, 443);
        let (protocol, buffer) = buffer.decode_u8().unwrap();
        assert_eq!(protocol, 6);
        // macs, timestamps, end reason
        let buffer = buffer.skip(6 + 6 + 8 + 8 + 1).unwrap();
        let (packets, buffer) = buffer.decode_u64().unwrap();
        assert_eq!(packets, 1);
        let (bytes, buffer) = buffer.decode_u64().unwrap();
        assert_eq!(bytes, 60);
        let (flags, buffer) = buffer.decode_u8().unwrap();
        assert_eq!(flags, TcpFlags::SYN.bits());
        // reverse direction
        let (packets_rev, buffer) = buffer.decode_u64().unwrap();
        assert_eq!(packets_rev, 1);
        let (bytes_rev, buffer) = buffer.decode_u64().unwrap();
        assert_eq!(bytes_rev, 60);
        let (flags_rev, buffer) = buffer.decode_u8().unwrap();
        assert_eq!(flags_rev, (TcpFlags::SYN | TcpFlags::ACK).bits());
        assert!(buffer.is_empty());
    }

    #[test]
    fn absent_fields_become_placeholders() {
        let (registry, basic, record) = sample_flow();
        let _ = basic;
        let map = ProtocolFieldMap::new(registry.biflow_forward(), &["basic"]);
        let elements = elements();
        let mut cache = TemplateCache::new();

        // build a v6 template; the v4 flow has no v6 address bits set
        let template = cache.get_or_build(0b01, IpFamily::V6, &map, &elements);
        let size = record_size(template, &map, &record, IpFamily::V6);

        let mut storage = vec![0u8; size];
        let mut encoder = EncoderBuffer::new(&mut storage);
        write_record(&mut encoder, template, &map, &record, IpFamily::V6);
        assert_eq!(encoder.len(), size);
        // both 16-byte addresses are zero placeholders
        assert_eq!(&encoder.as_slice()[..32], &[0u8; 32]);
    }
}
