// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exporter behavior against live sockets: template
//! emission and refresh, message framing, sequence numbers and the
//! reconnect discipline.

use core::time::Duration;
use flowprobe_codec::DecoderBuffer;
use flowprobe_core::{
    field::{BasicFields, FieldRegistry},
    flow::{Direction, FlowRecord, FlowRecordBuilder},
    inet::{IpV4Address, TcpFlags},
    packet::PacketContext,
    time::Timestamp,
};
use flowprobe_ipfix::{
    ElementMap, ExporterOptions, IpfixExporter, TransportMode, IPFIX_VERSION, TEMPLATE_SET_ID,
};
use std::io::Read;
use std::net::{TcpListener, UdpSocket};

const ELEMENTS: &str = r#"
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
"#;

struct Fixture {
    registry: FieldRegistry,
    basic: BasicFields,
}

impl Fixture {
    fn new() -> Self {
        let mut registry = FieldRegistry::new();
        let basic = BasicFields::register(&mut registry).unwrap();
        Self { registry, basic }
    }

    fn biflow_record(&self) -> FlowRecord {
        let builder = FlowRecordBuilder::new([]).unwrap();
        let mut record = builder.build().unwrap();

        let mut packet = PacketContext::empty();
        packet.timestamp = Timestamp::from_unix(1_700_000_000, 0);
        packet.src_ip = IpV4Address::from([10, 1, 2, 3]).into();
        packet.dst_ip = IpV4Address::from([10, 1, 2, 4]).into();
        packet.src_port = 40_000;
        packet.dst_port = 443;
        packet.l4_protocol = 6;
        packet.tcp_flags = TcpFlags::SYN;
        packet.wire_bytes = 64;
        record.init_from_packet(&packet, 0xfeed);

        let mut reverse = packet;
        reverse.tcp_flags = TcpFlags::SYN | TcpFlags::ACK;
        record.update(&reverse, Direction::Reverse);

        self.basic.mark(&mut record);
        record
    }
}

struct Message {
    sequence: u32,
    sets: Vec<(u16, Vec<u8>)>,
}

fn parse_message(bytes: &[u8]) -> Message {
    let buffer = DecoderBuffer::new(bytes);
    let (version, buffer) = buffer.decode_u16().unwrap();
    assert_eq!(version, IPFIX_VERSION);
    let (length, buffer) = buffer.decode_u16().unwrap();
    assert_eq!(length as usize, bytes.len(), "message length is exact");
    let (_time, buffer) = buffer.decode_u32().unwrap();
    let (sequence, buffer) = buffer.decode_u32().unwrap();
    let (_odid, mut buffer) = buffer.decode_u32().unwrap();

    let mut sets = Vec::new();
    while !buffer.is_empty() {
        let (set_id, rest) = buffer.decode_u16().unwrap();
        let (set_len, rest) = rest.decode_u16().unwrap();
        let (body, rest) = rest.decode_slice(set_len as usize - 4).unwrap();
        sets.push((set_id, body.to_vec()));
        buffer = rest;
    }
    Message { sequence, sets }
}

#[test]
fn udp_template_refresh_interval() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let port = receiver.local_addr().unwrap().port();

    let fixture = Fixture::new();
    let elements = ElementMap::from_yaml_str(ELEMENTS).unwrap();
    let mut exporter = IpfixExporter::new(
        &format!("udp;host=127.0.0.1;port={port};template=1"),
        &fixture.registry,
        &["basic"],
        elements,
    )
    .unwrap();

    let record = fixture.biflow_record();
    let t0 = Timestamp::from_unix(1_700_000_100, 0);

    exporter.process_record_at(&record, t0);
    exporter.flush_at(t0);

    let mut datagram = [0u8; 2048];
    let len = receiver.recv(&mut datagram).unwrap();
    let first = parse_message(&datagram[..len]);
    assert_eq!(first.sequence, 0);
    // template precedes the data set
    assert_eq!(first.sets[0].0, TEMPLATE_SET_ID);
    assert!(first.sets[1].0 >= 258);

    // within the refresh interval no template is resent
    let t1 = t0 + Duration::from_millis(500);
    exporter.process_record_at(&record, t1);
    exporter.flush_at(t1);
    let len = receiver.recv(&mut datagram).unwrap();
    let second = parse_message(&datagram[..len]);
    assert_eq!(second.sequence, 1, "one data record was confirmed");
    assert!(second.sets.iter().all(|(id, _)| *id != TEMPLATE_SET_ID));

    // past the interval the template is emitted again, before the data
    let t2 = t0 + Duration::from_secs(2);
    exporter.process_record_at(&record, t2);
    exporter.flush_at(t2);
    let len = receiver.recv(&mut datagram).unwrap();
    let third = parse_message(&datagram[..len]);
    assert_eq!(third.sets[0].0, TEMPLATE_SET_ID);
    assert!(third.sets[1].0 >= 258);
}

#[test]
fn filled_message_flushes_before_the_next_record() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    let port = receiver.local_addr().unwrap().port();

    let fixture = Fixture::new();
    let elements = ElementMap::from_yaml_str(ELEMENTS).unwrap();
    // small mtu: template + one record fill a message
    let mut exporter = IpfixExporter::new(
        &format!("udp;host=127.0.0.1;port={port};mtu=200"),
        &fixture.registry,
        &["basic"],
        elements,
    )
    .unwrap();

    let record = fixture.biflow_record();
    let t0 = Timestamp::from_unix(1_700_000_100, 0);

    for _ in 0..3 {
        exporter.process_record_at(&record, t0);
    }
    exporter.flush_at(t0);

    let mut datagram = [0u8; 2048];
    let mut messages = Vec::new();
    for _ in 0..3 {
        match receiver.recv(&mut datagram) {
            Ok(len) => messages.push(parse_message(&datagram[..len])),
            Err(_) => break,
        }
    }

    assert!(messages.len() >= 2, "records forced intermediate flushes");
    let records: usize = messages
        .iter()
        .flat_map(|message| message.sets.iter())
        .filter(|(id, _)| *id >= 258)
        .count();
    assert_eq!(records, 3, "no record was lost or truncated");
    for message in &messages {
        assert!(message.sets.iter().map(|(_, b)| b.len() + 4).sum::<usize>() + 16 <= 200);
    }
}

#[test]
fn oversized_record_is_an_error_not_a_truncation() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    let port = receiver.local_addr().unwrap().port();

    let fixture = Fixture::new();
    let elements = ElementMap::from_yaml_str(ELEMENTS).unwrap();
    // smaller than one record (the fixed fields alone are 76 bytes)
    let mut exporter = IpfixExporter::new(
        &format!("udp;host=127.0.0.1;port={port};mtu=60"),
        &fixture.registry,
        &["basic"],
        elements,
    )
    .unwrap();

    let record = fixture.biflow_record();
    exporter.process_record_at(&record, Timestamp::from_unix(1, 0));
    assert_eq!(exporter.stats().oversized_records, 1);
    assert_eq!(exporter.stats().messages, 0);
}

fn read_message(stream: &mut std::net::TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut rest = vec![0u8; length - 4];
    stream.read_exact(&mut rest).unwrap();
    let mut message = header.to_vec();
    message.extend_from_slice(&rest);
    message
}

#[test]
fn tcp_reconnect_resets_sequence_and_replays_templates() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let addr = listener.local_addr().unwrap();

    let fixture = Fixture::new();
    let elements = ElementMap::from_yaml_str(ELEMENTS).unwrap();
    let mut options =
        ExporterOptions::parse(&format!("host=127.0.0.1;port={}", addr.port())).unwrap();
    assert_eq!(options.mode, TransportMode::TcpNonBlocking);
    options.reconnect_min = Duration::from_millis(1);
    options.reconnect_max = Duration::from_millis(5);
    let mut exporter =
        IpfixExporter::with_options(options, &fixture.registry, &["basic"], elements).unwrap();

    let record = fixture.biflow_record();
    let t0 = Timestamp::from_unix(1_700_000_200, 0);

    let (mut accepted, _) = listener.accept().unwrap();
    exporter.process_record_at(&record, t0);
    exporter.flush_at(t0);

    let first = parse_message(&read_message(&mut accepted));
    assert_eq!(first.sequence, 0);
    assert_eq!(first.sets[0].0, TEMPLATE_SET_ID);
    assert_eq!(exporter.stats().messages, 1);

    // collector goes away; keep submitting until the break is observed
    // (writes into a dying socket can succeed before the peer reset
    // surfaces, which is ordinary TCP loss)
    drop(accepted);
    drop(listener);

    let mut broke = false;
    for _ in 0..200 {
        exporter.process_record_at(&record, t0);
        let sent_before = exporter.stats().messages;
        exporter.flush_at(t0);
        if exporter.stats().messages == sent_before {
            broke = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(broke, "peer reset was never observed");
    // stream failures retain the buffer instead of dropping it
    assert_eq!(exporter.stats().dropped_messages, 0);
    let stalled_at = exporter.stats().messages;

    // collector returns; the exporter reconnects, resends the template
    // with a fresh session sequence and then the retained data
    let listener = TcpListener::bind(addr).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while exporter.stats().messages < stalled_at + 2 && std::time::Instant::now() < deadline {
        exporter.flush_at(t0);
        std::thread::sleep(Duration::from_millis(2));
    }
    let (mut accepted, _) = listener.accept().unwrap();

    let replay = parse_message(&read_message(&mut accepted));
    assert_eq!(replay.sequence, 0, "sequence restarted with the session");
    assert!(replay.sets.iter().all(|(id, _)| *id == TEMPLATE_SET_ID));

    let data = parse_message(&read_message(&mut accepted));
    assert_eq!(data.sequence, 0);
    assert!(data.sets.iter().any(|(id, _)| *id >= 258));
}
