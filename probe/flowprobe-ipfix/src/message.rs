// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! IPFIX message assembly: the 16-byte message header, template and
//! data sets, and the MTU-bounded flush discipline.

use crate::template::TEMPLATE_SET_ID;
use flowprobe_codec::EncoderBuffer;

/// IPFIX protocol version carried in every message header
pub const IPFIX_VERSION: u16 = 0x000a;
/// Message header: version, length, export time, sequence, ODID
pub const MESSAGE_HEADER_SIZE: usize = 16;
/// Set header: set id, set length
pub const SET_HEADER_SIZE: usize = 4;

/// An IPFIX message under construction.
///
/// Sets are appended until the configured MTU would be exceeded; the
/// caller flushes and starts over. The sequence number counts data
/// records of the transport session and is stamped at finish time, so
/// a pending message can survive a reconnection (which resets the
/// session sequence) unchanged.
#[derive(Debug)]
pub struct MessageBuffer {
    buffer: Vec<u8>,
    mtu: usize,
    odid: u32,
    sequence: u32,
    records_in_message: u32,
    flows_in_message: u32,
}

impl MessageBuffer {
    pub fn new(mtu: usize, odid: u32) -> Self {
        assert!(mtu > MESSAGE_HEADER_SIZE + SET_HEADER_SIZE, "mtu too small");
        let mut message = Self {
            buffer: Vec::with_capacity(mtu),
            mtu,
            odid,
            sequence: 0,
            records_in_message: 0,
            flows_in_message: 0,
        };
        message.begin();
        message
    }

    /// Starts an empty message (header space reserved, patched at
    /// finish)
    fn begin(&mut self) {
        self.buffer.clear();
        self.buffer.resize(MESSAGE_HEADER_SIZE, 0);
        self.records_in_message = 0;
        self.flows_in_message = 0;
    }

    /// Whether a set of `body_len` more bytes still fits the MTU
    #[inline]
    pub fn fits(&self, body_len: usize) -> bool {
        self.buffer.len() + SET_HEADER_SIZE + body_len <= self.mtu
    }

    /// Whether any set has been appended since the last flush
    #[inline]
    pub fn has_sets(&self) -> bool {
        self.buffer.len() > MESSAGE_HEADER_SIZE
    }

    /// Largest set body that can ever fit one message
    #[inline]
    pub fn max_body(&self) -> usize {
        self.mtu - MESSAGE_HEADER_SIZE - SET_HEADER_SIZE
    }

    #[inline]
    pub fn flows_in_message(&self) -> u32 {
        self.flows_in_message
    }

    /// Appends one template set containing a single template record
    pub fn append_template_set(&mut self, wire: &[u8]) {
        debug_assert!(self.fits(wire.len()));
        let set_len = (SET_HEADER_SIZE + wire.len()) as u16;
        self.buffer.extend_from_slice(&TEMPLATE_SET_ID.to_be_bytes());
        self.buffer.extend_from_slice(&set_len.to_be_bytes());
        self.buffer.extend_from_slice(wire);
    }

    /// Appends one data set holding a single record of `record_len`
    /// bytes, produced by `write`.
    pub fn append_data_set(
        &mut self,
        template_id: u16,
        record_len: usize,
        write: impl FnOnce(&mut EncoderBuffer),
    ) {
        debug_assert!(self.fits(record_len));
        let set_len = (SET_HEADER_SIZE + record_len) as u16;
        self.buffer.extend_from_slice(&template_id.to_be_bytes());
        self.buffer.extend_from_slice(&set_len.to_be_bytes());

        let start = self.buffer.len();
        self.buffer.resize(start + record_len, 0);
        let mut encoder = EncoderBuffer::new(&mut self.buffer[start..]);
        write(&mut encoder);
        debug_assert_eq!(encoder.len(), record_len, "record length mismatch");

        self.records_in_message += 1;
        self.flows_in_message += 1;
    }

    /// Stamps the header and returns the finished message bytes.
    ///
    /// The caller sends the returned slice and then either
    /// [`confirm`](Self::confirm)s it (advancing the sequence and
    /// starting a new message) or leaves it pending for a retry.
    pub fn finish(&mut self, export_time_secs: u32) -> &[u8] {
        let length = self.buffer.len() as u16;
        let mut encoder = EncoderBuffer::new(&mut self.buffer[..MESSAGE_HEADER_SIZE]);
        encoder.write_u16(IPFIX_VERSION);
        encoder.write_u16(length);
        encoder.write_u32(export_time_secs);
        encoder.write_u32(self.sequence);
        encoder.write_u32(self.odid);
        &self.buffer
    }

    /// Completes the current message after a successful send
    pub fn confirm(&mut self) {
        self.sequence = self.sequence.wrapping_add(self.records_in_message);
        self.begin();
    }

    /// Drops the current message contents (datagram loss path)
    pub fn discard(&mut self) {
        self.begin();
    }

    /// Resets the session sequence number; done on reconnection.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}
