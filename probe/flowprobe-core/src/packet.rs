// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The boundary type handed in by the packet source.
//!
//! The upstream reader owns parsing of link/network/transport layers;
//! plugins only ever see this flattened view plus the raw L7 payload.

use crate::{
    inet::{IpAddress, MacAddress, TcpFlags},
    time::Timestamp,
};

/// Transport-level details the packet source extracted from a TCP
/// segment
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpFeatures {
    pub window: u16,
    /// Cumulative `tcpOptions` bitmask of the segment's option kinds
    pub options: u64,
    /// Maximum segment size, when the option was present
    pub mss: Option<u32>,
}

/// One parsed packet, as delivered by the packet source
#[derive(Clone, Copy, Debug)]
pub struct PacketContext<'a> {
    pub timestamp: Timestamp,
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub src_ip: IpAddress,
    pub dst_ip: IpAddress,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_protocol: u8,
    pub tcp_flags: TcpFlags,
    /// IPv4 TTL or IPv6 hop limit
    pub ttl: u8,
    /// IPv4 fragmentation flags; zero for IPv6
    pub ip_flags: u8,
    /// Present for TCP segments
    pub tcp: Option<TcpFeatures>,
    /// Total L3 length (IP header + payload), the byte count that flow
    /// statistics accumulate.
    pub wire_bytes: u64,
    /// The L7 payload
    pub payload: &'a [u8],
}

impl<'a> PacketContext<'a> {
    /// A zeroed packet for tests and defaulting; fields are expected to
    /// be overridden by the caller.
    pub fn empty() -> Self {
        Self {
            timestamp: Timestamp::EPOCH,
            src_mac: MacAddress::UNSPECIFIED,
            dst_mac: MacAddress::UNSPECIFIED,
            src_ip: IpAddress::default(),
            dst_ip: IpAddress::default(),
            src_port: 0,
            dst_port: 0,
            l4_protocol: 0,
            tcp_flags: TcpFlags::default(),
            ttl: 0,
            ip_flags: 0,
            tcp: None,
            wire_bytes: 0,
            payload: &[],
        }
    }
}
