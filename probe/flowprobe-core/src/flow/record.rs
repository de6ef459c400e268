// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    flow::{bitset::{FieldSet, PluginSet}, builder::PLUGIN_DISABLED, Direction, DirectionalPair, FlowKey},
    inet::{IpAddress, MacAddress, TcpFlags, PROTOCOL_TCP},
    packet::PacketContext,
    time::Timestamp,
    MAX_PLUGIN_COUNT,
};
use core::{
    alloc::Layout,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice,
};

/// Per-direction packet statistics of a flow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectionalStats {
    pub time_start: Timestamp,
    pub time_end: Timestamp,
    pub packets: u64,
    pub bytes: u64,
    pub tcp_flags: TcpFlags,
}

/// Why a flow left the cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowEndReason {
    Inactive = 0x01,
    Active = 0x02,
    Eof = 0x03,
    Forced = 0x04,
    Resources = 0x05,
}

/// The fixed part of a flow record
///
/// Lives at offset zero of the flow allocation; plugin contexts follow
/// at the offsets recorded in the plugin table.
#[derive(Debug)]
pub struct FlowHeader {
    pub hash: u64,
    pub time_created: Timestamp,
    pub time_updated: Timestamp,
    pub key: FlowKey,
    pub mac: DirectionalPair<MacAddress>,
    pub stats: DirectionalPair<DirectionalStats>,
    pub end_reason: Option<FlowEndReason>,

    /// Which registered fields hold valid data for this flow
    pub fields_available: FieldSet,
    /// Plugins attached to this flow by the layout builder
    pub plugins_available: PluginSet,
    /// Plugins whose `on_init` returned a constructed result
    pub plugins_constructed: PluginSet,
    /// Plugins that still want per-packet callbacks
    pub plugins_update: PluginSet,

    // plugin table: count plus one offset (and context size) per plugin;
    // PLUGIN_DISABLED marks a plugin with no reserved bytes
    pub(super) plugin_count: u32,
    pub(super) plugin_offsets: [u32; MAX_PLUGIN_COUNT],
    pub(super) plugin_sizes: [u32; MAX_PLUGIN_COUNT],

    // allocation geometry, needed to free with the original layout
    pub(super) total_size: usize,
    pub(super) total_align: usize,
}

impl FlowHeader {
    #[inline]
    pub fn plugin_count(&self) -> usize {
        self.plugin_count as usize
    }

    /// The offset of a plugin's context region, if the plugin is
    /// enabled for this flow
    #[inline]
    pub fn plugin_offset(&self, plugin: usize) -> Option<usize> {
        debug_assert!(plugin < self.plugin_count as usize);
        match self.plugin_offsets[plugin] {
            PLUGIN_DISABLED => None,
            offset => Some(offset as usize),
        }
    }

    #[inline]
    fn plugin_size(&self, plugin: usize) -> usize {
        self.plugin_sizes[plugin] as usize
    }
}

/// An owning handle to one flow allocation
///
/// Dereferences to [`FlowHeader`]; plugin context bytes are reachable
/// through [`plugin_context`](Self::plugin_context). Dropping the
/// handle releases the allocation with its original layout. Dropping
/// plugin context *contents* is the plugin runtime's job (`on_destroy`),
/// not the handle's.
pub struct FlowRecord {
    ptr: NonNull<FlowHeader>,
}

// The record is plain data plus plugin context bytes with no interior
// mutability; plugins are required to keep their context types Send and
// Sync. Shared references only permit reads, which is how exporter
// threads in different reader groups serialize the same record.
unsafe impl Send for FlowRecord {}
unsafe impl Sync for FlowRecord {}

impl FlowRecord {
    /// # Safety
    ///
    /// `ptr` must come from `FlowRecordBuilder::build` and ownership is
    /// transferred to the returned handle.
    #[inline]
    pub(super) unsafe fn from_raw(ptr: NonNull<FlowHeader>) -> Self {
        Self { ptr }
    }

    #[inline]
    fn base(&self) -> *const u8 {
        self.ptr.as_ptr() as *const u8
    }

    /// The context bytes of an enabled plugin
    #[inline]
    pub fn plugin_context(&self, plugin: usize) -> Option<&[u8]> {
        let offset = self.plugin_offset(plugin)?;
        let size = self.plugin_size(plugin);
        // Safety: the builder reserved `size` bytes at `offset` inside
        // this allocation
        unsafe { Some(slice::from_raw_parts(self.base().add(offset), size)) }
    }

    /// Mutable context bytes of an enabled plugin
    #[inline]
    pub fn plugin_context_mut(&mut self, plugin: usize) -> Option<&mut [u8]> {
        let offset = self.plugin_offset(plugin)?;
        let size = self.plugin_size(plugin);
        unsafe {
            Some(slice::from_raw_parts_mut(
                (self.ptr.as_ptr() as *mut u8).add(offset),
                size,
            ))
        }
    }

    /// Splits the record into the mutable header and one plugin's
    /// mutable context so a hook can update both.
    ///
    /// Returns `None` for a disabled plugin.
    #[inline]
    pub fn split_plugin_mut(&mut self, plugin: usize) -> Option<(&mut FlowHeader, &mut [u8])> {
        let offset = self.plugin_offset(plugin)?;
        let size = self.plugin_size(plugin);
        // Safety: every context region starts past the header, so the
        // two borrows cannot alias
        unsafe {
            let header = &mut *self.ptr.as_ptr();
            let data =
                slice::from_raw_parts_mut((self.ptr.as_ptr() as *mut u8).add(offset), size);
            Some((header, data))
        }
    }

    /// Fills the header from the first packet of the flow
    pub fn init_from_packet(&mut self, packet: &PacketContext, hash: u64) {
        let header = &mut **self;
        header.hash = hash;
        header.time_created = packet.timestamp;
        header.time_updated = packet.timestamp;
        header.key = FlowKey {
            src_ip: packet.src_ip,
            dst_ip: packet.dst_ip,
            src_port: packet.src_port,
            dst_port: packet.dst_port,
            l4_protocol: packet.l4_protocol,
        };
        header.mac = DirectionalPair::new(packet.src_mac, packet.dst_mac);

        let forward = &mut header.stats[Direction::Forward];
        forward.time_start = packet.timestamp;
        forward.time_end = packet.timestamp;
        forward.packets = 1;
        forward.bytes = packet.wire_bytes;
        if packet.l4_protocol == PROTOCOL_TCP {
            forward.tcp_flags |= packet.tcp_flags;
        }
    }

    /// Folds a subsequent packet into the directional statistics
    pub fn update(&mut self, packet: &PacketContext, direction: Direction) {
        let header = &mut **self;
        header.time_updated = packet.timestamp;

        let stats = &mut header.stats[direction];
        if stats.packets == 0 {
            stats.time_start = packet.timestamp;
        }
        stats.time_end = packet.timestamp;
        stats.packets += 1;
        stats.bytes += packet.wire_bytes;
        if packet.l4_protocol == PROTOCOL_TCP {
            stats.tcp_flags |= packet.tcp_flags;
        }
    }

    /// The direction of a packet relative to this flow's key
    pub fn direction_of(&self, packet: &PacketContext) -> Direction {
        let key = &self.key;
        if packet.src_ip == key.src_ip && packet.src_port == key.src_port {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    #[inline]
    pub fn ip_src(&self) -> IpAddress {
        self.key.src_ip
    }

    #[inline]
    pub fn ip_dst(&self) -> IpAddress {
        self.key.dst_ip
    }
}

impl Deref for FlowRecord {
    type Target = FlowHeader;

    #[inline]
    fn deref(&self) -> &FlowHeader {
        unsafe { self.ptr.as_ref() }
    }
}

impl DerefMut for FlowRecord {
    #[inline]
    fn deref_mut(&mut self) -> &mut FlowHeader {
        unsafe { self.ptr.as_mut() }
    }
}

impl Drop for FlowRecord {
    fn drop(&mut self) {
        unsafe {
            let size = self.total_size;
            let align = self.total_align;
            let layout = Layout::from_size_align_unchecked(size, align);
            core::ptr::drop_in_place(self.ptr.as_ptr());
            std::alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout);
        }
    }
}

impl core::fmt::Debug for FlowRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("FlowRecord")
            .field("hash", &self.hash)
            .field("key", &self.key)
            .field("plugins_available", &self.plugins_available)
            .finish()
    }
}
