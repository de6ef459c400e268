// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    flow::{
        bitset::{FieldSet, PluginSet},
        record::{FlowHeader, FlowRecord},
        DirectionalPair, FlowKey,
    },
    plugin::ContextLayout,
    MAX_PLUGIN_COUNT,
};
use core::{alloc::Layout, fmt, ptr::NonNull};

/// Sentinel offset of a plugin that is disabled for a flow
pub const PLUGIN_DISABLED: u32 = u32::MAX;

/// The plugin set could not be laid out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    TooManyPlugins,
    InvalidContextLayout,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TooManyPlugins => write!(f, "plugin count exceeds {MAX_PLUGIN_COUNT}"),
            Self::InvalidContextLayout => write!(f, "invalid plugin context layout"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// The flow allocation failed
///
/// The flow cache counts the packet as dropped and does not create a
/// flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "flow record allocation failed")
    }
}

impl std::error::Error for AllocError {}

/// Computes and reuses the layout of flow records for one plugin set
///
/// The same ordered plugin set always produces the same offsets, both
/// across flows and across runs.
#[derive(Clone, Debug)]
pub struct FlowRecordBuilder {
    layout: Layout,
    offsets: [u32; MAX_PLUGIN_COUNT],
    sizes: [u32; MAX_PLUGIN_COUNT],
    plugin_count: u32,
    available: PluginSet,
}

impl FlowRecordBuilder {
    /// Lays out records for `plugins`, in registration order.
    ///
    /// `None` entries are disabled for all flows built from this
    /// builder: they get the sentinel offset and no reserved bytes.
    pub fn new<I>(plugins: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = Option<ContextLayout>>,
    {
        let mut layout = Layout::new::<FlowHeader>();
        let mut offsets = [PLUGIN_DISABLED; MAX_PLUGIN_COUNT];
        let mut sizes = [0u32; MAX_PLUGIN_COUNT];
        let mut available = PluginSet::EMPTY;
        let mut plugin_count = 0usize;

        for entry in plugins {
            let index = plugin_count;
            if index >= MAX_PLUGIN_COUNT {
                return Err(LayoutError::TooManyPlugins);
            }
            plugin_count += 1;

            let Some(context) = entry else {
                continue;
            };

            let context_layout = Layout::from_size_align(context.size, context.alignment)
                .map_err(|_| LayoutError::InvalidContextLayout)?;
            let (extended, offset) = layout
                .extend(context_layout)
                .map_err(|_| LayoutError::InvalidContextLayout)?;

            offsets[index] = u32::try_from(offset).map_err(|_| LayoutError::InvalidContextLayout)?;
            sizes[index] = u32::try_from(context.size).map_err(|_| LayoutError::InvalidContextLayout)?;
            available.set(index);
            layout = extended;
        }

        Ok(Self {
            layout: layout.pad_to_align(),
            offsets,
            sizes,
            plugin_count: plugin_count as u32,
            available,
        })
    }

    #[inline]
    pub fn total_size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    #[inline]
    pub fn plugins_available(&self) -> PluginSet {
        self.available
    }

    #[inline]
    pub fn plugin_offsets(&self) -> &[u32] {
        &self.offsets[..self.plugin_count as usize]
    }

    /// Allocates one flow record and initializes its header in place.
    ///
    /// Context regions are zeroed but *not* constructed; plugins build
    /// their state in `on_init`.
    pub fn build(&self) -> Result<FlowRecord, AllocError> {
        // Safety: the layout was validated in `new` and is non-empty
        // (it always contains the header)
        let raw = unsafe { std::alloc::alloc_zeroed(self.layout) };
        let Some(ptr) = NonNull::new(raw as *mut FlowHeader) else {
            return Err(AllocError);
        };

        let header = FlowHeader {
            hash: 0,
            time_created: Default::default(),
            time_updated: Default::default(),
            key: FlowKey::default(),
            mac: DirectionalPair::default(),
            stats: DirectionalPair::default(),
            end_reason: None,
            fields_available: FieldSet::EMPTY,
            plugins_available: self.available,
            plugins_constructed: PluginSet::EMPTY,
            plugins_update: self.available,
            plugin_count: self.plugin_count,
            plugin_offsets: self.offsets,
            plugin_sizes: self.sizes,
            total_size: self.layout.size(),
            total_align: self.layout.align(),
        };

        unsafe {
            ptr.as_ptr().write(header);
            Ok(FlowRecord::from_raw(ptr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::FlowHeader;
    use core::mem::{align_of, size_of};

    fn layouts(specs: &[Option<(usize, usize)>]) -> Vec<Option<ContextLayout>> {
        specs
            .iter()
            .map(|spec| {
                spec.map(|(size, alignment)| ContextLayout { size, alignment })
            })
            .collect()
    }

    #[test]
    fn offsets_follow_the_header_and_respect_alignment() {
        let builder = FlowRecordBuilder::new(layouts(&[
            Some((24, 8)),
            Some((3, 1)),
            None,
            Some((64, 64)),
        ]))
        .unwrap();

        let offsets = builder.plugin_offsets();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[2], PLUGIN_DISABLED);

        let header_size = size_of::<FlowHeader>();
        assert!(offsets[0] as usize >= header_size);
        assert_eq!(offsets[0] as usize % 8, 0);
        assert_eq!(offsets[1], offsets[0] + 24);
        assert_eq!(offsets[3] as usize % 64, 0);
        assert!(offsets[3] as usize >= offsets[1] as usize + 3);

        assert_eq!(builder.alignment(), 64.max(align_of::<FlowHeader>()));
        assert!(builder.total_size() >= offsets[3] as usize + 64);
    }

    #[test]
    fn same_plugin_set_produces_identical_layout() {
        let specs = [Some((40, 8)), Some((16, 16)), Some((1, 1))];
        let a = FlowRecordBuilder::new(layouts(&specs)).unwrap();
        let b = FlowRecordBuilder::new(layouts(&specs)).unwrap();
        assert_eq!(a.plugin_offsets(), b.plugin_offsets());
        assert_eq!(a.total_size(), b.total_size());
        assert_eq!(a.alignment(), b.alignment());
    }

    #[test]
    fn built_records_expose_zeroed_contexts() {
        let builder =
            FlowRecordBuilder::new(layouts(&[Some((8, 8)), None, Some((4, 4))])).unwrap();
        let record = builder.build().unwrap();

        assert_eq!(record.plugin_count(), 3);
        assert!(record.plugins_available.test(0));
        assert!(!record.plugins_available.test(1));
        assert!(record.plugins_available.test(2));

        assert_eq!(record.plugin_context(0).unwrap(), &[0u8; 8][..]);
        assert!(record.plugin_context(1).is_none());
        assert_eq!(record.plugin_context(2).unwrap().len(), 4);
    }

    #[test]
    fn disabled_plugins_reserve_no_bytes() {
        let with_disabled =
            FlowRecordBuilder::new(layouts(&[Some((32, 8)), None, Some((32, 8))])).unwrap();
        let without =
            FlowRecordBuilder::new(layouts(&[Some((32, 8)), Some((32, 8))])).unwrap();
        assert_eq!(with_disabled.total_size(), without.total_size());
    }

    #[test]
    fn too_many_plugins_is_an_error() {
        let specs = vec![Some(ContextLayout { size: 1, alignment: 1 }); MAX_PLUGIN_COUNT + 1];
        assert_eq!(
            FlowRecordBuilder::new(specs).unwrap_err(),
            LayoutError::TooManyPlugins
        );
    }
}
