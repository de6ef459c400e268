// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{field::descriptor::FieldDescriptor, flow::FlowHeader};

/// The registered fields of one exporter view, bucketed by protocol
/// (plugin) index
///
/// Protocol order is the plugin registration order; the exporter keys
/// its templates on the bitmask of protocols that contributed data to a
/// record.
#[derive(Clone, Debug)]
pub struct ProtocolFieldMap {
    groups: Vec<&'static str>,
    fields: Vec<Vec<FieldDescriptor>>,
}

impl ProtocolFieldMap {
    /// Buckets `view` by the group names in `groups` order.
    ///
    /// Fields whose group is not listed do not take part in this view.
    pub fn new(view: &[FieldDescriptor], groups: &[&'static str]) -> Self {
        let fields = groups
            .iter()
            .map(|group| {
                view.iter()
                    .filter(|descriptor| descriptor.group() == *group)
                    .copied()
                    .collect()
            })
            .collect();
        Self {
            groups: groups.to_vec(),
            fields,
        }
    }

    /// Number of protocols in the map
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[inline]
    pub fn fields(&self, protocol: usize) -> &[FieldDescriptor] {
        &self.fields[protocol]
    }

    /// Iterates `(protocol_index, fields)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[FieldDescriptor])> {
        self.fields
            .iter()
            .enumerate()
            .map(|(index, fields)| (index, fields.as_slice()))
    }

    /// The bitmask of protocols with at least one field present in
    /// `flow`; this is the template key of the record.
    pub fn protocol_mask(&self, flow: &FlowHeader) -> u32 {
        let mut mask = 0u32;
        for (protocol, fields) in self.iter() {
            if fields.iter().any(|field| field.is_in_record(flow)) {
                mask |= 1 << protocol;
            }
        }
        mask
    }
}
