// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{field::getter::FieldGetter, flow::FlowHeader};

/// Immutable metadata of one registered field
///
/// Descriptors can only be created by the registry, which guarantees a
/// process-unique bit index per `(group, name)`.
#[derive(Clone, Copy, Debug)]
pub struct FieldDescriptor {
    group: &'static str,
    name: &'static str,
    bit_index: u16,
    getter: FieldGetter,
}

impl FieldDescriptor {
    pub(super) fn new(
        group: &'static str,
        name: &'static str,
        bit_index: u16,
        getter: FieldGetter,
    ) -> Self {
        Self {
            group,
            name,
            bit_index,
            getter,
        }
    }

    #[inline]
    pub fn group(&self) -> &'static str {
        self.group
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn bit_index(&self) -> usize {
        self.bit_index as usize
    }

    #[inline]
    pub fn getter(&self) -> &FieldGetter {
        &self.getter
    }

    /// Whether this field holds valid data in the given flow
    #[inline]
    pub fn is_in_record(&self, flow: &FlowHeader) -> bool {
        flow.fields_available.test(self.bit_index as usize)
    }
}
