// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    flow::FlowHeader,
    inet::{IpAddress, IpV4Address, IpV6Address, MacAddress},
    time::Timestamp,
};
use core::mem::{align_of, size_of};

/// What a field getter reads from: the flow header plus the context
/// bytes of the plugin that owns the field.
#[derive(Clone, Copy)]
pub struct FieldSource<'a> {
    pub flow: &'a FlowHeader,
    context: &'a [u8],
}

impl<'a> FieldSource<'a> {
    #[inline]
    pub fn new(flow: &'a FlowHeader, context: &'a [u8]) -> Self {
        Self { flow, context }
    }

    /// A source for fields that only read the flow header
    #[inline]
    pub fn header_only(flow: &'a FlowHeader) -> Self {
        Self { flow, context: &[] }
    }

    #[inline]
    pub fn context_bytes(&self) -> &'a [u8] {
        self.context
    }

    /// Reinterprets the context bytes as the owning plugin's context
    /// type.
    ///
    /// The layout builder reserved this region with `C`'s size and
    /// alignment, and the field-availability bit guarantees the plugin
    /// constructed it, so the cast is sound for the plugin's own `C`.
    #[inline]
    pub fn context<C>(&self) -> &'a C {
        assert!(size_of::<C>() <= self.context.len());
        assert_eq!(self.context.as_ptr() as usize % align_of::<C>(), 0);
        unsafe { &*(self.context.as_ptr() as *const C) }
    }
}

/// Typed accessor of a scalar field value
#[derive(Clone, Copy, Debug)]
pub enum ScalarGetter {
    U8(for<'a> fn(FieldSource<'a>) -> u8),
    U16(for<'a> fn(FieldSource<'a>) -> u16),
    U32(for<'a> fn(FieldSource<'a>) -> u32),
    U64(for<'a> fn(FieldSource<'a>) -> u64),
    F64(for<'a> fn(FieldSource<'a>) -> f64),
    Timestamp(for<'a> fn(FieldSource<'a>) -> Timestamp),
    Ipv4(for<'a> fn(FieldSource<'a>) -> IpV4Address),
    Ipv6(for<'a> fn(FieldSource<'a>) -> IpV6Address),
    Ip(for<'a> fn(FieldSource<'a>) -> IpAddress),
    Mac(for<'a> fn(FieldSource<'a>) -> MacAddress),
    Str(for<'a> fn(FieldSource<'a>) -> &'a str),
    Bytes(for<'a> fn(FieldSource<'a>) -> &'a [u8]),
}

/// Typed accessor of a vector field value
///
/// Vector fields serialize as IPFIX basic lists.
#[derive(Clone, Copy, Debug)]
pub enum VectorGetter {
    U8(for<'a> fn(FieldSource<'a>) -> &'a [u8]),
    U16(for<'a> fn(FieldSource<'a>) -> &'a [u16]),
    U32(for<'a> fn(FieldSource<'a>) -> &'a [u32]),
    U64(for<'a> fn(FieldSource<'a>) -> &'a [u64]),
    F64(for<'a> fn(FieldSource<'a>) -> &'a [f64]),
}

/// A field's accessor, scalar or vector
#[derive(Clone, Copy, Debug)]
pub enum FieldGetter {
    Scalar(ScalarGetter),
    Vector(VectorGetter),
}

impl FieldGetter {
    #[inline]
    pub const fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }
}

impl From<ScalarGetter> for FieldGetter {
    #[inline]
    fn from(getter: ScalarGetter) -> Self {
        Self::Scalar(getter)
    }
}

impl From<VectorGetter> for FieldGetter {
    #[inline]
    fn from(getter: VectorGetter) -> Self {
        Self::Vector(getter)
    }
}
