// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flow records and their memory layout.
//!
//! A flow record is a single aligned allocation holding the fixed flow
//! header, a plugin offset table and one context region per attached
//! plugin. The layout is computed once per plugin set by
//! [`FlowRecordBuilder`] and is identical for every flow built from it.

mod bitset;
mod builder;
mod direction;
mod key;
mod record;

pub use bitset::{FieldSet, PluginSet};
pub use builder::{AllocError, FlowRecordBuilder, LayoutError, PLUGIN_DISABLED};
pub use direction::{Direction, DirectionalPair};
pub use key::FlowKey;
pub use record::{DirectionalStats, FlowEndReason, FlowHeader, FlowRecord};
