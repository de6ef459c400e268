// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core runtime of the flowprobe exporter: typed field registry,
//! per-flow record layout, and the process-plugin lifecycle driver.

pub mod field;
pub mod flow;
pub mod inet;
pub mod options;
pub mod packet;
pub mod plugin;
pub mod time;

/// Upper bound on process plugins attached to a single flow.
///
/// Plugin indices double as bit positions in the per-flow plugin
/// bitsets, so this cannot exceed the bitset width.
pub const MAX_PLUGIN_COUNT: usize = 32;

/// Upper bound on registered exporter fields.
///
/// Field bit indices are positions in the per-flow `fields_available`
/// bitset; exceeding this during registration is a configuration error.
pub const MAX_FIELD_COUNT: usize = 192;
