// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed exporter fields.
//!
//! Plugins register fields once at startup; the registry assigns each a
//! stable bit index and files its descriptor into the four exporter
//! views (biflow/uniflow x forward/reverse). At export time the IPFIX
//! writer walks descriptors and pulls values through their getters.

mod basic;
mod descriptor;
mod getter;
mod handler;
mod map;
mod registry;

pub use basic::{BasicFields, BASIC_GROUP};
pub use descriptor::FieldDescriptor;
pub use getter::{FieldGetter, FieldSource, ScalarGetter, VectorGetter};
pub use handler::FieldHandler;
pub use map::ProtocolFieldMap;
pub use registry::{FieldGroup, FieldRegistry, RegistryError};
