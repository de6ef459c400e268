// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    field::{descriptor::FieldDescriptor, getter::FieldGetter, handler::FieldHandler},
    MAX_FIELD_COUNT,
};
use core::fmt;
use std::collections::HashSet;

/// Field registration failed; both variants are fatal configuration
/// errors at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateField {
        group: &'static str,
        name: &'static str,
    },
    CapacityExceeded,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DuplicateField { group, name } => {
                write!(f, "field {group}.{name} is already registered")
            }
            Self::CapacityExceeded => {
                write!(f, "field bit-index capacity ({MAX_FIELD_COUNT}) exceeded")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Central registry of exporter fields
///
/// Bit indices are assigned monotonically and never change for the
/// process lifetime. Registration closes when the registry is handed to
/// the exporter; afterwards the views are stable immutable slices.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    biflow_forward: Vec<FieldDescriptor>,
    biflow_reverse: Vec<FieldDescriptor>,
    uniflow_forward: Vec<FieldDescriptor>,
    uniflow_reverse: Vec<FieldDescriptor>,
    registered: HashSet<(&'static str, &'static str)>,
    next_bit: usize,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a registration scope for one field group
    pub fn group(&mut self, name: &'static str) -> FieldGroup<'_> {
        FieldGroup {
            registry: self,
            group: name,
        }
    }

    /// Fields of a biflow record, forward direction
    pub fn biflow_forward(&self) -> &[FieldDescriptor] {
        &self.biflow_forward
    }

    /// Fields of a biflow record, reverse direction
    pub fn biflow_reverse(&self) -> &[FieldDescriptor] {
        &self.biflow_reverse
    }

    /// Fields of a uniflow record, forward direction
    pub fn uniflow_forward(&self) -> &[FieldDescriptor] {
        &self.uniflow_forward
    }

    /// Fields of a uniflow record, reverse direction
    pub fn uniflow_reverse(&self) -> &[FieldDescriptor] {
        &self.uniflow_reverse
    }

    fn alloc_bit(
        &mut self,
        group: &'static str,
        name: &'static str,
    ) -> Result<u16, RegistryError> {
        if !self.registered.insert((group, name)) {
            return Err(RegistryError::DuplicateField { group, name });
        }
        if self.next_bit >= MAX_FIELD_COUNT {
            return Err(RegistryError::CapacityExceeded);
        }
        let bit = self.next_bit as u16;
        self.next_bit += 1;
        Ok(bit)
    }
}

/// Registration interface scoped to one group name
///
/// Created by [`FieldRegistry::group`]; all fields registered through
/// it share the group.
pub struct FieldGroup<'r> {
    registry: &'r mut FieldRegistry,
    group: &'static str,
}

impl FieldGroup<'_> {
    /// Registers a single field visible in both biflow-forward and
    /// uniflow-forward views.
    pub fn register_scalar(
        &mut self,
        name: &'static str,
        getter: impl Into<FieldGetter>,
    ) -> Result<FieldHandler, RegistryError> {
        let bit = self.registry.alloc_bit(self.group, name)?;
        let descriptor = FieldDescriptor::new(self.group, name, bit, getter.into());
        self.registry.biflow_forward.push(descriptor);
        self.registry.uniflow_forward.push(descriptor);
        Ok(FieldHandler::new(bit))
    }

    /// Registers a vector-valued field; placement rules match
    /// [`register_scalar`](Self::register_scalar).
    pub fn register_vector(
        &mut self,
        name: &'static str,
        getter: crate::field::getter::VectorGetter,
    ) -> Result<FieldHandler, RegistryError> {
        self.register_scalar(name, getter)
    }

    /// Registers a forward/reverse field pair.
    ///
    /// The forward field lands in the forward views, the reverse field
    /// in the reverse views.
    pub fn register_directional_pair(
        &mut self,
        forward_name: &'static str,
        reverse_name: &'static str,
        forward: impl Into<FieldGetter>,
        reverse: impl Into<FieldGetter>,
    ) -> Result<(FieldHandler, FieldHandler), RegistryError> {
        let forward_bit = self.registry.alloc_bit(self.group, forward_name)?;
        let reverse_bit = self.registry.alloc_bit(self.group, reverse_name)?;

        let forward = FieldDescriptor::new(self.group, forward_name, forward_bit, forward.into());
        let reverse = FieldDescriptor::new(self.group, reverse_name, reverse_bit, reverse.into());

        self.registry.biflow_forward.push(forward);
        self.registry.uniflow_forward.push(forward);
        self.registry.biflow_reverse.push(reverse);
        self.registry.uniflow_reverse.push(reverse);

        Ok((FieldHandler::new(forward_bit), FieldHandler::new(reverse_bit)))
    }

    /// Registers a pair that is directional when exporting biflows but
    /// flattened into a single direction for uniflow export.
    pub fn register_biflow_pair(
        &mut self,
        a_name: &'static str,
        b_name: &'static str,
        a: impl Into<FieldGetter>,
        b: impl Into<FieldGetter>,
    ) -> Result<(FieldHandler, FieldHandler), RegistryError> {
        let a_bit = self.registry.alloc_bit(self.group, a_name)?;
        let b_bit = self.registry.alloc_bit(self.group, b_name)?;

        let a = FieldDescriptor::new(self.group, a_name, a_bit, a.into());
        let b = FieldDescriptor::new(self.group, b_name, b_bit, b.into());

        self.registry.biflow_forward.push(a);
        self.registry.biflow_reverse.push(b);
        for view in [
            &mut self.registry.uniflow_forward,
            &mut self.registry.uniflow_reverse,
        ] {
            view.push(a);
            view.push(b);
        }

        Ok((FieldHandler::new(a_bit), FieldHandler::new(b_bit)))
    }
}
