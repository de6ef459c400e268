// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    plugin::{ContextLayout, Overrides, ProcessPlugin},
    MAX_PLUGIN_COUNT,
};
use core::fmt;

/// Plugin registration failed; fatal at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PluginError {
    DuplicateName(&'static str),
    TooManyPlugins,
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "plugin {name} is already registered"),
            Self::TooManyPlugins => write!(f, "plugin count exceeds {MAX_PLUGIN_COUNT}"),
        }
    }
}

impl std::error::Error for PluginError {}

/// One registered plugin with its cached dispatch metadata
pub struct PluginEntry {
    pub name: &'static str,
    pub plugin: Box<dyn ProcessPlugin>,
    pub layout: ContextLayout,
    pub overrides: Overrides,
}

/// The fixed, ordered collection of process plugins chosen at startup
///
/// Plugin indices into this collection double as bit positions in the
/// per-flow plugin bitsets and as protocol indices in the exporter.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under a unique name; order of registration is
    /// dispatch order.
    pub fn register(
        &mut self,
        name: &'static str,
        plugin: Box<dyn ProcessPlugin>,
    ) -> Result<usize, PluginError> {
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(PluginError::DuplicateName(name));
        }
        if self.entries.len() >= MAX_PLUGIN_COUNT {
            return Err(PluginError::TooManyPlugins);
        }

        let layout = plugin.context_layout();
        let overrides = plugin.overrides();
        let index = self.entries.len();
        self.entries.push(PluginEntry {
            name,
            plugin,
            layout,
            overrides,
        });
        Ok(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    /// Plugin names in registration (= protocol) order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    /// Context layouts for the flow-record layout builder
    pub fn context_layouts(&self) -> Vec<Option<ContextLayout>> {
        self.entries
            .iter()
            .map(|entry| Some(entry.layout))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{HookContext, InitResult};

    struct Noop;

    impl ProcessPlugin for Noop {
        fn context_layout(&self) -> ContextLayout {
            ContextLayout { size: 0, alignment: 1 }
        }

        fn overrides(&self) -> Overrides {
            Overrides::default()
        }

        fn on_init(
            &self,
            _hook: &HookContext,
            _flow: &mut crate::flow::FlowHeader,
            _data: &mut [u8],
        ) -> InitResult {
            InitResult::Irrelevant
        }

        fn on_destroy(&self, _data: &mut [u8]) {}
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = PluginRegistry::new();
        assert_eq!(registry.register("noop", Box::new(Noop)).unwrap(), 0);
        assert_eq!(
            registry.register("noop", Box::new(Noop)).unwrap_err(),
            PluginError::DuplicateName("noop")
        );
        assert_eq!(registry.register("other", Box::new(Noop)).unwrap(), 1);
        assert_eq!(registry.index_of("other"), Some(1));
    }
}
