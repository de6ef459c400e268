// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The YAML element map: `(group, field_name)` to IPFIX information
//! element, loaded once at startup.
//!
//! ```yaml
//! basic:
//!   - { name: src_port, pen: 0, id: 7, length: 2 }
//!   - { name: payload, pen: 8057, id: 900, length: -1 }
//! ```

use core::fmt;
use serde::Deserialize;
use std::collections::HashMap;

/// `length: -1` marks a variable-length element
const VARIABLE_LENGTH: i64 = -1;

/// One IPFIX information element assignment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpfixElement {
    pub pen: u32,
    pub id: u16,
    /// Fixed wire length in bytes; `None` for variable-length
    pub length: Option<u16>,
}

/// Element-map loading failed; fatal configuration error.
#[derive(Debug)]
pub enum ElementMapError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    InvalidLength {
        group: String,
        name: String,
        length: i64,
    },
    DuplicateElement {
        group: String,
        name: String,
    },
    MissingElement {
        group: String,
        name: String,
    },
}

impl fmt::Display for ElementMapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "element map unreadable: {error}"),
            Self::Yaml(error) => write!(f, "element map invalid: {error}"),
            Self::InvalidLength { group, name, length } => {
                write!(f, "element {group}.{name} has invalid length {length}")
            }
            Self::DuplicateElement { group, name } => {
                write!(f, "element {group}.{name} defined more than once")
            }
            Self::MissingElement { group, name } => {
                write!(f, "no element defined for registered field {group}.{name}")
            }
        }
    }
}

impl std::error::Error for ElementMapError {}

impl From<std::io::Error> for ElementMapError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_yaml::Error> for ElementMapError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Yaml(error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawElement {
    name: String,
    pen: u32,
    id: u16,
    length: i64,
}

/// The parsed element configuration
#[derive(Clone, Debug, Default)]
pub struct ElementMap {
    groups: HashMap<String, HashMap<String, IpfixElement>>,
}

impl ElementMap {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ElementMapError> {
        let raw: HashMap<String, Vec<RawElement>> = serde_yaml::from_str(yaml)?;

        let mut groups = HashMap::with_capacity(raw.len());
        for (group, elements) in raw {
            let mut parsed: HashMap<String, IpfixElement> =
                HashMap::with_capacity(elements.len());
            for element in elements {
                let length = match element.length {
                    VARIABLE_LENGTH => None,
                    length @ 1..=0xfffe => Some(length as u16),
                    length => {
                        return Err(ElementMapError::InvalidLength {
                            group,
                            name: element.name,
                            length,
                        })
                    }
                };
                let entry = IpfixElement {
                    pen: element.pen,
                    id: element.id,
                    length,
                };
                if parsed.insert(element.name.clone(), entry).is_some() {
                    return Err(ElementMapError::DuplicateElement {
                        group,
                        name: element.name,
                    });
                }
            }
            groups.insert(group, parsed);
        }

        Ok(Self { groups })
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ElementMapError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn get(&self, group: &str, name: &str) -> Option<&IpfixElement> {
        self.groups.get(group)?.get(name)
    }

    pub fn contains(&self, group: &str, name: &str) -> bool {
        self.get(group, name).is_some()
    }

    /// Checks that every registered field has an element assignment.
    pub fn require<'a>(
        &self,
        fields: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), ElementMapError> {
        for (group, name) in fields {
            if !self.contains(group, name) {
                return Err(ElementMapError::MissingElement {
                    group: group.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}
