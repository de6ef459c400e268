// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Template construction and the per-(plugin set, IP family) template
//! cache.

use crate::{
    element::{ElementMap, IpfixElement},
    record,
};
use flowprobe_core::{field::ProtocolFieldMap, inet::IpFamily, time::Timestamp};
use std::collections::HashMap;

/// Set id reserved for template sets
pub const TEMPLATE_SET_ID: u16 = 2;
/// First id handed out to data templates
pub const FIRST_TEMPLATE_ID: u16 = 258;

/// Wire length value marking a variable-length field
const VARIABLE_LENGTH_MARKER: u16 = 0xffff;
/// Enterprise bit of the field id
const ENTERPRISE_BIT: u16 = 0x8000;

/// One cached template
#[derive(Clone, Debug)]
pub struct Template {
    pub id: u16,
    /// The serialized template record (id, field count, field specs)
    pub wire: Vec<u8>,
    /// Protocol indices contributing fields, ascending
    pub protocols: Vec<usize>,
    /// Sum of the fixed-length field sizes of one data record
    pub static_size: usize,
    pub field_count: u16,
    /// When this template was last written towards the collector;
    /// `None` after (re)connection until it is sent again
    pub last_sent: Option<Timestamp>,
    /// Value of the exporter's record counter at the last send
    pub sent_at_record: u64,
}

struct TemplateBuilder {
    wire: Vec<u8>,
    protocols: Vec<usize>,
    static_size: usize,
    field_count: u16,
}

impl TemplateBuilder {
    fn new(id: u16) -> Self {
        let mut wire = Vec::with_capacity(64);
        wire.extend_from_slice(&id.to_be_bytes());
        // field count is patched in finish()
        wire.extend_from_slice(&[0, 0]);
        Self {
            wire,
            protocols: Vec::new(),
            static_size: 0,
            field_count: 0,
        }
    }

    fn add_field(&mut self, element: &IpfixElement) {
        let length = match element.length {
            Some(length) => {
                self.static_size += length as usize;
                length
            }
            None => VARIABLE_LENGTH_MARKER,
        };

        let field_id = if element.pen != 0 {
            ENTERPRISE_BIT | element.id
        } else {
            element.id
        };
        self.wire.extend_from_slice(&field_id.to_be_bytes());
        self.wire.extend_from_slice(&length.to_be_bytes());
        if element.pen != 0 {
            self.wire.extend_from_slice(&element.pen.to_be_bytes());
        }
        self.field_count += 1;
    }

    fn add_protocol(&mut self, protocol: usize, elements: &[&IpfixElement]) {
        self.protocols.push(protocol);
        for element in elements {
            self.add_field(element);
        }
    }

    fn finish(mut self, id: u16) -> Template {
        self.wire[2..4].copy_from_slice(&self.field_count.to_be_bytes());
        Template {
            id,
            wire: self.wire,
            protocols: self.protocols,
            static_size: self.static_size,
            field_count: self.field_count,
            last_sent: None,
            sent_at_record: 0,
        }
    }
}

/// Templates keyed by (protocol bitmask, IP family), built lazily on
/// first use
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: HashMap<(u32, IpFamily), Template>,
    next_id: u16,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            next_id: FIRST_TEMPLATE_ID,
        }
    }

    /// Looks up the template of one record shape, building it on first
    /// sight.
    ///
    /// Missing elements were ruled out at startup, so construction
    /// cannot fail here; family-specific address fields are included
    /// for `family` only.
    pub fn get_or_build(
        &mut self,
        mask: u32,
        family: IpFamily,
        fields: &ProtocolFieldMap,
        elements: &ElementMap,
    ) -> &mut Template {
        let next_id = &mut self.next_id;
        self.templates.entry((mask, family)).or_insert_with(|| {
            let id = *next_id;
            *next_id = next_id.checked_add(1).expect("template id space exhausted");

            let mut builder = TemplateBuilder::new(id);
            for (protocol, descriptors) in fields.iter() {
                if mask & (1 << protocol) == 0 {
                    continue;
                }
                let selected: Vec<&IpfixElement> = descriptors
                    .iter()
                    .filter(|descriptor| record::field_matches_family(descriptor, family))
                    .map(|descriptor| {
                        elements
                            .get(descriptor.group(), descriptor.name())
                            .expect("elements validated at startup")
                    })
                    .collect();
                builder.add_protocol(protocol, &selected);
            }
            builder.finish(id)
        })
    }

    pub fn get(&self, mask: u32, family: IpFamily) -> Option<&Template> {
        self.templates.get(&(mask, family))
    }

    pub fn get_mut(&mut self, mask: u32, family: IpFamily) -> Option<&mut Template> {
        self.templates.get_mut(&(mask, family))
    }

    /// Marks every cached template as unsent; done after any
    /// reconnection.
    pub fn mark_all_unsent(&mut self) {
        for template in self.templates.values_mut() {
            template.last_sent = None;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Template> {
        self.templates.values_mut()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementMap;
    use flowprobe_core::field::{FieldRegistry, ProtocolFieldMap, ScalarGetter};

    fn setup() -> (ProtocolFieldMap, ElementMap) {
        let mut registry = FieldRegistry::new();
        let mut group = registry.group("basic");
        group
            .register_scalar("src_port", ScalarGetter::U16(|s| s.flow.key.src_port))
            .unwrap();
        group
            .register_scalar(
                "src_ip4",
                ScalarGetter::Ipv4(|s| s.flow.key.src_ip.as_v4().unwrap_or_default()),
            )
            .unwrap();
        group
            .register_scalar(
                "src_ip6",
                ScalarGetter::Ipv6(|s| s.flow.key.src_ip.as_v6().unwrap_or_default()),
            )
            .unwrap();
        registry
            .group("quic")
            .register_scalar("server_name", ScalarGetter::Str(|_| ""))
            .unwrap();

        let map = ProtocolFieldMap::new(registry.biflow_forward(), &["basic", "quic"]);
        let elements = ElementMap::from_yaml_str(
            r#"
basic:
  - { name: src_port, pen: 0, id: 7, length: 2 }
  - { name: src_ip4, pen: 0, id: 8, length: 4 }
  - { name: src_ip6, pen: 0, id: 27, length: 16 }
quic:
  - { name: server_name, pen: 8057, id: 895, length: -1 }
"#,
        )
        .unwrap();
        (map, elements)
    }

    #[test]
    fn template_wire_format_is_big_endian() {
        let (map, elements) = setup();
        let mut cache = TemplateCache::new();

        let template = cache.get_or_build(0b01, IpFamily::V4, &map, &elements);
        assert_eq!(template.id, FIRST_TEMPLATE_ID);
        // id, count=2, src_port (7, 2), src_ip4 (8, 4)
        assert_eq!(
            template.wire,
            [0x01, 0x02, 0x00, 0x02, 0x00, 0x07, 0x00, 0x02, 0x00, 0x08, 0x00, 0x04]
        );
        assert_eq!(template.static_size, 6);
    }

    #[test]
    fn enterprise_fields_carry_the_pen() {
        let (map, elements) = setup();
        let mut cache = TemplateCache::new();

        let template = cache.get_or_build(0b11, IpFamily::V4, &map, &elements);
        assert_eq!(template.field_count, 3);
        let tail = &template.wire[template.wire.len() - 8..];
        // 0x8000 | 895, variable length, pen 8057
        assert_eq!(tail, [0x83, 0x7f, 0xff, 0xff, 0x00, 0x00, 0x1f, 0x79]);
        // variable-length fields contribute nothing to the static size
        assert_eq!(template.static_size, 6);
    }

    #[test]
    fn families_and_masks_get_distinct_templates() {
        let (map, elements) = setup();
        let mut cache = TemplateCache::new();

        let v4 = cache.get_or_build(0b01, IpFamily::V4, &map, &elements).id;
        let v6 = cache.get_or_build(0b01, IpFamily::V6, &map, &elements).id;
        let both = cache.get_or_build(0b11, IpFamily::V4, &map, &elements).id;
        let again = cache.get_or_build(0b01, IpFamily::V4, &map, &elements).id;

        assert_eq!(v4, again);
        assert_eq!(cache.len(), 3);
        assert!(v6 != v4 && both != v4 && both != v6);
    }

    #[test]
    fn reconnection_marks_templates_unsent() {
        let (map, elements) = setup();
        let mut cache = TemplateCache::new();
        {
            let template = cache.get_or_build(0b01, IpFamily::V4, &map, &elements);
            template.last_sent = Some(Timestamp::from_unix(1, 0));
        }
        cache.mark_all_unsent();
        assert!(cache.iter().all(|template| template.last_sent.is_none()));
    }
}
