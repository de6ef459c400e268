// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The IPFIX output plugin: element configuration, template cache,
//! record serialization, message framing, optional LZ4 stream framing
//! and the collector transport.

mod basic_list;
mod compress;
mod connection;
mod element;
mod exporter;
mod message;
mod options;
mod record;
mod template;

pub use basic_list::{read_basic_list, write_basic_list};
pub use compress::{decode_stream, CompressError, Lz4Framer, LZ4_MAGIC};
pub use connection::{Connection, ConnectionConfig, SendOutcome, TransportMode};
pub use element::{ElementMap, ElementMapError, IpfixElement};
pub use exporter::{ConfigError, ExporterStats, IpfixExporter};
pub use message::{MessageBuffer, IPFIX_VERSION, MESSAGE_HEADER_SIZE, SET_HEADER_SIZE};
pub use options::{ExporterOptions, Lz4Options, OptionsParseError};
pub use template::{Template, TemplateCache, FIRST_TEMPLATE_ID, TEMPLATE_SET_ID};
