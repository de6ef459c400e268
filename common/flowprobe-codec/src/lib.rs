// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bounds-checked byte buffers for wire serialization and parsing.
//!
//! `EncoderBuffer` writes network-byte-order values into a caller-owned
//! slice; `DecoderBuffer` consumes a slice and returns the parsed value
//! together with the remaining buffer, so parsers compose by chaining.

#![forbid(unsafe_code)]

mod decoder;
mod encoder;

pub use decoder::{DecoderBuffer, DecoderError, DecoderResult};
pub use encoder::EncoderBuffer;
