// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-plugin option grammar.
//!
//! Every plugin receives a single textual option string of
//! delimiter-separated items. Recognized shapes per item:
//! `name=value`, `name:value`, a bare `name` (no-argument option) and a
//! positional `value`. The delimiter defaults to `;` and is
//! configurable per plugin.

use core::fmt;
use std::fmt::Write;

/// Default item delimiter
pub const DEFAULT_DELIMITER: char = ';';

/// Argument requirements of one option
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionArg {
    Required,
    Optional,
    NoArgument,
}

#[derive(Clone, Debug)]
struct OptionSpec {
    short: &'static str,
    long: &'static str,
    hint: &'static str,
    description: &'static str,
    arg: OptionArg,
}

/// Option-string parsing failed; fatal configuration error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionsError {
    UnknownOption(String),
    DuplicateOption(String),
    MissingArgument(String),
    UnexpectedArgument(String),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownOption(name) => write!(f, "unknown option '{name}'"),
            Self::DuplicateOption(name) => write!(f, "option '{name}' given more than once"),
            Self::MissingArgument(name) => write!(f, "option '{name}' requires an argument"),
            Self::UnexpectedArgument(name) => {
                write!(f, "option '{name}' does not take an argument")
            }
        }
    }
}

impl std::error::Error for OptionsError {}

/// Values extracted from one option string
#[derive(Clone, Debug, Default)]
pub struct ParsedOptions {
    values: Vec<(&'static str, Option<String>)>,
    positional: Vec<String>,
}

impl ParsedOptions {
    /// Whether the option appeared at all
    pub fn is_set(&self, long: &str) -> bool {
        self.values.iter().any(|(name, _)| *name == long)
    }

    /// The argument of the option, if it appeared with one
    pub fn value_of(&self, long: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| *name == long)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Items that did not name an option
    pub fn positional(&self) -> &[String] {
        &self.positional
    }
}

/// A declarative parser for one plugin's option string
#[derive(Clone, Debug)]
pub struct OptionsParser {
    name: &'static str,
    info: &'static str,
    delimiter: char,
    options: Vec<OptionSpec>,
}

impl OptionsParser {
    pub fn new(name: &'static str, info: &'static str) -> Self {
        Self {
            name,
            info,
            delimiter: DEFAULT_DELIMITER,
            options: Vec::new(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Declares one option; `short` may be empty.
    pub fn register(
        &mut self,
        short: &'static str,
        long: &'static str,
        hint: &'static str,
        description: &'static str,
        arg: OptionArg,
    ) -> &mut Self {
        self.options.push(OptionSpec {
            short,
            long,
            hint,
            description,
            arg,
        });
        self
    }

    fn find(&self, name: &str) -> Option<&OptionSpec> {
        self.options
            .iter()
            .find(|spec| spec.long == name || (!spec.short.is_empty() && spec.short == name))
    }

    /// Parses one option string into values.
    pub fn parse(&self, input: &str) -> Result<ParsedOptions, OptionsError> {
        let mut parsed = ParsedOptions::default();

        for item in input.split(self.delimiter) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let split = item
                .char_indices()
                .find(|(_, char)| matches!(char, '=' | ':'))
                .map(|(index, _)| index);

            let (name, value) = match split {
                Some(index) => (&item[..index], Some(&item[index + 1..])),
                None => (item, None),
            };

            let Some(spec) = self.find(name) else {
                if split.is_some() {
                    return Err(OptionsError::UnknownOption(name.to_string()));
                }
                parsed.positional.push(item.to_string());
                continue;
            };

            if parsed.is_set(spec.long) {
                return Err(OptionsError::DuplicateOption(spec.long.to_string()));
            }

            match (spec.arg, value) {
                (OptionArg::Required, None) => {
                    return Err(OptionsError::MissingArgument(spec.long.to_string()));
                }
                (OptionArg::NoArgument, Some(_)) => {
                    return Err(OptionsError::UnexpectedArgument(spec.long.to_string()));
                }
                (_, value) => {
                    parsed
                        .values
                        .push((spec.long, value.map(|value| value.to_string())));
                }
            }
        }

        Ok(parsed)
    }

    /// One-line-per-option usage text
    pub fn usage(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} - {}", self.name, self.info);
        for spec in &self.options {
            let hint = if spec.hint.is_empty() {
                String::new()
            } else {
                format!("={}", spec.hint)
            };
            let _ = writeln!(out, "  {}{}  {}", spec.long, hint, spec.description);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> OptionsParser {
        let mut parser = OptionsParser::new("ipfix", "IPFIX exporter options");
        parser
            .register("h", "host", "ADDR", "collector address", OptionArg::Required)
            .register("p", "port", "PORT", "collector port", OptionArg::Required)
            .register("u", "udp", "", "use datagram transport", OptionArg::NoArgument)
            .register("v", "verbose", "", "log to stderr", OptionArg::NoArgument);
        parser
    }

    #[test]
    fn parses_all_item_shapes() {
        let parsed = parser()
            .parse("host=collector.example;port:4739;udp;trailing")
            .unwrap();
        assert_eq!(parsed.value_of("host"), Some("collector.example"));
        assert_eq!(parsed.value_of("port"), Some("4739"));
        assert!(parsed.is_set("udp"));
        assert!(!parsed.is_set("verbose"));
        assert_eq!(parsed.positional(), ["trailing".to_string()]);
    }

    #[test]
    fn short_names_resolve_to_long() {
        let parsed = parser().parse("h=10.0.0.1;u").unwrap();
        assert_eq!(parsed.value_of("host"), Some("10.0.0.1"));
        assert!(parsed.is_set("udp"));
    }

    #[test]
    fn values_may_contain_separator_characters() {
        let parsed = parser().parse("host=::1").unwrap();
        assert_eq!(parsed.value_of("host"), Some("::1"));

        let parsed = parser().parse("host:2001:db8::1").unwrap();
        assert_eq!(parsed.value_of("host"), Some("2001:db8::1"));
    }

    #[test]
    fn argument_rules_are_enforced() {
        assert_eq!(
            parser().parse("host").unwrap_err(),
            OptionsError::MissingArgument("host".to_string())
        );
        assert_eq!(
            parser().parse("udp=1").unwrap_err(),
            OptionsError::UnexpectedArgument("udp".to_string())
        );
        assert_eq!(
            parser().parse("udp;udp").unwrap_err(),
            OptionsError::DuplicateOption("udp".to_string())
        );
        assert_eq!(
            parser().parse("bogus=1").unwrap_err(),
            OptionsError::UnknownOption("bogus".to_string())
        );
    }

    #[test]
    fn custom_delimiter() {
        let parser = parser().with_delimiter(',');
        let parsed = parser.parse("host=a,udp").unwrap();
        assert_eq!(parsed.value_of("host"), Some("a"));
        assert!(parsed.is_set("udp"));
    }
}
