// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The IPFIX exporter's option string.
//!
//! `host=ADDR;port=PORT;mtu=N;udp|non-blocking-tcp;id=N;dir=N;`
//! `template=SECONDS;verbose;lz4-compression;lz4-buffer-size=N`

use crate::connection::TransportMode;
use core::{str::FromStr, time::Duration};
use flowprobe_core::options::{OptionArg, OptionsError, OptionsParser, ParsedOptions};

/// 1500 - (ethernet 14 + ip 20 + udp 8)
pub const DEFAULT_MTU: u16 = 1458;
pub const DEFAULT_PORT: u16 = 4739;
pub const DEFAULT_TEMPLATE_REFRESH: Duration = Duration::from_secs(600);

/// LZ4 stream settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lz4Options {
    /// Receiver history-ring size hint; floored to three MTUs
    pub buffer_size: u32,
}

/// Parsed exporter configuration
#[derive(Clone, Debug)]
pub struct ExporterOptions {
    pub host: String,
    pub port: u16,
    pub mtu: u16,
    pub mode: TransportMode,
    pub observation_domain: u32,
    pub dir_bit_field: u32,
    pub template_refresh: Duration,
    /// Additional UDP refresh trigger: resend after this many exported
    /// records
    pub template_refresh_records: Option<u64>,
    pub verbose: bool,
    pub lz4: Option<Lz4Options>,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            mtu: DEFAULT_MTU,
            mode: TransportMode::TcpNonBlocking,
            observation_domain: 0,
            dir_bit_field: 0,
            template_refresh: DEFAULT_TEMPLATE_REFRESH,
            template_refresh_records: None,
            verbose: false,
            lz4: None,
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Exporter configuration failed; fatal at startup.
#[derive(Debug)]
pub enum OptionsParseError {
    Grammar(OptionsError),
    InvalidValue {
        option: &'static str,
        value: String,
    },
    Conflicting(&'static str),
}

impl core::fmt::Display for OptionsParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Grammar(error) => error.fmt(f),
            Self::InvalidValue { option, value } => {
                write!(f, "invalid value '{value}' for option '{option}'")
            }
            Self::Conflicting(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for OptionsParseError {}

impl From<OptionsError> for OptionsParseError {
    fn from(error: OptionsError) -> Self {
        Self::Grammar(error)
    }
}

fn parser() -> OptionsParser {
    let mut parser = OptionsParser::new("ipfix", "Output plugin for ipfix export");
    parser
        .register("h", "host", "ADDR", "Remote collector address", OptionArg::Required)
        .register("p", "port", "PORT", "Remote collector port", OptionArg::Required)
        .register(
            "m",
            "mtu",
            "SIZE",
            "Maximum size of ipfix packet payload sent",
            OptionArg::Required,
        )
        .register("u", "udp", "", "Use UDP protocol", OptionArg::NoArgument)
        .register(
            "n",
            "non-blocking-tcp",
            "",
            "Use non-blocking socket for TCP protocol",
            OptionArg::NoArgument,
        )
        .register("I", "id", "NUM", "Exporter identification", OptionArg::Required)
        .register("d", "dir", "NUM", "Dir bit field value", OptionArg::Required)
        .register(
            "t",
            "template",
            "NUM",
            "Template refresh rate (sec)",
            OptionArg::Required,
        )
        .register("v", "verbose", "", "Enable verbose mode", OptionArg::NoArgument)
        .register(
            "c",
            "lz4-compression",
            "",
            "Enable lz4 compression",
            OptionArg::NoArgument,
        )
        .register(
            "s",
            "lz4-buffer-size",
            "SIZE",
            "Lz4 compression buffer size (default (minimum): mtu*3)",
            OptionArg::Required,
        );
    parser
}

fn numeric<T: FromStr>(
    parsed: &ParsedOptions,
    option: &'static str,
) -> Result<Option<T>, OptionsParseError> {
    match parsed.value_of(option) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| OptionsParseError::InvalidValue {
                option,
                value: value.to_string(),
            }),
    }
}

impl ExporterOptions {
    /// The exporter's option usage text
    pub fn usage() -> String {
        parser().usage()
    }

    pub fn parse(params: &str) -> Result<Self, OptionsParseError> {
        let parsed = parser().parse(params)?;
        let mut options = Self::default();

        if let Some(host) = parsed.value_of("host") {
            options.host = host.to_string();
        }
        if let Some(port) = numeric(&parsed, "port")? {
            options.port = port;
        }
        if let Some(mtu) = numeric::<u16>(&parsed, "mtu")? {
            if (mtu as usize) <= crate::message::MESSAGE_HEADER_SIZE + crate::message::SET_HEADER_SIZE {
                return Err(OptionsParseError::InvalidValue {
                    option: "mtu",
                    value: mtu.to_string(),
                });
            }
            options.mtu = mtu;
        }
        if let Some(id) = numeric(&parsed, "id")? {
            options.observation_domain = id;
        }
        if let Some(dir) = numeric(&parsed, "dir")? {
            options.dir_bit_field = dir;
        }
        if let Some(seconds) = numeric(&parsed, "template")? {
            options.template_refresh = Duration::from_secs(seconds);
        }
        options.verbose = parsed.is_set("verbose");

        match (parsed.is_set("udp"), parsed.is_set("non-blocking-tcp")) {
            (true, true) => {
                return Err(OptionsParseError::Conflicting(
                    "udp and non-blocking-tcp are mutually exclusive",
                ))
            }
            (true, false) => options.mode = TransportMode::Udp,
            _ => options.mode = TransportMode::TcpNonBlocking,
        }

        if parsed.is_set("lz4-compression") {
            if options.mode == TransportMode::Udp {
                return Err(OptionsParseError::Conflicting(
                    "lz4 compression is not supported in udp mode",
                ));
            }
            let minimum = options.mtu as u32 * 3;
            let buffer_size = numeric::<u32>(&parsed, "lz4-buffer-size")?
                .unwrap_or(minimum)
                .max(minimum);
            options.lz4 = Some(Lz4Options { buffer_size });
        } else if parsed.is_set("lz4-buffer-size") {
            return Err(OptionsParseError::Conflicting(
                "lz4-buffer-size requires lz4-compression",
            ));
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_plugin_contract() {
        let options = ExporterOptions::parse("").unwrap();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.mtu, DEFAULT_MTU);
        assert_eq!(options.mode, TransportMode::TcpNonBlocking);
        assert_eq!(options.template_refresh, DEFAULT_TEMPLATE_REFRESH);
        assert!(options.lz4.is_none());
    }

    #[test]
    fn full_option_string() {
        let options = ExporterOptions::parse(
            "host=collector.example;port=9995;mtu=1400;id=42;dir=3;template=60;verbose;lz4-compression;lz4-buffer-size=16384",
        )
        .unwrap();
        assert_eq!(options.host, "collector.example");
        assert_eq!(options.port, 9995);
        assert_eq!(options.mtu, 1400);
        assert_eq!(options.observation_domain, 42);
        assert_eq!(options.dir_bit_field, 3);
        assert_eq!(options.template_refresh, Duration::from_secs(60));
        assert!(options.verbose);
        assert_eq!(options.lz4, Some(Lz4Options { buffer_size: 16384 }));
    }

    #[test]
    fn udp_with_lz4_is_rejected() {
        assert!(matches!(
            ExporterOptions::parse("udp;lz4-compression").unwrap_err(),
            OptionsParseError::Conflicting(_)
        ));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(matches!(
            ExporterOptions::parse("port=notanumber").unwrap_err(),
            OptionsParseError::InvalidValue { option: "port", .. }
        ));
        assert!(matches!(
            ExporterOptions::parse("mtu=4").unwrap_err(),
            OptionsParseError::InvalidValue { option: "mtu", .. }
        ));
    }

    #[test]
    fn lz4_buffer_size_is_floored_to_three_mtus() {
        let options = ExporterOptions::parse("lz4-compression;lz4-buffer-size=10").unwrap();
        assert_eq!(
            options.lz4.unwrap().buffer_size,
            DEFAULT_MTU as u32 * 3
        );
    }
}
