//! Process configuration.
//!
//! Every option can be given as a flag or through the environment. The
//! `DD_*` variables keep the names the tracing libraries use so a test
//! harness can drive this weblog like any other.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;

use crate::apm::TracerConfig;
use crate::apm::propagation::{PropagationStyle, parse_styles};
use crate::router::RouterKind;

#[derive(Clone, Debug, Parser)]
#[command(name = "weblog", version, about = "HTTP test application for APM tracing and appsec")]
pub struct Config {
    /// Port to listen on (all interfaces).
    #[arg(long, env = "WEBLOG_PORT", default_value_t = 7777)]
    pub port: u16,

    /// Routing flavour the routes are mounted on.
    #[arg(long, env = "WEBLOG_ROUTER", value_enum, default_value_t = RouterKind::Radix)]
    pub router: RouterKind,

    #[arg(long, env = "WEBLOG_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Where finished traces go: `-` for stdout, else a file appended to.
    #[arg(long, env = "WEBLOG_TRACE_OUTPUT", default_value = "-")]
    pub trace_output: TraceOutput,

    /// Period of the background trace flush.
    #[arg(long, env = "WEBLOG_FLUSH_INTERVAL_MS", default_value_t = 1000)]
    pub flush_interval_ms: u64,

    #[arg(long, env = "DD_SERVICE", default_value = "weblog")]
    pub service: String,

    #[arg(long, env = "DD_ENV")]
    pub env: Option<String>,

    #[arg(id = "service_version", long = "service-version", value_name = "VERSION", env = "DD_VERSION")]
    pub version: Option<String>,

    #[arg(
        long,
        env = "DD_TRACE_ENABLED",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::Set
    )]
    pub trace_enabled: bool,

    #[arg(
        long,
        env = "DD_APPSEC_ENABLED",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::Set
    )]
    pub appsec_enabled: bool,

    /// Fraction of new traces kept; clamped to `0.0..=1.0`.
    #[arg(long, env = "DD_TRACE_SAMPLE_RATE", default_value_t = 1.0)]
    pub sample_rate: f64,

    /// Comma-separated, tried in order on extraction.
    #[arg(long, env = "DD_TRACE_PROPAGATION_STYLE", default_value = "datadog,tracecontext")]
    pub propagation_style: PropagationStyles,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn tracer_config(&self) -> TracerConfig {
        let sample_rate = if self.sample_rate.is_nan() { 1.0 } else { self.sample_rate.clamp(0.0, 1.0) };
        TracerConfig {
            service: self.service.clone(),
            env: self.env.clone(),
            version: self.version.clone(),
            enabled: self.trace_enabled,
            appsec_enabled: self.appsec_enabled,
            sample_rate,
            propagation_styles: self.propagation_style.0.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Destination of exported traces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TraceOutput {
    Stdout,
    File(PathBuf),
}

impl FromStr for TraceOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("trace output must not be empty".to_owned()),
            "-" => Ok(Self::Stdout),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for TraceOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("-"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Parsed `DD_TRACE_PROPAGATION_STYLE` value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PropagationStyles(pub Vec<PropagationStyle>);

impl FromStr for PropagationStyles {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_styles(s).map(Self)
    }
}
