//! Trace context propagation over HTTP headers.
//!
//! Two header styles are supported:
//!
//! | Style | Headers |
//! |---|---|
//! | `datadog` | `x-datadog-trace-id`, `x-datadog-parent-id`, `x-datadog-sampling-priority`, `x-datadog-origin`, `x-datadog-tags` |
//! | `tracecontext` | `traceparent`, `tracestate` (W3C) |
//!
//! Extraction tries each configured style in order and keeps the first valid
//! context. Injection writes every configured style.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue};

use super::context::{PROPAGATING_TAG_PREFIX, SpanContext, TRACE_ID_HIGH_TAG, TraceId, priority};

pub const X_DATADOG_TRACE_ID: &str = "x-datadog-trace-id";
pub const X_DATADOG_PARENT_ID: &str = "x-datadog-parent-id";
pub const X_DATADOG_SAMPLING_PRIORITY: &str = "x-datadog-sampling-priority";
pub const X_DATADOG_ORIGIN: &str = "x-datadog-origin";
pub const X_DATADOG_TAGS: &str = "x-datadog-tags";
pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

/// `x-datadog-tags` longer than this are dropped on both extract and inject.
const MAX_TAGS_HEADER_LEN: usize = 512;

/// Extracts and injects a [`SpanContext`] through a header map.
pub trait Propagator: Send + Sync {
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext>;
    fn inject(&self, ctx: &SpanContext, headers: &mut HeaderMap);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropagationStyle {
    Datadog,
    TraceContext,
}

impl FromStr for PropagationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "datadog" => Ok(Self::Datadog),
            "tracecontext" => Ok(Self::TraceContext),
            other => Err(format!("unknown propagation style `{other}`")),
        }
    }
}

impl fmt::Display for PropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Datadog => "datadog",
            Self::TraceContext => "tracecontext",
        })
    }
}

/// Parses a comma-separated style list such as `datadog,tracecontext`.
pub fn parse_styles(list: &str) -> Result<Vec<PropagationStyle>, String> {
    let mut styles = Vec::new();
    for style in list.split(',').filter(|s| !s.trim().is_empty()) {
        let style = style.parse()?;
        if !styles.contains(&style) {
            styles.push(style);
        }
    }
    Ok(styles)
}

/// Runs the configured styles in order.
pub struct CompositePropagator {
    styles: Vec<PropagationStyle>,
}

impl CompositePropagator {
    pub fn new(styles: Vec<PropagationStyle>) -> Self {
        Self { styles }
    }

    fn propagator(style: PropagationStyle) -> &'static dyn Propagator {
        match style {
            PropagationStyle::Datadog => &DatadogPropagator,
            PropagationStyle::TraceContext => &TraceContextPropagator,
        }
    }
}

impl Propagator for CompositePropagator {
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        self.styles
            .iter()
            .find_map(|style| Self::propagator(*style).extract(headers))
    }

    fn inject(&self, ctx: &SpanContext, headers: &mut HeaderMap) {
        for style in &self.styles {
            Self::propagator(*style).inject(ctx, headers);
        }
    }
}

// ── Datadog headers ───────────────────────────────────────────────────────────

pub struct DatadogPropagator;

impl Propagator for DatadogPropagator {
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        let low: u64 = header(headers, X_DATADOG_TRACE_ID)?.trim().parse().ok()?;
        let span_id: u64 = header(headers, X_DATADOG_PARENT_ID)?.trim().parse().ok()?;
        let sampling_priority = header(headers, X_DATADOG_SAMPLING_PRIORITY)
            .and_then(|p| p.trim().parse().ok());
        let origin = header(headers, X_DATADOG_ORIGIN).map(str::to_owned);
        let propagating_tags = header(headers, X_DATADOG_TAGS)
            .map(decode_tags_header)
            .unwrap_or_default();

        let high = propagating_tags
            .get(TRACE_ID_HIGH_TAG)
            .and_then(|tid| u64::from_str_radix(tid, 16).ok())
            .unwrap_or(0);

        let ctx = SpanContext {
            trace_id: TraceId::from_parts(high, low),
            span_id,
            sampling_priority,
            origin,
            propagating_tags,
        };
        (low != 0 && ctx.is_valid()).then_some(ctx)
    }

    fn inject(&self, ctx: &SpanContext, headers: &mut HeaderMap) {
        set_header(headers, X_DATADOG_TRACE_ID, &ctx.trace_id.low().to_string());
        set_header(headers, X_DATADOG_PARENT_ID, &ctx.span_id.to_string());
        if let Some(p) = ctx.sampling_priority {
            set_header(headers, X_DATADOG_SAMPLING_PRIORITY, &p.to_string());
        }
        if let Some(origin) = &ctx.origin {
            set_header(headers, X_DATADOG_ORIGIN, origin);
        }
        let tags = encode_tags_header(&ctx.propagating_tags);
        if !tags.is_empty() && tags.len() <= MAX_TAGS_HEADER_LEN {
            set_header(headers, X_DATADOG_TAGS, &tags);
        }
    }
}

fn decode_tags_header(value: &str) -> BTreeMap<String, String> {
    if value.len() > MAX_TAGS_HEADER_LEN {
        return BTreeMap::new();
    }
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, v)| k.starts_with(PROPAGATING_TAG_PREFIX) && !v.is_empty())
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

fn encode_tags_header(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

// ── W3C trace context ─────────────────────────────────────────────────────────

pub struct TraceContextPropagator;

impl Propagator for TraceContextPropagator {
    fn extract(&self, headers: &HeaderMap) -> Option<SpanContext> {
        let (trace_id, span_id, sampled) = parse_traceparent(header(headers, TRACEPARENT)?)?;

        let mut ctx = SpanContext { trace_id, span_id, ..SpanContext::default() };
        let mut state_priority = None;
        if let Some(dd) = header(headers, TRACESTATE).and_then(dd_member) {
            for (key, value) in dd.split(';').filter_map(|kv| kv.split_once(':')) {
                match key {
                    "s" => state_priority = value.parse::<i32>().ok(),
                    "o" => ctx.origin = Some(value.replace('~', "=")),
                    _ => {
                        if let Some(tag) = key.strip_prefix("t.") {
                            ctx.propagating_tags.insert(
                                format!("{PROPAGATING_TAG_PREFIX}{tag}"),
                                value.replace('~', "="),
                            );
                        }
                    }
                }
            }
        }

        // The sampled flag wins when it disagrees with the tracestate priority.
        ctx.sampling_priority = Some(match (sampled, state_priority) {
            (true, Some(p)) if p > 0 => p,
            (true, _) => priority::AUTO_KEEP,
            (false, Some(p)) if p <= 0 => p,
            (false, _) => priority::AUTO_REJECT,
        });
        if trace_id.high() != 0 {
            ctx.propagating_tags
                .insert(TRACE_ID_HIGH_TAG.to_owned(), format!("{:016x}", trace_id.high()));
        }
        Some(ctx)
    }

    fn inject(&self, ctx: &SpanContext, headers: &mut HeaderMap) {
        let flags = u8::from(ctx.is_sampled());
        set_header(
            headers,
            TRACEPARENT,
            &format!("00-{}-{:016x}-{flags:02x}", ctx.trace_id, ctx.span_id),
        );

        let mut dd = Vec::new();
        if let Some(p) = ctx.sampling_priority {
            dd.push(format!("s:{p}"));
        }
        if let Some(origin) = &ctx.origin {
            dd.push(format!("o:{}", tracestate_value(origin)));
        }
        for (key, value) in &ctx.propagating_tags {
            if key == TRACE_ID_HIGH_TAG {
                continue;
            }
            if let Some(tag) = key.strip_prefix(PROPAGATING_TAG_PREFIX) {
                dd.push(format!("t.{tag}:{}", tracestate_value(value)));
            }
        }

        let mut members = vec![format!("dd={}", dd.join(";"))];
        if let Some(existing) = headers.get(TRACESTATE).and_then(|v| v.to_str().ok()) {
            members.extend(
                existing
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty() && !m.starts_with("dd="))
                    .map(str::to_owned),
            );
        }
        set_header(headers, TRACESTATE, &members.join(","));
    }
}

fn parse_traceparent(value: &str) -> Option<(TraceId, u64, bool)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let parent_id = parts.next()?;
    let flags = parts.next()?;

    if version.len() != 2 || version == "ff" || !is_lower_hex(version) {
        return None;
    }
    // Version 00 has exactly four fields; later versions may append more.
    if version == "00" && parts.next().is_some() {
        return None;
    }
    if trace_id.len() != 32 || parent_id.len() != 16 || flags.len() != 2 {
        return None;
    }
    if !is_lower_hex(trace_id) || !is_lower_hex(parent_id) || !is_lower_hex(flags) {
        return None;
    }

    let trace_id = TraceId::from_u128(u128::from_str_radix(trace_id, 16).ok()?);
    let span_id = u64::from_str_radix(parent_id, 16).ok()?;
    let flags = u8::from_str_radix(flags, 16).ok()?;
    if trace_id.is_zero() || span_id == 0 {
        return None;
    }
    Some((trace_id, span_id, flags & 0x01 == 0x01))
}

fn dd_member(tracestate: &str) -> Option<&str> {
    tracestate
        .split(',')
        .map(str::trim)
        .find_map(|member| member.strip_prefix("dd="))
}

fn tracestate_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '=' => '~',
            ',' | ';' | '~' => '_',
            c if (' '..='~').contains(&c) => c,
            _ => '_',
        })
        .collect()
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// ── Header helpers ────────────────────────────────────────────────────────────

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
