//! Provider response parsing
//!
//! Providers answer in a handful of shapes. Each strategy is total: it
//! returns `None` instead of failing, and the first strategy that yields a
//! record wins.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::models::{ProxyRecord, ProxyScheme};

type Strategy = fn(&str) -> Option<ProxyRecord>;

/// Strategies in priority order
const STRATEGIES: &[(&str, Strategy)] = &[
    ("bare", parse_bare),
    ("json", parse_json),
    ("embedded", parse_embedded),
    ("line", parse_first_line),
];

/// Parse a provider body into a proxy candidate, defaulting to http
pub fn parse_provider_response(body: &str) -> Option<ProxyRecord> {
    parse_with_strategy(body).map(|(_, record)| record)
}

/// Like [`parse_provider_response`] but also reports which strategy matched
pub fn parse_with_strategy(body: &str) -> Option<(&'static str, ProxyRecord)> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    STRATEGIES
        .iter()
        .find_map(|(name, strategy)| strategy(body).map(|record| (*name, record)))
}

fn exact_pattern() -> &'static Regex {
    static EXACT: OnceLock<Regex> = OnceLock::new();
    EXACT.get_or_init(|| {
        Regex::new(r"^(\d+\.\d+\.\d+\.\d+):(\d+)$").expect("static proxy pattern is valid")
    })
}

fn embedded_pattern() -> &'static Regex {
    static EMBEDDED: OnceLock<Regex> = OnceLock::new();
    EMBEDDED.get_or_init(|| {
        Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})\b")
            .expect("static proxy pattern is valid")
    })
}

fn build(host: &str, port: &str) -> Option<ProxyRecord> {
    let host: Ipv4Addr = host.parse().ok()?;
    let port = parse_port(port)?;
    Some(ProxyRecord::new(host.to_string(), port))
}

fn parse_port(raw: &str) -> Option<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Entire body is `ip:port`
fn parse_bare(body: &str) -> Option<ProxyRecord> {
    let caps = exact_pattern().captures(body)?;
    build(&caps[1], &caps[2])
}

/// JSON object carrying host and port under one of the common field names
fn parse_json(body: &str) -> Option<ProxyRecord> {
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    let host = ["ip", "proxy_ip", "host"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|h| !h.is_empty())?;

    let port = ["port", "proxy_port"].iter().find_map(|k| match obj.get(*k) {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => parse_port(s),
        _ => None,
    })?;
    if port == 0 {
        return None;
    }

    let mut record = ProxyRecord::new(host, port);

    if let Some(scheme) = ["type", "protocol"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .and_then(ProxyScheme::from_str)
    {
        record = record.with_scheme(scheme);
    }

    let field = |k: &str| {
        obj.get(k)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };
    let (username, password) = (field("username"), field("password"));
    if !username.is_empty() {
        record = record.with_credentials(username, password);
    }

    Some(record)
}

/// `ip:port` somewhere inside free text
fn parse_embedded(body: &str) -> Option<ProxyRecord> {
    embedded_pattern()
        .captures_iter(body)
        .find_map(|caps| build(&caps[1], &caps[2]))
}

/// First line that is exactly `ip:port`
fn parse_first_line(body: &str) -> Option<ProxyRecord> {
    body.lines().map(str::trim).find_map(parse_bare)
}
