// src/runtime.rs
// Effective per-invocation parameters: base configuration merged with the
// scheduler's JSON payload. Precedence is payload over base for every
// recognized field, with two documented exceptions:
//   - invalid or unparseable values fall back to the base and log a warning
//     (clamping, never a hard error at this layer);
//   - `keywords` overrides are honored only when the base config sets
//     `allow_keyword_overrides`; otherwise they are logged and discarded.
// Unrecognized payload fields are ignored.

use serde_json::Value;

use crate::config::AppConfig;
use crate::filter::{parse_keywords, Keyword, MatchMode};
use crate::ingest::types::Source;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub keywords: Vec<Keyword>,
    pub match_mode: MatchMode,
    pub window_hours: u32,
    pub sources: Vec<Source>,
    pub dry_run: bool,
    pub force_send_summary: bool,
    pub recipients_override: Option<Vec<String>>,
}

impl RuntimeOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            keywords: config.keywords.clone(),
            match_mode: config.match_mode,
            window_hours: config.window_hours,
            sources: config.sources.clone(),
            dry_run: false,
            force_send_summary: false,
            recipients_override: None,
        }
    }
}

/// Merge the base configuration with an optional invocation payload.
pub fn derive(config: &AppConfig, payload: Option<&Value>) -> RuntimeOptions {
    let mut options = RuntimeOptions::from_config(config);
    let Some(Value::Object(map)) = payload else {
        return options;
    };

    if let Some(raw) = map.get("sources") {
        if let Some(sources) = parse_source_list(raw) {
            options.sources = sources;
        } else {
            tracing::warn!(stage = "runtime", field = "sources", "override ignored: unparseable or empty");
        }
    }

    if let Some(raw) = map.get("keywords") {
        if !config.allow_keyword_overrides {
            tracing::warn!(
                stage = "runtime",
                field = "keywords",
                "override ignored: ALLOW_KEYWORD_OVERRIDES is not set"
            );
        } else if let Some(keywords) = parse_keyword_list(raw) {
            options.keywords = keywords;
        } else {
            tracing::warn!(stage = "runtime", field = "keywords", "override ignored: unparseable or empty");
        }
    }

    if let Some(raw) = map.get("match_mode") {
        match raw.as_str().map(MatchMode::parse) {
            Some(Ok(mode)) => options.match_mode = mode,
            _ => tracing::warn!(stage = "runtime", field = "match_mode", "override ignored: invalid value"),
        }
    }

    if let Some(raw) = map.get("window_hours") {
        match parse_hours(raw) {
            Some(hours) => options.window_hours = hours,
            None => tracing::warn!(
                stage = "runtime",
                field = "window_hours",
                "override ignored: must be a positive integer"
            ),
        }
    }

    if let Some(raw) = map.get("dry_run") {
        options.dry_run = parse_bool(raw).unwrap_or(options.dry_run);
    }
    if let Some(raw) = map.get("force_send_summary") {
        options.force_send_summary = parse_bool(raw).unwrap_or(options.force_send_summary);
    }

    if let Some(raw) = map.get("recipients_override") {
        options.recipients_override = parse_string_list(raw).filter(|v| !v.is_empty());
        if options.recipients_override.is_none() {
            tracing::warn!(
                stage = "runtime",
                field = "recipients_override",
                "override ignored: unparseable or empty"
            );
        }
    }

    options
}

fn parse_source_list(raw: &Value) -> Option<Vec<Source>> {
    let parts = parse_string_list(raw)?;
    let mut out = Vec::new();
    for part in parts {
        let source = Source::parse(&part).ok()?;
        if !out.contains(&source) {
            out.push(source);
        }
    }
    (!out.is_empty()).then_some(out)
}

fn parse_keyword_list(raw: &Value) -> Option<Vec<Keyword>> {
    let keywords = match raw {
        Value::String(s) => parse_keywords(s),
        Value::Array(_) => {
            let parts = parse_string_list(raw)?;
            let mut out: Vec<Keyword> = Vec::new();
            for part in parts {
                if let Some(kw) = Keyword::new(&part) {
                    if !out.contains(&kw) {
                        out.push(kw);
                    }
                }
            }
            out
        }
        _ => return None,
    };
    (!keywords.is_empty()).then_some(keywords)
}

fn parse_string_list(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::String(s) => Some(
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        ),
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        _ => None,
    }
}

fn parse_hours(raw: &Value) -> Option<u32> {
    let value = match raw {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    u32::try_from(value).ok().filter(|h| *h > 0)
}

fn parse_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Some(true),
            "false" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}
