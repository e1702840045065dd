// src/config.rs
// Environment-resolved configuration, built once per invocation and passed by
// reference. Nothing here caches globally; the scheduler wrapper owns the
// lifetime. All validation happens up front, before any network call.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

use crate::filter::{parse_keywords, Keyword, MatchMode};
use crate::ingest::types::Source;

const ENV_KEYWORDS_PATH: &str = "KEYWORDS_PATH";

/// How the digest leaves the process.
#[derive(Debug, Clone)]
pub enum DeliveryMechanism {
    /// Managed HTTP send API (JSON POST, optional bearer token).
    SendApi { endpoint: String, token: Option<String> },
    /// Raw SMTP submission.
    Smtp { host: String, port: u16, user: String, pass: String },
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub sender: String,
    pub recipients: Vec<String>,
    pub reply_to: Vec<String>,
    pub subject_prefix: String,
    pub mechanism: DeliveryMechanism,
}

/// Credentials that influence external API access.
#[derive(Debug, Clone, Default)]
pub struct SourceCredentials {
    pub pubmed_api_key: Option<String>,
    /// Contact address advertised to polite APIs (Crossref `mailto`).
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub keywords: Vec<Keyword>,
    pub match_mode: MatchMode,
    pub window_hours: u32,
    pub sources: Vec<Source>,
    /// Whether a per-invocation payload may replace the keyword set.
    /// Off by default: the base keyword set is the product surface, and an
    /// override changing it must be an explicit operator decision.
    pub allow_keyword_overrides: bool,
    pub seen_store_path: PathBuf,
    pub per_source_timeout_secs: u64,
    /// Crossref venue list override; `None` uses the built-in journal set.
    pub crossref_venues: Option<Vec<String>>,
    pub delivery: DeliveryConfig,
    pub credentials: SourceCredentials,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let app_name = env_or("APP_NAME", "paper-watcher");

        let keywords = resolve_keywords()?;
        if keywords.is_empty() {
            bail!("keyword set is empty; set KEYWORDS or KEYWORDS_PATH");
        }

        let match_mode = MatchMode::parse(&env_or("MATCH_MODE", "OR"))?;

        let window_hours: u32 = env_or("WINDOW_HOURS", "24")
            .parse()
            .context("WINDOW_HOURS must be an integer")?;
        if window_hours == 0 {
            bail!("WINDOW_HOURS must be positive");
        }

        let sources = parse_sources(&env_or("SOURCES", "crossref,pubmed,rss"))?;
        if sources.is_empty() {
            bail!("at least one source must be configured");
        }

        let allow_keyword_overrides = env_bool("ALLOW_KEYWORD_OVERRIDES", false);
        let seen_store_path = PathBuf::from(env_or("SEEN_STORE_PATH", ".data/seen.json"));
        let per_source_timeout_secs: u64 = env_or("SOURCE_TIMEOUT_SECS", "60")
            .parse()
            .context("SOURCE_TIMEOUT_SECS must be an integer")?;

        let crossref_venues = std::env::var("CROSSREF_VENUES").ok().map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        });

        let delivery = delivery_from_env()?;
        let credentials = SourceCredentials {
            pubmed_api_key: non_empty(std::env::var("PUBMED_API_KEY").ok()),
            contact_email: non_empty(std::env::var("CONTACT_EMAIL").ok()),
        };

        Ok(Self {
            app_name,
            keywords,
            match_mode,
            window_hours,
            sources,
            allow_keyword_overrides,
            seen_store_path,
            per_source_timeout_secs,
            crossref_venues,
            delivery,
            credentials,
        })
    }

    /// Composed User-Agent for outbound requests, advertising the contact
    /// address when one is configured.
    pub fn user_agent(&self) -> String {
        match &self.credentials.contact_email {
            Some(email) => format!("{}/0.1 (mailto:{email})", self.app_name),
            None => format!("{}/0.1", self.app_name),
        }
    }
}

fn delivery_from_env() -> Result<DeliveryConfig> {
    let sender = std::env::var("MAIL_FROM").context("MAIL_FROM is required")?;
    let recipients = split_list(&std::env::var("MAIL_TO").context("MAIL_TO is required")?);
    if recipients.is_empty() {
        bail!("MAIL_TO must contain at least one recipient");
    }
    let reply_to = split_list(&std::env::var("MAIL_REPLY_TO").unwrap_or_default());
    let subject_prefix = env_or("MAIL_SUBJECT_PREFIX", "[paper-watcher]");

    let mechanism = if env_bool("USE_SMTP", false) {
        let host = std::env::var("SMTP_HOST").context("SMTP_HOST required when USE_SMTP=true")?;
        let user = std::env::var("SMTP_USER").context("SMTP_USER required when USE_SMTP=true")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS required when USE_SMTP=true")?;
        let port: u16 = env_or("SMTP_PORT", "587")
            .parse()
            .context("SMTP_PORT must be a port number")?;
        DeliveryMechanism::Smtp { host, port, user, pass }
    } else {
        let endpoint =
            std::env::var("SEND_API_URL").context("SEND_API_URL required unless USE_SMTP=true")?;
        DeliveryMechanism::SendApi {
            endpoint,
            token: non_empty(std::env::var("SEND_API_TOKEN").ok()),
        }
    };

    Ok(DeliveryConfig {
        sender,
        recipients,
        reply_to,
        subject_prefix,
        mechanism,
    })
}

/// `KEYWORDS` wins when set; otherwise `KEYWORDS_PATH` points at a keyword
/// file (TOML table with a `keywords` array, or a bare JSON array).
fn resolve_keywords() -> Result<Vec<Keyword>> {
    if let Ok(raw) = std::env::var("KEYWORDS") {
        if !raw.trim().is_empty() {
            return Ok(parse_keywords(&raw));
        }
    }
    if let Ok(path) = std::env::var(ENV_KEYWORDS_PATH) {
        return load_keywords_from(Path::new(&path));
    }
    Ok(Vec::new())
}

pub fn load_keywords_from(path: &Path) -> Result<Vec<Keyword>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading keywords from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let terms = parse_keyword_file(&content, &ext)?;
    Ok(terms
        .iter()
        .filter_map(|t| Keyword::new(t))
        .fold(Vec::new(), |mut acc, kw| {
            if !acc.contains(&kw) {
                acc.push(kw);
            }
            acc
        }))
}

fn parse_keyword_file(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("keywords");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = serde_json::from_str::<Vec<String>>(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported keyword file format"))
}

fn parse_toml(s: &str) -> Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct KeywordFile {
        keywords: Vec<String>,
    }
    let v: KeywordFile = toml::from_str(s)?;
    Ok(v.keywords)
}

fn parse_sources(raw: &str) -> Result<Vec<Source>> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let source = Source::parse(part)?;
        if !out.contains(&source) {
            out.push(source);
        }
    }
    Ok(out)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "y"),
        Err(_) => default,
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if !out.iter().any(|p| p.eq_ignore_ascii_case(part)) {
            out.push(part.to_string());
        }
    }
    out
}
