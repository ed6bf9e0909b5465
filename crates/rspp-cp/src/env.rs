//! Environment-variable configuration surface.
//!
//! The runtime wires the distribution client from `RSPP_CP_*` variables.
//! Any parse failure is an `invalid_config` error carrying the variable
//! name as the path; values that are zero or negative fall back to the
//! built-in defaults rather than erroring.

use crate::backend::FallbackMode;
use crate::error::CpError;
use crate::http::HttpProviderConfig;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const ENV_PATH: &str = "RSPP_CP_DISTRIBUTION_PATH";
pub const ENV_HTTP_URL: &str = "RSPP_CP_DISTRIBUTION_HTTP_URL";
pub const ENV_HTTP_URLS: &str = "RSPP_CP_DISTRIBUTION_HTTP_URLS";
pub const ENV_HTTP_TIMEOUT_MS: &str = "RSPP_CP_DISTRIBUTION_HTTP_TIMEOUT_MS";
pub const ENV_HTTP_BEARER_TOKEN: &str = "RSPP_CP_DISTRIBUTION_HTTP_AUTH_BEARER_TOKEN";
pub const ENV_HTTP_CLIENT_ID: &str = "RSPP_CP_DISTRIBUTION_HTTP_CLIENT_ID";
pub const ENV_HTTP_RETRY_MAX_ATTEMPTS: &str = "RSPP_CP_DISTRIBUTION_HTTP_RETRY_MAX_ATTEMPTS";
pub const ENV_HTTP_RETRY_BACKOFF_MS: &str = "RSPP_CP_DISTRIBUTION_HTTP_RETRY_BACKOFF_MS";
pub const ENV_HTTP_RETRY_MAX_BACKOFF_MS: &str = "RSPP_CP_DISTRIBUTION_HTTP_RETRY_MAX_BACKOFF_MS";
pub const ENV_HTTP_CACHE_TTL_MS: &str = "RSPP_CP_DISTRIBUTION_HTTP_CACHE_TTL_MS";
pub const ENV_HTTP_MAX_STALENESS_MS: &str = "RSPP_CP_DISTRIBUTION_HTTP_MAX_STALENESS_MS";
pub const ENV_FALLBACK_MODE: &str = "RSPP_CP_BACKEND_FALLBACK_MODE";

/// Where the snapshot comes from.
#[derive(Debug, Clone)]
pub enum DistributionSource {
    File(PathBuf),
    Http(HttpProviderConfig),
    /// No distribution variables set at all.
    Unset,
}

/// The full env-driven distribution configuration.
#[derive(Debug, Clone)]
pub struct DistributionOptions {
    pub source: DistributionSource,
    pub fallback_mode: FallbackMode,
}

impl DistributionOptions {
    /// Read the `RSPP_CP_*` surface from the process environment.
    ///
    /// HTTP endpoints take precedence over a file path when both are set;
    /// the ordered CSV list takes precedence over the single-URL variable.
    pub fn from_env() -> Result<Self, CpError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading through a lookup
    /// closure so tests never touch process globals.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, CpError> {
        let fallback_mode = match get(ENV_FALLBACK_MODE).as_deref() {
            None | Some("") => FallbackMode::Availability,
            Some("availability") => FallbackMode::Availability,
            Some("strict") => FallbackMode::Strict,
            Some(other) => {
                return Err(CpError::invalid_config(
                    ENV_FALLBACK_MODE,
                    format!("unknown fallback mode {other:?}"),
                ));
            }
        };

        let urls = http_urls(&get)?;
        let source = if !urls.is_empty() {
            let mut config = HttpProviderConfig::new(urls);
            if let Some(timeout) = positive_ms(&get, ENV_HTTP_TIMEOUT_MS)? {
                config.timeout = timeout;
            }
            if let Some(attempts) = positive_count(&get, ENV_HTTP_RETRY_MAX_ATTEMPTS)? {
                config.max_attempts = attempts;
            }
            if let Some(backoff) = positive_ms(&get, ENV_HTTP_RETRY_BACKOFF_MS)? {
                config.base_backoff = backoff;
            }
            if let Some(max_backoff) = positive_ms(&get, ENV_HTTP_RETRY_MAX_BACKOFF_MS)? {
                config.max_backoff = max_backoff;
            }
            if let Some(ttl) = positive_ms(&get, ENV_HTTP_CACHE_TTL_MS)? {
                config.cache_ttl = ttl;
            }
            if let Some(staleness) = positive_ms(&get, ENV_HTTP_MAX_STALENESS_MS)? {
                config.max_staleness = staleness;
            }
            config.bearer_token = get(ENV_HTTP_BEARER_TOKEN).filter(|t| !t.is_empty());
            config.client_id = get(ENV_HTTP_CLIENT_ID).filter(|c| !c.is_empty());
            DistributionSource::Http(config)
        } else if let Some(path) = get(ENV_PATH).filter(|p| !p.is_empty()) {
            DistributionSource::File(PathBuf::from(path))
        } else {
            DistributionSource::Unset
        };

        Ok(Self {
            source,
            fallback_mode,
        })
    }
}

fn http_urls(get: &impl Fn(&str) -> Option<String>) -> Result<Vec<Url>, CpError> {
    if let Some(csv) = get(ENV_HTTP_URLS).filter(|v| !v.is_empty()) {
        let mut urls = Vec::new();
        for piece in csv.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            urls.push(parse_url(ENV_HTTP_URLS, piece)?);
        }
        if urls.is_empty() {
            return Err(CpError::invalid_config(
                ENV_HTTP_URLS,
                "endpoint list is empty",
            ));
        }
        return Ok(urls);
    }
    if let Some(single) = get(ENV_HTTP_URL).filter(|v| !v.is_empty()) {
        return Ok(vec![parse_url(ENV_HTTP_URL, single.trim())?]);
    }
    Ok(Vec::new())
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, CpError> {
    Url::parse(raw)
        .map_err(|e| CpError::invalid_config(var, format!("bad url {raw:?}: {e}")))
}

/// Parse a millisecond knob; zero or negative means "use the default".
fn positive_ms(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, CpError> {
    match get(var).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => {
            let ms: i64 = raw
                .parse()
                .map_err(|e| CpError::invalid_config(var, format!("bad integer {raw:?}: {e}")))?;
            if ms <= 0 {
                Ok(None)
            } else {
                Ok(Some(Duration::from_millis(ms as u64)))
            }
        }
    }
}

fn positive_count(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u32>, CpError> {
    match get(var).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => {
            let count: i64 = raw
                .parse()
                .map_err(|e| CpError::invalid_config(var, format!("bad integer {raw:?}: {e}")))?;
            if count <= 0 {
                Ok(None)
            } else {
                Ok(Some(count.min(i64::from(u32::MAX)) as u32))
            }
        }
    }
}
