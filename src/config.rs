//! Minimal runtime configuration helpers.
//! Defaults target a backend running locally on port 8000.

use crate::fleet::view::AlertFilter;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/device";
pub const DEFAULT_REFRESH_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_REQUEST_RETRIES: u32 = 3;
pub const DEFAULT_CACHE_FILE: &str = "dispenser-snapshot.json";
pub const DEFAULT_TOP_N: usize = 10;
const TOKEN_FILE: &str = "token.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    /// Bearer token for the device API.
    pub api_token: String,
    /// Realtime polling cadence.
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    /// Attempts per request, including the first.
    pub max_request_retries: NonZeroU32,
    pub cache_enabled: bool,
    pub cache_file: PathBuf,
    /// Filter and search applied to the device list in each summary.
    pub dashboard_alert_filter: AlertFilter,
    pub dashboard_search: String,
    pub dashboard_top_n: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok(), Path::new(TOKEN_FILE))
    }

    /// Build from an arbitrary variable source. `token_file` is read when `API_TOKEN` is unset.
    pub fn from_lookup<F>(lookup: F, token_file: &Path) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_base_url = var("API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(format!("API_BASE_URL must start with http:// or https://, got {}", api_base_url));
        }

        // Prefer env var; fallback to token.txt in working directory
        let api_token = match var("API_TOKEN") {
            Some(v) => v,
            None => match fs::read_to_string(token_file) {
                Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => {
                    return Err(format!(
                        "Missing API token: set API_TOKEN or provide {} in working directory",
                        token_file.display()
                    ));
                }
            },
        };

        let refresh_secs = parse_positive(var("REFRESH_INTERVAL_SECS"), "REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_SECS)?;
        let timeout_secs = parse_positive(
            var("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let max_request_retries = match var("MAX_REQUEST_RETRIES") {
            Some(s) => s
                .parse::<u32>()
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or_else(|| "MAX_REQUEST_RETRIES must be a positive integer".to_string())?,
            None => NonZeroU32::new(DEFAULT_MAX_REQUEST_RETRIES).ok_or("invalid default retry count")?,
        };

        let cache_enabled = match var("CACHE_ENABLED") {
            Some(s) => parse_bool(&s).ok_or_else(|| format!("CACHE_ENABLED must be true or false, got {}", s))?,
            None => true,
        };
        let cache_file = PathBuf::from(var("CACHE_FILE").unwrap_or_else(|| DEFAULT_CACHE_FILE.to_string()));

        let dashboard_top_n = match var("DASHBOARD_TOP_N") {
            Some(s) => s
                .parse::<usize>()
                .map_err(|_| "DASHBOARD_TOP_N must be a non-negative integer".to_string())?,
            None => DEFAULT_TOP_N,
        };

        Ok(Config {
            api_base_url,
            api_token,
            refresh_interval: Duration::from_secs(refresh_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            max_request_retries,
            cache_enabled,
            cache_file,
            dashboard_alert_filter: var("DASHBOARD_ALERT_TYPE")
                .map(|s| AlertFilter::parse(&s))
                .unwrap_or_default(),
            dashboard_search: var("DASHBOARD_SEARCH").unwrap_or_default(),
            dashboard_top_n,
        })
    }
}

fn parse_positive(raw: Option<String>, name: &str, default: u64) -> Result<u64, String> {
    match raw {
        None => Ok(default),
        Some(s) => match s.parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!("{} must be a positive number of seconds, got {}", name, s)),
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
