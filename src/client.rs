//! Blocking HTTP client for the dispenser backend (device registry and analytics).
//!
//! - Uses `ureq` (no async); the three list endpoints are fetched from scoped threads
//!   by `services::refresh`, so the client is shared by reference.
//! - Bodies are read as text and parsed with `serde_path_to_error`, then decoded record by
//!   record in `models::dispenser::decode_records`.
//!
//! Authentication
//! - Static bearer token (`API_TOKEN`), sent on every request.

use crate::models::dispenser::{AnalyticsRecord, DeviceRecord, RealtimeStatusRecord, decode_records};
use crate::services::refresh::SourceFetcher;
use http::StatusCode;
use log::{debug, warn};
use rand::Rng;
use serde_json::Value;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

const DEVICES_PATH: &str = "/devices/";
const ANALYTICS_PATH: &str = "/device-analytics/";
const REALTIME_STATUS_PATH: &str = "/device-analytics/realtime-status/";

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 8_000;
const BACKOFF_JITTER_MS: u64 = 250;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug)]
pub enum ApiClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json { path: String, message: String },
}

impl core::fmt::Display for ApiClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ApiClientError::Transport(s) => write!(f, "transport error: {}", s),
            ApiClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            ApiClientError::Json { path, message } => write!(f, "json error at `{}`: {}", path, message),
        }
    }
}

impl std::error::Error for ApiClientError {}

impl ApiClientError {
    /// Worth another attempt: network failures, server errors and rate limiting.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiClientError::Transport(_) => true,
            ApiClientError::Http { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            ApiClientError::Json { .. } => false,
        }
    }
}

pub struct DispenserClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    max_attempts: NonZeroU32,
}

impl DispenserClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration, max_attempts: NonZeroU32) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        DispenserClient {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_attempts,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn get_json(&self, path: &str) -> Result<Value, ApiClientError> {
        let url = self.url(path);
        let max = self.max_attempts.get();
        let mut attempt = 1;
        loop {
            match self.get_once(&url) {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < max => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "GET {} failed (attempt {}/{}): {}; retrying in {} ms",
                        url,
                        attempt,
                        max,
                        e,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_once(&self, url: &str) -> Result<Value, ApiClientError> {
        let mut response = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.token))
            .call()
            .map_err(|e| ApiClientError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                warn!("Backend rejected the bearer token for {} (check API_TOKEN)", url);
            }
            return Err(ApiClientError::Http {
                status: status.as_u16(),
                message: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        debug!("GET {} -> {} ({} bytes)", url, status.as_u16(), body.len());
        parse_body(&body)
    }

    pub fn get_devices(&self) -> Result<Vec<DeviceRecord>, ApiClientError> {
        Ok(decode_records(self.get_json(DEVICES_PATH)?, "device"))
    }

    pub fn get_analytics(&self) -> Result<Vec<AnalyticsRecord>, ApiClientError> {
        Ok(decode_records(self.get_json(ANALYTICS_PATH)?, "analytics"))
    }

    pub fn get_realtime_status(&self) -> Result<Vec<RealtimeStatusRecord>, ApiClientError> {
        Ok(decode_records(self.get_json(REALTIME_STATUS_PATH)?, "realtime status"))
    }
}

impl SourceFetcher for DispenserClient {
    fn fetch_devices(&self) -> Result<Vec<DeviceRecord>, String> {
        self.get_devices().map_err(|e| e.to_string())
    }

    fn fetch_analytics(&self) -> Result<Vec<AnalyticsRecord>, String> {
        self.get_analytics().map_err(|e| e.to_string())
    }

    fn fetch_realtime(&self) -> Result<Vec<RealtimeStatusRecord>, String> {
        self.get_realtime_status().map_err(|e| e.to_string())
    }
}

fn parse_body(body: &str) -> Result<Value, ApiClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| ApiClientError::Json {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })
}

/// Exponential backoff with a little jitter: 500 ms, 1 s, 2 s, ... capped at 8 s.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << exp).min(BACKOFF_MAX_MS);
    let jitter = rand::rng().random_range(0..=BACKOFF_JITTER_MS);
    Duration::from_millis(base + jitter)
}

fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::from("<no body>");
    }
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
