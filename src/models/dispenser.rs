//! Models for the dispenser backend's device registry, analytics and realtime-status payloads.
//!
//! Scope: types and decoding only. Merging and classification live in `crate::fleet`.
//!
//! Notes
//! - Every field is optional on the wire. Scalars that are missing, `null` or of the wrong
//!   JSON type decode to `None` (or `0` for counters) instead of failing the record.
//! - Numeric strings are accepted wherever a number is expected (`"42"` -> `42`).
//! - `PowerStatus` keeps an absent key apart from an explicit `null`.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

// =====================
// Identifiers
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =====================
// Enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TissueType {
    HandTowel,
    ToiletPaper,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationType {
    Wifi,
    #[default]
    #[serde(other)]
    Manual,
}

/// Raw power telemetry as reported by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PowerStatus {
    /// The record carried no power field at all.
    #[default]
    Absent,
    /// The field was present and `null`.
    Null,
    /// Any reported value; numbers and booleans are stringified.
    Reported(String),
}

impl PowerStatus {
    pub fn is_absent(&self) -> bool {
        matches!(self, PowerStatus::Absent)
    }

    pub fn as_reported(&self) -> Option<&str> {
        match self {
            PowerStatus::Reported(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl Serialize for PowerStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PowerStatus::Absent | PowerStatus::Null => serializer.serialize_none(),
            PowerStatus::Reported(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for PowerStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Only reached when the key is present; absence is handled by `#[serde(default)]`.
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => PowerStatus::Reported(s),
            Value::Number(n) => PowerStatus::Reported(n.to_string()),
            Value::Bool(b) => PowerStatus::Reported(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => PowerStatus::Null,
        })
    }
}

// =====================
// Records
// =====================

/// Registry entry from `GET /devices/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<DeviceId>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, alias = "room_number", deserialize_with = "lenient::opt_string")]
    pub room: Option<String>,
    #[serde(default, alias = "floor_number", deserialize_with = "lenient::opt_string")]
    pub floor: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_enum")]
    pub tissue_type: Option<TissueType>,
    #[serde(default, deserialize_with = "lenient::opt_enum")]
    pub gender: Option<Gender>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub meter_capacity: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub refer_value: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_enum")]
    pub registration_type: Option<RegistrationType>,
}

/// Per-device historical aggregates from `GET /device-analytics/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub device_id: Option<DeviceId>,
    /// Some deployments key analytics rows by `id` only.
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<DeviceId>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub device_name: Option<String>,
    #[serde(default, alias = "room_number", deserialize_with = "lenient::opt_string")]
    pub room: Option<String>,
    #[serde(default, alias = "floor_number", deserialize_with = "lenient::opt_string")]
    pub floor: Option<String>,

    #[serde(default, deserialize_with = "lenient::counter")]
    pub low_alert_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub empty_alert_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub full_alert_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub tamper_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub total_entries: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub battery_low_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub battery_critical_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub battery_alert_count: u64,
    #[serde(default, deserialize_with = "lenient::counter")]
    pub power_off_count: u64,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_alert_time: Option<DateTime<Utc>>,

    // Stale copies of live state, used only when realtime has nothing.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub current_status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub minutes_since_update: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub status_priority: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub battery_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "PowerStatus::is_absent")]
    pub power_status: PowerStatus,
    #[serde(default, skip_serializing_if = "PowerStatus::is_absent")]
    pub pwrstatus: PowerStatus,
}

impl AnalyticsRecord {
    /// Join key: `device_id`, falling back to `id`.
    pub fn key(&self) -> Option<DeviceId> {
        self.device_id.or(self.id)
    }
}

/// Latest live snapshot from `GET /device-analytics/realtime-status/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeStatusRecord {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub device_id: Option<DeviceId>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub current_status: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub current_alert: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub current_tamper: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub current_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub minutes_since_update: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub status_priority: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub battery_percentage: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub battery_low: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub battery_critical: Option<bool>,
    #[serde(default, skip_serializing_if = "PowerStatus::is_absent")]
    pub power_status: PowerStatus,
    #[serde(default, skip_serializing_if = "PowerStatus::is_absent")]
    pub pwrstatus: PowerStatus,
}

// =====================
// List decoding
// =====================

/// Decode a list response record by record.
///
/// The body may be a bare array or an object wrapping the array under `results`, `data` or
/// `devices`. Records that cannot be decoded at all are logged and skipped so one bad row
/// never hides the rest of the fleet.
pub fn decode_records<T: DeserializeOwned>(body: Value, kind: &str) -> Vec<T> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let wrapped = ["results", "data", "devices"]
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                });
            match wrapped {
                Some(items) => items,
                None => {
                    warn!("Unexpected {} response: object without a record list", kind);
                    return Vec::new();
                }
            }
        }
        Value::Null => return Vec::new(),
        other => {
            warn!("Unexpected {} response: expected a list, got {}", kind, json_type_name(&other));
            return Vec::new();
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let decoded: Result<T, _> = serde_path_to_error::deserialize(item);
        match decoded {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                "Skipping malformed {} record #{} (at `{}`): {}",
                kind,
                index,
                e.path(),
                e.inner()
            ),
        }
    }
    records
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Field-level coercions used by the record types above. None of them fail on a
/// well-formed JSON value; unusable values become `None`/`0`.
pub(crate) mod lenient {
    use super::*;

    pub fn value_as_f64(value: &Value) -> Option<f64> {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }

    fn integral(v: f64) -> Option<i64> {
        (v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15).then_some(v as i64)
    }

    pub fn value_as_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
            Value::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().and_then(integral))
            }
            _ => None,
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.as_ref().and_then(value_as_f64))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.as_ref().and_then(value_as_i64))
    }

    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DeviceId>, D::Error> {
        Ok(opt_i64(d)?.map(DeviceId))
    }

    /// Non-negative counter; anything unusable counts as zero.
    pub fn counter<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(opt_i64(d)?.map(|v| v.max(0) as u64).unwrap_or(0))
    }

    pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    /// Display string; numbers and booleans are stringified, blank strings are dropped.
    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn opt_enum<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(Option::<Value>::deserialize(d)?.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` taken as UTC.
    pub fn opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        let Some(Value::String(s)) = value else {
            return Ok(None);
        };
        let s = s.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc()))
    }
}
