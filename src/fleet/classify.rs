//! Status classification for unified device views.
//!
//! The offline and active predicates are independent: a device can be both
//! (e.g. `is_active = false` with status `low`) or neither. Callers that need a partition
//! must pick one of them.

use crate::fleet::merge::UnifiedDeviceView;
use crate::models::dispenser::PowerStatus;
use serde::{Serialize, Serializer};
use std::fmt;

/// Minutes without an update after which a device counts as offline.
pub const OFFLINE_AFTER_MINUTES: f64 = 120.0;
/// Minutes since the last update within which a device counts as active.
pub const RECENT_WITHIN_MINUTES: f64 = 30.0;

pub const CRITICAL_BATTERY_PCT: f64 = 10.0;
pub const LOW_BATTERY_PCT: f64 = 20.0;
pub const MEDIUM_BATTERY_PCT: f64 = 50.0;

const POWER_OFF_VALUES: [&str; 6] = ["off", "no", "none", "", "0", "false"];
const OFFLINE_STATUSES: [&str; 4] = ["inactive", "offline", "disconnected", "unknown"];
const ACTIVE_STATUSES: [&str; 7] = ["normal", "active", "online", "tamper", "empty", "low", "full"];

pub mod rank {
    pub const TAMPER: i32 = 100;
    pub const BATTERY_CRITICAL: i32 = 90;
    pub const EMPTY: i32 = 80;
    pub const LOW: i32 = 70;
    pub const BATTERY_LOW: i32 = 60;
    pub const FULL: i32 = 50;
    pub const ACTIVE: i32 = 30;
    pub const UNKNOWN_ACTIVE: i32 = 25;
    pub const POWER_OFF: i32 = 20;
    pub const OFFLINE: i32 = 10;
    pub const UNKNOWN_INACTIVE: i32 = 5;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    Tamper,
    Empty,
    Low,
    Full,
    BatteryCritical,
    BatteryLow,
    PowerOff,
    Offline,
    Active,
    Unknown,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Tamper => "tamper",
            AlertCategory::Empty => "empty",
            AlertCategory::Low => "low",
            AlertCategory::Full => "full",
            AlertCategory::BatteryCritical => "battery_critical",
            AlertCategory::BatteryLow => "battery_low",
            AlertCategory::PowerOff => "power_off",
            AlertCategory::Offline => "offline",
            AlertCategory::Active => "active",
            AlertCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AlertCategory {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Battery-dimension bucket; each device lands in at most one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    PowerOff,
    Critical,
    Low,
    Medium,
    Good,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub priority: i32,
    pub is_offline: bool,
    pub is_active: bool,
}

pub fn classify(view: &UnifiedDeviceView) -> Classification {
    Classification {
        priority: priority(view),
        is_offline: is_offline(view),
        is_active: is_active(view),
    }
}

/// `None` stands for a null/undefined value, which counts as powered off.
pub fn is_power_off_value(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(raw) => {
            let normalized = raw.trim().to_lowercase();
            POWER_OFF_VALUES.contains(&normalized.as_str())
        }
    }
}

/// A device that never sent power telemetry is not considered powered off.
pub fn is_power_off(view: &UnifiedDeviceView) -> bool {
    match &view.power_status {
        PowerStatus::Absent => false,
        PowerStatus::Null => is_power_off_value(None),
        PowerStatus::Reported(s) => is_power_off_value(Some(s)),
    }
}

fn status(view: &UnifiedDeviceView) -> String {
    view.current_status.trim().to_lowercase()
}

fn alert_is(view: &UnifiedDeviceView, expected: &str) -> bool {
    view.current_alert
        .as_deref()
        .is_some_and(|alert| alert.trim().eq_ignore_ascii_case(expected))
}

/// Live or historical tamper; drives the alert counters.
pub fn is_tamper(view: &UnifiedDeviceView) -> bool {
    view.current_tamper || view.tamper_count > 0
}

/// Tamper right now, ignoring history.
pub fn is_tampered_now(view: &UnifiedDeviceView) -> bool {
    view.current_tamper || status(view) == "tamper"
}

pub fn is_empty(view: &UnifiedDeviceView) -> bool {
    status(view) == "empty" || alert_is(view, "EMPTY")
}

pub fn is_low(view: &UnifiedDeviceView) -> bool {
    status(view) == "low" || alert_is(view, "LOW")
}

pub fn is_full(view: &UnifiedDeviceView) -> bool {
    status(view) == "full" || alert_is(view, "FULL")
}

pub fn is_battery_critical(view: &UnifiedDeviceView) -> bool {
    !is_power_off(view)
        && (view.battery_critical || view.battery_percentage.is_some_and(|pct| pct <= CRITICAL_BATTERY_PCT))
}

pub fn is_battery_low(view: &UnifiedDeviceView) -> bool {
    !is_power_off(view)
        && (view.battery_low
            || view
                .battery_percentage
                .is_some_and(|pct| pct > CRITICAL_BATTERY_PCT && pct <= LOW_BATTERY_PCT))
}

pub fn is_offline(view: &UnifiedDeviceView) -> bool {
    let explicitly_inactive = !view.is_active;
    let offline_status = OFFLINE_STATUSES.contains(&status(view).as_str());
    let stale = view.minutes_since_update.is_some_and(|m| m > OFFLINE_AFTER_MINUTES);
    let never_reported = view.minutes_since_update.is_none() && !view.is_active;
    explicitly_inactive || offline_status || stale || never_reported
}

pub fn is_active(view: &UnifiedDeviceView) -> bool {
    let active_status = ACTIVE_STATUSES.contains(&status(view).as_str());
    let recent = view.minutes_since_update.is_some_and(|m| m <= RECENT_WITHIN_MINUTES);
    view.is_active || active_status || recent || view.status_priority > 0
}

/// Display priority; higher sorts first.
///
/// tamper > critical battery > empty > low > battery low > full > active/normal
/// > power off > offline/inactive.
pub fn priority(view: &UnifiedDeviceView) -> i32 {
    primary_category_with_priority(view).1
}

/// The single category a device is listed under, matching its priority tier.
pub fn primary_category(view: &UnifiedDeviceView) -> AlertCategory {
    primary_category_with_priority(view).0
}

fn primary_category_with_priority(view: &UnifiedDeviceView) -> (AlertCategory, i32) {
    let normalized = status(view);
    if is_tampered_now(view) {
        return (AlertCategory::Tamper, rank::TAMPER);
    }
    if normalized == "battery_critical" || is_battery_critical(view) {
        return (AlertCategory::BatteryCritical, rank::BATTERY_CRITICAL);
    }
    if is_empty(view) {
        return (AlertCategory::Empty, rank::EMPTY);
    }
    if is_low(view) {
        return (AlertCategory::Low, rank::LOW);
    }
    if normalized == "battery_low" || is_battery_low(view) {
        return (AlertCategory::BatteryLow, rank::BATTERY_LOW);
    }
    if is_full(view) {
        return (AlertCategory::Full, rank::FULL);
    }
    match normalized.as_str() {
        "normal" | "active" | "online" => (AlertCategory::Active, rank::ACTIVE),
        "power_off" => (AlertCategory::PowerOff, rank::POWER_OFF),
        "inactive" | "offline" | "disconnected" => (AlertCategory::Offline, rank::OFFLINE),
        _ if view.is_active => (AlertCategory::Unknown, rank::UNKNOWN_ACTIVE),
        _ => (AlertCategory::Unknown, rank::UNKNOWN_INACTIVE),
    }
}

/// Tissue-dimension bucket from the live state: tamper > empty > low > full.
/// Past tampering alone does not move a device out of its current bucket.
pub fn tissue_category(view: &UnifiedDeviceView) -> Option<AlertCategory> {
    if is_tampered_now(view) {
        Some(AlertCategory::Tamper)
    } else if is_empty(view) {
        Some(AlertCategory::Empty)
    } else if is_low(view) {
        Some(AlertCategory::Low)
    } else if is_full(view) {
        Some(AlertCategory::Full)
    } else {
        None
    }
}

/// Battery-dimension bucket: power off > critical > low > medium > good.
/// Devices without a percentage or battery flags and with power on have no bucket.
pub fn battery_level(view: &UnifiedDeviceView) -> Option<BatteryLevel> {
    if is_power_off(view) {
        return Some(BatteryLevel::PowerOff);
    }
    if is_battery_critical(view) {
        return Some(BatteryLevel::Critical);
    }
    if is_battery_low(view) {
        return Some(BatteryLevel::Low);
    }
    match view.battery_percentage {
        Some(pct) if pct <= MEDIUM_BATTERY_PCT => Some(BatteryLevel::Medium),
        Some(_) => Some(BatteryLevel::Good),
        None => None,
    }
}
