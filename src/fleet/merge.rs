//! Joins the three per-device sources into one view per device.
//!
//! Precedence per field group:
//! - live state (activity, status, recency, battery, power): realtime, then analytics, then default;
//! - display metadata (name, room, floor): registry, then analytics, then a synthesized name;
//! - historical counters: analytics only, defaulting to zero.
//!
//! Devices that appear in analytics or realtime but not in the registry ("ghosts") are kept,
//! flagged `registered = false`, so live alerts for not-yet-registered hardware stay visible.

use crate::models::dispenser::{
    AnalyticsRecord, DeviceId, DeviceRecord, Gender, PowerStatus, RealtimeStatusRecord, RegistrationType, TissueType,
};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

pub const UNKNOWN_STATUS: &str = "unknown";

/// Precedence-resolved record for a single device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedDeviceView {
    pub device_id: DeviceId,
    pub name: String,
    pub room: Option<String>,
    pub floor: Option<String>,
    /// False when the id is unknown to the registry.
    pub registered: bool,
    pub tissue_type: Option<TissueType>,
    /// Only kept for toilet-paper dispensers.
    pub gender: Option<Gender>,
    pub meter_capacity: Option<i64>,
    pub refer_value: Option<i64>,
    pub registration_type: RegistrationType,

    pub is_active: bool,
    pub current_status: String,
    pub current_alert: Option<String>,
    pub current_tamper: bool,
    pub current_count: i64,
    /// `None` means no update was ever recorded.
    pub minutes_since_update: Option<f64>,
    pub status_priority: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub battery_percentage: Option<f64>,
    pub battery_low: bool,
    pub battery_critical: bool,
    pub power_status: PowerStatus,

    pub low_alert_count: u64,
    pub empty_alert_count: u64,
    pub full_alert_count: u64,
    pub tamper_count: u64,
    pub total_entries: u64,
    pub battery_low_count: u64,
    pub battery_critical_count: u64,
    pub battery_alert_count: u64,
    pub power_off_count: u64,
    pub last_alert_time: Option<DateTime<Utc>>,
}

impl UnifiedDeviceView {
    /// A view carrying only defaults, as produced for a device no source says anything about.
    pub fn new(device_id: DeviceId) -> Self {
        UnifiedDeviceView {
            device_id,
            name: synthesized_name(device_id),
            room: None,
            floor: None,
            registered: false,
            tissue_type: None,
            gender: None,
            meter_capacity: None,
            refer_value: None,
            registration_type: RegistrationType::Manual,
            is_active: false,
            current_status: UNKNOWN_STATUS.to_string(),
            current_alert: None,
            current_tamper: false,
            current_count: 0,
            minutes_since_update: None,
            status_priority: -1,
            last_updated: None,
            battery_percentage: None,
            battery_low: false,
            battery_critical: false,
            power_status: PowerStatus::Absent,
            low_alert_count: 0,
            empty_alert_count: 0,
            full_alert_count: 0,
            tamper_count: 0,
            total_entries: 0,
            battery_low_count: 0,
            battery_critical_count: 0,
            battery_alert_count: 0,
            power_off_count: 0,
            last_alert_time: None,
        }
    }
}

fn synthesized_name(device_id: DeviceId) -> String {
    format!("Device {}", device_id)
}

/// Merge registry, analytics and realtime records into one view per distinct device id.
///
/// Output order is registry order followed by ghost devices in ascending id order. Records
/// without a usable id are dropped; later analytics/realtime duplicates replace earlier ones
/// and the first registry entry for an id wins.
pub fn merge_devices(
    devices: &[DeviceRecord],
    analytics: &[AnalyticsRecord],
    realtime: &[RealtimeStatusRecord],
) -> Vec<UnifiedDeviceView> {
    let mut analytics_by_id: HashMap<DeviceId, &AnalyticsRecord> = HashMap::with_capacity(analytics.len());
    for record in analytics {
        match record.key() {
            Some(id) => {
                analytics_by_id.insert(id, record);
            }
            None => debug!("Ignoring analytics record without device id"),
        }
    }

    let mut realtime_by_id: HashMap<DeviceId, &RealtimeStatusRecord> = HashMap::with_capacity(realtime.len());
    for record in realtime {
        match record.device_id {
            Some(id) => {
                realtime_by_id.insert(id, record);
            }
            None => debug!("Ignoring realtime record without device id"),
        }
    }

    let mut seen = HashSet::with_capacity(devices.len());
    let mut views = Vec::with_capacity(devices.len().max(analytics_by_id.len()).max(realtime_by_id.len()));

    for device in devices {
        let Some(id) = device.id else {
            debug!("Ignoring registry record without id");
            continue;
        };
        if !seen.insert(id) {
            debug!("Ignoring duplicate registry record for device {}", id);
            continue;
        }
        views.push(build_view(
            id,
            Some(device),
            analytics_by_id.get(&id).copied(),
            realtime_by_id.get(&id).copied(),
        ));
    }

    let ghosts: BTreeSet<DeviceId> = analytics_by_id
        .keys()
        .chain(realtime_by_id.keys())
        .filter(|id| !seen.contains(*id))
        .copied()
        .collect();
    for id in ghosts {
        debug!("Device {} is not in the registry; synthesizing metadata", id);
        views.push(build_view(
            id,
            None,
            analytics_by_id.get(&id).copied(),
            realtime_by_id.get(&id).copied(),
        ));
    }

    views
}

fn build_view(
    id: DeviceId,
    device: Option<&DeviceRecord>,
    analytics: Option<&AnalyticsRecord>,
    realtime: Option<&RealtimeStatusRecord>,
) -> UnifiedDeviceView {
    let empty_device = DeviceRecord::default();
    let empty_analytics = AnalyticsRecord::default();
    let empty_realtime = RealtimeStatusRecord::default();
    let d = device.unwrap_or(&empty_device);
    let a = analytics.unwrap_or(&empty_analytics);
    let r = realtime.unwrap_or(&empty_realtime);

    let name = d
        .name
        .clone()
        .or_else(|| a.device_name.clone())
        .unwrap_or_else(|| synthesized_name(id));

    let gender = match d.tissue_type {
        Some(TissueType::ToiletPaper) => d.gender,
        _ => None,
    };

    UnifiedDeviceView {
        device_id: id,
        name,
        room: d.room.clone().or_else(|| a.room.clone()),
        floor: d.floor.clone().or_else(|| a.floor.clone()),
        registered: device.is_some(),
        tissue_type: d.tissue_type,
        gender,
        meter_capacity: d.meter_capacity,
        refer_value: d.refer_value.or(d.meter_capacity),
        registration_type: d.registration_type.unwrap_or_default(),

        is_active: r.is_active.or(a.is_active).unwrap_or(false),
        current_status: r
            .current_status
            .clone()
            .or_else(|| a.current_status.clone())
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
        current_alert: r.current_alert.clone(),
        current_tamper: r.current_tamper.unwrap_or(false),
        current_count: r.current_count.unwrap_or(0),
        minutes_since_update: r.minutes_since_update.or(a.minutes_since_update),
        status_priority: r.status_priority.or(a.status_priority).unwrap_or(-1),
        last_updated: r.last_updated,
        battery_percentage: r.battery_percentage.or(a.battery_percentage),
        battery_low: r.battery_low.unwrap_or(false),
        battery_critical: r.battery_critical.unwrap_or(false),
        power_status: resolve_power([&r.power_status, &r.pwrstatus, &a.power_status, &a.pwrstatus]),

        low_alert_count: a.low_alert_count,
        empty_alert_count: a.empty_alert_count,
        full_alert_count: a.full_alert_count,
        tamper_count: a.tamper_count,
        total_entries: a.total_entries,
        battery_low_count: a.battery_low_count,
        battery_critical_count: a.battery_critical_count,
        battery_alert_count: a.battery_alert_count,
        power_off_count: a.power_off_count,
        last_alert_time: a.last_alert_time,
    }
}

/// First reported value in precedence order; otherwise an explicit null if any source sent one.
fn resolve_power(candidates: [&PowerStatus; 4]) -> PowerStatus {
    candidates
        .iter()
        .find(|p| matches!(p, PowerStatus::Reported(_)))
        .or_else(|| candidates.iter().find(|p| matches!(p, PowerStatus::Null)))
        .map(|p| (*p).clone())
        .unwrap_or(PowerStatus::Absent)
}
