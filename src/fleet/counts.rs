//! Alert tallies for summary cards.

use crate::fleet::classify::{is_battery_critical, is_battery_low, is_empty, is_full, is_low, is_power_off, is_tamper};
use crate::fleet::merge::UnifiedDeviceView;
use serde::Serialize;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TissueAlertCounts {
    pub empty_count: u64,
    pub low_count: u64,
    pub full_count: u64,
    pub tamper_count: u64,
    /// Empty + low + tamper. Full is a healthy state and not an alert.
    pub total_tissue_alerts: u64,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatteryAlertCounts {
    pub low_battery_count: u64,
    pub critical_battery_count: u64,
    pub power_off_count: u64,
    pub power_total_alerts_count: u64,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllAlertCounts {
    #[serde(flatten)]
    pub tissue: TissueAlertCounts,
    #[serde(flatten)]
    pub battery: BatteryAlertCounts,
    pub total_alerts: u64,
}

/// Tissue-dimension counts. A device may count in several buckets (e.g. tamper and empty).
pub fn tissue_alert_counts(views: &[UnifiedDeviceView]) -> TissueAlertCounts {
    let mut counts = TissueAlertCounts::default();
    for view in views {
        if is_tamper(view) {
            counts.tamper_count += 1;
        }
        if is_empty(view) {
            counts.empty_count += 1;
        }
        if is_low(view) {
            counts.low_count += 1;
        }
        if is_full(view) {
            counts.full_count += 1;
        }
    }
    counts.total_tissue_alerts = counts.empty_count + counts.low_count + counts.tamper_count;
    counts
}

/// Battery/power counts. Each device counts at most once: power off, else critical, else low.
pub fn battery_alert_counts(views: &[UnifiedDeviceView]) -> BatteryAlertCounts {
    let mut counts = BatteryAlertCounts::default();
    for view in views {
        if is_power_off(view) {
            counts.power_off_count += 1;
        } else if is_battery_critical(view) {
            counts.critical_battery_count += 1;
        } else if is_battery_low(view) {
            counts.low_battery_count += 1;
        }
    }
    counts.power_total_alerts_count = counts.low_battery_count + counts.critical_battery_count + counts.power_off_count;
    counts
}

pub fn all_alert_counts(views: &[UnifiedDeviceView]) -> AllAlertCounts {
    let tissue = tissue_alert_counts(views);
    let battery = battery_alert_counts(views);
    AllAlertCounts {
        tissue,
        battery,
        total_alerts: tissue.total_tissue_alerts + battery.power_total_alerts_count,
    }
}
