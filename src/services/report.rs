//! Dashboard report assembled from the merged device views after each refresh.

use crate::fleet::classify::{AlertCategory, BatteryLevel, battery_level, classify, is_power_off, primary_category};
use crate::fleet::counts::{AllAlertCounts, all_alert_counts};
use crate::fleet::distribution::{Dimension, DistributionSlice, build_distribution, chart_weights};
use crate::fleet::merge::UnifiedDeviceView;
use crate::fleet::stats::{DashboardStats, HealthStatus, dashboard_stats};
use crate::fleet::view::{AlertFilter, BatteryFilter, sort_and_filter, sort_for_battery, sort_for_offline};
use crate::models::dispenser::{DeviceId, PowerStatus};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub alert_filter: AlertFilter,
    pub search: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRow {
    pub device_id: DeviceId,
    pub name: String,
    pub room: Option<String>,
    pub registered: bool,
    pub status: String,
    pub category: AlertCategory,
    pub priority: i32,
    pub is_offline: bool,
    pub is_active: bool,
    pub minutes_since_update: Option<f64>,
    pub battery_percentage: Option<f64>,
    pub battery_level: Option<BatteryLevel>,
    /// Raw telemetry; omitted when no source reported a power field.
    #[serde(skip_serializing_if = "PowerStatus::is_absent")]
    pub power_status: PowerStatus,
    pub power_off: bool,
}

impl From<&UnifiedDeviceView> for DeviceRow {
    fn from(view: &UnifiedDeviceView) -> Self {
        let classification = classify(view);
        DeviceRow {
            device_id: view.device_id,
            name: view.name.clone(),
            room: view.room.clone(),
            registered: view.registered,
            status: view.current_status.clone(),
            category: primary_category(view),
            priority: classification.priority,
            is_offline: classification.is_offline,
            is_active: classification.is_active,
            minutes_since_update: view.minutes_since_update,
            battery_percentage: view.battery_percentage,
            battery_level: battery_level(view),
            power_status: view.power_status.clone(),
            power_off: is_power_off(view),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub generated_at: DateTime<Utc>,
    pub stats: DashboardStats,
    pub health: HealthStatus,
    pub alerts: AllAlertCounts,
    pub tissue_distribution: Vec<DistributionSlice>,
    pub battery_distribution: Vec<DistributionSlice>,
    /// Relative slice sizes for drawing; equal placeholders when a series is all zero.
    pub tissue_chart_weights: Vec<f64>,
    pub battery_chart_weights: Vec<f64>,
    /// Urgency-ordered devices matching the configured filter and search.
    pub devices: Vec<DeviceRow>,
    /// Devices with a battery or power problem, most urgent first.
    pub battery_watchlist: Vec<DeviceRow>,
    /// Offline or powered-off devices, powered-off first.
    pub offline_watchlist: Vec<DeviceRow>,
}

pub fn build_report(views: &[UnifiedDeviceView], options: &ReportOptions, now: DateTime<Utc>) -> DashboardReport {
    let stats = dashboard_stats(views, now);
    let devices = sort_and_filter(views, options.alert_filter, &options.search);
    let battery_alerts = sort_and_filter(views, AlertFilter::Battery(BatteryFilter::AllBattery), "");
    let offline = sort_and_filter(views, AlertFilter::Offline, "");
    let tissue_distribution = build_distribution(views, Dimension::Tissue);
    let battery_distribution = build_distribution(views, Dimension::Battery);
    DashboardReport {
        generated_at: now,
        health: stats.health(),
        stats,
        alerts: all_alert_counts(views),
        tissue_chart_weights: chart_weights(&tissue_distribution),
        battery_chart_weights: chart_weights(&battery_distribution),
        tissue_distribution,
        battery_distribution,
        devices: devices.iter().map(DeviceRow::from).collect(),
        battery_watchlist: sort_for_battery(&battery_alerts).iter().map(DeviceRow::from).collect(),
        offline_watchlist: sort_for_offline(&offline).iter().map(DeviceRow::from).collect(),
    }
}

fn format_slices(slices: &[DistributionSlice]) -> String {
    slices
        .iter()
        .map(|s| format!("{}={}", s.name, s.value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn log_summary(report: &DashboardReport, top_n: usize) {
    let stats = &report.stats;
    let alerts = &report.alerts;
    info!(
        "Fleet: {} device(s), {} active, {} offline, health {} ({} on the offline list)",
        stats.total_devices,
        stats.active_devices,
        stats.offline_devices,
        report.health.label,
        report.offline_watchlist.len()
    );
    info!(
        "Alerts: {} total ({} tissue: empty={}, low={}, tamper={}; {} battery: critical={}, low={}, power_off={})",
        alerts.total_alerts,
        alerts.tissue.total_tissue_alerts,
        alerts.tissue.empty_count,
        alerts.tissue.low_count,
        alerts.tissue.tamper_count,
        alerts.battery.power_total_alerts_count,
        alerts.battery.critical_battery_count,
        alerts.battery.low_battery_count,
        alerts.battery.power_off_count
    );
    debug!("Tissue distribution: {}", format_slices(&report.tissue_distribution));
    debug!("Battery distribution: {}", format_slices(&report.battery_distribution));

    for row in report.devices.iter().take(top_n) {
        info!(
            "  [{:>3}] #{} {} ({}) {} status={} battery={} updated={}",
            row.priority,
            row.device_id,
            row.name,
            row.room.as_deref().unwrap_or("-"),
            row.category,
            row.status,
            row.battery_percentage
                .map(|p| format!("{}%", p))
                .unwrap_or_else(|| "-".to_string()),
            row.minutes_since_update
                .map(|m| format!("{:.0}m ago", m))
                .unwrap_or_else(|| "never".to_string())
        );
    }
    if report.devices.len() > top_n {
        info!("  ... and {} more", report.devices.len() - top_n);
    }
}
