//! Fleet-wide dashboard figures and the overall health label.

use crate::fleet::classify::{is_active, is_offline};
use crate::fleet::merge::UnifiedDeviceView;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

const ALERT_STATUSES: [&str; 3] = ["tamper", "empty", "low"];
const WARNING_LOW_ALERTS: u64 = 5;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_devices: u64,
    pub active_devices: u64,
    pub offline_devices: u64,
    /// Devices whose current status is tamper, empty or low.
    pub alert_devices: u64,
    pub total_low_alerts: u64,
    pub total_tamper: u64,
    /// Devices with an alert in the 24 hours before the reference time.
    pub recent_activity_24h: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub label: &'static str,
    pub color: &'static str,
}

impl DashboardStats {
    pub fn health(&self) -> HealthStatus {
        let (label, color) = if self.total_tamper > 0 {
            ("Tamper Alert", "#8B5CF6")
        } else if self.total_low_alerts > WARNING_LOW_ALERTS {
            ("Warning", "#FF9800")
        } else if self.offline_devices > self.active_devices {
            ("Poor", "#757575")
        } else {
            ("Excellent", "#4CAF50")
        };
        HealthStatus { label, color }
    }
}

pub fn dashboard_stats(views: &[UnifiedDeviceView], now: DateTime<Utc>) -> DashboardStats {
    let since = now - Duration::hours(24);
    let mut stats = DashboardStats {
        total_devices: views.len() as u64,
        ..Default::default()
    };
    for view in views {
        if is_active(view) {
            stats.active_devices += 1;
        }
        if is_offline(view) {
            stats.offline_devices += 1;
        }
        if ALERT_STATUSES.contains(&view.current_status.trim().to_lowercase().as_str()) {
            stats.alert_devices += 1;
        }
        stats.total_low_alerts += view.low_alert_count;
        stats.total_tamper += view.tamper_count;
        if view.last_alert_time.is_some_and(|at| at > since && at <= now) {
            stats.recent_activity_24h += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dispenser::DeviceId;
    use chrono::TimeZone;

    fn view(id: i64, status: &str, active: bool) -> UnifiedDeviceView {
        UnifiedDeviceView {
            current_status: status.to_string(),
            is_active: active,
            minutes_since_update: Some(1.0),
            ..UnifiedDeviceView::new(DeviceId(id))
        }
    }

    #[test]
    fn no_devices() {
        let now = Utc::now();
        let stats = dashboard_stats(&[], now);
        assert_eq!(stats, DashboardStats::default());
        assert_eq!(stats.health().label, "Excellent");
    }

    #[test]
    fn counts_and_recent_activity() {
        let now = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        let recent = UnifiedDeviceView {
            low_alert_count: 2,
            last_alert_time: Some(now - Duration::hours(3)),
            ..view(1, "Low", true)
        };
        let old = UnifiedDeviceView {
            low_alert_count: 1,
            last_alert_time: Some(now - Duration::hours(30)),
            ..view(2, "normal", true)
        };
        let offline = view(3, "offline", false);
        let stats = dashboard_stats(&[recent, old, offline], now);
        assert_eq!(stats.total_devices, 3);
        assert_eq!(stats.active_devices, 2);
        assert_eq!(stats.offline_devices, 1);
        assert_eq!(stats.alert_devices, 1);
        assert_eq!(stats.total_low_alerts, 3);
        assert_eq!(stats.recent_activity_24h, 1);
        assert_eq!(stats.health().label, "Excellent");
    }

    #[test]
    fn health_precedence() {
        let mut stats = DashboardStats {
            total_tamper: 1,
            total_low_alerts: 9,
            offline_devices: 4,
            ..Default::default()
        };
        assert_eq!(stats.health().label, "Tamper Alert");
        stats.total_tamper = 0;
        assert_eq!(stats.health().label, "Warning");
        stats.total_low_alerts = 5;
        assert_eq!(stats.health().label, "Poor");
        stats.active_devices = 4;
        assert_eq!(stats.health(), HealthStatus { label: "Excellent", color: "#4CAF50" });
    }
}
