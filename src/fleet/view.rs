//! Device list ordering, alert-type filtering and free-text search.

use crate::fleet::classify::{
    LOW_BATTERY_PCT, is_battery_critical, is_battery_low, is_empty, is_full, is_low, is_offline, is_power_off,
    is_tamper, priority,
};
use crate::fleet::merge::UnifiedDeviceView;
use std::cmp::Ordering;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatteryFilter {
    Low,
    Critical,
    PowerOff,
    /// Critical, low, at most 20% while powered, or powered off.
    AllBattery,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum AlertFilter {
    #[default]
    All,
    /// Empty, low or tamper; `include_full` also keeps full dispensers for display lists.
    Tissue { include_full: bool },
    Battery(BatteryFilter),
    /// Offline or powered off.
    Offline,
}

impl AlertFilter {
    /// Unrecognized names fall back to `All`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "tissue" => AlertFilter::Tissue { include_full: false },
            "battery" | "all_battery" => AlertFilter::Battery(BatteryFilter::AllBattery),
            "low" | "low_battery" => AlertFilter::Battery(BatteryFilter::Low),
            "critical" | "critical_battery" => AlertFilter::Battery(BatteryFilter::Critical),
            "power_off" => AlertFilter::Battery(BatteryFilter::PowerOff),
            "offline" => AlertFilter::Offline,
            _ => AlertFilter::All,
        }
    }

    pub fn matches(&self, view: &UnifiedDeviceView) -> bool {
        match self {
            AlertFilter::All => true,
            AlertFilter::Tissue { include_full } => {
                is_empty(view) || is_low(view) || is_tamper(view) || (*include_full && is_full(view))
            }
            AlertFilter::Battery(BatteryFilter::Low) => is_battery_low(view),
            AlertFilter::Battery(BatteryFilter::Critical) => is_battery_critical(view),
            AlertFilter::Battery(BatteryFilter::PowerOff) => is_power_off(view),
            AlertFilter::Battery(BatteryFilter::AllBattery) => {
                is_power_off(view)
                    || is_battery_critical(view)
                    || is_battery_low(view)
                    || view.battery_percentage.is_some_and(|pct| pct <= LOW_BATTERY_PCT)
            }
            AlertFilter::Offline => is_offline(view) || is_power_off(view),
        }
    }

    fn is_battery(&self) -> bool {
        matches!(self, AlertFilter::Battery(_))
    }
}

/// Urgency order: priority desc, then minutes since update asc, then historical alert volume desc.
///
/// Unknown recency counts as 0 minutes, so never-reporting devices sort as freshly updated
/// within their priority tier.
struct UrgencyKey {
    priority: i32,
    minutes: f64,
    alert_volume: u64,
}

impl UrgencyKey {
    fn cmp_key(&self, other: &UrgencyKey) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.minutes.total_cmp(&other.minutes))
            .then_with(|| other.alert_volume.cmp(&self.alert_volume))
    }
}

fn urgency_key(view: &UnifiedDeviceView) -> UrgencyKey {
    UrgencyKey {
        priority: priority(view),
        minutes: view.minutes_since_update.unwrap_or(0.0),
        alert_volume: view.low_alert_count + view.tamper_count,
    }
}

/// Sort by urgency, keep devices matching `filter`, then apply a case-insensitive search.
///
/// The sort is stable, so applying this twice with the same arguments changes nothing.
pub fn sort_and_filter(views: &[UnifiedDeviceView], filter: AlertFilter, search: &str) -> Vec<UnifiedDeviceView> {
    let term = search.trim().to_lowercase();
    let mut keyed: Vec<(UrgencyKey, &UnifiedDeviceView)> = views
        .iter()
        .filter(|view| filter.matches(view))
        .filter(|view| term.is_empty() || matches_search(view, &term, filter.is_battery()))
        .map(|view| (urgency_key(view), view))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.cmp_key(b));
    keyed.into_iter().map(|(_, view)| view.clone()).collect()
}

/// `term` must already be trimmed and lower-cased.
///
/// `view.name` is already the resolved display name (registry `name`, else analytics
/// `device_name`), so both are covered.
pub fn matches_search(view: &UnifiedDeviceView, term: &str, include_battery: bool) -> bool {
    let contains = |haystack: &str| haystack.to_lowercase().contains(term);
    contains(&view.name)
        || contains(&view.device_id.to_string())
        || view.room.as_deref().is_some_and(contains)
        || contains(&view.current_status)
        || (include_battery && view.battery_percentage.map(format_percentage).is_some_and(|s| contains(&s)))
}

/// Percentages render without a trailing `.0` (`15`, `15.5`).
pub fn format_percentage(pct: f64) -> String {
    if pct.fract() == 0.0 && pct.abs() < 1e15 {
        format!("{}", pct as i64)
    } else {
        format!("{}", pct)
    }
}

/// Urgency score used by battery lists: critical 100, low 80, power off 60, at most 20% 40.
/// Historical counters count as well as the live flags.
pub fn battery_priority(view: &UnifiedDeviceView) -> i32 {
    if view.battery_critical || view.battery_critical_count > 0 {
        100
    } else if view.battery_low || view.battery_low_count > 0 {
        80
    } else if view.power_status.as_reported().is_some_and(|p| p.trim().eq_ignore_ascii_case("off"))
        || view.power_off_count > 0
    {
        60
    } else if view.battery_percentage.is_some_and(|pct| pct <= LOW_BATTERY_PCT) {
        40
    } else {
        0
    }
}

/// Battery list order: battery priority desc, then percentage asc (unknown as 100), then recency asc.
pub fn sort_for_battery(views: &[UnifiedDeviceView]) -> Vec<UnifiedDeviceView> {
    let mut sorted = views.to_vec();
    sorted.sort_by(|a, b| {
        battery_priority(b)
            .cmp(&battery_priority(a))
            .then_with(|| {
                let pa = a.battery_percentage.unwrap_or(100.0);
                let pb = b.battery_percentage.unwrap_or(100.0);
                pa.total_cmp(&pb)
            })
            .then_with(|| {
                let ma = a.minutes_since_update.unwrap_or(0.0);
                let mb = b.minutes_since_update.unwrap_or(0.0);
                ma.total_cmp(&mb)
            })
    });
    sorted
}

/// Urgency score used by the offline list: power off 100, offline/disconnected 80,
/// inactive 60, any recorded power-off 40, otherwise the general priority.
pub fn offline_priority(view: &UnifiedDeviceView) -> i32 {
    let status = view.current_status.trim().to_lowercase();
    if is_power_off(view) || status == "power_off" {
        100
    } else if status == "offline" || status == "disconnected" {
        80
    } else if status == "inactive" {
        60
    } else if view.power_off_count > 0 {
        40
    } else {
        priority(view)
    }
}

/// Offline list order: offline priority desc, then the same tie-breaks as `sort_and_filter`.
pub fn sort_for_offline(views: &[UnifiedDeviceView]) -> Vec<UnifiedDeviceView> {
    let mut keyed: Vec<(UrgencyKey, &UnifiedDeviceView)> = views
        .iter()
        .map(|view| {
            let key = UrgencyKey {
                priority: offline_priority(view),
                ..urgency_key(view)
            };
            (key, view)
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.cmp_key(b));
    keyed.into_iter().map(|(_, view)| view.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dispenser::{DeviceId, PowerStatus};

    fn view(id: i64, status: &str) -> UnifiedDeviceView {
        UnifiedDeviceView {
            current_status: status.to_string(),
            is_active: true,
            ..UnifiedDeviceView::new(DeviceId(id))
        }
    }

    fn ids(views: &[UnifiedDeviceView]) -> Vec<i64> {
        views.iter().map(|v| v.device_id.0).collect()
    }

    #[test]
    fn tamper_sorts_before_normal() {
        let a = view(1, "tamper");
        let b = view(2, "normal");
        let sorted = sort_and_filter(&[b, a], AlertFilter::All, "");
        assert_eq!(ids(&sorted), vec![1, 2]);
    }

    #[test]
    fn ties_break_on_recency_then_alert_volume() {
        let stale = UnifiedDeviceView {
            minutes_since_update: Some(45.0),
            ..view(1, "normal")
        };
        let fresh = UnifiedDeviceView {
            minutes_since_update: Some(3.0),
            ..view(2, "normal")
        };
        let never = UnifiedDeviceView {
            minutes_since_update: None,
            ..view(3, "normal")
        };
        let noisy = UnifiedDeviceView {
            minutes_since_update: Some(3.0),
            low_alert_count: 4,
            tamper_count: 1,
            ..view(4, "normal")
        };
        let sorted = sort_and_filter(&[stale, fresh, never, noisy], AlertFilter::All, "");
        // unknown recency counts as just updated
        assert_eq!(ids(&sorted), vec![3, 4, 2, 1]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let views: Vec<UnifiedDeviceView> = (0..30)
            .map(|i| UnifiedDeviceView {
                minutes_since_update: if i % 4 == 0 { None } else { Some((i % 9) as f64) },
                low_alert_count: (i % 5) as u64,
                battery_percentage: Some(((i * 7) % 100) as f64),
                ..view(i, ["empty", "low", "normal", "tamper", "offline", "full"][(i % 6) as usize])
            })
            .collect();
        for filter in [
            AlertFilter::All,
            AlertFilter::Tissue { include_full: true },
            AlertFilter::Battery(BatteryFilter::AllBattery),
        ] {
            let once = sort_and_filter(&views, filter, "1");
            let twice = sort_and_filter(&once, filter, "1");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn tissue_filter_optionally_keeps_full() {
        let views = [view(1, "empty"), view(2, "full"), view(3, "normal"), view(4, "low")];
        let alerts = sort_and_filter(&views, AlertFilter::Tissue { include_full: false }, "");
        assert_eq!(ids(&alerts), vec![1, 4]);
        let display = sort_and_filter(&views, AlertFilter::Tissue { include_full: true }, "");
        assert_eq!(ids(&display), vec![1, 4, 2]);
    }

    #[test]
    fn battery_sub_filters() {
        let critical = UnifiedDeviceView {
            battery_percentage: Some(9.0),
            ..view(1, "normal")
        };
        let low = UnifiedDeviceView {
            battery_percentage: Some(19.0),
            ..view(2, "normal")
        };
        let off = UnifiedDeviceView {
            power_status: PowerStatus::Reported("OFF".into()),
            battery_percentage: Some(90.0),
            ..view(3, "normal")
        };
        let fine = UnifiedDeviceView {
            battery_percentage: Some(70.0),
            ..view(4, "normal")
        };
        let views = [critical, low, off, fine];

        let pick = |f: BatteryFilter| {
            let mut found = ids(&sort_and_filter(&views, AlertFilter::Battery(f), ""));
            found.sort_unstable();
            found
        };
        assert_eq!(pick(BatteryFilter::Critical), vec![1]);
        assert_eq!(pick(BatteryFilter::Low), vec![2]);
        assert_eq!(pick(BatteryFilter::PowerOff), vec![3]);
        assert_eq!(pick(BatteryFilter::AllBattery), vec![1, 2, 3]);
    }

    #[test]
    fn search_matches_room() {
        let v = UnifiedDeviceView {
            name: "Towels".into(),
            room: Some("201".into()),
            ..view(7, "normal")
        };
        let found = sort_and_filter(std::slice::from_ref(&v), AlertFilter::All, "201");
        assert_eq!(ids(&found), vec![7]);
    }

    #[test]
    fn search_fields_and_battery_percentage() {
        let v = UnifiedDeviceView {
            name: "Lobby Towels".into(),
            battery_percentage: Some(15.0),
            ..view(42, "Empty")
        };
        let one = std::slice::from_ref(&v);
        assert_eq!(sort_and_filter(one, AlertFilter::All, "LOBBY").len(), 1);
        assert_eq!(sort_and_filter(one, AlertFilter::All, "42").len(), 1);
        assert_eq!(sort_and_filter(one, AlertFilter::All, "emp").len(), 1);
        assert_eq!(sort_and_filter(one, AlertFilter::All, "   ").len(), 1);
        // percentage only searched on battery lists
        assert_eq!(sort_and_filter(one, AlertFilter::All, "15").len(), 0);
        assert_eq!(
            sort_and_filter(one, AlertFilter::Battery(BatteryFilter::AllBattery), "15").len(),
            1
        );
    }

    #[test]
    fn unknown_alert_type_means_no_category_filter() {
        assert_eq!(AlertFilter::parse("everything"), AlertFilter::All);
        assert_eq!(AlertFilter::parse(" Tissue "), AlertFilter::Tissue { include_full: false });
        assert_eq!(AlertFilter::parse("battery"), AlertFilter::Battery(BatteryFilter::AllBattery));
        assert_eq!(AlertFilter::parse("power_off"), AlertFilter::Battery(BatteryFilter::PowerOff));
        assert_eq!(AlertFilter::parse("OFFLINE"), AlertFilter::Offline);
        assert!(sort_and_filter(&[], AlertFilter::parse("bogus"), "x").is_empty());
    }

    #[test]
    fn percentage_formatting() {
        assert_eq!(format_percentage(15.0), "15");
        assert_eq!(format_percentage(15.5), "15.5");
        assert_eq!(format_percentage(0.0), "0");
    }

    #[test]
    fn battery_order() {
        let critical = UnifiedDeviceView {
            battery_critical: true,
            battery_percentage: Some(9.0),
            ..view(1, "normal")
        };
        let historic_low = UnifiedDeviceView {
            battery_low_count: 2,
            battery_percentage: Some(60.0),
            ..view(2, "normal")
        };
        let off = UnifiedDeviceView {
            power_status: PowerStatus::Reported("off".into()),
            ..view(3, "normal")
        };
        let dim = UnifiedDeviceView {
            battery_percentage: Some(18.0),
            ..view(4, "normal")
        };
        let dimmer = UnifiedDeviceView {
            battery_percentage: Some(12.0),
            ..view(5, "normal")
        };
        let sorted = sort_for_battery(&[dim, off, dimmer, historic_low, critical]);
        assert_eq!(ids(&sorted), vec![1, 2, 3, 5, 4]);
    }

    fn offline_fleet() -> Vec<UnifiedDeviceView> {
        vec![
            UnifiedDeviceView {
                minutes_since_update: Some(50.0),
                ..view(1, "offline")
            },
            UnifiedDeviceView {
                power_status: PowerStatus::Reported("Off".into()),
                ..view(2, "normal")
            },
            view(3, "inactive"),
            UnifiedDeviceView {
                minutes_since_update: Some(5.0),
                ..view(4, "disconnected")
            },
            UnifiedDeviceView {
                is_active: false,
                power_off_count: 2,
                ..view(5, "normal")
            },
            view(6, "normal"),
        ]
    }

    #[test]
    fn offline_filter_keeps_offline_and_powered_off() {
        let mut found = ids(&sort_and_filter(&offline_fleet(), AlertFilter::Offline, ""));
        found.sort_unstable();
        assert_eq!(found, vec![1, 2, 3, 4, 5]);
        // never reported power is not power off
        assert!(!AlertFilter::Offline.matches(&view(7, "normal")));
    }

    #[test]
    fn offline_order() {
        let offline = sort_and_filter(&offline_fleet(), AlertFilter::Offline, "");
        assert_eq!(ids(&sort_for_offline(&offline)), vec![2, 4, 1, 3, 5]);
        assert_eq!(offline_priority(&view(8, "power_off")), 100);
        assert_eq!(offline_priority(&view(9, "normal")), priority(&view(9, "normal")));
    }

    #[test]
    fn offline_list_is_searchable() {
        let found = sort_and_filter(&offline_fleet(), AlertFilter::Offline, "disconn");
        assert_eq!(ids(&found), vec![4]);
    }

    #[test]
    fn search_uses_analytics_name_when_registry_has_none() {
        use crate::fleet::merge::merge_devices;
        use crate::models::dispenser::{AnalyticsRecord, DeviceRecord};

        let registry = DeviceRecord {
            id: Some(DeviceId(5)),
            ..Default::default()
        };
        let analytics = AnalyticsRecord {
            device_id: Some(DeviceId(5)),
            device_name: Some("Mop Closet".into()),
            ..Default::default()
        };
        let views = merge_devices(&[registry], &[analytics], &[]);
        assert_eq!(ids(&sort_and_filter(&views, AlertFilter::All, "closet")), vec![5]);
    }
}
