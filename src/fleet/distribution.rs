//! Category series for donut charts and summary cards.

use crate::fleet::classify::{AlertCategory, BatteryLevel, battery_level, tissue_category};
use crate::fleet::merge::UnifiedDeviceView;
use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Tissue,
    Battery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionSlice {
    pub name: &'static str,
    pub value: u64,
    pub color: &'static str,
}

const TISSUE_SLICES: [(&str, &str, AlertCategory); 4] = [
    ("Empty", "#FF4757", AlertCategory::Empty),
    ("Low", "#FF9F00", AlertCategory::Low),
    ("Full", "#10B981", AlertCategory::Full),
    ("Tamper", "#8B5CF6", AlertCategory::Tamper),
];

const BATTERY_SLICES: [(&str, &str, BatteryLevel); 5] = [
    ("Critical Battery", "#FF3B30", BatteryLevel::Critical),
    ("Low Battery", "#FF9F00", BatteryLevel::Low),
    ("Medium Battery", "#FFD600", BatteryLevel::Medium),
    ("Good Battery", "#10B981", BatteryLevel::Good),
    ("Power Off", "#8B5CF6", BatteryLevel::PowerOff),
];

/// Full census of one dimension, always in the same order with zero-count slices included.
///
/// Each device lands in at most one slice, so the values sum to the number of devices
/// with a live tissue state (tamper > empty > low > full) or a battery level.
/// Unlike the alert totals, full dispensers are counted here.
pub fn build_distribution(views: &[UnifiedDeviceView], dimension: Dimension) -> Vec<DistributionSlice> {
    match dimension {
        Dimension::Tissue => {
            let buckets: Vec<AlertCategory> = views.iter().filter_map(tissue_category).collect();
            TISSUE_SLICES
                .iter()
                .map(|&(name, color, category)| DistributionSlice {
                    name,
                    value: buckets.iter().filter(|&&b| b == category).count() as u64,
                    color,
                })
                .collect()
        }
        Dimension::Battery => {
            let levels: Vec<BatteryLevel> = views.iter().filter_map(battery_level).collect();
            BATTERY_SLICES
                .iter()
                .map(|&(name, color, level)| DistributionSlice {
                    name,
                    value: levels.iter().filter(|&&l| l == level).count() as u64,
                    color,
                })
                .collect()
        }
    }
}

/// Weights for drawing a chart. An all-zero series gets equal placeholder weights so the
/// chart is not degenerate; these must never be shown as counts.
pub fn chart_weights(slices: &[DistributionSlice]) -> Vec<f64> {
    let total: u64 = slices.iter().map(|s| s.value).sum();
    if total == 0 {
        return vec![1.0; slices.len()];
    }
    slices.iter().map(|s| s.value as f64 / total as f64).collect()
}
