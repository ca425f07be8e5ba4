//! NetWatch Risk Scoring
//!
//! Turns the threat event stream into decaying, trend-aware per-asset risk
//! scores. Every event updates a profile for both the source (attacker role)
//! and destination (victim role) IP; a periodic decay pass walks idle
//! profiles back toward zero. Scores are always clamped to [0, 100].

pub mod scorer;
pub mod weights;

pub use scorer::{ProfileSnapshot, RiskConfig, RiskScorer, RiskSummary, ScorerStats};

use serde::{Deserialize, Serialize};

/// Asset criticality categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetCategory {
    Unknown,
    /// IoT, printers
    Low,
    /// Workstations, laptops
    Medium,
    /// Servers, network devices
    High,
    /// Domain controllers, core infrastructure
    Critical,
}

/// Network exposure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExposureLevel {
    InternalOnly,
    Dmz,
    InternetFacing,
}

/// Risk trend over recent score samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTrend {
    Increasing,
    Stable,
    Decreasing,
}

impl AssetCategory {
    /// Categorize from an inventory classification hint
    pub fn from_device_type(device_type: &str) -> Self {
        let lower = device_type.to_lowercase();

        if ["domain controller", "dc", "active directory"]
            .iter()
            .any(|x| lower.contains(x))
        {
            return Self::Critical;
        }
        if ["server", "database", "sql", "web server", "mail"]
            .iter()
            .any(|x| lower.contains(x))
        {
            return Self::High;
        }
        if ["workstation", "desktop", "laptop"]
            .iter()
            .any(|x| lower.contains(x))
        {
            return Self::Medium;
        }
        if ["printer", "camera", "iot", "sensor", "smart"]
            .iter()
            .any(|x| lower.contains(x))
        {
            return Self::Low;
        }

        Self::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_categorization() {
        assert_eq!(
            AssetCategory::from_device_type("Domain Controller"),
            AssetCategory::Critical
        );
        assert_eq!(
            AssetCategory::from_device_type("SQL Server 2019"),
            AssetCategory::High
        );
        assert_eq!(
            AssetCategory::from_device_type("Laptop"),
            AssetCategory::Medium
        );
        assert_eq!(
            AssetCategory::from_device_type("IP Camera"),
            AssetCategory::Low
        );
        assert_eq!(
            AssetCategory::from_device_type("mystery box"),
            AssetCategory::Unknown
        );
    }
}
