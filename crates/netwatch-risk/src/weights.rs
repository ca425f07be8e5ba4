//! Risk Weight Tables
//!
//! Fixed lookup tables feeding the score formula. Values reflect attack
//! significance, tuned against incident history; unknown event types default
//! to 5.0 and every severity maps to a fixed multiplier.

use crate::{AssetCategory, ExposureLevel};
use netwatch_common::{Severity, ThreatType};

/// Weight of an event type in the risk score
pub fn type_weight(event_type: &ThreatType) -> f64 {
    use ThreatType::*;
    match event_type {
        // Critical attack indicators
        DcsyncAttack => 20.0,
        KerberoastingAttack => 15.0,
        AsrepRoastingAttack => 15.0,
        PassTheHashSuspected => 15.0,
        C2Communication => 18.0,
        MaliciousJa3Fingerprint => 15.0,
        NtdsDitAccess => 20.0,
        LsassDumpAccess => 20.0,
        RansomwareDetected => 25.0,
        HighRiskAttackChain => 20.0,

        // High-priority indicators
        LateralMovement => 12.0,
        DataExfiltration => 14.0,
        BruteForce => 8.0,
        KerberosBruteforce => 8.0,
        SmbAdminShareAccess => 10.0,
        BeaconDetected => 12.0,
        DnsTunnel => 10.0,

        // Medium indicators
        PortScan => 5.0,
        InternalPortScan => 6.0,
        SmbEnumeration => 6.0,
        LdapEnumeration => 6.0,
        LdapSensitiveAttrQuery => 8.0,

        // Low indicators
        ThreatFeedMatch => 10.0,
        BlacklistedIp => 8.0,
        ConnectionFlood => 4.0,
        UnusualPacketSize => 2.0,

        _ => 5.0,
    }
}

/// Weight of an alert severity
pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 1.0,
        Severity::Medium => 3.0,
        Severity::High => 7.0,
        Severity::Critical => 15.0,
    }
}

/// Step function of alert age; recent alerts dominate the score
pub fn time_weight(age_seconds: i64) -> f64 {
    let hours = age_seconds as f64 / 3600.0;

    if hours < 1.0 {
        1.0
    } else if hours < 6.0 {
        0.9
    } else if hours < 24.0 {
        0.7
    } else if hours < 72.0 {
        0.5
    } else if hours < 168.0 {
        0.3
    } else {
        0.1
    }
}

/// Alerts where this asset is the attacker weigh more
pub fn role_weight(is_source: bool) -> f64 {
    if is_source {
        1.5
    } else {
        1.0
    }
}

pub fn category_multiplier(category: AssetCategory) -> f64 {
    match category {
        AssetCategory::Critical => 2.0,
        AssetCategory::High => 1.5,
        AssetCategory::Medium => 1.0,
        AssetCategory::Low => 0.7,
        AssetCategory::Unknown => 1.0,
    }
}

pub fn exposure_multiplier(exposure: ExposureLevel) -> f64 {
    match exposure {
        ExposureLevel::InternetFacing => 1.5,
        ExposureLevel::Dmz => 1.2,
        ExposureLevel::InternalOnly => 1.0,
    }
}

/// Bonus applied when the kill-chain correlator reports the asset inside an
/// active attack chain
pub const CHAIN_BONUS: f64 = 1.3;
