//! Asset Risk Scorer
//!
//! One profile per IP address, created lazily on the first event naming the
//! IP and never deleted. Score recomputation happens on every event; decay
//! is a separate maintenance pass with no ordering dependency on the event
//! path.

use crate::weights;
use crate::{AssetCategory, ExposureLevel, RiskTrend};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ipnetwork::IpNetwork;
use netwatch_common::{
    DeviceInventory, KillChainCorrelator, RiskLookup, Severity, ThreatEvent, ThreatType,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Risk scorer configuration
#[derive(Clone, Debug)]
pub struct RiskConfig {
    /// Fraction of score shed per decay interval of idle time
    pub decay_rate: f64,
    /// Idle time before decay starts, seconds
    pub decay_interval_secs: i64,
    /// Address ranges considered internal for exposure classification
    pub internal_networks: Vec<IpNetwork>,
    /// Bound on per-asset alert history
    pub alert_history_size: usize,
    /// Bound on per-asset score samples kept for trend analysis
    pub score_history_size: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.1,
            decay_interval_secs: 3600,
            internal_networks: vec![
                "10.0.0.0/8".parse().unwrap(),
                "172.16.0.0/12".parse().unwrap(),
                "192.168.0.0/16".parse().unwrap(),
            ],
            alert_history_size: 1000,
            score_history_size: 100,
        }
    }
}

/// One alert's contribution to a profile
#[derive(Debug, Clone)]
struct AlertRecord {
    timestamp: DateTime<Utc>,
    event_type: ThreatType,
    severity: Severity,
    /// True when this asset was the attacker
    is_source: bool,
}

/// Internal per-asset state
#[derive(Debug, Clone)]
struct Profile {
    ip_address: String,
    hostname: Option<String>,
    mac_address: Option<String>,
    device_type: Option<String>,
    category: AssetCategory,
    exposure: ExposureLevel,
    current_risk_score: f64,
    max_risk_score: f64,
    risk_trend: RiskTrend,
    total_alerts: u64,
    alerts_24h: u64,
    alerts_7d: u64,
    alert_types: HashMap<String, u64>,
    is_attacker: bool,
    is_victim: bool,
    attack_chain_count: usize,
    kill_chain_stage: Option<String>,
    last_seen: DateTime<Utc>,
    last_alert: Option<DateTime<Utc>>,
}

/// Read-only profile snapshot served to dashboards
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSnapshot {
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub device_type: Option<String>,
    pub category: AssetCategory,
    pub exposure: ExposureLevel,
    pub current_risk_score: f64,
    pub max_risk_score: f64,
    pub risk_trend: RiskTrend,
    pub risk_level: &'static str,
    pub total_alerts: u64,
    pub alerts_24h: u64,
    pub alerts_7d: u64,
    pub alert_types: HashMap<String, u64>,
    pub is_attacker: bool,
    pub is_victim: bool,
    pub attack_chain_count: usize,
    pub kill_chain_stage: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub last_alert: Option<DateTime<Utc>>,
}

fn risk_level(score: f64) -> &'static str {
    if score >= 80.0 {
        "CRITICAL"
    } else if score >= 60.0 {
        "HIGH"
    } else if score >= 40.0 {
        "MEDIUM"
    } else if score >= 20.0 {
        "LOW"
    } else {
        "MINIMAL"
    }
}

impl Profile {
    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            ip_address: self.ip_address.clone(),
            hostname: self.hostname.clone(),
            mac_address: self.mac_address.clone(),
            device_type: self.device_type.clone(),
            category: self.category,
            exposure: self.exposure,
            current_risk_score: (self.current_risk_score * 10.0).round() / 10.0,
            max_risk_score: (self.max_risk_score * 10.0).round() / 10.0,
            risk_trend: self.risk_trend,
            risk_level: risk_level(self.current_risk_score),
            total_alerts: self.total_alerts,
            alerts_24h: self.alerts_24h,
            alerts_7d: self.alerts_7d,
            alert_types: self.alert_types.clone(),
            is_attacker: self.is_attacker,
            is_victim: self.is_victim,
            attack_chain_count: self.attack_chain_count,
            kill_chain_stage: self.kill_chain_stage.clone(),
            last_seen: self.last_seen,
            last_alert: self.last_alert,
        }
    }
}

/// Bucketed risk distribution across all profiles
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub total_assets: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub minimal: usize,
    pub attackers: usize,
    pub victims: usize,
    pub increasing_risk: usize,
    pub avg_risk_score: f64,
}

/// Per-asset risk scoring engine
pub struct RiskScorer {
    config: RiskConfig,
    profiles: DashMap<String, Profile>,
    alert_history: DashMap<String, VecDeque<AlertRecord>>,
    score_history: DashMap<String, VecDeque<f64>>,
    kill_chain: Option<Arc<dyn KillChainCorrelator>>,
    inventory: Option<Arc<dyn DeviceInventory>>,
    events_processed: AtomicU64,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            profiles: DashMap::new(),
            alert_history: DashMap::new(),
            score_history: DashMap::new(),
            kill_chain: None,
            inventory: None,
            events_processed: AtomicU64::new(0),
        }
    }

    /// Attach the external kill-chain correlator
    pub fn with_kill_chain(mut self, kill_chain: Arc<dyn KillChainCorrelator>) -> Self {
        self.kill_chain = Some(kill_chain);
        self
    }

    /// Attach the external device inventory
    pub fn with_inventory(mut self, inventory: Arc<dyn DeviceInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Fold one event into the profiles of both endpoints
    pub fn process_event(&self, event: &ThreatEvent) {
        self.process_event_at(event, Utc::now());
    }

    /// Deterministic entry point taking an explicit clock reading
    pub fn process_event_at(&self, event: &ThreatEvent, now: DateTime<Utc>) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);

        if !event.source_ip.is_empty() {
            self.update_profile(
                &event.source_ip,
                AlertRecord {
                    timestamp: now,
                    event_type: event.event_type.clone(),
                    severity: event.severity,
                    is_source: true,
                },
                now,
            );
        }

        if !event.destination_ip.is_empty() && event.destination_ip != event.source_ip {
            self.update_profile(
                &event.destination_ip,
                AlertRecord {
                    timestamp: now,
                    event_type: event.event_type.clone(),
                    severity: event.severity,
                    is_source: false,
                },
                now,
            );
        }
    }

    fn update_profile(&self, ip: &str, record: AlertRecord, now: DateTime<Utc>) {
        {
            let mut history = self.alert_history.entry(ip.to_string()).or_default();
            history.push_back(record.clone());
            while history.len() > self.config.alert_history_size {
                history.pop_front();
            }
        }

        let mut profile = self
            .profiles
            .entry(ip.to_string())
            .or_insert_with(|| self.create_profile(ip, now));

        profile.total_alerts += 1;
        profile.last_alert = Some(now);
        profile.last_seen = now;
        *profile
            .alert_types
            .entry(record.event_type.as_str().to_string())
            .or_insert(0) += 1;

        if record.is_source {
            profile.is_attacker = true;
        } else {
            profile.is_victim = true;
        }

        self.recalculate(&mut profile, now);
        self.update_trend(ip, &mut profile);
    }

    fn create_profile(&self, ip: &str, now: DateTime<Utc>) -> Profile {
        let mut hostname = None;
        let mut mac_address = None;
        let mut device_type = None;
        let mut category = AssetCategory::Unknown;

        if let Some(inventory) = &self.inventory {
            match inventory.device_by_ip(ip) {
                Ok(Some(device)) => {
                    hostname = device.hostname;
                    mac_address = device.mac_address;
                    if let Some(dt) = &device.device_type {
                        category = AssetCategory::from_device_type(dt);
                    }
                    device_type = device.device_type;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(ip, error = %e, "device inventory lookup failed");
                }
            }
        }

        let exposure = if self.is_internal_ip(ip) {
            ExposureLevel::InternalOnly
        } else {
            ExposureLevel::InternetFacing
        };

        Profile {
            ip_address: ip.to_string(),
            hostname,
            mac_address,
            device_type,
            category,
            exposure,
            current_risk_score: 0.0,
            max_risk_score: 0.0,
            risk_trend: RiskTrend::Stable,
            total_alerts: 0,
            alerts_24h: 0,
            alerts_7d: 0,
            alert_types: HashMap::new(),
            is_attacker: false,
            is_victim: false,
            attack_chain_count: 0,
            kill_chain_stage: None,
            last_seen: now,
            last_alert: None,
        }
    }

    fn is_internal_ip(&self, ip: &str) -> bool {
        match ip.parse::<IpAddr>() {
            Ok(addr) => self
                .config
                .internal_networks
                .iter()
                .any(|net| net.contains(addr)),
            Err(_) => false,
        }
    }

    /// score = Σ type·severity·time·role, scaled by category, exposure and
    /// attack-chain involvement, clamped to [0, 100]. The running maximum
    /// never decays.
    fn recalculate(&self, profile: &mut Profile, now: DateTime<Utc>) {
        let mut score = 0.0;
        let mut alerts_24h = 0;
        let mut alerts_7d = 0;

        if let Some(history) = self.alert_history.get(&profile.ip_address) {
            for record in history.iter() {
                let age = (now - record.timestamp).num_seconds();
                score += weights::type_weight(&record.event_type)
                    * weights::severity_weight(record.severity)
                    * weights::time_weight(age)
                    * weights::role_weight(record.is_source);

                if age < 86_400 {
                    alerts_24h += 1;
                }
                if age < 604_800 {
                    alerts_7d += 1;
                }
            }
        }

        score *= weights::category_multiplier(profile.category);
        score *= weights::exposure_multiplier(profile.exposure);

        if let Some(kill_chain) = &self.kill_chain {
            match kill_chain.chains_for_ip(&profile.ip_address) {
                Ok(chains) => {
                    profile.attack_chain_count = chains.len();
                    if !chains.is_empty() {
                        profile.kill_chain_stage = chains
                            .iter()
                            .filter_map(|c| c.max_stage.clone())
                            .max();
                        score *= weights::CHAIN_BONUS;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        ip = %profile.ip_address,
                        error = %e,
                        "kill chain lookup failed"
                    );
                }
            }
        }

        profile.alerts_24h = alerts_24h;
        profile.alerts_7d = alerts_7d;
        profile.current_risk_score = score.min(100.0);
        if profile.current_risk_score > profile.max_risk_score {
            profile.max_risk_score = profile.current_risk_score;
        }
    }

    /// Mean of the 5 newest samples against the mean of everything older;
    /// a ±20% swing flips the trend.
    fn update_trend(&self, ip: &str, profile: &mut Profile) {
        let mut samples = self.score_history.entry(ip.to_string()).or_default();
        samples.push_back(profile.current_risk_score);
        while samples.len() > self.config.score_history_size {
            samples.pop_front();
        }

        if samples.len() < 3 {
            profile.risk_trend = RiskTrend::Stable;
            return;
        }

        let split = samples.len().saturating_sub(5);
        let older: Vec<f64> = samples.iter().take(split).copied().collect();
        let recent: Vec<f64> = samples.iter().skip(split).copied().collect();

        if older.is_empty() {
            profile.risk_trend = RiskTrend::Stable;
            return;
        }

        let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
        let older_avg = older.iter().sum::<f64>() / older.len() as f64;

        profile.risk_trend = if recent_avg > older_avg * 1.2 {
            RiskTrend::Increasing
        } else if recent_avg < older_avg * 0.8 {
            RiskTrend::Decreasing
        } else {
            RiskTrend::Stable
        };
    }

    /// Walk idle profiles toward zero. Standalone maintenance pass; decay
    /// only reduces scores, so racing with event processing is harmless.
    pub fn apply_decay(&self) {
        self.apply_decay_at(Utc::now());
    }

    /// Deterministic decay pass taking an explicit clock reading
    pub fn apply_decay_at(&self, now: DateTime<Utc>) {
        for mut entry in self.profiles.iter_mut() {
            let Some(last_alert) = entry.last_alert else {
                continue;
            };
            let idle = (now - last_alert).num_seconds();
            if idle <= self.config.decay_interval_secs {
                continue;
            }

            let factor = 1.0
                - self.config.decay_rate * (idle as f64 / self.config.decay_interval_secs as f64);
            let factor = factor.clamp(0.0, 1.0);
            entry.current_risk_score *= factor;
        }
    }

    /// Snapshot one asset's profile
    pub fn get_profile(&self, ip: &str) -> Option<ProfileSnapshot> {
        self.profiles.get(ip).map(|p| p.snapshot())
    }

    /// All assets at or above a score threshold, highest first
    pub fn get_high_risk_assets(&self, min_score: f64) -> Vec<ProfileSnapshot> {
        let mut assets: Vec<ProfileSnapshot> = self
            .profiles
            .iter()
            .filter(|p| p.current_risk_score >= min_score)
            .map(|p| p.snapshot())
            .collect();
        assets.sort_by(|a, b| {
            b.current_risk_score
                .partial_cmp(&a.current_risk_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        assets
    }

    /// Top N assets by score
    pub fn get_top_risks(&self, limit: usize) -> Vec<ProfileSnapshot> {
        let mut assets = self.get_high_risk_assets(f64::MIN);
        assets.truncate(limit);
        assets
    }

    /// Bucketed distribution across all profiles
    pub fn get_risk_summary(&self) -> RiskSummary {
        let mut summary = RiskSummary {
            total_assets: 0,
            critical: 0,
            high: 0,
            medium: 0,
            low: 0,
            minimal: 0,
            attackers: 0,
            victims: 0,
            increasing_risk: 0,
            avg_risk_score: 0.0,
        };

        let mut score_sum = 0.0;
        for profile in self.profiles.iter() {
            summary.total_assets += 1;
            score_sum += profile.current_risk_score;

            match profile.current_risk_score {
                s if s >= 80.0 => summary.critical += 1,
                s if s >= 60.0 => summary.high += 1,
                s if s >= 40.0 => summary.medium += 1,
                s if s >= 20.0 => summary.low += 1,
                _ => summary.minimal += 1,
            }

            if profile.is_attacker {
                summary.attackers += 1;
            }
            if profile.is_victim {
                summary.victims += 1;
            }
            if profile.risk_trend == RiskTrend::Increasing {
                summary.increasing_risk += 1;
            }
        }

        if summary.total_assets > 0 {
            summary.avg_risk_score = score_sum / summary.total_assets as f64;
        }
        summary
    }

    /// Scorer statistics for observability
    pub fn get_stats(&self) -> ScorerStats {
        ScorerStats {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            total_profiles: self.profiles.len(),
            alerts_tracked: self.alert_history.iter().map(|h| h.len() as u64).sum(),
        }
    }
}

/// Scorer statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ScorerStats {
    pub events_processed: u64,
    pub total_profiles: usize,
    pub alerts_tracked: u64,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskLookup for RiskScorer {
    fn current_score(&self, ip: &str) -> Option<f64> {
        self.profiles.get(ip).map(|p| p.current_risk_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwatch_common::{AttackChain, DeviceRecord};

    fn event(event_type: ThreatType, severity: Severity, src: &str, dst: &str) -> ThreatEvent {
        ThreatEvent::new(event_type, severity, src, dst, "test event")
    }

    #[test]
    fn test_critical_ransomware_clamps_to_100() {
        let scorer = RiskScorer::default();
        let now = Utc::now();

        // 25.0 (type) x 15.0 (severity) x 1.0 (fresh) x 1.5 (attacker)
        // x 1.0 (UNKNOWN category) x 1.0 (internal) = 562.5, clamped
        scorer.process_event_at(
            &event(
                ThreatType::RansomwareDetected,
                Severity::Critical,
                "192.168.1.50",
                "192.168.1.60",
            ),
            now,
        );

        let profile = scorer.get_profile("192.168.1.50").unwrap();
        assert_eq!(profile.current_risk_score, 100.0);
        assert_eq!(profile.exposure, ExposureLevel::InternalOnly);
        assert_eq!(profile.category, AssetCategory::Unknown);
        assert!(profile.is_attacker);
    }

    #[test]
    fn test_exact_arithmetic_below_clamp() {
        let scorer = RiskScorer::default();
        let now = Utc::now();

        // 4.0 x 1.0 x 1.0 x 1.5 = 6.0 for the attacker
        scorer.process_event_at(
            &event(
                ThreatType::ConnectionFlood,
                Severity::Low,
                "192.168.1.50",
                "192.168.1.60",
            ),
            now,
        );

        let attacker = scorer.get_profile("192.168.1.50").unwrap();
        assert!((attacker.current_risk_score - 6.0).abs() < 1e-9);

        // Victim role drops the 1.5 multiplier
        let victim = scorer.get_profile("192.168.1.60").unwrap();
        assert!((victim.current_risk_score - 4.0).abs() < 1e-9);
        assert!(victim.is_victim);
        assert!(!victim.is_attacker);
    }

    #[test]
    fn test_internet_facing_multiplier() {
        let scorer = RiskScorer::default();
        let now = Utc::now();

        scorer.process_event_at(
            &event(
                ThreatType::ConnectionFlood,
                Severity::Low,
                "203.0.113.7",
                "192.168.1.60",
            ),
            now,
        );

        // 4.0 x 1.0 x 1.0 x 1.5 x 1.0 x 1.5 (internet-facing) = 9.0
        let profile = scorer.get_profile("203.0.113.7").unwrap();
        assert_eq!(profile.exposure, ExposureLevel::InternetFacing);
        assert!((profile.current_risk_score - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_self_directed_event_updates_one_profile() {
        let scorer = RiskScorer::default();
        scorer.process_event_at(
            &event(
                ThreatType::PortScan,
                Severity::Low,
                "192.168.1.50",
                "192.168.1.50",
            ),
            Utc::now(),
        );
        assert_eq!(scorer.get_stats().total_profiles, 1);
    }

    #[test]
    fn test_decay_strictly_decreases_and_stays_non_negative() {
        let config = RiskConfig::default();
        let interval = config.decay_interval_secs;
        let scorer = RiskScorer::new(config);
        let t0 = Utc::now();

        scorer.process_event_at(
            &event(
                ThreatType::BruteForce,
                Severity::High,
                "192.168.1.50",
                "192.168.1.60",
            ),
            t0,
        );
        let before = scorer.get_profile("192.168.1.50").unwrap().current_risk_score;
        assert!(before > 0.0);

        scorer.apply_decay_at(t0 + chrono::Duration::seconds(interval * 2));
        let after = scorer.get_profile("192.168.1.50").unwrap().current_risk_score;
        assert!(after < before);
        assert!(after >= 0.0);

        // Far enough out the factor floors at zero, never negative
        scorer.apply_decay_at(t0 + chrono::Duration::seconds(interval * 100));
        let floored = scorer.get_profile("192.168.1.50").unwrap().current_risk_score;
        assert_eq!(floored, 0.0);
    }

    #[test]
    fn test_decay_skips_recently_alerted() {
        let scorer = RiskScorer::default();
        let t0 = Utc::now();

        scorer.process_event_at(
            &event(
                ThreatType::BruteForce,
                Severity::High,
                "192.168.1.50",
                "192.168.1.60",
            ),
            t0,
        );
        let before = scorer.get_profile("192.168.1.50").unwrap().current_risk_score;

        scorer.apply_decay_at(t0 + chrono::Duration::seconds(60));
        let after = scorer.get_profile("192.168.1.50").unwrap().current_risk_score;
        assert_eq!(before, after);
    }

    #[test]
    fn test_trend_increases_with_escalation() {
        let scorer = RiskScorer::default();
        let t0 = Utc::now();

        for i in 0..4 {
            scorer.process_event_at(
                &event(
                    ThreatType::UnusualPacketSize,
                    Severity::Low,
                    "192.168.1.50",
                    "192.168.1.60",
                ),
                t0 + chrono::Duration::seconds(i),
            );
        }
        for i in 4..10 {
            scorer.process_event_at(
                &event(
                    ThreatType::LateralMovement,
                    Severity::High,
                    "192.168.1.50",
                    "192.168.1.60",
                ),
                t0 + chrono::Duration::seconds(i),
            );
        }

        let profile = scorer.get_profile("192.168.1.50").unwrap();
        assert_eq!(profile.risk_trend, RiskTrend::Increasing);
    }

    struct FakeChains;
    impl KillChainCorrelator for FakeChains {
        fn chains_for_ip(&self, _ip: &str) -> anyhow::Result<Vec<AttackChain>> {
            Ok(vec![AttackChain {
                chain_id: "chain-1".into(),
                max_stage: Some("lateral_movement".into()),
            }])
        }
    }

    #[test]
    fn test_kill_chain_bonus() {
        let scorer = RiskScorer::default().with_kill_chain(Arc::new(FakeChains));
        scorer.process_event_at(
            &event(
                ThreatType::ConnectionFlood,
                Severity::Low,
                "192.168.1.50",
                "192.168.1.60",
            ),
            Utc::now(),
        );

        // 6.0 x 1.3 chain bonus
        let profile = scorer.get_profile("192.168.1.50").unwrap();
        assert!((profile.current_risk_score - 7.8).abs() < 1e-9);
        assert_eq!(profile.attack_chain_count, 1);
        assert_eq!(profile.kill_chain_stage.as_deref(), Some("lateral_movement"));
    }

    struct FailingChains;
    impl KillChainCorrelator for FailingChains {
        fn chains_for_ip(&self, _ip: &str) -> anyhow::Result<Vec<AttackChain>> {
            anyhow::bail!("correlator offline")
        }
    }

    #[test]
    fn test_collaborator_failure_degrades_silently() {
        let scorer = RiskScorer::default().with_kill_chain(Arc::new(FailingChains));
        scorer.process_event_at(
            &event(
                ThreatType::ConnectionFlood,
                Severity::Low,
                "192.168.1.50",
                "192.168.1.60",
            ),
            Utc::now(),
        );

        // No bonus, no error
        let profile = scorer.get_profile("192.168.1.50").unwrap();
        assert!((profile.current_risk_score - 6.0).abs() < 1e-9);
    }

    struct FakeInventory;
    impl DeviceInventory for FakeInventory {
        fn device_by_ip(&self, _ip: &str) -> anyhow::Result<Option<DeviceRecord>> {
            Ok(Some(DeviceRecord {
                hostname: Some("dc01".into()),
                mac_address: Some("00:11:22:33:44:55".into()),
                device_type: Some("Domain Controller".into()),
                vendor: None,
            }))
        }
    }

    #[test]
    fn test_inventory_categorization_scales_score() {
        let scorer = RiskScorer::default().with_inventory(Arc::new(FakeInventory));
        scorer.process_event_at(
            &event(
                ThreatType::ConnectionFlood,
                Severity::Low,
                "192.168.1.50",
                "192.168.1.60",
            ),
            Utc::now(),
        );

        // 6.0 x 2.0 CRITICAL category multiplier
        let profile = scorer.get_profile("192.168.1.50").unwrap();
        assert_eq!(profile.category, AssetCategory::Critical);
        assert_eq!(profile.hostname.as_deref(), Some("dc01"));
        assert!((profile.current_risk_score - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_risks_ordering_and_summary() {
        let scorer = RiskScorer::default();
        let now = Utc::now();

        scorer.process_event_at(
            &event(
                ThreatType::RansomwareDetected,
                Severity::Critical,
                "192.168.1.50",
                "192.168.1.60",
            ),
            now,
        );
        scorer.process_event_at(
            &event(
                ThreatType::UnusualPacketSize,
                Severity::Low,
                "192.168.1.70",
                "192.168.1.80",
            ),
            now,
        );

        let top = scorer.get_top_risks(2);
        assert_eq!(top.len(), 2);
        assert!(top[0].current_risk_score >= top[1].current_risk_score);
        assert_eq!(top[0].current_risk_score, 100.0);

        let summary = scorer.get_risk_summary();
        assert_eq!(summary.total_assets, 4);
        assert_eq!(summary.attackers, 2);
        assert_eq!(summary.victims, 2);
        assert!(summary.critical >= 1);
        assert!(summary.avg_risk_score > 0.0);

        let high = scorer.get_high_risk_assets(50.0);
        assert!(high.iter().all(|p| p.current_risk_score >= 50.0));
    }
}
