//! NetWatch Detection Core
//!
//! Wires the wire decoders to the risk scorer, the SOAR engine and the
//! external alert store:
//!
//! ```text
//! packet ──> TLS / SMB / LDAP decoders ──> ThreatEvent list
//!                                             │
//!                              ┌──────────────┼──────────────┐
//!                              ▼              ▼              ▼
//!                         RiskScorer      SoarEngine     AlertSink
//! ```
//!
//! The fan-out has no feedback loop into decoding; decoder failures are
//! invisible to the packet-processing caller and nothing here terminates
//! the host process.

use chrono::{DateTime, Utc};
use netwatch_common::{
    AlertSink, DeviceInventory, KillChainCorrelator, Notifier, PacketFlow, RiskLookup,
    ThreatEvent,
};
use netwatch_decode::ldap::LDAP_PORTS;
use netwatch_decode::smb::SMB_PORTS;
use netwatch_decode::{
    LdapConfig, LdapDecoder, LdapStats, SmbConfig, SmbDecoder, SmbStats, TlsConfig, TlsDecoder,
    TlsStats,
};
use netwatch_risk::{RiskConfig, RiskScorer, ScorerStats};
use netwatch_soar::{SoarConfig, SoarEngine, SoarStats};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Detection core configuration
#[derive(Clone, Debug, Default)]
pub struct SensorConfig {
    pub tls: TlsConfig,
    pub smb: SmbConfig,
    pub ldap: LdapConfig,
    pub risk: RiskConfig,
    pub soar: SoarConfig,
    /// Idle age after which decoder session state is purged
    pub session_max_age_secs: i64,
}

impl SensorConfig {
    pub fn new() -> Self {
        Self {
            session_max_age_secs: 3600,
            ..Default::default()
        }
    }
}

/// External systems the core consults or feeds. All optional; a missing
/// collaborator degrades enrichment, never detection.
#[derive(Default)]
pub struct Collaborators {
    pub kill_chain: Option<Arc<dyn KillChainCorrelator>>,
    pub inventory: Option<Arc<dyn DeviceInventory>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub alert_sink: Option<Arc<dyn AlertSink>>,
}

/// Aggregate statistics across the core
#[derive(Debug, Clone, Serialize)]
pub struct CoreStats {
    pub packets_processed: u64,
    pub events_emitted: u64,
    pub tls: TlsStats,
    pub smb: SmbStats,
    pub ldap: LdapStats,
    pub risk: ScorerStats,
    pub soar: SoarStats,
}

/// The detection core: decoders plus the engines they feed
pub struct DetectionCore {
    tls: TlsDecoder,
    smb: SmbDecoder,
    ldap: LdapDecoder,
    risk: Arc<RiskScorer>,
    soar: Arc<SoarEngine>,
    sink: Option<Arc<dyn AlertSink>>,
    session_max_age_secs: i64,
    packets_processed: AtomicU64,
    events_emitted: AtomicU64,
}

impl DetectionCore {
    pub fn new(config: SensorConfig) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: SensorConfig, collaborators: Collaborators) -> Self {
        let mut risk = RiskScorer::new(config.risk);
        if let Some(kill_chain) = collaborators.kill_chain {
            risk = risk.with_kill_chain(kill_chain);
        }
        if let Some(inventory) = collaborators.inventory.clone() {
            risk = risk.with_inventory(inventory);
        }
        let risk = Arc::new(risk);

        let risk_lookup: Arc<dyn RiskLookup> = risk.clone();
        let mut soar = SoarEngine::new(config.soar).with_risk_lookup(risk_lookup);
        if let Some(inventory) = collaborators.inventory {
            soar = soar.with_inventory(inventory);
        }
        if let Some(notifier) = collaborators.notifier {
            soar = soar.with_notifier(notifier);
        }

        let max_age = if config.session_max_age_secs > 0 {
            config.session_max_age_secs
        } else {
            3600
        };

        Self {
            tls: TlsDecoder::new(config.tls),
            smb: SmbDecoder::new(config.smb),
            ldap: LdapDecoder::new(config.ldap),
            risk,
            soar: Arc::new(soar),
            sink: collaborators.alert_sink,
            session_max_age_secs: max_age,
            packets_processed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    /// Start the SOAR execution worker
    pub fn start(&self) {
        self.soar.clone().start();
    }

    /// Stop the SOAR worker, discarding queued executions deterministically
    pub async fn shutdown(&self) {
        self.soar.stop().await;
    }

    /// Run every decoder relevant to this packet and fan the resulting
    /// events out to the scorer, the SOAR engine and the alert sink.
    pub fn process_packet(&self, payload: &[u8], flow: &PacketFlow) -> Vec<ThreatEvent> {
        self.process_packet_at(payload, flow, Utc::now())
    }

    /// Deterministic entry point taking an explicit clock reading
    pub fn process_packet_at(
        &self,
        payload: &[u8],
        flow: &PacketFlow,
        now: DateTime<Utc>,
    ) -> Vec<ThreatEvent> {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);

        let mut events = Vec::new();

        // The TLS decoder rejects non-handshake payloads on the first byte
        events.extend(self.tls.analyze_at(payload, flow, now).events);

        if SMB_PORTS.contains(&flow.dst_port) || SMB_PORTS.contains(&flow.src_port) {
            events.extend(self.smb.analyze_at(payload, flow, now));
        }
        if LDAP_PORTS.contains(&flow.dst_port) || LDAP_PORTS.contains(&flow.src_port) {
            events.extend(self.ldap.analyze_at(payload, flow, now));
        }

        for event in &events {
            self.risk.process_event_at(event, now);
            self.soar.process_event_at(event, now);
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.persist(event) {
                    tracing::warn!(error = %e, "alert sink rejected event");
                }
            }
        }

        self.events_emitted
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        events
    }

    /// Periodic maintenance: decay idle risk scores and purge idle decoder
    /// sessions. Eventually consistent with the packet path.
    pub fn run_maintenance(&self) {
        self.run_maintenance_at(Utc::now());
    }

    /// Deterministic maintenance pass taking an explicit clock reading
    pub fn run_maintenance_at(&self, now: DateTime<Utc>) {
        self.risk.apply_decay_at(now);
        self.tls.clear_idle_sessions(self.session_max_age_secs, now);
        self.smb.clear_idle_sessions(self.session_max_age_secs, now);
        self.ldap.clear_idle_sessions(self.session_max_age_secs, now);
    }

    /// The risk scorer, for the dashboard query surface
    pub fn risk(&self) -> &Arc<RiskScorer> {
        &self.risk
    }

    /// The SOAR engine, for the approval/audit surface
    pub fn soar(&self) -> &Arc<SoarEngine> {
        &self.soar
    }

    pub fn get_stats(&self) -> CoreStats {
        CoreStats {
            packets_processed: self.packets_processed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            tls: self.tls.get_stats(),
            smb: self.smb.get_stats(),
            ldap: self.ldap.get_stats(),
            risk: self.risk.get_stats(),
            soar: self.soar.get_stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwatch_common::{Severity, ThreatType};
    use parking_lot::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<ThreatEvent>>,
    }

    impl AlertSink for RecordingSink {
        fn persist(&self, event: &ThreatEvent) -> anyhow::Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    fn smb_flow(src: &str, dst: &str) -> PacketFlow {
        PacketFlow::new(src.parse().unwrap(), dst.parse().unwrap(), 49200, 445)
    }

    /// NetBIOS + SMB2 header carrying QUERY_DIRECTORY
    fn query_directory_packet() -> Vec<u8> {
        let mut data = vec![0u8; 68];
        data[4..8].copy_from_slice(b"\xfeSMB");
        data[16..18].copy_from_slice(&0x000eu16.to_le_bytes());
        data
    }

    #[test]
    fn test_enumeration_fans_out_to_engines_and_sink() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let core = DetectionCore::with_collaborators(
            SensorConfig::new(),
            Collaborators {
                alert_sink: Some(sink.clone()),
                ..Default::default()
            },
        );

        let flow = smb_flow("10.0.0.5", "10.0.0.9");
        let packet = query_directory_packet();
        let t0 = Utc::now();

        let mut emitted = Vec::new();
        for i in 0..20 {
            let now = t0 + chrono::Duration::seconds(i);
            emitted.extend(core.process_packet_at(&packet, &flow, now));
        }

        let enumeration: Vec<_> = emitted
            .iter()
            .filter(|e| e.event_type == ThreatType::SmbEnumeration)
            .collect();
        assert_eq!(enumeration.len(), 1);
        assert_eq!(enumeration[0].severity, Severity::Medium);

        // Risk profile materialized for the source
        let profile = core.risk().get_profile("10.0.0.5").unwrap();
        assert!(profile.current_risk_score > 0.0);
        assert!(profile.is_attacker);

        // SOAR matched the reconnaissance playbook and held it for approval
        let pending = core.soar().get_pending_approvals();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].playbook, "reconnaissance");

        // Sink saw everything emitted
        assert_eq!(sink.events.lock().len(), emitted.len());

        let stats = core.get_stats();
        assert_eq!(stats.packets_processed, 20);
        assert_eq!(stats.events_emitted, emitted.len() as u64);
        assert!(stats.smb.smb2_packets >= 20);
    }

    #[test]
    fn test_non_matching_traffic_is_silent() {
        let core = DetectionCore::new(SensorConfig::new());
        let flow = PacketFlow::new(
            "10.0.0.5".parse().unwrap(),
            "93.184.216.34".parse().unwrap(),
            49200,
            80,
        );

        let events = core.process_packet(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", &flow);
        assert!(events.is_empty());
        assert_eq!(core.get_stats().packets_processed, 1);
    }

    #[test]
    fn test_maintenance_decays_and_purges() {
        let core = DetectionCore::new(SensorConfig::new());
        let flow = smb_flow("10.0.0.5", "10.0.0.9");
        let t0 = Utc::now();

        for i in 0..20 {
            core.process_packet_at(
                &query_directory_packet(),
                &flow,
                t0 + chrono::Duration::seconds(i),
            );
        }

        let before = core.risk().get_profile("10.0.0.5").unwrap().current_risk_score;
        assert!(before > 0.0);
        assert!(core.get_stats().smb.active_sessions > 0);

        core.run_maintenance_at(t0 + chrono::Duration::seconds(7300));

        let after = core.risk().get_profile("10.0.0.5").unwrap().current_risk_score;
        assert!(after < before);
        assert_eq!(core.get_stats().smb.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let core = DetectionCore::new(SensorConfig::new());
        core.start();
        core.shutdown().await;
    }
}
