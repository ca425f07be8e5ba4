//! SMB Protocol Decoder
//!
//! Deep inspection for SMB1/SMB2 file-sharing traffic: administrative share
//! access, sensitive file access (NTDS.dit, registry hives, LSASS dumps),
//! lateral-movement command bursts and directory-enumeration volume.
//!
//! TCP segments are not reassembled; each call sees one packet's payload and
//! short-circuits to "no events" when a command's body is not fully present.

use crate::read_u16_le;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use netwatch_common::{PacketFlow, Severity, ThreatEvent, ThreatType};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ports carrying SMB traffic
pub const SMB_PORTS: &[u16] = &[445, 139];

const SMB1_SIGNATURE: &[u8] = b"\xffSMB";
const SMB2_SIGNATURE: &[u8] = b"\xfeSMB";

const SMB2_HEADER_LEN: usize = 64;
const SMB2_COMMAND_OFFSET: usize = 12;

const SMB2_TREE_CONNECT: u16 = 0x0003;
const SMB2_CREATE: u16 = 0x0005;
const SMB2_QUERY_DIRECTORY: u16 = 0x000e;

/// Administrative shares whose access is worth an alert
const ADMIN_SHARES: &[&str] = &[
    "c$", "admin$", "ipc$", "d$", "e$", "print$", "sysvol", "netlogon",
];

/// Registry hive paths holding credential material
const REGISTRY_HIVE_PATHS: &[&str] = &[
    "system32\\config\\sam",
    "system32\\config\\system",
    "system32\\config\\security",
];

/// SMB decoder configuration; thresholds default to the tuned production
/// values but are exposed for site-specific adjustment.
#[derive(Clone, Debug)]
pub struct SmbConfig {
    /// Emit an event for any SMB1 traffic
    pub flag_smb1: bool,
    /// QUERY_DIRECTORY count that constitutes enumeration
    pub enumeration_threshold: usize,
    /// Window for the enumeration count, seconds
    pub enumeration_window_secs: i64,
    /// TREE_CONNECT count in the command window that signals lateral movement
    pub burst_tree_connects: usize,
    /// CREATE count in the command window that signals lateral movement
    pub burst_creates: usize,
    /// How many trailing commands the burst pattern inspects
    pub command_window: usize,
    /// Bound on per-session command history
    pub command_history: usize,
}

impl Default for SmbConfig {
    fn default() -> Self {
        Self {
            flag_smb1: true,
            enumeration_threshold: 20,
            enumeration_window_secs: 60,
            burst_tree_connects: 5,
            burst_creates: 10,
            command_window: 20,
            command_history: 100,
        }
    }
}

/// Per-(source, destination) command accumulator
struct SmbSession {
    commands: VecDeque<(DateTime<Utc>, u16)>,
    shares: VecDeque<String>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SmbCounters {
    smb_packets: AtomicU64,
    smb1_packets: AtomicU64,
    smb2_packets: AtomicU64,
    admin_share_access: AtomicU64,
    sensitive_file_access: AtomicU64,
    enumeration_events: AtomicU64,
    lateral_movement_events: AtomicU64,
}

/// Decoder statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SmbStats {
    pub smb_packets: u64,
    pub smb1_packets: u64,
    pub smb2_packets: u64,
    pub admin_share_access: u64,
    pub sensitive_file_access: u64,
    pub enumeration_events: u64,
    pub lateral_movement_events: u64,
    pub active_sessions: u64,
    pub tracked_sources: u64,
}

/// SMB command decoder with per-flow pattern state
pub struct SmbDecoder {
    config: SmbConfig,
    sessions: DashMap<(IpAddr, IpAddr), SmbSession>,
    enum_tracker: DashMap<IpAddr, VecDeque<DateTime<Utc>>>,
    counters: SmbCounters,
}

impl SmbDecoder {
    pub fn new(config: SmbConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            enum_tracker: DashMap::new(),
            counters: SmbCounters::default(),
        }
    }

    /// Analyze one packet payload from an SMB port
    pub fn analyze(&self, data: &[u8], flow: &PacketFlow) -> Vec<ThreatEvent> {
        self.analyze_at(data, flow, Utc::now())
    }

    /// Deterministic entry point taking an explicit clock reading
    pub fn analyze_at(
        &self,
        data: &[u8],
        flow: &PacketFlow,
        now: DateTime<Utc>,
    ) -> Vec<ThreatEvent> {
        if data.len() < 8 {
            return Vec::new();
        }

        // Signature may sit behind a 4-byte NetBIOS session header
        if data[4..8] == *SMB2_SIGNATURE {
            self.parse_smb2(data, 4, flow, now)
        } else if data[4..8] == *SMB1_SIGNATURE {
            self.parse_smb1(data, 4, flow)
        } else if data[0..4] == *SMB2_SIGNATURE {
            self.parse_smb2(data, 0, flow, now)
        } else if data[0..4] == *SMB1_SIGNATURE {
            self.parse_smb1(data, 0, flow)
        } else {
            Vec::new()
        }
    }

    /// SMB1 is deprecated outright; no command parsing beyond the flag.
    fn parse_smb1(&self, data: &[u8], offset: usize, flow: &PacketFlow) -> Vec<ThreatEvent> {
        self.counters.smb_packets.fetch_add(1, Ordering::Relaxed);
        self.counters.smb1_packets.fetch_add(1, Ordering::Relaxed);

        if !self.config.flag_smb1 || data.len() < offset + 32 {
            return Vec::new();
        }

        let command = data[offset + 4];
        vec![ThreatEvent::new(
            ThreatType::Smb1UsageDetected,
            Severity::Low,
            flow.src_ip.to_string(),
            flow.dst_ip.to_string(),
            "SMB1 protocol usage detected (deprecated and insecure)",
        )
        .with_detail("command", command)
        .with_detail("recommendation", "Disable SMB1 and use SMB2/3")]
    }

    fn parse_smb2(
        &self,
        data: &[u8],
        offset: usize,
        flow: &PacketFlow,
        now: DateTime<Utc>,
    ) -> Vec<ThreatEvent> {
        self.counters.smb_packets.fetch_add(1, Ordering::Relaxed);
        self.counters.smb2_packets.fetch_add(1, Ordering::Relaxed);

        if data.len() < offset + SMB2_HEADER_LEN {
            return Vec::new();
        }

        let Some(command) = read_u16_le(data, offset + SMB2_COMMAND_OFFSET) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let payload = &data[offset + SMB2_HEADER_LEN..];

        {
            let mut session = self
                .sessions
                .entry((flow.src_ip, flow.dst_ip))
                .or_insert_with(|| SmbSession {
                    commands: VecDeque::new(),
                    shares: VecDeque::new(),
                    last_seen: now,
                });

            session.commands.push_back((now, command));
            while session.commands.len() > self.config.command_history {
                session.commands.pop_front();
            }
            session.last_seen = now;

            match command {
                SMB2_TREE_CONNECT => {
                    if let Some(event) = self.check_tree_connect(payload, flow, &mut session) {
                        events.push(event);
                    }
                }
                SMB2_CREATE => {
                    if let Some(event) = self.check_file_create(payload, flow) {
                        events.push(event);
                    }
                }
                _ => {}
            }

            if let Some(event) = self.check_attack_pattern(&session, flow) {
                events.push(event);
            }
        }

        if command == SMB2_QUERY_DIRECTORY {
            if let Some(event) = self.check_enumeration(flow, now) {
                events.push(event);
            }
        }

        events
    }

    /// TREE_CONNECT payloads carry a UNC path; a match against the
    /// administrative share set is an immediate alert.
    fn check_tree_connect(
        &self,
        payload: &[u8],
        flow: &PacketFlow,
        session: &mut SmbSession,
    ) -> Option<ThreatEvent> {
        let share_path = extract_unc_path(payload)?;
        let share_name = share_path
            .rsplit('\\')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        session.shares.push_back(share_name.clone());
        while session.shares.len() > 100 {
            session.shares.pop_front();
        }

        if !ADMIN_SHARES.contains(&share_name.as_str()) {
            return None;
        }

        self.counters
            .admin_share_access
            .fetch_add(1, Ordering::Relaxed);

        let severity = if share_name == "ipc$" {
            Severity::Medium
        } else {
            Severity::High
        };

        Some(
            ThreatEvent::new(
                ThreatType::SmbAdminShareAccess,
                severity,
                flow.src_ip.to_string(),
                flow.dst_ip.to_string(),
                format!("Access to administrative share: {share_path}"),
            )
            .with_detail("share_name", share_name)
            .with_detail("full_path", share_path),
        )
    }

    /// CREATE payloads carry the target filename; credential-store paths are
    /// flagged CRITICAL.
    fn check_file_create(&self, payload: &[u8], flow: &PacketFlow) -> Option<ThreatEvent> {
        let filename = extract_filename(payload)?;
        let lower = filename.to_lowercase();

        let (event_type, description) = if lower.contains("ntds.dit") {
            (
                ThreatType::NtdsDitAccess,
                "Access to NTDS.dit (Active Directory database)".to_string(),
            )
        } else if REGISTRY_HIVE_PATHS.iter().any(|p| lower.contains(p)) {
            (
                ThreatType::RegistryHiveAccess,
                format!("Access to sensitive registry hive: {filename}"),
            )
        } else if lower.contains("lsass") && lower.contains(".dmp") {
            (
                ThreatType::LsassDumpAccess,
                "Access to LSASS memory dump".to_string(),
            )
        } else {
            return None;
        };

        self.counters
            .sensitive_file_access
            .fetch_add(1, Ordering::Relaxed);

        Some(
            ThreatEvent::new(
                event_type,
                Severity::Critical,
                flow.src_ip.to_string(),
                flow.dst_ip.to_string(),
                description,
            )
            .with_detail("filename", filename),
        )
    }

    /// Tree-connect-then-create burst across the trailing command window.
    fn check_attack_pattern(
        &self,
        session: &SmbSession,
        flow: &PacketFlow,
    ) -> Option<ThreatEvent> {
        if session.commands.len() < 5 {
            return None;
        }

        let window = session
            .commands
            .iter()
            .rev()
            .take(self.config.command_window);
        let mut tree_connects = 0usize;
        let mut creates = 0usize;
        for (_, cmd) in window {
            match *cmd {
                SMB2_TREE_CONNECT => tree_connects += 1,
                SMB2_CREATE => creates += 1,
                _ => {}
            }
        }

        if tree_connects < self.config.burst_tree_connects
            || creates < self.config.burst_creates
        {
            return None;
        }

        self.counters
            .lateral_movement_events
            .fetch_add(1, Ordering::Relaxed);

        Some(
            ThreatEvent::new(
                ThreatType::SmbLateralMovementPattern,
                Severity::High,
                flow.src_ip.to_string(),
                flow.dst_ip.to_string(),
                format!(
                    "SMB lateral movement pattern: {tree_connects} share connections, {creates} file operations"
                ),
            )
            .with_detail("tree_connects", tree_connects)
            .with_detail("file_creates", creates)
            .with_detail(
                "recent_shares",
                session.shares.iter().cloned().collect::<Vec<_>>(),
            ),
        )
    }

    /// Directory-query volume per source. Fires exactly when the windowed
    /// count reaches the threshold so a sustained burst yields one event.
    fn check_enumeration(&self, flow: &PacketFlow, now: DateTime<Utc>) -> Option<ThreatEvent> {
        let mut tracker = self.enum_tracker.entry(flow.src_ip).or_default();
        tracker.push_back(now);
        while tracker.len() > 200 {
            tracker.pop_front();
        }

        let window_start = now - chrono::Duration::seconds(self.config.enumeration_window_secs);
        let recent = tracker.iter().filter(|t| **t >= window_start).count();

        if recent != self.config.enumeration_threshold {
            return None;
        }

        self.counters
            .enumeration_events
            .fetch_add(1, Ordering::Relaxed);

        Some(
            ThreatEvent::new(
                ThreatType::SmbEnumeration,
                Severity::Medium,
                flow.src_ip.to_string(),
                flow.dst_ip.to_string(),
                format!(
                    "SMB enumeration detected: {recent} directory queries in {} seconds",
                    self.config.enumeration_window_secs
                ),
            )
            .with_detail("query_count", recent)
            .with_detail("window_seconds", self.config.enumeration_window_secs),
        )
    }

    /// Drop sessions and trackers idle beyond `max_age_secs`
    pub fn clear_idle_sessions(&self, max_age_secs: i64, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(max_age_secs);
        self.sessions.retain(|_, s| s.last_seen >= cutoff);
        self.enum_tracker
            .retain(|_, t| t.back().map(|ts| *ts >= cutoff).unwrap_or(false));
    }

    pub fn get_stats(&self) -> SmbStats {
        SmbStats {
            smb_packets: self.counters.smb_packets.load(Ordering::Relaxed),
            smb1_packets: self.counters.smb1_packets.load(Ordering::Relaxed),
            smb2_packets: self.counters.smb2_packets.load(Ordering::Relaxed),
            admin_share_access: self.counters.admin_share_access.load(Ordering::Relaxed),
            sensitive_file_access: self
                .counters
                .sensitive_file_access
                .load(Ordering::Relaxed),
            enumeration_events: self.counters.enumeration_events.load(Ordering::Relaxed),
            lateral_movement_events: self
                .counters
                .lateral_movement_events
                .load(Ordering::Relaxed),
            active_sessions: self.sessions.len() as u64,
            tracked_sources: self.enum_tracker.len() as u64,
        }
    }
}

impl Default for SmbDecoder {
    fn default() -> Self {
        Self::new(SmbConfig::default())
    }
}

/// Find a `\\server\share` UNC path, trying UTF-16LE first then UTF-8.
fn extract_unc_path(data: &[u8]) -> Option<String> {
    for text in [decode_utf16le(data), String::from_utf8_lossy(data).into_owned()] {
        if let Some(start) = text.find("\\\\") {
            let rest = &text[start..];
            let end = rest.find('\0').unwrap_or(rest.len());
            let path: String = rest[..end].chars().take(200).collect();
            if path.len() > 4 {
                return Some(path);
            }
        }
    }
    None
}

/// Pull a plausible filename out of a CREATE payload (UTF-16LE).
fn extract_filename(data: &[u8]) -> Option<String> {
    let text = decode_utf16le(data);
    text.split('\0')
        .map(str::trim)
        .find(|part| {
            part.len() > 3 && (part.contains('\\') || part.contains('/') || part.contains('.'))
        })
        .map(str::to_string)
}

fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flow(src: &str, dst: &str) -> PacketFlow {
        PacketFlow::new(src.parse().unwrap(), dst.parse().unwrap(), 49200, 445)
    }

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    /// NetBIOS header + SMB2 header with the given command + payload
    fn smb2_packet(command: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 4 + SMB2_HEADER_LEN];
        data[4..8].copy_from_slice(SMB2_SIGNATURE);
        data[4 + SMB2_COMMAND_OFFSET..4 + SMB2_COMMAND_OFFSET + 2]
            .copy_from_slice(&command.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn smb1_packet() -> Vec<u8> {
        let mut data = vec![0u8; 4 + 32];
        data[4..8].copy_from_slice(SMB1_SIGNATURE);
        data[8] = 0x72; // NEGOTIATE
        data
    }

    #[test]
    fn test_smb1_flagged() {
        let decoder = SmbDecoder::default();
        let events = decoder.analyze(&smb1_packet(), &flow("10.0.0.5", "10.0.0.9"));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ThreatType::Smb1UsageDetected);
        assert_eq!(events[0].severity, Severity::Low);
    }

    #[test]
    fn test_admin_share_access() {
        let decoder = SmbDecoder::default();
        let payload = utf16le("\\\\fileserver\\C$");
        let events = decoder.analyze(
            &smb2_packet(SMB2_TREE_CONNECT, &payload),
            &flow("10.0.0.5", "10.0.0.9"),
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ThreatType::SmbAdminShareAccess);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[test]
    fn test_ipc_share_is_medium() {
        let decoder = SmbDecoder::default();
        let payload = utf16le("\\\\fileserver\\IPC$");
        let events = decoder.analyze(
            &smb2_packet(SMB2_TREE_CONNECT, &payload),
            &flow("10.0.0.5", "10.0.0.9"),
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Medium);
    }

    #[test]
    fn test_ordinary_share_ignored() {
        let decoder = SmbDecoder::default();
        let payload = utf16le("\\\\fileserver\\public");
        let events = decoder.analyze(
            &smb2_packet(SMB2_TREE_CONNECT, &payload),
            &flow("10.0.0.5", "10.0.0.9"),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_ntds_dit_access_is_critical() {
        let decoder = SmbDecoder::default();
        let payload = utf16le("windows\\ntds\\NTDS.dit");
        let events = decoder.analyze(
            &smb2_packet(SMB2_CREATE, &payload),
            &flow("10.0.0.5", "10.0.0.9"),
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ThreatType::NtdsDitAccess);
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[test]
    fn test_registry_hive_and_lsass_dump() {
        let decoder = SmbDecoder::default();
        let f = flow("10.0.0.5", "10.0.0.9");

        let events = decoder.analyze(
            &smb2_packet(SMB2_CREATE, &utf16le("windows\\system32\\config\\SAM")),
            &f,
        );
        assert_eq!(events[0].event_type, ThreatType::RegistryHiveAccess);

        let events = decoder.analyze(
            &smb2_packet(SMB2_CREATE, &utf16le("temp\\lsass_dump.dmp")),
            &f,
        );
        assert_eq!(events[0].event_type, ThreatType::LsassDumpAccess);
    }

    #[test]
    fn test_enumeration_threshold() {
        let decoder = SmbDecoder::default();
        let f = flow("10.0.0.5", "10.0.0.9");
        let packet = smb2_packet(SMB2_QUERY_DIRECTORY, &[]);
        let t0 = Utc::now();

        let mut enumeration_events = 0;
        for i in 0..25 {
            let now = t0 + chrono::Duration::seconds(i);
            enumeration_events += decoder
                .analyze_at(&packet, &f, now)
                .iter()
                .filter(|e| e.event_type == ThreatType::SmbEnumeration)
                .count();
        }
        assert_eq!(enumeration_events, 1);

        // A fresh source below the threshold stays silent
        let quiet = flow("10.0.0.77", "10.0.0.9");
        let mut events = 0;
        for i in 0..19 {
            let now = t0 + chrono::Duration::seconds(i);
            events += decoder.analyze_at(&packet, &quiet, now).len();
        }
        assert_eq!(events, 0);
    }

    #[test]
    fn test_lateral_movement_burst() {
        let decoder = SmbDecoder::default();
        let f = flow("10.0.0.5", "10.0.0.9");

        let tree = smb2_packet(SMB2_TREE_CONNECT, &utf16le("\\\\srv\\public"));
        let create = smb2_packet(SMB2_CREATE, &utf16le("docs\\readme.txt"));

        let mut saw_pattern = false;
        for _ in 0..5 {
            saw_pattern |= decoder
                .analyze(&tree, &f)
                .iter()
                .any(|e| e.event_type == ThreatType::SmbLateralMovementPattern);
        }
        for _ in 0..10 {
            saw_pattern |= decoder
                .analyze(&create, &f)
                .iter()
                .any(|e| e.event_type == ThreatType::SmbLateralMovementPattern);
        }
        assert!(saw_pattern);
    }

    #[test]
    fn test_truncated_header_no_events() {
        let decoder = SmbDecoder::default();
        let mut data = vec![0u8; 20];
        data[4..8].copy_from_slice(SMB2_SIGNATURE);
        assert!(decoder
            .analyze(&data, &flow("10.0.0.5", "10.0.0.9"))
            .is_empty());
    }

    #[test]
    fn test_idle_session_cleanup() {
        let decoder = SmbDecoder::default();
        let f = flow("10.0.0.5", "10.0.0.9");
        let t0 = Utc::now();

        decoder.analyze_at(&smb2_packet(SMB2_CREATE, &[]), &f, t0);
        assert_eq!(decoder.get_stats().active_sessions, 1);

        decoder.clear_idle_sessions(3600, t0 + chrono::Duration::seconds(7200));
        assert_eq!(decoder.get_stats().active_sessions, 0);
    }

    proptest! {
        #[test]
        fn test_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let decoder = SmbDecoder::default();
            let _ = decoder.analyze(&data, &flow("10.0.0.5", "10.0.0.9"));
        }

        #[test]
        fn test_mangled_smb2_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let decoder = SmbDecoder::default();
            for command in [SMB2_TREE_CONNECT, SMB2_CREATE, SMB2_QUERY_DIRECTORY, 0x00ff] {
                let _ = decoder.analyze(&smb2_packet(command, &payload), &flow("10.0.0.5", "10.0.0.9"));
            }
        }
    }
}
