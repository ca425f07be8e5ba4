//! Threat Event Contract
//!
//! The single data shape crossing out of the detection core. Decoders
//! produce these; the risk scorer, SOAR engine and external alert store
//! consume them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Alert severity levels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

/// Threat event kinds
///
/// Closed set of the tags emitted by the decoders plus the wider vocabulary
/// understood by the risk weight tables and playbook triggers. `Custom`
/// carries tags introduced by external configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreatType {
    // TLS / certificate
    EsniDetected,
    EchDetected,
    MissingSni,
    WeakCiphersOnly,
    WeakCipherNegotiated,
    LegacyTlsVersion,
    MaliciousJa3Fingerprint,
    SelfSignedCertificate,
    ExpiredCertificate,
    DomainFrontingSuspected,

    // SMB
    Smb1UsageDetected,
    SmbAdminShareAccess,
    SmbEnumeration,
    SmbLateralMovementPattern,
    NtdsDitAccess,
    RegistryHiveAccess,
    LsassDumpAccess,

    // LDAP
    LdapSensitiveAttrQuery,
    LdapSensitiveBaseQuery,
    LdapEnumeration,
    LdapSpnEnumeration,
    LdapAsrepEnumeration,
    LdapAdminEnumeration,

    // Wider vocabulary consumed by risk weights and playbook triggers
    DcsyncAttack,
    KerberoastingAttack,
    AsrepRoastingAttack,
    PassTheHashSuspected,
    C2Communication,
    RansomwareDetected,
    HighRiskAttackChain,
    AttackChainProgression,
    LateralMovement,
    DataExfiltration,
    BruteForce,
    KerberosBruteforce,
    SshBruteforce,
    BeaconDetected,
    DnsTunnel,
    PortScan,
    InternalPortScan,
    ThreatFeedMatch,
    BlacklistedIp,
    ConnectionFlood,
    UnusualPacketSize,

    /// Escape hatch for tags named by external configuration
    Custom(String),
}

impl ThreatType {
    /// The wire tag for this event type
    pub fn as_str(&self) -> &str {
        match self {
            Self::EsniDetected => "ESNI_DETECTED",
            Self::EchDetected => "ECH_DETECTED",
            Self::MissingSni => "MISSING_SNI",
            Self::WeakCiphersOnly => "WEAK_CIPHERS_ONLY",
            Self::WeakCipherNegotiated => "WEAK_CIPHER_NEGOTIATED",
            Self::LegacyTlsVersion => "LEGACY_TLS_VERSION",
            Self::MaliciousJa3Fingerprint => "MALICIOUS_JA3_FINGERPRINT",
            Self::SelfSignedCertificate => "SELF_SIGNED_CERTIFICATE",
            Self::ExpiredCertificate => "EXPIRED_CERTIFICATE",
            Self::DomainFrontingSuspected => "DOMAIN_FRONTING_SUSPECTED",
            Self::Smb1UsageDetected => "SMB1_USAGE_DETECTED",
            Self::SmbAdminShareAccess => "SMB_ADMIN_SHARE_ACCESS",
            Self::SmbEnumeration => "SMB_ENUMERATION",
            Self::SmbLateralMovementPattern => "SMB_LATERAL_MOVEMENT_PATTERN",
            Self::NtdsDitAccess => "NTDS_DIT_ACCESS",
            Self::RegistryHiveAccess => "REGISTRY_HIVE_ACCESS",
            Self::LsassDumpAccess => "LSASS_DUMP_ACCESS",
            Self::LdapSensitiveAttrQuery => "LDAP_SENSITIVE_ATTR_QUERY",
            Self::LdapSensitiveBaseQuery => "LDAP_SENSITIVE_BASE_QUERY",
            Self::LdapEnumeration => "LDAP_ENUMERATION",
            Self::LdapSpnEnumeration => "LDAP_SPN_ENUMERATION",
            Self::LdapAsrepEnumeration => "LDAP_ASREP_ENUMERATION",
            Self::LdapAdminEnumeration => "LDAP_ADMIN_ENUMERATION",
            Self::DcsyncAttack => "DCSYNC_ATTACK",
            Self::KerberoastingAttack => "KERBEROASTING_ATTACK",
            Self::AsrepRoastingAttack => "ASREP_ROASTING_ATTACK",
            Self::PassTheHashSuspected => "PASS_THE_HASH_SUSPECTED",
            Self::C2Communication => "C2_COMMUNICATION",
            Self::RansomwareDetected => "RANSOMWARE_DETECTED",
            Self::HighRiskAttackChain => "HIGH_RISK_ATTACK_CHAIN",
            Self::AttackChainProgression => "ATTACK_CHAIN_PROGRESSION",
            Self::LateralMovement => "LATERAL_MOVEMENT",
            Self::DataExfiltration => "DATA_EXFILTRATION",
            Self::BruteForce => "BRUTE_FORCE",
            Self::KerberosBruteforce => "KERBEROS_BRUTEFORCE",
            Self::SshBruteforce => "SSH_BRUTEFORCE",
            Self::BeaconDetected => "BEACON_DETECTED",
            Self::DnsTunnel => "DNS_TUNNEL",
            Self::PortScan => "PORT_SCAN",
            Self::InternalPortScan => "INTERNAL_PORT_SCAN",
            Self::ThreatFeedMatch => "THREAT_FEED_MATCH",
            Self::BlacklistedIp => "BLACKLISTED_IP",
            Self::ConnectionFlood => "CONNECTION_FLOOD",
            Self::UnusualPacketSize => "UNUSUAL_PACKET_SIZE",
            Self::Custom(tag) => tag,
        }
    }

    /// Parse a wire tag; unknown tags land in `Custom`
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "ESNI_DETECTED" => Self::EsniDetected,
            "ECH_DETECTED" => Self::EchDetected,
            "MISSING_SNI" => Self::MissingSni,
            "WEAK_CIPHERS_ONLY" => Self::WeakCiphersOnly,
            "WEAK_CIPHER_NEGOTIATED" => Self::WeakCipherNegotiated,
            "LEGACY_TLS_VERSION" => Self::LegacyTlsVersion,
            "MALICIOUS_JA3_FINGERPRINT" => Self::MaliciousJa3Fingerprint,
            "SELF_SIGNED_CERTIFICATE" => Self::SelfSignedCertificate,
            "EXPIRED_CERTIFICATE" => Self::ExpiredCertificate,
            "DOMAIN_FRONTING_SUSPECTED" => Self::DomainFrontingSuspected,
            "SMB1_USAGE_DETECTED" => Self::Smb1UsageDetected,
            "SMB_ADMIN_SHARE_ACCESS" => Self::SmbAdminShareAccess,
            "SMB_ENUMERATION" => Self::SmbEnumeration,
            "SMB_LATERAL_MOVEMENT_PATTERN" => Self::SmbLateralMovementPattern,
            "NTDS_DIT_ACCESS" => Self::NtdsDitAccess,
            "REGISTRY_HIVE_ACCESS" => Self::RegistryHiveAccess,
            "LSASS_DUMP_ACCESS" => Self::LsassDumpAccess,
            "LDAP_SENSITIVE_ATTR_QUERY" => Self::LdapSensitiveAttrQuery,
            "LDAP_SENSITIVE_BASE_QUERY" => Self::LdapSensitiveBaseQuery,
            "LDAP_ENUMERATION" => Self::LdapEnumeration,
            "LDAP_SPN_ENUMERATION" => Self::LdapSpnEnumeration,
            "LDAP_ASREP_ENUMERATION" => Self::LdapAsrepEnumeration,
            "LDAP_ADMIN_ENUMERATION" => Self::LdapAdminEnumeration,
            "DCSYNC_ATTACK" => Self::DcsyncAttack,
            "KERBEROASTING_ATTACK" => Self::KerberoastingAttack,
            "ASREP_ROASTING_ATTACK" => Self::AsrepRoastingAttack,
            "PASS_THE_HASH_SUSPECTED" => Self::PassTheHashSuspected,
            "C2_COMMUNICATION" => Self::C2Communication,
            "RANSOMWARE_DETECTED" => Self::RansomwareDetected,
            "HIGH_RISK_ATTACK_CHAIN" => Self::HighRiskAttackChain,
            "ATTACK_CHAIN_PROGRESSION" => Self::AttackChainProgression,
            "LATERAL_MOVEMENT" => Self::LateralMovement,
            "DATA_EXFILTRATION" => Self::DataExfiltration,
            "BRUTE_FORCE" => Self::BruteForce,
            "KERBEROS_BRUTEFORCE" => Self::KerberosBruteforce,
            "SSH_BRUTEFORCE" => Self::SshBruteforce,
            "BEACON_DETECTED" => Self::BeaconDetected,
            "DNS_TUNNEL" => Self::DnsTunnel,
            "PORT_SCAN" => Self::PortScan,
            "INTERNAL_PORT_SCAN" => Self::InternalPortScan,
            "THREAT_FEED_MATCH" => Self::ThreatFeedMatch,
            "BLACKLISTED_IP" => Self::BlacklistedIp,
            "CONNECTION_FLOOD" => Self::ConnectionFlood,
            "UNUSUAL_PACKET_SIZE" => Self::UnusualPacketSize,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ThreatType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ThreatType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// A detected threat
///
/// IPs are carried textually (dotted-decimal or IPv6) to match the shape
/// stored by the alert sink and served by the dashboard API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    #[serde(rename = "type")]
    pub event_type: ThreatType,
    pub severity: Severity,
    pub source_ip: String,
    pub destination_ip: String,
    pub description: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ThreatEvent {
    /// Create a new event stamped with the current time
    pub fn new(
        event_type: ThreatType,
        severity: Severity,
        source_ip: impl Into<String>,
        destination_ip: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity,
            source_ip: source_ip.into(),
            destination_ip: destination_ip.into(),
            description: description.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured detail field
    pub fn with_detail(
        mut self,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let t = ThreatType::from_tag("WEAK_CIPHER_NEGOTIATED");
        assert_eq!(t, ThreatType::WeakCipherNegotiated);
        assert_eq!(t.as_str(), "WEAK_CIPHER_NEGOTIATED");

        let c = ThreatType::from_tag("SOMETHING_NEW");
        assert_eq!(c, ThreatType::Custom("SOMETHING_NEW".into()));
        assert_eq!(c.as_str(), "SOMETHING_NEW");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.to_string(), "HIGH");
    }

    #[test]
    fn test_event_serialization() {
        let event = ThreatEvent::new(
            ThreatType::SmbEnumeration,
            Severity::Medium,
            "10.0.0.5",
            "10.0.0.9",
            "SMB enumeration detected",
        )
        .with_detail("query_count", 25);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SMB_ENUMERATION");
        assert_eq!(json["severity"], "MEDIUM");
        assert_eq!(json["details"]["query_count"], 25);
    }
}
