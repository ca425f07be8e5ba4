//! Response Playbooks
//!
//! Immutable playbook configuration: what triggers a response and the ordered
//! steps it runs. Loaded from built-in defaults at startup; external
//! configuration can register additional playbooks before the engine starts.

use netwatch_common::{Severity, ThreatType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Available response actions. Closed set; playbooks are configuration data,
/// step-specific knobs travel in the step's parameter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    /// Log the event with context
    Log,
    /// Generate an enhanced alert
    Alert,
    /// Send notification (webhook, email)
    Notify,
    /// Enrich with device inventory and risk context
    Enrich,
    /// Isolate device via network switch
    Quarantine,
    /// Block IP in firewall
    BlockIp,
    /// Block domain in DNS
    BlockDomain,
    /// Apply rate limiting
    RateLimit,
    /// Start packet capture
    Capture,
    /// Run custom script
    Script,
}

impl std::fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Log => "log",
            Self::Alert => "alert",
            Self::Notify => "notify",
            Self::Enrich => "enrich",
            Self::Quarantine => "quarantine",
            Self::BlockIp => "block_ip",
            Self::BlockDomain => "block_domain",
            Self::RateLimit => "rate_limit",
            Self::Capture => "capture",
            Self::Script => "script",
        };
        write!(f, "{tag}")
    }
}

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Proceed to the next step regardless of outcome
    #[default]
    Continue,
    /// Stop the playbook and mark the execution FAILED
    Abort,
}

/// Single step in a playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub action: ResponseAction,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Budget for the step; enforced with a bounded future
    pub timeout_secs: u64,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl PlaybookStep {
    pub fn new(action: ResponseAction) -> Self {
        Self {
            action,
            parameters: HashMap::new(),
            timeout_secs: 60,
            on_failure: FailurePolicy::Continue,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn abort_on_failure(mut self) -> Self {
        self.on_failure = FailurePolicy::Abort;
        self
    }
}

/// Automated response playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    pub description: String,
    /// Event types that trigger this playbook; `None` matches any type
    pub trigger_types: Option<Vec<ThreatType>>,
    /// Severities that trigger; `None` matches any severity
    pub trigger_severities: Option<Vec<Severity>>,
    pub steps: Vec<PlaybookStep>,
    pub enabled: bool,
    /// Minimum seconds between executions per source IP
    pub cooldown_secs: i64,
    pub max_executions_per_hour: u32,
}

impl Playbook {
    /// An event matches iff its type and severity are both in the trigger
    /// sets (a missing set is a wildcard).
    pub fn matches(&self, event_type: &ThreatType, severity: Severity) -> bool {
        let type_ok = self
            .trigger_types
            .as_ref()
            .map(|types| types.contains(event_type))
            .unwrap_or(true);
        let severity_ok = self
            .trigger_severities
            .as_ref()
            .map(|severities| severities.contains(&severity))
            .unwrap_or(true);
        type_ok && severity_ok
    }
}

/// Built-in response playbooks
pub fn default_playbooks() -> Vec<Playbook> {
    use ResponseAction::*;
    use ThreatType::*;

    vec![
        Playbook {
            name: "critical_threat".into(),
            description: "Response to critical severity threats".into(),
            trigger_types: Some(vec![
                C2Communication,
                RansomwareDetected,
                DcsyncAttack,
                HighRiskAttackChain,
                MaliciousJa3Fingerprint,
            ]),
            trigger_severities: Some(vec![Severity::Critical]),
            steps: vec![
                PlaybookStep::new(Enrich)
                    .with_param("include_device_info", true)
                    .with_param("include_risk_score", true),
                PlaybookStep::new(Capture).with_param("duration", 300),
                PlaybookStep::new(Notify)
                    .with_param("priority", "high")
                    .with_param("channels", vec!["webhook", "email"]),
                PlaybookStep::new(BlockIp)
                    .with_param("direction", "both")
                    .with_param("duration", 3600),
            ],
            enabled: true,
            cooldown_secs: 300,
            max_executions_per_hour: 10,
        },
        Playbook {
            name: "lateral_movement".into(),
            description: "Response to lateral movement detection".into(),
            trigger_types: Some(vec![
                LateralMovement,
                PassTheHashSuspected,
                SmbLateralMovementPattern,
                AttackChainProgression,
            ]),
            trigger_severities: Some(vec![Severity::High, Severity::Critical]),
            steps: vec![
                PlaybookStep::new(Enrich).with_param("include_device_info", true),
                PlaybookStep::new(Notify).with_param("priority", "high"),
                PlaybookStep::new(RateLimit).with_param("limit", "10/minute"),
            ],
            enabled: true,
            cooldown_secs: 600,
            max_executions_per_hour: 10,
        },
        Playbook {
            name: "credential_theft".into(),
            description: "Response to credential theft attempts".into(),
            trigger_types: Some(vec![
                KerberoastingAttack,
                AsrepRoastingAttack,
                NtdsDitAccess,
                LsassDumpAccess,
            ]),
            trigger_severities: Some(vec![Severity::Critical, Severity::High]),
            steps: vec![
                PlaybookStep::new(Enrich)
                    .with_param("include_device_info", true)
                    .with_param("include_risk_score", true),
                PlaybookStep::new(Capture).with_param("duration", 600),
                PlaybookStep::new(Notify)
                    .with_param("priority", "critical")
                    .with_param("escalate", true),
            ],
            enabled: true,
            cooldown_secs: 300,
            max_executions_per_hour: 10,
        },
        Playbook {
            name: "reconnaissance".into(),
            description: "Response to reconnaissance activity".into(),
            trigger_types: Some(vec![
                PortScan,
                InternalPortScan,
                SmbEnumeration,
                LdapEnumeration,
                LdapSpnEnumeration,
            ]),
            trigger_severities: Some(vec![Severity::Medium, Severity::High]),
            steps: vec![
                PlaybookStep::new(Enrich).with_param("include_device_info", true),
                PlaybookStep::new(Log).with_param("level", "info"),
                PlaybookStep::new(Notify).with_param("priority", "normal"),
            ],
            enabled: true,
            cooldown_secs: 1800,
            max_executions_per_hour: 10,
        },
        Playbook {
            name: "brute_force".into(),
            description: "Response to brute force attacks".into(),
            trigger_types: Some(vec![BruteForce, KerberosBruteforce, SshBruteforce]),
            trigger_severities: Some(vec![Severity::High]),
            steps: vec![
                PlaybookStep::new(Enrich).with_param("include_device_info", true),
                PlaybookStep::new(RateLimit)
                    .with_param("limit", "3/minute")
                    .with_param("duration", 3600),
                PlaybookStep::new(Notify).with_param("priority", "high"),
            ],
            enabled: true,
            cooldown_secs: 600,
            max_executions_per_hour: 10,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_matching() {
        let playbooks = default_playbooks();
        let critical = playbooks.iter().find(|p| p.name == "critical_threat").unwrap();

        assert!(critical.matches(&ThreatType::RansomwareDetected, Severity::Critical));
        assert!(!critical.matches(&ThreatType::RansomwareDetected, Severity::High));
        assert!(!critical.matches(&ThreatType::PortScan, Severity::Critical));
    }

    #[test]
    fn test_wildcard_matching() {
        let playbook = Playbook {
            name: "catch_all".into(),
            description: "".into(),
            trigger_types: None,
            trigger_severities: None,
            steps: vec![],
            enabled: true,
            cooldown_secs: 0,
            max_executions_per_hour: 100,
        };

        assert!(playbook.matches(&ThreatType::PortScan, Severity::Low));
        assert!(playbook.matches(&ThreatType::Custom("ANYTHING".into()), Severity::Critical));
    }

    #[test]
    fn test_default_playbooks_are_well_formed() {
        let playbooks = default_playbooks();
        assert_eq!(playbooks.len(), 5);
        for playbook in &playbooks {
            assert!(playbook.enabled);
            assert!(!playbook.steps.is_empty());
            assert!(playbook.cooldown_secs > 0);
        }
    }
}
