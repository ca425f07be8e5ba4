//! Collaborator Interfaces
//!
//! Traits for the external systems the detection core consults. All calls
//! are fallible; callers swallow errors so a collaborator outage degrades
//! enrichment but never stalls the event pipeline.

use crate::event::ThreatEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One attack chain an IP participates in, as reported by the external
/// kill-chain correlator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackChain {
    pub chain_id: String,
    /// Highest kill-chain stage reached, e.g. "lateral_movement"
    pub max_stage: Option<String>,
}

/// Kill-chain correlation lookup
pub trait KillChainCorrelator: Send + Sync {
    fn chains_for_ip(&self, ip: &str) -> anyhow::Result<Vec<AttackChain>>;
}

/// Device inventory record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    /// Classification hint, e.g. "Domain Controller" or "Printer"
    pub device_type: Option<String>,
    pub vendor: Option<String>,
}

/// Device inventory lookup
pub trait DeviceInventory: Send + Sync {
    fn device_by_ip(&self, ip: &str) -> anyhow::Result<Option<DeviceRecord>>;
}

/// Durable alert storage
pub trait AlertSink: Send + Sync {
    fn persist(&self, event: &ThreatEvent) -> anyhow::Result<()>;
}

/// Outbound notification channel (webhook, email)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ThreatEvent, priority: &str) -> anyhow::Result<()>;
}

/// Read-only risk score lookup, implemented by the risk scorer and consumed
/// by the SOAR enrich step.
pub trait RiskLookup: Send + Sync {
    fn current_score(&self, ip: &str) -> Option<f64>;
}
