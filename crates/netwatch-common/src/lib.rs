//! NetWatch Common
//!
//! Shared types for the NetWatch detection core:
//! - The `ThreatEvent` contract produced by every decoder and consumed by
//!   the risk scorer, the SOAR engine and external alert stores
//! - Flow keys used for multi-packet correlation
//! - Collaborator traits for the external systems the core talks to
//!   (kill-chain correlator, device inventory, alert sink, notifier)

pub mod collab;
pub mod event;
pub mod flow;

pub use collab::{
    AlertSink, AttackChain, DeviceInventory, DeviceRecord, KillChainCorrelator, Notifier,
    RiskLookup,
};
pub use event::{Severity, ThreatEvent, ThreatType};
pub use flow::{FlowKey, PacketFlow};
