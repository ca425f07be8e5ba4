//! NetWatch SOAR Engine
//!
//! Security Orchestration, Automation and Response: matches threat events
//! against playbooks, gates execution behind cooldowns, hourly caps and
//! manual approval, and runs response steps on a dedicated worker.
//!
//! Automated blocking is disabled by default (`dry_run = true`); actions log
//! their intended effect and report success without touching the network.

pub mod actions;
pub mod engine;
pub mod notify;
pub mod playbook;

pub use engine::{
    ExecutionStatus, PendingApproval, PlaybookExecution, SoarConfig, SoarEngine, SoarStats,
    StepResult, TriggeredResponse,
};
pub use notify::WebhookNotifier;
pub use playbook::{default_playbooks, FailurePolicy, Playbook, PlaybookStep, ResponseAction};

use thiserror::Error;

/// SOAR engine errors. Policy violations (cap exceeded, rejection) are NOT
/// errors; they surface as structured failed-step results.
#[derive(Error, Debug)]
pub enum SoarError {
    #[error("unknown execution id: {0}")]
    UnknownExecution(String),

    #[error("unknown playbook: {0}")]
    UnknownPlaybook(String),

    #[error("execution queue unavailable")]
    QueueUnavailable,
}
