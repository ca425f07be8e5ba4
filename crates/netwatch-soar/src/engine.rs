//! SOAR Execution Engine
//!
//! Matching and queuing happen synchronously on the event-processing path;
//! step execution runs on a dedicated worker pulling one execution at a time
//! from a bounded queue, serializing response actions against the shared
//! cooldown and block-count state.
//!
//! Execution lifecycle:
//! `PENDING -> [approval] -> queued -> RUNNING -> COMPLETED | FAILED`, with
//! `PENDING -> SKIPPED` on rejection or shutdown discard. An execution is
//! either pending approval, enqueued, or terminal, never two at once.

use crate::playbook::{default_playbooks, FailurePolicy, Playbook, PlaybookStep, ResponseAction};
use crate::SoarError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use netwatch_common::{DeviceInventory, Notifier, RiskLookup, ThreatEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// SOAR engine configuration. Safety defaults are deliberate: dry-run on,
/// approval required, blocking capped.
#[derive(Clone, Debug)]
pub struct SoarConfig {
    pub enabled: bool,
    /// Network-affecting actions log intent instead of acting
    pub dry_run: bool,
    /// Hold executions for manual approval before queuing
    pub require_approval: bool,
    /// Global cap on block_ip actions per sliding hour
    pub max_blocks_per_hour: usize,
    /// Bound on the execution queue
    pub queue_size: usize,
    /// Bound on the retained execution history
    pub history_size: usize,
}

impl Default for SoarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: true,
            require_approval: true,
            max_blocks_per_hour: 10,
            queue_size: 100,
            history_size: 1000,
        }
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub action: ResponseAction,
    pub success: bool,
    pub dry_run: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Record of one playbook execution
#[derive(Debug, Clone, Serialize)]
pub struct PlaybookExecution {
    pub execution_id: String,
    pub playbook_name: String,
    pub trigger_event: ThreatEvent,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub results: Vec<StepResult>,
    pub error: Option<String>,
}

/// Execution plus the playbook it runs; what travels through the queue
struct QueuedExecution {
    execution: PlaybookExecution,
    playbook: Playbook,
}

/// Response returned to the event-processing caller
#[derive(Debug, Clone, Serialize)]
pub struct TriggeredResponse {
    pub playbook: String,
    pub execution_id: String,
    pub status: &'static str,
}

/// Pending-approval listing entry
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub execution_id: String,
    pub playbook: String,
    pub event_type: String,
    pub source_ip: String,
    pub queued_at: DateTime<Utc>,
}

/// Engine statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SoarStats {
    pub enabled: bool,
    pub dry_run: bool,
    pub require_approval: bool,
    pub playbooks_loaded: usize,
    pub pending_approvals: usize,
    pub total_executions: u64,
    pub completed_executions: usize,
    pub failed_executions: usize,
    pub blocks_this_hour: usize,
}

/// Security orchestration engine
pub struct SoarEngine {
    pub(crate) config: SoarConfig,
    playbooks: HashMap<String, Playbook>,
    pending_approvals: DashMap<String, QueuedExecution>,
    executions: Mutex<VecDeque<PlaybookExecution>>,
    cooldowns: DashMap<(String, String), DateTime<Utc>>,
    playbook_runs: DashMap<String, VecDeque<DateTime<Utc>>>,
    pub(crate) blocks_this_hour: Mutex<VecDeque<DateTime<Utc>>>,
    queue_tx: Mutex<Option<mpsc::Sender<QueuedExecution>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<QueuedExecution>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    executions_total: AtomicU64,
    pub(crate) risk: Option<Arc<dyn RiskLookup>>,
    pub(crate) inventory: Option<Arc<dyn DeviceInventory>>,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
}

impl SoarEngine {
    pub fn new(config: SoarConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size);
        let playbooks = default_playbooks()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect::<HashMap<_, _>>();

        tracing::info!(
            playbooks = playbooks.len(),
            dry_run = config.dry_run,
            "SOAR engine initialized"
        );

        Self {
            config,
            playbooks,
            pending_approvals: DashMap::new(),
            executions: Mutex::new(VecDeque::new()),
            cooldowns: DashMap::new(),
            playbook_runs: DashMap::new(),
            blocks_this_hour: Mutex::new(VecDeque::new()),
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            executions_total: AtomicU64::new(0),
            risk: None,
            inventory: None,
            notifier: None,
        }
    }

    /// Attach the risk scorer used by the enrich step
    pub fn with_risk_lookup(mut self, risk: Arc<dyn RiskLookup>) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Attach the device inventory used by the enrich step
    pub fn with_inventory(mut self, inventory: Arc<dyn DeviceInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Attach the outbound notifier used by the notify step
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register an additional playbook before the engine starts
    pub fn register_playbook(&mut self, playbook: Playbook) {
        tracing::info!(name = %playbook.name, "registering playbook");
        self.playbooks.insert(playbook.name.clone(), playbook);
    }

    /// Match an event against all playbooks, queue or pend each match
    pub fn process_event(&self, event: &ThreatEvent) -> Vec<TriggeredResponse> {
        self.process_event_at(event, Utc::now())
    }

    /// Deterministic entry point taking an explicit clock reading
    pub fn process_event_at(
        &self,
        event: &ThreatEvent,
        now: DateTime<Utc>,
    ) -> Vec<TriggeredResponse> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut responses = Vec::new();

        for playbook in self.playbooks.values() {
            if !playbook.enabled || !playbook.matches(&event.event_type, event.severity) {
                continue;
            }

            if self.in_cooldown(&event.source_ip, playbook, now) {
                tracing::debug!(
                    playbook = %playbook.name,
                    source = %event.source_ip,
                    "playbook in cooldown"
                );
                continue;
            }

            if self.over_hourly_budget(playbook, now) {
                tracing::warn!(
                    playbook = %playbook.name,
                    "playbook hourly execution budget exhausted"
                );
                continue;
            }

            responses.push(self.dispatch(playbook.clone(), event.clone(), now));
        }

        responses
    }

    /// Manually trigger a playbook by name, bypassing trigger matching
    pub fn trigger_playbook(
        &self,
        name: &str,
        event: &ThreatEvent,
    ) -> Result<TriggeredResponse, SoarError> {
        let playbook = self
            .playbooks
            .get(name)
            .ok_or_else(|| SoarError::UnknownPlaybook(name.to_string()))?;
        Ok(self.dispatch(playbook.clone(), event.clone(), Utc::now()))
    }

    /// Cooldown is recorded when the match fires, keyed by
    /// `(source IP, playbook name)`, so a sustained attack cannot
    /// double-queue while the worker is busy.
    fn in_cooldown(&self, source_ip: &str, playbook: &Playbook, now: DateTime<Utc>) -> bool {
        let key = (source_ip.to_string(), playbook.name.clone());
        self.cooldowns
            .get(&key)
            .map(|last| (now - *last).num_seconds() < playbook.cooldown_secs)
            .unwrap_or(false)
    }

    fn over_hourly_budget(&self, playbook: &Playbook, now: DateTime<Utc>) -> bool {
        let mut runs = self.playbook_runs.entry(playbook.name.clone()).or_default();
        let hour_ago = now - chrono::Duration::hours(1);
        while runs.front().map(|t| *t < hour_ago).unwrap_or(false) {
            runs.pop_front();
        }
        runs.len() >= playbook.max_executions_per_hour as usize
    }

    fn dispatch(
        &self,
        playbook: Playbook,
        event: ThreatEvent,
        now: DateTime<Utc>,
    ) -> TriggeredResponse {
        let execution = PlaybookExecution {
            execution_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            playbook_name: playbook.name.clone(),
            trigger_event: event,
            status: ExecutionStatus::Pending,
            started_at: now,
            completed_at: None,
            steps_completed: 0,
            steps_total: playbook.steps.len(),
            results: Vec::new(),
            error: None,
        };

        self.cooldowns.insert(
            (
                execution.trigger_event.source_ip.clone(),
                playbook.name.clone(),
            ),
            now,
        );
        self.playbook_runs
            .entry(playbook.name.clone())
            .or_default()
            .push_back(now);

        let response = TriggeredResponse {
            playbook: playbook.name.clone(),
            execution_id: execution.execution_id.clone(),
            status: if self.config.require_approval {
                "pending_approval"
            } else {
                "queued"
            },
        };

        let queued = QueuedExecution {
            execution,
            playbook,
        };

        if self.config.require_approval {
            tracing::info!(
                playbook = %response.playbook,
                execution = %response.execution_id,
                "playbook queued for approval"
            );
            self.pending_approvals
                .insert(response.execution_id.clone(), queued);
        } else {
            self.enqueue(queued);
        }

        response
    }

    fn enqueue(&self, queued: QueuedExecution) {
        let tx = self.queue_tx.lock().clone();
        let name = queued.playbook.name.clone();

        let rejected = match tx {
            Some(tx) => match tx.try_send(queued) {
                Ok(()) => {
                    tracing::info!(playbook = %name, "playbook queued for execution");
                    None
                }
                Err(mpsc::error::TrySendError::Full(q))
                | Err(mpsc::error::TrySendError::Closed(q)) => Some(q),
            },
            None => Some(queued),
        };

        if let Some(mut queued) = rejected {
            tracing::warn!(playbook = %name, "execution queue unavailable, marking failed");
            queued.execution.status = ExecutionStatus::Failed;
            queued.execution.error = Some("execution queue unavailable".to_string());
            queued.execution.completed_at = Some(Utc::now());
            self.push_history(queued.execution);
        }
    }

    /// Approve a pending execution, moving it to the queue
    pub fn approve_execution(&self, execution_id: &str) -> Result<(), SoarError> {
        let (_, queued) = self
            .pending_approvals
            .remove(execution_id)
            .ok_or_else(|| SoarError::UnknownExecution(execution_id.to_string()))?;

        tracing::info!(execution = execution_id, "execution approved");
        self.enqueue(queued);
        Ok(())
    }

    /// Reject a pending execution; it transitions to SKIPPED
    pub fn reject_execution(&self, execution_id: &str) -> Result<(), SoarError> {
        let (_, mut queued) = self
            .pending_approvals
            .remove(execution_id)
            .ok_or_else(|| SoarError::UnknownExecution(execution_id.to_string()))?;

        tracing::info!(execution = execution_id, "execution rejected");
        queued.execution.status = ExecutionStatus::Skipped;
        queued.execution.completed_at = Some(Utc::now());
        self.push_history(queued.execution);
        Ok(())
    }

    /// Start the execution worker. Pulls one execution at a time and runs
    /// its steps to completion before the next.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut rx) = self.queue_rx.lock().take() else {
            return;
        };

        let engine = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            tracing::info!("SOAR worker started");
            while let Some(queued) = rx.recv().await {
                if !engine.running.load(Ordering::SeqCst) {
                    // Shutdown discard: remaining queued work is skipped
                    let mut execution = queued.execution;
                    execution.status = ExecutionStatus::Skipped;
                    execution.completed_at = Some(Utc::now());
                    engine.push_history(execution);
                    continue;
                }
                engine.execute_playbook(queued).await;
            }
            tracing::info!("SOAR worker stopped");
        });
        *self.worker.lock() = Some(handle);
    }

    /// Stop the engine. The queue is closed and drained deterministically:
    /// anything still queued is recorded as SKIPPED without running steps.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue_tx.lock().take();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        } else if let Some(mut rx) = self.queue_rx.lock().take() {
            while let Ok(queued) = rx.try_recv() {
                let mut execution = queued.execution;
                execution.status = ExecutionStatus::Skipped;
                execution.completed_at = Some(Utc::now());
                self.push_history(execution);
            }
        }
    }

    pub(crate) async fn execute_playbook(&self, queued: QueuedExecution) {
        let QueuedExecution {
            mut execution,
            playbook,
        } = queued;

        execution.status = ExecutionStatus::Running;
        self.executions_total.fetch_add(1, Ordering::Relaxed);

        for step in &playbook.steps {
            let result = self.run_step_with_timeout(step, &execution.trigger_event).await;
            let failed = !result.success;
            execution.results.push(result);
            execution.steps_completed += 1;

            if failed && step.on_failure == FailurePolicy::Abort {
                execution.status = ExecutionStatus::Failed;
                execution.error = execution
                    .results
                    .last()
                    .and_then(|r| r.error.clone());
                break;
            }
        }

        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
        }
        execution.completed_at = Some(Utc::now());

        tracing::info!(
            playbook = %playbook.name,
            execution = %execution.execution_id,
            status = ?execution.status,
            steps = format!("{}/{}", execution.steps_completed, execution.steps_total),
            "playbook finished"
        );

        self.push_history(execution);
    }

    /// Network-facing actions can hang; every step runs under its budget.
    async fn run_step_with_timeout(
        &self,
        step: &PlaybookStep,
        event: &ThreatEvent,
    ) -> StepResult {
        let budget = std::time::Duration::from_secs(step.timeout_secs.max(1));
        match tokio::time::timeout(budget, self.execute_step(step, event)).await {
            Ok(result) => result,
            Err(_) => StepResult {
                action: step.action,
                success: false,
                dry_run: self.config.dry_run,
                output: serde_json::Value::Null,
                error: Some(format!("step timed out after {}s", step.timeout_secs)),
                duration_ms: step.timeout_secs * 1000,
            },
        }
    }

    fn push_history(&self, execution: PlaybookExecution) {
        let mut history = self.executions.lock();
        history.push_back(execution);
        while history.len() > self.config.history_size {
            history.pop_front();
        }
    }

    /// Executions awaiting manual approval
    pub fn get_pending_approvals(&self) -> Vec<PendingApproval> {
        self.pending_approvals
            .iter()
            .map(|entry| PendingApproval {
                execution_id: entry.key().clone(),
                playbook: entry.execution.playbook_name.clone(),
                event_type: entry.execution.trigger_event.event_type.to_string(),
                source_ip: entry.execution.trigger_event.source_ip.clone(),
                queued_at: entry.execution.started_at,
            })
            .collect()
    }

    /// Most recent executions, oldest first
    pub fn get_recent_executions(&self, limit: usize) -> Vec<PlaybookExecution> {
        let history = self.executions.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn get_stats(&self) -> SoarStats {
        let history = self.executions.lock();
        let completed = history
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count();
        let failed = history
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .count();
        drop(history);

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let blocks = self
            .blocks_this_hour
            .lock()
            .iter()
            .filter(|t| **t >= hour_ago)
            .count();

        SoarStats {
            enabled: self.config.enabled,
            dry_run: self.config.dry_run,
            require_approval: self.config.require_approval,
            playbooks_loaded: self.playbooks.len(),
            pending_approvals: self.pending_approvals.len(),
            total_executions: self.executions_total.load(Ordering::Relaxed),
            completed_executions: completed,
            failed_executions: failed,
            blocks_this_hour: blocks,
        }
    }
}

impl Default for SoarEngine {
    fn default() -> Self {
        Self::new(SoarConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::PlaybookStep;
    use netwatch_common::{Severity, ThreatType};

    fn c2_event(source: &str) -> ThreatEvent {
        ThreatEvent::new(
            ThreatType::C2Communication,
            Severity::Critical,
            source,
            "203.0.113.7",
            "C2 channel detected",
        )
    }

    #[test]
    fn test_matching_event_pends_for_approval() {
        let engine = SoarEngine::default();
        let responses = engine.process_event(&c2_event("10.0.0.5"));

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].playbook, "critical_threat");
        assert_eq!(responses[0].status, "pending_approval");

        let pending = engine.get_pending_approvals();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_ip, "10.0.0.5");
        assert_eq!(pending[0].event_type, "C2_COMMUNICATION");
    }

    #[test]
    fn test_non_matching_severity_ignored() {
        let engine = SoarEngine::default();
        let event = ThreatEvent::new(
            ThreatType::C2Communication,
            Severity::Low,
            "10.0.0.5",
            "203.0.113.7",
            "low severity",
        );
        assert!(engine.process_event(&event).is_empty());
    }

    #[test]
    fn test_cooldown_blocks_retrigger_until_elapsed() {
        let engine = SoarEngine::default();
        let event = c2_event("10.0.0.5");
        let t0 = Utc::now();

        let first = engine.process_event_at(&event, t0);
        assert_eq!(first.len(), 1);
        engine.reject_execution(&first[0].execution_id).unwrap();

        // critical_threat cooldown is 300s
        let within = engine.process_event_at(&event, t0 + chrono::Duration::seconds(299));
        assert!(within.is_empty());

        let after = engine.process_event_at(&event, t0 + chrono::Duration::seconds(301));
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn test_cooldown_is_per_source() {
        let engine = SoarEngine::default();
        let t0 = Utc::now();

        assert_eq!(engine.process_event_at(&c2_event("10.0.0.5"), t0).len(), 1);
        assert_eq!(engine.process_event_at(&c2_event("10.0.0.6"), t0).len(), 1);
    }

    #[test]
    fn test_reject_transitions_to_skipped() {
        let engine = SoarEngine::default();
        let responses = engine.process_event(&c2_event("10.0.0.5"));
        let id = &responses[0].execution_id;

        engine.reject_execution(id).unwrap();
        assert!(engine.get_pending_approvals().is_empty());

        let history = engine.get_recent_executions(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].execution_id, *id);
        assert_eq!(history[0].status, ExecutionStatus::Skipped);
    }

    #[test]
    fn test_unknown_execution_and_playbook_are_errors() {
        let engine = SoarEngine::default();
        assert!(matches!(
            engine.approve_execution("nope"),
            Err(SoarError::UnknownExecution(_))
        ));
        assert!(matches!(
            engine.reject_execution("nope"),
            Err(SoarError::UnknownExecution(_))
        ));
        assert!(matches!(
            engine.trigger_playbook("nope", &c2_event("10.0.0.5")),
            Err(SoarError::UnknownPlaybook(_))
        ));
    }

    #[test]
    fn test_hourly_execution_budget() {
        let mut engine = SoarEngine::default();
        engine.register_playbook(Playbook {
            name: "budgeted".into(),
            description: "".into(),
            trigger_types: Some(vec![ThreatType::PortScan]),
            trigger_severities: None,
            steps: vec![PlaybookStep::new(ResponseAction::Log)],
            enabled: true,
            cooldown_secs: 0,
            max_executions_per_hour: 2,
        });

        let t0 = Utc::now();
        for i in 0..2 {
            let event = ThreatEvent::new(
                ThreatType::PortScan,
                Severity::Medium,
                format!("10.0.0.{i}"),
                "10.0.0.99",
                "scan",
            );
            // reconnaissance also matches PORT_SCAN at MEDIUM
            let hits: Vec<_> = engine
                .process_event_at(&event, t0)
                .into_iter()
                .filter(|r| r.playbook == "budgeted")
                .collect();
            assert_eq!(hits.len(), 1);
        }

        let event = ThreatEvent::new(
            ThreatType::PortScan,
            Severity::Medium,
            "10.0.0.50",
            "10.0.0.99",
            "scan",
        );
        let hits: Vec<_> = engine
            .process_event_at(&event, t0)
            .into_iter()
            .filter(|r| r.playbook == "budgeted")
            .collect();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_worker_runs_dry_run_to_completion() {
        let engine = Arc::new(SoarEngine::new(SoarConfig {
            require_approval: false,
            ..SoarConfig::default()
        }));
        engine.clone().start();

        let responses = engine.process_event(&c2_event("10.0.0.5"));
        assert_eq!(responses[0].status, "queued");

        let mut finished = None;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if let Some(e) = engine
                .get_recent_executions(10)
                .into_iter()
                .find(|e| e.status == ExecutionStatus::Completed)
            {
                finished = Some(e);
                break;
            }
        }

        let execution = finished.expect("execution should complete");
        assert_eq!(execution.steps_completed, 4);
        assert!(execution.results.iter().all(|r| r.success && r.dry_run));

        let block = execution
            .results
            .iter()
            .find(|r| r.action == ResponseAction::BlockIp)
            .unwrap();
        assert_eq!(block.output["blocked"], false);
        assert_eq!(block.output["dry_run"], true);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_dry_run_block_never_consumes_cap() {
        let engine = SoarEngine::default();
        let step = PlaybookStep::new(ResponseAction::BlockIp);
        let event = c2_event("10.0.0.5");

        for _ in 0..25 {
            let result = engine.execute_step(&step, &event).await;
            assert!(result.success);
            assert_eq!(result.output["blocked"], false);
            assert_eq!(result.output["dry_run"], true);
        }
        assert!(engine.blocks_this_hour.lock().is_empty());
    }

    #[tokio::test]
    async fn test_block_cap_enforced_when_live() {
        let engine = SoarEngine::new(SoarConfig {
            dry_run: false,
            ..SoarConfig::default()
        });
        let step = PlaybookStep::new(ResponseAction::BlockIp);
        let event = c2_event("10.0.0.5");

        for _ in 0..10 {
            let result = engine.execute_step(&step, &event).await;
            assert!(result.success);
            assert_eq!(result.output["blocked"], true);
        }

        let capped = engine.execute_step(&step, &event).await;
        assert!(!capped.success);
        assert_eq!(
            capped.error.as_deref(),
            Some("max blocks per hour exceeded")
        );
        // The failed attempt does not consume the cap further
        assert_eq!(engine.blocks_this_hour.lock().len(), 10);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_execution() {
        let playbook = Playbook {
            name: "abort_test".into(),
            description: "".into(),
            trigger_types: None,
            trigger_severities: None,
            steps: vec![
                // Script with no script parameter fails before the dry-run branch
                PlaybookStep::new(ResponseAction::Script).abort_on_failure(),
                PlaybookStep::new(ResponseAction::Log),
            ],
            enabled: true,
            cooldown_secs: 0,
            max_executions_per_hour: 10,
        };

        let engine = SoarEngine::default();
        let execution = PlaybookExecution {
            execution_id: "test0001".into(),
            playbook_name: playbook.name.clone(),
            trigger_event: c2_event("10.0.0.5"),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            steps_completed: 0,
            steps_total: playbook.steps.len(),
            results: Vec::new(),
            error: None,
        };

        engine
            .execute_playbook(QueuedExecution {
                execution,
                playbook,
            })
            .await;

        let history = engine.get_recent_executions(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert_eq!(history[0].steps_completed, 1);
        assert_eq!(history[0].error.as_deref(), Some("no script specified"));
    }

    #[tokio::test]
    async fn test_stop_discards_queued_executions() {
        let engine = SoarEngine::new(SoarConfig {
            require_approval: false,
            ..SoarConfig::default()
        });

        // Worker never started; both land in the queue
        assert_eq!(engine.process_event(&c2_event("10.0.0.5")).len(), 1);
        assert_eq!(engine.process_event(&c2_event("10.0.0.6")).len(), 1);

        engine.stop().await;

        let history = engine.get_recent_executions(10);
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|e| e.status == ExecutionStatus::Skipped));
    }

    #[tokio::test]
    async fn test_stats_reflect_activity() {
        let engine = SoarEngine::default();
        engine.process_event(&c2_event("10.0.0.5"));

        let stats = engine.get_stats();
        assert!(stats.enabled);
        assert!(stats.dry_run);
        assert_eq!(stats.playbooks_loaded, 5);
        assert_eq!(stats.pending_approvals, 1);
        assert_eq!(stats.blocks_this_hour, 0);
    }
}
