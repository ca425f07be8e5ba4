//! Response Actions
//!
//! Implementations of the individual playbook steps. Policy violations
//! (block cap exceeded, missing parameters) surface as failed step results,
//! never as errors; collaborator outages degrade to empty enrichment.

use crate::engine::{SoarEngine, StepResult};
use crate::playbook::{PlaybookStep, ResponseAction};
use chrono::Utc;
use netwatch_common::ThreatEvent;
use serde_json::{json, Value};
use std::time::Instant;

impl SoarEngine {
    pub(crate) async fn execute_step(
        &self,
        step: &PlaybookStep,
        event: &ThreatEvent,
    ) -> StepResult {
        let started = Instant::now();
        tracing::debug!(action = %step.action, "executing step");

        let outcome = match step.action {
            ResponseAction::Log => self.action_log(event, &step.parameters),
            ResponseAction::Enrich => self.action_enrich(event, &step.parameters),
            ResponseAction::Notify => self.action_notify(event, &step.parameters).await,
            ResponseAction::Capture => self.action_capture(event, &step.parameters),
            ResponseAction::BlockIp => self.action_block_ip(event, &step.parameters),
            ResponseAction::RateLimit => self.action_rate_limit(event, &step.parameters),
            ResponseAction::Script => self.action_script(event, &step.parameters).await,
            // No integration backs these yet; an explicit failed result is
            // more honest than a silent no-op
            ResponseAction::Alert | ResponseAction::Quarantine | ResponseAction::BlockDomain => {
                Err(format!("action {} not implemented", step.action))
            }
        };

        let (success, output, error) = match outcome {
            Ok(output) => (true, output, None),
            Err(message) => (false, Value::Null, Some(message)),
        };

        StepResult {
            action: step.action,
            success,
            dry_run: self.config.dry_run,
            output,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn action_log(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let level = str_param(params, "level").unwrap_or("info");
        let message = format!(
            "SOAR alert: {} from {}",
            event.event_type, event.source_ip
        );

        match level {
            "debug" => tracing::debug!("{message}"),
            "warning" => tracing::warn!("{message}"),
            "error" => tracing::error!("{message}"),
            _ => tracing::info!("{message}"),
        }

        Ok(json!({ "logged": true, "level": level }))
    }

    /// Pull context from the risk scorer and device inventory. Collaborator
    /// failures are swallowed; the step succeeds with whatever it got.
    fn action_enrich(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let mut enrichment = serde_json::Map::new();

        if bool_param(params, "include_device_info") {
            if let Some(inventory) = &self.inventory {
                match inventory.device_by_ip(&event.source_ip) {
                    Ok(Some(device)) => {
                        enrichment.insert(
                            "source_device".to_string(),
                            json!({
                                "hostname": device.hostname,
                                "mac": device.mac_address,
                                "vendor": device.vendor,
                                "device_type": device.device_type,
                            }),
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "device inventory lookup failed");
                    }
                }
            }
        }

        if bool_param(params, "include_risk_score") {
            if let Some(risk) = &self.risk {
                if let Some(score) = risk.current_score(&event.source_ip) {
                    enrichment.insert("source_risk_score".to_string(), json!(score));
                }
                if let Some(score) = risk.current_score(&event.destination_ip) {
                    enrichment.insert("destination_risk_score".to_string(), json!(score));
                }
            }
        }

        Ok(Value::Object(enrichment))
    }

    async fn action_notify(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let priority = str_param(params, "priority").unwrap_or("normal");
        let mut sent: Vec<&str> = Vec::new();

        if self.config.dry_run {
            tracing::info!(
                event_type = %event.event_type,
                priority,
                "DRY RUN: would send notification"
            );
            return Ok(json!({ "sent": sent, "dry_run": true }));
        }

        if let Some(notifier) = &self.notifier {
            match notifier.notify(event, priority).await {
                Ok(()) => sent.push("webhook"),
                Err(e) => tracing::warn!(error = %e, "notification failed"),
            }
        }

        Ok(json!({ "sent": sent }))
    }

    fn action_capture(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let duration = u64_param(params, "duration").unwrap_or(60);

        if self.config.dry_run {
            tracing::info!(
                source = %event.source_ip,
                duration,
                "DRY RUN: would start packet capture"
            );
            return Ok(json!({ "started": false, "dry_run": true }));
        }

        // Capture is delegated to the external capture manager; record intent
        tracing::info!(source = %event.source_ip, duration, "starting packet capture");
        Ok(json!({ "started": true, "duration": duration }))
    }

    /// The hourly cap is enforced before the dry-run branch, so a capped
    /// engine reports the violation even while rehearsing. Dry-run never
    /// consumes the cap.
    fn action_block_ip(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let direction = str_param(params, "direction").unwrap_or("both");
        let duration = u64_param(params, "duration").unwrap_or(3600);
        let now = Utc::now();

        {
            let mut blocks = self.blocks_this_hour.lock();
            let hour_ago = now - chrono::Duration::hours(1);
            while blocks.front().map(|t| *t < hour_ago).unwrap_or(false) {
                blocks.pop_front();
            }

            if blocks.len() >= self.config.max_blocks_per_hour {
                return Err("max blocks per hour exceeded".to_string());
            }

            if self.config.dry_run {
                tracing::warn!(
                    ip = %event.source_ip,
                    direction,
                    duration,
                    "DRY RUN: would block IP"
                );
                return Ok(json!({
                    "blocked": false,
                    "dry_run": true,
                    "ip": event.source_ip,
                }));
            }

            blocks.push_back(now);
        }

        // Firewall integration point; the engine records the decision
        tracing::warn!(ip = %event.source_ip, direction, duration, "blocking IP");
        Ok(json!({
            "blocked": true,
            "ip": event.source_ip,
            "direction": direction,
            "duration": duration,
        }))
    }

    fn action_rate_limit(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let limit = str_param(params, "limit").unwrap_or("10/minute");
        let duration = u64_param(params, "duration").unwrap_or(3600);

        if self.config.dry_run {
            tracing::info!(ip = %event.source_ip, limit, "DRY RUN: would rate limit");
            return Ok(json!({ "applied": false, "dry_run": true }));
        }

        tracing::info!(ip = %event.source_ip, limit, duration, "applying rate limit");
        Ok(json!({
            "applied": true,
            "ip": event.source_ip,
            "limit": limit,
            "duration": duration,
        }))
    }

    async fn action_script(&self, event: &ThreatEvent, params: &ParamMap) -> ActionOutcome {
        let Some(script) = str_param(params, "script") else {
            return Err("no script specified".to_string());
        };

        if self.config.dry_run {
            tracing::info!(script, "DRY RUN: would run script");
            return Ok(json!({ "executed": false, "dry_run": true }));
        }

        let payload =
            serde_json::to_string(event).map_err(|e| format!("event serialization: {e}"))?;

        match tokio::process::Command::new(script)
            .arg(payload)
            .output()
            .await
        {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let excerpt: String = stdout.chars().take(500).collect();
                Ok(json!({
                    "executed": true,
                    "return_code": output.status.code(),
                    "stdout": excerpt,
                }))
            }
            Err(e) => Err(format!("script execution failed: {e}")),
        }
    }
}

type ParamMap = std::collections::HashMap<String, Value>;
type ActionOutcome = Result<Value, String>;

fn str_param<'a>(params: &'a ParamMap, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn bool_param(params: &ParamMap, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn u64_param(params: &ParamMap, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}
