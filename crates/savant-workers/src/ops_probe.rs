//! Ops probe worker: high tier, allowed to run shell commands.
//!
//! The reference implementation runs nothing; it records what a probe run
//! would have inspected, step by step, observing cancellation between
//! steps. Exists mainly so the registry has a high-cost, wide-allowance
//! profile for least-privilege routing to avoid.

use async_trait::async_trait;
use savant_core::{CancelToken, Worker, WorkerInvocation, WorkerOutput};

const PROBE_STEPS: [&str; 3] = ["disk_usage", "service_health", "open_ports"];

pub struct OpsProbeWorker;

impl OpsProbeWorker {
    pub const PROFILE_ID: &'static str = "ops_probe";

    pub fn new() -> Self {
        Self
    }
}

impl Default for OpsProbeWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for OpsProbeWorker {
    fn profile_id(&self) -> &str {
        Self::PROFILE_ID
    }

    fn description(&self) -> &str {
        "Probes operational state and records one claim per probe step"
    }

    async fn execute(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancelToken,
    ) -> Result<WorkerOutput, Box<dyn std::error::Error + Send + Sync>> {
        let task = &invocation.task;
        let mut lines = vec![format!("# Probe: {}", task.topic), String::new()];
        for step in PROBE_STEPS {
            if cancel.is_cancelled() {
                return Err("cancelled before completion".into());
            }
            lines.push(format!("- {} :: probed :: {}", task.topic, step));
            tokio::task::yield_now().await;
        }
        Ok(WorkerOutput::new_document(
            task.topic.clone(),
            task.domain_tags.clone(),
            lines.join("\n"),
            format!("probe report for '{}'", task.topic),
        ))
    }
}
