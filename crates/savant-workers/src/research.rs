//! General research worker: mid-tier, may fetch external sources.
//!
//! The reference implementation never actually reaches the network; it
//! produces a deterministic finding per domain tag so routing, dedup, and
//! synthesis behavior can be exercised end to end without any I/O.

use async_trait::async_trait;
use savant_core::{CancelToken, Worker, WorkerInvocation, WorkerOutput};
use tracing::debug;

/// Mid-tier worker allowed to read, write, and fetch external sources.
pub struct ResearchWorker;

impl ResearchWorker {
    /// Profile id this worker executes under.
    pub const PROFILE_ID: &'static str = "research_analyst";

    pub fn new() -> Self {
        Self
    }
}

impl Default for ResearchWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for ResearchWorker {
    fn profile_id(&self) -> &str {
        Self::PROFILE_ID
    }

    fn description(&self) -> &str {
        "Researches a topic and records one claim per domain tag"
    }

    async fn execute(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancelToken,
    ) -> Result<WorkerOutput, Box<dyn std::error::Error + Send + Sync>> {
        let task = &invocation.task;
        let mut lines = vec![format!("# Findings: {}", task.topic), String::new()];

        // One "step" per tag, observing cancellation between steps.
        for tag in &task.domain_tags {
            if cancel.is_cancelled() {
                return Err("cancelled before completion".into());
            }
            lines.push(format!("- {} :: relevant_to :: {}", task.topic, tag));
            tokio::task::yield_now().await;
        }
        lines.push(format!("- {} :: researched_by :: {}", task.topic, Self::PROFILE_ID));

        debug!(task_id = %task.id, topic = %task.topic, "research pass finished");
        Ok(WorkerOutput::new_document(
            task.topic.clone(),
            task.domain_tags.clone(),
            lines.join("\n"),
            format!("research findings for '{}'", task.topic),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use savant_core::{Operation, OperationSet, Task};

    fn invocation(request: &str, tags: &[&str]) -> WorkerInvocation {
        let mut task = Task::new(request, 0, Utc::now() + chrono::Duration::minutes(5));
        task.topic = "react-hooks".to_string();
        task.domain_tags = tags.iter().map(|s| s.to_string()).collect();
        task.required_operations = OperationSet::of(&[Operation::ReadDoc, Operation::WriteDoc]);
        WorkerInvocation {
            task,
            allowance: OperationSet::of(&[
                Operation::ReadDoc,
                Operation::WriteDoc,
                Operation::FetchExternal,
            ]),
        }
    }

    #[tokio::test]
    async fn emits_one_claim_per_tag() {
        let output = ResearchWorker::new()
            .execute(&invocation("research react hooks", &["react", "web"]), &CancelToken::new())
            .await
            .unwrap();
        assert!(output.doc_id.is_none());
        assert_eq!(output.body.matches("relevant_to").count(), 2);
        assert!(output.body.contains("researched_by"));
    }

    #[tokio::test]
    async fn observes_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = ResearchWorker::new()
            .execute(&invocation("research react hooks", &["react"]), &cancel)
            .await;
        assert!(result.is_err());
    }
}
