//! Archivist worker: cheapest tier, read/write only.
//!
//! Handles note-taking and summary requests that need no external access.
//! Routing prefers it over the research analyst whenever both qualify,
//! which is exactly the least-privilege ordering the registry promises.

use async_trait::async_trait;
use savant_core::{CancelToken, Worker, WorkerInvocation, WorkerOutput};

pub struct ArchivistWorker;

impl ArchivistWorker {
    pub const PROFILE_ID: &'static str = "archivist";

    pub fn new() -> Self {
        Self
    }
}

impl Default for ArchivistWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for ArchivistWorker {
    fn profile_id(&self) -> &str {
        Self::PROFILE_ID
    }

    fn description(&self) -> &str {
        "Summarizes a request into a note document without external access"
    }

    async fn execute(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancelToken,
    ) -> Result<WorkerOutput, Box<dyn std::error::Error + Send + Sync>> {
        if cancel.is_cancelled() {
            return Err("cancelled before completion".into());
        }
        let task = &invocation.task;
        let body = format!(
            "# Note: {}\n\n- {} :: summarized_by :: {}\n- {} :: tag_count :: {}\n",
            task.topic,
            task.topic,
            Self::PROFILE_ID,
            task.topic,
            task.domain_tags.len(),
        );
        Ok(WorkerOutput::new_document(
            task.topic.clone(),
            task.domain_tags.clone(),
            body,
            format!("note for '{}'", task.topic),
        ))
    }
}
