//! Workflow runtime adapter (C9, §4.6).
//!
//! The RAG-query workflow ("ingest if needed, retrieve, synthesize") can run
//! either synchronously inline (C10's `/rag/query`) or as an external-task
//! instance tracked by a BPMN-style engine (`/workflows/rag-query`). The
//! [`WorkflowEngine`] trait keeps this core decoupled from any one engine
//! product; a concrete adapter implements it against whatever instance the
//! deployment runs (Camunda, Zeebe, or an in-process stand-in for tests).
//!
//! Shape is grounded on a fixed-sequence runner executing ordered external
//! tasks over a shared, JSON-serializable state object, with a normalized
//! status read that hides the engine's live-vs-history API split behind one
//! `WorkflowStatus`. Envelope variables passed to/from the engine are
//! namespaced (`llm_response`, `retrieval_chunks`, ...) so they never
//! collide with the engine's own process variables.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of one workflow instance (§4.6). `Errored` is terminal and
/// distinct from `Failed`-at-the-job-level: it means the engine itself
/// could not complete the instance, not that a single task retried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Errored,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Errored => "errored",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "errored" => Ok(WorkflowStatus::Errored),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => anyhow::bail!("invalid workflow status: '{}'", other),
        }
    }
}

/// Variable envelope exchanged with the engine, namespaced so RAG-core
/// variables never collide with other process variables on the same
/// instance (§4.6 "Envelope discipline").
pub type Envelope = HashMap<String, Value>;

pub struct WorkflowInstanceInfo {
    pub instance_id: String,
    pub status: WorkflowStatus,
    pub variables: Envelope,
    pub error_message: Option<String>,
}

/// Decouples the RAG-query workflow from any one BPMN engine product. A
/// concrete adapter talks to the engine's live API while the instance is
/// running and its history API once it has completed, presenting both
/// through the same [`WorkflowInstanceInfo`] shape.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn start(&self, process_key: &str, variables: Envelope) -> Result<String>;
    async fn read_status(&self, instance_id: &str) -> Result<WorkflowInstanceInfo>;
    async fn cancel(&self, instance_id: &str) -> Result<()>;
}

/// Poll an instance until it reaches a terminal status or `deadline` elapses
/// (§4.6 "Per-instance deadline and cancellation"). On deadline expiry the
/// instance is cancelled so it doesn't keep consuming engine resources.
pub async fn await_completion(
    engine: &dyn WorkflowEngine,
    instance_id: &str,
    poll_interval: Duration,
    deadline: Duration,
) -> Result<WorkflowInstanceInfo> {
    let start = tokio::time::Instant::now();
    loop {
        let info = engine.read_status(instance_id).await?;
        if info.status.is_terminal() {
            return Ok(info);
        }
        if start.elapsed() >= deadline {
            engine.cancel(instance_id).await?;
            anyhow::bail!("workflow instance {} exceeded deadline and was cancelled", instance_id);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// In-process stand-in used in tests and single-node deployments that don't
/// run a separate BPMN engine: instances complete synchronously on `start`.
pub struct InlineWorkflowEngine {
    instances: Mutex<HashMap<String, WorkflowInstanceInfo>>,
}

impl Default for InlineWorkflowEngine {
    fn default() -> Self {
        Self { instances: Mutex::new(HashMap::new()) }
    }
}

impl InlineWorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowEngine for InlineWorkflowEngine {
    async fn start(&self, _process_key: &str, variables: Envelope) -> Result<String> {
        let instance_id = Uuid::new_v4().to_string();
        let info = WorkflowInstanceInfo {
            instance_id: instance_id.clone(),
            status: WorkflowStatus::Completed,
            variables,
            error_message: None,
        };
        self.instances.lock().unwrap().insert(instance_id.clone(), info);
        Ok(instance_id)
    }

    async fn read_status(&self, instance_id: &str) -> Result<WorkflowInstanceInfo> {
        let instances = self.instances.lock().unwrap();
        let info = instances
            .get(instance_id)
            .ok_or_else(|| anyhow::anyhow!("unknown workflow instance: {}", instance_id))?;
        Ok(WorkflowInstanceInfo {
            instance_id: info.instance_id.clone(),
            status: info.status,
            variables: info.variables.clone(),
            error_message: info.error_message.clone(),
        })
    }

    async fn cancel(&self, instance_id: &str) -> Result<()> {
        let mut instances = self.instances.lock().unwrap();
        if let Some(info) = instances.get_mut(instance_id) {
            info.status = WorkflowStatus::Cancelled;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn workflow_status_round_trips() {
        assert_eq!(WorkflowStatus::from_str("completed").unwrap(), WorkflowStatus::Completed);
        assert!(WorkflowStatus::from_str("bogus").is_err());
        assert!(WorkflowStatus::Errored.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[tokio::test]
    async fn inline_engine_completes_synchronously() {
        let engine = InlineWorkflowEngine::new();
        let mut vars = Envelope::new();
        vars.insert("question".to_string(), Value::String("hi".to_string()));
        let instance_id = engine.start("rag-query", vars).await.unwrap();

        let info = engine.read_status(&instance_id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Completed);
        assert_eq!(info.variables.get("question").unwrap(), "hi");
    }

    #[tokio::test]
    async fn await_completion_returns_immediately_for_terminal_instance() {
        let engine = InlineWorkflowEngine::new();
        let instance_id = engine.start("rag-query", Envelope::new()).await.unwrap();
        let info = await_completion(&engine, &instance_id, Duration::from_millis(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(info.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn read_status_unknown_instance_errors() {
        let engine = InlineWorkflowEngine::new();
        assert!(engine.read_status("missing").await.is_err());
    }
}
