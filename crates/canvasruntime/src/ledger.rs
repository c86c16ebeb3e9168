use async_trait::async_trait;
use canvascore::{
    EngineError, NodeId, NodeRun, NodeRunId, NodeRunStatus, RunDetails, RunId, RunScope,
    RunStatus, TriggerType, WorkflowRun,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Append-only record of workflow runs and node runs. Each row is written
/// by exactly one logical owner: the run by the scheduler, each node run
/// by that node's execution unit.
#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn create_run(&self, workflow_id: &str, scope: RunScope) -> WorkflowRun;

    /// Write the run's terminal status plus finished timestamp/duration.
    /// An externally-set CANCELLED status is preserved; only the
    /// bookkeeping fields are filled in that case.
    async fn finalize_run(&self, run_id: RunId, status: RunStatus) -> Result<(), EngineError>;

    /// Mark a RUNNING run as cancelled/failed out-of-band. Observed
    /// cooperatively by the scheduler at the top of each batch iteration.
    async fn interrupt_run(&self, run_id: RunId, status: RunStatus) -> Result<(), EngineError>;

    async fn run_status(&self, run_id: RunId) -> Result<RunStatus, EngineError>;

    async fn create_node_run(
        &self,
        run_id: RunId,
        node_id: &NodeId,
        inputs: serde_json::Value,
    ) -> NodeRun;

    async fn complete_node_run(
        &self,
        node_run_id: NodeRunId,
        outputs: serde_json::Value,
    ) -> Result<(), EngineError>;

    async fn fail_node_run(&self, node_run_id: NodeRunId, error: String)
        -> Result<(), EngineError>;

    /// A run with its node runs ordered by start time, for the polling
    /// status reader.
    async fn get_run_details(&self, run_id: RunId) -> Result<RunDetails, EngineError>;

    /// Runs for one workflow, newest first.
    async fn get_workflow_runs(&self, workflow_id: &str, limit: usize) -> Vec<WorkflowRun>;
}

/// In-memory ledger. Execution state is not persisted beyond the process;
/// this is the whole of the run history the status reader polls.
#[derive(Default)]
pub struct MemoryLedger {
    runs: RwLock<HashMap<RunId, WorkflowRun>>,
    node_runs: RwLock<HashMap<NodeRunId, NodeRun>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLedger for MemoryLedger {
    async fn create_run(&self, workflow_id: &str, scope: RunScope) -> WorkflowRun {
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
            scope,
            trigger_type: TriggerType::Manual,
            started_at: Utc::now(),
            finished_at: None,
            duration: None,
        };
        self.runs.write().await.insert(run.id, run.clone());
        run
    }

    async fn finalize_run(&self, run_id: RunId, status: RunStatus) -> Result<(), EngineError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(EngineError::RunNotFound(run_id))?;

        if run.status == RunStatus::Running {
            run.status = status;
        }
        let finished = Utc::now();
        run.finished_at = Some(finished);
        run.duration = Some((finished - run.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }

    async fn interrupt_run(&self, run_id: RunId, status: RunStatus) -> Result<(), EngineError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(EngineError::RunNotFound(run_id))?;
        if run.status == RunStatus::Running {
            run.status = status;
        }
        Ok(())
    }

    async fn run_status(&self, run_id: RunId) -> Result<RunStatus, EngineError> {
        let runs = self.runs.read().await;
        runs.get(&run_id)
            .map(|r| r.status)
            .ok_or(EngineError::RunNotFound(run_id))
    }

    async fn create_node_run(
        &self,
        run_id: RunId,
        node_id: &NodeId,
        inputs: serde_json::Value,
    ) -> NodeRun {
        let node_run = NodeRun {
            id: Uuid::new_v4(),
            run_id,
            node_id: node_id.clone(),
            status: NodeRunStatus::Running,
            inputs,
            outputs: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration: None,
        };
        self.node_runs
            .write()
            .await
            .insert(node_run.id, node_run.clone());
        node_run
    }

    async fn complete_node_run(
        &self,
        node_run_id: NodeRunId,
        outputs: serde_json::Value,
    ) -> Result<(), EngineError> {
        let mut node_runs = self.node_runs.write().await;
        let node_run = node_runs
            .get_mut(&node_run_id)
            .ok_or(EngineError::NodeRunNotFound(node_run_id))?;
        let finished = Utc::now();
        node_run.status = NodeRunStatus::Completed;
        node_run.outputs = Some(outputs);
        node_run.finished_at = Some(finished);
        node_run.duration =
            Some((finished - node_run.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }

    async fn fail_node_run(
        &self,
        node_run_id: NodeRunId,
        error: String,
    ) -> Result<(), EngineError> {
        let mut node_runs = self.node_runs.write().await;
        let node_run = node_runs
            .get_mut(&node_run_id)
            .ok_or(EngineError::NodeRunNotFound(node_run_id))?;
        let finished = Utc::now();
        node_run.status = NodeRunStatus::Failed;
        node_run.error = Some(error);
        node_run.finished_at = Some(finished);
        node_run.duration =
            Some((finished - node_run.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }

    async fn get_run_details(&self, run_id: RunId) -> Result<RunDetails, EngineError> {
        let run = {
            let runs = self.runs.read().await;
            runs.get(&run_id)
                .cloned()
                .ok_or(EngineError::RunNotFound(run_id))?
        };

        let mut node_runs: Vec<NodeRun> = self
            .node_runs
            .read()
            .await
            .values()
            .filter(|nr| nr.run_id == run_id)
            .cloned()
            .collect();
        node_runs.sort_by_key(|nr| nr.started_at);

        Ok(RunDetails { run, node_runs })
    }

    async fn get_workflow_runs(&self, workflow_id: &str, limit: usize) -> Vec<WorkflowRun> {
        let runs = self.runs.read().await;
        let mut matching: Vec<WorkflowRun> = runs
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        matching
    }
}
