//! # Flow Runtime
//!
//! Executes compiled graphs from `start` to termination. Each trigger
//! spawns one task that owns its execution record and shared state; many
//! executions run concurrently, but nothing is shared between them.
//!
//! Per-node protocol: log "node started", resolve declared params
//! through the expression evaluator, `prep`, retry-wrapped `exec`
//! (sleeping `wait` between attempts), fallback or fail, `post`, record
//! the result under `results.<node_id>`, then follow the edge selected by
//! the returned action. No edge means the flow terminated successfully.
//!
//! Lifecycle: `pending → running → {completed, failed, cancelled}`.
//! Every transition is persisted and logged. Cancellation is checked
//! between nodes and at retry wait boundaries; an in-flight `exec` is
//! never preempted.

use crate::action::Action;
use crate::expr::{EvalContext, Evaluator, SecretSource};
use crate::flow::{FlowGraph, GraphNode, LoaderError, build_graph};
use crate::model::{Execution, ExecutionLogEntry, ExecutionStatus, LogLevel};
use crate::node::registry::NodeRegistry;
use crate::node::NodeError;
use crate::shared::SharedState;
use crate::storage::{StorageError, StorageProvider};
use crate::webhook::{EventType, NullEmitter, WebhookEmitter, WebhookEvent};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors surfaced when triggering or inspecting executions.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("runtime is shutting down")]
    ShuttingDown,
}

/// Hosts concurrent executions and owns their cancellation tokens.
pub struct FlowRuntime {
    storage: Arc<dyn StorageProvider>,
    secrets: Arc<dyn SecretSource>,
    registry: Arc<NodeRegistry>,
    webhooks: Arc<dyn WebhookEmitter>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl FlowRuntime {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        secrets: Arc<dyn SecretSource>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            storage,
            secrets,
            registry,
            webhooks: Arc::new(NullEmitter),
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Notify this emitter on node and flow milestones.
    pub fn with_webhooks(mut self, webhooks: Arc<dyn WebhookEmitter>) -> Self {
        self.webhooks = webhooks;
        self
    }

    /// Fetch a flow, compile it, and start one execution seeded with the
    /// trigger payload. Returns the pending execution record; the run
    /// itself proceeds on its own task.
    pub async fn trigger(
        &self,
        account_id: &str,
        flow_id: &str,
        initial_shared: Value,
    ) -> Result<Execution, RuntimeError> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::ShuttingDown);
        }

        let definition = self.storage.flows().get_flow(account_id, flow_id).await?;
        let graph = build_graph(&definition, &self.registry)?;

        let execution = Execution::new(flow_id, account_id);
        self.storage.executions().save_execution(&execution).await?;

        let token = self.shutdown.child_token();
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(execution.id.clone(), token.clone());

        let task = ExecutionTask {
            storage: self.storage.clone(),
            evaluator: Evaluator::new(self.secrets.clone()),
            webhooks: self.webhooks.clone(),
            active: self.active.clone(),
            token,
        };
        let record = execution.clone();
        let shared = SharedState::seed(initial_shared);
        tokio::spawn(async move {
            task.run(graph, record, shared).await;
        });

        Ok(execution)
    }

    /// Request cancellation. Takes effect at the next node boundary or
    /// retry wait; an in-flight exec finishes its attempt first.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match active.get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of executions currently running.
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution, RuntimeError> {
        self.storage
            .executions()
            .get_execution(execution_id)
            .await
            .map_err(|_| RuntimeError::ExecutionNotFound(execution_id.to_string()))
    }

    pub async fn get_logs(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionLogEntry>, RuntimeError> {
        Ok(self.storage.executions().get_logs(execution_id).await?)
    }

    /// Graceful stop: no new executions or nodes are scheduled, and
    /// running executions get `window` to reach a node boundary, where
    /// they mark themselves cancelled. Returns once the window elapses or
    /// every execution has drained.
    pub async fn shutdown(&self, window: Duration) {
        info!("runtime shutting down");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + window;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let stragglers = self.active_count();
        if stragglers > 0 {
            warn!(stragglers, "executions still draining after shutdown window");
        }
    }
}

/// Everything one spawned execution owns.
struct ExecutionTask {
    storage: Arc<dyn StorageProvider>,
    evaluator: Evaluator,
    webhooks: Arc<dyn WebhookEmitter>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
    token: CancellationToken,
}

impl ExecutionTask {
    async fn run(self, mut graph: FlowGraph, mut execution: Execution, mut shared: SharedState) {
        execution.status = ExecutionStatus::Running;
        self.persist(&execution).await;
        self.log(
            ExecutionLogEntry::new(&execution.id, LogLevel::Info, "execution started")
                .with_data(json!({"flow_id": execution.flow_id})),
        )
        .await;

        let total_nodes = graph.node_count().max(1);
        let mut completed_nodes = 0usize;
        let mut current = graph.start.clone();

        let outcome = loop {
            if self.token.is_cancelled() {
                break ExecutionStatus::Cancelled;
            }

            execution.current_node_id = Some(current.clone());
            self.persist(&execution).await;

            match self.run_node(&current, &mut graph, &mut execution, &mut shared).await {
                Ok(Some(action)) => {
                    completed_nodes += 1;
                    execution.progress =
                        (completed_nodes as f64 / total_nodes as f64).clamp(0.0, 1.0);
                    self.persist(&execution).await;

                    match graph.successor(&current, action.as_str()) {
                        Some(next) => current = next.to_string(),
                        // No edge registered for this action: done.
                        None => break ExecutionStatus::Completed,
                    }
                }
                Ok(None) => break ExecutionStatus::Cancelled,
                Err(node_error) => {
                    execution.error = Some(node_error.to_string());
                    break ExecutionStatus::Failed;
                }
            }
        };

        self.finish(&mut execution, outcome).await;
    }

    /// Run one node through the full protocol. `Ok(Some(action))` routes,
    /// `Ok(None)` means cancellation was observed, `Err` fails the
    /// execution.
    async fn run_node(
        &self,
        node_id: &str,
        graph: &mut FlowGraph,
        execution: &mut Execution,
        shared: &mut SharedState,
    ) -> Result<Option<Action>, NodeError> {
        self.log(
            ExecutionLogEntry::new(&execution.id, LogLevel::Info, "node started")
                .with_node(node_id),
        )
        .await;

        let Some(entry) = graph.nodes.get_mut(node_id) else {
            return Err(NodeError::Exec(format!("node disappeared from graph: {node_id}")));
        };
        let retry = entry.retry;
        let declared_params = entry.params.clone();

        let mut prepared: Option<Value> = None;
        let mut last_error: Option<NodeError> = None;

        for attempt in 1..=retry.max_retries.max(1) {
            if attempt > 1 {
                // Cancellation is honoured at the wait boundary between
                // attempts.
                tokio::select! {
                    _ = self.token.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(retry.wait_duration()) => {}
                }
            }

            let attempt_result = self
                .attempt(node_id, entry, &declared_params, execution, shared, &mut prepared)
                .await;

            match attempt_result {
                Ok(result) => {
                    return self
                        .complete_node(node_id, entry, execution, shared, prepared, result, false)
                        .await
                        .map(Some);
                }
                Err(attempt_error) => {
                    self.log(
                        ExecutionLogEntry::new(
                            &execution.id,
                            LogLevel::Warn,
                            format!("attempt {attempt} failed: {attempt_error}"),
                        )
                        .with_node(node_id)
                        .with_data(json!({"attempt": attempt, "max_retries": retry.max_retries})),
                    )
                    .await;
                    last_error = Some(attempt_error);
                }
            }
        }

        let exhausted =
            last_error.unwrap_or_else(|| NodeError::Exec("node failed without error".to_string()));

        if entry.node.has_fallback() {
            let fallback_input = prepared.clone().unwrap_or(Value::Null);
            match entry.node.exec_fallback(fallback_input, exhausted).await {
                Ok(result) => {
                    self.log(
                        ExecutionLogEntry::new(
                            &execution.id,
                            LogLevel::Warn,
                            "retries exhausted, fallback produced a result",
                        )
                        .with_node(node_id),
                    )
                    .await;
                    return self
                        .complete_node(node_id, entry, execution, shared, prepared, result, true)
                        .await
                        .map(Some);
                }
                Err(fallback_error) => {
                    self.log(
                        ExecutionLogEntry::new(
                            &execution.id,
                            LogLevel::Error,
                            format!("fallback failed: {fallback_error}"),
                        )
                        .with_node(node_id),
                    )
                    .await;
                    return Err(fallback_error);
                }
            }
        }

        Err(exhausted)
    }

    /// One attempt: resolve params, prep (first attempt only), exec.
    /// Expression failures enter the retry path like any other attempt
    /// failure; exec always re-runs against the same prepared input.
    async fn attempt(
        &self,
        node_id: &str,
        entry: &mut GraphNode,
        declared_params: &Value,
        execution: &Execution,
        shared: &SharedState,
        prepared: &mut Option<Value>,
    ) -> Result<Value, NodeError> {
        let mut ctx = EvalContext::new();
        ctx.bind("shared", shared.as_value());
        ctx.bind("results", Value::Object(execution.results.clone()));
        ctx.bind("accountID", Value::String(execution.account_id.clone()));
        ctx.bind("executionID", Value::String(execution.id.clone()));
        ctx.bind("nodeID", Value::String(node_id.to_string()));

        let params = self
            .evaluator
            .resolve_params(&execution.account_id, declared_params, &mut ctx)
            .await
            .map_err(|e| NodeError::Prep(e.to_string()))?;
        entry.node.set_params(params);

        if prepared.is_none() {
            *prepared = Some(entry.node.prep(shared).await?);
        }
        let input = prepared
            .clone()
            .unwrap_or(Value::Null);
        entry.node.exec(input).await
    }

    /// Post-process a successful (or fallback) result: write outputs,
    /// record `results.<node_id>`, and pick the routing action.
    #[allow(clippy::too_many_arguments)]
    async fn complete_node(
        &self,
        node_id: &str,
        entry: &mut GraphNode,
        execution: &mut Execution,
        shared: &mut SharedState,
        prepared: Option<Value>,
        result: Value,
        via_fallback: bool,
    ) -> Result<Action, NodeError> {
        let posted = entry
            .node
            .post(shared, prepared.unwrap_or(Value::Null), result.clone())
            .await?;

        // A fallback result still flows through post for output writing,
        // but routing always takes the error edge.
        let action = if via_fallback {
            Action::error_action()
        } else {
            posted
        };

        execution
            .results
            .insert(node_id.to_string(), result.clone());

        self.log(
            ExecutionLogEntry::new(&execution.id, LogLevel::Info, "node completed")
                .with_node(node_id)
                .with_data(json!({"action": action.as_str()})),
        )
        .await;

        self.webhooks
            .emit(
                &WebhookEvent::new(
                    EventType::NodeCompleted,
                    &execution.flow_id,
                    &execution.id,
                    json!({"action": action.as_str(), "result": result}),
                )
                .with_node(node_id),
            )
            .await;

        Ok(action)
    }

    async fn finish(&self, execution: &mut Execution, status: ExecutionStatus) {
        execution.status = status;
        execution.end_time = Some(chrono::Utc::now());
        if status == ExecutionStatus::Completed {
            execution.progress = 1.0;
        }
        self.persist(execution).await;

        let (level, message) = match status {
            ExecutionStatus::Completed => (LogLevel::Info, "execution completed"),
            ExecutionStatus::Failed => (LogLevel::Error, "execution failed"),
            ExecutionStatus::Cancelled => (LogLevel::Warn, "execution cancelled"),
            _ => (LogLevel::Warn, "execution ended in non-terminal state"),
        };
        let mut entry = ExecutionLogEntry::new(&execution.id, level, message);
        if let Some(error) = &execution.error {
            entry = entry.with_data(json!({"error": error}));
        }
        self.log(entry).await;

        let event_type = match status {
            ExecutionStatus::Failed => Some(EventType::FlowFailed),
            ExecutionStatus::Completed | ExecutionStatus::Cancelled => {
                Some(EventType::FlowCompleted)
            }
            _ => None,
        };
        if let Some(event_type) = event_type {
            self.webhooks
                .emit(&WebhookEvent::new(
                    event_type,
                    &execution.flow_id,
                    &execution.id,
                    json!({
                        "status": execution.status.to_string(),
                        "error": execution.error,
                    }),
                ))
                .await;
        }

        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&execution.id);
        info!(execution_id = %execution.id, status = %execution.status, "execution finished");
    }

    async fn persist(&self, execution: &Execution) {
        if let Err(error) = self.storage.executions().save_execution(execution).await {
            error!(execution_id = %execution.id, %error, "failed to persist execution");
        }
    }

    async fn log(&self, entry: ExecutionLogEntry) {
        if let Err(error) = self.storage.executions().append_log(&entry).await {
            error!(execution_id = %entry.execution_id, %error, "failed to append log");
        }
    }
}
