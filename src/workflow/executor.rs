// Executor - Drives one task through the stage graph with checkpointing
use super::checkpoint::{CheckpointStore, MemoryCheckpointer};
use super::graph::{Node, NodeType, RunContext, StateGraph};
use super::progress::{NoopObserver, ProgressObserver, ProgressReporter};
use super::retry::RetryPolicy;
use super::state::{StateUpdate, TaskConfig, TaskState};
use crate::error::{CollaboratorError, PipelineError, Result};
use crate::services::Services;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Executor config
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_iterations: usize,
    /// Upper bound for a sequential stage. Fan-out rounds are not bounded as
    /// a whole; they wait for every unit.
    pub stage_timeout: Duration,
    /// Upper bound for one attempt of a fan-out unit; an attempt that runs
    /// longer fails that unit with a timeout.
    pub unit_timeout: Option<Duration>,
    /// Concurrent units per fan-out round; `None` is unbounded.
    pub max_concurrency: Option<usize>,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_clip_seconds: f64,
    pub bgm_path: Option<String>,
    pub bgm_volume: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 32,
            stage_timeout: Duration::from_secs(1800),
            unit_timeout: None,
            max_concurrency: None,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(300),
            max_clip_seconds: 5.0,
            bgm_path: None,
            bgm_volume: 0.2,
        }
    }
}

/// Pipeline executor
pub struct PipelineExecutor {
    graph: StateGraph,
    services: Services,
    checkpointer: Arc<dyn CheckpointStore>,
    observer: Arc<dyn ProgressObserver>,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

impl PipelineExecutor {
    pub fn new(
        graph: StateGraph,
        services: Services,
        checkpointer: Arc<dyn CheckpointStore>,
        observer: Arc<dyn ProgressObserver>,
        config: ExecutorConfig,
    ) -> Result<Self> {
        if !graph.is_compiled() {
            return Err(PipelineError::Graph(
                "Cannot create executor with uncompiled graph".to_string(),
            ));
        }

        Ok(Self {
            graph,
            services,
            checkpointer,
            observer,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops every task run by this executor.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn checkpointer(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpointer
    }

    /// Create a task for `config` and run it to a terminal state.
    pub async fn run(&self, config: TaskConfig) -> Result<TaskState> {
        let state = TaskState::new(Uuid::new_v4().to_string(), config);
        self.run_state(state).await
    }

    /// Continue a task from its latest checkpoint.
    pub async fn resume(&self, task_id: &str) -> Result<TaskState> {
        let checkpoint = self
            .checkpointer
            .load(task_id)
            .await?
            .ok_or_else(|| PipelineError::Checkpoint(format!("No checkpoint for task '{}'", task_id)))?;

        info!(
            "🔄 Resuming task {} from checkpoint {} (step: {})",
            task_id,
            checkpoint.checkpoint_id,
            checkpoint.state.step()
        );
        self.run_state(checkpoint.state).await
    }

    pub async fn run_state(&self, state: TaskState) -> Result<TaskState> {
        let cancel = self.cancel.child_token();
        self.run_with_cancel(state, &cancel).await
    }

    /// Drive `state` from its `current_node` (or the entry point) until it is
    /// done or failed. Stage errors, cancellation and falling off the graph
    /// all end in `failed`; only graph misconfiguration is returned as `Err`.
    pub async fn run_with_cancel(&self, mut state: TaskState, cancel: &CancellationToken) -> Result<TaskState> {
        if state.is_terminal() {
            info!("Task {} already {}; nothing to run", state.task_id, state.step());
            return Ok(state);
        }

        let progress = ProgressReporter::new(state.task_id.clone(), self.observer.clone());
        let ctx = RunContext {
            services: &self.services,
            config: &self.config,
            cancel,
            progress: &progress,
        };

        let mut current_node = match state.current_node.clone() {
            Some(node) => node,
            None => self
                .graph
                .get_entry_point()
                .cloned()
                .ok_or_else(|| PipelineError::Graph("No entry point".to_string()))?,
        };
        info!("🚀 Starting task {} at '{}'", state.task_id, current_node);

        let mut iteration = 0;
        loop {
            iteration += 1;

            if cancel.is_cancelled() {
                warn!("🛑 Task {} cancelled before '{}'", state.task_id, current_node);
                state.apply_update(StateUpdate::failed("cancelled"));
                self.commit(&state, &progress, "Task cancelled").await;
                break;
            }

            if iteration > self.config.max_iterations {
                warn!("⚠️ Task {} hit iteration limit: {}", state.task_id, self.config.max_iterations);
                state.apply_update(StateUpdate::failed(format!(
                    "Exceeded max iterations: {}",
                    self.config.max_iterations
                )));
                self.commit(&state, &progress, "Iteration limit exceeded").await;
                break;
            }

            let node = self
                .graph
                .get_node(&current_node)
                .ok_or_else(|| PipelineError::Graph(format!("Node '{}' not found", current_node)))?;
            state.current_node = Some(current_node.clone());

            info!("📍 Step {}: executing '{}' ({})", iteration, node.id, node.description);

            match self.execute_node(node, &state, &ctx).await {
                Ok(update) => state.apply_update(update),
                Err(PipelineError::Cancelled) | Err(PipelineError::Collaborator(CollaboratorError::Cancelled)) => {
                    warn!("🛑 Task {} cancelled during '{}'", state.task_id, node.id);
                    state.apply_update(StateUpdate::failed("cancelled"));
                }
                Err(e) => {
                    error!("❌ Node '{}' failed: {}", node.id, e);
                    state.apply_update(StateUpdate::failed(format!("{}: {}", node.id, e)));
                }
            }

            let next = if state.is_terminal() {
                None
            } else {
                self.graph.get_next_node(&current_node, &state)
            };
            state.current_node = next.clone();

            match next {
                Some(next_node) => {
                    self.commit(&state, &progress, format!("{} finished", current_node)).await;
                    current_node = next_node;
                }
                None => {
                    if !state.is_terminal() {
                        warn!("🏁 Graph ended at '{}' before the task completed", current_node);
                        state.apply_update(StateUpdate::failed(format!(
                            "Pipeline ended at '{}' without producing a final video",
                            current_node
                        )));
                    }
                    self.commit(&state, &progress, format!("Task {}", state.step())).await;
                    break;
                }
            }
        }

        info!(
            "🎬 Task {} finished: {} (iterations: {}, progress: {:.0}%)",
            state.task_id,
            state.step(),
            iteration,
            progress.current() * 100.0
        );

        Ok(state)
    }

    /// Run one node racing pipeline cancellation. Sequential stages run under
    /// the stage timeout; fan-out rounds keep their barrier and bound each
    /// unit instead.
    async fn execute_node(&self, node: &Node, state: &TaskState, ctx: &RunContext<'_>) -> Result<StateUpdate> {
        if node.node_type == NodeType::FanOut {
            info!("⏳ '{}' waits for every unit before merging", node.id);
            return tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(PipelineError::Cancelled),
                result = node.function.execute(state, ctx) => result,
            };
        }

        let limit = self.config.stage_timeout;
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(PipelineError::Cancelled),
            outcome = timeout(limit, node.function.execute(state, ctx)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout {
                    node: node.id.clone(),
                    limit,
                }),
            },
        }
    }

    /// Emit the transition snapshot and persist a checkpoint. Checkpoint
    /// failures are logged; they never fail the task.
    async fn commit(&self, state: &TaskState, progress: &ProgressReporter, message: impl Into<String>) {
        progress.snapshot(state, message);
        match self.checkpointer.save(&state.task_id, state).await {
            Ok(checkpoint_id) => tracing::debug!("Checkpoint {} at {}", checkpoint_id, state.step()),
            Err(e) => warn!("⚠️ Failed to save checkpoint for task {}: {}", state.task_id, e),
        }
    }
}

/// Builder for the pipeline executor
pub struct ExecutorBuilder {
    graph: Option<StateGraph>,
    services: Option<Services>,
    checkpointer: Option<Arc<dyn CheckpointStore>>,
    observer: Option<Arc<dyn ProgressObserver>>,
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self {
            graph: None,
            services: None,
            checkpointer: None,
            observer: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_graph(mut self, graph: StateGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointStore>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn build(self) -> Result<PipelineExecutor> {
        let graph = self
            .graph
            .ok_or_else(|| PipelineError::Graph("Graph not set".to_string()))?;
        let services = self
            .services
            .ok_or_else(|| PipelineError::Graph("Services not set".to_string()))?;
        PipelineExecutor::new(
            graph,
            services,
            self.checkpointer
                .unwrap_or_else(|| Arc::new(MemoryCheckpointer::new())),
            self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            self.config,
        )
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
