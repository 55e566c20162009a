//! Executor: runs chains stage by stage on a bounded worker pool.
//!
//! Each started chain gets a driver task that walks its stages in order.
//! A driver only holds a pool permit while a task body is executing, so a
//! stage blocked on constraints or sleeping through a backoff does not
//! occupy the pool.
//!
//! All state lives in the [`TaskStore`]. The driver never trusts its own view
//! of the chain: every transition goes through the store. A transition
//! rejected because the chain was cancelled or replaced meanwhile ends the
//! driver quietly; any other rejection fails the chain with the store error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::{Chain, Stage};
use super::gc_loop::RetentionLoop;
use super::retry::RetryPolicy;
use super::status::{ChainView, ExecutorStatus};
use crate::config::{ConfigError, ExecutorConfig};
use crate::domain::{
    ChainId, ChainRecord, ChainResult, ChainStatus, Data, Outcome, ProgressEvent, StoreError,
    TaskId, TaskName, TaskRecord, TaskState,
};
use crate::ports::constraint::first_unmet;
use crate::ports::{
    Clock, EnvSnapshot, EnvironmentProvider, IdGenerator, NoopSink, ProgressSink, StateStream,
    StaticEnvironment, SystemClock, TaskStore, UlidGenerator,
};
use crate::store::InMemoryTaskStore;
use crate::typed::TaskContext;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor is shut down")]
    ShutDown,

    #[error("chain {0} not found")]
    ChainNotFound(ChainId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Wires the executor's collaborators. Anything not set falls back to the
/// in-memory/default implementation.
///
/// # Example
/// ```ignore
/// let executor = Executor::builder(config)
///     .environment(env.clone())
///     .sink(Arc::new(TracingSink))
///     .build()?;
/// ```
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    env: Option<Arc<dyn EnvironmentProvider>>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ExecutorBuilder {
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn environment(mut self, env: Arc<dyn EnvironmentProvider>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the config and assemble the executor.
    pub fn build(self) -> Result<Executor> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryTaskStore::with_clock(clock.clone())),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(clock.clone())),
        };
        let env: Arc<dyn EnvironmentProvider> = match self.env {
            Some(env) => env,
            None => Arc::new(StaticEnvironment::new(EnvSnapshot::default())),
        };
        let sink: Arc<dyn ProgressSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(NoopSink),
        };

        Ok(Executor {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(self.config.pool_size)),
                config: self.config,
                store,
                clock,
                ids,
                env,
                sink,
                shutdown: CancellationToken::new(),
                chains: Mutex::new(HashMap::new()),
                drivers: Mutex::new(Vec::new()),
                retention: Mutex::new(None),
            }),
        })
    }
}

/// Runs chains. Cheap to clone; clones share the pool and the store.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExecutorConfig,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    env: Arc<dyn EnvironmentProvider>,
    sink: Arc<dyn ProgressSink>,
    permits: Arc<Semaphore>,

    /// Parent of every chain token.
    shutdown: CancellationToken,

    /// Cancellation tokens of chains whose driver is still alive.
    chains: Mutex<HashMap<ChainId, CancellationToken>>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
    retention: Mutex<Option<RetentionLoop>>,
}

impl Executor {
    pub fn builder(config: ExecutorConfig) -> ExecutorBuilder {
        ExecutorBuilder {
            config,
            store: None,
            clock: None,
            ids: None,
            env: None,
            sink: None,
        }
    }

    /// Executor with in-memory store, system clock, default environment and
    /// no progress reporting.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// Submit a chain.
    ///
    /// An active chain with the same name is cancelled first. The new chain
    /// is registered before this returns; it stays `Pending` until its first
    /// stage is dispatched.
    pub async fn start(&self, chain: Chain) -> Result<ChainHandle> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(ExecutorError::ShutDown);
        }
        if let Some(interval) = inner.config.retention_interval() {
            self.start_retention(interval);
        }

        let chain_id = inner.ids.generate_chain_id();
        let now = inner.clock.now();
        let max_retries = inner.config.retry.max_retries;

        let task_ids: Vec<TaskId> = chain
            .stages()
            .iter()
            .map(|_| inner.ids.generate_task_id())
            .collect();
        let tasks: Vec<TaskRecord> = chain
            .stages()
            .iter()
            .zip(&task_ids)
            .enumerate()
            .map(|(index, (stage, &task_id))| {
                let record = TaskRecord::new(task_id, stage.task_name.clone(), max_retries, now)
                    .with_name(TaskName::scoped(chain.name(), stage.label.as_str()))
                    .in_chain(chain_id, index);
                if index == 0 {
                    record.with_input(chain.constants().clone())
                } else {
                    record
                }
            })
            .collect();
        let record = ChainRecord::new(
            chain_id,
            chain.name(),
            chain.stages().iter().map(|s| s.label.clone()).collect(),
            task_ids.clone(),
            chain.constants().clone(),
            now,
        );

        // Token first: a cancel may arrive as soon as the chain is registered.
        let token = inner.shutdown.child_token();
        lock(&inner.chains).insert(chain_id, token.clone());
        if let Some(replaced) = inner.store.register_chain(record, tasks).await {
            info!(chain = %chain.name(), replaced = %replaced, "replacing active chain");
            inner.cancel_token(replaced);
            inner.emit_chain(chain.name(), replaced, ChainStatus::Cancelled);
        }
        inner.emit_chain(chain.name(), chain_id, ChainStatus::Pending);
        info!(chain = %chain.name(), chain_id = %chain_id, stages = chain.len(), "chain submitted");

        let driver = Driver {
            inner: Arc::clone(inner),
            chain_id,
            name: chain.name().to_string(),
            stages: chain.stages().to_vec(),
            task_ids,
            constants: chain.constants().clone(),
            token,
        };
        let join = tokio::spawn(driver.run());
        {
            let mut drivers = lock(&inner.drivers);
            drivers.retain(|d| !d.is_finished());
            drivers.push(join);
        }

        Ok(ChainHandle {
            chain_id,
            name: chain.name().to_string(),
            store: Arc::clone(&inner.store),
            evict_on_observe: inner.config.evict_on_observe,
        })
    }

    /// Cancel the active chain named `name`. Returns false if there is none.
    pub async fn cancel(&self, name: &str) -> bool {
        match self.inner.store.cancel_chain_by_name(name).await {
            Some(chain) => {
                self.inner.chain_cancelled(&chain.name, chain.id);
                true
            }
            None => {
                debug!(chain = %name, "cancel: no active chain");
                false
            }
        }
    }

    /// Cancel a chain by id. Returns false if it is unknown or already terminal.
    pub async fn cancel_chain(&self, chain_id: ChainId) -> bool {
        let inner = &self.inner;
        match inner.store.cancel_chain(chain_id).await {
            Ok(true) => {
                match inner.store.chain(chain_id).await {
                    Some(chain) => inner.chain_cancelled(&chain.name, chain_id),
                    None => inner.cancel_token(chain_id),
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(chain_id = %chain_id, error = %e, "cancel: chain not found");
                false
            }
        }
    }

    /// View of the active chain named `name`.
    pub async fn status(&self, name: &str) -> Option<ChainView> {
        let chain = self.inner.store.active_chain(name).await?;
        Some(self.view(chain).await)
    }

    /// View of any chain still held by the store.
    pub async fn chain_status(&self, chain_id: ChainId) -> Option<ChainView> {
        let chain = self.inner.store.chain(chain_id).await?;
        Some(self.view(chain).await)
    }

    async fn view(&self, chain: ChainRecord) -> ChainView {
        let mut tasks = Vec::with_capacity(chain.task_ids.len());
        for id in &chain.task_ids {
            if let Some(task) = self.inner.store.get(*id).await {
                tasks.push(task);
            }
        }
        ChainView::new(&chain, &tasks)
    }

    pub async fn executor_status(&self) -> ExecutorStatus {
        ExecutorStatus {
            tasks: self.inner.store.counts_by_state().await,
            available_permits: self.inner.permits.available_permits(),
            pool_size: self.inner.config.pool_size,
        }
    }

    /// State stream of one task.
    pub async fn observe(&self, task_id: TaskId) -> Option<StateStream> {
        self.inner.store.observe(task_id).await
    }

    /// Start the retention loop, ticking every `interval`. Idempotent.
    ///
    /// `start` calls this with the configured interval, so hosts only need it
    /// when `retention_interval_ms` is `0`.
    pub fn start_retention(&self, interval: Duration) {
        let mut retention = lock(&self.inner.retention);
        if retention.is_none() && !self.inner.shutdown.is_cancelled() {
            *retention = Some(RetentionLoop::spawn(
                Arc::clone(&self.inner.store),
                Arc::clone(&self.inner.clock),
                self.inner.config.retention(),
                interval,
            ));
        }
    }

    /// Stop accepting chains, cancel the active ones and wait for every
    /// driver to exit.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let active: Vec<ChainId> = lock(&inner.chains).keys().copied().collect();
        for chain_id in active {
            self.cancel_chain(chain_id).await;
        }

        let drivers: Vec<JoinHandle<()>> = lock(&inner.drivers).drain(..).collect();
        for driver in drivers {
            if let Err(e) = driver.await {
                warn!(error = %e, "chain driver ended abnormally");
            }
        }

        let retention = lock(&inner.retention).take();
        if let Some(retention) = retention {
            retention.shutdown().await;
        }
        info!("executor shut down");
    }
}

impl Inner {
    /// Follow-up of a cancel the store has accepted.
    fn chain_cancelled(&self, name: &str, chain_id: ChainId) {
        self.cancel_token(chain_id);
        info!(chain = %name, chain_id = %chain_id, "chain cancelled");
        self.emit_chain(name, chain_id, ChainStatus::Cancelled);
    }

    fn cancel_token(&self, chain_id: ChainId) {
        if let Some(token) = lock(&self.chains).get(&chain_id) {
            token.cancel();
        }
    }

    fn emit_chain(&self, name: &str, chain_id: ChainId, status: ChainStatus) {
        self.sink.emit(&ProgressEvent::Chain {
            chain_name: name.to_string(),
            chain_id,
            status,
        });
    }
}

/// Poison-tolerant lock for the executor's bookkeeping maps. Never held
/// across an await.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Returned by [`Executor::start`].
#[derive(Clone)]
pub struct ChainHandle {
    chain_id: ChainId,
    name: String,
    store: Arc<dyn TaskStore>,
    evict_on_observe: bool,
}

impl ChainHandle {
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status, or `None` once the chain has been evicted.
    pub async fn status(&self) -> Option<ChainStatus> {
        self.store.chain(self.chain_id).await.map(|c| c.status)
    }

    /// Wait for the chain to reach a terminal status.
    pub async fn wait(&self) -> Result<ChainResult> {
        let not_found = || ExecutorError::ChainNotFound(self.chain_id);

        let mut rx = self
            .store
            .observe_chain(self.chain_id)
            .await
            .ok_or_else(not_found)?;
        let status = *rx
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| not_found())?;

        let chain = self.store.chain(self.chain_id).await.ok_or_else(not_found)?;
        let output = match (status, chain.task_ids.last()) {
            (ChainStatus::Succeeded, Some(last)) => {
                self.store.get(*last).await.and_then(|t| t.output)
            }
            _ => None,
        };
        let result = ChainResult {
            chain_id: chain.id,
            chain_name: chain.name,
            status,
            output,
            constants: chain.constants,
            failure: chain.failure,
        };

        if self.evict_on_observe {
            self.store.evict_chain(self.chain_id).await;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle")
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .finish()
    }
}

/// Walks one chain's stages.
struct Driver {
    inner: Arc<Inner>,
    chain_id: ChainId,
    name: String,
    stages: Vec<Stage>,
    task_ids: Vec<TaskId>,
    constants: Data,
    token: CancellationToken,
}

/// Why a driver stopped before the end of the chain.
enum Stop {
    /// Cancelled, replaced or shut down. The store already says so.
    Cancelled,
    /// A stage failed and the store has recorded it.
    Failed,
    /// The store refused an operation the driver relies on.
    Fault(String),
}

impl Driver {
    async fn run(self) {
        let result = self.run_stages().await;
        match result {
            Ok(()) => self.finish().await,
            Err(Stop::Failed) => self.finish().await,
            Err(Stop::Fault(reason)) => {
                error!(chain = %self.name, chain_id = %self.chain_id, %reason, "store fault; failing chain");
                if let Err(e) = self.inner.store.fail_chain(self.chain_id, reason).await {
                    warn!(chain = %self.name, error = %e, "could not record chain failure");
                }
                self.finish().await;
            }
            Err(Stop::Cancelled) => {
                // Stopped by the token alone (shutdown): settle the store too.
                if let Ok(true) = self.inner.store.cancel_chain(self.chain_id).await {
                    self.inner
                        .emit_chain(&self.name, self.chain_id, ChainStatus::Cancelled);
                }
                debug!(chain = %self.name, chain_id = %self.chain_id, "driver stopped: chain no longer active");
            }
        }
        lock(&self.inner.chains).remove(&self.chain_id);
    }

    async fn run_stages(&self) -> std::result::Result<(), Stop> {
        let mut input = self.constants.clone();
        for (index, stage) in self.stages.iter().enumerate() {
            let task_id = self.task_ids[index];
            if index > 0 {
                self.inner
                    .store
                    .set_input(task_id, input.clone())
                    .await
                    .map_err(|e| self.stopped(e))?;
            }
            self.emit_stage(index, stage, TaskState::Enqueued);

            let output = self.run_stage(index, stage, task_id, &input).await?;
            input = Data::merge_under_constants(&output, &self.constants);
        }
        Ok(())
    }

    /// Dispatch one stage until it succeeds, fails, or the chain stops.
    async fn run_stage(
        &self,
        index: usize,
        stage: &Stage,
        task_id: TaskId,
        input: &Data,
    ) -> std::result::Result<Data, Stop> {
        let policy: &RetryPolicy = &self.inner.config.retry;
        let mut attempt: u32 = 1;
        loop {
            let permit = self.acquire(stage).await?;

            if index == 0 && attempt == 1 {
                match self.inner.store.begin_chain(self.chain_id).await {
                    Ok(true) => {
                        info!(chain = %self.name, chain_id = %self.chain_id, "chain running");
                        self.inner
                            .emit_chain(&self.name, self.chain_id, ChainStatus::Running);
                    }
                    Ok(false) => return Err(Stop::Cancelled),
                    Err(e) => return Err(self.stopped(e)),
                }
            }

            self.inner
                .store
                .update_state(task_id, TaskState::Running, None)
                .await
                .map_err(|e| self.stopped(e))?;
            self.emit_stage(index, stage, TaskState::Running);
            debug!(chain = %self.name, stage = %stage.label, attempt, "dispatching");

            let ctx = TaskContext::new(task_id, &self.name, index, attempt, self.token.clone());
            let outcome = self.invoke(stage, ctx, input.clone()).await;
            drop(permit);
            if self.token.is_cancelled() {
                return Err(Stop::Cancelled);
            }

            let outcome = match outcome {
                Outcome::Success { output } => match missing_output(stage, &output) {
                    Some(key) => Outcome::failure(format!(
                        "stage '{}' did not produce declared output '{key}'",
                        stage.label
                    )),
                    None => Outcome::Success { output },
                },
                other => other,
            };

            match outcome {
                Outcome::Success { output } => {
                    self.inner
                        .store
                        .update_state(task_id, TaskState::Succeeded, Some(output.clone()))
                        .await
                        .map_err(|e| self.stopped(e))?;
                    self.emit_stage(index, stage, TaskState::Succeeded);
                    return Ok(output);
                }
                Outcome::Failure { reason } => {
                    warn!(chain = %self.name, stage = %stage.label, %reason, "stage failed");
                    self.inner
                        .store
                        .fail_task(task_id, reason)
                        .await
                        .map_err(|e| self.stopped(e))?;
                    self.emit_stage(index, stage, TaskState::Failed);
                    return Err(Stop::Failed);
                }
                Outcome::Retry { reason } => {
                    let record = self
                        .inner
                        .store
                        .record_retry(task_id, reason.clone())
                        .await
                        .map_err(|e| self.stopped(e))?;
                    if record.state == TaskState::Failed {
                        warn!(
                            chain = %self.name,
                            stage = %stage.label,
                            retries = record.retry_count - 1,
                            %reason,
                            "retries exhausted"
                        );
                        self.emit_stage(index, stage, TaskState::Failed);
                        return Err(Stop::Failed);
                    }

                    self.emit_stage(index, stage, TaskState::Enqueued);
                    let delay = policy.next_delay(record.retry_count);
                    debug!(
                        chain = %self.name,
                        stage = %stage.label,
                        retry = record.retry_count,
                        ?delay,
                        %reason,
                        "retrying"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(Stop::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Wait until the stage's constraints hold and a pool permit is free.
    async fn acquire(
        &self,
        stage: &Stage,
    ) -> std::result::Result<tokio::sync::OwnedSemaphorePermit, Stop> {
        loop {
            self.wait_for_constraints(stage).await?;

            let permit = tokio::select! {
                _ = self.token.cancelled() => return Err(Stop::Cancelled),
                permit = Arc::clone(&self.inner.permits).acquire_owned() => {
                    permit.map_err(|_| Stop::Cancelled)?
                }
            };

            // Waiting for the permit may have taken a while.
            let env = self.inner.env.snapshot();
            if first_unmet(&stage.constraints, &env).is_none() {
                return Ok(permit);
            }
        }
    }

    async fn wait_for_constraints(&self, stage: &Stage) -> std::result::Result<(), Stop> {
        let poll = self.inner.config.constraint_poll_interval();
        let mut reported = false;
        loop {
            let env = self.inner.env.snapshot();
            let Some(unmet) = first_unmet(&stage.constraints, &env) else {
                return Ok(());
            };
            if !reported {
                info!(chain = %self.name, stage = %stage.label, constraint = unmet, "waiting for constraint");
                reported = true;
            }
            tokio::select! {
                _ = self.token.cancelled() => return Err(Stop::Cancelled),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Run the task body on its own tokio task so a panic or a timeout
    /// becomes a `Failure`.
    async fn invoke(&self, stage: &Stage, ctx: TaskContext, input: Data) -> Outcome {
        let task = Arc::clone(&stage.task);
        let join = tokio::spawn(async move { task.run(&ctx, input).await });
        let abort = join.abort_handle();

        let timeout = stage.timeout.or(self.inner.config.default_task_timeout());
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, join).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Outcome::failure(format!("timed out after {limit:?}"));
                }
            },
            None => join.await,
        };

        match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Outcome::failure(format!("task panicked: {message}"))
            }
            Err(_) => Outcome::failure("task aborted"),
        }
    }

    /// Emit the chain's terminal status once the store has settled it.
    async fn finish(&self) {
        let Some(chain) = self.inner.store.chain(self.chain_id).await else {
            return;
        };
        if !chain.status.is_terminal() {
            warn!(chain = %self.name, status = ?chain.status, "driver finished on a non-terminal chain");
            return;
        }
        if chain.status == ChainStatus::Cancelled {
            return;
        }
        match &chain.failure {
            Some(failure) => info!(
                chain = %self.name,
                stage = %failure.stage,
                reason = %failure.reason,
                "chain failed"
            ),
            None => info!(chain = %self.name, status = ?chain.status, "chain finished"),
        }
        self.inner.emit_chain(&self.name, self.chain_id, chain.status);
    }

    fn emit_stage(&self, index: usize, stage: &Stage, state: TaskState) {
        self.inner.sink.emit(&ProgressEvent::Stage {
            chain_name: self.name.clone(),
            chain_id: self.chain_id,
            stage_index: index,
            stage: stage.label.clone(),
            state,
        });
    }

    /// Map a rejected store operation to a stop. A terminal rejection or a
    /// missing record means the chain was cancelled or replaced under us;
    /// anything else is a fault that fails the chain.
    fn stopped(&self, err: StoreError) -> Stop {
        match err {
            StoreError::TerminalState { .. }
            | StoreError::TaskNotFound(_)
            | StoreError::ChainNotFound(_) => {
                debug!(chain = %self.name, error = %err, "late transition discarded");
                Stop::Cancelled
            }
            StoreError::IllegalTransition { .. } | StoreError::InputFrozen(_) => {
                Stop::Fault(err.to_string())
            }
        }
    }
}

fn missing_output<'a>(stage: &'a Stage, output: &Data) -> Option<&'a str> {
    stage
        .outputs
        .iter()
        .find(|key| !output.contains_key(key))
        .map(String::as_str)
}
