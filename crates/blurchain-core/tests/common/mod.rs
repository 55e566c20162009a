//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blurchain_core::app::{Chain, StageSpec};
use blurchain_core::domain::{ChainRecord, StoreError, TaskRecord};
use blurchain_core::ports::{
    ChannelSink, EnvSnapshot, StateStream, StaticEnvironment, StoreCounts, TaskStore,
};
use blurchain_core::store::InMemoryTaskStore;
use blurchain_core::typed::{DynTask, TaskContext, TaskRegistry};
use blurchain_core::{
    ChainId, ChainStatus, Data, Executor, ExecutorBuilder, ExecutorConfig, Outcome, ProgressEvent, RetryPolicy,
    TaskId, TaskState,
};
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc, watch};

/// Task that replays a script of outcomes, then repeats `fallback`.
pub struct Scripted {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: AtomicU32,
    inputs: Mutex<Vec<Data>>,
}

impl Scripted {
    pub fn new(name: &str, fallback: Outcome) -> Arc<Self> {
        Self::with_script(name, Vec::new(), fallback)
    }

    pub fn with_script(name: &str, script: Vec<Outcome>, fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Data> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl DynTask for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TaskContext, input: Data) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Task that holds its pool permit until released or cancelled.
pub struct Blocker {
    name: String,
    release: Notify,
    calls: AtomicU32,
}

impl Blocker {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            release: Notify::new(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DynTask for Blocker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext, _input: Data) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = ctx.cancelled() => Outcome::failure("cancelled"),
            _ = self.release.notified() => Outcome::success(Data::new()),
        }
    }
}

pub fn config(max_retries: u32) -> ExecutorConfig {
    ExecutorConfig::new(RetryPolicy::fixed(max_retries, Duration::from_millis(1)))
        .with_constraint_poll_interval(Duration::from_millis(5))
}

pub struct Harness {
    pub executor: Executor,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    pub env: Arc<StaticEnvironment>,
    pub registry: TaskRegistry,
}

impl Harness {
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_builder(config, |builder| builder)
    }

    /// Like [`Harness::new`], with extra collaborators set through `wire`.
    pub fn with_builder(
        config: ExecutorConfig,
        wire: impl FnOnce(ExecutorBuilder) -> ExecutorBuilder,
    ) -> Self {
        let (sink, events) = ChannelSink::new();
        let env = Arc::new(StaticEnvironment::new(EnvSnapshot::default()));
        let builder = Executor::builder(config)
            .environment(env.clone())
            .sink(Arc::new(sink));
        let executor = wire(builder).build().unwrap();
        Self {
            executor,
            events,
            env,
            registry: TaskRegistry::new(),
        }
    }

    pub fn register(&mut self, task: Arc<dyn DynTask>) {
        self.registry.register_dyn(task).unwrap();
    }

    pub fn chain(&self, name: &str, stages: Vec<StageSpec>, constants: Data) -> Chain {
        Chain::build(stages, name, constants, &self.registry).unwrap()
    }

    /// Receive events until one matches, failing after a few seconds.
    pub async fn wait_for_event(&mut self, mut pred: impl FnMut(&ProgressEvent) -> bool) -> ProgressEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("sink closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Receive events up to and including the first one that matches.
    pub async fn collect_until(&mut self, mut pred: impl FnMut(&ProgressEvent) -> bool) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        self.wait_for_event(|e| {
            events.push(e.clone());
            pred(e)
        })
        .await;
        events
    }

    /// Every event received so far.
    pub fn drain_events(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn stages(names: &[&str]) -> Vec<StageSpec> {
    names.iter().map(|n| StageSpec::new(*n)).collect()
}

/// In-memory store whose `set_input` always refuses, as if the downstream
/// task had already started.
#[derive(Default)]
pub struct FrozenInputStore {
    inner: InMemoryTaskStore,
}

#[async_trait]
impl TaskStore for FrozenInputStore {
    async fn put(&self, task: TaskRecord) -> Option<TaskId> {
        self.inner.put(task).await
    }

    async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.inner.get(id).await
    }

    async fn update_state(
        &self,
        id: TaskId,
        state: TaskState,
        output: Option<Data>,
    ) -> Result<TaskRecord, StoreError> {
        self.inner.update_state(id, state, output).await
    }

    async fn fail_task(&self, id: TaskId, reason: String) -> Result<TaskRecord, StoreError> {
        self.inner.fail_task(id, reason).await
    }

    async fn record_retry(&self, id: TaskId, reason: String) -> Result<TaskRecord, StoreError> {
        self.inner.record_retry(id, reason).await
    }

    async fn set_input(&self, id: TaskId, _input: Data) -> Result<(), StoreError> {
        Err(StoreError::InputFrozen(id))
    }

    async fn observe(&self, id: TaskId) -> Option<StateStream> {
        self.inner.observe(id).await
    }

    async fn register_chain(&self, chain: ChainRecord, tasks: Vec<TaskRecord>) -> Option<ChainId> {
        self.inner.register_chain(chain, tasks).await
    }

    async fn begin_chain(&self, id: ChainId) -> Result<bool, StoreError> {
        self.inner.begin_chain(id).await
    }

    async fn cancel_chain(&self, id: ChainId) -> Result<bool, StoreError> {
        self.inner.cancel_chain(id).await
    }

    async fn cancel_chain_by_name(&self, name: &str) -> Option<ChainRecord> {
        self.inner.cancel_chain_by_name(name).await
    }

    async fn fail_chain(&self, id: ChainId, reason: String) -> Result<bool, StoreError> {
        self.inner.fail_chain(id, reason).await
    }

    async fn chain(&self, id: ChainId) -> Option<ChainRecord> {
        self.inner.chain(id).await
    }

    async fn active_chain(&self, name: &str) -> Option<ChainRecord> {
        self.inner.active_chain(name).await
    }

    async fn observe_chain(&self, id: ChainId) -> Option<watch::Receiver<ChainStatus>> {
        self.inner.observe_chain(id).await
    }

    async fn evict_chain(&self, id: ChainId) -> bool {
        self.inner.evict_chain(id).await
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        self.inner.prune_terminal(cutoff).await
    }

    async fn counts_by_state(&self) -> StoreCounts {
        self.inner.counts_by_state().await
    }
}
