//! Pipeline builder: stage specs -> validated [`Chain`].
//!
//! All configuration errors surface here, before anything is enqueued.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{BuildError, Data, DataValue};
use crate::ports::Constraint;
use crate::typed::{DynTask, TaskRegistry};

/// One stage as declared by the caller.
///
/// # Example
/// ```ignore
/// let spec = StageSpec::new("blur")
///     .labeled("blur-1")
///     .constrained(RequiresBatteryNotLow)
///     .timeout(Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct StageSpec {
    task: String,
    label: Option<String>,
    constraints: Vec<Arc<dyn Constraint>>,
    timeout: Option<Duration>,
    outputs: Vec<String>,
}

impl StageSpec {
    /// `task` is the registry name of the task that runs this stage.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            label: None,
            constraints: Vec::new(),
            timeout: None,
            outputs: Vec::new(),
        }
    }

    /// Label shown in progress events. Defaults to the task name and must be
    /// unique within a chain.
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn constrained(mut self, constraint: impl Constraint + 'static) -> Self {
        self.constraints.push(Arc::new(constraint));
        self
    }

    pub fn constrained_by(mut self, constraint: Arc<dyn Constraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Maximum duration of one invocation. Overrides the executor default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keys the stage promises to emit on success. A success missing one of
    /// them is treated as a failure.
    pub fn outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.task)
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("task", &self.task)
            .field("label", &self.label())
            .field("constraints", &constraint_names(&self.constraints))
            .field("timeout", &self.timeout)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// A resolved stage: the spec plus the task looked up in the registry.
#[derive(Clone)]
pub struct Stage {
    pub label: String,
    pub task_name: String,
    pub task: Arc<dyn DynTask>,
    pub constraints: Vec<Arc<dyn Constraint>>,
    pub timeout: Option<Duration>,
    pub outputs: Vec<String>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("label", &self.label)
            .field("task_name", &self.task_name)
            .field("constraints", &constraint_names(&self.constraints))
            .field("timeout", &self.timeout)
            .field("outputs", &self.outputs)
            .finish()
    }
}

fn constraint_names(constraints: &[Arc<dyn Constraint>]) -> Vec<&str> {
    constraints.iter().map(|c| c.name()).collect()
}

/// A validated, not yet started chain definition.
#[derive(Debug, Clone)]
pub struct Chain {
    name: String,
    constants: Data,
    stages: Vec<Stage>,
}

impl Chain {
    /// Resolve `stages` against `registry`.
    pub fn build(
        stages: Vec<StageSpec>,
        name: impl Into<String>,
        constants: Data,
        registry: &TaskRegistry,
    ) -> Result<Chain, BuildError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BuildError::EmptyChainName);
        }
        if stages.is_empty() {
            return Err(BuildError::NoStages);
        }

        let mut labels = HashSet::new();
        let mut resolved = Vec::with_capacity(stages.len());
        for spec in stages {
            let label = spec.label().to_string();
            let task = registry
                .get(&spec.task)
                .ok_or_else(|| BuildError::UnknownTask(spec.task.clone()))?;
            if !labels.insert(label.clone()) {
                return Err(BuildError::DuplicateStage(label));
            }
            if spec.timeout.is_some_and(|t| t.is_zero()) {
                return Err(BuildError::ZeroTimeout(label));
            }
            resolved.push(Stage {
                label,
                task_name: spec.task,
                task,
                constraints: spec.constraints,
                timeout: spec.timeout,
                outputs: spec.outputs,
            });
        }

        Ok(Chain {
            name,
            constants,
            stages: resolved,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constants(&self) -> &Data {
        &self.constants
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Fluent front-end over [`Chain::build`].
///
/// # Example
/// ```ignore
/// let chain = PipelineBuilder::new(&registry)
///     .name("blur-image")
///     .constant("blurIntensity", 3_i64)
///     .stage(StageSpec::new("cleanup"))
///     .stage(StageSpec::new("blur"))
///     .stage(StageSpec::new("save"))
///     .build()?;
/// ```
pub struct PipelineBuilder<'r> {
    registry: &'r TaskRegistry,
    name: String,
    constants: Data,
    stages: Vec<StageSpec>,
}

impl<'r> PipelineBuilder<'r> {
    pub fn new(registry: &'r TaskRegistry) -> Self {
        Self {
            registry,
            name: String::new(),
            constants: Data::new(),
            stages: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn constant(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.constants.insert(key, value);
        self
    }

    pub fn constants(mut self, constants: Data) -> Self {
        self.constants = constants;
        self
    }

    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    pub fn stages(mut self, specs: impl IntoIterator<Item = StageSpec>) -> Self {
        self.stages.extend(specs);
        self
    }

    pub fn build(self) -> Result<Chain, BuildError> {
        Chain::build(self.stages, self.name, self.constants, self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;
    use crate::ports::EnvSnapshot;
    use crate::typed::TaskContext;
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl DynTask for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &TaskContext, input: Data) -> Outcome {
            Outcome::success(input)
        }
    }

    struct Never;

    impl Constraint for Never {
        fn name(&self) -> &str {
            "never"
        }

        fn evaluate(&self, _env: &EnvSnapshot) -> bool {
            false
        }
    }

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register_dyn(Arc::new(Echo("cleanup"))).unwrap();
        registry.register_dyn(Arc::new(Echo("blur"))).unwrap();
        registry.register_dyn(Arc::new(Echo("save"))).unwrap();
        registry
    }

    #[test]
    fn builds_stages_in_order() {
        let registry = registry();
        let chain = PipelineBuilder::new(&registry)
            .name("blur-image")
            .constant("blurIntensity", 2_i64)
            .stage(StageSpec::new("cleanup"))
            .stage(StageSpec::new("blur").labeled("blur-1").constrained(Never))
            .stage(StageSpec::new("blur").labeled("blur-2"))
            .stage(StageSpec::new("save").outputs(["finalImageReference"]))
            .build()
            .unwrap();

        let labels: Vec<&str> = chain.stages().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["cleanup", "blur-1", "blur-2", "save"]);
        assert_eq!(chain.stages()[1].task_name, "blur");
        assert_eq!(chain.stages()[1].constraints.len(), 1);
        assert_eq!(chain.stages()[3].outputs, ["finalImageReference"]);
        assert_eq!(chain.constants().get("blurIntensity"), Some(&DataValue::Int(2)));
    }

    #[test]
    fn rejects_empty_chain() {
        let registry = registry();
        let err = Chain::build(vec![], "blur-image", Data::new(), &registry).unwrap_err();
        assert_eq!(err, BuildError::NoStages);
    }

    #[test]
    fn rejects_blank_name() {
        let registry = registry();
        let err = Chain::build(vec![StageSpec::new("blur")], "  ", Data::new(), &registry)
            .unwrap_err();
        assert_eq!(err, BuildError::EmptyChainName);
    }

    #[test]
    fn rejects_unknown_task() {
        let registry = registry();
        let err = PipelineBuilder::new(&registry)
            .name("blur-image")
            .stage(StageSpec::new("sharpen"))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::UnknownTask("sharpen".into()));
    }

    #[test]
    fn rejects_duplicate_labels() {
        let registry = registry();
        let err = PipelineBuilder::new(&registry)
            .name("blur-image")
            .stage(StageSpec::new("blur"))
            .stage(StageSpec::new("blur"))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::DuplicateStage("blur".into()));
    }

    #[test]
    fn rejects_zero_timeout() {
        let registry = registry();
        let err = PipelineBuilder::new(&registry)
            .name("blur-image")
            .stage(StageSpec::new("save").timeout(Duration::ZERO))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::ZeroTimeout("save".into()));
    }
}
