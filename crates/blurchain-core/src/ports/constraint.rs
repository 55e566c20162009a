//! Constraint port: environment predicates that gate dispatch.
//!
//! The host process owns how the environment is observed; the executor only
//! asks an [`EnvironmentProvider`] for a snapshot right before dispatching a
//! gated task and hands it to each [`Constraint`].

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Point-in-time view of the device/host environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub charging: bool,
    pub battery_low: bool,
    pub storage_low: bool,
}

impl Default for EnvSnapshot {
    fn default() -> Self {
        Self {
            charging: true,
            battery_low: false,
            storage_low: false,
        }
    }
}

/// A pure predicate over an [`EnvSnapshot`].
pub trait Constraint: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn evaluate(&self, env: &EnvSnapshot) -> bool;
}

/// Evaluate every constraint against one snapshot. Returns the name of the
/// first unmet constraint, if any.
pub fn first_unmet<'a>(
    constraints: &'a [Arc<dyn Constraint>],
    env: &EnvSnapshot,
) -> Option<&'a str> {
    constraints
        .iter()
        .find(|c| !c.evaluate(env))
        .map(|c| c.name())
}

/// Supplies environment snapshots.
pub trait EnvironmentProvider: Send + Sync {
    fn snapshot(&self) -> EnvSnapshot;
}

/// Settable in-memory environment, for hosts that push state and for tests.
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    current: RwLock<EnvSnapshot>,
}

impl StaticEnvironment {
    pub fn new(snapshot: EnvSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    pub fn set(&self, snapshot: EnvSnapshot) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    pub fn update(&self, f: impl FnOnce(&mut EnvSnapshot)) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        f(&mut current);
    }
}

impl EnvironmentProvider for StaticEnvironment {
    fn snapshot(&self) -> EnvSnapshot {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
