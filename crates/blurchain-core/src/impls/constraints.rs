//! Built-in constraints over [`EnvSnapshot`].

use std::fmt;

use crate::ports::{Constraint, EnvSnapshot};

/// Device must be charging.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiresCharging;

impl Constraint for RequiresCharging {
    fn name(&self) -> &str {
        "requires_charging"
    }

    fn evaluate(&self, env: &EnvSnapshot) -> bool {
        env.charging
    }
}

/// Battery must not be low.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiresBatteryNotLow;

impl Constraint for RequiresBatteryNotLow {
    fn name(&self) -> &str {
        "requires_battery_not_low"
    }

    fn evaluate(&self, env: &EnvSnapshot) -> bool {
        !env.battery_low
    }
}

/// Storage must not be low.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiresStorageNotLow;

impl Constraint for RequiresStorageNotLow {
    fn name(&self) -> &str {
        "requires_storage_not_low"
    }

    fn evaluate(&self, env: &EnvSnapshot) -> bool {
        !env.storage_low
    }
}

/// Constraint backed by a closure.
pub struct FnConstraint<F> {
    name: String,
    predicate: F,
}

impl<F> FnConstraint<F>
where
    F: Fn(&EnvSnapshot) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Constraint for FnConstraint<F>
where
    F: Fn(&EnvSnapshot) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, env: &EnvSnapshot) -> bool {
        (self.predicate)(env)
    }
}

impl<F> fmt::Debug for FnConstraint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConstraint").field("name", &self.name).finish()
    }
}
