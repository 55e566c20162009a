//! Outcome of a single task invocation.

use serde::{Deserialize, Serialize};

use super::data::Data;

/// What a task reports back to the executor.
///
/// - `Success`: the stage is done; `output` feeds the next stage.
/// - `Failure`: not worth retrying; the chain fails.
/// - `Retry`: transient; the executor may invoke the task again with the same input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success { output: Data },
    Failure { reason: String },
    Retry { reason: String },
}

impl Outcome {
    pub fn success(output: Data) -> Self {
        Outcome::Success { output }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome::Retry {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(Outcome::retry("io timeout")).unwrap();
        assert_eq!(json["kind"], "RETRY");
        assert_eq!(json["reason"], "io timeout");

        let json = serde_json::to_value(Outcome::success(Data::new().with("k", "v"))).unwrap();
        assert_eq!(json["kind"], "SUCCESS");
        assert_eq!(json["output"]["k"], "v");
    }
}
