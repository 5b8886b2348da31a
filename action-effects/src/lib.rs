use serde::{Deserialize, Serialize};

/// Effect classification for remediation actions, ordered from least to
/// most consequential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Inspects the target without changing it.
    Observe,
    /// Writes to the target; a compensating action can undo it.
    Mutate,
    /// Permanent once applied.
    Irreversible,
}

impl Effect {
    /// What to do after a failed execution of an action with this effect.
    pub fn recovery(&self) -> Recovery {
        match self {
            Effect::Observe => Recovery::Retry,
            Effect::Mutate => Recovery::Compensate,
            Effect::Irreversible => Recovery::ManualReview,
        }
    }

    /// Whether a failed execution can safely undo this effect.
    pub fn reversible(&self) -> bool {
        matches!(self, Effect::Observe | Effect::Mutate)
    }

    /// Cost multiplier used when ranking candidate plans.
    pub fn cost_weight(&self) -> u32 {
        match self {
            Effect::Observe => 1,
            Effect::Mutate => 10,
            Effect::Irreversible => 100,
        }
    }
}

/// Recovery strategy after a failure, derived from the effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recovery {
    /// Re-run the action as is.
    Retry,
    /// Run the declared compensating rollback.
    Compensate,
    /// Hand off to a human; never retried automatically.
    ManualReview,
}

/// Any operation that carries a classified effect.
pub trait Effectful {
    fn effect(&self) -> Effect;
}
