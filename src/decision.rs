//! Decision types returned from the core `Decide`/`DecideComposite` operations.

use serde::{Deserialize, Serialize};

/// The result of a single-algorithm rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    allowed: bool,
    info: DecisionInfo,
}

impl Decision {
    /// Build an "allowed" decision.
    pub fn allowed(info: DecisionInfo) -> Self {
        Self {
            allowed: true,
            info,
        }
    }

    /// Build a "denied" decision.
    pub fn denied(info: DecisionInfo) -> Self {
        Self {
            allowed: false,
            info,
        }
    }

    /// Whether the request was admitted.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Whether the request was denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Diagnostics accompanying the decision.
    pub fn info(&self) -> &DecisionInfo {
        &self.info
    }

    /// Consume the decision and return its diagnostics.
    pub fn into_info(self) -> DecisionInfo {
        self.info
    }
}

/// Diagnostics describing the limiter state a decision was made against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionInfo {
    /// The key this decision was made for.
    pub key: Option<String>,
    /// Name of the algorithm that made this decision.
    pub algorithm: Option<&'static str>,
    /// Configured capacity.
    pub capacity: u64,
    /// Remaining capacity after this decision (the crate-wide convention;
    /// see the resolution of the `currentAvailable` open question).
    pub available: u64,
    /// Milliseconds until the estimated retry should succeed, if denied.
    pub retry_after_ms: Option<u64>,
}

impl DecisionInfo {
    /// Build diagnostics for a given capacity/availability pair.
    pub fn new(capacity: u64, available: u64) -> Self {
        Self {
            key: None,
            algorithm: None,
            capacity,
            available,
            retry_after_ms: None,
        }
    }

    /// Attach the key this decision was made for.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach the algorithm name.
    pub fn with_algorithm(mut self, name: &'static str) -> Self {
        self.algorithm = Some(name);
        self
    }

    /// Attach an estimated retry delay.
    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}

/// The five ways a [`crate::composite::Composite`] combines its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombinationLogic {
    AllMustPass,
    AnyCanPass,
    WeightedAverage,
    HierarchicalAnd,
    PriorityBased,
}

/// Per-component outcome within a composite decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOutcome {
    /// The component's configured name.
    pub name: String,
    /// Whether this component individually would admit (or did admit).
    pub allowed: bool,
    /// This component's contribution, for `WEIGHTED_AVERAGE`.
    pub score: Option<f64>,
}

/// Rollup diagnostics for how a composite combined its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationInfo {
    pub logic: CombinationLogic,
    /// Overall score, set for `WEIGHTED_AVERAGE`.
    pub score: Option<f64>,
    /// Per-component scores, set for `WEIGHTED_AVERAGE`.
    pub component_scores: Vec<ComponentOutcome>,
}

/// The result of a composite rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDecision {
    allowed: bool,
    per_component: Vec<ComponentOutcome>,
    limiting_component: Option<String>,
    combination: CombinationInfo,
}

impl CompositeDecision {
    /// Build a composite decision from its constituent parts.
    pub fn new(
        allowed: bool,
        per_component: Vec<ComponentOutcome>,
        limiting_component: Option<String>,
        combination: CombinationInfo,
    ) -> Self {
        Self {
            allowed,
            per_component,
            limiting_component,
            combination,
        }
    }

    /// Whether the composite admitted the request.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Whether the composite denied the request.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Outcome reported by each component.
    pub fn per_component(&self) -> &[ComponentOutcome] {
        &self.per_component
    }

    /// Name of the component that caused a denial, if any.
    pub fn limiting_component(&self) -> Option<&str> {
        self.limiting_component.as_deref()
    }

    /// Diagnostics about how the components were combined.
    pub fn combination(&self) -> &CombinationInfo {
        &self.combination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_allowed() {
        let info = DecisionInfo::new(100, 99).with_algorithm("token_bucket");
        let decision = Decision::allowed(info);

        assert!(decision.is_allowed());
        assert!(!decision.is_denied());
        assert_eq!(decision.info().capacity, 100);
        assert_eq!(decision.info().available, 99);
    }

    #[test]
    fn test_decision_denied() {
        let info = DecisionInfo::new(100, 0).with_retry_after_ms(500);
        let decision = Decision::denied(info);

        assert!(decision.is_denied());
        assert!(!decision.is_allowed());
        assert_eq!(decision.info().available, 0);
        assert_eq!(decision.info().retry_after_ms, Some(500));
    }

    #[test]
    fn test_composite_decision_limiting_component() {
        let outcomes = vec![
            ComponentOutcome {
                name: "A".into(),
                allowed: true,
                score: None,
            },
            ComponentOutcome {
                name: "B".into(),
                allowed: false,
                score: None,
            },
        ];
        let combination = CombinationInfo {
            logic: CombinationLogic::AllMustPass,
            score: None,
            component_scores: outcomes.clone(),
        };
        let decision =
            CompositeDecision::new(false, outcomes, Some("B".to_string()), combination);

        assert!(decision.is_denied());
        assert_eq!(decision.limiting_component(), Some("B"));
        assert_eq!(decision.combination().logic, CombinationLogic::AllMustPass);
    }
}
