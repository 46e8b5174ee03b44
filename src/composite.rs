//! Composite engine (C7): combines several [`Limiter`]s under one of five
//! combination logics and reports per-component outcomes.

use std::sync::Arc;

use crate::algorithm::Limiter;
use crate::config::Algorithm;
use crate::decision::{CombinationInfo, CombinationLogic, ComponentOutcome, CompositeDecision};

/// Grouping used by `HIERARCHICAL_AND`; groups are processed in the fixed
/// order `User -> Tenant -> Global -> Other(insertion order)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    User,
    Tenant,
    Global,
    Other(String),
}

/// One sub-limiter definition in a [`CompositeConfig`], resolved to a
/// concrete [`LimitComponent`] by [`crate::manager::RateLimitService`] at
/// decision time.
#[derive(Debug, Clone)]
pub struct LimitDefinition {
    pub name: String,
    pub algorithm: Algorithm,
    pub capacity: u64,
    pub refill_rate: f64,
    pub weight: f64,
    pub priority: i32,
    pub scope: Scope,
    pub window_duration_ms: Option<u64>,
    pub max_queue_time_ms: Option<u64>,
}

impl LimitDefinition {
    pub fn new(name: impl Into<String>, algorithm: Algorithm, capacity: u64, refill_rate: f64) -> Self {
        Self {
            name: name.into(),
            algorithm,
            capacity,
            refill_rate,
            weight: 1.0,
            priority: 0,
            scope: Scope::Other("default".into()),
            window_duration_ms: None,
            max_queue_time_ms: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// A full composite definition: its components and how to combine them.
#[derive(Debug, Clone)]
pub struct CompositeConfig {
    pub definitions: Vec<LimitDefinition>,
    pub logic: CombinationLogic,
}

impl CompositeConfig {
    pub fn new(definitions: Vec<LimitDefinition>, logic: CombinationLogic) -> Self {
        Self { definitions, logic }
    }
}

/// One named limiter participating in a [`Composite`].
pub struct LimitComponent {
    pub name: String,
    pub limiter: Arc<dyn Limiter>,
    pub weight: f64,
    pub priority: i32,
    pub scope: Scope,
}

impl LimitComponent {
    pub fn new(name: impl Into<String>, limiter: Arc<dyn Limiter>) -> Self {
        Self { name: name.into(), limiter, weight: 1.0, priority: 0, scope: Scope::Other("default".into()) }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// A limiter built from several components combined by one logic.
pub struct Composite {
    components: Vec<LimitComponent>,
    logic: CombinationLogic,
}

impl Composite {
    /// Build a composite engine. `components` must be non-empty.
    pub fn new(components: Vec<LimitComponent>, logic: CombinationLogic) -> Self {
        assert!(!components.is_empty(), "composite requires at least one component");
        Self { components, logic }
    }

    pub async fn try_consume(&self, tokens: u64) -> CompositeDecision {
        match self.logic {
            CombinationLogic::AllMustPass => self.all_must_pass(tokens).await,
            CombinationLogic::AnyCanPass => self.any_can_pass(tokens).await,
            CombinationLogic::WeightedAverage => self.weighted_average(tokens).await,
            CombinationLogic::HierarchicalAnd => self.hierarchical_and(tokens).await,
            CombinationLogic::PriorityBased => self.priority_based(tokens).await,
        }
    }

    async fn all_must_pass(&self, tokens: u64) -> CompositeDecision {
        let mut would_allow = Vec::with_capacity(self.components.len());
        let mut limiting = None;
        for c in &self.components {
            let available = c.limiter.current_available().await;
            let ok = available >= tokens;
            would_allow.push(ok);
            if !ok && limiting.is_none() {
                limiting = Some(c.name.clone());
            }
        }

        if limiting.is_some() {
            let per_component = self
                .components
                .iter()
                .zip(&would_allow)
                .map(|(c, &ok)| ComponentOutcome { name: c.name.clone(), allowed: ok, score: None })
                .collect();
            return CompositeDecision::new(
                false,
                per_component,
                limiting,
                CombinationInfo { logic: self.logic, score: None, component_scores: vec![] },
            );
        }

        let mut per_component = Vec::with_capacity(self.components.len());
        let mut limiting_component = None;
        for c in &self.components {
            let ok = c.limiter.try_consume(tokens).await;
            per_component.push(ComponentOutcome { name: c.name.clone(), allowed: ok, score: None });
            if !ok && limiting_component.is_none() {
                limiting_component = Some(c.name.clone());
            }
        }
        let allowed = limiting_component.is_none();
        CompositeDecision::new(
            allowed,
            per_component,
            limiting_component,
            CombinationInfo { logic: self.logic, score: None, component_scores: vec![] },
        )
    }

    async fn any_can_pass(&self, tokens: u64) -> CompositeDecision {
        let mut per_component = Vec::with_capacity(self.components.len());
        let mut allowed = false;
        for c in &self.components {
            if !allowed {
                let ok = c.limiter.try_consume(tokens).await;
                per_component.push(ComponentOutcome { name: c.name.clone(), allowed: ok, score: None });
                if ok {
                    allowed = true;
                }
            } else {
                per_component.push(ComponentOutcome { name: c.name.clone(), allowed: false, score: None });
            }
        }
        let limiting = if allowed { None } else { self.components.last().map(|c| c.name.clone()) };
        CompositeDecision::new(
            allowed,
            per_component,
            limiting,
            CombinationInfo { logic: self.logic, score: None, component_scores: vec![] },
        )
    }

    async fn weighted_average(&self, tokens: u64) -> CompositeDecision {
        let mut would_allow = Vec::with_capacity(self.components.len());
        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;
        for c in &self.components {
            let ok = c.limiter.current_available().await >= tokens;
            would_allow.push(ok);
            total_weight += c.weight;
            if ok {
                weighted_sum += c.weight;
            }
        }
        let score = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };
        let allowed = score >= 0.5;

        let mut per_component = Vec::with_capacity(self.components.len());
        let mut limiting = None;
        for (c, &ok) in self.components.iter().zip(&would_allow) {
            if allowed && ok {
                let consumed = c.limiter.try_consume(tokens).await;
                if !consumed && limiting.is_none() {
                    limiting = Some(c.name.clone());
                }
            }
            per_component.push(ComponentOutcome { name: c.name.clone(), allowed: ok, score: Some(c.weight) });
        }

        CompositeDecision::new(
            allowed,
            per_component.clone(),
            if allowed { limiting } else { None },
            CombinationInfo { logic: self.logic, score: Some(score), component_scores: per_component },
        )
    }

    async fn hierarchical_and(&self, tokens: u64) -> CompositeDecision {
        let order = |scope: &Scope| -> u8 {
            match scope {
                Scope::User => 0,
                Scope::Tenant => 1,
                Scope::Global => 2,
                Scope::Other(_) => 3,
            }
        };
        let mut indices: Vec<usize> = (0..self.components.len()).collect();
        indices.sort_by_key(|&i| order(&self.components[i].scope));

        let mut per_component = vec![
            ComponentOutcome { name: String::new(), allowed: true, score: None };
            self.components.len()
        ];
        let mut limiting = None;
        let mut denied = false;
        for &i in &indices {
            let c = &self.components[i];
            let ok = if denied { false } else { c.limiter.try_consume(tokens).await };
            per_component[i] = ComponentOutcome { name: c.name.clone(), allowed: ok, score: None };
            if !ok && !denied {
                denied = true;
                limiting = Some(c.name.clone());
            }
        }

        CompositeDecision::new(
            !denied,
            per_component,
            limiting,
            CombinationInfo { logic: self.logic, score: None, component_scores: vec![] },
        )
    }

    async fn priority_based(&self, tokens: u64) -> CompositeDecision {
        let mut indices: Vec<usize> = (0..self.components.len()).collect();
        indices.sort_by_key(|&i| std::cmp::Reverse(self.components[i].priority));

        let mut per_component = vec![
            ComponentOutcome { name: String::new(), allowed: true, score: None };
            self.components.len()
        ];
        let mut limiting = None;
        let mut denied = false;
        for &i in &indices {
            let c = &self.components[i];
            let ok = if denied { false } else { c.limiter.try_consume(tokens).await };
            per_component[i] = ComponentOutcome { name: c.name.clone(), allowed: ok, score: None };
            if !ok && !denied {
                denied = true;
                limiting = Some(c.name.clone());
            }
        }

        CompositeDecision::new(
            !denied,
            per_component,
            limiting,
            CombinationInfo { logic: self.logic, score: None, component_scores: vec![] },
        )
    }

    /// Aggregate capacity: sum of component capacities.
    pub fn capacity(&self) -> u64 {
        self.components.iter().map(|c| c.limiter.capacity()).sum()
    }

    /// Aggregate availability: the minimum across components.
    pub async fn current_available(&self) -> u64 {
        let mut min = u64::MAX;
        for c in &self.components {
            min = min.min(c.limiter.current_available().await);
        }
        if min == u64::MAX { 0 } else { min }
    }

    /// Aggregate refill rate: the mean across components.
    pub fn refill_rate(&self) -> f64 {
        let total: f64 = self.components.iter().map(|c| c.limiter.refill_rate()).sum();
        total / self.components.len() as f64
    }

    /// Aggregate last-update time: the maximum across components.
    pub async fn last_update_ms(&self) -> u64 {
        let mut max = 0u64;
        for c in &self.components {
            max = max.max(c.limiter.last_update_ms().await);
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{FixedWindow, TokenBucket};
    use crate::clock::TestClock;

    fn component(name: &str, limiter: Arc<dyn Limiter>) -> LimitComponent {
        LimitComponent::new(name, limiter)
    }

    #[tokio::test]
    async fn test_all_must_pass_reports_limiting_component() {
        let clock = Arc::new(TestClock::new(0));
        let a: Arc<dyn Limiter> = Arc::new(TokenBucket::new(10, 1.0, clock.clone()));
        let b: Arc<dyn Limiter> = Arc::new(FixedWindow::new(5, 1000, clock.clone()));
        let composite = Composite::new(
            vec![component("A", a), component("B", b)],
            CombinationLogic::AllMustPass,
        );

        for _ in 0..5 {
            let decision = composite.try_consume(1).await;
            assert!(decision.is_allowed());
        }
        let decision = composite.try_consume(1).await;
        assert!(decision.is_denied());
        assert_eq!(decision.limiting_component(), Some("B"));
    }

    #[tokio::test]
    async fn test_any_can_pass_charges_only_first_success() {
        let clock = Arc::new(TestClock::new(0));
        let a: Arc<dyn Limiter> = Arc::new(TokenBucket::new(0, 1.0, clock.clone()));
        let b: Arc<dyn Limiter> = Arc::new(TokenBucket::new(5, 1.0, clock.clone()));
        let composite = Composite::new(
            vec![component("A", a), component("B", b)],
            CombinationLogic::AnyCanPass,
        );

        let decision = composite.try_consume(1).await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_weighted_average_admits_at_half_score() {
        let clock = Arc::new(TestClock::new(0));
        let a: Arc<dyn Limiter> = Arc::new(TokenBucket::new(10, 1.0, clock.clone()));
        let b: Arc<dyn Limiter> = Arc::new(TokenBucket::new(0, 1.0, clock.clone()));
        let composite = Composite::new(
            vec![
                component("A", a).with_weight(1.0),
                component("B", b).with_weight(1.0),
            ],
            CombinationLogic::WeightedAverage,
        );

        let decision = composite.try_consume(1).await;
        assert!(decision.is_allowed());
        assert_eq!(decision.combination().score, Some(0.5));
    }

    #[tokio::test]
    async fn test_priority_based_short_circuits() {
        let clock = Arc::new(TestClock::new(0));
        let low: Arc<dyn Limiter> = Arc::new(TokenBucket::new(0, 1.0, clock.clone()));
        let high: Arc<dyn Limiter> = Arc::new(TokenBucket::new(5, 1.0, clock.clone()));
        let composite = Composite::new(
            vec![
                component("low", low).with_priority(1),
                component("high", high).with_priority(10),
            ],
            CombinationLogic::PriorityBased,
        );

        let decision = composite.try_consume(1).await;
        assert!(decision.is_denied());
        assert_eq!(decision.limiting_component(), Some("low"));
    }
}
