//! # Release Strategy Chain
//!
//! Decides, from a group's current contents, whether to keep waiting, release
//! the group, or discard it.
//!
//! ## Chain Contract
//!
//! Strategies run in a fixed order. The first strategy returning anything other
//! than `Continue` decides; if every strategy returns `Continue`, so does the
//! chain. Strategies read the group and never mutate it.

mod strategies;

pub use strategies::{
    CancelledDiscardStrategy, ExpectedCountReleaseStrategy, MessageSentReleaseStrategy,
    PartialReleaseOnExpiryStrategy, RequiredKindsReleaseStrategy,
};

use crate::domain::group::MessageGroup;
use shared_types::Timestamp;

/// Outcome of evaluating a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseDecision {
    /// Not ready yet, keep buffering.
    Continue,
    /// Complete, hand the group to the processor chain.
    Release,
    /// Unsatisfiable, route the group to the discard path.
    Discard,
}

/// Inputs to a decision besides the group itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseContext {
    /// Evaluation time.
    pub now: Timestamp,
    /// Set when the sweeper (or an admin) forces resolution of an expired group.
    pub deadline_passed: bool,
}

impl ReleaseContext {
    /// Context for the live path.
    pub fn live(now: Timestamp) -> Self {
        Self {
            now,
            deadline_passed: false,
        }
    }

    /// Context for forced resolution.
    pub fn forced(now: Timestamp) -> Self {
        Self {
            now,
            deadline_passed: true,
        }
    }
}

/// A single release policy.
pub trait ReleaseStrategy: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Evaluate the group.
    fn decide(&self, group: &MessageGroup, ctx: &ReleaseContext) -> ReleaseDecision;
}

/// Ordered, immutable list of strategies.
pub struct ReleaseStrategyChain {
    strategies: Vec<Box<dyn ReleaseStrategy>>,
}

impl ReleaseStrategyChain {
    /// Start a chain with its first strategy.
    pub fn first(strategy: impl ReleaseStrategy + 'static) -> ReleaseChainBuilder {
        ReleaseChainBuilder {
            strategies: vec![Box::new(strategy)],
        }
    }

    /// Chain used by the message connector: cancellations discard, a sent
    /// message meeting its subscriber releases.
    pub fn message_connector() -> Self {
        Self::first(CancelledDiscardStrategy::default())
            .then(MessageSentReleaseStrategy)
            .build()
    }

    /// Evaluate the chain. The first non-`Continue` decision wins.
    pub fn decide(&self, group: &MessageGroup, ctx: &ReleaseContext) -> ReleaseDecision {
        for strategy in &self.strategies {
            let decision = strategy.decide(group, ctx);
            if decision != ReleaseDecision::Continue {
                tracing::debug!(
                    correlation_key = %group.key(),
                    strategy = strategy.name(),
                    decision = ?decision,
                    "Release strategy decided"
                );
                return decision;
            }
        }
        ReleaseDecision::Continue
    }

    /// Names of the strategies in evaluation order.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Number of strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain has no strategies.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Builder for [`ReleaseStrategyChain`].
pub struct ReleaseChainBuilder {
    strategies: Vec<Box<dyn ReleaseStrategy>>,
}

impl ReleaseChainBuilder {
    /// Append the next strategy.
    pub fn then(mut self, strategy: impl ReleaseStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Freeze the chain.
    pub fn build(self) -> ReleaseStrategyChain {
        ReleaseStrategyChain {
            strategies: self.strategies,
        }
    }
}
