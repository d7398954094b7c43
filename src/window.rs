//! Context window management for review conversations
//!
//! Bounds a growing conversation to a token budget while keeping the
//! result a valid conversation: it must open on a system-or-human turn
//! and a tool-result turn must never lead (its tool call would have been
//! trimmed away). The same estimator is used for the budget check and
//! the trim decision, so the two never disagree.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::items::{Role, Turn};

/// Token estimation over turns.
pub trait TokenCounter: Send + Sync {
    fn count_turn(&self, turn: &Turn) -> usize;

    fn count(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| self.count_turn(t)).sum()
    }
}

/// Character-proportional estimator, roughly four characters per token.
/// Deliberately crude: consistency matters here, not accuracy.
#[derive(Debug, Clone)]
pub struct ApproxTokenCounter {
    chars_per_token: usize,
}

impl ApproxTokenCounter {
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count_turn(&self, turn: &Turn) -> usize {
        let mut chars = turn.content.len();
        if let Some(calls) = &turn.tool_calls {
            for call in calls {
                chars += call.name.len();
                chars += call.arguments.to_string().len();
            }
        }
        chars.div_ceil(self.chars_per_token)
    }
}

/// Budgets for [`ContextWindow::trim`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPolicy {
    /// Hard budget: sequences at or under this are not suffix-trimmed
    pub max_tokens: usize,
    /// Sub-budget the kept suffix is trimmed to, leaving headroom under
    /// the hard budget
    pub target_tokens: usize,
    /// Human turn synthesized when trimming left no human turn at all
    pub fallback_prompt: String,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 12_000,
            target_tokens: 10_000,
            fallback_prompt:
                "Continue reviewing the request context above and answer with \
                 {\"action\": \"allow\"} or {\"action\": \"block\"}."
                    .to_string(),
        }
    }
}

/// Pure, idempotent conversation trimmer.
#[derive(Clone)]
pub struct ContextWindow {
    policy: WindowPolicy,
    counter: Arc<dyn TokenCounter>,
}

impl ContextWindow {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            counter: Arc::new(ApproxTokenCounter::new()),
        }
    }

    pub fn with_counter(policy: WindowPolicy, counter: Arc<dyn TokenCounter>) -> Self {
        Self { policy, counter }
    }

    pub fn count(&self, turns: &[Turn]) -> usize {
        self.counter.count(turns)
    }

    /// Trim `turns` to the window budgets, reconstructing a valid
    /// conversation boundary. Calling this twice with the same policy on
    /// its own output is a no-op.
    pub fn trim(&self, turns: &[Turn]) -> Vec<Turn> {
        let total = self.counter.count(turns);
        if total <= self.policy.max_tokens {
            // Even an in-budget conversation must not open on an orphaned
            // tool result.
            let mut kept = turns.to_vec();
            drop_leading_tools(&mut kept);
            return kept;
        }
        tracing::debug!(
            total_tokens = total,
            max_tokens = self.policy.max_tokens,
            "conversation over budget, trimming"
        );

        // Never end mid-assistant-turn awaiting a tool result.
        let mut end = turns.len();
        while end > 0 && !matches!(turns[end - 1].role, Role::Human | Role::Tool) {
            end -= 1;
        }

        // Keep the longest suffix that fits the target sub-budget.
        let mut start = end;
        let mut used = 0;
        while start > 0 {
            let cost = self.counter.count_turn(&turns[start - 1]);
            if used + cost > self.policy.target_tokens {
                break;
            }
            used += cost;
            start -= 1;
        }

        // The kept sequence must start on a human or tool turn.
        while start < end && !matches!(turns[start].role, Role::Human | Role::Tool) {
            start += 1;
        }

        let mut kept: Vec<Turn> = turns[start..end].to_vec();

        if !kept.iter().any(|t| t.role == Role::System) {
            if let Some(sys) = turns.iter().rev().find(|t| t.role == Role::System) {
                kept.insert(0, sys.clone());
            }
        }

        if !kept.iter().any(|t| t.role == Role::Human) {
            let insert_at = usize::from(
                kept.first().map(|t| t.role == Role::System).unwrap_or(false),
            );
            let human = turns
                .iter()
                .rev()
                .find(|t| t.role == Role::Human)
                .cloned()
                .unwrap_or_else(|| Turn::human(self.policy.fallback_prompt.clone()));
            kept.insert(insert_at, human);
        }

        // A tool result must never lead; its call was trimmed away.
        drop_leading_tools(&mut kept);

        kept
    }
}

fn drop_leading_tools(turns: &mut Vec<Turn>) {
    while turns.first().map(|t| t.role) == Some(Role::Tool) {
        turns.remove(0);
    }
}
