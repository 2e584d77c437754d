use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use helm_schemas::PositionRecord;

use crate::{EvalContext, ExitBuildError, ExitDecision, ExitRule, ExitRuleEntry};

/// Ordered set of exit rules. Rules are kept sorted by priority descending;
/// insertion order breaks ties. Per position, the first rule to decide wins
/// and short-circuits the rest — at most one decision per position per tick.
#[derive(Default)]
pub struct ExitArbiter {
    rules: Vec<Box<dyn ExitRule>>,
}

impl ExitArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config entries, skipping disabled ones.
    pub fn from_entries(entries: &[ExitRuleEntry]) -> Result<Self, ExitBuildError> {
        let mut arbiter = Self::new();
        for entry in entries {
            if !entry.enabled {
                continue;
            }
            arbiter.register(entry.kind.build()?);
        }
        Ok(arbiter)
    }

    pub fn register(&mut self, rule: Box<dyn ExitRule>) {
        info!(rule = rule.name(), priority = rule.priority(), "exit rule registered");
        self.rules.push(rule);
        // Stable sort: equal priorities keep insertion order.
        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate all rules across all tracked positions (ticket ascending).
    /// Decisions are collected and returned; executing them — and mutating
    /// the tracker — is the caller's job, outside this scan.
    pub fn evaluate(
        &mut self,
        positions: &BTreeMap<i64, PositionRecord>,
        ctx: &EvalContext,
    ) -> Vec<ExitDecision> {
        let mut decisions = Vec::new();
        for (ticket, position) in positions {
            for rule in &mut self.rules {
                if !rule.is_enabled() {
                    continue;
                }
                if let Some(decision) = rule.evaluate(position, ctx) {
                    debug!(
                        ticket,
                        rule = rule.name(),
                        reason = %decision.reason,
                        "exit decision"
                    );
                    decisions.push(decision);
                    break;
                }
            }
        }
        decisions
    }

    /// Free every rule's scratch for a ticket the tracker removed.
    pub fn forget(&mut self, ticket: i64) {
        for rule in &mut self.rules {
            rule.forget(ticket);
        }
    }

    pub fn reset(&mut self) {
        for rule in &mut self.rules {
            rule.reset();
        }
    }

    /// Union of all rules' scratch tickets (state-consistency audits).
    pub fn scratch_tickets(&self) -> BTreeSet<i64> {
        self.rules
            .iter()
            .flat_map(|r| r.scratch_tickets())
            .collect()
    }
}
