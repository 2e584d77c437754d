use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use helm_schemas::{div_micros, mul_micros, to_micros, Metadata, PositionRecord};

use crate::{EvalContext, ExitDecision, ExitRule};

fn default_target_pct() -> f64 {
    2.0
}

/// One scale-out level: close `close_pct` percent of the current volume when
/// unrealised profit reaches `target_pct` percent of the entry notional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfitLevel {
    pub target_pct: f64,
    pub close_pct: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfitTargetParams {
    /// Single-target mode: profit as percent of entry notional.
    #[serde(default = "default_target_pct")]
    pub target_pct: f64,
    /// Scale-out mode: ordered levels; the last level closes the remainder.
    #[serde(default)]
    pub levels: Vec<ProfitLevel>,
    #[serde(default)]
    pub partial_close_enabled: bool,
}

impl Default for ProfitTargetParams {
    fn default() -> Self {
        Self {
            target_pct: default_target_pct(),
            levels: Vec::new(),
            partial_close_enabled: false,
        }
    }
}

/// Takes profit at configured levels, optionally scaling out in slices.
pub struct ProfitTarget {
    params: ProfitTargetParams,
    target_fraction_micros: i64,
    level_fractions: Vec<(i64, i64)>, // (profit fraction, close fraction)
    fired: BTreeMap<i64, Vec<usize>>,
}

impl ProfitTarget {
    pub const NAME: &'static str = "profit_target";
    pub const PRIORITY: u8 = 40;

    pub fn new(params: ProfitTargetParams) -> Self {
        let level_fractions = params
            .levels
            .iter()
            .map(|l| (to_micros(l.target_pct / 100.0), to_micros(l.close_pct / 100.0)))
            .collect();
        Self {
            target_fraction_micros: to_micros(params.target_pct / 100.0),
            level_fractions,
            params,
            fired: BTreeMap::new(),
        }
    }

    /// Unrealised profit as a fraction of the entry notional, in micros.
    fn profit_fraction(position: &PositionRecord) -> i64 {
        div_micros(position.unrealised_pnl_micros, position.notional_micros())
    }

    fn scale_out(&mut self, position: &PositionRecord, ctx: &EvalContext) -> Option<ExitDecision> {
        let profit = Self::profit_fraction(position);
        let fired = self.fired.entry(position.ticket).or_default();

        for (index, (target, close_fraction)) in self.level_fractions.iter().enumerate() {
            if fired.contains(&index) || profit < *target {
                continue;
            }
            fired.push(index);
            let is_final = index == self.level_fractions.len() - 1;
            let close_volume = if is_final {
                None
            } else {
                Some(mul_micros(position.volume_micros, *close_fraction))
            };
            info!(
                ticket = position.ticket,
                level = index + 1,
                of = self.level_fractions.len(),
                profit_micros = profit,
                "profit level reached"
            );
            let mut metadata = Metadata::new();
            metadata.insert("level".to_string(), (index + 1).to_string());
            metadata.insert("levels_total".to_string(), self.level_fractions.len().to_string());
            metadata.insert("profit_fraction".to_string(), profit.to_string());
            let reason = if is_final { "profit_target" } else { "partial_profit_target" };
            return Some(ExitDecision {
                ticket: position.ticket,
                reason: reason.to_string(),
                rule: Self::NAME.to_string(),
                close_volume_micros: close_volume,
                triggered_at: ctx.now,
                confidence: 1.0,
                metadata,
            });
        }
        None
    }
}

impl ExitRule for ProfitTarget {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> u8 {
        Self::PRIORITY
    }

    fn evaluate(&mut self, position: &PositionRecord, ctx: &EvalContext) -> Option<ExitDecision> {
        if position.volume_micros <= 0 || position.notional_micros() == 0 {
            return None;
        }

        if self.params.partial_close_enabled && !self.level_fractions.is_empty() {
            return self.scale_out(position, ctx);
        }

        let profit = Self::profit_fraction(position);
        if profit < self.target_fraction_micros {
            return None;
        }
        info!(
            ticket = position.ticket,
            profit_micros = profit,
            target_micros = self.target_fraction_micros,
            "profit target reached"
        );
        let mut metadata = Metadata::new();
        metadata.insert("profit_fraction".to_string(), profit.to_string());
        metadata.insert(
            "profit_micros".to_string(),
            position.unrealised_pnl_micros.to_string(),
        );
        Some(ExitDecision {
            ticket: position.ticket,
            reason: Self::NAME.to_string(),
            rule: Self::NAME.to_string(),
            close_volume_micros: None,
            triggered_at: ctx.now,
            confidence: 1.0,
            metadata,
        })
    }

    fn forget(&mut self, ticket: i64) {
        self.fired.remove(&ticket);
    }

    fn reset(&mut self) {
        self.fired.clear();
    }

    fn scratch_tickets(&self) -> Vec<i64> {
        self.fired.keys().copied().collect()
    }
}
