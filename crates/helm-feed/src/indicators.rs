use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use helm_schemas::{from_micros, Bar};

use crate::BarWindow;

/// A declarative indicator entry, deserialised straight from the
/// `indicators` config list: `{ type: ..., params: {...} }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum IndicatorSpec {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
    Atr { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
}

impl IndicatorSpec {
    /// Primary column name this spec produces ("sma_20", "rsi_14", ...).
    pub fn column(&self) -> String {
        match self {
            IndicatorSpec::Sma { period } => format!("sma_{period}"),
            IndicatorSpec::Ema { period } => format!("ema_{period}"),
            IndicatorSpec::Rsi { period } => format!("rsi_{period}"),
            IndicatorSpec::Atr { period } => format!("atr_{period}"),
            IndicatorSpec::Macd { fast, slow, signal } => format!("macd_{fast}_{slow}_{signal}"),
        }
    }

    fn compute(&self, bars: &[Bar]) -> Result<Vec<(String, Vec<Option<f64>>)>, IndicatorError> {
        match self {
            IndicatorSpec::Sma { period } => {
                check_period(*period)?;
                Ok(vec![(self.column(), sma(&closes(bars), *period))])
            }
            IndicatorSpec::Ema { period } => {
                check_period(*period)?;
                Ok(vec![(self.column(), ema(&closes(bars), *period))])
            }
            IndicatorSpec::Rsi { period } => {
                check_period(*period)?;
                Ok(vec![(self.column(), rsi(&closes(bars), *period))])
            }
            IndicatorSpec::Atr { period } => {
                check_period(*period)?;
                Ok(vec![(self.column(), atr(bars, *period))])
            }
            IndicatorSpec::Macd { fast, slow, signal } => {
                check_period(*fast)?;
                check_period(*slow)?;
                check_period(*signal)?;
                if fast >= slow {
                    return Err(IndicatorError::BadParams {
                        detail: format!("macd fast {fast} must be below slow {slow}"),
                    });
                }
                let base = self.column();
                let (line, sig, hist) = macd(&closes(bars), *fast, *slow, *signal);
                Ok(vec![
                    (base.clone(), line),
                    (format!("{base}_signal"), sig),
                    (format!("{base}_hist"), hist),
                ])
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndicatorError {
    BadParams { detail: String },
}

impl std::fmt::Display for IndicatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorError::BadParams { detail } => write!(f, "bad indicator params: {detail}"),
        }
    }
}

impl std::error::Error for IndicatorError {}

fn check_period(period: usize) -> Result<(), IndicatorError> {
    if period == 0 {
        Err(IndicatorError::BadParams {
            detail: "period must be at least 1".to_string(),
        })
    } else {
        Ok(())
    }
}

/// The last closed bar together with every feature value available for it.
/// This is what the strategy sees each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRow {
    pub bar: Bar,
    pub features: BTreeMap<String, f64>,
}

impl FeatureRow {
    pub fn feature(&self, column: &str) -> Option<f64> {
        self.features.get(column).copied()
    }
}

/// Composes indicator specs over a bar window. Stateless between ticks.
#[derive(Clone, Debug, Default)]
pub struct IndicatorPipeline {
    specs: Vec<IndicatorSpec>,
}

impl IndicatorPipeline {
    pub fn new(specs: Vec<IndicatorSpec>) -> Self {
        Self { specs }
    }

    /// Add a spec unless an identical one is already present. Lets the
    /// runtime union config indicators with strategy requirements.
    pub fn ensure(&mut self, spec: IndicatorSpec) {
        if !self.specs.contains(&spec) {
            self.specs.push(spec);
        }
    }

    pub fn specs(&self) -> &[IndicatorSpec] {
        &self.specs
    }

    /// Compute every column for the window's last bar. A failing indicator is
    /// logged and its columns are simply absent.
    pub fn feature_row(&self, window: &BarWindow) -> Option<FeatureRow> {
        let last = window.last()?.clone();
        let bars = window.bars();
        let mut features = BTreeMap::new();
        for spec in &self.specs {
            match spec.compute(bars) {
                Ok(columns) => {
                    for (name, values) in columns {
                        if let Some(Some(v)) = values.last() {
                            features.insert(name, *v);
                        }
                    }
                }
                Err(e) => {
                    warn!(column = %spec.column(), error = %e, "indicator failed, column left absent");
                }
            }
        }
        Some(FeatureRow { bar: last, features })
    }
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| from_micros(b.close_micros)).collect()
}

fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for i in period..values.len() {
        prev += k * (values[i] - prev);
        out[i] = Some(prev);
    }
    out
}

fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() <= period {
        return out;
    }
    let mut gain = 0.0;
    let mut loss = 0.0;
    for i in 1..=period {
        let delta = values[i] - values[i - 1];
        if delta > 0.0 {
            gain += delta;
        } else {
            loss -= delta;
        }
    }
    let mut avg_gain = gain / period as f64;
    let mut avg_loss = loss / period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));
    for i in (period + 1)..values.len() {
        let delta = values[i] - values[i - 1];
        let (g, l) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        // Wilder smoothing.
        avg_gain = (avg_gain * (period as f64 - 1.0) + g) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + l) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let tr: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let prev_close = if i == 0 {
                None
            } else {
                Some(bars[i - 1].close_micros)
            };
            from_micros(b.true_range_micros(prev_close))
        })
        .collect();
    sma(&tr, period)
}

#[allow(clippy::type_complexity)]
fn macd(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let fast_line = ema(values, fast);
    let slow_line = ema(values, slow);
    let line: Vec<Option<f64>> = fast_line
        .iter()
        .zip(&slow_line)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal line: EMA over the defined stretch of the MACD line.
    let first_defined = line.iter().position(|v| v.is_some());
    let mut sig = vec![None; line.len()];
    if let Some(start) = first_defined {
        let defined: Vec<f64> = line[start..].iter().map(|v| v.unwrap_or(0.0)).collect();
        for (offset, v) in ema(&defined, signal).into_iter().enumerate() {
            sig[start + offset] = v;
        }
    }
    let hist: Vec<Option<f64>> = line
        .iter()
        .zip(&sig)
        .map(|(l, s)| match (l, s) {
            (Some(l), Some(s)) => Some(l - s),
            _ => None,
        })
        .collect();
    (line, sig, hist)
}
