//! helm-config
//!
//! The single typed configuration document, validated at startup.
//! Unknown fields fail fast; numeric ranges are checked; secrets are
//! resolved from environment variable NAMES stored in config and never
//! echoed. The canonical-JSON SHA-256 hash of the document identifies the
//! run in the journal.

mod mindset;
mod secrets;

pub use mindset::Mindset;
pub use secrets::{resolve_credentials, scan_for_secret_literals};

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use helm_exit::ExitRuleEntry;
use helm_feed::IndicatorSpec;
use helm_position::AdoptionPolicy;
use helm_risk::RiskLimits;
use helm_schemas::{to_micros, Timeframe};
use helm_strategy::StrategyConfig;

// ---------------------------------------------------------------------------
// Raw document (exact file shape)
// ---------------------------------------------------------------------------

fn default_password_env() -> String {
    "HELM_BROKER_PASSWORD".to_string()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_poll_interval() -> u64 {
    60
}
fn default_lookback() -> usize {
    500
}
fn default_deviation() -> i64 {
    10
}
fn default_grace_seconds() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    broker: RawBroker,
    trading: RawTrading,
    #[serde(default)]
    risk: RawRisk,
    strategy: StrategyConfig,
    #[serde(default)]
    indicators: Vec<IndicatorSpec>,
    #[serde(default)]
    exit_strategies: Vec<ExitRuleEntry>,
    #[serde(default)]
    orphan_trades: RawOrphanTrades,
    #[serde(default)]
    mindset: Option<Mindset>,
    persistence: RawPersistence,
    #[serde(default)]
    shutdown: RawShutdown,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBroker {
    login: i64,
    /// NAME of the env var holding the password — never the value.
    #[serde(default = "default_password_env")]
    password_env: String,
    server: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    terminal_path: Option<String>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTrading {
    symbol: String,
    timeframe: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_seconds: u64,
    #[serde(default = "default_lookback")]
    lookback_bars: usize,
    magic_tag: i64,
    #[serde(default = "default_deviation")]
    deviation_points: i64,
}

/// All optional: anything unset falls back to the mindset preset, then to
/// the balanced defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRisk {
    max_volume_per_order: Option<f64>,
    default_volume: Option<f64>,
    max_daily_loss: Option<f64>,
    max_positions_per_symbol: Option<usize>,
    max_total_positions: Option<usize>,
    position_size_pct: Option<f64>,
    emergency_drawdown_pct: Option<f64>,
    circuit_breaker_enabled: Option<bool>,
    min_risk_reward: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOrphanTrades {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    adopt_symbols: Vec<String>,
    #[serde(default)]
    ignore_symbols: Vec<String>,
    #[serde(default)]
    max_age_hours: i64,
    #[serde(default)]
    log_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPersistence {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShutdown {
    #[serde(default = "default_true")]
    flatten_on_shutdown: bool,
    #[serde(default = "default_grace_seconds")]
    grace_seconds: u64,
}

impl Default for RawShutdown {
    fn default() -> Self {
        Self {
            flatten_on_shutdown: true,
            grace_seconds: default_grace_seconds(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub login: i64,
    pub password_env: String,
    pub server: String,
    pub timeout_ms: u64,
    pub terminal_path: Option<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct TradingConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub poll_interval_seconds: u64,
    pub lookback_bars: usize,
    pub magic_tag: i64,
    pub deviation_points: i64,
}

#[derive(Clone, Debug)]
pub struct ShutdownConfig {
    pub flatten_on_shutdown: bool,
    pub grace_seconds: u64,
}

/// The fully validated configuration with every default and mindset preset
/// applied. This is the only config type the rest of the system sees.
#[derive(Debug)]
pub struct Config {
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub risk: RiskLimits,
    pub strategy: StrategyConfig,
    pub indicators: Vec<IndicatorSpec>,
    pub exit_strategies: Vec<ExitRuleEntry>,
    pub orphan_trades: AdoptionPolicy,
    pub persistence_path: PathBuf,
    pub shutdown: ShutdownConfig,
    pub dry_run: bool,
    pub mindset: Option<Mindset>,
    /// SHA-256 over the canonical JSON form of the document.
    pub config_hash: String,
}

pub fn load(path: &Path) -> Result<Config> {
    load_with_overrides(path, None, false)
}

/// Load with command-line overrides applied: `--mindset` replaces the file's
/// mindset, `--dry-run` forces dry-run mode on.
pub fn load_with_overrides(
    path: &Path,
    mindset: Option<Mindset>,
    force_dry_run: bool,
) -> Result<Config> {
    let raw_text =
        std::fs::read_to_string(path).with_context(|| format!("read config {path:?}"))?;
    from_str_with_overrides(&raw_text, mindset, force_dry_run)
}

pub fn from_str(raw_text: &str) -> Result<Config> {
    from_str_with_overrides(raw_text, None, false)
}

pub fn from_str_with_overrides(
    raw_text: &str,
    mindset: Option<Mindset>,
    force_dry_run: bool,
) -> Result<Config> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(raw_text).context("config is not valid YAML")?;
    let json = serde_json::to_value(&yaml).context("config YAML to JSON conversion")?;

    // Literal secrets in the file abort before anything else happens.
    scan_for_secret_literals(&json)?;

    let mut raw: RawConfig = serde_yaml::from_str(raw_text).context("config validation failed")?;
    if let Some(m) = mindset {
        raw.mindset = Some(m);
    }
    if force_dry_run {
        raw.dry_run = true;
    }
    let config_hash = hash_canonical(&json);
    validate(raw, config_hash)
}

fn hash_canonical(json: &serde_json::Value) -> String {
    let canonical = sort_keys(json).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn sort_keys(v: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn validate(raw: RawConfig, config_hash: String) -> Result<Config> {
    let Some(timeframe) = Timeframe::parse(&raw.trading.timeframe) else {
        bail!(
            "CONFIG_INVALID trading.timeframe: unknown timeframe {:?} (expected M1/M5/M15/M30/H1/H4/D1)",
            raw.trading.timeframe
        );
    };
    if raw.trading.symbol.trim().is_empty() {
        bail!("CONFIG_INVALID trading.symbol: must not be empty");
    }
    if raw.trading.poll_interval_seconds == 0 {
        bail!("CONFIG_INVALID trading.poll_interval_seconds: must be at least 1");
    }
    if !(10..=10_000).contains(&raw.trading.lookback_bars) {
        bail!(
            "CONFIG_INVALID trading.lookback_bars: {} outside [10, 10000]",
            raw.trading.lookback_bars
        );
    }
    if raw.trading.magic_tag <= 0 {
        bail!("CONFIG_INVALID trading.magic_tag: must be positive");
    }
    if raw.trading.deviation_points < 0 {
        bail!("CONFIG_INVALID trading.deviation_points: must not be negative");
    }
    if raw.persistence.path.trim().is_empty() {
        bail!("CONFIG_INVALID persistence.path: must not be empty");
    }
    if raw.broker.login <= 0 {
        bail!("CONFIG_INVALID broker.login: must be positive");
    }

    let risk = resolve_risk(&raw.risk, raw.mindset)?;

    let exit_strategies = if raw.exit_strategies.is_empty() {
        match raw.mindset {
            Some(m) => m.default_exit_entries(),
            None => Vec::new(),
        }
    } else {
        raw.exit_strategies
    };
    // Surface rule-construction errors (bad time strings and the like) at
    // startup, not on the first tick.
    for entry in exit_strategies.iter().filter(|e| e.enabled) {
        entry
            .kind
            .build()
            .map_err(|e| anyhow::anyhow!("CONFIG_INVALID exit_strategies: {e}"))?;
    }

    let orphan_trades = AdoptionPolicy {
        enabled: raw.orphan_trades.enabled,
        adopt_symbols: raw.orphan_trades.adopt_symbols.into_iter().collect(),
        ignore_symbols: raw.orphan_trades.ignore_symbols.into_iter().collect(),
        max_age_hours: raw.orphan_trades.max_age_hours,
        log_only: raw.orphan_trades.log_only,
    };
    if orphan_trades.max_age_hours < 0 {
        bail!("CONFIG_INVALID orphan_trades.max_age_hours: must not be negative");
    }

    Ok(Config {
        broker: BrokerConfig {
            login: raw.broker.login,
            password_env: raw.broker.password_env,
            server: raw.broker.server,
            timeout_ms: raw.broker.timeout_ms,
            terminal_path: raw.broker.terminal_path,
            max_retries: raw.broker.max_retries,
            retry_delay_ms: raw.broker.retry_delay_ms,
        },
        trading: TradingConfig {
            symbol: raw.trading.symbol,
            timeframe,
            poll_interval_seconds: raw.trading.poll_interval_seconds,
            lookback_bars: raw.trading.lookback_bars,
            magic_tag: raw.trading.magic_tag,
            deviation_points: raw.trading.deviation_points,
        },
        risk,
        strategy: raw.strategy,
        indicators: raw.indicators,
        exit_strategies,
        orphan_trades,
        persistence_path: PathBuf::from(raw.persistence.path),
        shutdown: ShutdownConfig {
            flatten_on_shutdown: raw.shutdown.flatten_on_shutdown,
            grace_seconds: raw.shutdown.grace_seconds,
        },
        dry_run: raw.dry_run,
        mindset: raw.mindset,
        config_hash,
    })
}

fn resolve_risk(raw: &RawRisk, mindset: Option<Mindset>) -> Result<RiskLimits> {
    let preset = mindset.unwrap_or(Mindset::Balanced).risk_preset();

    let max_volume = raw.max_volume_per_order.unwrap_or(preset.max_volume_per_order);
    let default_volume = raw.default_volume.unwrap_or(preset.default_volume);
    let max_daily_loss = raw.max_daily_loss.unwrap_or(preset.max_daily_loss);
    let position_size_pct = raw.position_size_pct.unwrap_or(preset.position_size_pct);
    let emergency_pct = raw
        .emergency_drawdown_pct
        .unwrap_or(preset.emergency_drawdown_pct);
    let min_risk_reward = raw.min_risk_reward.unwrap_or(preset.min_risk_reward);

    if max_volume <= 0.0 {
        bail!("CONFIG_INVALID risk.max_volume_per_order: must be positive");
    }
    if default_volume <= 0.0 {
        bail!("CONFIG_INVALID risk.default_volume: must be positive");
    }
    if default_volume > max_volume {
        bail!(
            "CONFIG_INVALID risk.default_volume: {default_volume} exceeds max_volume_per_order {max_volume}"
        );
    }
    if max_daily_loss < 0.0 {
        bail!("CONFIG_INVALID risk.max_daily_loss: must not be negative");
    }
    if !(0.0..=1.0).contains(&position_size_pct) || position_size_pct == 0.0 {
        bail!("CONFIG_INVALID risk.position_size_pct: must be in (0, 1]");
    }
    if !(0.0..1.0).contains(&emergency_pct) {
        bail!("CONFIG_INVALID risk.emergency_drawdown_pct: must be in [0, 1)");
    }
    if min_risk_reward < 0.0 {
        bail!("CONFIG_INVALID risk.min_risk_reward: must not be negative");
    }

    Ok(RiskLimits {
        max_volume_per_order_micros: to_micros(max_volume),
        default_volume_micros: to_micros(default_volume),
        max_daily_loss_micros: to_micros(max_daily_loss),
        max_positions_per_symbol: raw
            .max_positions_per_symbol
            .unwrap_or(preset.max_positions_per_symbol),
        max_total_positions: raw
            .max_total_positions
            .unwrap_or(preset.max_total_positions),
        position_size_pct_micros: to_micros(position_size_pct),
        emergency_drawdown_pct_micros: to_micros(emergency_pct),
        circuit_breaker_enabled: raw
            .circuit_breaker_enabled
            .unwrap_or(preset.circuit_breaker_enabled),
        min_risk_reward_micros: to_micros(min_risk_reward),
    })
}
