//! Manual trade utility: place, list, and close positions outside the loop.
//! Everything placed here carries the system magic tag, so a running loop
//! adopts these positions at its next reconciliation.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use helm_broker::{BrokerPosition, BrokerSession};
use helm_config::Config;
use helm_execution::{ExecutionConfig, ExecutionEngine};
use helm_schemas::{
    from_micros, to_micros, Metadata, OrderRequest, OrderSide, OrderType, PositionRecord,
};

pub struct TradeArgs {
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub volume: Option<f64>,
    pub list: bool,
    pub close: Option<i64>,
    pub close_all: bool,
}

pub fn execute(config: &Config, args: TradeArgs) -> Result<()> {
    let mut session = crate::build_session(config)?;
    let magic = config.trading.magic_tag;

    let mut exec_cfg = ExecutionConfig::with_defaults(magic);
    exec_cfg.deviation_points = config.trading.deviation_points;
    let mut engine = ExecutionEngine::new(exec_cfg);

    if args.list {
        return list_positions(&mut session, magic);
    }
    if let Some(ticket) = args.close {
        return close_one(&mut session, &mut engine, magic, ticket);
    }
    if args.close_all {
        return close_all(&mut session, &mut engine, magic);
    }

    match (args.symbol, args.side, args.volume) {
        (Some(symbol), Some(side), Some(volume)) => {
            place(&mut session, &mut engine, config, &symbol, &side, volume)
        }
        _ => bail!("nothing to do: pass --list, --close, --close-all, or --symbol/--side/--volume"),
    }
}

fn parse_side(raw: &str) -> Result<OrderSide> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => bail!("unknown side {other:?}: expected BUY or SELL"),
    }
}

fn place<S: BrokerSession>(
    session: &mut S,
    engine: &mut ExecutionEngine,
    config: &Config,
    symbol: &str,
    side: &str,
    volume_lots: f64,
) -> Result<()> {
    let side = parse_side(side)?;
    if volume_lots <= 0.0 {
        bail!("volume must be positive, got {volume_lots}");
    }
    let spec = session
        .symbol_spec(symbol)
        .map_err(|e| anyhow::anyhow!("symbol spec: {e}"))?;
    let volume = ExecutionEngine::quantise_volume(to_micros(volume_lots), &spec);

    let reference = session
        .bars(symbol, config.trading.timeframe, 1)
        .ok()
        .and_then(|bars| bars.last().map(|b| b.close_micros))
        .unwrap_or(0);

    let request = OrderRequest {
        client_tag: format!("manual:{}", Uuid::new_v4().simple()),
        symbol: symbol.to_string(),
        side,
        volume_micros: volume,
        order_type: OrderType::Market,
        reference_price_micros: reference,
        limit_price_micros: None,
        stop_micros: None,
        take_profit_micros: None,
        deviation_points: config.trading.deviation_points,
        magic_tag: config.trading.magic_tag,
    };

    let outcome = engine.submit(session, &request, Utc::now());
    println!("outcome={}", outcome.label());
    if let Some(fill) = outcome.fill() {
        println!("ticket={}", fill.ticket);
        println!("price={:.5}", from_micros(fill.price_micros));
        println!("volume={:.2}", from_micros(fill.volume_micros));
    }
    Ok(())
}

fn list_positions<S: BrokerSession>(session: &mut S, magic: i64) -> Result<()> {
    let health = session
        .health()
        .map_err(|e| anyhow::anyhow!("health probe: {e}"))?;
    println!(
        "connected={} trading_allowed={} balance={:.2} equity={:.2}",
        health.connected,
        health.trading_allowed,
        from_micros(health.balance_micros),
        from_micros(health.equity_micros),
    );
    let positions = session
        .open_positions(magic)
        .map_err(|e| anyhow::anyhow!("list positions: {e}"))?;
    println!("open_positions={}", positions.len());
    for p in positions {
        println!(
            "ticket={} symbol={} side={} volume={:.2} open={:.5} current={:.5} pnl={:.2}",
            p.ticket,
            p.symbol,
            p.side,
            from_micros(p.volume_micros),
            from_micros(p.open_price_micros),
            from_micros(p.current_price_micros),
            from_micros(p.unrealised_pnl_micros),
        );
    }
    Ok(())
}

fn close_one<S: BrokerSession>(
    session: &mut S,
    engine: &mut ExecutionEngine,
    magic: i64,
    ticket: i64,
) -> Result<()> {
    let positions = session
        .open_positions(magic)
        .map_err(|e| anyhow::anyhow!("query positions: {e}"))?;
    let position = positions
        .iter()
        .find(|p| p.ticket == ticket)
        .with_context(|| format!("ticket #{ticket} not found under this magic tag"))?;

    let record = record_from(position);
    let outcome = engine.close(session, &record, record.volume_micros, "manual_close", Utc::now());
    println!("ticket={ticket} outcome={}", outcome.label());
    Ok(())
}

fn close_all<S: BrokerSession>(
    session: &mut S,
    engine: &mut ExecutionEngine,
    magic: i64,
) -> Result<()> {
    let positions = session
        .open_positions(magic)
        .map_err(|e| anyhow::anyhow!("query positions: {e}"))?;
    println!("closing={}", positions.len());
    for position in &positions {
        let record = record_from(position);
        let outcome = engine.close(
            session,
            &record,
            record.volume_micros,
            "manual_close_all",
            Utc::now(),
        );
        println!("ticket={} outcome={}", position.ticket, outcome.label());
    }
    Ok(())
}

fn record_from(p: &BrokerPosition) -> PositionRecord {
    PositionRecord {
        ticket: p.ticket,
        symbol: p.symbol.clone(),
        side: p.side,
        volume_micros: p.volume_micros,
        open_price_micros: p.open_price_micros,
        open_time: p.open_time,
        current_price_micros: p.current_price_micros,
        stop_micros: p.stop_micros,
        take_profit_micros: p.take_profit_micros,
        unrealised_pnl_micros: p.unrealised_pnl_micros,
        realised_pnl_micros: 0,
        commission_micros: p.commission_micros,
        swap_micros: p.swap_micros,
        first_seen: p.open_time,
        origin: helm_schemas::PositionOrigin::Native,
        metadata: Metadata::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parsing_is_case_insensitive() {
        assert_eq!(parse_side("buy").unwrap(), OrderSide::Buy);
        assert_eq!(parse_side(" SELL ").unwrap(), OrderSide::Sell);
        assert!(parse_side("HOLD").is_err());
    }
}
