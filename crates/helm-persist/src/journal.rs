use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{MetricsSample, OrderRow, SignalRow, TradeRow};

#[derive(Clone, Debug)]
pub struct JournalConfig {
    pub path: PathBuf,
    /// Records buffered before an automatic flush.
    pub buffer_capacity: usize,
}

impl JournalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer_capacity: 64,
        }
    }
}

/// Append-only JSONL journal. One record per line; object keys are sorted so
/// identical runs produce byte-identical files.
pub struct Journal {
    cfg: JournalConfig,
    run_id: Uuid,
    buffer: Vec<String>,
}

impl Journal {
    /// Open (create parents as needed) and immediately persist a run-start
    /// record carrying the run id and config hash.
    pub fn open(
        cfg: JournalConfig,
        run_id: Uuid,
        config_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if let Some(parent) = cfg.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create journal directory {parent:?}"))?;
        }
        let mut journal = Self {
            cfg,
            run_id,
            buffer: Vec::new(),
        };
        journal.append(
            "run",
            serde_json::json!({ "config_hash": config_hash, "started_at": now }),
            now,
        )?;
        journal.flush()?;
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.cfg.path
    }

    pub fn record_signal(&mut self, row: &SignalRow, now: DateTime<Utc>) -> Result<()> {
        self.append_serialisable("signals", row, now)
    }

    pub fn record_order(&mut self, row: &OrderRow, now: DateTime<Utc>) -> Result<()> {
        self.append_serialisable("orders", row, now)
    }

    pub fn record_trade(&mut self, row: &TradeRow, now: DateTime<Utc>) -> Result<()> {
        self.append_serialisable("trades", row, now)
    }

    pub fn record_metrics(&mut self, sample: &MetricsSample, now: DateTime<Utc>) -> Result<()> {
        self.append_serialisable("metrics", sample, now)
    }

    fn append_serialisable<T: Serialize>(
        &mut self,
        stream: &str,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let value = serde_json::to_value(payload).context("serialise journal payload")?;
        self.append(stream, value, now)
    }

    fn append(&mut self, stream: &str, payload: Value, now: DateTime<Utc>) -> Result<()> {
        let envelope = serde_json::json!({
            "ts_utc": now,
            "run_id": self.run_id,
            "stream": stream,
            "payload": payload,
        });
        self.buffer.push(canonical_line(&envelope));
        if self.buffer.len() >= self.cfg.buffer_capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Write all buffered records. Called automatically at capacity and
    /// synchronously at shutdown.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.path)
            .with_context(|| format!("open journal {:?}", self.cfg.path))?;
        for line in self.buffer.drain(..) {
            file.write_all(line.as_bytes()).context("write journal line")?;
            file.write_all(b"\n").context("write journal newline")?;
        }
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Compact JSON with recursively sorted object keys.
fn canonical_line(v: &Value) -> String {
    let sorted = sort_keys(v);
    sorted.to_string()
}

fn sort_keys(v: &Value) -> Value {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use helm_schemas::{Metadata, Signal, SignalSide};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn signal_row() -> SignalRow {
        SignalRow {
            signal: Signal {
                id: "s-1".to_string(),
                emitted_at: now(),
                symbol: "EURUSD".to_string(),
                side: SignalSide::Long,
                reference_price_micros: 100_000_000,
                stop_micros: Some(99_000_000),
                take_profit_micros: None,
                confidence: 0.7,
                strategy: "sma_crossover".to_string(),
                metadata: Metadata::new(),
            },
            executed: true,
            ticket: Some(1001),
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn open_writes_run_header_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let run_id = Uuid::new_v4();
        Journal::open(JournalConfig::new(&path), run_id, "cafebabe", now()).unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["stream"], "run");
        assert_eq!(lines[0]["payload"]["config_hash"], "cafebabe");
        assert_eq!(lines[0]["run_id"], run_id.to_string());
    }

    #[test]
    fn records_buffer_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut journal =
            Journal::open(JournalConfig::new(&path), Uuid::new_v4(), "h", now()).unwrap();

        journal.record_signal(&signal_row(), now()).unwrap();
        assert_eq!(journal.buffered(), 1);
        assert_eq!(read_lines(&path).len(), 1, "only the header is on disk");

        journal.flush().unwrap();
        assert_eq!(journal.buffered(), 0);
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["stream"], "signals");
        assert_eq!(lines[1]["payload"]["ticket"], 1001);
    }

    #[test]
    fn buffer_capacity_triggers_automatic_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut cfg = JournalConfig::new(&path);
        cfg.buffer_capacity = 2;
        let mut journal = Journal::open(cfg, Uuid::new_v4(), "h", now()).unwrap();

        journal.record_signal(&signal_row(), now()).unwrap();
        journal.record_signal(&signal_row(), now()).unwrap();
        assert_eq!(journal.buffered(), 0, "capacity flush fired");
        assert_eq!(read_lines(&path).len(), 3);
    }

    #[test]
    fn lines_have_sorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut journal =
            Journal::open(JournalConfig::new(&path), Uuid::new_v4(), "h", now()).unwrap();
        journal.record_signal(&signal_row(), now()).unwrap();
        journal.flush().unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let second = raw.lines().nth(1).unwrap();
        let payload_idx = second.find("\"payload\"").unwrap();
        let run_idx = second.find("\"run_id\"").unwrap();
        let stream_idx = second.find("\"stream\"").unwrap();
        let ts_idx = second.find("\"ts_utc\"").unwrap();
        assert!(payload_idx < run_idx && run_idx < stream_idx && stream_idx < ts_idx);
    }
}
