use chrono::{DateTime, Duration, TimeZone, Utc};

use helm_schemas::{to_micros, Bar, Timeframe};

/// Fixed scenario epoch: Monday 2024-03-04 09:00 UTC.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

/// Build a bar series from close prices, one bar per timeframe step starting
/// at `start`. Highs/lows hug the closes tightly so indicator values stay
/// easy to reason about.
pub fn bars_from_closes(start: DateTime<Utc>, timeframe: Timeframe, closes: &[f64]) -> Vec<Bar> {
    let step = Duration::seconds(timeframe.seconds());
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let close_micros = to_micros(*close);
            let open_micros = if i == 0 {
                close_micros
            } else {
                to_micros(closes[i - 1])
            };
            Bar {
                open_time: start + step * i as i32,
                open_micros,
                high_micros: open_micros.max(close_micros) + 10_000,
                low_micros: open_micros.min(close_micros) - 10_000,
                close_micros,
                volume: 1_000,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_bar_per_close() {
        let bars = bars_from_closes(base_time(), Timeframe::M1, &[100.0, 101.0, 100.5]);
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].open_micros, 100_000_000);
        assert_eq!(bars[1].close_micros, 101_000_000);
        assert_eq!(bars[2].open_time - bars[1].open_time, Duration::seconds(60));
    }

    #[test]
    fn high_low_bracket_open_close() {
        let bars = bars_from_closes(base_time(), Timeframe::M1, &[100.0, 99.0]);
        let b = &bars[1];
        assert!(b.high_micros >= b.open_micros.max(b.close_micros));
        assert!(b.low_micros <= b.open_micros.min(b.close_micros));
    }
}
