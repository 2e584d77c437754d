use helm_schemas::Bar;

/// An ordered window of bars: strictly ascending open times, no duplicates.
///
/// Construction normalises whatever the broker returned — sorts by open time
/// and keeps the last record for a duplicated open time (the broker's most
/// recent view of that bar wins).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BarWindow {
    bars: Vec<Bar>,
}

impl BarWindow {
    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.open_time);
        let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match out.last_mut() {
                Some(last) if last.open_time == bar.open_time => *last = bar,
                _ => out.push(bar),
            }
        }
        Self { bars: out }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// The most recent closed bar.
    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes_micros(&self) -> Vec<i64> {
        self.bars.iter().map(|b| b.close_micros).collect()
    }
}
