//! Period accumulators
//!
//! Daily, monthly and yearly download/upload totals. Each accumulator keeps a
//! calendar marker (`2025-01-09`, `2025-01`, `2025`); when the marker for the
//! current date differs, the total restarts from zero before the cycle's
//! delta is added. Rollover is detected when the next tick arrives, not
//! scheduled.

use crate::wan::{WanSnapshot, bytes_to_gb};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Calendar period of an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Monthly,
    Yearly,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Daily, Period::Monthly, Period::Yearly];

    /// Marker identifying the period that contains `date`
    pub fn marker(&self, date: NaiveDate) -> String {
        match self {
            Period::Daily => format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day()),
            Period::Monthly => format!("{:04}-{:02}", date.year(), date.month()),
            Period::Yearly => format!("{:04}", date.year()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }
}

/// Traffic direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Download, Direction::Upload];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }

    /// This direction's byte delta in a WAN snapshot
    pub fn delta_bytes(&self, wan: &WanSnapshot) -> u64 {
        match self {
            Direction::Download => wan.rx_delta_bytes,
            Direction::Upload => wan.tx_delta_bytes,
        }
    }
}

/// Persisted accumulator value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub value_gb: f64,
    pub period_marker: String,
}

/// One (period, direction) running total
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodAccumulator {
    period: Period,
    direction: Direction,
    value_gb: f64,
    marker: String,
}

impl PeriodAccumulator {
    /// Start from a persisted value, or from zero in the current period
    pub fn restore(
        period: Period,
        direction: Direction,
        saved: Option<AccumulatorState>,
        today: NaiveDate,
    ) -> Self {
        match saved {
            Some(state) if state.value_gb.is_finite() && state.value_gb >= 0.0 => Self {
                period,
                direction,
                value_gb: state.value_gb,
                marker: state.period_marker,
            },
            Some(state) => {
                warn!(
                    "Discarding invalid {} {} total {}",
                    period.as_str(),
                    direction.as_str(),
                    state.value_gb
                );
                Self::fresh(period, direction, today)
            }
            None => Self::fresh(period, direction, today),
        }
    }

    fn fresh(period: Period, direction: Direction, today: NaiveDate) -> Self {
        Self {
            period,
            direction,
            value_gb: 0.0,
            marker: period.marker(today),
        }
    }

    /// Storage key, e.g. `daily_download`
    pub fn key(&self) -> String {
        format!("{}_{}", self.period.as_str(), self.direction.as_str())
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn value_gb(&self) -> f64 {
        self.value_gb
    }

    pub fn period_marker(&self) -> &str {
        &self.marker
    }

    pub fn state(&self) -> AccumulatorState {
        AccumulatorState {
            value_gb: self.value_gb,
            period_marker: self.marker.clone(),
        }
    }

    /// Roll over if the period changed, then add `delta_bytes`
    pub fn tick(&mut self, delta_bytes: u64, today: NaiveDate) {
        let marker = self.period.marker(today);
        if marker != self.marker {
            info!(
                "{} {} total rolled over ({} -> {}), was {:.3} GB",
                self.period.as_str(),
                self.direction.as_str(),
                self.marker,
                marker,
                self.value_gb
            );
            self.value_gb = 0.0;
            self.marker = marker;
        }
        self.value_gb += bytes_to_gb(delta_bytes);
    }
}

/// All six accumulators, fed from the same WAN delta
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorBank {
    accumulators: Vec<PeriodAccumulator>,
}

impl AccumulatorBank {
    /// Fresh accumulators for every period and direction
    pub fn new(today: NaiveDate) -> Self {
        Self::restore(&serde_json::Value::Null, today)
    }

    /// Restore from a persisted `{ "<period>_<direction>": state }` document
    ///
    /// Missing or malformed entries start from zero individually.
    pub fn restore(document: &serde_json::Value, today: NaiveDate) -> Self {
        let accumulators = Period::ALL
            .iter()
            .flat_map(|&period| Direction::ALL.iter().map(move |&direction| (period, direction)))
            .map(|(period, direction)| {
                let key = format!("{}_{}", period.as_str(), direction.as_str());
                let saved = document.get(&key).and_then(|v| {
                    serde_json::from_value::<AccumulatorState>(v.clone())
                        .map_err(|e| debug!("Skipping persisted {}: {}", key, e))
                        .ok()
                });
                PeriodAccumulator::restore(period, direction, saved, today)
            })
            .collect();

        Self { accumulators }
    }

    /// Feed one cycle; a cycle without WAN data ticks with zero bytes
    pub fn tick(&mut self, wan: Option<&WanSnapshot>, today: NaiveDate) {
        for acc in &mut self.accumulators {
            let delta = wan.map_or(0, |w| acc.direction.delta_bytes(w));
            acc.tick(delta, today);
        }
    }

    pub fn get(&self, period: Period, direction: Direction) -> Option<&PeriodAccumulator> {
        self.accumulators
            .iter()
            .find(|a| a.period == period && a.direction == direction)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeriodAccumulator> {
        self.accumulators.iter()
    }

    pub fn to_document(&self) -> serde_json::Value {
        let states: BTreeMap<String, AccumulatorState> =
            self.accumulators.iter().map(|a| (a.key(), a.state())).collect();
        serde_json::to_value(states).unwrap_or_default()
    }
}
