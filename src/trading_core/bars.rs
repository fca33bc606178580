//! Fixed-interval bar aggregation
//!
//! Folds ticks into wall-clock buckets (e.g. 09:15, 09:20, 09:25 for a
//! 5-minute interval). A bar is archived only when the first tick of a later
//! bucket arrives; empty buckets are never back-filled.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// OHLCV bar for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bucket_start: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    fn new(bucket_start: NaiveDateTime, price: f64, volume: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    fn add_tick(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Result of feeding one tick to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarUpdate {
    /// Tick opened a new bucket (and archived the previous bar, if any)
    NewBar,
    /// Tick was folded into the current bar
    Update,
}

/// Aggregates ticks into N-minute bars
#[derive(Debug, Clone)]
pub struct BarAggregator {
    interval_minutes: u32,
    current: Option<Bar>,
    closed: Vec<Bar>,
}

impl BarAggregator {
    /// `interval_minutes` must be in 1..=60; callers validate via `StrategyConfig`.
    pub fn new(interval_minutes: u32) -> Self {
        Self {
            interval_minutes: interval_minutes.clamp(1, 60),
            current: None,
            closed: Vec::new(),
        }
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    /// Bucket start for a timestamp: minute floored to the interval, seconds zeroed
    pub fn bucket_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let minute = (ts.minute() / self.interval_minutes) * self.interval_minutes;
        // hour and floored minute are always in range
        let time = NaiveTime::from_hms_opt(ts.hour(), minute, 0).unwrap_or(NaiveTime::MIN);
        ts.date().and_time(time)
    }

    /// Feed a price sample
    pub fn update(&mut self, price: f64, ts: NaiveDateTime, volume: f64) -> BarUpdate {
        let bucket = self.bucket_start(ts);

        match &mut self.current {
            Some(bar) if bar.bucket_start == bucket => {
                bar.add_tick(price, volume);
                BarUpdate::Update
            }
            _ => {
                if let Some(finished) = self.current.take() {
                    self.closed.push(finished);
                }
                self.current = Some(Bar::new(bucket, price, volume));
                BarUpdate::NewBar
            }
        }
    }

    /// Most recently archived bar
    pub fn last_closed(&self) -> Option<&Bar> {
        self.closed.last()
    }

    /// Bar still being built
    pub fn current(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    /// All archived bars, oldest first
    pub fn closed_bars(&self) -> &[Bar] {
        &self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 20)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_bucket_floor() {
        let agg = BarAggregator::new(5);
        assert_eq!(agg.bucket_start(at(9, 17, 42)), at(9, 15, 0));
        assert_eq!(agg.bucket_start(at(9, 20, 0)), at(9, 20, 0));
        assert_eq!(agg.bucket_start(at(10, 59, 59)), at(10, 55, 0));
    }

    #[test]
    fn test_same_bucket_ohlc() {
        let mut agg = BarAggregator::new(5);

        assert_eq!(agg.update(100.0, at(9, 15, 1), 10.0), BarUpdate::NewBar);
        assert_eq!(agg.update(105.0, at(9, 16, 0), 5.0), BarUpdate::Update);
        assert_eq!(agg.update(102.0, at(9, 19, 59), 1.0), BarUpdate::Update);

        let bar = agg.current().unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 100.0);
        assert_eq!(bar.close, 102.0);
        assert_eq!(bar.volume, 16.0);

        // nothing closed until the next bucket starts
        assert!(agg.last_closed().is_none());
    }

    #[test]
    fn test_rollover_archives_once() {
        let mut agg = BarAggregator::new(5);
        agg.update(100.0, at(9, 15, 0), 0.0);
        agg.update(98.0, at(9, 18, 0), 0.0);

        assert_eq!(agg.update(101.0, at(9, 20, 0), 0.0), BarUpdate::NewBar);
        assert_eq!(agg.closed_bars().len(), 1);

        let closed = agg.last_closed().unwrap().clone();
        assert_eq!(closed.bucket_start, at(9, 15, 0));
        assert_eq!(closed.low, 98.0);
        assert_eq!(closed.close, 98.0);

        // further ticks in the new bucket leave the archive untouched
        agg.update(90.0, at(9, 21, 0), 0.0);
        assert_eq!(agg.closed_bars().len(), 1);
        assert_eq!(agg.last_closed().unwrap(), &closed);
    }

    #[test]
    fn test_gap_is_not_backfilled() {
        let mut agg = BarAggregator::new(5);
        agg.update(100.0, at(9, 15, 0), 0.0);
        agg.update(110.0, at(9, 40, 0), 0.0);

        assert_eq!(agg.closed_bars().len(), 1);
        assert_eq!(agg.current().unwrap().bucket_start, at(9, 40, 0));
    }

    #[test]
    fn test_new_day_same_minute_is_new_bucket() {
        let mut agg = BarAggregator::new(5);
        agg.update(100.0, at(15, 5, 0), 0.0);

        let next_day = NaiveDate::from_ymd_opt(2026, 1, 21)
            .unwrap()
            .and_hms_opt(15, 6, 0)
            .unwrap();
        assert_eq!(agg.update(120.0, next_day, 0.0), BarUpdate::NewBar);
    }
}
