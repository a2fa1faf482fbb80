//! Tracks how many lots of ETF exposure are not offset by a future
//! position, and arms a timer when that exceeds a threshold for too long.
//!
//! The breach timer runs on real wall-clock time, independent of the
//! market's virtual-time speed factor, via `tokio::task::spawn_local` plus
//! `tokio::time::sleep`; the `JoinHandle` is the cancellable handle.

use std::time::Duration;

use tokio::task::JoinHandle;

pub const MAX_UNHEDGED_LOTS: i64 = 10;
pub const UNHEDGED_LOTS_TIME_LIMIT: Duration = Duration::from_secs(60);

pub struct UnhedgedLots {
    relative_position: i64,
    timer_handle: Option<JoinHandle<()>>,
}

impl UnhedgedLots {
    pub fn new() -> Self {
        UnhedgedLots {
            relative_position: 0,
            timer_handle: None,
        }
    }

    /// The raw signed `etf_position - future_position` delta this tracker
    /// is watching, before clamping to the hedged band.
    pub fn relative_position(&self) -> i64 {
        self.relative_position
    }

    /// Number of lots currently outside the `[-MAX, MAX]` hedged band.
    pub fn unhedged_lot_count(&self) -> i64 {
        if self.relative_position > MAX_UNHEDGED_LOTS {
            self.relative_position - MAX_UNHEDGED_LOTS
        } else if self.relative_position < -MAX_UNHEDGED_LOTS {
            self.relative_position + MAX_UNHEDGED_LOTS
        } else {
            0
        }
    }

    /// Apply a position delta, arming or cancelling the breach timer as
    /// the relative position crosses the `+-MAX_UNHEDGED_LOTS` band.
    /// `spawn_callback` is called (at most once per arm) to spawn the
    /// delayed task; it returns the `JoinHandle` tracking it.
    pub fn apply_position_delta<F>(&mut self, delta: i64, spawn_callback: F)
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let new_relative_position = self.relative_position + delta;

        if delta > 0 {
            if self.relative_position < -MAX_UNHEDGED_LOTS && new_relative_position >= -MAX_UNHEDGED_LOTS {
                if let Some(handle) = self.timer_handle.take() {
                    handle.abort();
                }
            }
            if new_relative_position > MAX_UNHEDGED_LOTS && self.relative_position <= MAX_UNHEDGED_LOTS {
                self.timer_handle = Some(spawn_callback());
            }
        } else if delta < 0 {
            if self.relative_position > MAX_UNHEDGED_LOTS && new_relative_position <= MAX_UNHEDGED_LOTS {
                if let Some(handle) = self.timer_handle.take() {
                    handle.abort();
                }
            }
            if new_relative_position < -MAX_UNHEDGED_LOTS && self.relative_position >= -MAX_UNHEDGED_LOTS {
                self.timer_handle = Some(spawn_callback());
            }
        }

        self.relative_position = new_relative_position;
    }
}

impl Default for UnhedgedLots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhedged_lot_count_is_zero_within_band() {
        let mut lots = UnhedgedLots::new();
        lots.apply_position_delta(5, || panic!("should not arm"));
        assert_eq!(lots.unhedged_lot_count(), 0);
    }

    #[test]
    fn unhedged_lot_count_reports_excess_above_band() {
        let mut lots = UnhedgedLots::new();
        lots.relative_position = 15;
        assert_eq!(lots.unhedged_lot_count(), 5);
    }

    #[test]
    fn unhedged_lot_count_reports_excess_below_band() {
        let mut lots = UnhedgedLots::new();
        lots.relative_position = -15;
        assert_eq!(lots.unhedged_lot_count(), -5);
    }
}
