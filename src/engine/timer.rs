//! Virtual clock: wall-clock time scaled by a speed factor, ticking at a
//! fixed virtual interval and fast-forwarding over any ticks the event
//! loop was too busy to deliver on schedule.
//!
//! Two independent `Timer` instances are created during startup: one for
//! the information publisher's tick interval, one for the market-event
//! replay interval.

use std::time::Instant;

use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct TickEvent {
    pub now: f64,
    pub tick_number: u64,
}

pub struct Timer {
    tick_interval: f64,
    speed: f64,
    start_time: Option<Instant>,
}

impl Timer {
    pub fn new(tick_interval: f64, speed: f64) -> Self {
        Timer {
            tick_interval,
            speed,
            start_time: None,
        }
    }

    /// Virtual seconds elapsed since `start`, or `0.0` before the timer
    /// has been started.
    pub fn advance(&self) -> f64 {
        match self.start_time {
            Some(start) => start.elapsed().as_secs_f64() * self.speed,
            None => 0.0,
        }
    }

    pub fn start(&mut self) -> Instant {
        let start = Instant::now();
        self.start_time = Some(start);
        start
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    /// Resolve the next tick, given the virtual tick time and number that
    /// was scheduled. If the event loop fell behind, skipped ticks are
    /// folded in so `tick_number` reflects real elapsed ticks rather than
    /// double-counting a delayed one. Returns the resolved tick event and
    /// the wall-clock `Instant` at which the *next* tick should fire.
    pub fn resolve_tick(&self, scheduled_tick_time: f64, scheduled_tick_number: u64) -> (TickEvent, Instant) {
        let start = self.start_time.expect("timer not started");
        let now = self.advance();

        let mut tick_time = scheduled_tick_time;
        let mut tick_number = scheduled_tick_number;

        let skipped_ticks = ((now - tick_time) / self.tick_interval).floor();
        if skipped_ticks > 0.0 {
            tick_time += self.tick_interval * skipped_ticks;
            tick_number += skipped_ticks as u64;
        }

        let event = TickEvent { now, tick_number };

        let next_tick_time = tick_time + self.tick_interval;
        let next_deadline = start + std::time::Duration::from_secs_f64(next_tick_time / self.speed);

        (event, next_deadline)
    }

    pub fn shutdown(&self, now: f64, reason: &str) {
        info!(target: "timer", now, reason, "shutting down the match");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_zero_before_start() {
        let timer = Timer::new(0.25, 1.0);
        assert_eq!(timer.advance(), 0.0);
    }

    #[test]
    fn advance_scales_by_speed_factor() {
        let mut timer = Timer::new(0.25, 2.0);
        timer.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.advance() > 0.0);
    }

    #[test]
    fn resolve_tick_does_not_skip_when_on_schedule() {
        let mut timer = Timer::new(1.0, 1.0);
        timer.start();
        let (event, _) = timer.resolve_tick(0.0, 1);
        assert_eq!(event.tick_number, 1);
    }
}
