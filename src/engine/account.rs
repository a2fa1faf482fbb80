//! A competitor's running balance, position, and mark-to-market P&L.
//!
//! `tick_size`/`etf_clamp` are configured as floating-point fractions of a
//! dollar in the JSON config, then converted to integer cents so all
//! downstream arithmetic stays exact.

use crate::engine::types::{Instrument, Side};

#[derive(Debug, Clone)]
pub struct CompetitorAccount {
    pub account_balance: i64,
    pub buy_volume: u64,
    pub sell_volume: u64,
    pub etf_position: i64,
    pub future_position: i64,
    pub max_drawdown: i64,
    pub max_profit: i64,
    pub profit_or_loss: i64,
    pub total_fees: i64,
    etf_clamp: f64,
    tick_size: i64,
}

impl CompetitorAccount {
    pub fn new(tick_size: f64, etf_clamp: f64) -> Self {
        CompetitorAccount {
            account_balance: 0,
            buy_volume: 0,
            sell_volume: 0,
            etf_position: 0,
            future_position: 0,
            max_drawdown: 0,
            max_profit: 0,
            profit_or_loss: 0,
            total_fees: 0,
            etf_clamp,
            tick_size: (tick_size * 100.0) as i64,
        }
    }

    /// Apply a completed transaction (fill or hedge) to this account.
    pub fn transact(&mut self, instrument: Instrument, side: Side, price: f64, volume: u64, fee: i64) {
        let notional = (price * volume as f64).round() as i64;
        match side {
            Side::Sell => self.account_balance += notional,
            Side::Buy => self.account_balance -= notional,
        }

        self.account_balance -= fee;
        self.total_fees += fee;

        match instrument {
            Instrument::Future => match side {
                Side::Sell => self.future_position -= volume as i64,
                Side::Buy => self.future_position += volume as i64,
            },
            Instrument::Etf => match side {
                Side::Sell => {
                    self.sell_volume += volume;
                    self.etf_position -= volume as i64;
                }
                Side::Buy => {
                    self.buy_volume += volume;
                    self.etf_position += volume as i64;
                }
            },
        }
    }

    /// Recompute profit-or-loss (and high-water marks) from the latest
    /// future and ETF mark prices. The ETF mark is clamped to within
    /// `etf_clamp` of the future price, rounded down to the nearest tick,
    /// matching `CompetitorAccount.update`.
    pub fn update(&mut self, future_price: i64, etf_price: i64) {
        let mut delta = (self.etf_clamp * future_price as f64).round() as i64;
        if self.tick_size != 0 {
            delta -= delta.rem_euclid(self.tick_size);
        }
        let min_price = future_price - delta;
        let max_price = future_price + delta;
        let clamped = if etf_price < min_price {
            min_price
        } else if etf_price > max_price {
            max_price
        } else {
            etf_price
        };

        self.profit_or_loss =
            self.account_balance + self.future_position * future_price + self.etf_position * clamped;

        if self.profit_or_loss > self.max_profit {
            self.max_profit = self.profit_or_loss;
        }
        if self.max_profit - self.profit_or_loss > self.max_drawdown {
            self.max_drawdown = self.max_profit - self.profit_or_loss;
        }
    }
}

/// A factory for `CompetitorAccount`s, carrying the shared `etf_clamp`
/// and `tick_size` configuration values.
#[derive(Debug, Clone)]
pub struct AccountFactory {
    etf_clamp: f64,
    tick_size: f64,
}

impl AccountFactory {
    pub fn new(etf_clamp: f64, tick_size: f64) -> Self {
        AccountFactory { etf_clamp, tick_size }
    }

    pub fn create(&self) -> CompetitorAccount {
        CompetitorAccount::new(self.tick_size, self.etf_clamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_then_mark_to_market() {
        let mut account = CompetitorAccount::new(0.01, 0.002);
        account.transact(Instrument::Etf, Side::Buy, 100.0, 10, 2);
        assert_eq!(account.etf_position, 10);
        assert_eq!(account.account_balance, -1002);

        account.update(10_000, 10_000);
        assert_eq!(account.profit_or_loss, -1002 + 10 * 10_000);
        assert_eq!(account.max_profit, account.profit_or_loss);
        assert_eq!(account.max_drawdown, 0);
    }

    #[test]
    fn sell_reduces_position_and_credits_balance() {
        let mut account = CompetitorAccount::new(0.01, 0.002);
        account.transact(Instrument::Etf, Side::Sell, 100.0, 5, 1);
        assert_eq!(account.etf_position, -5);
        assert_eq!(account.sell_volume, 5);
        assert_eq!(account.account_balance, 499);
    }

    #[test]
    fn clamp_limits_etf_mark_distance_from_future() {
        let mut account = CompetitorAccount::new(0.01, 0.1);
        account.etf_position = 1;
        account.update(1_000, 5_000);
        assert!(account.profit_or_loss < 1 * 1_100);
    }
}
