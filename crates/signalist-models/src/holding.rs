use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One lot from a brokerage holdings CSV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub ticker: String,
    pub quantity: Decimal,
    /// Total cost of the lot.
    pub cost_basis: Decimal,
    pub acquired_on: Option<NaiveDate>,
    /// File the row came from.
    pub source_file: String,
}

impl Holding {
    /// Cost per share, `None` for a zero-quantity lot.
    pub fn unit_cost(&self) -> Option<Decimal> {
        if self.quantity.is_zero() {
            None
        } else {
            Some(self.cost_basis / self.quantity)
        }
    }
}

/// Aggregate of every lot held for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub lots: usize,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
}

impl Position {
    /// Sum the lots for `ticker` (case-insensitive). Returns `None` when nothing is held.
    pub fn from_holdings(ticker: &str, holdings: &[Holding]) -> Option<Self> {
        let lots: Vec<&Holding> = holdings
            .iter()
            .filter(|h| h.ticker.eq_ignore_ascii_case(ticker))
            .collect();
        if lots.is_empty() {
            return None;
        }
        Some(Self {
            ticker: ticker.to_uppercase(),
            lots: lots.len(),
            quantity: lots.iter().map(|h| h.quantity).sum(),
            cost_basis: lots.iter().map(|h| h.cost_basis).sum(),
        })
    }

    pub fn average_cost(&self) -> Option<Decimal> {
        if self.quantity.is_zero() {
            None
        } else {
            Some((self.cost_basis / self.quantity).round_dp(4))
        }
    }
}
