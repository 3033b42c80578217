use serde::{Deserialize, Serialize};

/// Aggregate of every tracked grid settling in one quote asset
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PortfolioTotals {
    pub initial_value: f64,
    pub pnl: f64,
    pub positions: usize,
}

impl PortfolioTotals {
    pub(crate) fn add(&mut self, initial_value: f64, pnl: f64) {
        self.initial_value += initial_value;
        self.pnl += pnl;
        self.positions += 1;
    }

    pub(crate) fn subtract(&mut self, initial_value: f64, pnl: f64) {
        self.initial_value -= initial_value;
        self.pnl -= pnl;
        self.positions = self.positions.saturating_sub(1);
        if self.positions == 0 {
            // Clear float residue once the bucket is empty
            self.initial_value = 0.0;
            self.pnl = 0.0;
        }
    }

    pub fn roi(&self) -> f64 {
        if self.initial_value == 0.0 {
            0.0
        } else {
            self.pnl / self.initial_value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_subtract() {
        let mut totals = PortfolioTotals::default();
        totals.add(100.0, 5.0);
        totals.add(50.0, -2.0);
        assert_eq!(totals.positions, 2);
        assert!((totals.roi() - 0.02).abs() < 1e-12);

        totals.subtract(100.0, 5.0);
        assert_eq!(totals.positions, 1);
        assert_eq!(totals.initial_value, 50.0);

        totals.subtract(50.0, -2.0);
        assert_eq!(totals, PortfolioTotals::default());
    }

    #[test]
    fn test_empty_roi_is_zero() {
        assert_eq!(PortfolioTotals::default().roi(), 0.0);
    }
}
