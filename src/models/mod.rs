use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trade direction of a grid or strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            "NEUTRAL" => Ok(Direction::Neutral),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Stablecoin bucket a symbol settles in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteAsset {
    Usdt,
    Usdc,
}

impl QuoteAsset {
    pub fn from_symbol(symbol: &str) -> Self {
        if symbol.to_ascii_uppercase().ends_with("USDC") {
            QuoteAsset::Usdc
        } else {
            QuoteAsset::Usdt
        }
    }
}

/// Open grid position as reported by the exchange
///
/// Numeric fields stay as the exchange's decimal strings; they are parsed with
/// [`parse_decimal`] when the grid is observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridSnapshot {
    pub position_id: i64,
    pub strategy_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub leverage: u32,
    pub realized_profit: String,
    pub funding_fee: String,
    pub position_size: String, // signed, negative for short exposure
    pub entry_price: String,
    pub lower_price: String,
    pub upper_price: String,
    pub initial_value: String, // raw initial margin, not yet divided by leverage
}

/// Candidate strategy from the public strategy listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategySnapshot {
    pub strategy_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub copy_count: u32,
    pub roi: String,
    pub pnl: String,
    pub running_time: i64, // seconds
    pub matched_count: u32,
    pub last_day_matched_count: u32,
    #[serde(default)]
    pub params: GridParams,
}

/// Grid parameters a strategy was configured with
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GridParams {
    pub lower_price: String,
    pub upper_price: String,
    pub grid_count: u32,
    pub trailing_up: bool,
    pub trailing_down: bool,
    pub trigger_price: Option<String>,
    pub stop_lower_limit: Option<String>,
    pub stop_upper_limit: Option<String>,
}

/// A strategy that has run to completion, used for win/loss scoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcludedTrade {
    pub strategy_id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub start_price: f64,
    pub end_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub roi: f64,
}

/// Parse an exchange decimal string
///
/// A malformed or non-finite value is logged and read as zero so one bad record
/// does not stop the rest of the tick.
pub fn parse_decimal(field: &str, raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            let err = crate::EngineError::MalformedSnapshot {
                field: field.to_string(),
                value: raw.to_string(),
            };
            tracing::warn!("{}, reading as 0", err);
            0.0
        }
    }
}

/// Like [`parse_decimal`] but for optional fields; empty strings read as `None`
pub fn parse_optional_decimal(field: &str, raw: Option<&str>) -> Option<f64> {
    match raw {
        Some(value) if !value.trim().is_empty() => Some(parse_decimal(field, value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("long".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("SHORT".parse::<Direction>().unwrap(), Direction::Short);
        assert_eq!("Neutral".parse::<Direction>().unwrap(), Direction::Neutral);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_serializes_uppercase() {
        let json = serde_json::to_string(&Direction::Neutral).unwrap();
        assert_eq!(json, "\"NEUTRAL\"");
    }

    #[test]
    fn test_quote_asset_from_symbol() {
        assert_eq!(QuoteAsset::from_symbol("BTCUSDT"), QuoteAsset::Usdt);
        assert_eq!(QuoteAsset::from_symbol("ETHUSDC"), QuoteAsset::Usdc);
        assert_eq!(QuoteAsset::from_symbol("solusdc"), QuoteAsset::Usdc);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("roi", "0.125"), 0.125);
        assert_eq!(parse_decimal("roi", " -3.5 "), -3.5);
        assert_eq!(parse_decimal("roi", "abc"), 0.0);
        assert_eq!(parse_decimal("roi", "NaN"), 0.0);
        assert_eq!(parse_decimal("roi", ""), 0.0);
    }

    #[test]
    fn test_parse_optional_decimal() {
        assert_eq!(parse_optional_decimal("trigger", None), None);
        assert_eq!(parse_optional_decimal("trigger", Some("")), None);
        assert_eq!(parse_optional_decimal("trigger", Some("12.5")), Some(12.5));
    }
}
