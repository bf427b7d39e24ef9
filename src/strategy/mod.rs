// Strategy definitions and the open/close decision rules
pub mod signals;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BotError;
use crate::indicators::IndicatorType;
use crate::models::{BarType, Pair};
use crate::Result;

pub use signals::{should_close, should_open, OpenSignal, StrategyEvaluator};

/// One indicator reading: which moving average, its period, over which series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorParameter {
    pub kind: IndicatorType,
    pub period: usize,
    pub bar: BarType,
}

impl IndicatorParameter {
    pub fn new(kind: IndicatorType, period: usize, bar: BarType) -> Self {
        Self { kind, period, bar }
    }

    /// Candles needed before the first defined value
    pub fn lookback(&self) -> usize {
        self.kind.lookback(self.period)
    }
}

impl fmt::Display for IndicatorParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.kind, self.bar, self.period)
    }
}

/// Parse `T BAR N`, e.g. `1 C 10` for EMA(10) over closes
fn parse_indicator(entry: &str, text: &str) -> Result<IndicatorParameter> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let [kind, bar, period] = fields.as_slice() else {
        return Err(BotError::invalid_strategy(
            entry,
            format!("indicator `{}` must be `TYPE BAR PERIOD`", text.trim()),
        ));
    };

    let kind = kind
        .parse::<u8>()
        .ok()
        .and_then(IndicatorType::from_code)
        .ok_or_else(|| BotError::invalid_strategy(entry, format!("unknown indicator type `{}`", kind)))?;
    let bar: BarType = bar
        .parse()
        .map_err(|_| BotError::invalid_strategy(entry, format!("unknown bar type `{}`", bar)))?;
    let period = period
        .parse::<usize>()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| BotError::invalid_strategy(entry, format!("bad period `{}`", period)))?;

    Ok(IndicatorParameter::new(kind, period, bar))
}

/// A trading rule for one pair
///
/// Opens when `ind1 / ind2` is at least `open_bps` basis points above 1 and
/// closes when the price is at least `close_bps` basis points above entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub pair: Pair,
    pub open_bps: i64,
    pub close_bps: i64,
    pub ind1: IndicatorParameter,
    pub ind2: IndicatorParameter,
}

impl Strategy {
    /// Candles needed before both indicators are defined
    pub fn min_candles(&self) -> usize {
        self.ind1.lookback().max(self.ind2.lookback()) + 1
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} open>={}bps close>={}bps {} / {}",
            self.pair, self.open_bps, self.close_bps, self.ind1, self.ind2
        )
    }
}

/// Parse one entry body `PAIR OP CL|T BAR N|T BAR N` (braces optional)
impl FromStr for Strategy {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        let entry = s.trim().trim_start_matches('{').trim_end_matches('}');
        let parts: Vec<&str> = entry.split('|').collect();
        let [head, ind1, ind2] = parts.as_slice() else {
            return Err(BotError::invalid_strategy(
                s,
                "expected `PAIR OP CL|T BAR N|T BAR N`",
            ));
        };

        let head: Vec<&str> = head.split_whitespace().collect();
        let [pair, open_bps, close_bps] = head.as_slice() else {
            return Err(BotError::invalid_strategy(s, "head must be `PAIR OP CL`"));
        };

        let pair: Pair = pair
            .parse()
            .map_err(|_| BotError::invalid_strategy(s, format!("bad pair `{}`", pair)))?;
        let open_bps = open_bps
            .parse::<i64>()
            .map_err(|_| BotError::invalid_strategy(s, format!("bad open threshold `{}`", open_bps)))?;
        let close_bps = close_bps
            .parse::<i64>()
            .map_err(|_| BotError::invalid_strategy(s, format!("bad close threshold `{}`", close_bps)))?;

        Ok(Strategy {
            pair,
            open_bps,
            close_bps,
            ind1: parse_indicator(s, ind1)?,
            ind2: parse_indicator(s, ind2)?,
        })
    }
}

/// Parse a strategy list `{…}{…}…` in declaration order
///
/// Text outside braces other than whitespace is rejected, as is an empty list.
pub fn parse_strategies(input: &str) -> Result<Vec<Strategy>> {
    let mut strategies = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        if !rest.starts_with('{') {
            return Err(BotError::invalid_strategy(rest, "entries must be wrapped in `{}`"));
        }
        let Some(end) = rest.find('}') else {
            return Err(BotError::invalid_strategy(rest, "unterminated entry"));
        };

        strategies.push(rest[1..end].parse()?);
        rest = rest[end + 1..].trim_start();
    }

    if strategies.is_empty() {
        return Err(BotError::invalid_strategy(input, "no strategies configured"));
    }
    Ok(strategies)
}

/// Pairs of `strategies` without duplicates, first occurrence first
pub fn unique_pairs(strategies: &[Strategy]) -> Vec<Pair> {
    let mut pairs: Vec<Pair> = Vec::new();
    for strategy in strategies {
        if !pairs.contains(&strategy.pair) {
            pairs.push(strategy.pair.clone());
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_entry() {
        let strategy: Strategy = "{ETC_USDT 50 300|1 C 10|0 OC 20}".parse().unwrap();

        assert_eq!(strategy.pair, Pair::new("ETC", "USDT"));
        assert_eq!(strategy.open_bps, 50);
        assert_eq!(strategy.close_bps, 300);
        assert_eq!(
            strategy.ind1,
            IndicatorParameter::new(IndicatorType::Ema, 10, BarType::C)
        );
        assert_eq!(
            strategy.ind2,
            IndicatorParameter::new(IndicatorType::Sma, 20, BarType::OC)
        );
        // SMA(20) is first defined at index 19
        assert_eq!(strategy.min_candles(), 20);
    }

    #[test]
    fn test_min_candles_follows_slowest_indicator() {
        let strategy: Strategy = "{ETC_USDT 0 100|3 C 5|0 O 1}".parse().unwrap();
        // TEMA(5) needs three chained EMA(5) warmups
        assert_eq!(strategy.min_candles(), 13);

        let strategy: Strategy = "{ETC_USDT 0 100|0 C 1|0 O 1}".parse().unwrap();
        assert_eq!(strategy.min_candles(), 1);
    }

    #[test]
    fn test_parse_list_keeps_order() {
        let strategies =
            parse_strategies("{ALGO_USDT 0 100|0 C 1|0 O 1} {ETC_USDT -20 150|3 lch 5|4 C 7}\n")
                .unwrap();

        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[0].pair.to_string(), "ALGO_USDT");
        assert_eq!(strategies[1].open_bps, -20);
        assert_eq!(strategies[1].ind1.bar, BarType::LCH);
        assert_eq!(strategies[1].ind2.kind, IndicatorType::TemaZero);
    }

    #[test]
    fn test_malformed_entries_are_rejected() {
        let bad = [
            "",
            "ETC_USDT 0 100|0 C 1|0 O 1",
            "{ETC_USDT 0 100|0 C 1}",
            "{ETC_USDT x 100|0 C 1|0 O 1}",
            "{ETC_USDT 0 100|9 C 1|0 O 1}",
            "{ETC_USDT 0 100|0 Q 1|0 O 1}",
            "{ETC_USDT 0 100|0 C 0|0 O 1}",
            "{ETCUSDT 0 100|0 C 1|0 O 1}",
            "{ETC_USDT 0 100|0 C 1|0 O 1",
            "{ETC_USDT 0 100|0 C 1|0 O 1} junk",
        ];

        for input in bad {
            let result = parse_strategies(input);
            assert!(
                matches!(result, Err(BotError::InvalidStrategy { .. })),
                "accepted `{}`",
                input
            );
        }
    }

    #[test]
    fn test_unique_pairs_first_occurrence_wins() {
        let strategies = parse_strategies(
            "{ETC_USDT 0 100|0 C 1|0 O 1}{ALGO_USDT 0 100|0 C 1|0 O 1}{ETC_USDT 10 200|1 C 3|0 O 5}",
        )
        .unwrap();

        let pairs: Vec<String> = unique_pairs(&strategies).iter().map(|p| p.to_string()).collect();
        assert_eq!(pairs, vec!["ETC_USDT", "ALGO_USDT"]);
    }
}
