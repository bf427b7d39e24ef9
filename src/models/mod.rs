use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BotError;

/// Tradable symbol, e.g. `ETC_USDT` (base `ETC`, quote `USDT`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('_') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('_') => {
                Ok(Pair::new(base, quote))
            }
            _ => Err(BotError::invalid_strategy(s, "pair must look like BASE_QUOTE")),
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = BotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.to_string()
    }
}

/// Bucket width of a candle series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Min1,
    Min5,
    Min15,
    Min30,
    Min45,
    #[default]
    Hour,
    Hour2,
    Hour3,
    Hour4,
    Day,
}

impl Resolution {
    pub fn seconds(self) -> i64 {
        match self {
            Resolution::Min1 => 60,
            Resolution::Min5 => 300,
            Resolution::Min15 => 900,
            Resolution::Min30 => 1_800,
            Resolution::Min45 => 2_700,
            Resolution::Hour => 3_600,
            Resolution::Hour2 => 7_200,
            Resolution::Hour3 => 10_800,
            Resolution::Hour4 => 14_400,
            Resolution::Day => 86_400,
        }
    }

    /// Code the exchange expects in `candles_history`
    pub fn api_code(self) -> &'static str {
        match self {
            Resolution::Min1 => "1",
            Resolution::Min5 => "5",
            Resolution::Min15 => "15",
            Resolution::Min30 => "30",
            Resolution::Min45 => "45",
            Resolution::Hour => "60",
            Resolution::Hour2 => "120",
            Resolution::Hour3 => "180",
            Resolution::Hour4 => "240",
            Resolution::Day => "D",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Resolution::Min1 => "min1",
            Resolution::Min5 => "min5",
            Resolution::Min15 => "min15",
            Resolution::Min30 => "min30",
            Resolution::Min45 => "min45",
            Resolution::Hour => "hour",
            Resolution::Hour2 => "hour2",
            Resolution::Hour3 => "hour3",
            Resolution::Hour4 => "hour4",
            Resolution::Day => "day",
        }
    }

    /// Start of the bucket containing `unix_secs`
    pub fn bucket_start(self, unix_secs: i64) -> i64 {
        unix_secs - unix_secs.rem_euclid(self.seconds())
    }

    /// Start of the bucket `offset` buckets away from the one containing `now`
    pub fn bucket_at(self, now: DateTime<Utc>, offset: i64) -> i64 {
        self.bucket_start(now.timestamp()) + offset * self.seconds()
    }
}

/// Named derived series over candles used as indicator input
///
/// Single letters are the raw prices, longer tags are the arithmetic mean of
/// the named prices (`OC` = (open + close) / 2, `LCH` = (low + close + high) / 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BarType {
    L,
    O,
    C,
    H,
    LO,
    LC,
    LH,
    OC,
    OH,
    CH,
    LOC,
    LOH,
    LCH,
    OCH,
}

impl BarType {
    pub const ALL: [BarType; 14] = [
        BarType::L,
        BarType::O,
        BarType::C,
        BarType::H,
        BarType::LO,
        BarType::LC,
        BarType::LH,
        BarType::OC,
        BarType::OH,
        BarType::CH,
        BarType::LOC,
        BarType::LOH,
        BarType::LCH,
        BarType::OCH,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            BarType::L => "L",
            BarType::O => "O",
            BarType::C => "C",
            BarType::H => "H",
            BarType::LO => "LO",
            BarType::LC => "LC",
            BarType::LH => "LH",
            BarType::OC => "OC",
            BarType::OH => "OH",
            BarType::CH => "CH",
            BarType::LOC => "LOC",
            BarType::LOH => "LOH",
            BarType::LCH => "LCH",
            BarType::OCH => "OCH",
        }
    }
}

impl fmt::Display for BarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BarType {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        BarType::ALL
            .into_iter()
            .find(|bar| bar.tag() == wanted)
            .ok_or_else(|| BotError::invalid_strategy(s, "unknown bar type"))
    }
}

impl TryFrom<String> for BarType {
    type Error = BotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BarType> for String {
    fn from(bar: BarType) -> Self {
        bar.tag().to_string()
    }
}

/// OHLC summary of one time bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(unix_secs: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time: Utc
                .timestamp_opt(unix_secs, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            open,
            high,
            low,
            close,
        }
    }

    /// Value of this candle in the given bar-type series
    pub fn bar(&self, bar: BarType) -> f64 {
        let (l, o, c, h) = (self.low, self.open, self.close, self.high);
        match bar {
            BarType::L => l,
            BarType::O => o,
            BarType::C => c,
            BarType::H => h,
            BarType::LO => (l + o) * 0.5,
            BarType::LC => (l + c) * 0.5,
            BarType::LH => (l + h) * 0.5,
            BarType::OC => (o + c) * 0.5,
            BarType::OH => (o + h) * 0.5,
            BarType::CH => (c + h) * 0.5,
            BarType::LOC => (l + o + c) / 3.0,
            BarType::LOH => (l + o + h) / 3.0,
            BarType::LCH => (l + c + h) / 3.0,
            BarType::OCH => (o + c + h) / 3.0,
        }
    }

    /// Same candle with its timestamp floored to the bucket start
    pub fn aligned(mut self, resolution: Resolution) -> Self {
        let start = resolution.bucket_start(self.time.timestamp());
        if let Some(time) = Utc.timestamp_opt(start, 0).single() {
            self.time = time;
        }
        self
    }
}
