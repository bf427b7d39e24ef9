use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::moving_average::{ema_step, sma_step};
use crate::error::BotError;
use crate::models::BarType;

/// Moving-average family selectable in a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Sma,
    Ema,
    Dema,
    Tema,
    /// TEMA shifted so its first defined value is 0
    TemaZero,
}

impl IndicatorType {
    /// Numeric code used in the strategy list
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(IndicatorType::Sma),
            1 => Some(IndicatorType::Ema),
            2 => Some(IndicatorType::Dema),
            3 => Some(IndicatorType::Tema),
            4 => Some(IndicatorType::TemaZero),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            IndicatorType::Sma => 0,
            IndicatorType::Ema => 1,
            IndicatorType::Dema => 2,
            IndicatorType::Tema => 3,
            IndicatorType::TemaZero => 4,
        }
    }

    /// First index at which the indicator is defined for `period`
    pub fn lookback(self, period: usize) -> usize {
        let lag = period.saturating_sub(1);
        match self {
            IndicatorType::Sma | IndicatorType::Ema => lag,
            IndicatorType::Dema => 2 * lag,
            IndicatorType::Tema | IndicatorType::TemaZero => 3 * lag,
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndicatorType::Sma => "SMA",
            IndicatorType::Ema => "EMA",
            IndicatorType::Dema => "DEMA",
            IndicatorType::Tema => "TEMA",
            IndicatorType::TemaZero => "TEMA0",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for IndicatorType {
    type Error = BotError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        IndicatorType::from_code(code)
            .ok_or_else(|| BotError::invalid_strategy(&code.to_string(), "unknown indicator type"))
    }
}

/// Series cached by the engine; the EMA stages are shared between the
/// DEMA/TEMA families of the same period and bar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stage {
    Sma,
    Ema,
    Ema2,
    Ema3,
    Dema,
    Tema,
    TemaZero,
}

impl Stage {
    fn dependencies(self) -> &'static [Stage] {
        match self {
            Stage::Sma | Stage::Ema => &[],
            Stage::Ema2 => &[Stage::Ema],
            Stage::Ema3 => &[Stage::Ema2],
            Stage::Dema => &[Stage::Ema, Stage::Ema2],
            Stage::Tema => &[Stage::Ema, Stage::Ema2, Stage::Ema3],
            Stage::TemaZero => &[Stage::Tema],
        }
    }
}

impl From<IndicatorType> for Stage {
    fn from(kind: IndicatorType) -> Self {
        match kind {
            IndicatorType::Sma => Stage::Sma,
            IndicatorType::Ema => Stage::Ema,
            IndicatorType::Dema => Stage::Dema,
            IndicatorType::Tema => Stage::Tema,
            IndicatorType::TemaZero => Stage::TemaZero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    stage: Stage,
    period: usize,
    bar: BarType,
}

impl CacheKey {
    fn with_stage(self, stage: Stage) -> Self {
        Self { stage, ..self }
    }
}

/// Incremental indicator cache for one candle series
///
/// Every cached series is a prefix of the full indicator series: it only
/// grows at the end, and `truncate` is the only way to shorten it (used when
/// the last, still-forming bucket is rewritten).
#[derive(Debug, Clone, Default)]
pub struct IndicatorCache {
    series: HashMap<CacheKey, Vec<Option<f64>>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indicator value at `index` over `input` (the `bar` series), or `None`
    /// while the lookback is not yet satisfied
    pub fn value(
        &mut self,
        kind: IndicatorType,
        period: usize,
        bar: BarType,
        input: &[f64],
        index: usize,
    ) -> Option<f64> {
        if period == 0 || index >= input.len() {
            return None;
        }
        let key = CacheKey {
            stage: kind.into(),
            period,
            bar,
        };
        self.fill(key, input, index)
    }

    /// Drop cached values at positions `len..`
    pub fn truncate(&mut self, len: usize) {
        for values in self.series.values_mut() {
            values.truncate(len);
        }
    }

    /// Longest cached series length (0 when empty)
    pub fn cached_len(&self) -> usize {
        self.series.values().map(Vec::len).max().unwrap_or(0)
    }

    fn fill(&mut self, key: CacheKey, input: &[f64], index: usize) -> Option<f64> {
        for dependency in key.stage.dependencies() {
            self.fill(key.with_stage(*dependency), input, index);
        }

        let mut values = self.series.remove(&key).unwrap_or_default();
        for i in values.len()..=index {
            let prev = i.checked_sub(1).and_then(|p| values[p]);
            let value = self.compute(key, input, prev, i);
            values.push(value);
        }
        let value = values[index];
        self.series.insert(key, values);
        value
    }

    /// Dependencies of `key` are already filled up to at least `i`.
    fn compute(&self, key: CacheKey, input: &[f64], prev: Option<f64>, i: usize) -> Option<f64> {
        match key.stage {
            Stage::Sma => sma_step(input, key.period, prev, i),
            Stage::Ema => ema_step(|j| input.get(j).copied(), key.period, prev, i),
            Stage::Ema2 => {
                let ema = self.cached(key.with_stage(Stage::Ema));
                ema_step(|j| ema[j], key.period, prev, i)
            }
            Stage::Ema3 => {
                let ema2 = self.cached(key.with_stage(Stage::Ema2));
                ema_step(|j| ema2[j], key.period, prev, i)
            }
            Stage::Dema => {
                let ema = self.cached(key.with_stage(Stage::Ema))[i]?;
                let ema2 = self.cached(key.with_stage(Stage::Ema2))[i]?;
                Some(2.0 * ema - ema2)
            }
            Stage::Tema => {
                let ema = self.cached(key.with_stage(Stage::Ema))[i]?;
                let ema2 = self.cached(key.with_stage(Stage::Ema2))[i]?;
                let ema3 = self.cached(key.with_stage(Stage::Ema3))[i]?;
                Some(3.0 * ema - 3.0 * ema2 + ema3)
            }
            Stage::TemaZero => {
                let tema = self.cached(key.with_stage(Stage::Tema));
                let current = tema[i]?;
                let anchor = tema.iter().flatten().next()?;
                Some(current - anchor)
            }
        }
    }

    fn cached(&self, key: CacheKey) -> &[Option<f64>] {
        self.series.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64).collect()
    }

    /// Full-history EMA recomputation for cross-checking the cache
    fn reference_ema(source: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
        let mut out: Vec<Option<f64>> = Vec::new();
        for i in 0..source.len() {
            let prev = if i == 0 { None } else { out[i - 1] };
            out.push(ema_step(|j| source[j], period, prev, i));
        }
        out
    }

    #[test]
    fn test_sma_value() {
        let mut cache = IndicatorCache::new();
        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(cache.value(IndicatorType::Sma, 3, BarType::C, &input, 4), Some(4.0));
        assert_eq!(cache.value(IndicatorType::Sma, 3, BarType::C, &input, 1), None);
    }

    #[test]
    fn test_ema_period_one_equals_input() {
        let mut cache = IndicatorCache::new();
        let input = ramp(40);
        for i in 0..input.len() {
            assert_eq!(
                cache.value(IndicatorType::Ema, 1, BarType::C, &input, i),
                Some(input[i])
            );
        }
    }

    #[test]
    fn test_index_out_of_range_is_undefined() {
        let mut cache = IndicatorCache::new();
        let input = vec![1.0, 2.0];
        assert_eq!(cache.value(IndicatorType::Ema, 1, BarType::C, &input, 2), None);
        assert_eq!(cache.value(IndicatorType::Sma, 0, BarType::C, &input, 1), None);
    }

    #[test]
    fn test_dema_and_tema_match_reference() {
        let input = ramp(60);
        let period = 4;
        let source: Vec<Option<f64>> = input.iter().copied().map(Some).collect();
        let ema = reference_ema(&source, period);
        let ema2 = reference_ema(&ema, period);
        let ema3 = reference_ema(&ema2, period);

        let mut cache = IndicatorCache::new();
        for i in 0..input.len() {
            let dema = cache.value(IndicatorType::Dema, period, BarType::C, &input, i);
            let tema = cache.value(IndicatorType::Tema, period, BarType::C, &input, i);

            let expected_dema = match (ema[i], ema2[i]) {
                (Some(e1), Some(e2)) => Some(2.0 * e1 - e2),
                _ => None,
            };
            let expected_tema = match (ema[i], ema2[i], ema3[i]) {
                (Some(e1), Some(e2), Some(e3)) => Some(3.0 * e1 - 3.0 * e2 + e3),
                _ => None,
            };

            assert_eq!(dema.is_some(), expected_dema.is_some(), "dema defined at {i}");
            assert_eq!(tema.is_some(), expected_tema.is_some(), "tema defined at {i}");
            if let (Some(a), Some(b)) = (dema, expected_dema) {
                assert!((a - b).abs() < 1e-9);
            }
            if let (Some(a), Some(b)) = (tema, expected_tema) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_lookback_boundaries() {
        let input = ramp(30);
        let period = 5;
        let mut cache = IndicatorCache::new();

        for kind in [
            IndicatorType::Sma,
            IndicatorType::Ema,
            IndicatorType::Dema,
            IndicatorType::Tema,
            IndicatorType::TemaZero,
        ] {
            let first = kind.lookback(period);
            assert_eq!(cache.value(kind, period, BarType::C, &input, first - 1), None, "{kind}");
            assert!(cache.value(kind, period, BarType::C, &input, first).is_some(), "{kind}");
        }
    }

    #[test]
    fn test_tema_zero_starts_at_zero() {
        let input = ramp(30);
        let period = 3;
        let mut cache = IndicatorCache::new();
        let first = IndicatorType::TemaZero.lookback(period);

        assert_eq!(
            cache.value(IndicatorType::TemaZero, period, BarType::C, &input, first),
            Some(0.0)
        );

        let tema_first = cache.value(IndicatorType::Tema, period, BarType::C, &input, first).unwrap();
        let tema_later = cache.value(IndicatorType::Tema, period, BarType::C, &input, 20).unwrap();
        let zero_later = cache.value(IndicatorType::TemaZero, period, BarType::C, &input, 20).unwrap();
        assert!((zero_later - (tema_later - tema_first)).abs() < 1e-9);
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let input = ramp(50);
        let mut incremental = IndicatorCache::new();
        for i in 0..input.len() {
            incremental.value(IndicatorType::Tema, 6, BarType::C, &input[..=i], i);
        }

        let mut full = IndicatorCache::new();
        let last = input.len() - 1;
        assert_eq!(
            incremental.value(IndicatorType::Tema, 6, BarType::C, &input, last),
            full.value(IndicatorType::Tema, 6, BarType::C, &input, last)
        );
    }

    #[test]
    fn test_truncate_recomputes_tail() {
        let mut input = vec![1.0, 2.0, 3.0, 4.0];
        let mut cache = IndicatorCache::new();
        assert_eq!(cache.value(IndicatorType::Sma, 2, BarType::C, &input, 3), Some(3.5));

        input[3] = 6.0;
        cache.truncate(3);
        assert_eq!(cache.cached_len(), 3);
        assert_eq!(cache.value(IndicatorType::Sma, 2, BarType::C, &input, 3), Some(4.5));
    }

    #[test]
    fn test_type_codes_round_trip() {
        for code in 0..5u8 {
            let kind = IndicatorType::try_from(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(IndicatorType::try_from(9).is_err());
    }
}
