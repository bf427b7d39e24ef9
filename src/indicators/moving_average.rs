/// One step of a Simple Moving Average over `input`
///
/// `prev` is the SMA at `i - 1` (if defined); when present the window sum is
/// slid by one value instead of re-summed.
pub fn sma_step(input: &[f64], period: usize, prev: Option<f64>, i: usize) -> Option<f64> {
    if period == 0 || i >= input.len() || i + 1 < period {
        return None;
    }

    if period == 1 {
        return Some(input[i]);
    }

    match prev {
        Some(prev) => Some(prev + (input[i] - input[i - period]) / period as f64),
        None => {
            let sum: f64 = input[i + 1 - period..=i].iter().sum();
            Some(sum / period as f64)
        }
    }
}

/// One step of an Exponential Moving Average over a possibly partially
/// defined `source` series
///
/// Seeded with the SMA of the first `period` defined values, then
/// `ema[i] = a * v[i] + (1 - a) * ema[i - 1]` with `a = 2 / (period + 1)`.
pub fn ema_step<F>(source: F, period: usize, prev: Option<f64>, i: usize) -> Option<f64>
where
    F: Fn(usize) -> Option<f64>,
{
    if period == 0 {
        return None;
    }
    let current = source(i)?;

    match prev {
        Some(prev) => {
            let alpha = 2.0 / (period as f64 + 1.0);
            Some(alpha * current + (1.0 - alpha) * prev)
        }
        None => {
            if i + 1 < period {
                return None;
            }
            let mut sum = 0.0;
            for j in i + 1 - period..=i {
                sum += source(j)?;
            }
            Some(sum / period as f64)
        }
    }
}
