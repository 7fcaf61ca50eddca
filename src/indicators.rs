//! Technical indicators over plain `f64` slices.
//!
//! Windowed indicators return one value per input element and mark positions
//! before the window fills with `NaN`; the feature pipeline is responsible for
//! cleaning those.

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut sma_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return sma_values;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values[period - 1] = window_sum / period as f64;
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values[i] = window_sum / period as f64;
    }

    sma_values
}

/// Rolling sample standard deviation (n - 1 denominator).
pub fn calculate_rolling_std(prices: &[f64], period: usize) -> Vec<f64> {
    let mut std_values = vec![f64::NAN; prices.len()];
    if period < 2 || prices.len() < period {
        return std_values;
    }

    for (i, value) in std_values.iter_mut().enumerate().skip(period - 1) {
        *value = sample_std(&prices[i + 1 - period..=i]);
    }

    std_values
}

/// Sample standard deviation of the last `period` values, `None` while the
/// window is not full.
pub fn trailing_std(prices: &[f64], period: usize) -> Option<f64> {
    if period < 2 || prices.len() < period {
        return None;
    }
    let value = sample_std(&prices[prices.len() - period..]);
    value.is_finite().then_some(value)
}

fn sample_std(window: &[f64]) -> f64 {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n - 1.0);
    variance.max(0.0).sqrt()
}

/// Recursive EMA seeded with the first price (no bias adjustment).
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// EMA with a warm-up: `NaN` until `period` prices are seen, seeded with
/// their simple average, then the usual recursion.
pub fn calculate_sma_seeded_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut ema_values = vec![f64::NAN; prices.len()];
    if prices.len() < period {
        return ema_values;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    ema_values[period - 1] = ema;
    for i in period..prices.len() {
        ema = (prices[i] * multiplier) + (ema * (1.0 - multiplier));
        ema_values[i] = ema;
    }

    ema_values
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(macd, signal)| macd - signal)
        .collect();

    (macd_line, signal_line, histogram)
}

/// RSI from simple rolling means of gains and losses. A window with neither
/// gains nor losses yields `NaN`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut gains = vec![0.0; prices.len()];
    let mut losses = vec![0.0; prices.len()];
    for i in 1..prices.len() {
        let delta = prices[i] - prices[i - 1];
        if delta > 0.0 {
            gains[i] = delta;
        } else if delta < 0.0 {
            losses[i] = -delta;
        }
    }

    let avg_gains = calculate_sma(&gains, period);
    let avg_losses = calculate_sma(&losses, period);

    avg_gains
        .iter()
        .zip(avg_losses.iter())
        .map(|(&avg_gain, &avg_loss)| {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        })
        .collect()
}

/// Returns (upper, middle, lower).
pub fn calculate_bollinger_bands(
    prices: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = calculate_sma(prices, period);
    let deviation = calculate_rolling_std(prices, period);

    let upper = middle
        .iter()
        .zip(deviation.iter())
        .map(|(mean, sd)| mean + std_dev * sd)
        .collect();
    let lower = middle
        .iter()
        .zip(deviation.iter())
        .map(|(mean, sd)| mean - std_dev * sd)
        .collect();

    (upper, middle, lower)
}

fn rolling_extreme(values: &[f64], period: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for (i, slot) in out.iter_mut().enumerate().skip(period - 1) {
        *slot = values[i + 1 - period..=i]
            .iter()
            .copied()
            .reduce(pick)
            .unwrap_or(f64::NAN);
    }
    out
}

/// Stochastic %K: position of the close inside the rolling high/low range.
pub fn calculate_stochastic(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let highest = rolling_extreme(highs, period, f64::max);
    let lowest = rolling_extreme(lows, period, f64::min);

    (0..closes.len())
        .map(|i| 100.0 * (closes[i] - lowest[i]) / (highest[i] - lowest[i]))
        .collect()
}

pub fn calculate_williams_r(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
) -> Vec<f64> {
    let highest = rolling_extreme(highs, period, f64::max);
    let lowest = rolling_extreme(lows, period, f64::min);

    (0..closes.len())
        .map(|i| -100.0 * (highest[i] - closes[i]) / (highest[i] - lowest[i]))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParabolicSarOutput {
    pub value: f64,
    pub rising: bool,
    pub reversal: bool,
}

/// Wilder Parabolic SAR. The first bar's direction comes from close vs open
/// and its SAR is the first close. On a reversal the SAR jumps to the prior
/// extreme point, and the extreme point and acceleration factor reset.
pub fn calculate_parabolic_sar(
    opens: &[f64],
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    step: f64,
    max_acceleration: f64,
) -> Vec<ParabolicSarOutput> {
    if closes.is_empty() {
        return Vec::new();
    }

    let mut rising = closes[0] > opens[0];
    let mut ep = if rising { highs[0] } else { lows[0] };
    let mut af = step;
    let mut sar_prev = closes[0];

    let mut output = Vec::with_capacity(closes.len());
    output.push(ParabolicSarOutput {
        value: sar_prev,
        rising,
        reversal: false,
    });

    for idx in 1..closes.len() {
        let mut sar = sar_prev + af * (ep - sar_prev);
        let mut reversal = false;

        if rising {
            sar = sar.min(lows[idx - 1]);
            if idx > 1 {
                sar = sar.min(lows[idx - 2]);
            }
            if lows[idx] < sar {
                rising = false;
                reversal = true;
                sar = ep;
                ep = lows[idx];
                af = step;
            } else if highs[idx] > ep {
                ep = highs[idx];
                af = (af + step).min(max_acceleration);
            }
        } else {
            sar = sar.max(highs[idx - 1]);
            if idx > 1 {
                sar = sar.max(highs[idx - 2]);
            }
            if highs[idx] > sar {
                rising = true;
                reversal = true;
                sar = ep;
                ep = highs[idx];
                af = step;
            } else if lows[idx] < ep {
                ep = lows[idx];
                af = (af + step).min(max_acceleration);
            }
        }

        output.push(ParabolicSarOutput {
            value: sar,
            rising,
            reversal,
        });
        sar_prev = sar;
    }

    output
}

pub fn calculate_obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut obv_values = vec![0.0; closes.len()];
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            obv_values[i] = obv_values[i - 1] + volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv_values[i] = obv_values[i - 1] - volumes[i];
        } else {
            obv_values[i] = obv_values[i - 1];
        }
    }
    obv_values
}

/// VWAP anchored at the start of the series. `NaN` until some volume trades.
pub fn calculate_vwap(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut vwap_values = Vec::with_capacity(closes.len());
    let mut cumulative_pv = 0.0;
    let mut cumulative_volume = 0.0;

    for i in 0..closes.len() {
        let typical_price = (highs[i] + lows[i] + closes[i]) / 3.0;
        cumulative_pv += typical_price * volumes[i];
        cumulative_volume += volumes[i];
        vwap_values.push(cumulative_pv / cumulative_volume);
    }

    vwap_values
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
}

pub fn calculate_pivot_levels(high: f64, low: f64, close: f64) -> PivotLevels {
    let pivot = (high + low + close) / 3.0;
    PivotLevels {
        pivot,
        r1: 2.0 * pivot - low,
        s1: 2.0 * pivot - high,
    }
}
