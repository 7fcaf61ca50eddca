use crate::error::ForecastError;
use crate::indicators;
use crate::models::{FeatureRow, PricePoint};

pub const MA_FAST_PERIOD: usize = 10;
pub const MA_SLOW_PERIOD: usize = 50;
pub const VOLATILITY_PERIOD: usize = 10;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST_PERIOD: usize = 12;
pub const MACD_SLOW_PERIOD: usize = 26;
pub const MACD_SIGNAL_PERIOD: usize = 9;
pub const STOCHASTIC_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD: f64 = 2.0;
pub const PSAR_STEP: f64 = 0.02;
pub const PSAR_MAX_ACCELERATION: f64 = 0.2;

const DERIVED_COLUMN_COUNT: usize = 20;

/// Turns an ordered OHLCV series into its feature table.
///
/// Pure and deterministic: every row depends only on the prefix of the
/// series ending at that row, apart from the terminal fill pass which
/// forward-fills, then backward-fills, then zero-fills undefined values.
pub fn transform(series: &[PricePoint]) -> Result<Vec<FeatureRow>, ForecastError> {
    if series.is_empty() {
        return Err(ForecastError::InsufficientData(
            "cannot derive features from an empty price series".to_string(),
        ));
    }

    let opens: Vec<f64> = series.iter().map(|p| p.open).collect();
    let highs: Vec<f64> = series.iter().map(|p| p.high).collect();
    let lows: Vec<f64> = series.iter().map(|p| p.low).collect();
    let closes: Vec<f64> = series.iter().map(|p| p.close).collect();
    let volumes: Vec<f64> = series.iter().map(|p| p.volume).collect();

    let (macd, macd_signal, macd_hist) = indicators::calculate_macd(
        &closes,
        MACD_FAST_PERIOD,
        MACD_SLOW_PERIOD,
        MACD_SIGNAL_PERIOD,
    );
    let (bb_upper, bb_middle, bb_lower) =
        indicators::calculate_bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD);
    let parabolic_sar: Vec<f64> = indicators::calculate_parabolic_sar(
        &opens,
        &highs,
        &lows,
        &closes,
        PSAR_STEP,
        PSAR_MAX_ACCELERATION,
    )
    .into_iter()
    .map(|point| point.value)
    .collect();
    let pivots: Vec<indicators::PivotLevels> = series
        .iter()
        .map(|p| indicators::calculate_pivot_levels(p.high, p.low, p.close))
        .collect();

    let mut columns: [Vec<f64>; DERIVED_COLUMN_COUNT] = [
        indicators::calculate_sma(&closes, MA_FAST_PERIOD),
        indicators::calculate_sma(&closes, MA_SLOW_PERIOD),
        indicators::calculate_rolling_std(&closes, VOLATILITY_PERIOD),
        indicators::calculate_rsi(&closes, RSI_PERIOD),
        macd,
        macd_signal,
        macd_hist,
        indicators::calculate_stochastic(&highs, &lows, &closes, STOCHASTIC_PERIOD),
        indicators::calculate_williams_r(&highs, &lows, &closes, STOCHASTIC_PERIOD),
        bb_lower,
        bb_middle,
        bb_upper,
        indicators::calculate_sma_seeded_ema(&closes, MA_FAST_PERIOD),
        indicators::calculate_sma_seeded_ema(&closes, MA_SLOW_PERIOD),
        parabolic_sar,
        indicators::calculate_obv(&closes, &volumes),
        indicators::calculate_vwap(&highs, &lows, &closes, &volumes),
        pivots.iter().map(|levels| levels.pivot).collect(),
        pivots.iter().map(|levels| levels.r1).collect(),
        pivots.iter().map(|levels| levels.s1).collect(),
    ];

    for column in columns.iter_mut() {
        fill_missing(column);
    }

    let rows = series
        .iter()
        .enumerate()
        .map(|(i, price)| FeatureRow {
            price: *price,
            ma_10: columns[0][i],
            ma_50: columns[1][i],
            volatility: columns[2][i],
            rsi: columns[3][i],
            macd: columns[4][i],
            macd_signal: columns[5][i],
            macd_hist: columns[6][i],
            stochastic: columns[7][i],
            williams_r: columns[8][i],
            bb_lower: columns[9][i],
            bb_middle: columns[10][i],
            bb_upper: columns[11][i],
            ema_10: columns[12][i],
            ema_50: columns[13][i],
            parabolic_sar: columns[14][i],
            obv: columns[15][i],
            vwap: columns[16][i],
            pivot: columns[17][i],
            r1: columns[18][i],
            s1: columns[19][i],
        })
        .collect();

    Ok(rows)
}

/// Forward fill, then backward fill, then replace what is still missing
/// with 0. Downstream feature alignment depends on this order.
pub fn fill_missing(values: &mut [f64]) {
    let mut last = None;
    for value in values.iter_mut() {
        if value.is_nan() {
            if let Some(previous) = last {
                *value = previous;
            }
        } else {
            last = Some(*value);
        }
    }

    let mut next = None;
    for value in values.iter_mut().rev() {
        if value.is_nan() {
            if let Some(following) = next {
                *value = following;
            }
        } else {
            next = Some(*value);
        }
    }

    for value in values.iter_mut() {
        if value.is_nan() {
            *value = 0.0;
        }
    }
}
