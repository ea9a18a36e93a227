// Technical indicators over candle windows.
// All functions are pure; they return None when the window is too short
// for the requested period rather than extrapolating.

use common::Candle;

/// Simple moving average of the last `period` closes.
pub fn sma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let sum: f64 = candles[candles.len() - period..].iter().map(|c| c.close).sum();
    Some(sum / period as f64)
}

/// Simple moving average of the last `period` volumes.
pub fn volume_sma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let sum: f64 = candles[candles.len() - period..].iter().map(|c| c.volume).sum();
    Some(sum / period as f64)
}

/// Exponential moving average over the full close series.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut value: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    for close in &closes[period..] {
        value = close * k + value * (1.0 - k);
    }
    Some(value)
}

/// Wilder-smoothed RSI over the last `period` price changes.
pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in closes[..period + 1].windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for w in closes[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line, signal line and histogram (12/26/9).
pub fn macd(candles: &[Candle]) -> Option<(f64, f64, f64)> {
    const FAST: usize = 12;
    const SLOW: usize = 26;
    const SIGNAL: usize = 9;

    if candles.len() < SLOW + SIGNAL {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    // Build the MACD series over the window tail so the signal EMA has
    // real history to smooth over.
    let mut macd_series = Vec::new();
    for end in SLOW..=closes.len() {
        let fast = ema(&closes[..end], FAST)?;
        let slow = ema(&closes[..end], SLOW)?;
        macd_series.push(fast - slow);
    }

    let line = *macd_series.last()?;
    let signal = ema(&macd_series, SIGNAL)?;
    Some((line, signal, line - signal))
}

/// Bollinger bands (period, k standard deviations): (upper, middle, lower).
pub fn bollinger(candles: &[Candle], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let tail = &candles[candles.len() - period..];
    let mean: f64 = tail.iter().map(|c| c.close).sum::<f64>() / period as f64;
    let variance: f64 =
        tail.iter().map(|c| (c.close - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();
    Some((mean + k * std_dev, mean, mean - k * std_dev))
}

/// Average True Range over the last `period` candles. Needs period + 1
/// candles because true range references the previous close.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let tail = &candles[candles.len() - period - 1..];
    let mut sum = 0.0;
    for w in tail.windows(2) {
        let prev_close = w[0].close;
        let c = &w[1];
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}

/// Percent price change over the last `lag` candles.
pub fn momentum_pct(candles: &[Candle], lag: usize) -> Option<f64> {
    if lag == 0 || candles.len() < lag + 1 {
        return None;
    }
    let last = candles[candles.len() - 1].close;
    let base = candles[candles.len() - 1 - lag].close;
    if base == 0.0 {
        return None;
    }
    Some((last - base) / base * 100.0)
}

/// One-lag return series of the closes, as fractions.
pub fn returns(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect()
}

/// Pearson correlation between the trailing `window` returns of two close
/// series. None when either series is too short or has zero variance.
pub fn return_correlation(a: &[Candle], b: &[Candle], window: usize) -> Option<f64> {
    let ra = returns(a);
    let rb = returns(b);
    if ra.len() < window || rb.len() < window {
        return None;
    }
    let xa = &ra[ra.len() - window..];
    let xb = &rb[rb.len() - window..];

    let mean_a: f64 = xa.iter().sum::<f64>() / window as f64;
    let mean_b: f64 = xb.iter().sum::<f64>() / window as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..window {
        let da = xa[i] - mean_a;
        let db = xb[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Piecewise-linear curve over explicit (breakpoint, value) pairs.
///
/// Inputs below the first breakpoint clamp to the first value, above the
/// last to the last value; between breakpoints the value is interpolated.
/// Keeps tier boundaries auditable independent of the callers (trend
/// momentum points, position-weight tiers).
#[derive(Debug, Clone)]
pub struct PiecewiseLinear {
    points: Vec<(f64, f64)>,
}

impl PiecewiseLinear {
    /// `points` must be sorted by breakpoint and non-empty.
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        debug_assert!(!points.is_empty());
        debug_assert!(points.windows(2).all(|w| w[0].0 <= w[1].0));
        Self { points }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }
        for w in self.points.windows(2) {
            let (x0, y0) = w[0];
            let (x1, y1) = w[1];
            if x <= x1 {
                if x1 == x0 {
                    return y1;
                }
                let t = (x - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_sma_basic() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(sma(&candles, 5), Some(3.0));
        assert_eq!(sma(&candles, 2), Some(4.5));
        assert_eq!(sma(&candles, 6), None);
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let candles = candles_from_closes(&closes);
        let value = rsi(&candles, 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_flat_is_balanced() {
        // Alternating equal gains and losses converge toward 50.
        let closes: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let candles = candles_from_closes(&closes);
        let value = rsi(&candles, 14).unwrap();
        assert!(value > 30.0 && value < 70.0, "rsi was {}", value);
    }

    #[test]
    fn test_macd_sign_tracks_trend() {
        let rising: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let (line, _, _) = macd(&candles_from_closes(&rising)).unwrap();
        assert!(line > 0.0);

        let falling: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let (line, _, _) = macd(&candles_from_closes(&falling)).unwrap();
        assert!(line < 0.0);

        assert!(macd(&candles_from_closes(&[1.0; 10])).is_none());
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let candles = candles_from_closes(&[50.0; 25]);
        let (upper, middle, lower) = bollinger(&candles, 20, 2.0).unwrap();
        assert_eq!(middle, 50.0);
        assert_eq!(upper, 50.0);
        assert_eq!(lower, 50.0);
    }

    #[test]
    fn test_atr_constant_range() {
        // Every candle spans 2% of a constant price, so TR is constant.
        let candles = candles_from_closes(&[100.0; 20]);
        let value = atr(&candles, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9, "atr was {}", value);
        assert!(atr(&candles[..14], 14).is_none());
    }

    #[test]
    fn test_momentum_pct() {
        let candles = candles_from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0, 110.0]);
        let m = momentum_pct(&candles, 5).unwrap();
        assert!((m - 10.0).abs() < 1e-9);
        assert!(momentum_pct(&candles, 6).is_none());
    }

    #[test]
    fn test_correlation_sign() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let down: Vec<f64> = (0..30).map(|i| 100.0 * 0.99f64.powi(i)).collect();
        let a = candles_from_closes(&up);
        let b = candles_from_closes(&down);

        let self_corr = return_correlation(&a, &a, 24).unwrap();
        assert!((self_corr - 1.0).abs() < 1e-6);

        let anti = return_correlation(&a, &b, 24).unwrap();
        assert!((anti + 1.0).abs() < 1e-6);

        assert!(return_correlation(&a[..10], &b, 24).is_none());
    }

    #[test]
    fn test_piecewise_linear_clamps_and_interpolates() {
        let curve = PiecewiseLinear::new(vec![(0.0, 0.0), (10.0, 30.0)]);
        assert_eq!(curve.eval(-5.0), 0.0);
        assert_eq!(curve.eval(0.0), 0.0);
        assert_eq!(curve.eval(5.0), 15.0);
        assert_eq!(curve.eval(10.0), 30.0);
        assert_eq!(curve.eval(42.0), 30.0);
    }

    #[test]
    fn test_piecewise_linear_is_monotone() {
        let curve = PiecewiseLinear::new(vec![(0.0, 0.1), (70.0, 0.3), (85.0, 0.6), (100.0, 1.0)]);
        let mut prev = f64::MIN;
        for i in 0..=200 {
            let y = curve.eval(i as f64 * 0.5);
            assert!(y >= prev);
            prev = y;
        }
    }
}
