use crate::models::Candle;

/// Calculate the volatility-breakout target price
///
/// Target = previous candle's close + k * (previous high - previous low).
/// The previous (second to last) candle is used so the still-forming latest
/// candle does not move the target.
pub fn calculate_breakout_target(candles: &[Candle], k: f64) -> Option<f64> {
    if candles.len() < 2 {
        return None;
    }

    let prev = &candles[candles.len() - 2];
    Some(prev.close + (prev.high - prev.low) * k)
}
