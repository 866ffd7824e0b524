use serde::{Deserialize, Serialize};

/// Momentum inputs derived from recent closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentumReading {
    pub rsi: Option<f64>,
    /// Rate of change over the lookback, in percent
    pub roc_pct: Option<f64>,
}

impl MomentumReading {
    pub fn from_closes(closes: &[f64], rsi_period: usize, roc_period: usize) -> Self {
        Self {
            rsi: rsi(closes, rsi_period),
            roc_pct: roc(closes, roc_period),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rsi.is_none() && self.roc_pct.is_none()
    }
}

/// Latest Wilder RSI; None without `period + 1` closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Percent change over `period` closes
pub fn roc(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - period];
    if base <= 0.0 {
        return None;
    }
    Some((last - base) / base * 100.0)
}
