//! Series normalization: raw prices to percentage offsets from the first point.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedWindow {
    pub base_price: f64,
    pub values: Vec<f64>,
}

impl NormalizedWindow {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Offset of the last point, i.e. the window's total return.
    pub fn terminal(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }
}

/// `values[i] = (prices[i] - prices[0]) / prices[0]`.
pub fn normalize(prices: &[f64]) -> EngineResult<NormalizedWindow> {
    if prices.len() < 2 {
        return Err(EngineError::invalid_input(format!(
            "need at least 2 prices, got {}",
            prices.len()
        )));
    }
    if let Some(i) = prices.iter().position(|p| !p.is_finite()) {
        return Err(EngineError::invalid_input(format!("non-finite price at index {}", i)));
    }
    let base = prices[0];
    if base <= 0.0 {
        return Err(EngineError::invalid_input(format!("non-positive base price {}", base)));
    }
    Ok(NormalizedWindow {
        base_price: base,
        values: prices.iter().map(|p| (p - base) / base).collect(),
    })
}
