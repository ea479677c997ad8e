//! Mean helpers over non-empty window buckets

use crate::error::{PipelineError, Result};

/// Arithmetic mean of the values
pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(PipelineError::EmptyWindow);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean of integer timestamps rounded to the nearest integer
///
/// Ties round to the even neighbour: 100.5 becomes 100, 101.5 becomes 102.
pub fn rounded_mean(timestamps: &[i64]) -> Result<i64> {
    Ok(float_mean(timestamps)?.round_ties_even() as i64)
}

/// Mean of integer timestamps truncated toward zero
pub fn truncated_mean(timestamps: &[i64]) -> Result<i64> {
    Ok(float_mean(timestamps)?.trunc() as i64)
}

fn float_mean(timestamps: &[i64]) -> Result<f64> {
    if timestamps.is_empty() {
        return Err(PipelineError::EmptyWindow);
    }
    // i128 keeps the sum exact for epoch-millisecond stamps
    let sum: i128 = timestamps.iter().map(|&t| i128::from(t)).sum();
    Ok(sum as f64 / timestamps.len() as f64)
}
