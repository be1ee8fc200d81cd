// aggregate.rs

use crate::*;

/// Robust per-cycle reduction: sort ascending with missing readings last,
/// slice a fixed count off both ends, average what remains.
#[derive(Clone, Copy, Debug)]
pub struct TrimmedAggregator {
    trim: usize,
}

impl TrimmedAggregator {
    /// Rejects a trim count that would leave nothing of a full buffer.
    pub fn new(trim: usize, cycle_length: usize) -> Result<Self, ConfigError> {
        if trim.saturating_mul(2) >= cycle_length {
            return Err(ConfigError::TrimTooLarge { trim, cycle_length });
        }
        Ok(TrimmedAggregator { trim })
    }

    /// Pure: the same multiset of readings always reduces to the same
    /// value. Missing readings that survive the trim are left out of the
    /// average; a window with no numeric reading at all is a data-quality
    /// fault, not a number.
    pub fn aggregate(&self, buffer: &[Reading]) -> Result<f64, AggregateError> {
        let mut sorted: Vec<Reading> = buffer.to_vec();
        sorted.sort_by(|a, b| sort_key(a).total_cmp(&sort_key(b)));

        if sorted.len() <= self.trim.saturating_mul(2) {
            return Err(AggregateError::EmptyAfterTrim);
        }
        let window = &sorted[self.trim..sorted.len() - self.trim];

        let values: Vec<f64> = window.iter().filter_map(|r| *r).collect();
        if values.is_empty() {
            return Err(AggregateError::AllMissing);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }
}

// Missing readings sort after every real value.
fn sort_key(r: &Reading) -> f64 {
    r.unwrap_or(f64::INFINITY)
}


// EOF
