//! The compression estimator.
//!
//! Tracks raw bytes appended since the last successful flush and a learned
//! compression ratio, and predicts when the accumulated events are likely
//! to produce a chunk of the configured target size. See DESIGN.md for
//! why this crate implements a ratio-threshold predictor rather than an
//! exponential-moving-average one.

use std::sync::Mutex;

/// `current_size * ratio >= target_chunk_size` is the flush trigger.
pub struct CompressionEstimator {
    target_chunk_size: u64,
    state: Mutex<EstimatorState>,
}

struct EstimatorState {
    current_size: u64,
    ratio: f64,
}

impl CompressionEstimator {
    pub fn new(target_chunk_size: u64) -> Self {
        CompressionEstimator {
            target_chunk_size,
            state: Mutex::new(EstimatorState {
                current_size: 0,
                ratio: 1.0,
            }),
        }
    }

    /// Records `bytes` of raw event data appended to the sink.
    pub fn update(&self, bytes: u64) {
        let mut state = self.state.lock().expect("estimator lock poisoned");
        state.current_size += bytes;
    }

    pub fn should_try_flush(&self) -> bool {
        let state = self.state.lock().expect("estimator lock poisoned");
        (state.current_size as f64) * state.ratio >= self.target_chunk_size as f64
    }

    /// Updates the learned ratio from the outcome of a consolidation
    /// attempt. On success, `current_size` resets to zero since that raw
    /// data has now been consolidated; on failure the raw bytes are still
    /// pending, so `current_size` is left untouched.
    pub fn on_flush(&self, compressed_size: u64, success: bool) {
        let mut state = self.state.lock().expect("estimator lock poisoned");
        if state.current_size > 0 {
            state.ratio = compressed_size as f64 / state.current_size as f64;
        }
        if success {
            state.current_size = 0;
        }
    }

    pub fn current_size(&self) -> u64 {
        self.state.lock().expect("estimator lock poisoned").current_size
    }

    pub fn ratio(&self) -> f64 {
        self.state.lock().expect("estimator lock poisoned").ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_threshold_scenario() {
        let estimator = CompressionEstimator::new(1000);

        estimator.update(1000);
        assert!(estimator.should_try_flush());

        estimator.on_flush(500, false);
        assert_eq!(estimator.ratio(), 0.5);

        estimator.update(900);
        assert!(!estimator.should_try_flush());

        estimator.update(100);
        assert!(estimator.should_try_flush());

        estimator.on_flush(1000, true);
        assert_eq!(estimator.current_size(), 0);
    }
}
