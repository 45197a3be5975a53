//! Outbound-timestamp adjust threshold validation (§4.10).
//!
//! The engine only owns sanitizing these three knobs at construction and
//! whenever a transaction overrides them; applying the adjustment to
//! outgoing timestamps is a transaction-internal concern (§2).

/// Round up to the next multiple of 10 ms (`roundUp10`).
fn round_up_10(ms: u32) -> u32 {
    let rest = ms % 10;
    if rest == 0 {
        ms
    } else {
        ms + (10 - rest)
    }
}

/// Sanitized `(threshold, over, under)` triple, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustTsOut {
    pub threshold_ms: u32,
    pub over_ms: u32,
    pub under_ms: u32,
}

impl AdjustTsOut {
    /// Mirrors the sanitization engine.cpp applies both at construction
    /// and per-transaction: round each up to a multiple of 10 ms, clamp
    /// `over <= threshold`, clamp `under < 2 * threshold` (set to
    /// `2 * threshold - 10` on violation).
    pub fn new(threshold_ms: u32, over_ms: u32, under_ms: u32) -> Self {
        let threshold_ms = round_up_10(threshold_ms);
        let mut over_ms = round_up_10(over_ms);
        if over_ms > threshold_ms {
            over_ms = threshold_ms;
        }
        let mut under_ms = round_up_10(under_ms);
        let double_threshold = 2 * threshold_ms;
        if under_ms >= double_threshold {
            under_ms = double_threshold - 10;
        }
        Self {
            threshold_ms,
            over_ms,
            under_ms,
        }
    }
}

impl Default for AdjustTsOut {
    fn default() -> Self {
        Self::new(120, 120, 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_constants() {
        let adjust = AdjustTsOut::default();
        assert_eq!(adjust.threshold_ms, 120);
        assert_eq!(adjust.over_ms, 120);
        assert_eq!(adjust.under_ms, 60);
    }

    #[test]
    fn rounds_up_to_a_multiple_of_ten_milliseconds() {
        let adjust = AdjustTsOut::new(121, 41, 31);
        assert_eq!(adjust.threshold_ms, 130);
        assert_eq!(adjust.over_ms, 50);
        assert_eq!(adjust.under_ms, 40);
    }

    #[test]
    fn over_is_clamped_to_threshold() {
        let adjust = AdjustTsOut::new(100, 500, 10);
        assert_eq!(adjust.over_ms, 100);
    }

    #[test]
    fn under_violating_twice_threshold_is_set_to_the_boundary() {
        let adjust = AdjustTsOut::new(50, 10, 200);
        assert_eq!(adjust.under_ms, 2 * adjust.threshold_ms - 10);
    }
}
