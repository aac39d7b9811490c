//! Primary data point derivation.
//!
//! Raw samples arrive at arbitrary times; archives consume one regularized
//! value per data source per step interval, the primary data point (PDP).
//! This module holds the arithmetic that bridges the two:
//!
//! - per-type rate derivation (GAUGE/COUNTER/DERIVE/ABSOLUTE), including
//!   counter wrap correction and heartbeat/range gating;
//! - step-boundary bookkeeping: seconds before the crossed boundary close
//!   out the in-progress PDP, seconds after it seed the next one.
//!
//! A single update may complete several steps at once; the closed-out PDP
//! value then applies to every completed step, since the derived rate is
//! constant across the sampled interval.
//!
//! Everything here is pure: callers pass in the persisted scratch state
//! and write back what comes out.

use crate::error::{Result, UpdateError};
use crate::schema::{DsDef, DsKind};

/// Raw-value token meaning "unknown".
pub const UNKNOWN_TOKEN: &str = "U";

/// Step-boundary decomposition of one update interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpan {
    /// Completed step intervals between the previous and this update.
    pub elapsed_steps: u64,
    /// Seconds of the interval that belong to the completed steps.
    pub pre_seconds: u64,
    /// Seconds of the interval inside the newly occupied step.
    pub post_seconds: u64,
}

impl StepSpan {
    /// Splits the interval `(last_update, timestamp]` at step boundaries.
    ///
    /// The caller guarantees `timestamp > last_update`.
    pub fn compute(last_update: i64, timestamp: i64, step: u64) -> Self {
        let step_i = step as i64;
        let prev_slot = last_update - last_update.rem_euclid(step_i);
        let this_slot = timestamp - timestamp.rem_euclid(step_i);

        if this_slot > prev_slot {
            Self {
                elapsed_steps: ((this_slot - prev_slot) / step_i) as u64,
                pre_seconds: (this_slot - last_update) as u64,
                post_seconds: (timestamp - this_slot) as u64,
            }
        } else {
            Self {
                elapsed_steps: 0,
                pre_seconds: (timestamp - last_update) as u64,
                post_seconds: 0,
            }
        }
    }
}

/// In-progress PDP accumulation for one data source.
///
/// Mirrors the persisted scratch fields of a data-source record:
/// rate·seconds gathered so far and the unknown seconds in the current
/// step window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdpScratch {
    /// Accumulated rate·seconds.
    pub value: f64,
    /// Accumulated unknown seconds.
    pub unknown_sec: u64,
}

/// Derives the rate for one data source over one update interval.
///
/// Returns `Ok(None)` when the interval is unknown: an explicit `U`
/// token, a gap longer than the heartbeat, a COUNTER/DERIVE sample with
/// no usable predecessor, or a rate outside the declared min/max range.
///
/// # Errors
///
/// Returns [`UpdateError::BadValue`] when the token cannot be interpreted
/// for the source's type; malformed tokens are rejected even when the
/// heartbeat already made the interval unknown.
pub fn derive_rate(def: &DsDef, last_ds: &str, token: &str, interval: u64) -> Result<Option<f64>> {
    let bad = |reason: &str| -> crate::error::RotundaError {
        UpdateError::BadValue {
            token: token.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    if token == UNKNOWN_TOKEN {
        return Ok(None);
    }

    let rate = match def.kind {
        DsKind::Gauge => {
            let value: f64 = token.parse().map_err(|_| bad("not a number"))?;
            if !value.is_finite() {
                return Err(bad("not a finite number"));
            }
            Some(value)
        }
        DsKind::Counter => {
            let current: u64 = token.parse().map_err(|_| bad("not a simple unsigned integer"))?;
            if last_ds == UNKNOWN_TOKEN {
                None
            } else {
                let previous: u64 = last_ds
                    .parse()
                    .map_err(|_| bad("previous counter sample is unusable"))?;
                Some(counter_delta(previous, current) / interval as f64)
            }
        }
        DsKind::Derive => {
            let current: i64 = token.parse().map_err(|_| bad("not a simple signed integer"))?;
            if last_ds == UNKNOWN_TOKEN {
                None
            } else {
                let previous: i64 = last_ds
                    .parse()
                    .map_err(|_| bad("previous sample is unusable"))?;
                Some((current.wrapping_sub(previous)) as f64 / interval as f64)
            }
        }
        DsKind::Absolute => {
            let value: f64 = token.parse().map_err(|_| bad("not a number"))?;
            if !value.is_finite() {
                return Err(bad("not a finite number"));
            }
            Some(value / interval as f64)
        }
    };

    if interval > def.heartbeat {
        return Ok(None);
    }

    // A rate outside the declared range is unknown, not an error.
    Ok(rate.filter(|&r| {
        def.min.is_none_or(|min| r >= min) && def.max.is_none_or(|max| r <= max)
    }))
}

/// Counter difference with the classic wrap correction: a decrease is
/// treated as a 32-bit wrap, and failing that a 64-bit wrap.
fn counter_delta(previous: u64, current: u64) -> f64 {
    let mut diff = i128::from(current) - i128::from(previous);
    if diff < 0 {
        diff += 1_i128 << 32;
    }
    if diff < 0 {
        diff += (1_i128 << 64) - (1_i128 << 32);
    }
    diff as f64
}

/// Folds one interval into the scratch when no step boundary was crossed.
pub fn accumulate(scratch: PdpScratch, rate: Option<f64>, interval: u64) -> PdpScratch {
    match rate {
        Some(r) => PdpScratch {
            value: scratch.value + r * interval as f64,
            unknown_sec: scratch.unknown_sec,
        },
        None => PdpScratch {
            value: scratch.value,
            unknown_sec: scratch.unknown_sec + interval,
        },
    }
}

/// Closes out the in-progress PDP at a step boundary.
///
/// Returns the completed PDP value (`None` when the interval exceeded
/// the heartbeat or more than half of a step's seconds were unknown)
/// together with the scratch seeded for the newly occupied step. The
/// value applies to every one of `span.elapsed_steps` completed steps.
pub fn roll_over(
    scratch: PdpScratch,
    rate: Option<f64>,
    interval: u64,
    heartbeat: u64,
    step: u64,
    span: &StepSpan,
) -> (Option<f64>, PdpScratch) {
    debug_assert!(span.elapsed_steps > 0);

    let (closed_value, closed_unknown) = match rate {
        Some(r) => (scratch.value + r * span.pre_seconds as f64, scratch.unknown_sec),
        None => (scratch.value, scratch.unknown_sec + span.pre_seconds),
    };

    let pdp = if interval > heartbeat || 2 * closed_unknown > step {
        None
    } else {
        let span_seconds = span.elapsed_steps * step;
        let known_seconds = span_seconds - closed_unknown;
        Some(closed_value / known_seconds as f64)
    };

    let next = match rate {
        Some(r) => PdpScratch {
            value: r * span.post_seconds as f64,
            unknown_sec: 0,
        },
        None => PdpScratch {
            value: 0.0,
            unknown_sec: span.post_seconds,
        },
    };

    (pdp, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge() -> DsDef {
        "DS:a:GAUGE:120:0:U".parse().unwrap()
    }

    #[test]
    fn test_step_span_within_one_step() {
        // 971 -> 975: no boundary crossed.
        let span = StepSpan::compute(971, 975, 10);
        assert_eq!(span, StepSpan { elapsed_steps: 0, pre_seconds: 4, post_seconds: 0 });
    }

    #[test]
    fn test_step_span_single_boundary() {
        // 979 -> 980: the boundary at 980 completes one step.
        let span = StepSpan::compute(979, 980, 10);
        assert_eq!(span, StepSpan { elapsed_steps: 1, pre_seconds: 1, post_seconds: 0 });

        // 975 -> 987: one boundary, 5s before it, 7s after.
        let span = StepSpan::compute(975, 987, 10);
        assert_eq!(span, StepSpan { elapsed_steps: 1, pre_seconds: 5, post_seconds: 7 });
    }

    #[test]
    fn test_step_span_multiple_boundaries() {
        // 975 -> 1003: boundaries at 980, 990, 1000.
        let span = StepSpan::compute(975, 1003, 10);
        assert_eq!(span, StepSpan { elapsed_steps: 3, pre_seconds: 25, post_seconds: 3 });
    }

    #[test]
    fn test_gauge_rate_is_value() {
        let def = gauge();
        assert_eq!(derive_rate(&def, "U", "100", 10).unwrap(), Some(100.0));
        assert_eq!(derive_rate(&def, "100", "U", 10).unwrap(), None);
    }

    #[test]
    fn test_heartbeat_gates_rate() {
        let def = gauge();
        assert_eq!(derive_rate(&def, "100", "100", 120).unwrap(), Some(100.0));
        assert_eq!(derive_rate(&def, "100", "100", 121).unwrap(), None);
    }

    #[test]
    fn test_range_gates_rate() {
        let def: DsDef = "DS:a:GAUGE:120:0:50".parse().unwrap();
        assert_eq!(derive_rate(&def, "U", "25", 10).unwrap(), Some(25.0));
        assert_eq!(derive_rate(&def, "U", "-1", 10).unwrap(), None);
        assert_eq!(derive_rate(&def, "U", "51", 10).unwrap(), None);
    }

    #[test]
    fn test_counter_rate_and_wrap() {
        let def: DsDef = "DS:c:COUNTER:600:U:U".parse().unwrap();

        // Plain increase: (1500 - 1000) / 10.
        assert_eq!(derive_rate(&def, "1000", "1500", 10).unwrap(), Some(50.0));

        // No predecessor: unknown.
        assert_eq!(derive_rate(&def, "U", "1500", 10).unwrap(), None);

        // 32-bit wrap: counter fell from near 2^32 back to 10.
        let prev = (u64::from(u32::MAX) - 9).to_string();
        let rate = derive_rate(&def, &prev, "10", 10).unwrap().unwrap();
        assert_eq!(rate, 2.0); // 20 ticks over 10 seconds

        // 64-bit wrap.
        let prev = (u64::MAX - 9).to_string();
        let rate = derive_rate(&def, &prev, "10", 10).unwrap().unwrap();
        assert_eq!(rate, 2.0);

        // Counters take integers only.
        assert!(derive_rate(&def, "1000", "15.5", 10).is_err());
    }

    #[test]
    fn test_derive_rate_allows_decrease() {
        let def: DsDef = "DS:d:DERIVE:600:U:U".parse().unwrap();
        assert_eq!(derive_rate(&def, "1000", "900", 10).unwrap(), Some(-10.0));
    }

    #[test]
    fn test_absolute_rate() {
        let def: DsDef = "DS:x:ABSOLUTE:600:U:U".parse().unwrap();
        assert_eq!(derive_rate(&def, "U", "50", 10).unwrap(), Some(5.0));
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        let def = gauge();
        assert!(derive_rate(&def, "U", "abc", 10).is_err());
        assert!(derive_rate(&def, "U", "inf", 10).is_err());
        assert!(derive_rate(&def, "U", "NaN", 10).is_err());
    }

    #[test]
    fn test_accumulate() {
        let scratch = PdpScratch { value: 0.0, unknown_sec: 0 };
        let scratch = accumulate(scratch, Some(100.0), 4);
        assert_eq!(scratch, PdpScratch { value: 400.0, unknown_sec: 0 });

        let scratch = accumulate(scratch, None, 3);
        assert_eq!(scratch, PdpScratch { value: 400.0, unknown_sec: 3 });
    }

    #[test]
    fn test_roll_over_mostly_unknown_step() {
        // Database created at 979: the first step window 970..980 carries
        // 9 unknown seconds, so the PDP closed at 980 is unknown.
        let scratch = PdpScratch { value: 0.0, unknown_sec: 9 };
        let span = StepSpan::compute(979, 980, 10);
        let (pdp, next) = roll_over(scratch, Some(100.0), 1, 120, 10, &span);

        assert_eq!(pdp, None);
        assert_eq!(next, PdpScratch { value: 0.0, unknown_sec: 0 });
    }

    #[test]
    fn test_roll_over_full_step() {
        let scratch = PdpScratch { value: 0.0, unknown_sec: 0 };
        let span = StepSpan::compute(980, 990, 10);
        let (pdp, next) = roll_over(scratch, Some(100.0), 10, 120, 10, &span);

        assert_eq!(pdp, Some(100.0));
        assert_eq!(next, PdpScratch { value: 0.0, unknown_sec: 0 });
    }

    #[test]
    fn test_roll_over_spreads_rate_over_elapsed_steps() {
        // 985 -> 1013: steps ending 990, 1000, 1010 all get the same rate.
        let scratch = PdpScratch { value: 200.0 * 5.0, unknown_sec: 0 };
        let span = StepSpan::compute(985, 1013, 10);
        let (pdp, next) = roll_over(scratch, Some(200.0), 28, 120, 10, &span);

        assert_eq!(span.elapsed_steps, 3);
        assert_eq!(pdp, Some(200.0));
        assert_eq!(next, PdpScratch { value: 600.0, unknown_sec: 0 });
    }

    #[test]
    fn test_roll_over_heartbeat_exceeded() {
        let scratch = PdpScratch { value: 0.0, unknown_sec: 0 };
        let span = StepSpan::compute(980, 1200, 10);
        let (pdp, _) = roll_over(scratch, None, 220, 120, 10, &span);
        assert_eq!(pdp, None);
    }

    #[test]
    fn test_roll_over_half_step_unknown_is_still_known() {
        // Exactly half the step unknown: the PDP survives.
        let scratch = PdpScratch { value: 100.0 * 5.0, unknown_sec: 5 };
        let span = StepSpan::compute(985, 990, 10);
        let (pdp, _) = roll_over(scratch, Some(100.0), 5, 120, 10, &span);
        assert_eq!(pdp, Some(100.0));
    }
}
