//! Consolidation of primary data points into archive rows.
//!
//! Every (archive, data source) pair carries one running accumulator.
//! Each completed primary data point is absorbed; when the archive's
//! `pdp_per_row` count is reached, the accumulator emits one consolidated
//! row value and resets. The x-files factor decides how many unknown
//! inputs an emitted row tolerates before it is itself unknown.
//!
//! At database creation the accumulators are seeded with the step slots
//! that already lie inside the archive's current row window, so that row
//! boundaries stay aligned to wall-clock multiples of the row width.

use crate::schema::ConsolidationFn;

/// Running partial consolidation for one (archive, data source) pair.
///
/// The fields mirror the persisted accumulator record: the combined value
/// (NaN while no known primary data point has arrived), the unknown input
/// count, and the total input count since the last emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdpAccumulator {
    /// Combined value so far; NaN while empty of known inputs.
    pub value: f64,
    /// Unknown primary data points since the last emission.
    pub unknown_pdps: u32,
    /// Primary data points seen since the last emission.
    pub seen_pdps: u32,
}

impl CdpAccumulator {
    /// An empty accumulator, as left behind by an emission.
    pub fn empty() -> Self {
        Self {
            value: f64::NAN,
            unknown_pdps: 0,
            seen_pdps: 0,
        }
    }

    /// The creation-time accumulator for an archive with the given row
    /// width.
    ///
    /// Step slots between the row-width boundary and the creation time
    /// have already elapsed unknown; counting them keeps every later
    /// emission on a wall-clock multiple of `step × pdp_per_row`.
    pub fn seeded(start: i64, step: u64, pdp_per_row: u32) -> Self {
        let step_i = step as i64;
        let width = step_i * i64::from(pdp_per_row);
        let aligned = start - start.rem_euclid(step_i);
        let elapsed_slots = (aligned.rem_euclid(width) / step_i) as u32;

        Self {
            value: f64::NAN,
            unknown_pdps: elapsed_slots,
            seen_pdps: elapsed_slots,
        }
    }

    /// Absorbs one primary data point.
    pub fn absorb(&mut self, cf: ConsolidationFn, pdp: Option<f64>) {
        self.seen_pdps += 1;
        let Some(v) = pdp else {
            self.unknown_pdps += 1;
            return;
        };

        self.value = if self.value.is_nan() {
            v
        } else {
            match cf {
                ConsolidationFn::Average => self.value + v,
                ConsolidationFn::Min => self.value.min(v),
                ConsolidationFn::Max => self.value.max(v),
                ConsolidationFn::Last => v,
            }
        };
    }

    /// Whether the accumulator has gathered a full row of inputs.
    pub fn is_full(&self, pdp_per_row: u32) -> bool {
        self.seen_pdps >= pdp_per_row
    }

    /// Emits the consolidated row value and resets the accumulator.
    ///
    /// The value is unknown when the unknown share of inputs exceeds the
    /// x-files factor; AVERAGE divides by the count of known inputs.
    pub fn emit(&mut self, cf: ConsolidationFn, xff: f64, pdp_per_row: u32) -> Option<f64> {
        let row = if f64::from(self.unknown_pdps) > f64::from(pdp_per_row) * xff
            || self.value.is_nan()
        {
            None
        } else {
            match cf {
                ConsolidationFn::Average => {
                    Some(self.value / f64::from(pdp_per_row - self.unknown_pdps))
                }
                ConsolidationFn::Min | ConsolidationFn::Max | ConsolidationFn::Last => {
                    Some(self.value)
                }
            }
        };

        *self = Self::empty();
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_emission() {
        let mut cdp = CdpAccumulator::empty();
        for v in [1.0, 2.0, 3.0, 4.0] {
            cdp.absorb(ConsolidationFn::Average, Some(v));
        }
        assert!(cdp.is_full(4));
        assert_eq!(cdp.emit(ConsolidationFn::Average, 0.5, 4), Some(2.5));
        assert_eq!(cdp, CdpAccumulator::empty());
    }

    #[test]
    fn test_average_ignores_unknown_inputs_within_xff() {
        let mut cdp = CdpAccumulator::empty();
        cdp.absorb(ConsolidationFn::Average, Some(10.0));
        cdp.absorb(ConsolidationFn::Average, None);
        cdp.absorb(ConsolidationFn::Average, Some(20.0));
        cdp.absorb(ConsolidationFn::Average, None);

        // 2 of 4 unknown: not over xff 0.5, average of the known pair.
        assert_eq!(cdp.emit(ConsolidationFn::Average, 0.5, 4), Some(15.0));
    }

    #[test]
    fn test_xff_rejects_too_many_unknowns() {
        let mut cdp = CdpAccumulator::empty();
        cdp.absorb(ConsolidationFn::Average, Some(10.0));
        cdp.absorb(ConsolidationFn::Average, None);
        cdp.absorb(ConsolidationFn::Average, None);
        cdp.absorb(ConsolidationFn::Average, None);

        // 3 of 4 unknown > 0.5: the row itself is unknown.
        assert_eq!(cdp.emit(ConsolidationFn::Average, 0.5, 4), None);
    }

    #[test]
    fn test_min_max_last() {
        let inputs = [Some(3.0), None, Some(1.0), Some(2.0)];

        let mut min = CdpAccumulator::empty();
        let mut max = CdpAccumulator::empty();
        let mut last = CdpAccumulator::empty();
        for v in inputs {
            min.absorb(ConsolidationFn::Min, v);
            max.absorb(ConsolidationFn::Max, v);
            last.absorb(ConsolidationFn::Last, v);
        }

        assert_eq!(min.emit(ConsolidationFn::Min, 0.5, 4), Some(1.0));
        assert_eq!(max.emit(ConsolidationFn::Max, 0.5, 4), Some(3.0));
        assert_eq!(last.emit(ConsolidationFn::Last, 0.5, 4), Some(2.0));
    }

    #[test]
    fn test_all_unknown_emits_unknown() {
        let mut cdp = CdpAccumulator::empty();
        for _ in 0..4 {
            cdp.absorb(ConsolidationFn::Average, None);
        }
        assert_eq!(cdp.emit(ConsolidationFn::Average, 0.9, 4), None);
    }

    #[test]
    fn test_seeding_counts_elapsed_slots() {
        // Creation at 1368278979, step 10: the 100-second row window
        // starting at 1368278900 already holds 7 elapsed step slots.
        let cdp = CdpAccumulator::seeded(1_368_278_979, 10, 10);
        assert_eq!(cdp.unknown_pdps, 7);
        assert_eq!(cdp.seen_pdps, 7);
        assert!(cdp.value.is_nan());

        // A single-step row window carries no partial slots.
        let cdp = CdpAccumulator::seeded(1_368_278_979, 10, 1);
        assert_eq!(cdp.unknown_pdps, 0);
        assert_eq!(cdp.seen_pdps, 0);
    }

    #[test]
    fn test_seeded_window_emission_sequence() {
        // Continue the seeded case: the 980 slot is unknown (partial first
        // step) and 990, 1000 are known. The first row closes at …000 with
        // 8 of 10 inputs unknown, so it is unknown; the next full window
        // of known inputs averages cleanly.
        let mut cdp = CdpAccumulator::seeded(1_368_278_979, 10, 10);

        cdp.absorb(ConsolidationFn::Average, None);
        cdp.absorb(ConsolidationFn::Average, Some(100.0));
        cdp.absorb(ConsolidationFn::Average, Some(100.0));
        assert!(cdp.is_full(10));
        assert_eq!(cdp.emit(ConsolidationFn::Average, 0.5, 10), None);

        for _ in 0..10 {
            cdp.absorb(ConsolidationFn::Average, Some(100.0));
        }
        assert!(cdp.is_full(10));
        assert_eq!(cdp.emit(ConsolidationFn::Average, 0.5, 10), Some(100.0));
    }
}
