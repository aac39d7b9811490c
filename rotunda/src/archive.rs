//! Round-robin archive row store.
//!
//! An archive is a fixed-capacity circular sequence of consolidated rows
//! at one resolution (`step × pdp_per_row` seconds per row). Rows are
//! addressed by their nominal end-time, always a multiple of the row
//! width. The write cursor points at the most recently filled slot, whose
//! nominal time is the last row boundary at or before the database's
//! last-update timestamp; earlier rows sit behind it, wrapping at the row
//! capacity.
//!
//! Reads never fail on retention: a time outside the retained window, a
//! slot never written, or a slot since overwritten simply reads as
//! unknown.

use crate::error::Result;
use crate::file::DbFile;
use crate::schema::RraDef;

/// The row-aligned time range a fetch resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    /// Aligned start of the range (exclusive row boundary).
    pub start: i64,
    /// Aligned end of the range (inclusive row boundary).
    pub end: i64,
    /// Seconds per row.
    pub step: u64,
}

/// One archive of a database: its index and decoded definition.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Position in the archive table.
    pub index: usize,
    /// The immutable definition.
    pub def: RraDef,
}

impl Archive {
    /// Loads and decodes the archive at `index`.
    ///
    /// # Errors
    ///
    /// Propagates a corrupt-descriptor error from decoding.
    pub fn load(file: &DbFile, index: usize) -> Result<Self> {
        Ok(Self {
            index,
            def: file.rra_record(index).def()?,
        })
    }

    /// Seconds covered by one row.
    pub fn row_width(&self, step: u64) -> i64 {
        self.def.row_width(step) as i64
    }

    /// Nominal end-time of the cursor row: the most recent row boundary
    /// at or before the last update.
    pub fn anchor(&self, step: u64, last_update: i64) -> i64 {
        let width = self.row_width(step);
        last_update - last_update.rem_euclid(width)
    }

    /// Nominal end-time of the oldest row still addressed by this archive.
    pub fn earliest(&self, step: u64, last_update: i64) -> i64 {
        self.anchor(step, last_update) - self.row_width(step) * (i64::from(self.def.rows) - 1)
    }

    /// Reads the value of one data source in the row whose nominal
    /// end-time is `time` (a multiple of the row width).
    ///
    /// Returns `None` for times beyond the newest boundary, before the
    /// retained window, or whose slot holds no known value.
    pub fn value_at(
        &self,
        file: &DbFile,
        step: u64,
        last_update: i64,
        ds: usize,
        time: i64,
    ) -> Option<f64> {
        let anchor = self.anchor(step, last_update);
        if time > anchor {
            return None;
        }

        let back = (anchor - time) / self.row_width(step);
        if back >= i64::from(self.def.rows) {
            return None;
        }

        let rows = u64::from(self.def.rows);
        let cursor = u64::from(file.rra_record(self.index).cur_row);
        let slot = ((cursor + rows - back as u64) % rows) as u32;

        let value = file.row_value(self.index, slot, ds);
        if value.is_nan() { None } else { Some(value) }
    }

    /// Writes one consolidated row at the next cursor position,
    /// overwriting the oldest row once the buffer has wrapped.
    pub fn push_row(&self, file: &mut DbFile, values: &[Option<f64>]) {
        let mut record = file.rra_record(self.index);
        record.cur_row = (record.cur_row + 1) % self.def.rows;
        let slot = record.cur_row;
        file.set_rra_record(self.index, record);

        for (ds, value) in values.iter().enumerate() {
            file.set_row_value(self.index, slot, ds, value.unwrap_or(f64::NAN));
        }
    }

    /// Reads all rows whose intervals intersect `(start, end)`.
    ///
    /// The range is widened to enclosing row boundaries: start rounds
    /// down, end rounds up when unaligned. Returns the resolved range and
    /// one row per slot, oldest first, each row holding one optional
    /// value per data source.
    pub fn read_range(
        &self,
        file: &DbFile,
        step: u64,
        last_update: i64,
        start: i64,
        end: i64,
    ) -> (FetchRange, Vec<Vec<Option<f64>>>) {
        let width = self.row_width(step);
        let start_aligned = start - start.rem_euclid(width);
        let end_aligned = end + (width - end.rem_euclid(width)) % width;

        let ds_count = file.ds_count();
        let row_count = ((end_aligned - start_aligned) / width) as usize;

        let mut rows = Vec::with_capacity(row_count);
        for i in 0..row_count {
            let time = start_aligned + width * (i as i64 + 1);
            let row = (0..ds_count)
                .map(|ds| self.value_at(file, step, last_update, ds, time))
                .collect();
            rows.push(row);
        }

        (
            FetchRange {
                start: start_aligned,
                end: end_aligned,
                step: width as u64,
            },
            rows,
        )
    }
}
