//! Database lifecycle and the update/fetch surface.
//!
//! This module ties the components together. A [`Database`] owns the
//! memory-mapped file and coordinates the write path (rate derivation,
//! primary-data-point roll-over, consolidation, row emission) and the
//! read path (archive selection, range reads, and introspection).
//!
//! # Write Path
//!
//! ```text
//! update(t, tokens)
//!   ├─ validate: ordering, value count, token shapes   (no mutation yet)
//!   ├─ derive one rate per data source
//!   ├─ roll the PDP scratch over every elapsed step boundary
//!   ├─ feed each completed PDP to every archive accumulator
//!   │    └─ on a full row window: emit row, advance cursor
//!   └─ advance last-update, store raw tokens, flush
//! ```
//!
//! A failing update performs all of its validation before the first
//! mutation, so it never advances the last-update timestamp or a cursor.

use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use crate::archive::{Archive, FetchRange};
use crate::consolidate::CdpAccumulator;
use crate::error::{DefinitionError, FetchError, Result, UpdateError};
use crate::file::DbFile;
use crate::info::Info;
use crate::lock::PathLock;
use crate::pdp::{self, PdpScratch, StepSpan};
use crate::schema::{self, ConsolidationFn, DsDef, RraDef, LAST_DS_MAX};

/// Everything `create` needs besides the target path.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    /// Step interval in seconds.
    pub step: u64,
    /// Last-update timestamp the database starts from; updates must be
    /// strictly newer.
    pub start: i64,
    /// Ordered data-source definitions.
    pub data_sources: Vec<DsDef>,
    /// Ordered archive definitions.
    pub archives: Vec<RraDef>,
}

/// An open rotunda database.
///
/// All operations are synchronous and run to completion. Mutations take
/// the write side, reads the read side, of the per-path lock shared by
/// every `Database` for the same file in this process.
#[derive(Debug)]
pub struct Database {
    file: DbFile,
    path: PathBuf,
    data_sources: Vec<DsDef>,
    archives: Vec<Archive>,
    lock: PathLock,
}

impl Database {
    /// Creates a new database file and returns it opened.
    ///
    /// # Errors
    ///
    /// - [`DefinitionError`] when the definitions are invalid (§ zero
    ///   step, empty lists, duplicate names, bad per-definition fields).
    /// - [`crate::error::FileError::AlreadyExists`] when the target exists.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use rotunda::{CreateSpec, Database};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let spec = CreateSpec {
    ///     step: 10,
    ///     start: 1_368_278_979,
    ///     data_sources: vec!["DS:a:GAUGE:120:0:U".parse()?],
    ///     archives: vec!["RRA:AVERAGE:0.5:1:100".parse()?],
    /// };
    /// let db = Database::create("metrics.rtd", spec)?;
    /// assert_eq!(db.last(), 1_368_278_979);
    /// # Ok(())
    /// # }
    /// ```
    pub fn create<P: AsRef<Path>>(path: P, spec: CreateSpec) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        schema::validate_definitions(spec.step, &spec.data_sources, &spec.archives)?;

        let lock = PathLock::for_path(&path);
        let guard = lock.0.write().unwrap_or_else(PoisonError::into_inner);

        let mut file = DbFile::create(&path, spec.step, spec.start, &spec.data_sources, &spec.archives)?;

        // Seed the step scratch: seconds of the current step interval that
        // passed before the database existed are unknown.
        let unknown_sec = spec.start.rem_euclid(spec.step as i64) as u64;
        for i in 0..spec.data_sources.len() {
            let mut record = file.ds_record(i);
            record.unknown_sec = unknown_sec;
            file.set_ds_record(i, record);
        }

        // Seed each accumulator with the step slots already elapsed inside
        // its archive's current row window.
        for (r, rra) in spec.archives.iter().enumerate() {
            let seed = CdpAccumulator::seeded(spec.start, spec.step, rra.pdp_per_row);
            for d in 0..spec.data_sources.len() {
                let mut record = file.cdp_record(r, d);
                record.value = seed.value;
                record.unknown_pdps = seed.unknown_pdps;
                record.seen_pdps = seed.seen_pdps;
                file.set_cdp_record(r, d, record);
            }
        }

        file.sync()?;
        drop(guard);

        tracing::debug!(
            path = %path.display(),
            step = spec.step,
            data_sources = spec.data_sources.len(),
            archives = spec.archives.len(),
            "database created"
        );

        Self::from_file(file, path, lock)
    }

    /// Opens an existing database file.
    ///
    /// # Errors
    ///
    /// - [`crate::error::FileError::NotFound`] when the file is missing.
    /// - [`crate::error::FileError::Corrupt`] when structural validation
    ///   fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = PathLock::for_path(&path);
        let guard = lock.0.read().unwrap_or_else(PoisonError::into_inner);
        let file = DbFile::open(&path)?;
        drop(guard);

        Self::from_file(file, path, lock)
    }

    fn from_file(file: DbFile, path: PathBuf, lock: PathLock) -> Result<Self> {
        let data_sources = (0..file.ds_count())
            .map(|i| file.ds_record(i).def())
            .collect::<Result<Vec<_>>>()?;
        let archives = (0..file.rra_count())
            .map(|i| Archive::load(&file, i))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            file,
            path,
            data_sources,
            archives,
            lock,
        })
    }

    /// Applies one update: a timestamp and one raw value token per data
    /// source, in declaration order. `U` marks an unknown value.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::TimestampOutOfOrder`] when the timestamp is not
    ///   newer than the last update; nothing changes.
    /// - [`UpdateError::TimestampTooOld`] when it falls at or before the
    ///   first archive's earliest retained time.
    /// - [`UpdateError::WrongValueCount`] / [`UpdateError::BadValue`] for
    ///   malformed input; nothing changes.
    pub fn update(&mut self, timestamp: i64, tokens: &[&str]) -> Result<()> {
        let lock = self.lock.0.clone();
        let _guard = lock.write().unwrap_or_else(PoisonError::into_inner);

        let step = self.file.step();
        let last_update = self.file.last_update();

        if timestamp <= last_update {
            return Err(UpdateError::TimestampOutOfOrder {
                timestamp,
                last_update,
            }
            .into());
        }
        let earliest = self.archives[0].earliest(step, last_update);
        if timestamp <= earliest {
            return Err(UpdateError::TimestampTooOld {
                timestamp,
                earliest,
            }
            .into());
        }
        if tokens.len() != self.data_sources.len() {
            return Err(UpdateError::WrongValueCount {
                expected: self.data_sources.len(),
                got: tokens.len(),
            }
            .into());
        }

        let interval = (timestamp - last_update) as u64;
        let span = StepSpan::compute(last_update, timestamp, step);

        // Validation pass: every rate derives (or errors) before any state
        // is touched.
        let mut rates = Vec::with_capacity(tokens.len());
        for (ds, (def, token)) in self.data_sources.iter().zip(tokens).enumerate() {
            if token.len() > LAST_DS_MAX {
                return Err(UpdateError::BadValue {
                    token: (*token).to_string(),
                    reason: format!("token exceeds {LAST_DS_MAX} characters"),
                }
                .into());
            }
            let last_ds = self.file.ds_record(ds).last_ds();
            rates.push(pdp::derive_rate(def, &last_ds, token, interval)?);
        }

        // Apply pass: roll the scratch, then fan completed PDPs out.
        if span.elapsed_steps == 0 {
            for (ds, rate) in rates.iter().enumerate() {
                let mut record = self.file.ds_record(ds);
                let scratch = pdp::accumulate(
                    PdpScratch {
                        value: record.pdp_value,
                        unknown_sec: record.unknown_sec,
                    },
                    *rate,
                    interval,
                );
                record.pdp_value = scratch.value;
                record.unknown_sec = scratch.unknown_sec;
                self.file.set_ds_record(ds, record);
            }
        } else {
            let mut pdps = Vec::with_capacity(rates.len());
            for (ds, (def, rate)) in self.data_sources.iter().zip(&rates).enumerate() {
                let mut record = self.file.ds_record(ds);
                let (pdp, next) = pdp::roll_over(
                    PdpScratch {
                        value: record.pdp_value,
                        unknown_sec: record.unknown_sec,
                    },
                    *rate,
                    interval,
                    def.heartbeat,
                    step,
                    &span,
                );
                record.pdp_value = next.value;
                record.unknown_sec = next.unknown_sec;
                self.file.set_ds_record(ds, record);
                pdps.push(pdp);
            }

            self.consolidate(&pdps, span.elapsed_steps);
        }

        for (ds, token) in tokens.iter().enumerate() {
            let mut record = self.file.ds_record(ds);
            record.set_last_ds(token);
            self.file.set_ds_record(ds, record);
        }
        self.file.set_last_update(timestamp);
        self.file.sync()?;

        tracing::trace!(
            path = %self.path.display(),
            timestamp,
            elapsed_steps = span.elapsed_steps,
            "update applied"
        );

        Ok(())
    }

    /// Feeds one completed PDP set into every archive, `elapsed_steps`
    /// times, emitting rows at each crossed row boundary.
    fn consolidate(&mut self, pdps: &[Option<f64>], elapsed_steps: u64) {
        for archive in self.archives.clone() {
            let RraDef {
                cf,
                xff,
                pdp_per_row,
                ..
            } = archive.def;

            for _ in 0..elapsed_steps {
                let mut full = false;
                for (ds, pdp) in pdps.iter().enumerate() {
                    let mut record = self.file.cdp_record(archive.index, ds);
                    let mut acc = CdpAccumulator {
                        value: record.value,
                        unknown_pdps: record.unknown_pdps,
                        seen_pdps: record.seen_pdps,
                    };
                    acc.absorb(cf, *pdp);
                    full = acc.is_full(pdp_per_row);
                    record.value = acc.value;
                    record.unknown_pdps = acc.unknown_pdps;
                    record.seen_pdps = acc.seen_pdps;
                    self.file.set_cdp_record(archive.index, ds, record);
                }

                if full {
                    let row: Vec<Option<f64>> = (0..pdps.len())
                        .map(|ds| {
                            let mut record = self.file.cdp_record(archive.index, ds);
                            let mut acc = CdpAccumulator {
                                value: record.value,
                                unknown_pdps: record.unknown_pdps,
                                seen_pdps: record.seen_pdps,
                            };
                            let value = acc.emit(cf, xff, pdp_per_row);
                            record.value = acc.value;
                            record.unknown_pdps = acc.unknown_pdps;
                            record.seen_pdps = acc.seen_pdps;
                            self.file.set_cdp_record(archive.index, ds, record);
                            value
                        })
                        .collect();
                    archive.push_row(&mut self.file, &row);
                }
            }
        }
    }

    /// Fetches consolidated rows for the archive best matching the
    /// request.
    ///
    /// Among archives with the requested consolidation function, the one
    /// with the smallest `pdp_per_row` whose retention covers `start`
    /// wins; when none covers it, the matching archive with the longest
    /// retention answers for as much of the range as it can. Returns the
    /// resolved row-aligned range, the ordered data-source names, and one
    /// row per slot (oldest first).
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidTimeRange`] when `start >= end`.
    /// - [`FetchError::NoMatchingArchive`] when no archive uses `cf`.
    pub fn fetch(
        &self,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
    ) -> Result<(FetchRange, Vec<String>, Vec<Vec<Option<f64>>>)> {
        let _guard = self.lock.0.read().unwrap_or_else(PoisonError::into_inner);

        if start >= end {
            return Err(FetchError::InvalidTimeRange { start, end }.into());
        }

        let step = self.file.step();
        let last_update = self.file.last_update();

        let candidates: Vec<&Archive> =
            self.archives.iter().filter(|a| a.def.cf == cf).collect();
        if candidates.is_empty() {
            return Err(FetchError::NoMatchingArchive {
                cf: cf.to_string(),
            }
            .into());
        }

        let covering = candidates
            .iter()
            .filter(|a| a.earliest(step, last_update) <= start)
            .min_by_key(|a| a.def.pdp_per_row)
            .copied();
        let archive = covering.unwrap_or_else(|| {
            candidates
                .iter()
                .max_by_key(|a| a.def.retention(step))
                .copied()
                .unwrap_or(candidates[0])
        });

        let (range, rows) = archive.read_range(&self.file, step, last_update, start, end);
        let names = self.data_sources.iter().map(|d| d.name.clone()).collect();

        Ok((range, names, rows))
    }

    /// Nominal end-time of the oldest row addressed by the given archive.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidArgument`] for an archive index
    /// out of range.
    pub fn first(&self, archive_index: usize) -> Result<i64> {
        let _guard = self.lock.0.read().unwrap_or_else(PoisonError::into_inner);

        let archive = self.archives.get(archive_index).ok_or_else(|| {
            DefinitionError::InvalidArgument {
                reason: format!(
                    "archive index {archive_index} out of range ({} archives)",
                    self.archives.len()
                ),
            }
        })?;
        Ok(archive.earliest(self.file.step(), self.file.last_update()))
    }

    /// Nominal end-time of the oldest row across the archive with the
    /// longest retention.
    pub fn earliest(&self) -> i64 {
        let _guard = self.lock.0.read().unwrap_or_else(PoisonError::into_inner);

        let step = self.file.step();
        let last_update = self.file.last_update();
        self.archives
            .iter()
            .map(|a| a.earliest(step, last_update))
            .min()
            .unwrap_or(last_update)
    }

    /// Timestamp of the most recent applied update.
    pub fn last(&self) -> i64 {
        let _guard = self.lock.0.read().unwrap_or_else(PoisonError::into_inner);
        self.file.last_update()
    }

    /// Dumps every live header field and every in-flight consolidation
    /// accumulator as an ordered key/value mapping.
    ///
    /// # Errors
    ///
    /// Propagates descriptor decoding failures.
    pub fn info(&self) -> Result<Info> {
        let _guard = self.lock.0.read().unwrap_or_else(PoisonError::into_inner);
        Info::collect(&self.file)
    }

    /// Step interval in seconds.
    pub fn step(&self) -> u64 {
        self.file.step()
    }

    /// The ordered data-source definitions.
    pub fn data_sources(&self) -> &[DsDef] {
        &self.data_sources
    }

    /// The ordered archive definitions.
    pub fn archive_defs(&self) -> Vec<RraDef> {
        self.archives.iter().map(|a| a.def.clone()).collect()
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
