//! # rotunda
//!
//! Embedded single-file round-robin time-series database.
//!
//! rotunda stores metrics the round-robin way: a database declares its
//! data sources and archives once, at creation, and from then on its size
//! never changes. Irregular raw samples are regularized into one primary
//! data point per step interval, consolidated online (AVERAGE, MIN, MAX,
//! LAST) into fixed-capacity circular archives at several resolutions,
//! and read back with explicit unknown-value semantics.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - One memory-mapped file per database; size fixed at creation
//! - Rate semantics per source: GAUGE, COUNTER, DERIVE, ABSOLUTE
//! - Online tiered consolidation at write time, driven by the x-files factor
//! - Gaps degrade to unknown values, never to errors
//! - Full structural introspection, down to in-flight accumulators
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rotunda::{ConsolidationFn, CreateSpec, Database};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // One GAUGE source sampled every 10s, kept at full resolution for
//! // 1000s and as 100s averages for 100_000s.
//! let spec = CreateSpec {
//!     step: 10,
//!     start: 1_700_000_000,
//!     data_sources: vec!["DS:temperature:GAUGE:120:U:U".parse()?],
//!     archives: vec![
//!         "RRA:AVERAGE:0.5:1:100".parse()?,
//!         "RRA:AVERAGE:0.5:10:1000".parse()?,
//!     ],
//! };
//!
//! let mut db = Database::create("temps.rtd", spec)?;
//!
//! db.update(1_700_000_010, &["21.5"])?;
//! db.update(1_700_000_020, &["21.7"])?;
//!
//! let (range, names, rows) =
//!     db.fetch(ConsolidationFn::Average, 1_700_000_000, 1_700_000_020)?;
//! for (i, row) in rows.iter().enumerate() {
//!     let time = range.start + range.step as i64 * (i as i64 + 1);
//!     println!("{time}: {:?} = {:?}", names, row);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The classic string-token surface is also available, for callers that
//! shuttle positional tokens across a language boundary:
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! rotunda::create(
//!     "temps.rtd",
//!     &["-s 10", "DS:temperature:GAUGE:120:U:U", "RRA:AVERAGE:0.5:1:100"],
//! )?;
//! rotunda::update("temps.rtd", &["N:21.5"])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Database`] — Top-level handle; create/open, update, fetch, info
//! - [`CreateSpec`] — Step, start time, and definitions for creation
//! - [`schema::DsDef`] / [`schema::RraDef`] — Data-source and archive definitions
//! - [`Info`] — Ordered structural dump, down to in-flight accumulators
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`db`] — Database lifecycle and the update/fetch surface
//! - [`schema`] — Definitions, token parsing, validation
//! - [`pdp`] — Primary data point derivation
//! - [`consolidate`] — Consolidation accumulators
//! - [`archive`] — Circular row store and range reads
//! - [`file`] — Raw memory-mapped file format
//! - [`info`] — Introspection types
//! - [`command`] — String-token command surface
//! - [`error`] — Error types

pub mod archive;
pub mod command;
pub mod consolidate;
pub mod db;
pub mod error;
pub mod file;
pub mod info;
mod lock;
pub mod pdp;
pub mod schema;

// Re-export primary API types at crate root for convenience.
pub use archive::FetchRange;
pub use command::{create, fetch, first, info, last, update};
pub use db::{CreateSpec, Database};
pub use error::{Result, RotundaError};
pub use info::{Info, InfoValue};
pub use schema::{ConsolidationFn, DsDef, DsKind, RraDef};
