//! Data-source and archive definitions for a rotunda database.
//!
//! These types describe the fixed shape of a database: which data sources
//! it tracks, how raw samples become rates, and which round-robin archives
//! consolidate and retain them. Definitions are declared once at creation
//! time and are immutable afterwards; only their runtime state (last seen
//! value, accumulators, cursors) changes with updates.
//!
//! Definitions can be built directly or parsed from the classic colon
//! token forms `DS:<name>:<type>:<heartbeat>:<min>:<max>` and
//! `RRA:<cf>:<xff>:<pdp_per_row>:<rows>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DefinitionError, Result, RotundaError};

/// Maximum length of a data-source name, chosen to fit the fixed-width
/// on-disk descriptor with a trailing NUL.
pub const DS_NAME_MAX: usize = 23;

/// Maximum length of a stored raw value token (`last_ds`).
pub const LAST_DS_MAX: usize = 23;

/// How raw samples of a data source are converted into a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DsKind {
    /// The raw value is the rate.
    Gauge,
    /// Delta of an ever-increasing unsigned counter, with wrap correction.
    Counter,
    /// Signed delta per second; decreases are legitimate.
    Derive,
    /// The raw value is an amount accumulated since the previous sample.
    Absolute,
}

impl DsKind {
    /// Returns the canonical upper-case name used in definition tokens.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }
}

impl fmt::Display for DsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DsKind {
    type Err = RotundaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GAUGE" => Ok(Self::Gauge),
            "COUNTER" => Ok(Self::Counter),
            "DERIVE" => Ok(Self::Derive),
            "ABSOLUTE" => Ok(Self::Absolute),
            other => Err(DefinitionError::InvalidArgument {
                reason: format!("unknown data source type '{other}'"),
            }
            .into()),
        }
    }
}

/// Function used to consolidate primary data points into one archive row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsolidationFn {
    /// Arithmetic mean of the known primary data points.
    Average,
    /// Minimum of the known primary data points.
    Min,
    /// Maximum of the known primary data points.
    Max,
    /// Most recent known primary data point.
    Last,
}

impl ConsolidationFn {
    /// Returns the canonical upper-case name used in definition tokens.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsolidationFn {
    type Err = RotundaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            other => Err(DefinitionError::InvalidArgument {
                reason: format!("unknown consolidation function '{other}'"),
            }
            .into()),
        }
    }
}

/// Definition of a single data source.
///
/// # Example
///
/// ```rust
/// use rotunda::schema::{DsDef, DsKind};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ds: DsDef = "DS:temperature:GAUGE:120:-50:150".parse()?;
/// assert_eq!(ds.name, "temperature");
/// assert_eq!(ds.kind, DsKind::Gauge);
/// assert_eq!(ds.heartbeat, 120);
/// assert_eq!(ds.min, Some(-50.0));
/// assert_eq!(ds.max, Some(150.0));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsDef {
    /// Name, unique within the database. At most [`DS_NAME_MAX`] characters
    /// drawn from `[A-Za-z0-9_-]`.
    pub name: String,

    /// How raw samples become rates.
    pub kind: DsKind,

    /// Maximum seconds between samples before the gap counts as unknown.
    pub heartbeat: u64,

    /// Smallest acceptable rate; `None` leaves the range open below.
    pub min: Option<f64>,

    /// Largest acceptable rate; `None` leaves the range open above.
    pub max: Option<f64>,
}

impl DsDef {
    /// Validates this definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidDataSource`] when the name is
    /// empty, too long, or contains forbidden characters, when the
    /// heartbeat is zero, or when min >= max.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| -> RotundaError {
            DefinitionError::InvalidDataSource {
                spec: self.name.clone(),
                reason,
            }
            .into()
        };

        if self.name.is_empty() {
            return Err(fail("name must not be empty".to_string()));
        }
        if self.name.len() > DS_NAME_MAX {
            return Err(fail(format!(
                "name is {} characters, maximum is {DS_NAME_MAX}",
                self.name.len()
            )));
        }
        if !self
            .name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(fail(
                "name may only contain letters, digits, '_' and '-'".to_string(),
            ));
        }
        if self.heartbeat == 0 {
            return Err(fail("heartbeat must be greater than zero".to_string()));
        }
        if let (Some(min), Some(max)) = (self.min, self.max)
            && min >= max
        {
            return Err(fail(format!("min ({min}) must be below max ({max})")));
        }

        Ok(())
    }
}

impl FromStr for DsDef {
    type Err = RotundaError;

    /// Parses a `DS:<name>:<type>:<heartbeat>:<min>:<max>` token, where
    /// `<min>`/`<max>` may be `U` for unbounded.
    fn from_str(s: &str) -> Result<Self> {
        let fail = |reason: &str| -> RotundaError {
            DefinitionError::InvalidDataSource {
                spec: s.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 6 || fields[0] != "DS" {
            return Err(fail("expected DS:<name>:<type>:<heartbeat>:<min>:<max>"));
        }

        let kind: DsKind = fields[2].parse()?;
        let heartbeat: u64 = fields[3]
            .parse()
            .map_err(|_| fail("heartbeat is not a positive integer"))?;
        let min = parse_bound(fields[4]).ok_or_else(|| fail("min is not a number or 'U'"))?;
        let max = parse_bound(fields[5]).ok_or_else(|| fail("max is not a number or 'U'"))?;

        let def = Self {
            name: fields[1].to_string(),
            kind,
            heartbeat,
            min,
            max,
        };
        def.validate()?;
        Ok(def)
    }
}

/// Parses a range bound: `U` means unbounded, anything else must be a number.
fn parse_bound(token: &str) -> Option<Option<f64>> {
    let token = token.trim();
    if token == "U" {
        return Some(None);
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some)
}

/// Definition of a single round-robin archive.
///
/// # Example
///
/// ```rust
/// use rotunda::schema::{ConsolidationFn, RraDef};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rra: RraDef = "RRA:AVERAGE:0.5:10:1000".parse()?;
/// assert_eq!(rra.cf, ConsolidationFn::Average);
/// assert_eq!(rra.pdp_per_row, 10);
/// assert_eq!(rra.rows, 1000);
/// // With a 10 second step this archive keeps 1000 rows of 100 seconds.
/// assert_eq!(rra.row_width(10), 100);
/// assert_eq!(rra.retention(10), 100_000);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RraDef {
    /// Function combining primary data points into one row.
    pub cf: ConsolidationFn,

    /// X-files factor: the fraction of unknown primary data points an
    /// emitted row tolerates before it is itself unknown. In `[0, 1)`.
    pub xff: f64,

    /// Primary data points consolidated into one row.
    pub pdp_per_row: u32,

    /// Fixed row capacity of the circular buffer.
    pub rows: u32,
}

impl RraDef {
    /// Validates this definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidArchive`] when `pdp_per_row` or
    /// `rows` is zero or the x-files factor falls outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| -> RotundaError {
            DefinitionError::InvalidArchive {
                spec: format!("RRA:{}:{}:{}:{}", self.cf, self.xff, self.pdp_per_row, self.rows),
                reason,
            }
            .into()
        };

        if self.pdp_per_row == 0 {
            return Err(fail("pdp_per_row must be greater than zero".to_string()));
        }
        if self.rows == 0 {
            return Err(fail("row count must be greater than zero".to_string()));
        }
        if !(0.0..1.0).contains(&self.xff) {
            return Err(fail(format!(
                "x-files factor {} must be in [0, 1)",
                self.xff
            )));
        }

        Ok(())
    }

    /// Seconds covered by one row at the given step interval.
    pub fn row_width(&self, step: u64) -> u64 {
        step * u64::from(self.pdp_per_row)
    }

    /// Total seconds of history this archive retains at the given step.
    pub fn retention(&self, step: u64) -> u64 {
        self.row_width(step) * u64::from(self.rows)
    }
}

impl FromStr for RraDef {
    type Err = RotundaError;

    /// Parses an `RRA:<cf>:<xff>:<pdp_per_row>:<rows>` token.
    fn from_str(s: &str) -> Result<Self> {
        let fail = |reason: &str| -> RotundaError {
            DefinitionError::InvalidArchive {
                spec: s.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 5 || fields[0] != "RRA" {
            return Err(fail("expected RRA:<cf>:<xff>:<pdp_per_row>:<rows>"));
        }

        let cf: ConsolidationFn = fields[1].parse()?;
        let xff: f64 = fields[2]
            .parse()
            .map_err(|_| fail("x-files factor is not a number"))?;
        let pdp_per_row: u32 = fields[3]
            .parse()
            .map_err(|_| fail("pdp_per_row is not a positive integer"))?;
        let rows: u32 = fields[4]
            .parse()
            .map_err(|_| fail("row count is not a positive integer"))?;

        let def = Self {
            cf,
            xff,
            pdp_per_row,
            rows,
        };
        def.validate()?;
        Ok(def)
    }
}

/// Cross-validates a full definition set the way `create` receives it.
///
/// # Errors
///
/// Returns [`DefinitionError`] when the step is zero, either list is
/// empty, any single definition is invalid, or a name repeats.
pub fn validate_definitions(step: u64, data_sources: &[DsDef], archives: &[RraDef]) -> Result<()> {
    if step == 0 {
        return Err(DefinitionError::InvalidArgument {
            reason: "step must be greater than zero".to_string(),
        }
        .into());
    }
    if data_sources.is_empty() {
        return Err(DefinitionError::InvalidArgument {
            reason: "at least one data source is required".to_string(),
        }
        .into());
    }
    if archives.is_empty() {
        return Err(DefinitionError::InvalidArgument {
            reason: "at least one archive is required".to_string(),
        }
        .into());
    }

    for ds in data_sources {
        ds.validate()?;
    }
    for rra in archives {
        rra.validate()?;
    }

    for (i, ds) in data_sources.iter().enumerate() {
        if data_sources[..i].iter().any(|prev| prev.name == ds.name) {
            return Err(DefinitionError::DuplicateDataSource {
                name: ds.name.clone(),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ds_def() {
        let ds: DsDef = "DS:a:GAUGE:120:0:U".parse().unwrap();
        assert_eq!(ds.name, "a");
        assert_eq!(ds.kind, DsKind::Gauge);
        assert_eq!(ds.heartbeat, 120);
        assert_eq!(ds.min, Some(0.0));
        assert_eq!(ds.max, None);

        let ds: DsDef = "DS:octets_in:COUNTER:600:U:U".parse().unwrap();
        assert_eq!(ds.kind, DsKind::Counter);
        assert_eq!(ds.min, None);
        assert_eq!(ds.max, None);
    }

    #[test]
    fn test_parse_ds_def_rejects_malformed() {
        assert!("DS:a:GAUGE:120:0".parse::<DsDef>().is_err()); // too few fields
        assert!("XX:a:GAUGE:120:0:U".parse::<DsDef>().is_err()); // wrong prefix
        assert!("DS:a:BOGUS:120:0:U".parse::<DsDef>().is_err()); // unknown type
        assert!("DS:a:GAUGE:0:0:U".parse::<DsDef>().is_err()); // zero heartbeat
        assert!("DS:a:GAUGE:120:10:5".parse::<DsDef>().is_err()); // min >= max
        assert!("DS:bad name:GAUGE:120:0:U".parse::<DsDef>().is_err()); // bad chars
        assert!(
            "DS:a_name_that_is_way_too_long_to_fit:GAUGE:120:0:U"
                .parse::<DsDef>()
                .is_err()
        );
    }

    #[test]
    fn test_parse_rra_def() {
        let rra: RraDef = "RRA:AVERAGE:0.5:1:100".parse().unwrap();
        assert_eq!(rra.cf, ConsolidationFn::Average);
        assert_eq!(rra.xff, 0.5);
        assert_eq!(rra.pdp_per_row, 1);
        assert_eq!(rra.rows, 100);

        for (token, cf) in [
            ("RRA:MIN:0:5:10", ConsolidationFn::Min),
            ("RRA:MAX:0.9:5:10", ConsolidationFn::Max),
            ("RRA:LAST:0.25:5:10", ConsolidationFn::Last),
        ] {
            assert_eq!(token.parse::<RraDef>().unwrap().cf, cf);
        }
    }

    #[test]
    fn test_parse_rra_def_rejects_malformed() {
        assert!("RRA:AVERAGE:0.5:1".parse::<RraDef>().is_err()); // too few fields
        assert!("RRA:MEDIAN:0.5:1:100".parse::<RraDef>().is_err()); // unknown cf
        assert!("RRA:AVERAGE:1.0:1:100".parse::<RraDef>().is_err()); // xff out of range
        assert!("RRA:AVERAGE:0.5:0:100".parse::<RraDef>().is_err()); // zero pdp_per_row
        assert!("RRA:AVERAGE:0.5:1:0".parse::<RraDef>().is_err()); // zero rows
    }

    #[test]
    fn test_row_width_and_retention() {
        let rra: RraDef = "RRA:AVERAGE:0.5:10:1000".parse().unwrap();
        assert_eq!(rra.row_width(10), 100);
        assert_eq!(rra.retention(10), 100_000);
    }

    #[test]
    fn test_validate_definitions() {
        let ds = vec!["DS:a:GAUGE:120:0:U".parse().unwrap()];
        let rras = vec!["RRA:AVERAGE:0.5:1:100".parse().unwrap()];

        assert!(validate_definitions(10, &ds, &rras).is_ok());
        assert!(validate_definitions(0, &ds, &rras).is_err());
        assert!(validate_definitions(10, &[], &rras).is_err());
        assert!(validate_definitions(10, &ds, &[]).is_err());

        let dup = vec![
            "DS:a:GAUGE:120:0:U".parse().unwrap(),
            "DS:a:GAUGE:120:0:U".parse().unwrap(),
        ];
        assert!(validate_definitions(10, &dup, &rras).is_err());
    }
}
