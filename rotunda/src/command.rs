//! String-token command surface.
//!
//! Binding layers drive the engine with positional string tokens rather
//! than typed structures. This module parses the classic token forms and
//! dispatches to [`Database`]:
//!
//! - `create`: `-b <start>`, `-s <step>`, `DS:…` and `RRA:…` definitions
//! - `update`: `-t <name:name:…>` template, then `<ts>:<v>[:<v>…]` lines,
//!   with `N` for the current time and `U` for an unknown value
//! - `fetch`: a consolidation-function name, `-s <start>`, `-e <end>`
//!
//! Flags accept their value as the following token, glued to the short
//! form (`-s10`, `"-s 10"`), or after `=` on the long form
//! (`--step=10`). Token splicing of list arguments is the caller's
//! concern; by the time tokens arrive here they are flat.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::archive::FetchRange;
use crate::db::{CreateSpec, Database};
use crate::error::{DefinitionError, Result, UpdateError};
use crate::info::Info;
use crate::pdp::UNKNOWN_TOKEN;
use crate::schema::ConsolidationFn;

/// Seconds of history a fetch with no explicit start covers.
const DEFAULT_FETCH_SPAN: i64 = 86_400;

/// Default step interval when `create` gets no `-s` flag.
const DEFAULT_STEP: u64 = 300;

/// Creates a database from creation tokens.
///
/// # Errors
///
/// Returns [`DefinitionError::InvalidArgument`] for unrecognized tokens
/// or missing flag values, plus everything [`Database::create`] reports.
///
/// # Examples
///
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// rotunda::create(
///     "metrics.rtd",
///     &["-b 1368278979", "-s 10", "DS:a:GAUGE:120:0:U", "RRA:AVERAGE:0.5:1:100"],
/// )?;
/// # Ok(())
/// # }
/// ```
pub fn create<P: AsRef<Path>>(path: P, args: &[&str]) -> Result<()> {
    let mut step = DEFAULT_STEP;
    let mut start: Option<i64> = None;
    let mut data_sources = Vec::new();
    let mut archives = Vec::new();

    let mut tokens = args.iter();
    while let Some(&token) = tokens.next() {
        if let Some(value) = flag_value(token, "-b", "--start", &mut tokens)? {
            start = Some(parse_time(value)?);
        } else if let Some(value) = flag_value(token, "-s", "--step", &mut tokens)? {
            step = value.trim().parse().map_err(|_| invalid(format!("bad step '{value}'")))?;
        } else if token.starts_with("DS:") {
            data_sources.push(token.parse()?);
        } else if token.starts_with("RRA:") {
            archives.push(token.parse()?);
        } else {
            return Err(invalid(format!("unrecognized create argument '{token}'")));
        }
    }

    let start = start.unwrap_or_else(|| now() - 10);
    Database::create(
        path,
        CreateSpec {
            step,
            start,
            data_sources,
            archives,
        },
    )?;
    Ok(())
}

/// Applies update lines to a database.
///
/// Lines apply in order; the first failing line stops processing and is
/// reported, with every preceding line already applied.
///
/// # Errors
///
/// Returns [`UpdateError`] for malformed lines or rejected timestamps
/// and [`UpdateError::UnknownDataSource`] for a template naming a source
/// the database does not have.
pub fn update<P: AsRef<Path>>(path: P, args: &[&str]) -> Result<()> {
    let mut template: Option<&str> = None;
    let mut lines = Vec::new();

    let mut tokens = args.iter();
    while let Some(&token) = tokens.next() {
        if let Some(value) = flag_value(token, "-t", "--template", &mut tokens)? {
            template = Some(value.trim());
        } else {
            lines.push(token);
        }
    }
    if lines.is_empty() {
        return Err(invalid("no update lines given".to_string()));
    }

    let mut db = Database::open(path)?;
    let ds_count = db.data_sources().len();

    // A template maps supplied values onto data-source positions; sources
    // it leaves out receive the unknown token.
    let order: Option<Vec<usize>> = match template {
        None => None,
        Some(spec) => Some(
            spec.split(':')
                .map(|name| {
                    db.data_sources()
                        .iter()
                        .position(|d| d.name == name)
                        .ok_or_else(|| {
                            UpdateError::UnknownDataSource {
                                name: name.to_string(),
                            }
                            .into()
                        })
                })
                .collect::<Result<_>>()?,
        ),
    };

    for line in lines {
        let mut fields = line.split(':');
        let ts_token = fields.next().unwrap_or_default();
        let values: Vec<&str> = fields.collect();
        if ts_token.is_empty() || values.is_empty() {
            return Err(UpdateError::MalformedLine {
                line: line.to_string(),
                reason: "expected <timestamp>:<value>[:<value>...]".to_string(),
            }
            .into());
        }

        let timestamp = parse_time(ts_token)?;
        match &order {
            None => db.update(timestamp, &values)?,
            Some(order) => {
                if values.len() != order.len() {
                    return Err(UpdateError::WrongValueCount {
                        expected: order.len(),
                        got: values.len(),
                    }
                    .into());
                }
                let mut tokens = vec![UNKNOWN_TOKEN; ds_count];
                for (&position, &value) in order.iter().zip(&values) {
                    tokens[position] = value;
                }
                db.update(timestamp, &tokens)?;
            }
        }
    }

    Ok(())
}

/// Fetches consolidated rows using fetch tokens.
///
/// The end defaults to the current time and the start to one day before
/// the end.
///
/// # Errors
///
/// Returns [`DefinitionError::InvalidArgument`] when the consolidation
/// function is missing or a token is unrecognized, plus everything
/// [`Database::fetch`] reports.
pub fn fetch<P: AsRef<Path>>(
    path: P,
    args: &[&str],
) -> Result<(FetchRange, Vec<String>, Vec<Vec<Option<f64>>>)> {
    let mut cf: Option<ConsolidationFn> = None;
    let mut start: Option<i64> = None;
    let mut end: Option<i64> = None;

    let mut tokens = args.iter();
    while let Some(&token) = tokens.next() {
        if let Some(value) = flag_value(token, "-s", "--start", &mut tokens)? {
            start = Some(parse_time(value)?);
        } else if let Some(value) = flag_value(token, "-e", "--end", &mut tokens)? {
            end = Some(parse_time(value)?);
        } else if cf.is_none() {
            cf = Some(token.parse()?);
        } else {
            return Err(invalid(format!("unrecognized fetch argument '{token}'")));
        }
    }

    let cf = cf.ok_or_else(|| invalid("consolidation function not specified".to_string()))?;
    let end = end.unwrap_or_else(now);
    let start = start.unwrap_or(end - DEFAULT_FETCH_SPAN);

    Database::open(path)?.fetch(cf, start, end)
}

/// Nominal end-time of the oldest row addressed by the first archive.
///
/// # Errors
///
/// Propagates open failures.
pub fn first<P: AsRef<Path>>(path: P) -> Result<i64> {
    Database::open(path)?.first(0)
}

/// Timestamp of the most recent applied update.
///
/// # Errors
///
/// Propagates open failures.
pub fn last<P: AsRef<Path>>(path: P) -> Result<i64> {
    Ok(Database::open(path)?.last())
}

/// Ordered introspection dump of the database.
///
/// # Errors
///
/// Propagates open failures.
pub fn info<P: AsRef<Path>>(path: P) -> Result<Info> {
    Database::open(path)?.info()
}

/// Matches a flag token against its short and long spellings.
///
/// Returns the flag's value, pulled from the remainder of the same token
/// (`-s10`, `"-s 10"`, `--step=10`) or from the next token.
fn flag_value<'a, I>(
    token: &'a str,
    short: &str,
    long: &str,
    rest: &mut I,
) -> Result<Option<&'a str>>
where
    I: Iterator<Item = &'a &'a str>,
{
    let take_next = |rest: &mut I| -> Result<&'a str> {
        rest.next()
            .map(|&v| v)
            .ok_or_else(|| invalid(format!("missing value for {token}")))
    };

    if token == short || token == long {
        return Ok(Some(take_next(rest)?));
    }
    if let Some(glued) = token.strip_prefix(short)
        && !glued.is_empty()
    {
        return Ok(Some(glued));
    }
    if let Some(assigned) = token.strip_prefix(long)
        && let Some(value) = assigned.strip_prefix('=')
    {
        return Ok(Some(value));
    }
    Ok(None)
}

/// Parses a time token: `N`/`now` for the current time, otherwise epoch
/// seconds.
fn parse_time(token: &str) -> Result<i64> {
    let token = token.trim();
    if token == "N" || token == "now" {
        return Ok(now());
    }
    token
        .parse()
        .map_err(|_| invalid(format!("bad timestamp '{token}'")))
}

/// Current wall-clock time in epoch seconds.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn invalid(reason: String) -> crate::error::RotundaError {
    DefinitionError::InvalidArgument { reason }.into()
}
